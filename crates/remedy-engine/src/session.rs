use std::path::PathBuf;

use remedy_contracts::error::{RemedyError, ServiceResult};
use remedy_contracts::events::{EventLog, SessionEvent};
use remedy_contracts::model::{ClarificationStep, RemedyQuery, RemedyResult, Theme};
use remedy_contracts::prompts::PromptProfile;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{self, TextProvider};
use crate::identity::{bootstrap_identity, Identity, IdentityProvider};
use crate::questionnaire::{
    Advance, Questionnaire, QuestionnaireState, StepsOutcome, NO_CLARIFICATION_MESSAGE,
};
use crate::retry::CancelToken;
use crate::speech::{NoSpeech, SpeechCapture};

pub const FETCH_EMPTY_MESSAGE: &str = "Please enter symptoms or a disease name.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyKind {
    Fetching,
    Clarifying,
    Listening,
}

impl BusyKind {
    fn request_name(self) -> &'static str {
        match self {
            Self::Fetching => "remedies",
            Self::Clarifying => "clarification",
            Self::Listening => "voice",
        }
    }
}

/// A request that has passed validation and holds the busy flag until it is
/// handed back to `complete_*`.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    id: u64,
    kind: BusyKind,
    prompt: String,
    cancel: CancelToken,
}

/// What the rendering layer needs to draw one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub query: String,
    pub questionnaire: QuestionnaireState,
    pub step_index: usize,
    pub step_count: usize,
    pub current_step: Option<ClarificationStep>,
    pub is_last_step: bool,
    pub selections: Vec<String>,
    pub result: Option<RemedyResult>,
    pub message: Option<String>,
    pub busy: Option<BusyKind>,
    pub identity: Identity,
    pub theme: Theme,
    pub voice_available: bool,
}

pub struct RemedySession {
    session_id: String,
    provider: Box<dyn TextProvider>,
    identity_provider: Option<Box<dyn IdentityProvider>>,
    speech: Box<dyn SpeechCapture>,
    profile: PromptProfile,
    events: Option<EventLog>,
    identity: Identity,
    query: RemedyQuery,
    questionnaire: Questionnaire,
    result: Option<RemedyResult>,
    message: Option<String>,
    theme: Theme,
    busy: Option<BusyKind>,
    in_flight: Option<(u64, CancelToken)>,
    next_request_id: u64,
    finished: bool,
}

impl RemedySession {
    pub fn new(provider: impl TextProvider + 'static) -> Self {
        Self::from_boxed(Box::new(provider))
    }

    pub fn from_boxed(provider: Box<dyn TextProvider>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            provider,
            identity_provider: None,
            speech: Box::new(NoSpeech),
            profile: PromptProfile::default(),
            events: None,
            identity: Identity::pending(),
            query: RemedyQuery::default(),
            questionnaire: Questionnaire::new(),
            result: None,
            message: None,
            theme: Theme::default(),
            busy: None,
            in_flight: None,
            next_request_id: 1,
            finished: false,
        }
    }

    pub fn with_identity_provider(mut self, provider: Box<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    pub fn with_speech(mut self, speech: Box<dyn SpeechCapture>) -> Self {
        self.speech = speech;
        self
    }

    pub fn with_profile(mut self, profile: PromptProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.events = Some(EventLog::new(path, self.session_id.clone()));
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn query(&self) -> &RemedyQuery {
        &self.query
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    pub fn result(&self) -> Option<&RemedyResult> {
        self.result.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn busy(&self) -> Option<BusyKind> {
        self.busy
    }

    pub fn provider(&self) -> &dyn TextProvider {
        self.provider.as_ref()
    }

    /// Resolves the user identity. A failed sign-in still leaves the session
    /// ready with a local id; the returned notice is also put in the message
    /// slot.
    pub fn bootstrap(&mut self) -> Option<RemedyError> {
        self.emit(SessionEvent::SessionStarted {
            provider: self.provider.name().to_string(),
            profile: self.profile.name.clone(),
        });
        let (identity, notice) = bootstrap_identity(self.identity_provider.as_deref());
        self.identity = identity;
        if let Some(notice) = &notice {
            self.message = Some(notice.to_string());
        }
        self.emit(SessionEvent::IdentityReady {
            user_id: self.identity.user_id.clone(),
            provider: self.identity.provider.clone(),
            fallback: notice.is_some(),
        });
        notice
    }

    /// Cancels any in-flight request and signs out. Safe to call twice.
    pub fn teardown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.cancel_in_flight();
        if let Some(provider) = &self.identity_provider {
            if let Err(err) = provider.sign_out() {
                warn!(error = %format!("{err:#}"), "sign-out failed");
            }
        }
        self.emit(SessionEvent::SessionFinished);
    }

    /// Direct edit of the query text. Drops questionnaire progress.
    pub fn edit_query(&mut self, text: impl Into<String>) {
        self.cancel_in_flight();
        self.query.replace(text);
        self.questionnaire.reset();
        self.emit(SessionEvent::QueryEdited {
            query: self.query.to_string(),
        });
    }

    pub fn begin_fetch(&mut self) -> ServiceResult<PendingRequest> {
        self.ensure_can_start()?;
        if self.query.is_blank() {
            return Err(self.record(RemedyError::validation(FETCH_EMPTY_MESSAGE)));
        }
        if self.questionnaire.state() != QuestionnaireState::Submitting {
            self.questionnaire.reset();
        }
        self.message = None;
        self.result = None;
        let prompt = self.profile.remedy_prompt(self.query.as_str());
        self.emit(SessionEvent::RemediesRequested {
            query: self.query.to_string(),
        });
        Ok(self.start_request(BusyKind::Fetching, prompt))
    }

    /// Runs the remote call for `pending`. Takes `&self` so the call can be
    /// made while the session is only shared.
    pub fn run_fetch(&self, pending: &PendingRequest) -> ServiceResult<RemedyResult> {
        client::fetch_remedies(self.provider.as_ref(), &pending.prompt, &pending.cancel)
    }

    pub fn complete_fetch(
        &mut self,
        pending: PendingRequest,
        outcome: ServiceResult<RemedyResult>,
    ) -> ServiceResult<()> {
        self.finish_request(&pending)?;
        self.questionnaire.finish_submission();
        match outcome {
            Ok(result) => {
                info!(remedies = result.remedies.len(), "remedies received");
                self.emit(SessionEvent::RemediesReceived {
                    remedies: result.remedies.len(),
                    lifestyle_tips: result.lifestyle_tips.len(),
                });
                self.result = Some(result);
                Ok(())
            }
            Err(err) => Err(self.request_failed(&pending, err)),
        }
    }

    pub fn fetch_remedies(&mut self) -> ServiceResult<()> {
        let pending = self.begin_fetch()?;
        let outcome = self.run_fetch(&pending);
        self.complete_fetch(pending, outcome)
    }

    pub fn begin_clarify(&mut self) -> ServiceResult<PendingRequest> {
        self.ensure_can_start()?;
        if let Err(err) = self.questionnaire.begin(&self.query) {
            return Err(self.record(err));
        }
        self.message = None;
        self.result = None;
        let prompt = self.profile.clarify_prompt(self.query.as_str());
        self.emit(SessionEvent::ClarificationRequested {
            query: self.query.to_string(),
        });
        Ok(self.start_request(BusyKind::Clarifying, prompt))
    }

    pub fn run_clarify(&self, pending: &PendingRequest) -> ServiceResult<Vec<ClarificationStep>> {
        client::fetch_clarification(self.provider.as_ref(), &pending.prompt, &pending.cancel)
    }

    pub fn complete_clarify(
        &mut self,
        pending: PendingRequest,
        outcome: ServiceResult<Vec<ClarificationStep>>,
    ) -> ServiceResult<StepsOutcome> {
        self.finish_request(&pending)?;
        let steps = match outcome {
            Ok(steps) => steps,
            Err(err) => {
                self.questionnaire.fail();
                return Err(self.request_failed(&pending, err));
            }
        };
        let outcome = self.questionnaire.receive_steps(steps)?;
        match outcome {
            StepsOutcome::Started { steps } => {
                self.emit(SessionEvent::ClarificationReceived { steps });
            }
            StepsOutcome::NoClarification => {
                self.message = Some(NO_CLARIFICATION_MESSAGE.to_string());
                self.emit(SessionEvent::ClarificationReceived { steps: 0 });
            }
        }
        Ok(outcome)
    }

    pub fn clarify(&mut self) -> ServiceResult<StepsOutcome> {
        let pending = self.begin_clarify()?;
        let outcome = self.run_clarify(&pending);
        self.complete_clarify(pending, outcome)
    }

    /// Returns whether the option is now selected.
    pub fn toggle_option(&mut self, option: &str) -> ServiceResult<bool> {
        self.ensure_can_start()?;
        self.questionnaire
            .toggle(option)
            .map_err(|err| self.record(err))
    }

    /// Folds the current step into the query. On the final step this also
    /// fetches remedies for the updated query.
    pub fn advance_step(&mut self) -> ServiceResult<Advance> {
        self.ensure_can_start()?;
        let advance = match self.questionnaire.advance(&mut self.query) {
            Ok(advance) => advance,
            Err(err) => return Err(self.record(err)),
        };
        self.emit(SessionEvent::StepAdvanced {
            appended: advance.appended().to_vec(),
            query: self.query.to_string(),
            submitted: matches!(advance, Advance::Submit { .. }),
        });
        if let Advance::Submit { .. } = advance {
            match self.begin_fetch() {
                Ok(pending) => {
                    let outcome = self.run_fetch(&pending);
                    self.complete_fetch(pending, outcome)?;
                }
                Err(err) => {
                    self.questionnaire.finish_submission();
                    return Err(err);
                }
            }
        }
        Ok(advance)
    }

    /// Single-shot dictation. During a questionnaire the transcript is
    /// appended; otherwise it replaces the query.
    pub fn start_voice_input(&mut self) -> ServiceResult<String> {
        self.ensure_can_start()?;
        self.message = None;
        self.busy = Some(BusyKind::Listening);
        let outcome = self.speech.listen();
        self.busy = None;
        let transcript = match outcome {
            Ok(transcript) => transcript,
            Err(err) => {
                warn!(error = %err, "voice input failed");
                return Err(self.record(err));
            }
        };
        let appended = self.questionnaire.is_active() && !self.query.is_blank();
        if appended {
            self.query.append_part(&transcript);
        } else {
            self.query.replace(transcript.clone());
        }
        self.emit(SessionEvent::VoiceTranscript {
            transcript: transcript.clone(),
            appended,
        });
        Ok(transcript)
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.emit(SessionEvent::ThemeChanged { theme: self.theme });
        self.theme
    }

    /// Back to an empty query with no results, questionnaire or message.
    pub fn reset(&mut self) {
        self.cancel_in_flight();
        self.query.clear();
        self.questionnaire.reset();
        self.result = None;
        self.message = None;
        self.emit(SessionEvent::SessionReset);
    }

    pub fn view(&self) -> ViewState {
        ViewState {
            query: self.query.as_str().to_string(),
            questionnaire: self.questionnaire.state(),
            step_index: self.questionnaire.step_index(),
            step_count: self.questionnaire.len(),
            current_step: self.questionnaire.current_step().cloned(),
            is_last_step: self.questionnaire.is_last_step(),
            selections: self
                .questionnaire
                .selections()
                .iter()
                .map(str::to_string)
                .collect(),
            result: self.result.clone(),
            message: self.message.clone(),
            busy: self.busy,
            identity: self.identity.clone(),
            theme: self.theme,
            voice_available: self.speech.is_available(),
        }
    }

    fn ensure_can_start(&mut self) -> ServiceResult<()> {
        if !self.identity.ready {
            return Err(self.record(RemedyError::IdentityNotReady));
        }
        if self.busy.is_some() {
            return Err(self.record(RemedyError::Busy));
        }
        Ok(())
    }

    fn start_request(&mut self, kind: BusyKind, prompt: String) -> PendingRequest {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let cancel = CancelToken::new();
        self.in_flight = Some((id, cancel.clone()));
        self.busy = Some(kind);
        debug!(request = id, ?kind, "request started");
        PendingRequest {
            id,
            kind,
            prompt,
            cancel,
        }
    }

    /// Releases the busy flag if `pending` is still the live request.
    fn finish_request(&mut self, pending: &PendingRequest) -> ServiceResult<()> {
        match &self.in_flight {
            Some((id, _)) if *id == pending.id => {
                self.in_flight = None;
                self.busy = None;
                Ok(())
            }
            _ => {
                debug!(request = pending.id, "ignoring superseded request");
                Err(RemedyError::Cancelled)
            }
        }
    }

    fn cancel_in_flight(&mut self) {
        if let Some((id, cancel)) = self.in_flight.take() {
            debug!(request = id, "cancelling in-flight request");
            cancel.cancel();
        }
        if matches!(self.busy, Some(BusyKind::Fetching | BusyKind::Clarifying)) {
            self.busy = None;
        }
    }

    fn request_failed(&mut self, pending: &PendingRequest, err: RemedyError) -> RemedyError {
        let cause = match &err {
            RemedyError::TerminalService { cause, .. } => cause.clone(),
            _ => None,
        };
        self.emit(SessionEvent::RequestFailed {
            request: pending.kind.request_name().to_string(),
            error: err.to_string(),
            cause,
        });
        self.record(err)
    }

    /// Puts `err` in the message slot, replacing whatever was there.
    fn record(&mut self, err: RemedyError) -> RemedyError {
        if err != RemedyError::Cancelled {
            self.message = Some(err.to_string());
        }
        err
    }

    fn emit(&self, event: SessionEvent) {
        let Some(events) = &self.events else {
            return;
        };
        let name = event.name();
        if let Err(err) = events.append(event) {
            warn!(event = name, error = %format!("{err:#}"), "event log write failed");
        }
    }
}

impl Drop for RemedySession {
    fn drop(&mut self) {
        self.teardown();
    }
}
