pub mod client;
pub mod config;
pub mod identity;
pub mod questionnaire;
pub mod retry;
pub mod session;
pub mod speech;

use std::path::PathBuf;

use remedy_contracts::error::ServiceResult;

pub use client::{
    fetch_clarification, fetch_remedies, GeminiTextProvider, GenerateResponse, GenerateTransport,
    GeneratedContent, HttpTransport, TextProvider, TextRequest, TransportResponse,
};
pub use config::EngineConfig;
pub use identity::{bootstrap_identity, AnonymousSignIn, Identity, IdentityProvider, LocalIdentity};
pub use questionnaire::{Advance, Questionnaire, QuestionnaireState, StepsOutcome};
pub use retry::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper};
pub use session::{BusyKind, PendingRequest, RemedySession, ViewState};
pub use speech::{CommandDictation, NoSpeech, SpeechCapture};

/// Wires a session from configuration. Identity is not bootstrapped yet.
pub fn build_session(
    config: &EngineConfig,
    events_path: Option<PathBuf>,
) -> ServiceResult<RemedySession> {
    let mut session = RemedySession::new(config.text_provider())
        .with_profile(config.prompt_profile()?)
        .with_identity_provider(config.identity_provider())
        .with_speech(config.speech_capture()?);
    if let Some(path) = events_path {
        session = session.with_event_log(path);
    }
    Ok(session)
}
