use remedy_contracts::error::{RemedyError, ServiceResult};
use remedy_contracts::model::{ClarificationStep, RemedyQuery, SelectionSet, QUERY_SEPARATOR};
use serde::Serialize;

pub const CLARIFY_EMPTY_MESSAGE: &str = "Please enter symptoms or a disease name to clarify.";
pub const NO_CLARIFICATION_MESSAGE: &str = "No clarification available for these symptoms.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum QuestionnaireState {
    #[default]
    Idle,
    AwaitingSteps,
    InStep(usize),
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepsOutcome {
    Started { steps: usize },
    NoClarification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Moved to step `index`.
    Next { index: usize, appended: Vec<String> },
    /// Final step done; the query is ready to submit.
    Submit { appended: Vec<String> },
}

impl Advance {
    pub fn appended(&self) -> &[String] {
        match self {
            Self::Next { appended, .. } | Self::Submit { appended } => appended,
        }
    }
}

/// Walks clarification steps and folds ticked options into the query.
#[derive(Debug, Clone, Default)]
pub struct Questionnaire {
    state: QuestionnaireState,
    steps: Vec<ClarificationStep>,
    selections: SelectionSet,
}

impl Questionnaire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> QuestionnaireState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), QuestionnaireState::InStep(_))
    }

    pub fn steps(&self) -> &[ClarificationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_index(&self) -> usize {
        match self.state() {
            QuestionnaireState::InStep(index) => index,
            _ => 0,
        }
    }

    pub fn current_step(&self) -> Option<&ClarificationStep> {
        match self.state() {
            QuestionnaireState::InStep(index) => self.steps.get(index),
            _ => None,
        }
    }

    pub fn is_last_step(&self) -> bool {
        match self.state() {
            QuestionnaireState::InStep(index) => index + 1 == self.steps.len(),
            _ => false,
        }
    }

    pub fn selections(&self) -> &SelectionSet {
        &self.selections
    }

    /// Starts waiting for steps. Any previous questionnaire is discarded.
    pub fn begin(&mut self, query: &RemedyQuery) -> ServiceResult<()> {
        if query.is_blank() {
            return Err(RemedyError::validation(CLARIFY_EMPTY_MESSAGE));
        }
        self.clear();
        self.set(QuestionnaireState::AwaitingSteps);
        Ok(())
    }

    pub fn receive_steps(&mut self, steps: Vec<ClarificationStep>) -> ServiceResult<StepsOutcome> {
        if self.state() != QuestionnaireState::AwaitingSteps {
            return Err(RemedyError::validation(
                "No clarification request is pending.",
            ));
        }
        if steps.is_empty() {
            self.reset();
            return Ok(StepsOutcome::NoClarification);
        }
        let count = steps.len();
        self.steps = steps;
        self.selections.clear();
        self.set(QuestionnaireState::InStep(0));
        Ok(StepsOutcome::Started { steps: count })
    }

    /// A clarification request failed; back to idle.
    pub fn fail(&mut self) {
        if self.state() == QuestionnaireState::AwaitingSteps {
            self.reset();
        }
    }

    /// Returns whether `option` is selected afterwards.
    pub fn toggle(&mut self, option: &str) -> ServiceResult<bool> {
        let step = self
            .current_step()
            .ok_or_else(|| RemedyError::validation("No clarification step is active."))?;
        if !step.contains(option) {
            return Err(RemedyError::validation(format!(
                "'{option}' is not an option for {}.",
                step.category
            )));
        }
        Ok(self.selections.toggle(option))
    }

    /// Appends the current step's selections to `query` and moves on. On the
    /// final step the questionnaire is cleared and enters `Submitting`.
    pub fn advance(&mut self, query: &mut RemedyQuery) -> ServiceResult<Advance> {
        let QuestionnaireState::InStep(index) = self.state() else {
            return Err(RemedyError::validation("No clarification step is active."));
        };
        let appended: Vec<String> = self
            .steps
            .get(index)
            .map(|step| {
                step.selected(&self.selections)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        query.append_part(&appended.join(QUERY_SEPARATOR));

        if index + 1 < self.steps.len() {
            self.set(QuestionnaireState::InStep(index + 1));
            return Ok(Advance::Next {
                index: index + 1,
                appended,
            });
        }
        self.clear();
        self.set(QuestionnaireState::Submitting);
        Ok(Advance::Submit { appended })
    }

    pub fn finish_submission(&mut self) {
        if self.state() == QuestionnaireState::Submitting {
            self.set(QuestionnaireState::Idle);
        }
    }

    pub fn reset(&mut self) {
        self.clear();
        self.set(QuestionnaireState::Idle);
    }

    fn clear(&mut self) {
        self.steps.clear();
        self.selections.clear();
    }

    fn set(&mut self, state: QuestionnaireState) {
        self.state = state;
    }
}
