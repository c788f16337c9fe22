use thiserror::Error;

pub const TERMINAL_SERVICE_MESSAGE: &str = "Failed to communicate with the AI.";
pub const AUTH_FALLBACK_MESSAGE: &str = "Failed to initialize user session. Using local ID.";
pub const VOICE_START_MESSAGE: &str =
    "Could not start voice input. Please ensure microphone access is granted.";

/// Every failure a session can surface.
///
/// `Display` is the user-visible text that lands in the session's single
/// message slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemedyError {
    #[error("{0}")]
    Validation(String),

    /// Bad status, unreachable endpoint or a response missing its payload.
    /// Only this kind is retried.
    #[error("{0}")]
    TransientService(String),

    #[error("{message}")]
    TerminalService {
        message: String,
        cause: Option<String>,
    },

    #[error("{0}")]
    AuthBootstrap(String),

    #[error("Speech recognition error: {0}")]
    SpeechCapture(String),

    /// The recognizer could not be launched at all.
    #[error("Could not start voice input. Please ensure microphone access is granted.")]
    SpeechStart,

    #[error("Another request is already in progress.")]
    Busy,

    #[error("User session is not ready yet.")]
    IdentityNotReady,

    #[error("Request cancelled.")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ServiceResult<T> = Result<T, RemedyError>;

impl RemedyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientService(message.into())
    }

    pub fn retries_exhausted(last_failure: impl Into<String>) -> Self {
        Self::TerminalService {
            message: TERMINAL_SERVICE_MESSAGE.to_string(),
            cause: Some(last_failure.into()),
        }
    }

    pub fn undecodable(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::TerminalService {
            message: format!("The AI returned a response that could not be read: {detail}"),
            cause: Some(detail),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalService { .. })
    }

    /// Whether the failure is reported as an error rather than a notice.
    /// Auth fallback, speech failures and cancellation are notices.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AuthBootstrap(_) | Self::SpeechCapture(_) | Self::SpeechStart | Self::Cancelled
        )
    }
}
