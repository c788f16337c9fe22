use std::env;
use std::time::Duration;

use remedy_contracts::error::ServiceResult;
use remedy_contracts::prompts::PromptProfile;

use crate::client::GeminiTextProvider;
use crate::identity::{AnonymousSignIn, IdentityProvider, LocalIdentity};
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::speech::{CommandDictation, NoSpeech, SpeechCapture};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash-preview-05-20";
pub const DEFAULT_IDENTITY_BASE: &str = "https://identitytoolkit.googleapis.com/v1";

const DEFAULT_BACKOFF_SECONDS: f64 = 1.0;

/// Everything the engine reads from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub text_model: String,
    pub retry: RetryPolicy,
    pub request_timeout: Option<Duration>,
    pub identity_base: String,
    pub firebase_api_key: Option<String>,
    pub speech_command: Option<String>,
    pub remedy_prompt: Option<String>,
    pub clarify_prompt: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Values are trimmed; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let max_retries = get("REMEDY_TRANSPORT_RETRIES")
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(|value| value.clamp(0, DEFAULT_MAX_RETRIES as i64) as u32)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let backoff = parse_f64(get("REMEDY_RETRY_BACKOFF"))
            .unwrap_or(DEFAULT_BACKOFF_SECONDS)
            .clamp(0.0, 10.0);
        let request_timeout = parse_f64(get("REMEDY_REQUEST_TIMEOUT"))
            .map(|seconds| Duration::from_secs_f64(seconds.clamp(5.0, 300.0)));

        Self {
            api_base: get("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            text_model: get("REMEDY_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_secs_f64(backoff),
            },
            request_timeout,
            identity_base: get("REMEDY_IDENTITY_BASE")
                .unwrap_or_else(|| DEFAULT_IDENTITY_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            firebase_api_key: get("FIREBASE_API_KEY"),
            speech_command: get("REMEDY_SPEECH_CMD"),
            remedy_prompt: get("REMEDY_REMEDY_PROMPT"),
            clarify_prompt: get("REMEDY_CLARIFY_PROMPT"),
        }
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.text_model = model.trim().to_string();
        }
        self
    }

    /// Custom templates apply only when both are set.
    pub fn prompt_profile(&self) -> ServiceResult<PromptProfile> {
        match (&self.remedy_prompt, &self.clarify_prompt) {
            (Some(remedy), Some(clarify)) => PromptProfile::custom("custom", remedy, clarify),
            _ => Ok(PromptProfile::homeopathy()),
        }
    }

    pub fn text_provider(&self) -> GeminiTextProvider {
        GeminiTextProvider::new(self)
    }

    pub fn identity_provider(&self) -> Box<dyn IdentityProvider> {
        match &self.firebase_api_key {
            Some(key) => Box::new(AnonymousSignIn::new(
                &self.identity_base,
                key,
                self.request_timeout,
            )),
            None => Box::new(LocalIdentity),
        }
    }

    pub fn speech_capture(&self) -> ServiceResult<Box<dyn SpeechCapture>> {
        match &self.speech_command {
            Some(command) => Ok(Box::new(CommandDictation::from_command_line(command)?)),
            None => Ok(Box::new(NoSpeech)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_f64(raw: Option<String>) -> Option<f64> {
    raw.and_then(|text| text.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
