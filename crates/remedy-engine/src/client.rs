use std::time::Duration;

use anyhow::Context;
use remedy_contracts::error::{RemedyError, ServiceResult};
use remedy_contracts::model::{ClarificationStep, RemedyResult};
use remedy_contracts::schema::{clarification_schema, ResponseFormat};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::retry::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper};

const INVALID_FORMAT_MESSAGE: &str = "Invalid response format from API.";

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub prompt: String,
    pub format: ResponseFormat,
}

impl TextRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::Text,
        }
    }

    /// Schema-constrained JSON; `schema: None` uses the remedy result shape.
    pub fn json(prompt: impl Into<String>, schema: Option<Value>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::Json(schema),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedContent {
    Json(Value),
    Text(String),
}

impl GeneratedContent {
    pub fn into_json(self) -> ServiceResult<Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Text(text) => serde_json::from_str(&text)
                .map_err(|err| RemedyError::undecodable(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResponse {
    pub content: GeneratedContent,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &TextRequest, cancel: &CancelToken)
        -> ServiceResult<GenerateResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One POST of a JSON payload. Errors are transport-level only; HTTP status
/// handling belongs to the caller.
pub trait GenerateTransport: Send + Sync {
    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> anyhow::Result<TransportResponse>;
}

pub struct HttpTransport {
    http: HttpClient,
    timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }
}

impl GenerateTransport for HttpTransport {
    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> anyhow::Result<TransportResponse> {
        let mut request = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .json(payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .context("Gemini response body read failed")?;
        Ok(TransportResponse { status, body })
    }
}

pub struct GeminiTextProvider {
    api_base: String,
    model: String,
    api_key: Option<String>,
    policy: RetryPolicy,
    transport: Box<dyn GenerateTransport>,
    sleeper: Box<dyn Sleeper>,
}

impl GeminiTextProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            model: config.text_model.clone(),
            api_key: config.api_key.clone(),
            policy: config.retry,
            transport: Box::new(HttpTransport::new(config.request_timeout)),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_transport(mut self, transport: impl GenerateTransport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn attempt(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        format: &ResponseFormat,
    ) -> ServiceResult<GeneratedContent> {
        let response = self
            .transport
            .post_json(endpoint, api_key, payload)
            .map_err(|err| RemedyError::transient(error_chain_text(&err, 300)))?;
        if !response.is_success() {
            return Err(RemedyError::transient(format!(
                "HTTP error! status: {}",
                response.status
            )));
        }
        let parsed: Value = serde_json::from_str(&response.body)
            .map_err(|_| RemedyError::transient(INVALID_FORMAT_MESSAGE))?;
        let text = extract_candidate_text(&parsed)
            .ok_or_else(|| RemedyError::transient(INVALID_FORMAT_MESSAGE))?;

        if format.wants_json() {
            serde_json::from_str(text)
                .map(GeneratedContent::Json)
                .map_err(|err| RemedyError::undecodable(err.to_string()))
        } else {
            Ok(GeneratedContent::Text(text.to_string()))
        }
    }
}

impl TextProvider for GeminiTextProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &TextRequest,
        cancel: &CancelToken,
    ) -> ServiceResult<GenerateResponse> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RemedyError::Config("GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string())
        })?;
        let endpoint = self.endpoint();
        let payload = build_payload(&request.prompt, &request.format);
        let mut warnings = Vec::new();
        let mut retry = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RemedyError::Cancelled);
            }
            let err = match self.attempt(&endpoint, api_key, &payload, &request.format) {
                Ok(content) => {
                    debug!(attempts = retry + 1, "Gemini request succeeded");
                    return Ok(GenerateResponse {
                        content,
                        attempts: retry + 1,
                        warnings,
                    });
                }
                Err(err) => err,
            };
            if !err.is_retryable() {
                warn!(error = %err, "Gemini request failed without retry");
                return Err(err);
            }
            if retry >= self.policy.max_retries {
                warn!(
                    attempts = retry + 1,
                    error = %err,
                    "Gemini retries exhausted"
                );
                return Err(RemedyError::retries_exhausted(err.to_string()));
            }

            let delay = self.policy.delay_for(retry);
            warn!(
                retry = retry + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Gemini request failed, backing off"
            );
            warnings.push(format!(
                "Gemini retry {}/{} after {}",
                retry + 1,
                self.policy.max_retries,
                err
            ));
            if !self.sleeper.sleep(delay, cancel) {
                return Err(RemedyError::Cancelled);
            }
            retry += 1;
        }
    }
}

pub fn build_payload(prompt: &str, format: &ResponseFormat) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "contents".to_string(),
        json!([{ "role": "user", "parts": [{ "text": prompt }] }]),
    );
    if let Some(config) = format.generation_config() {
        payload.insert("generationConfig".to_string(), config);
    }
    Value::Object(payload)
}

/// `candidates[0].content.parts[0].text`, if present and non-empty.
pub fn extract_candidate_text(response: &Value) -> Option<&str> {
    response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .filter(|text| !text.is_empty())
}

pub fn decode_remedy_result(value: Value) -> ServiceResult<RemedyResult> {
    serde_json::from_value(value).map_err(|err| RemedyError::undecodable(err.to_string()))
}

pub fn decode_clarification_steps(value: Value) -> ServiceResult<Vec<ClarificationStep>> {
    serde_json::from_value(value).map_err(|err| RemedyError::undecodable(err.to_string()))
}

pub fn fetch_remedies(
    provider: &dyn TextProvider,
    prompt: &str,
    cancel: &CancelToken,
) -> ServiceResult<RemedyResult> {
    let response = provider.generate(&TextRequest::json(prompt, None), cancel)?;
    decode_remedy_result(response.content.into_json()?)
}

pub fn fetch_clarification(
    provider: &dyn TextProvider,
    prompt: &str,
    cancel: &CancelToken,
) -> ServiceResult<Vec<ClarificationStep>> {
    let request = TextRequest::json(prompt, Some(clarification_schema()));
    let response = provider.generate(&request, cancel)?;
    decode_clarification_steps(response.content.into_json()?)
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::{GenerateTransport, TransportResponse};

    pub(crate) enum Scripted {
        Reply(u16, String),
        Unreachable(&'static str),
    }

    /// Replays scripted outcomes in order; the last one repeats.
    #[derive(Clone)]
    pub(crate) struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Scripted>>>,
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl GenerateTransport for ScriptedTransport {
        fn post_json(
            &self,
            endpoint: &str,
            _api_key: &str,
            payload: &Value,
        ) -> anyhow::Result<TransportResponse> {
            self.calls
                .lock()
                .map_err(|_| anyhow::anyhow!("calls lock poisoned"))?
                .push((endpoint.to_string(), payload.clone()));
            let mut script = self
                .script
                .lock()
                .map_err(|_| anyhow::anyhow!("script lock poisoned"))?;
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().map(|item| match item {
                    Scripted::Reply(status, body) => Scripted::Reply(*status, body.clone()),
                    Scripted::Unreachable(msg) => Scripted::Unreachable(*msg),
                })
            };
            match next {
                Some(Scripted::Reply(status, body)) => Ok(TransportResponse { status, body }),
                Some(Scripted::Unreachable(msg)) => Err(anyhow::anyhow!(msg)),
                None => Err(anyhow::anyhow!("script exhausted")),
            }
        }
    }

    /// A `generateContent` response body carrying `text` as its first part.
    pub(crate) fn candidate_body(text: &str) -> String {
        json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
        .to_string()
    }

    pub(crate) fn ok(text: &str) -> Scripted {
        Scripted::Reply(200, candidate_body(text))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use remedy_contracts::error::{RemedyError, TERMINAL_SERVICE_MESSAGE};
    use remedy_contracts::schema::{clarification_schema, remedy_result_schema};
    use serde_json::{json, Value};

    use super::testing::{ok, Scripted, ScriptedTransport};
    use super::{
        build_payload, error_chain_text, extract_candidate_text, fetch_clarification,
        fetch_remedies, GeminiTextProvider, GeneratedContent, TextProvider, TextRequest,
    };
    use crate::config::EngineConfig;
    use crate::retry::testing::RecordingSleeper;
    use crate::retry::CancelToken;

    fn provider(script: Vec<Scripted>) -> (GeminiTextProvider, ScriptedTransport, RecordingSleeper) {
        let transport = ScriptedTransport::new(script);
        let sleeper = RecordingSleeper::new();
        let config = EngineConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("test-key".to_string()),
            _ => None,
        });
        let provider = GeminiTextProvider::new(&config)
            .with_transport(transport.clone())
            .with_sleeper(sleeper.clone());
        (provider, transport, sleeper)
    }

    fn remedy_json() -> Value {
        json!({
            "remedies": [{
                "name": "Bryonia alba",
                "used_for": "Dry cough worse from motion",
                "how_it_works": "Matches dryness and aggravation from movement",
                "dosage": "30C, twice daily",
                "stop_when": "Symptoms improve",
                "avoid": "If symptoms worsen",
                "side_effects": "None commonly reported",
                "source": "Plant"
            }],
            "lifestyle_tips": ["Rest", "Drink warm fluids"]
        })
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_models() {
        let (provider, _, _) = provider(vec![ok("{}")]);
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-preview-05-20:generateContent"
        );

        let config = EngineConfig::from_lookup(|key| match key {
            "GEMINI_API_BASE" => Some("https://proxy.test/v1/".to_string()),
            "REMEDY_TEXT_MODEL" => Some("models/gemini-pro".to_string()),
            _ => None,
        });
        assert_eq!(
            GeminiTextProvider::new(&config).endpoint(),
            "https://proxy.test/v1/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn payload_embeds_prompt_as_single_user_turn() {
        let payload = build_payload("cough", &TextRequest::json("cough", None).format);
        assert_eq!(payload["contents"][0]["role"], json!("user"));
        assert_eq!(payload["contents"][0]["parts"][0]["text"], json!("cough"));
        assert_eq!(payload["contents"].as_array().map(Vec::len), Some(1));
        assert_eq!(
            payload["generationConfig"]["responseSchema"],
            remedy_result_schema()
        );

        let text_payload = build_payload("hello", &TextRequest::text("hello").format);
        assert!(text_payload.get("generationConfig").is_none());
    }

    #[test]
    fn extract_candidate_text_requires_non_empty_text() {
        assert_eq!(
            extract_candidate_text(&json!({
                "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }]
            })),
            Some("hi")
        );
        assert_eq!(
            extract_candidate_text(&json!({
                "candidates": [{ "content": { "parts": [{ "text": "" }] } }]
            })),
            None
        );
        assert_eq!(extract_candidate_text(&json!({ "candidates": [] })), None);
        assert_eq!(extract_candidate_text(&json!({ "promptFeedback": {} })), None);
    }

    #[test]
    fn success_returns_decoded_payload_unmodified() -> anyhow::Result<()> {
        let expected = remedy_json();
        let (provider, transport, sleeper) = provider(vec![ok(&expected.to_string())]);

        let response = provider.generate(&TextRequest::json("cough", None), &CancelToken::new())?;
        assert_eq!(response.content, GeneratedContent::Json(expected.clone()));
        assert_eq!(response.attempts, 1);
        assert!(response.warnings.is_empty());
        assert!(sleeper.delays().is_empty());
        assert_eq!(transport.calls().len(), 1);

        let (provider, _, _) = provider_with(ok(&expected.to_string()));
        let typed = fetch_remedies(&provider, "cough", &CancelToken::new())?;
        assert_eq!(serde_json::to_value(&typed)?, expected);
        Ok(())
    }

    fn provider_with(
        scripted: Scripted,
    ) -> (GeminiTextProvider, ScriptedTransport, RecordingSleeper) {
        provider(vec![scripted])
    }

    #[test]
    fn text_requests_return_raw_text() -> anyhow::Result<()> {
        let (provider, _, _) = provider(vec![ok("not json at all")]);
        let response = provider.generate(&TextRequest::text("hi"), &CancelToken::new())?;
        assert_eq!(
            response.content,
            GeneratedContent::Text("not json at all".to_string())
        );
        Ok(())
    }

    #[test]
    fn retries_with_doubling_delays_then_fails_terminally() {
        let (provider, transport, sleeper) =
            provider(vec![Scripted::Reply(503, "unavailable".to_string())]);

        let err = provider
            .generate(&TextRequest::json("cough", None), &CancelToken::new())
            .err();
        assert_eq!(transport.calls().len(), 4);
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        match err {
            Some(RemedyError::TerminalService { message, cause }) => {
                assert_eq!(message, TERMINAL_SERVICE_MESSAGE);
                assert_eq!(cause.as_deref(), Some("HTTP error! status: 503"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn retry_count_is_min_of_failures_and_three() -> anyhow::Result<()> {
        for failures in 0..3usize {
            let mut script = Vec::new();
            for _ in 0..failures {
                script.push(Scripted::Unreachable("connection refused"));
            }
            script.push(ok(&remedy_json().to_string()));
            let (provider, transport, sleeper) = provider(script);

            let response =
                provider.generate(&TextRequest::json("cough", None), &CancelToken::new())?;
            assert_eq!(response.attempts as usize, failures + 1);
            assert_eq!(response.warnings.len(), failures);
            assert_eq!(sleeper.delays().len(), failures);
            assert_eq!(transport.calls().len(), failures + 1);
        }
        Ok(())
    }

    #[test]
    fn malformed_shapes_are_retried() -> anyhow::Result<()> {
        let (provider, transport, _) = provider(vec![
            Scripted::Reply(200, "<html>gateway</html>".to_string()),
            Scripted::Reply(200, json!({ "candidates": [] }).to_string()),
            ok("plain answer"),
        ]);
        let response = provider.generate(&TextRequest::text("hi"), &CancelToken::new())?;
        assert_eq!(response.attempts, 3);
        assert_eq!(transport.calls().len(), 3);
        assert!(response.warnings[0].contains("Invalid response format from API."));
        Ok(())
    }

    #[test]
    fn undecodable_json_payload_fails_without_retry() {
        let (provider, transport, sleeper) = provider(vec![ok("{not json")]);
        let err = provider
            .generate(&TextRequest::json("cough", None), &CancelToken::new())
            .err();
        assert!(matches!(err, Some(RemedyError::TerminalService { .. })));
        assert_eq!(transport.calls().len(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn shape_mismatch_is_a_terminal_decode_error() {
        let (provider, transport, _) = provider(vec![ok(&json!({ "remedies": "none" }).to_string())]);
        let err = fetch_remedies(&provider, "cough", &CancelToken::new()).err();
        assert!(matches!(err, Some(RemedyError::TerminalService { .. })));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn clarification_uses_step_schema() -> anyhow::Result<()> {
        let steps = json!([{ "category": "Pain", "options": ["Sharp", "Dull"] }]);
        let (provider, transport, _) = provider(vec![ok(&steps.to_string())]);
        let decoded = fetch_clarification(&provider, "cough", &CancelToken::new())?;
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].options, vec!["Sharp", "Dull"]);

        let calls = transport.calls();
        assert_eq!(
            calls[0].1["generationConfig"]["responseSchema"],
            clarification_schema()
        );
        Ok(())
    }

    #[test]
    fn missing_api_key_fails_before_any_attempt() {
        let transport = ScriptedTransport::new(vec![ok("{}")]);
        let provider = GeminiTextProvider::new(&EngineConfig::from_lookup(|_| None))
            .with_transport(transport.clone());
        let err = provider
            .generate(&TextRequest::text("hi"), &CancelToken::new())
            .err();
        assert!(matches!(err, Some(RemedyError::Config(_))));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn cancelled_token_stops_before_next_attempt() {
        let (provider, transport, _) = provider(vec![Scripted::Unreachable("timeout")]);
        let token = CancelToken::new();
        token.cancel();
        let err = provider
            .generate(&TextRequest::text("hi"), &token)
            .err();
        assert_eq!(err, Some(RemedyError::Cancelled));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = anyhow::anyhow!("connection refused")
            .context("Gemini request failed (https://example.test)");
        let rendered = error_chain_text(&err, 400);
        assert!(rendered.contains("Gemini request failed"));
        assert!(rendered.contains("connection refused"));
        assert!(error_chain_text(&err, 10).ends_with('…'));
    }
}
