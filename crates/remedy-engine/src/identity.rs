use std::time::Duration;

use anyhow::{bail, Context};
use remedy_contracts::error::{RemedyError, AUTH_FALLBACK_MESSAGE};
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Option<String>,
    pub ready: bool,
    pub provider: String,
}

impl Identity {
    pub fn pending() -> Self {
        Self {
            user_id: None,
            ready: false,
            provider: String::new(),
        }
    }

    fn ready(user_id: String, provider: &str) -> Self {
        Self {
            user_id: Some(user_id),
            ready: true,
            provider: provider.to_string(),
        }
    }
}

pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;
    fn sign_in(&self) -> anyhow::Result<String>;
    fn sign_out(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Anonymous sign-up against the Identity Toolkit REST API.
pub struct AnonymousSignIn {
    endpoint: String,
    api_key: String,
    http: HttpClient,
    timeout: Option<Duration>,
}

impl AnonymousSignIn {
    pub fn new(identity_base: &str, api_key: &str, timeout: Option<Duration>) -> Self {
        Self {
            endpoint: format!("{}/accounts:signUp", identity_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            http: HttpClient::new(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl IdentityProvider for AnonymousSignIn {
    fn name(&self) -> &str {
        "anonymous"
    }

    fn sign_in(&self) -> anyhow::Result<String> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "returnSecureToken": true }));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .with_context(|| format!("anonymous sign-in failed ({})", self.endpoint))?;
        let status = response.status();
        let body: Value = response
            .json()
            .context("anonymous sign-in returned invalid JSON")?;
        if !status.is_success() {
            let detail = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("anonymous sign-in failed ({}): {detail}", status.as_u16());
        }
        local_id_from(&body)
    }
}

pub(crate) fn local_id_from(body: &Value) -> anyhow::Result<String> {
    let user_id = body
        .get("localId")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if user_id.is_empty() {
        bail!("anonymous sign-in response missing localId");
    }
    Ok(user_id.to_string())
}

/// Random per-process identifier; never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalIdentity;

impl IdentityProvider for LocalIdentity {
    fn name(&self) -> &str {
        "local"
    }

    fn sign_in(&self) -> anyhow::Result<String> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// Signs in with `provider`, falling back to a local id. The returned error,
/// if any, is the non-fatal notice for the user.
pub fn bootstrap_identity(
    provider: Option<&dyn IdentityProvider>,
) -> (Identity, Option<RemedyError>) {
    let Some(provider) = provider else {
        return (local_identity(), None);
    };
    match provider.sign_in() {
        Ok(user_id) => {
            info!(provider = provider.name(), "identity ready");
            (Identity::ready(user_id, provider.name()), None)
        }
        Err(err) => {
            warn!(provider = provider.name(), error = %format!("{err:#}"), "sign-in failed, using local id");
            (
                local_identity(),
                Some(RemedyError::AuthBootstrap(AUTH_FALLBACK_MESSAGE.to_string())),
            )
        }
    }
}

fn local_identity() -> Identity {
    Identity::ready(Uuid::new_v4().to_string(), LocalIdentity.name())
}
