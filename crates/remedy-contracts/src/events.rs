use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Theme;

/// Everything a session reports to its event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        provider: String,
        profile: String,
    },
    IdentityReady {
        user_id: Option<String>,
        provider: String,
        fallback: bool,
    },
    QueryEdited {
        query: String,
    },
    ClarificationRequested {
        query: String,
    },
    ClarificationReceived {
        steps: usize,
    },
    StepAdvanced {
        appended: Vec<String>,
        query: String,
        submitted: bool,
    },
    RemediesRequested {
        query: String,
    },
    RemediesReceived {
        remedies: usize,
        lifestyle_tips: usize,
    },
    RequestFailed {
        request: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
    VoiceTranscript {
        transcript: String,
        appended: bool,
    },
    ThemeChanged {
        theme: Theme,
    },
    SessionReset,
    SessionFinished,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::IdentityReady { .. } => "identity_ready",
            Self::QueryEdited { .. } => "query_edited",
            Self::ClarificationRequested { .. } => "clarification_requested",
            Self::ClarificationReceived { .. } => "clarification_received",
            Self::StepAdvanced { .. } => "step_advanced",
            Self::RemediesRequested { .. } => "remedies_requested",
            Self::RemediesReceived { .. } => "remedies_received",
            Self::RequestFailed { .. } => "request_failed",
            Self::VoiceTranscript { .. } => "voice_transcript",
            Self::ThemeChanged { .. } => "theme_changed",
            Self::SessionReset => "session_reset",
            Self::SessionFinished => "session_finished",
        }
    }
}

/// A stored line: the event's own fields next to `type`, `session_id`, `ts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Append-only `events.jsonl` for one session.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    session_id: String,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    /// Parent directories are created on first write.
    pub fn append(&self, event: SessionEvent) -> anyhow::Result<EventRecord> {
        let record = EventRecord {
            session_id: self.session_id.clone(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("cannot append to {}", self.path.display()))?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{EventLog, EventRecord, SessionEvent};
    use crate::model::Theme;

    fn lines(raw: &str) -> anyhow::Result<Vec<Value>> {
        raw.lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn event_fields_sit_beside_the_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::new(temp.path().join("events.jsonl"), "session-7");

        let record = log.append(SessionEvent::StepAdvanced {
            appended: vec!["Sharp".to_string()],
            query: "cough, Sharp".to_string(),
            submitted: true,
        })?;
        let stored = lines(&fs::read_to_string(temp.path().join("events.jsonl"))?)?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["type"], json!("step_advanced"));
        assert_eq!(stored[0]["session_id"], json!("session-7"));
        assert_eq!(stored[0]["appended"], json!(["Sharp"]));
        assert_eq!(stored[0]["submitted"], json!(true));
        DateTime::parse_from_rfc3339(&record.ts)?;

        let parsed: EventRecord = serde_json::from_value(stored[0].clone())?;
        assert_eq!(parsed, record);
        Ok(())
    }

    #[test]
    fn lifecycle_events_carry_only_the_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("nested").join("events.jsonl");
        let log = EventLog::new(&path, "session-7");

        log.append(SessionEvent::SessionReset)?;
        log.append(SessionEvent::SessionFinished)?;

        let stored = lines(&fs::read_to_string(&path)?)?;
        let types: Vec<&str> = stored
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(types, ["session_reset", "session_finished"]);
        for event in &stored {
            let mut keys: Vec<&str> = event
                .as_object()
                .map(|map| map.keys().map(String::as_str).collect())
                .unwrap_or_default();
            keys.sort_unstable();
            assert_eq!(keys, ["session_id", "ts", "type"]);
        }
        Ok(())
    }

    #[test]
    fn failure_cause_is_omitted_when_absent() -> anyhow::Result<()> {
        let with_cause = serde_json::to_value(SessionEvent::RequestFailed {
            request: "remedies".to_string(),
            error: "Failed to communicate with the AI.".to_string(),
            cause: Some("HTTP error! status: 503".to_string()),
        })?;
        assert_eq!(with_cause["cause"], json!("HTTP error! status: 503"));

        let without = serde_json::to_value(SessionEvent::RequestFailed {
            request: "clarification".to_string(),
            error: "Please enter symptoms or a disease name to clarify.".to_string(),
            cause: None,
        })?;
        assert!(without.get("cause").is_none());
        Ok(())
    }

    #[test]
    fn names_match_serialized_tags() -> anyhow::Result<()> {
        let events = [
            SessionEvent::SessionStarted {
                provider: "gemini".to_string(),
                profile: "homeopathy".to_string(),
            },
            SessionEvent::IdentityReady {
                user_id: None,
                provider: "local".to_string(),
                fallback: true,
            },
            SessionEvent::ClarificationReceived { steps: 0 },
            SessionEvent::RemediesReceived {
                remedies: 2,
                lifestyle_tips: 0,
            },
            SessionEvent::VoiceTranscript {
                transcript: "worse at night".to_string(),
                appended: false,
            },
            SessionEvent::ThemeChanged { theme: Theme::Dark },
            SessionEvent::SessionFinished,
        ];
        for event in events {
            let value = serde_json::to_value(&event)?;
            assert_eq!(value["type"], json!(event.name()));
        }
        let theme = serde_json::to_value(SessionEvent::ThemeChanged { theme: Theme::Dark })?;
        assert_eq!(theme["theme"], json!("dark"));
        Ok(())
    }
}
