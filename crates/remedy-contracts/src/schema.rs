//! Response-shape descriptors sent as `generationConfig.responseSchema`.
//!
//! The descriptors use the service's upper-case type tags (`OBJECT`, `ARRAY`,
//! `STRING`) and mirror [`RemedyResult`](crate::model::RemedyResult) and a
//! sequence of [`ClarificationStep`](crate::model::ClarificationStep).

use serde_json::{json, Value};

pub const JSON_MIME_TYPE: &str = "application/json";

pub const REMEDY_FIELDS: &[&str] = &[
    "name",
    "used_for",
    "how_it_works",
    "dosage",
    "stop_when",
    "avoid",
    "side_effects",
    "source",
];

pub fn remedy_result_schema() -> Value {
    let properties = REMEDY_FIELDS
        .iter()
        .map(|field| ((*field).to_string(), json!({ "type": "STRING" })))
        .collect::<serde_json::Map<String, Value>>();
    json!({
        "type": "OBJECT",
        "properties": {
            "remedies": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": properties,
                    "required": REMEDY_FIELDS,
                },
            },
            "lifestyle_tips": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
            },
        },
        "required": ["remedies"],
    })
}

pub fn clarification_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "category": { "type": "STRING" },
                "options": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                },
            },
            "required": ["category", "options"],
        },
    })
}

/// What the caller wants back from a generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    /// Schema-constrained JSON; `None` selects [`remedy_result_schema`].
    Json(Option<Value>),
}

impl ResponseFormat {
    pub fn wants_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    pub fn schema(&self) -> Option<Value> {
        match self {
            Self::Text => None,
            Self::Json(Some(schema)) => Some(schema.clone()),
            Self::Json(None) => Some(remedy_result_schema()),
        }
    }

    pub fn generation_config(&self) -> Option<Value> {
        self.schema().map(|schema| {
            json!({
                "responseMimeType": JSON_MIME_TYPE,
                "responseSchema": schema,
            })
        })
    }
}
