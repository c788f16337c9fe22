use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

pub const QUERY_SEPARATOR: &str = ", ";

/// Free-text symptom description the user is building up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemedyQuery(String);

impl RemedyQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn replace(&mut self, text: impl Into<String>) {
        self.0 = text.into();
    }

    /// Appends `part` after the trimmed current text, comma separated.
    /// Blank parts leave the query untouched.
    pub fn append_part(&mut self, part: &str) {
        let part = part.trim();
        if part.is_empty() {
            return;
        }
        let current = self.0.trim();
        self.0 = if current.is_empty() {
            part.to_string()
        } else {
            format!("{current}{QUERY_SEPARATOR}{part}")
        };
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for RemedyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationStep {
    pub category: String,
    pub options: Vec<String>,
}

impl ClarificationStep {
    pub fn contains(&self, option: &str) -> bool {
        self.options.iter().any(|item| item == option)
    }

    /// Options of this step that are selected, in the step's own order.
    pub fn selected<'a>(&'a self, selections: &SelectionSet) -> Vec<&'a str> {
        self.options
            .iter()
            .filter(|option| selections.contains(option))
            .map(String::as_str)
            .collect()
    }
}

/// Cumulative option labels ticked across questionnaire steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionSet(IndexSet<String>);

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips membership of `option`; returns whether it is now selected.
    pub fn toggle(&mut self, option: &str) -> bool {
        if self.0.shift_remove(option) {
            return false;
        }
        self.0.insert(option.to_string());
        true
    }

    pub fn contains(&self, option: &str) -> bool {
        self.0.contains(option)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remedy {
    pub name: String,
    pub used_for: String,
    pub how_it_works: String,
    pub dosage: String,
    pub stop_when: String,
    pub avoid: String,
    pub side_effects: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemedyResult {
    pub remedies: Vec<Remedy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lifestyle_tips: Vec<String>,
}

impl RemedyResult {
    pub fn has_remedies(&self) -> bool {
        !self.remedies.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Dark => f.write_str("dark"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ClarificationStep, RemedyQuery, RemedyResult, SelectionSet, Theme};

    #[test]
    fn append_part_joins_with_comma_and_trims() {
        let mut query = RemedyQuery::new("  cough ");
        query.append_part("Sharp");
        assert_eq!(query.as_str(), "cough, Sharp");

        query.append_part("   ");
        assert_eq!(query.as_str(), "cough, Sharp");

        let mut empty = RemedyQuery::default();
        empty.append_part("fever");
        assert_eq!(empty.as_str(), "fever");
    }

    #[test]
    fn selection_toggle_flips_membership() {
        let mut selections = SelectionSet::new();
        assert!(selections.toggle("Sharp"));
        assert!(selections.contains("Sharp"));
        assert!(!selections.toggle("Sharp"));
        assert!(selections.is_empty());
    }

    #[test]
    fn step_selected_keeps_option_order() {
        let step = ClarificationStep {
            category: "Pain".to_string(),
            options: vec![
                "Sharp".to_string(),
                "Dull".to_string(),
                "Burning".to_string(),
            ],
        };
        let mut selections = SelectionSet::new();
        selections.toggle("Burning");
        selections.toggle("Elsewhere");
        selections.toggle("Sharp");
        assert_eq!(step.selected(&selections), vec!["Sharp", "Burning"]);
    }

    #[test]
    fn remedy_result_requires_every_remedy_field() {
        let missing_source = json!({
            "remedies": [{
                "name": "Bryonia",
                "used_for": "dry cough",
                "how_it_works": "n/a",
                "dosage": "30C",
                "stop_when": "improved",
                "avoid": "n/a",
                "side_effects": "none"
            }]
        });
        assert!(serde_json::from_value::<RemedyResult>(missing_source).is_err());
    }

    #[test]
    fn lifestyle_tips_are_optional() -> anyhow::Result<()> {
        let parsed: RemedyResult = serde_json::from_value(json!({ "remedies": [] }))?;
        assert!(parsed.lifestyle_tips.is_empty());
        assert!(!parsed.has_remedies());
        assert_eq!(serde_json::to_value(&parsed)?, json!({ "remedies": [] }));
        Ok(())
    }

    #[test]
    fn theme_toggles_and_serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
        assert_eq!(serde_json::to_value(Theme::Dark)?, json!("dark"));
        Ok(())
    }
}
