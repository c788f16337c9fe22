use crate::error::{RemedyError, ServiceResult};

pub const SYMPTOMS_PLACEHOLDER: &str = "{symptoms}";

const HOMEOPATHY_REMEDY_TEMPLATE: &str = "As a world-class expert homeopath, provide structured, professional, safe, and clear homeopathic remedy suggestions for the following symptoms/disease: '{symptoms}'. Please provide the output in a JSON format with remedies and lifestyle_tips.";

const HOMEOPATHY_CLARIFY_TEMPLATE: &str = "Generate a comprehensive homeopathic symptom questionnaire for '{symptoms}' with categories and tickable options.";

/// Prompt wording for the two requests a session makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptProfile {
    pub name: String,
    remedy_template: String,
    clarify_template: String,
}

impl PromptProfile {
    pub fn homeopathy() -> Self {
        Self {
            name: "homeopathy".to_string(),
            remedy_template: HOMEOPATHY_REMEDY_TEMPLATE.to_string(),
            clarify_template: HOMEOPATHY_CLARIFY_TEMPLATE.to_string(),
        }
    }

    /// Both templates must contain `{symptoms}`.
    pub fn custom(
        name: impl Into<String>,
        remedy_template: impl Into<String>,
        clarify_template: impl Into<String>,
    ) -> ServiceResult<Self> {
        let remedy_template = remedy_template.into();
        let clarify_template = clarify_template.into();
        for (label, template) in [
            ("remedy", &remedy_template),
            ("clarify", &clarify_template),
        ] {
            if !template.contains(SYMPTOMS_PLACEHOLDER) {
                return Err(RemedyError::Config(format!(
                    "{label} prompt template must contain {SYMPTOMS_PLACEHOLDER}"
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            remedy_template,
            clarify_template,
        })
    }

    pub fn remedy_prompt(&self, symptoms: &str) -> String {
        self.remedy_template.replace(SYMPTOMS_PLACEHOLDER, symptoms)
    }

    pub fn clarify_prompt(&self, symptoms: &str) -> String {
        self.clarify_template.replace(SYMPTOMS_PLACEHOLDER, symptoms)
    }
}

impl Default for PromptProfile {
    fn default() -> Self {
        Self::homeopathy()
    }
}
