//! Rubric structure, evaluation settings and the model catalogue.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::CriterionKey;

/// Expected test cases per criterion when the rubric omits a count.
pub const DEFAULT_CRITERION_CASES: u32 = 5;

/// One rubric dimension in backend order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionDef {
    pub key: CriterionKey,
    pub display_name: String,
}

/// Response of `GET /test-case-analysis`.
///
/// `criteria` keeps the order the backend sent; that order is the rubric
/// numbering shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseAnalysis {
    #[serde(with = "ordered_criteria")]
    pub criteria: Vec<CriterionDef>,
    #[serde(default)]
    pub counts_per_criterion: BTreeMap<CriterionKey, u32>,
    pub total_test_cases: u32,
}

impl TestCaseAnalysis {
    /// Expected number of test cases for `key`.
    pub fn expected_count(&self, key: &CriterionKey) -> u32 {
        self.counts_per_criterion
            .get(key)
            .copied()
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_CRITERION_CASES)
    }

    pub fn display_name(&self, key: &CriterionKey) -> Option<&str> {
        self.criteria
            .iter()
            .find(|def| &def.key == key)
            .map(|def| def.display_name.as_str())
    }

    pub fn contains(&self, key: &CriterionKey) -> bool {
        self.criteria.iter().any(|def| &def.key == key)
    }
}

mod ordered_criteria {
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::{Map, Value};

    use super::CriterionDef;
    use crate::ids::CriterionKey;

    pub fn serialize<S: Serializer>(criteria: &[CriterionDef], ser: S) -> Result<S::Ok, S::Error> {
        let mut map = ser.serialize_map(Some(criteria.len()))?;
        for def in criteria {
            map.serialize_entry(def.key.as_str(), &def.display_name)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<CriterionDef>, D::Error> {
        // `preserve_order` keeps the backend's key order in `Map`.
        let raw = Map::<String, Value>::deserialize(de)?;
        Ok(raw
            .into_iter()
            .map(|(key, value)| {
                let key = CriterionKey::new(key);
                let display_name = match value {
                    Value::String(name) if !name.trim().is_empty() => name,
                    _ => key.fallback_display_name(),
                };
                CriterionDef { key, display_name }
            })
            .collect())
    }
}

/// Response of `GET /evaluation-settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub temperature: f64,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub evaluation_prompt_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_model: Option<String>,
}

/// Per-token costs of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub evaluation_model: String,
    pub scoring_model: String,
}

/// Model catalogue: provider -> model -> costs, plus current and default picks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub models: BTreeMap<String, BTreeMap<String, ModelCosts>>,
    pub current: ModelSelection,
    #[serde(rename = "default")]
    pub defaults: ModelSelection,
}

impl ModelConfig {
    /// Find a model's costs regardless of provider.
    pub fn costs_of(&self, model: &str) -> Option<(&str, ModelCosts)> {
        self.models.iter().find_map(|(provider, models)| {
            models
                .get(model)
                .map(|costs| (provider.as_str(), *costs))
        })
    }

    pub fn is_default_selection(&self) -> bool {
        self.current == self.defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYSIS: &str = r#"{
        "criteria": {
            "removing_filler_text": "Removing Filler Text",
            "retaining_key_information": "Retaining Key Information",
            "adding_punctuation": ""
        },
        "counts_per_criterion": {"removing_filler_text": 6, "retaining_key_information": 0},
        "total_test_cases": 16
    }"#;

    #[test]
    fn criteria_keep_backend_order() {
        let analysis: TestCaseAnalysis = serde_json::from_str(ANALYSIS).unwrap();
        let keys: Vec<&str> = analysis.criteria.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "removing_filler_text",
                "retaining_key_information",
                "adding_punctuation"
            ]
        );
        assert_eq!(analysis.criteria[2].display_name, "Adding Punctuation");
    }

    #[test]
    fn expected_count_defaults() {
        let analysis: TestCaseAnalysis = serde_json::from_str(ANALYSIS).unwrap();
        assert_eq!(
            analysis.expected_count(&CriterionKey::from("removing_filler_text")),
            6
        );
        assert_eq!(
            analysis.expected_count(&CriterionKey::from("retaining_key_information")),
            DEFAULT_CRITERION_CASES
        );
        assert_eq!(
            analysis.expected_count(&CriterionKey::from("adding_punctuation")),
            DEFAULT_CRITERION_CASES
        );
    }

    #[test]
    fn analysis_serializes_back_in_order() {
        let analysis: TestCaseAnalysis = serde_json::from_str(ANALYSIS).unwrap();
        let encoded = serde_json::to_string(&analysis).unwrap();
        let filler = encoded.find("removing_filler_text").unwrap();
        let punctuation = encoded.find("adding_punctuation").unwrap();
        assert!(filler < punctuation);
    }

    #[test]
    fn model_catalogue_lookup() {
        let config: ModelConfig = serde_json::from_str(
            r#"{
                "models": {"openai": {"gpt-4o-mini": {"input": 0.15, "output": 0.6}}},
                "current": {"evaluation_model": "gpt-4o-mini", "scoring_model": "gpt-4o-mini"},
                "default": {"evaluation_model": "gpt-4o-mini", "scoring_model": "gpt-4o-mini"}
            }"#,
        )
        .unwrap();
        let (provider, costs) = config.costs_of("gpt-4o-mini").unwrap();
        assert_eq!(provider, "openai");
        assert_eq!(costs.output, 0.6);
        assert!(config.costs_of("unknown").is_none());
        assert!(config.is_default_selection());
    }
}
