use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{CriterionKey, RunId, TestCaseId, TestCaseOutcome};

/// Full record of one test case within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDetails {
    pub id: TestCaseId,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub result: TestCaseOutcome,
    #[serde(default)]
    pub explanation: String,
    pub criterion: CriterionKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_cost: Option<f64>,
}

impl TestCaseDetails {
    /// Combined evaluation and scoring cost, when either is known.
    pub fn total_cost(&self) -> Option<f64> {
        match (self.evaluation_cost, self.scoring_cost) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        }
    }
}

/// Pass/total tally for one criterion in a historical run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub pass_count: u32,
    pub total_count: u32,
    #[serde(default)]
    pub cost: f64,
}

/// Summary of one historical run as returned by `GET /evaluations`.
///
/// Field names on the wire follow the backend (`id`, `system_prompt`,
/// `model_name`, ...). The legacy `token_count` spelling is accepted for
/// `total_tokens`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(rename = "id")]
    pub run_id: RunId,
    pub timestamp: String,
    #[serde(rename = "system_prompt")]
    pub prompt_text: String,
    #[serde(rename = "model_name")]
    pub evaluation_model: String,
    #[serde(default)]
    pub scoring_model: String,
    pub total_score: u32,
    #[serde(default, alias = "token_count")]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default, rename = "scores_by_criteria")]
    pub per_criterion: BTreeMap<CriterionKey, CriterionScore>,
    #[serde(
        default,
        rename = "test_case_results",
        skip_serializing_if = "Option::is_none"
    )]
    pub detailed_results: Option<BTreeMap<TestCaseId, TestCaseDetails>>,
}

impl RunSummary {
    /// Per-test-case detail, treating an empty map as absent.
    pub fn details(&self) -> Option<&BTreeMap<TestCaseId, TestCaseDetails>> {
        self.detailed_results.as_ref().filter(|d| !d.is_empty())
    }

    /// Total test cases recorded in the per-criterion summary.
    pub fn summarized_total(&self) -> u32 {
        self.per_criterion
            .values()
            .map(|s| s.total_count)
            .fold(0, u32::saturating_add)
    }
}

/// Response of `GET /evaluations?page&limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPage {
    pub evaluations: Vec<RunSummary>,
    pub total_count: u64,
    pub page: u32,
    pub pages: u32,
}

impl RunPage {
    pub fn empty(page: u32) -> Self {
        Self {
            evaluations: Vec::new(),
            total_count: 0,
            page,
            pages: 0,
        }
    }
}

/// Response of `POST /evaluate`.
///
/// Backends that know the run id up front return it as `evaluation_id`;
/// older ones only return a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRunResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub evaluation_id: Option<RunId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = r#"{
        "id": 17,
        "timestamp": "2024-11-02T10:15:00",
        "system_prompt": "Clean up the transcript.",
        "model_name": "gpt-4o-mini",
        "scoring_model": "gpt-4o",
        "total_score": 2,
        "token_count": 1834,
        "total_cost": 0.0042,
        "scores_by_criteria": {
            "brevity": {"pass_count": 1, "total_count": 2, "cost": 0.001}
        },
        "test_case_results": {
            "1": {"id": 1, "criterion": "brevity", "result": "pass", "input": "uh hi"},
            "2": {"id": 2, "criterion": "brevity", "result": "fail"}
        }
    }"#;

    #[test]
    fn summary_normalizes_legacy_token_field() {
        let summary: RunSummary = serde_json::from_str(SUMMARY).unwrap();
        assert_eq!(summary.run_id, RunId(17));
        assert_eq!(summary.total_tokens, 1834);
        assert_eq!(summary.summarized_total(), 2);
        let details = summary.details().unwrap();
        assert_eq!(details[&TestCaseId(1)].result, TestCaseOutcome::Pass);
        assert_eq!(details[&TestCaseId(2)].input, "");
    }

    #[test]
    fn summarized_total_saturates() {
        let mut summary: RunSummary = serde_json::from_str(SUMMARY).unwrap();
        summary.per_criterion.insert(
            CriterionKey::from("clarity"),
            CriterionScore {
                pass_count: 0,
                total_count: u32::MAX,
                cost: 0.0,
            },
        );
        assert_eq!(summary.summarized_total(), u32::MAX);
    }

    #[test]
    fn empty_detail_map_counts_as_absent() {
        let mut summary: RunSummary = serde_json::from_str(SUMMARY).unwrap();
        summary.detailed_results = Some(BTreeMap::new());
        assert!(summary.details().is_none());
    }

    #[test]
    fn summary_round_trips_canonical_names() {
        let summary: RunSummary = serde_json::from_str(SUMMARY).unwrap();
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["total_tokens"], 1834);
        assert!(value.get("token_count").is_none());
        assert_eq!(value["system_prompt"], "Clean up the transcript.");
    }

    #[test]
    fn detail_cost_sums_known_parts() {
        let mut details: TestCaseDetails =
            serde_json::from_str(r#"{"id": 3, "criterion": "k"}"#).unwrap();
        assert_eq!(details.total_cost(), None);
        details.scoring_cost = Some(0.5);
        assert_eq!(details.total_cost(), Some(0.5));
    }

    #[test]
    fn start_response_tolerates_message_only() {
        let resp: StartRunResponse =
            serde_json::from_str(r#"{"message":"Evaluation completed"}"#).unwrap();
        assert_eq!(resp.evaluation_id, None);
        let resp: StartRunResponse = serde_json::from_str(r#"{"evaluation_id": 4}"#).unwrap();
        assert_eq!(resp.evaluation_id, Some(RunId(4)));
    }
}
