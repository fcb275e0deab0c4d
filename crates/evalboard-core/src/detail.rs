//! Per-test-case detail cache for the selected run.

use std::collections::HashMap;

use evalboard_error::EvalError;
use evalboard_types::{RunId, TestCaseDetails, TestCaseId};
use tracing::{debug, warn};

/// Lookup state of one test case's detail.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailState {
    Loading,
    Ready(TestCaseDetails),
    Failed(String),
}

/// Test case detail keyed by `(run, test case)`.
///
/// Test case ids repeat across runs, so the run is always part of the key.
#[derive(Debug, Default)]
pub struct DetailCache {
    entries: HashMap<(RunId, TestCaseId), DetailState>,
}

impl DetailCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, run_id: RunId, test_case_id: TestCaseId) -> Option<&DetailState> {
        self.entries.get(&(run_id, test_case_id))
    }

    /// Mark a fetch as started. Returns false when the detail is already
    /// loaded or a fetch is already in flight.
    pub fn begin(&mut self, run_id: RunId, test_case_id: TestCaseId) -> bool {
        match self.entries.get(&(run_id, test_case_id)) {
            Some(DetailState::Loading | DetailState::Ready(_)) => false,
            Some(DetailState::Failed(_)) | None => {
                self.entries
                    .insert((run_id, test_case_id), DetailState::Loading);
                true
            }
        }
    }

    pub fn insert(&mut self, run_id: RunId, details: TestCaseDetails) {
        self.entries
            .insert((run_id, details.id), DetailState::Ready(details));
    }

    /// Store a fetch result and return the resulting state.
    pub fn complete(
        &mut self,
        run_id: RunId,
        test_case_id: TestCaseId,
        result: Result<TestCaseDetails, EvalError>,
    ) -> &DetailState {
        let state = match result {
            Ok(details) => {
                debug!(run_id = %run_id, test_case_id = %test_case_id, "detail loaded");
                DetailState::Ready(details)
            }
            Err(err) => {
                let err = match err {
                    err @ EvalError::DetailUnavailable { .. } => err,
                    other => EvalError::DetailUnavailable {
                        run_id: run_id.get(),
                        test_case_id: test_case_id.get(),
                        detail: other.to_string(),
                    },
                };
                warn!(error = %err, "detail lookup failed");
                DetailState::Failed(err.to_string())
            }
        };
        let key = (run_id, test_case_id);
        self.entries.insert(key, state);
        &self.entries[&key]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(id: u64) -> TestCaseDetails {
        serde_json::from_value(serde_json::json!({"id": id, "criterion": "k", "result": "pass"}))
            .unwrap()
    }

    #[test]
    fn same_test_case_id_in_two_runs_is_two_entries() {
        let mut cache = DetailCache::new();
        cache.insert(RunId(1), details(3));
        assert!(cache.begin(RunId(2), TestCaseId(3)));
        assert!(matches!(
            cache.get(RunId(1), TestCaseId(3)),
            Some(DetailState::Ready(_))
        ));
        assert_eq!(
            cache.get(RunId(2), TestCaseId(3)),
            Some(&DetailState::Loading)
        );
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failures_are_retryable() {
        let mut cache = DetailCache::new();
        assert!(cache.begin(RunId(1), TestCaseId(3)));
        assert!(!cache.begin(RunId(1), TestCaseId(3)), "already in flight");
        let state = cache.complete(
            RunId(1),
            TestCaseId(3),
            Err(EvalError::internal("404 Not Found")),
        );
        let DetailState::Failed(message) = state else {
            panic!("expected failure, got {state:?}");
        };
        assert!(message.contains("test case 3 of run 1"), "case=failure_message {message}");
        assert!(cache.begin(RunId(1), TestCaseId(3)));
    }
}
