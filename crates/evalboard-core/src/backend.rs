//! HTTP backend seam and session bootstrap.

use evalboard_error::{EvalError, Result};
use evalboard_types::{
    BaseUrl, EvaluationSettings, RunId, RunPage, RuntimeConfig, StartRunResponse,
    TestCaseAnalysis, TestCaseDetails, TestCaseId,
};
use tracing::{info, warn};

/// Request/response operations the dashboard needs from the backend.
///
/// Calls may block; drivers run them off the event loop and report results
/// back as session inputs.
pub trait Backend {
    /// `GET /config`
    fn runtime_config(&self) -> Result<RuntimeConfig>;
    /// `GET /test-case-analysis`
    fn test_case_analysis(&self) -> Result<TestCaseAnalysis>;
    /// `POST /evaluate`
    fn start_run(&self, prompt: &str) -> Result<StartRunResponse>;
    /// `GET /evaluations?page&limit`, `page` 1-based.
    fn list_runs(&self, page: u32, limit: u32) -> Result<RunPage>;
    /// `GET /test-case-details/{run}/{id}`
    fn test_case_details(&self, run_id: RunId, test_case_id: TestCaseId)
    -> Result<TestCaseDetails>;
    /// `GET /evaluation-settings`
    fn evaluation_settings(&self) -> Result<EvaluationSettings>;
}

/// Everything fetched once at startup.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub runtime: RuntimeConfig,
    pub analysis: TestCaseAnalysis,
    /// Origin for all later HTTP calls.
    pub api_base: BaseUrl,
    /// Live subscription URL.
    pub endpoint: String,
}

/// Load runtime configuration and the rubric.
///
/// Any failure here is a configuration error: the session cannot start
/// without knowing where to subscribe and which criteria exist.
pub fn bootstrap<B: Backend + ?Sized>(backend: &B, base: &BaseUrl) -> Result<Bootstrap> {
    let runtime = backend
        .runtime_config()
        .map_err(|err| unreachable_at(base, &err))?;
    let api_base = runtime.api_base(base);
    let endpoint = runtime.subscription_endpoint(base)?;
    let analysis = backend
        .test_case_analysis()
        .map_err(|err| unreachable_at(&api_base, &err))?;
    if analysis.criteria.is_empty() {
        warn!("rubric analysis lists no criteria");
    }
    info!(
        endpoint = %endpoint,
        api_base = %api_base,
        evaluation_model = %runtime.evaluation_model,
        scoring_model = %runtime.scoring_model,
        criteria = analysis.criteria.len(),
        total_test_cases = analysis.total_test_cases,
        "session bootstrapped"
    );
    Ok(Bootstrap {
        runtime,
        analysis,
        api_base,
        endpoint,
    })
}

fn unreachable_at(base: &BaseUrl, err: &EvalError) -> EvalError {
    match err {
        EvalError::BackendUnreachable { url, detail } => EvalError::BackendUnreachable {
            url: url.clone(),
            detail: detail.clone(),
        },
        other => EvalError::BackendUnreachable {
            url: base.to_string(),
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use evalboard_error::ErrorClass;

    use super::*;

    struct StubBackend {
        fail_analysis: bool,
        calls: Cell<u32>,
    }

    impl Backend for StubBackend {
        fn runtime_config(&self) -> Result<RuntimeConfig> {
            self.calls.set(self.calls.get() + 1);
            Ok(serde_json::from_str(r#"{"backendPort": 8001, "model": "m", "scoringModel": "s"}"#)?)
        }

        fn test_case_analysis(&self) -> Result<TestCaseAnalysis> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_analysis {
                return Err(EvalError::internal("HTTP 500"));
            }
            Ok(serde_json::from_str(
                r#"{"criteria": {"k": "K"}, "counts_per_criterion": {}, "total_test_cases": 5}"#,
            )?)
        }

        fn start_run(&self, _prompt: &str) -> Result<StartRunResponse> {
            unreachable!()
        }

        fn list_runs(&self, _page: u32, _limit: u32) -> Result<RunPage> {
            unreachable!()
        }

        fn test_case_details(&self, _run: RunId, _id: TestCaseId) -> Result<TestCaseDetails> {
            unreachable!()
        }

        fn evaluation_settings(&self) -> Result<EvaluationSettings> {
            unreachable!()
        }
    }

    #[test]
    fn bootstrap_derives_endpoints() {
        let backend = StubBackend {
            fail_analysis: false,
            calls: Cell::new(0),
        };
        let boot = bootstrap(&backend, &BaseUrl::default()).unwrap();
        assert_eq!(boot.endpoint, "ws://localhost:8001/ws");
        assert_eq!(boot.api_base.port(), Some(8001));
        assert_eq!(boot.analysis.total_test_cases, 5);
        assert_eq!(backend.calls.get(), 2);
    }

    #[test]
    fn bootstrap_failure_is_configuration_error() {
        let backend = StubBackend {
            fail_analysis: true,
            calls: Cell::new(0),
        };
        let err = bootstrap(&backend, &BaseUrl::default()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.to_string().contains("localhost:8001"), "case=unreachable_url {err}");
    }
}
