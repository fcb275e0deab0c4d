//! Blocking HTTP implementation of [`Backend`].

use std::fmt;
use std::time::Duration;

use evalboard_core::Backend;
use evalboard_error::{EvalError, Result};
use evalboard_types::{
    BaseUrl, EvaluationSettings, RunId, RunPage, RuntimeConfig, StartRunResponse,
    TestCaseAnalysis, TestCaseDetails, TestCaseId,
};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Client for the evaluation backend's REST surface.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: BaseUrl,
}

#[derive(Serialize)]
struct StartRunRequest<'a> {
    prompt: &'a str,
}

/// Why a request failed, before it is mapped to a per-operation error.
#[derive(Debug)]
enum Failure {
    Transport(String),
    Status { status: u16, body: String },
    Decode(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(detail) => write!(f, "request failed: {detail}"),
            Self::Status { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Decode(detail) => write!(f, "unexpected response body: {detail}"),
        }
    }
}

impl HttpBackend {
    pub fn new(base: BaseUrl, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| EvalError::config(format!("failed to create HTTP client: {err}")))?;
        Ok(Self { client, base })
    }

    /// Same client, different origin. Used once `/config` names the API port.
    #[must_use]
    pub fn rebased(&self, base: BaseUrl) -> Self {
        Self {
            client: self.client.clone(),
            base,
        }
    }

    pub fn base(&self) -> &BaseUrl {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        self.base.to_http(path)
    }

    fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> Result<T, Failure> {
        let response = request
            .send()
            .map_err(|err| Failure::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(path, status = status.as_u16(), "backend returned an error status");
            return Err(Failure::Status {
                status: status.as_u16(),
                body: body.trim().to_owned(),
            });
        }
        let body = response
            .text()
            .map_err(|err| Failure::Transport(err.to_string()))?;
        debug!(path, status = status.as_u16(), bytes = body.len(), "backend response");
        serde_json::from_str(&body).map_err(|err| Failure::Decode(err.to_string()))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Failure> {
        self.fetch(self.client.get(self.url(path)), path)
    }

    fn unreachable(&self, failure: &Failure) -> EvalError {
        EvalError::BackendUnreachable {
            url: self.base.to_string(),
            detail: failure.to_string(),
        }
    }
}

impl Backend for HttpBackend {
    fn runtime_config(&self) -> Result<RuntimeConfig> {
        self.get("/config").map_err(|f| self.unreachable(&f))
    }

    fn test_case_analysis(&self) -> Result<TestCaseAnalysis> {
        self.get("/test-case-analysis")
            .map_err(|f| self.unreachable(&f))
    }

    fn start_run(&self, prompt: &str) -> Result<StartRunResponse> {
        let path = "/evaluate";
        let request = self
            .client
            .post(self.url(path))
            .json(&StartRunRequest { prompt });
        self.fetch(request, path).map_err(|failure| match failure {
            Failure::Status { status, body } => EvalError::StartRejected {
                status,
                detail: body,
            },
            other => EvalError::StartFailed {
                detail: other.to_string(),
            },
        })
    }

    fn list_runs(&self, page: u32, limit: u32) -> Result<RunPage> {
        self.get(&format!("/evaluations?page={page}&limit={limit}"))
            .map_err(|f| EvalError::HistoryUnavailable {
                detail: f.to_string(),
            })
    }

    fn test_case_details(
        &self,
        run_id: RunId,
        test_case_id: TestCaseId,
    ) -> Result<TestCaseDetails> {
        self.get(&format!("/test-case-details/{run_id}/{test_case_id}"))
            .map_err(|f| EvalError::DetailUnavailable {
                run_id: run_id.get(),
                test_case_id: test_case_id.get(),
                detail: f.to_string(),
            })
    }

    fn evaluation_settings(&self) -> Result<EvaluationSettings> {
        self.get("/evaluation-settings")
            .map_err(|f| self.unreachable(&f))
    }
}
