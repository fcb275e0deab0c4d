use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary error type for evalboard operations.
///
/// Variants are grouped by the class of failure the dashboard surfaces to the
/// user: configuration, connection, submission, run, detail lookup, history.
/// Each class has its own recovery story; see [`EvalError::class`].
#[derive(Error, Debug)]
pub enum EvalError {
    // === Configuration Errors ===
    /// The backend could not be reached while bootstrapping the session.
    #[error("backend unreachable at '{url}': {detail}")]
    BackendUnreachable { url: String, detail: String },

    /// Local or fetched configuration is unusable.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// An operation needed a live subscription but none has been established.
    #[error("not connected to the evaluation backend")]
    NotConnected,

    // === Connection Errors ===
    /// Transient subscription failure; drives the reconnect state machine.
    #[error("connection error: {detail}")]
    Connection { detail: String },

    /// Reconnect budget exhausted.
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },

    // === Submission Errors ===
    /// Blank system prompt.
    #[error("system prompt cannot be empty")]
    EmptyPrompt,

    /// A live run already owns the ledger.
    #[error("an evaluation is already in progress")]
    RunInProgress,

    /// The start request was rejected by the backend.
    #[error("evaluation failed to start (status {status}): {detail}")]
    StartRejected { status: u16, detail: String },

    /// The start request never produced a response.
    #[error("evaluation request failed: {detail}")]
    StartFailed { detail: String },

    // === Run Errors ===
    /// The backend reported a mid-run failure.
    #[error("evaluation failed: {detail}")]
    RunFailed { detail: String },

    // === Detail Errors ===
    /// Per-test-case detail could not be produced.
    #[error("details unavailable for test case {test_case_id} of run {run_id}: {detail}")]
    DetailUnavailable {
        run_id: u64,
        test_case_id: u64,
        detail: String,
    },

    /// Detail was requested while no run id is known.
    #[error("no run selected for detail lookup")]
    NoRunSelected,

    // === History Errors ===
    /// A history page could not be loaded.
    #[error("failed to load evaluation history: {detail}")]
    HistoryUnavailable { detail: String },

    /// The requested run is not in any loaded history page.
    #[error("evaluation {run_id} not found in history")]
    RunNotFound { run_id: u64 },

    // === Protocol Errors ===
    /// An inbound frame did not match the wire schema.
    #[error("malformed message: {detail}")]
    MalformedMessage { detail: String },

    /// JSON encoding or decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal logic error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for surfacing and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Missing or unreachable backend at startup. Fatal to the session.
    Configuration,
    /// Transient subscription failure, user-visible once retries run out.
    Connection,
    /// Prompt rejected or start request failed. Controller returns to idle.
    Submission,
    /// Backend reported a mid-run failure. Partial results are kept.
    Run,
    /// On-demand test case detail unavailable. Localized to the lookup.
    DetailFetch,
    /// History listing unavailable. Localized to the history view.
    History,
    /// Inbound frame could not be decoded. Logged and dropped.
    Protocol,
    /// Bug or local I/O failure.
    Internal,
}

impl ErrorClass {
    /// Stable lowercase label for logs and headless output.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::Submission => "submission",
            Self::Run => "run",
            Self::DetailFetch => "detail_fetch",
            Self::History => "history",
            Self::Protocol => "protocol",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl EvalError {
    /// Map this error to its surfacing class.
    #[allow(clippy::match_same_arms)]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::BackendUnreachable { .. } | Self::InvalidConfig { .. } | Self::NotConnected => {
                ErrorClass::Configuration
            }
            Self::Connection { .. } | Self::ConnectionLost { .. } => ErrorClass::Connection,
            Self::EmptyPrompt
            | Self::RunInProgress
            | Self::StartRejected { .. }
            | Self::StartFailed { .. } => ErrorClass::Submission,
            Self::RunFailed { .. } => ErrorClass::Run,
            Self::DetailUnavailable { .. } | Self::NoRunSelected => ErrorClass::DetailFetch,
            Self::HistoryUnavailable { .. } | Self::RunNotFound { .. } => ErrorClass::History,
            Self::MalformedMessage { .. } | Self::Json(_) => ErrorClass::Protocol,
            Self::Io(_) | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether the user can likely fix this by acting in the dashboard.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Submission | ErrorClass::Run | ErrorClass::DetailFetch | ErrorClass::History
        )
    }

    /// Whether this is a transient error that may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::StartFailed { .. }
                | Self::HistoryUnavailable { .. }
                | Self::DetailUnavailable { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::BackendUnreachable { .. } => {
                Some("Check that the evaluation backend is running and --base-url is correct")
            }
            Self::NotConnected => Some("Wait for the live connection to open, then resubmit"),
            Self::ConnectionLost { .. } => Some("Connection lost; restart the dashboard"),
            Self::EmptyPrompt => Some("Enter a non-empty system prompt"),
            Self::RunInProgress => Some("Wait for the current evaluation to finish"),
            Self::StartRejected { .. } | Self::StartFailed { .. } => {
                Some("The run never started; check the backend, then resubmit the prompt")
            }
            Self::RunFailed { .. } => {
                Some("Resubmit the prompt; partial results are kept for inspection")
            }
            Self::RunNotFound { .. } => Some("Browse other history pages or refresh the history"),
            _ => None,
        }
    }

    /// Process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Configuration => 3,
            ErrorClass::Connection => 4,
            ErrorClass::Submission => 5,
            ErrorClass::Run => 6,
            ErrorClass::DetailFetch | ErrorClass::History => 7,
            ErrorClass::Protocol => 8,
            ErrorClass::Internal => 2,
        }
    }

    /// Create a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// Create a transient connection error.
    pub fn connection(detail: impl Into<String>) -> Self {
        Self::Connection {
            detail: detail.into(),
        }
    }

    /// Create a malformed-message error.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedMessage {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `EvalError`.
pub type Result<T, E = EvalError> = std::result::Result<T, E>;
