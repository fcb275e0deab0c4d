//! Canonical live-subscription wire schema.
//!
//! Inbound frames are JSON objects whose shape varies by purpose:
//!
//! ```text
//!   {"type":"ping"}                                            keepalive probe
//!   {"current_result":{"id":3,"criterion":"k","result":"pass",
//!                      "evaluation_id":12}}                     one test case verdict
//!   {"stage":"evaluation","total_progress":"3/25",
//!    "criteria_progress":{"k":{"total":5,"processed":3}}}       advisory progress
//!   {"stage":"completed"}                                       run finished
//!   {"stage":"error","error":"boom"}                            run failed
//! ```
//!
//! A single frame may carry a result *and* a stage; the result is always
//! dispatched first. Frames are decoded into [`InboundMessage`] values at
//! this boundary so nothing downstream sees optional-field soup.
//!
//! The only outbound frame is the keepalive acknowledgement `{"type":"pong"}`.

use std::collections::BTreeMap;

use evalboard_error::{EvalError, Result};
use serde::{Deserialize, Serialize};

use crate::ids::{CriterionKey, RunId, TestCaseId, Verdict};

/// One streamed test case verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub test_case_id: TestCaseId,
    pub criterion: CriterionKey,
    pub verdict: Verdict,
    /// Owning run, when the backend tags it.
    pub run_id: Option<RunId>,
}

impl ResultEvent {
    pub fn new(test_case_id: u64, criterion: impl Into<CriterionKey>, verdict: Verdict) -> Self {
        Self {
            test_case_id: TestCaseId(test_case_id),
            criterion: criterion.into(),
            verdict,
            run_id: None,
        }
    }

    #[must_use]
    pub fn for_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

/// Per-criterion counters the backend reports alongside `stage:"evaluation"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionProgress {
    pub total: u32,
    pub processed: u32,
}

/// Advisory progress reported by the server. Never counted by the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProgress {
    pub total_progress: Option<String>,
    pub criteria_progress: BTreeMap<CriterionKey, CriterionProgress>,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InboundMessage {
    /// Keepalive probe; must be answered with [`OutboundMessage::Pong`].
    Ping,
    /// One test case verdict.
    Result(ResultEvent),
    /// Advisory progress counters.
    Progress(ServerProgress),
    /// Informational status line with no state effect.
    Status {
        status: Option<String>,
        message: Option<String>,
    },
    /// The active run finished.
    Completed,
    /// The active run failed.
    Failed { error: String },
}

/// Outbound message. Only keepalive acknowledgements are ever sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum OutboundMessage {
    Pong,
}

impl OutboundMessage {
    pub fn encode(self) -> Result<String> {
        Ok(serde_json::to_string(&self)?)
    }
}

/// Result of decoding one frame.
///
/// A frame is decoded part by part: a malformed `current_result` does not
/// prevent a `stage` in the same frame from being honoured.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    pub messages: Vec<InboundMessage>,
    pub rejected: Vec<EvalError>,
}

impl DecodedFrame {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.rejected.is_empty()
    }
}

const UNKNOWN_RUN_ERROR: &str = "An unknown error occurred";

#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    stage: Option<String>,
    total_progress: Option<String>,
    criteria_progress: Option<BTreeMap<CriterionKey, CriterionProgress>>,
    current_result: Option<RawResult>,
    error: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    id: u64,
    criterion: String,
    result: String,
    #[serde(default)]
    evaluation_id: Option<u64>,
}

impl RawResult {
    fn into_event(self) -> Result<ResultEvent> {
        if self.criterion.trim().is_empty() {
            return Err(EvalError::malformed(format!(
                "result for test case {} has an empty criterion",
                self.id
            )));
        }
        let verdict = match self.result.as_str() {
            "pass" => Verdict::Pass,
            "fail" => Verdict::Fail,
            "pending" => {
                return Err(EvalError::malformed(format!(
                    "test case {} reported pending, which is not a terminal outcome",
                    self.id
                )));
            }
            other => {
                return Err(EvalError::malformed(format!(
                    "test case {} has unknown result `{other}`",
                    self.id
                )));
            }
        };
        Ok(ResultEvent {
            test_case_id: TestCaseId(self.id),
            criterion: CriterionKey::new(self.criterion),
            verdict,
            run_id: self.evaluation_id.map(RunId),
        })
    }
}

/// Decode one inbound text frame.
///
/// Returns `Err` only when the text is not a JSON object at all; partial
/// failures are collected in [`DecodedFrame::rejected`].
pub fn decode_frame(text: &str) -> Result<DecodedFrame> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|err| EvalError::malformed(format!("frame is not a valid message: {err}")))?;
    let mut decoded = DecodedFrame::default();

    match raw.kind.as_deref() {
        Some("ping") => {
            decoded.messages.push(InboundMessage::Ping);
            return Ok(decoded);
        }
        // Echoed acknowledgements carry no information.
        Some("pong") => return Ok(decoded),
        Some(other) => {
            decoded
                .rejected
                .push(EvalError::malformed(format!("unknown frame type `{other}`")));
            return Ok(decoded);
        }
        None => {}
    }

    if let Some(result) = raw.current_result {
        match result.into_event() {
            Ok(event) => decoded.messages.push(InboundMessage::Result(event)),
            Err(err) => decoded.rejected.push(err),
        }
    }

    match raw.stage.as_deref() {
        Some("completed") => decoded.messages.push(InboundMessage::Completed),
        Some("error") => decoded.messages.push(InboundMessage::Failed {
            error: raw
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_RUN_ERROR.to_owned()),
        }),
        Some("evaluation") | None => {
            if raw.total_progress.is_some() || raw.criteria_progress.is_some() {
                decoded
                    .messages
                    .push(InboundMessage::Progress(ServerProgress {
                        total_progress: raw.total_progress,
                        criteria_progress: raw.criteria_progress.unwrap_or_default(),
                    }));
            }
        }
        Some(other) => decoded
            .rejected
            .push(EvalError::malformed(format!("unknown stage `{other}`"))),
    }

    if raw.status.is_some() || raw.message.is_some() {
        decoded.messages.push(InboundMessage::Status {
            status: raw.status,
            message: raw.message,
        });
    }

    if decoded.is_empty() {
        decoded
            .rejected
            .push(EvalError::malformed("frame carries no recognised field"));
    }
    Ok(decoded)
}
