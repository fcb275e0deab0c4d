//! Shared vocabulary for the evalboard workspace.
//!
//! Everything that crosses a process boundary lives here: identifiers, the
//! canonical live-subscription wire schema, history and rubric payloads, and
//! runtime configuration with endpoint derivation. Legacy field spellings are
//! accepted on input and normalised to one canonical shape.

pub mod analysis;
pub mod endpoint;
pub mod history;
pub mod ids;
pub mod runtime;
pub mod wire;

pub use analysis::{
    CriterionDef, EvaluationSettings, ModelConfig, ModelCosts, ModelSelection, TestCaseAnalysis,
    DEFAULT_CRITERION_CASES,
};
pub use endpoint::BaseUrl;
pub use history::{CriterionScore, RunPage, RunSummary, StartRunResponse, TestCaseDetails};
pub use ids::{CriterionKey, RunId, TestCaseId, TestCaseOutcome, Verdict};
pub use runtime::RuntimeConfig;
pub use wire::{
    CriterionProgress, DecodedFrame, InboundMessage, OutboundMessage, ResultEvent,
    ServerProgress, decode_frame,
};
