//! Evaluation run controller.
//!
//! Serializes what the dashboard is currently showing (nothing, a live run,
//! a finished run, or a historical run) and performs the ledger resets each
//! transition needs.
//!
//! Start requests are asynchronous. Each submission is tagged with a
//! [`SubmissionTicket`]; a response whose ticket no longer matches the
//! current phase belongs to a run the user has moved away from and is
//! ignored.

use std::collections::BTreeSet;

use evalboard_error::{ErrorClass, EvalError, Result};
use evalboard_types::{ResultEvent, RunId, RunSummary, StartRunResponse};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ledger::{DiscardReason, IngestOutcome, Ledger, LedgerView};

/// Tag for one submission's in-flight start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubmissionTicket {
    generation: u64,
}

impl SubmissionTicket {
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

/// What the dashboard is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum RunPhase {
    Idle,
    Live { ticket: SubmissionTicket },
    /// Finished live run, retained for display. Accepts new submissions.
    Complete { ticket: SubmissionTicket },
    Historical { run_id: RunId },
}

impl RunPhase {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Live { .. } => "live",
            Self::Complete { .. } => "complete",
            Self::Historical { .. } => "historical",
        }
    }

    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

/// An error as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfacedError {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&EvalError> for SurfacedError {
    fn from(err: &EvalError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// How a start response was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The run started; `run_id` is set when the backend reported one.
    Started { run_id: Option<RunId> },
    /// The start failed; the controller is back to idle.
    Rejected(SurfacedError),
    /// The run already finished when its start request failed.
    LateFailure(SurfacedError),
    /// The response belongs to a run the controller has moved away from.
    Stale,
}

#[derive(Debug)]
pub struct RunController {
    phase: RunPhase,
    ledger: Ledger,
    generation: u64,
    retired: BTreeSet<RunId>,
    selected: Option<RunSummary>,
    last_error: Option<SurfacedError>,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl RunController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            ledger: Ledger::new(),
            generation: 0,
            retired: BTreeSet::new(),
            selected: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn view(&self) -> LedgerView {
        self.ledger.view()
    }

    /// Historical run currently displayed.
    pub fn selected(&self) -> Option<&RunSummary> {
        self.selected.as_ref()
    }

    pub fn last_error(&self) -> Option<&SurfacedError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn accepts_submission(&self) -> bool {
        !self.phase.is_live()
    }

    pub fn is_retired(&self, run_id: RunId) -> bool {
        self.retired.contains(&run_id)
    }

    /// Move to live for a new prompt.
    ///
    /// `connection_ready` reports whether the live subscription is open; a
    /// run started without one would stream into the void.
    pub fn begin_submission(
        &mut self,
        prompt: &str,
        connection_ready: bool,
    ) -> Result<SubmissionTicket> {
        if self.phase.is_live() {
            return Err(EvalError::RunInProgress);
        }
        if !connection_ready {
            return Err(EvalError::NotConnected);
        }
        if prompt.trim().is_empty() {
            return Err(EvalError::EmptyPrompt);
        }

        self.retire_current();
        self.generation += 1;
        let ticket = SubmissionTicket {
            generation: self.generation,
        };
        self.ledger.reset(None);
        self.selected = None;
        self.last_error = None;
        self.phase = RunPhase::Live { ticket };
        info!(
            generation = ticket.generation,
            prompt_len = prompt.len(),
            "evaluation submitted"
        );
        Ok(ticket)
    }

    /// Apply the outcome of a start request.
    pub fn resolve_submission(
        &mut self,
        ticket: SubmissionTicket,
        result: Result<StartRunResponse>,
    ) -> Resolution {
        match (self.phase, result) {
            (RunPhase::Live { ticket: live }, Ok(response)) if live == ticket => {
                let run_id = response.evaluation_id;
                if let Some(run_id) = run_id {
                    // The start response names this ticket's run; anything the
                    // ledger adopted from the stream before it is stale.
                    if let Some(adopted) = self.ledger.rebind(run_id) {
                        self.retired.insert(adopted);
                        debug!(run_id = %adopted, "run retired");
                    }
                }
                info!(
                    generation = ticket.generation,
                    run_id = ?run_id.map(RunId::get),
                    message = response.message.as_deref().unwrap_or_default(),
                    "evaluation started"
                );
                Resolution::Started { run_id }
            }
            (RunPhase::Live { ticket: live }, Err(err)) if live == ticket => {
                warn!(generation = ticket.generation, error = %err, "evaluation failed to start");
                let surfaced = SurfacedError::from(&err);
                self.ledger.reset(None);
                self.ledger.seal();
                self.last_error = Some(surfaced.clone());
                self.phase = RunPhase::Idle;
                Resolution::Rejected(surfaced)
            }
            (RunPhase::Complete { ticket: done }, Err(err)) if done == ticket => {
                warn!(generation = ticket.generation, error = %err, "start request failed after run finished");
                Resolution::LateFailure(SurfacedError::from(&err))
            }
            (_, result) => {
                debug!(
                    generation = ticket.generation,
                    ok = result.is_ok(),
                    phase = self.phase.label(),
                    "stale start response ignored"
                );
                Resolution::Stale
            }
        }
    }

    /// Route one streamed result to the ledger.
    pub fn ingest(&mut self, event: &ResultEvent) -> IngestOutcome {
        if let Some(run_id) = event.run_id {
            if self.retired.contains(&run_id) {
                debug!(run_id = %run_id, test_case_id = %event.test_case_id, "event for retired run");
                return IngestOutcome::Discarded(DiscardReason::RetiredRun { run_id });
            }
        }
        self.ledger.ingest(event)
    }

    /// The live run finished. Returns true when history should be refreshed.
    pub fn complete_run(&mut self) -> bool {
        let RunPhase::Live { ticket } = self.phase else {
            debug!(phase = self.phase.label(), "completion outside a live run ignored");
            return false;
        };
        self.retire_current();
        self.ledger.seal();
        self.phase = RunPhase::Complete { ticket };
        let view = self.ledger.view();
        info!(
            run_id = ?view.run_id.map(RunId::get),
            processed = view.processed_count,
            passed = view.pass_count,
            "evaluation completed"
        );
        true
    }

    /// The backend reported a mid-run failure. Partial results are kept.
    pub fn fail_run(&mut self, detail: String) -> Option<SurfacedError> {
        if !self.phase.is_live() {
            debug!(phase = self.phase.label(), detail = %detail, "run error outside a live run ignored");
            return None;
        }
        let err = EvalError::RunFailed { detail };
        warn!(
            run_id = ?self.ledger.run_id().map(RunId::get),
            processed = self.ledger.processed_count(),
            error = %err,
            "evaluation failed"
        );
        let surfaced = SurfacedError::from(&err);
        self.retire_current();
        self.ledger.seal();
        self.last_error = Some(surfaced.clone());
        self.phase = RunPhase::Idle;
        Some(surfaced)
    }

    /// Display a historical run. Abandons a live run if one is in progress.
    pub fn select_historical(&mut self, summary: RunSummary) {
        if self.phase.is_live() {
            warn!(
                run_id = ?self.ledger.run_id().map(RunId::get),
                "live run abandoned for historical selection"
            );
        }
        self.retire_current();
        self.ledger.load_snapshot(&summary);
        self.phase = RunPhase::Historical {
            run_id: summary.run_id,
        };
        self.selected = Some(summary);
    }

    /// Record an error from outside the run lifecycle.
    pub fn surface(&mut self, err: &EvalError) -> SurfacedError {
        let surfaced = SurfacedError::from(err);
        self.last_error = Some(surfaced.clone());
        surfaced
    }

    fn retire_current(&mut self) {
        if let Some(run_id) = self.ledger.run_id() {
            if self.retired.insert(run_id) {
                debug!(run_id = %run_id, "run retired");
            }
        }
    }
}
