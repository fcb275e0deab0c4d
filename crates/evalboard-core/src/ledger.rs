//! Result ingestion ledger.
//!
//! The ledger is the only place test case outcomes are counted. Delivery is
//! at-least-once, so counting keys on the test case id: the first event for
//! an id is counted, later events only update what is displayed.
//!
//! A ledger is either *live* (accepting [`Ledger::ingest`]) or *sealed*
//! (finished, failed or historical). Sealed ledgers discard every event.

use std::collections::BTreeMap;

use evalboard_types::{
    CriterionKey, ResultEvent, RunId, RunSummary, TestCaseId, TestCaseOutcome,
};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

/// Outcomes keyed by test case, grouped by criterion.
pub type CriterionResults = BTreeMap<CriterionKey, BTreeMap<TestCaseId, TestCaseOutcome>>;

/// Pass/total counts for a criterion whose per-test-case detail is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CriterionTally {
    pub pass: u32,
    pub total: u32,
}

/// Why an event did not reach the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DiscardReason {
    /// The ledger is sealed.
    NotLive,
    /// The event names a run other than the bound one.
    StaleRun { bound: RunId, received: RunId },
    /// The event names a run the controller has already moved away from.
    RetiredRun { run_id: RunId },
}

/// Effect of one [`Ledger::ingest`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting of the id: it was counted.
    Counted,
    /// Redelivery: the displayed outcome was refreshed, counts unchanged.
    Updated,
    Discarded(DiscardReason),
}

impl IngestOutcome {
    pub const fn is_discarded(self) -> bool {
        matches!(self, Self::Discarded(_))
    }
}

/// Idempotent record of streamed outcomes for one run.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    results: CriterionResults,
    /// Seen ids with the criterion currently holding their entry.
    seen: BTreeMap<TestCaseId, CriterionKey>,
    pass_count: u32,
    active_criterion: Option<CriterionKey>,
    run_id: Option<RunId>,
    live: bool,
    unattributed: BTreeMap<CriterionKey, CriterionTally>,
}

impl Ledger {
    /// Empty, sealed ledger. Nothing is accepted until [`Ledger::reset`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Record one streamed result.
    pub fn ingest(&mut self, event: &ResultEvent) -> IngestOutcome {
        if !self.live {
            trace!(test_case_id = %event.test_case_id, "ledger sealed; event discarded");
            return IngestOutcome::Discarded(DiscardReason::NotLive);
        }
        if let Some(received) = event.run_id {
            match self.run_id {
                Some(bound) if bound != received => {
                    debug!(
                        bound = %bound,
                        received = %received,
                        test_case_id = %event.test_case_id,
                        "stale run event discarded"
                    );
                    return IngestOutcome::Discarded(DiscardReason::StaleRun { bound, received });
                }
                Some(_) => {}
                None => {
                    info!(run_id = %received, "ledger bound to first tagged run");
                    self.run_id = Some(received);
                }
            }
        }

        let id = event.test_case_id;
        let outcome = TestCaseOutcome::from(event.verdict);

        let previous = self.seen.insert(id, event.criterion.clone());
        if let Some(old) = previous.as_ref().filter(|old| **old != event.criterion) {
            if let Some(cells) = self.results.get_mut(old) {
                cells.remove(&id);
                if cells.is_empty() {
                    self.results.remove(old);
                }
            }
            debug!(test_case_id = %id, from = %old, to = %event.criterion, "test case moved criterion");
        }
        self.results
            .entry(event.criterion.clone())
            .or_default()
            .insert(id, outcome);
        self.active_criterion = Some(event.criterion.clone());

        if previous.is_some() {
            trace!(test_case_id = %id, outcome = %outcome, "redelivery; display refreshed");
            return IngestOutcome::Updated;
        }
        if outcome.is_pass() {
            self.pass_count += 1;
        }
        trace!(
            test_case_id = %id,
            criterion = %event.criterion,
            outcome = %outcome,
            processed = self.seen.len(),
            "result counted"
        );
        IngestOutcome::Counted
    }

    /// Clear all state, bind `run_id` (or nothing) and start accepting events.
    pub fn reset(&mut self, run_id: Option<RunId>) {
        *self = Self {
            run_id,
            live: true,
            ..Self::default()
        };
        debug!(run_id = ?run_id.map(RunId::get), "ledger reset");
    }

    /// Bind a live ledger to `run_id`, which the caller knows to be its run.
    ///
    /// An unbound ledger keeps its contents. A ledger that adopted a different
    /// run from the stream is reset to `run_id`; the adopted id is returned.
    pub fn rebind(&mut self, run_id: RunId) -> Option<RunId> {
        match self.run_id {
            Some(bound) if bound == run_id => None,
            Some(adopted) => {
                warn!(
                    adopted = %adopted,
                    run_id = %run_id,
                    dropped = self.seen.len(),
                    "ledger adopted the wrong run; resetting"
                );
                let live = self.live;
                self.reset(Some(run_id));
                self.live = live;
                Some(adopted)
            }
            None => {
                self.run_id = Some(run_id);
                None
            }
        }
    }

    /// Stop accepting events. Contents are kept for display.
    pub fn seal(&mut self) {
        if self.live {
            debug!(run_id = ?self.run_id.map(RunId::get), processed = self.seen.len(), "ledger sealed");
        }
        self.live = false;
        self.active_criterion = None;
    }

    /// Replace the ledger wholesale with a historical run.
    pub fn load_snapshot(&mut self, summary: &RunSummary) {
        *self = Self {
            run_id: Some(summary.run_id),
            ..Self::default()
        };
        if let Some(details) = summary.details() {
            for (id, detail) in details {
                self.results
                    .entry(detail.criterion.clone())
                    .or_default()
                    .insert(*id, detail.result);
                self.seen.insert(*id, detail.criterion.clone());
                if detail.result.is_pass() {
                    self.pass_count += 1;
                }
            }
        } else {
            self.unattributed = summary
                .per_criterion
                .iter()
                .map(|(key, score)| {
                    let tally = CriterionTally {
                        pass: score.pass_count.min(score.total_count),
                        total: score.total_count,
                    };
                    (key.clone(), tally)
                })
                .collect();
        }
        info!(
            run_id = %summary.run_id,
            processed = self.processed_count(),
            passed = self.pass_count(),
            attributed = self.unattributed.is_empty(),
            "historical snapshot loaded"
        );
    }

    pub fn processed_count(&self) -> u32 {
        let seen = u32::try_from(self.seen.len()).unwrap_or(u32::MAX);
        self.unattributed
            .values()
            .map(|t| t.total)
            .fold(seen, u32::saturating_add)
    }

    pub fn pass_count(&self) -> u32 {
        self.unattributed
            .values()
            .map(|t| t.pass)
            .fold(self.pass_count, u32::saturating_add)
    }

    pub fn outcome_of(&self, id: TestCaseId) -> Option<(&CriterionKey, TestCaseOutcome)> {
        let criterion = self.seen.get(&id)?;
        let outcome = self.results.get(criterion)?.get(&id)?;
        Some((criterion, *outcome))
    }

    /// Immutable snapshot for rendering.
    pub fn view(&self) -> LedgerView {
        LedgerView {
            run_id: self.run_id,
            live: self.live,
            processed_count: self.processed_count(),
            pass_count: self.pass_count(),
            results_by_criterion: self.results.clone(),
            unattributed: self.unattributed.clone(),
            active_criterion: self.active_criterion.clone(),
        }
    }
}

/// Read-only copy of the ledger aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerView {
    pub run_id: Option<RunId>,
    pub live: bool,
    pub processed_count: u32,
    pub pass_count: u32,
    pub results_by_criterion: CriterionResults,
    pub unattributed: BTreeMap<CriterionKey, CriterionTally>,
    pub active_criterion: Option<CriterionKey>,
}

impl LedgerView {
    /// Displayed pass count for one criterion.
    pub fn criterion_passes(&self, key: &CriterionKey) -> u32 {
        let attributed = self
            .results_by_criterion
            .get(key)
            .map_or(0, |cells| cells.values().filter(|o| o.is_pass()).count() as u32);
        attributed.saturating_add(self.unattributed.get(key).map_or(0, |t| t.pass))
    }

    /// Number of reported test cases for one criterion.
    pub fn criterion_reported(&self, key: &CriterionKey) -> u32 {
        let attributed = self
            .results_by_criterion
            .get(key)
            .map_or(0, |cells| cells.len() as u32);
        attributed.saturating_add(self.unattributed.get(key).map_or(0, |t| t.total))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use evalboard_types::{CriterionScore, TestCaseDetails, Verdict};

    use super::*;

    fn live(run: Option<u64>) -> Ledger {
        let mut ledger = Ledger::new();
        ledger.reset(run.map(RunId));
        ledger
    }

    fn summary(run: u64) -> RunSummary {
        RunSummary {
            run_id: RunId(run),
            timestamp: "2024-11-02T10:15:00".to_owned(),
            prompt_text: "Be brief.".to_owned(),
            evaluation_model: "gpt-4o-mini".to_owned(),
            scoring_model: "gpt-4o".to_owned(),
            total_score: 0,
            total_tokens: 0,
            total_cost: 0.0,
            per_criterion: BTreeMap::new(),
            detailed_results: None,
        }
    }

    fn detail(id: u64, criterion: &str, result: TestCaseOutcome) -> TestCaseDetails {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "criterion": criterion,
            "result": result.label(),
        }))
        .unwrap()
    }

    #[test]
    fn new_ledger_is_sealed() {
        let mut ledger = Ledger::new();
        let outcome = ledger.ingest(&ResultEvent::new(1, "k", Verdict::Pass));
        assert_eq!(outcome, IngestOutcome::Discarded(DiscardReason::NotLive));
        assert_eq!(ledger.processed_count(), 0);
    }

    #[test]
    fn duplicate_counts_once_and_displays_last() {
        let mut ledger = live(None);
        assert_eq!(
            ledger.ingest(&ResultEvent::new(1, "k", Verdict::Pass)),
            IngestOutcome::Counted
        );
        assert_eq!(
            ledger.ingest(&ResultEvent::new(1, "k", Verdict::Fail)),
            IngestOutcome::Updated
        );
        assert_eq!(ledger.processed_count(), 1);
        assert_eq!(ledger.pass_count(), 1, "first write counts");
        let (_, shown) = ledger.outcome_of(TestCaseId(1)).unwrap();
        assert_eq!(shown, TestCaseOutcome::Fail, "last write is displayed");
    }

    #[test]
    fn redelivery_under_new_criterion_moves_entry() {
        let mut ledger = live(None);
        ledger.ingest(&ResultEvent::new(7, "a", Verdict::Fail));
        ledger.ingest(&ResultEvent::new(7, "b", Verdict::Fail));
        let view = ledger.view();
        assert!(!view.results_by_criterion.contains_key(&CriterionKey::from("a")));
        assert_eq!(
            view.results_by_criterion[&CriterionKey::from("b")][&TestCaseId(7)],
            TestCaseOutcome::Fail
        );
        assert_eq!(view.processed_count, 1);
        assert_eq!(view.active_criterion, Some(CriterionKey::from("b")));
    }

    #[test]
    fn stale_run_leaves_ledger_unchanged() {
        let mut ledger = live(Some(1));
        ledger.ingest(&ResultEvent::new(1, "k", Verdict::Pass).for_run(RunId(1)));
        let before = ledger.view();
        let outcome = ledger.ingest(&ResultEvent::new(2, "k", Verdict::Pass).for_run(RunId(2)));
        assert_eq!(
            outcome,
            IngestOutcome::Discarded(DiscardReason::StaleRun {
                bound: RunId(1),
                received: RunId(2)
            })
        );
        assert_eq!(ledger.view(), before);
    }

    #[test]
    fn unbound_ledger_adopts_first_tagged_run() {
        let mut ledger = live(None);
        ledger.ingest(&ResultEvent::new(1, "k", Verdict::Pass));
        ledger.ingest(&ResultEvent::new(2, "k", Verdict::Pass).for_run(RunId(9)));
        assert_eq!(ledger.run_id(), Some(RunId(9)));
        assert!(
            ledger
                .ingest(&ResultEvent::new(3, "k", Verdict::Pass).for_run(RunId(8)))
                .is_discarded()
        );
        assert_eq!(ledger.rebind(RunId(9)), None);
        assert_eq!(ledger.processed_count(), 2);
    }

    #[test]
    fn rebind_to_another_run_starts_over() {
        let mut ledger = live(None);
        ledger.ingest(&ResultEvent::new(1, "k", Verdict::Pass).for_run(RunId(10)));
        assert_eq!(ledger.rebind(RunId(11)), Some(RunId(10)));
        assert_eq!(ledger.run_id(), Some(RunId(11)));
        assert_eq!(ledger.processed_count(), 0, "case=adopted results dropped");
        assert!(ledger.is_live());
        assert_eq!(
            ledger.ingest(&ResultEvent::new(1, "k", Verdict::Fail).for_run(RunId(11))),
            IngestOutcome::Counted
        );
        assert_eq!(ledger.pass_count(), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut ledger = live(Some(1));
        ledger.ingest(&ResultEvent::new(1, "k", Verdict::Pass));
        ledger.reset(Some(RunId(2)));
        let view = ledger.view();
        assert_eq!(view.processed_count, 0);
        assert_eq!(view.pass_count, 0);
        assert!(view.results_by_criterion.is_empty());
        assert_eq!(view.active_criterion, None);
        assert_eq!(view.run_id, Some(RunId(2)));
        assert!(view.live);
    }

    #[test]
    fn seal_keeps_contents_and_stops_ingest() {
        let mut ledger = live(Some(1));
        ledger.ingest(&ResultEvent::new(1, "k", Verdict::Pass));
        ledger.seal();
        assert!(
            ledger
                .ingest(&ResultEvent::new(2, "k", Verdict::Pass))
                .is_discarded()
        );
        assert_eq!(ledger.processed_count(), 1);
        assert_eq!(ledger.view().active_criterion, None);
    }

    #[test]
    fn snapshot_from_detail_replaces_live_state() {
        let mut ledger = live(Some(1));
        for id in 1..=3 {
            ledger.ingest(&ResultEvent::new(id, "k", Verdict::Pass));
        }
        let mut summary = summary(4);
        summary.detailed_results = Some(
            [
                (TestCaseId(1), detail(1, "a", TestCaseOutcome::Pass)),
                (TestCaseId(2), detail(2, "b", TestCaseOutcome::Fail)),
            ]
            .into_iter()
            .collect(),
        );
        ledger.load_snapshot(&summary);
        let view = ledger.view();
        assert!(!view.live);
        assert_eq!(view.run_id, Some(RunId(4)));
        assert_eq!(view.processed_count, 2);
        assert_eq!(view.pass_count, 1);
        assert!(!view.results_by_criterion.contains_key(&CriterionKey::from("k")));
    }

    #[test]
    fn snapshot_without_detail_uses_tallies() {
        let mut ledger = Ledger::new();
        let mut summary = summary(5);
        summary.per_criterion.insert(
            CriterionKey::from("a"),
            CriterionScore {
                pass_count: 3,
                total_count: 5,
                cost: 0.0,
            },
        );
        summary.detailed_results = Some(BTreeMap::new());
        ledger.load_snapshot(&summary);
        let view = ledger.view();
        assert_eq!(view.processed_count, 5);
        assert_eq!(view.pass_count, 3);
        assert!(view.results_by_criterion.is_empty());
        assert_eq!(view.criterion_passes(&CriterionKey::from("a")), 3);
        assert_eq!(view.criterion_reported(&CriterionKey::from("a")), 5);
    }

    #[test]
    fn extreme_tallies_saturate() {
        let mut ledger = Ledger::new();
        let mut summary = summary(6);
        for (key, pass, total) in [("a", u32::MAX, u32::MAX), ("b", 2, 2)] {
            summary.per_criterion.insert(
                CriterionKey::from(key),
                CriterionScore {
                    pass_count: pass,
                    total_count: total,
                    cost: 0.0,
                },
            );
        }
        ledger.load_snapshot(&summary);
        let view = ledger.view();
        assert_eq!(view.processed_count, u32::MAX, "case=processed");
        assert_eq!(view.pass_count, u32::MAX, "case=passed");
        assert_eq!(view.criterion_reported(&CriterionKey::from("b")), 2, "case=row_b");
    }
}
