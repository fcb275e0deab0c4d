//! Paginated history browsing and the score trend derived from it.

use evalboard_error::{EvalError, Result};
use evalboard_types::{RunId, RunPage, RunSummary};
use serde::Serialize;
use tracing::{debug, warn};

/// Page sizes offered by the history view.
pub const PAGE_SIZE_OPTIONS: [u32; 3] = [5, 10, 25];

/// One history page fetch, tagged so late responses can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryRequest {
    pub seq: u64,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct HistoryBrowser {
    page: u32,
    limit: u32,
    seq: u64,
    loading: bool,
    current: Option<RunPage>,
    error: Option<String>,
}

impl HistoryBrowser {
    pub fn new(limit: u32) -> Result<Self> {
        validate_limit(limit)?;
        Ok(Self {
            page: 1,
            limit,
            seq: 0,
            loading: false,
            current: None,
            error: None,
        })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn current(&self) -> Option<&RunPage> {
        self.current.as_ref()
    }

    pub fn runs(&self) -> &[RunSummary] {
        self.current.as_ref().map_or(&[][..], |p| p.evaluations.as_slice())
    }

    pub fn has_next(&self) -> bool {
        self.current.as_ref().is_some_and(|p| self.page < p.pages)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    /// Fetch the current page again. Supersedes any request in flight.
    pub fn refresh(&mut self) -> HistoryRequest {
        self.seq += 1;
        self.loading = true;
        HistoryRequest {
            seq: self.seq,
            page: self.page,
            limit: self.limit,
        }
    }

    pub fn next_page(&mut self) -> Option<HistoryRequest> {
        if !self.has_next() {
            return None;
        }
        self.page += 1;
        Some(self.refresh())
    }

    pub fn prev_page(&mut self) -> Option<HistoryRequest> {
        if !self.has_prev() {
            return None;
        }
        self.page -= 1;
        Some(self.refresh())
    }

    /// Change the page size and return to the first page.
    pub fn set_limit(&mut self, limit: u32) -> Result<HistoryRequest> {
        validate_limit(limit)?;
        self.limit = limit;
        self.page = 1;
        Ok(self.refresh())
    }

    /// Apply a page response. Returns false for a superseded request.
    pub fn apply(&mut self, seq: u64, result: Result<RunPage>) -> bool {
        if seq != self.seq {
            debug!(seq, current = self.seq, "stale history response ignored");
            return false;
        }
        self.loading = false;
        match result {
            Ok(page) => {
                debug!(
                    page = page.page,
                    pages = page.pages,
                    runs = page.evaluations.len(),
                    "history page loaded"
                );
                self.error = None;
                self.current = Some(page);
            }
            Err(err) => {
                warn!(error = %err, page = self.page, "history page failed");
                self.error = Some(err.to_string());
            }
        }
        true
    }

    /// Locate a run in the loaded page.
    pub fn find(&self, run_id: RunId) -> Result<&RunSummary> {
        self.runs()
            .iter()
            .find(|run| run.run_id == run_id)
            .ok_or(EvalError::RunNotFound {
                run_id: run_id.get(),
            })
    }

    pub fn trend(&self) -> TrendSeries {
        TrendSeries::from_runs(self.runs())
    }
}

fn validate_limit(limit: u32) -> Result<()> {
    if PAGE_SIZE_OPTIONS.contains(&limit) {
        Ok(())
    } else {
        Err(EvalError::config(format!(
            "page size {limit} is not one of {PAGE_SIZE_OPTIONS:?}"
        )))
    }
}

/// One point of the score trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub run_id: RunId,
    pub total_score: u32,
}

/// Total scores of the loaded runs in ascending run order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrendSeries {
    pub points: Vec<TrendPoint>,
}

impl TrendSeries {
    pub fn from_runs(runs: &[RunSummary]) -> Self {
        let mut points: Vec<TrendPoint> = runs
            .iter()
            .map(|run| TrendPoint {
                run_id: run.run_id,
                total_score: run.total_score,
            })
            .collect();
        points.sort_by_key(|p| p.run_id);
        Self { points }
    }

    /// `first - last` run ids, or `0 - 0` when empty.
    pub fn range_label(&self) -> String {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => format!("{} - {}", first.run_id, last.run_id),
            _ => "0 - 0".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn run(id: u64, score: u32) -> RunSummary {
        RunSummary {
            run_id: RunId(id),
            timestamp: String::new(),
            prompt_text: format!("prompt {id}"),
            evaluation_model: String::new(),
            scoring_model: String::new(),
            total_score: score,
            total_tokens: 0,
            total_cost: 0.0,
            per_criterion: BTreeMap::new(),
            detailed_results: None,
        }
    }

    fn page(n: u32, pages: u32, runs: Vec<RunSummary>) -> RunPage {
        RunPage {
            total_count: runs.len() as u64,
            evaluations: runs,
            page: n,
            pages,
        }
    }

    #[test]
    fn rejects_unknown_page_size() {
        assert!(HistoryBrowser::new(7).is_err());
        let mut browser = HistoryBrowser::new(5).unwrap();
        assert!(browser.set_limit(100).is_err());
        assert_eq!(browser.limit(), 5);
    }

    #[test]
    fn pagination_follows_loaded_page_count() {
        let mut browser = HistoryBrowser::new(5).unwrap();
        assert!(browser.next_page().is_none(), "nothing loaded yet");
        let req = browser.refresh();
        assert!(browser.apply(req.seq, Ok(page(1, 2, vec![run(1, 3)]))));
        assert!(!browser.has_prev());
        let req = browser.next_page().unwrap();
        assert_eq!(req.page, 2);
        assert!(browser.apply(req.seq, Ok(page(2, 2, vec![run(2, 4)]))));
        assert!(browser.next_page().is_none());
        assert_eq!(browser.prev_page().unwrap().page, 1);
    }

    #[test]
    fn stale_page_is_ignored() {
        let mut browser = HistoryBrowser::new(10).unwrap();
        let old = browser.refresh();
        let new = browser.set_limit(25).unwrap();
        assert!(!browser.apply(old.seq, Ok(page(1, 1, vec![run(1, 1)]))));
        assert!(browser.is_loading());
        assert!(browser.apply(new.seq, Err(EvalError::HistoryUnavailable { detail: "503".into() })));
        assert!(browser.error().is_some());
        assert!(browser.runs().is_empty());
    }

    #[test]
    fn find_reports_missing_run() {
        let mut browser = HistoryBrowser::new(5).unwrap();
        let req = browser.refresh();
        browser.apply(req.seq, Ok(page(1, 1, vec![run(3, 1)])));
        assert_eq!(browser.find(RunId(3)).unwrap().prompt_text, "prompt 3");
        assert!(matches!(
            browser.find(RunId(4)),
            Err(EvalError::RunNotFound { run_id: 4 })
        ));
    }

    #[test]
    fn trend_sorts_by_run() {
        let series = TrendSeries::from_runs(&[run(9, 20), run(3, 12), run(5, 18)]);
        let ids: Vec<u64> = series.points.iter().map(|p| p.run_id.get()).collect();
        assert_eq!(ids, vec![3, 5, 9]);
        assert_eq!(series.range_label(), "3 - 9");
        assert_eq!(TrendSeries::default().range_label(), "0 - 0");
    }
}
