//! Scoreboard view model.
//!
//! Pure projection of a [`LedgerView`] onto the rubric from
//! `/test-case-analysis`. Renderers consume this and nothing else.

use evalboard_types::{CriterionKey, TestCaseAnalysis, TestCaseId, TestCaseOutcome};
use serde::Serialize;

use crate::ledger::LedgerView;

/// Colour band of a total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Good,
    Fair,
    Poor,
}

impl ScoreBand {
    /// `>= 80%` good, `>= 60%` fair, otherwise poor.
    pub fn of(percentage: f64) -> Self {
        if percentage >= 80.0 {
            Self::Good
        } else if percentage >= 60.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

/// One displayed cell. `test_case_id` is absent for padding and for
/// unattributed historical tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub test_case_id: Option<TestCaseId>,
    pub outcome: TestCaseOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionRow {
    pub key: CriterionKey,
    pub display_name: String,
    pub passed: u32,
    pub reported: u32,
    pub expected: u32,
    pub active: bool,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scoreboard {
    pub rows: Vec<CriterionRow>,
    pub processed: u32,
    pub total: u32,
    pub pass_count: u32,
    pub percentage: f64,
    pub band: ScoreBand,
}

impl Scoreboard {
    /// Rows follow rubric order; criteria the rubric does not know are
    /// appended so nothing the ledger holds is hidden.
    pub fn build(view: &LedgerView, analysis: &TestCaseAnalysis) -> Self {
        let mut rows: Vec<CriterionRow> = analysis
            .criteria
            .iter()
            .map(|def| {
                let expected = analysis.expected_count(&def.key);
                row(view, &def.key, def.display_name.clone(), expected)
            })
            .collect();

        let extra = view
            .results_by_criterion
            .keys()
            .chain(view.unattributed.keys())
            .filter(|key| !analysis.contains(key));
        for key in extra {
            if rows.iter().any(|r| &r.key == key) {
                continue;
            }
            let reported = view.criterion_reported(key);
            rows.push(row(view, key, key.fallback_display_name(), reported));
        }

        let total = if analysis.total_test_cases > 0 {
            analysis.total_test_cases
        } else {
            rows.iter().map(|r| r.expected).fold(0, u32::saturating_add)
        };
        let percentage = if total == 0 {
            0.0
        } else {
            f64::from(view.pass_count) / f64::from(total) * 100.0
        };
        Self {
            rows,
            processed: view.processed_count,
            total,
            pass_count: view.pass_count,
            percentage,
            band: ScoreBand::of(percentage),
        }
    }

    /// `processed/total` rendered for progress text.
    pub fn progress_label(&self) -> String {
        format!("{}/{}", self.processed, self.total)
    }

    pub fn score_label(&self) -> String {
        format!("{}/{} ({:.1}%)", self.pass_count, self.total, self.percentage)
    }
}

/// Strip length per row. Counts stay exact past it; only cells are elided.
pub const MAX_STRIP_CELLS: usize = 1024;

fn row(view: &LedgerView, key: &CriterionKey, display_name: String, expected: u32) -> CriterionRow {
    let mut cells: Vec<Cell> = view
        .results_by_criterion
        .get(key)
        .into_iter()
        .flat_map(|cells| cells.iter())
        .map(|(id, outcome)| Cell {
            test_case_id: Some(*id),
            outcome: *outcome,
        })
        .take(MAX_STRIP_CELLS)
        .collect();

    if let Some(tally) = view.unattributed.get(key) {
        let fails = tally.total.saturating_sub(tally.pass);
        let approximated = std::iter::repeat_n(TestCaseOutcome::Pass, tally.pass as usize)
            .chain(std::iter::repeat_n(TestCaseOutcome::Fail, fails as usize))
            .map(|outcome| Cell {
                test_case_id: None,
                outcome,
            });
        let room = MAX_STRIP_CELLS.saturating_sub(cells.len());
        cells.extend(approximated.take(room));
    }

    let reported = view.criterion_reported(key);
    let strip = usize::try_from(expected)
        .unwrap_or(usize::MAX)
        .min(MAX_STRIP_CELLS);
    if cells.len() < strip {
        cells.resize(
            strip,
            Cell {
                test_case_id: None,
                outcome: TestCaseOutcome::Pending,
            },
        );
    }

    CriterionRow {
        key: key.clone(),
        display_name,
        passed: view.criterion_passes(key),
        reported,
        expected,
        active: view.active_criterion.as_ref() == Some(key),
        cells,
    }
}
