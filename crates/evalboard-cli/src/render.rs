//! Plain-text rendering for terminal output.

use std::fmt::Write as _;

use evalboard_core::{DashboardSnapshot, Scoreboard, TrendSeries};
use evalboard_types::{
    EvaluationSettings, ModelConfig, RunSummary, RuntimeConfig, TestCaseDetails, TestCaseOutcome,
};

const PROMPT_PREVIEW_CHARS: usize = 48;

fn cell_glyph(outcome: TestCaseOutcome) -> char {
    match outcome {
        TestCaseOutcome::Pass => '+',
        TestCaseOutcome::Fail => 'x',
        TestCaseOutcome::Pending => '.',
    }
}

/// Score header plus one line per criterion.
pub fn scoreboard(board: &Scoreboard) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Score {}  [{}]  progress {}",
        board.score_label(),
        board.band.label(),
        board.progress_label()
    );
    let name_width = board
        .rows
        .iter()
        .map(|r| r.display_name.len())
        .max()
        .unwrap_or(0);
    for (index, row) in board.rows.iter().enumerate() {
        let strip: String = row.cells.iter().map(|c| cell_glyph(c.outcome)).collect();
        let marker = if row.active { '>' } else { ' ' };
        let _ = writeln!(
            out,
            "{marker} {:>2}. {:<name_width$}  {:>3}/{:<3} {strip}",
            index + 1,
            row.display_name,
            row.passed,
            row.expected,
        );
    }
    out
}

/// One-line progress for streaming output.
pub fn progress_line(snapshot: &DashboardSnapshot) -> String {
    let mut line = format!(
        "[{}] {} {} passed {}",
        snapshot.connection.label(),
        snapshot.phase.label(),
        snapshot.scoreboard.progress_label(),
        snapshot.scoreboard.pass_count,
    );
    if let Some(progress) = snapshot
        .server_progress
        .as_ref()
        .and_then(|p| p.total_progress.as_deref())
    {
        let _ = write!(line, " (server {progress})");
    }
    if let Some(banner) = &snapshot.banner {
        let _ = write!(line, " !! {}", banner.message);
    }
    line
}

fn preview(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PROMPT_PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PROMPT_PREVIEW_CHARS - 3).collect();
        format!("{cut}...")
    }
}

/// History table with the trend range and paging footer.
pub fn history(runs: &[RunSummary], page: u32, pages: u32, trend: &TrendSeries) -> String {
    let mut out = String::new();
    if runs.is_empty() {
        out.push_str("No evaluations yet.\n");
    } else {
        let _ = writeln!(
            out,
            "{:>5}  {:<19}  {:>5}  {:>8}  {:>9}  prompt",
            "id", "timestamp", "score", "tokens", "cost"
        );
        for run in runs {
            let _ = writeln!(
                out,
                "{:>5}  {:<19}  {:>5}  {:>8}  {:>9.4}  {}",
                run.run_id,
                run.timestamp,
                run.total_score,
                run.total_tokens,
                run.total_cost,
                preview(&run.prompt_text),
            );
        }
    }
    let scores: Vec<String> = trend
        .points
        .iter()
        .map(|p| p.total_score.to_string())
        .collect();
    let _ = writeln!(
        out,
        "trend runs {}: {}",
        trend.range_label(),
        if scores.is_empty() {
            "-".to_owned()
        } else {
            scores.join(" ")
        }
    );
    let _ = writeln!(out, "page {page} of {}", pages.max(1));
    out
}

/// Header of a single historical run.
pub fn run_header(run: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Evaluation {} at {}", run.run_id, run.timestamp);
    let _ = writeln!(
        out,
        "models: {} (scoring {})",
        run.evaluation_model, run.scoring_model
    );
    let _ = writeln!(
        out,
        "tokens {}  cost ${:.4}",
        run.total_tokens, run.total_cost
    );
    let _ = writeln!(out, "prompt: {}", preview(&run.prompt_text));
    out
}

pub fn detail(details: &TestCaseDetails) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Test case {} [{}] {}",
        details.id,
        details.criterion.fallback_display_name(),
        details.result.label().to_uppercase()
    );
    if !details.description.is_empty() {
        let _ = writeln!(out, "description: {}", details.description);
    }
    let _ = writeln!(out, "\ninput:\n{}", details.input);
    let _ = writeln!(out, "\noutput:\n{}", details.output);
    if !details.explanation.is_empty() {
        let _ = writeln!(out, "\nexplanation:\n{}", details.explanation);
    }
    if let (Some(prompt), Some(response)) = (details.prompt_tokens, details.response_tokens) {
        let _ = writeln!(out, "\ntokens: {prompt} prompt / {response} response");
    }
    if let Some(cost) = details.total_cost() {
        let _ = writeln!(out, "cost: ${cost:.6}");
    }
    out
}

/// Runtime models, evaluation settings and, when a catalogue is given,
/// per-token costs.
pub fn settings(
    runtime: &RuntimeConfig,
    settings: &EvaluationSettings,
    catalogue: Option<&ModelConfig>,
) -> String {
    let mut out = String::new();
    let default_mark = catalogue
        .filter(|c| c.is_default_selection())
        .map_or("", |_| " (default)");
    let _ = writeln!(out, "evaluation model: {}{default_mark}", runtime.evaluation_model);
    let scoring = settings
        .scoring_model
        .as_deref()
        .unwrap_or(runtime.scoring_model.as_str());
    let _ = writeln!(out, "scoring model:    {scoring}{default_mark}");
    let _ = writeln!(out, "temperature:      {}", settings.temperature);
    if let Some(catalogue) = catalogue {
        for model in [runtime.evaluation_model.as_str(), scoring] {
            match catalogue.costs_of(model) {
                Some((provider, costs)) => {
                    let _ = writeln!(
                        out,
                        "  {provider}/{model}: input ${} output ${} per token",
                        costs.input, costs.output
                    );
                }
                None => {
                    let _ = writeln!(out, "  {model}: not in catalogue");
                }
            }
        }
    }
    if !settings.system_prompt.is_empty() {
        let _ = writeln!(out, "\nsystem prompt:\n{}", settings.system_prompt);
    }
    if !settings.evaluation_prompt_template.is_empty() {
        let _ = writeln!(
            out,
            "\nevaluation prompt template:\n{}",
            settings.evaluation_prompt_template
        );
    }
    out
}
