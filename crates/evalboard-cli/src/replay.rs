//! Offline replay of recorded subscription frames.
//!
//! A replay file holds one raw frame per line, exactly as the backend sent
//! it. Blank lines and lines starting with `#` are skipped. The frames are
//! fed through a real [`Session`] over a [`RecordingTransport`], so the
//! output is what the live dashboard would have shown.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use evalboard_core::{
    Backend, Bootstrap, DashboardConfig, DashboardSnapshot, Effect, Notice, RecordingTransport,
    Session, SessionInput, TransportEvent,
};
use evalboard_error::{EvalError, Result};
use evalboard_types::{
    BaseUrl, EvaluationSettings, RunId, RunPage, RuntimeConfig, StartRunResponse,
    TestCaseAnalysis, TestCaseDetails, TestCaseId,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::driver::execute;

const REPLAY_ENDPOINT: &str = "ws://replay.invalid/ws";

/// Backend stand-in: accepts the start request and has no history.
struct OfflineBackend {
    analysis: TestCaseAnalysis,
    run_id: Option<RunId>,
}

impl Backend for OfflineBackend {
    fn runtime_config(&self) -> Result<RuntimeConfig> {
        Ok(RuntimeConfig {
            ws_url: Some(REPLAY_ENDPOINT.to_owned()),
            ..RuntimeConfig::default()
        })
    }

    fn test_case_analysis(&self) -> Result<TestCaseAnalysis> {
        Ok(self.analysis.clone())
    }

    fn start_run(&self, _prompt: &str) -> Result<StartRunResponse> {
        Ok(StartRunResponse {
            message: Some("replay".to_owned()),
            evaluation_id: self.run_id,
        })
    }

    fn list_runs(&self, page: u32, _limit: u32) -> Result<RunPage> {
        Ok(RunPage::empty(page))
    }

    fn test_case_details(&self, run_id: RunId, test_case_id: TestCaseId) -> Result<TestCaseDetails> {
        Err(EvalError::DetailUnavailable {
            run_id: run_id.get(),
            test_case_id: test_case_id.get(),
            detail: "not available offline".to_owned(),
        })
    }

    fn evaluation_settings(&self) -> Result<EvaluationSettings> {
        Err(EvalError::config("evaluation settings are not available offline"))
    }
}

#[derive(Debug, Clone)]
pub struct ReplayOptions<'a> {
    pub frames: &'a Path,
    pub analysis: Option<&'a Path>,
    pub prompt: &'a str,
    pub run_id: Option<RunId>,
}

/// Headless output, written as JSON.
#[derive(Debug, Serialize)]
pub struct ReplayOutput {
    pub generated_at_unix_ms: u64,
    pub source: String,
    pub frames_fed: usize,
    pub lines_skipped: usize,
    pub notices: Vec<Notice>,
    pub snapshot: DashboardSnapshot,
}

pub fn replay(options: &ReplayOptions<'_>) -> Result<ReplayOutput> {
    let analysis = match options.analysis {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|err| {
                EvalError::config(format!("analysis file {}: {err}", path.display()))
            })?
        }
        None => TestCaseAnalysis {
            criteria: Vec::new(),
            counts_per_criterion: std::collections::BTreeMap::new(),
            total_test_cases: 0,
        },
    };
    let text = std::fs::read_to_string(options.frames)?;

    let backend = OfflineBackend {
        analysis,
        run_id: options.run_id,
    };
    let boot: Bootstrap = evalboard_core::bootstrap(&backend, &BaseUrl::default())?;
    let mut session = Session::new(boot, &DashboardConfig::default(), RecordingTransport::new())?;
    let mut notices = Vec::new();
    let mut now = Instant::now();

    let effects = session.start(now);
    settle(&mut session, &backend, effects, now, &mut notices);
    let epoch = session.connection().epoch();
    feed(
        &mut session,
        &backend,
        SessionInput::Transport(TransportEvent::Opened { epoch }),
        now,
        &mut notices,
    );
    feed(
        &mut session,
        &backend,
        SessionInput::Submit {
            prompt: options.prompt.to_owned(),
        },
        now,
        &mut notices,
    );

    let mut frames_fed = 0;
    let mut lines_skipped = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            lines_skipped += 1;
            continue;
        }
        now += Duration::from_millis(1);
        feed(
            &mut session,
            &backend,
            SessionInput::Transport(TransportEvent::Frame {
                epoch,
                text: line.to_owned(),
            }),
            now,
            &mut notices,
        );
        frames_fed += 1;
    }
    debug!(frames_fed, lines_skipped, "replay input consumed");

    feed(&mut session, &backend, SessionInput::Shutdown, now, &mut notices);
    let snapshot = session.snapshot();
    info!(
        frames = frames_fed,
        processed = snapshot.ledger.processed_count,
        passed = snapshot.ledger.pass_count,
        phase = snapshot.phase.label(),
        "replay finished"
    );
    Ok(ReplayOutput {
        generated_at_unix_ms: unix_ms_now(),
        source: options.frames.display().to_string(),
        frames_fed,
        lines_skipped,
        notices,
        snapshot,
    })
}

fn feed(
    session: &mut Session<RecordingTransport>,
    backend: &OfflineBackend,
    input: SessionInput,
    now: Instant,
    notices: &mut Vec<Notice>,
) {
    let effects = session.handle(input, now);
    settle(session, backend, effects, now, notices);
}

/// Execute effects, and the effects their results produce, to quiescence.
fn settle(
    session: &mut Session<RecordingTransport>,
    backend: &OfflineBackend,
    effects: Vec<Effect>,
    now: Instant,
    notices: &mut Vec<Notice>,
) {
    let mut queue: VecDeque<Effect> = effects.into();
    while let Some(effect) = queue.pop_front() {
        let input = execute(backend, effect);
        queue.extend(session.handle(input, now));
    }
    notices.extend(session.drain_notices());
}

fn unix_ms_now() -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    now.as_millis().try_into().unwrap_or(u64::MAX)
}

/// Pretty JSON to `path`, or stdout when no path is given.
pub fn write_headless(output: &ReplayOutput, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(output)?;
    match path {
        Some(p) => std::fs::write(p, json.as_bytes())?,
        None => println!("{json}"),
    }
    Ok(())
}
