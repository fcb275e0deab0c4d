//! Shared fakes for the session integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use evalboard_core::{
    Backend, DashboardConfig, Effect, RecordingTransport, Session, SessionInput, SubmissionTicket,
    TransportEvent, bootstrap,
};
use evalboard_error::{EvalError, Result};
use evalboard_types::{
    BaseUrl, CriterionKey, CriterionScore, EvaluationSettings, RunId, RunPage, RunSummary,
    RuntimeConfig, StartRunResponse, TestCaseAnalysis, TestCaseDetails, TestCaseId,
    TestCaseOutcome,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Terminal-only logging through the test writer. Safe to call repeatedly.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// In-memory backend with a fixed rubric of two criteria.
#[derive(Default)]
pub struct FakeBackend {
    pub runs: RefCell<Vec<RunSummary>>,
    pub details: RefCell<BTreeMap<(RunId, TestCaseId), TestCaseDetails>>,
    /// When set, `start_run` fails with this status and body.
    pub reject_start: RefCell<Option<(u16, String)>>,
    pub start_run_id: RefCell<Option<RunId>>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl Backend for FakeBackend {
    fn runtime_config(&self) -> Result<RuntimeConfig> {
        self.calls.borrow_mut().push("GET /config".to_owned());
        Ok(RuntimeConfig {
            backend_port: Some(8000),
            evaluation_model: "gpt-4o-mini".to_owned(),
            scoring_model: "gpt-4o".to_owned(),
            ..RuntimeConfig::default()
        })
    }

    fn test_case_analysis(&self) -> Result<TestCaseAnalysis> {
        self.calls
            .borrow_mut()
            .push("GET /test-case-analysis".to_owned());
        Ok(serde_json::from_str(
            r#"{
                "criteria": {
                    "removing_filler_text": "Removing Filler Text",
                    "retaining_key_information": "Retaining Key Information"
                },
                "counts_per_criterion": {"removing_filler_text": 5, "retaining_key_information": 5},
                "total_test_cases": 10
            }"#,
        )?)
    }

    fn start_run(&self, prompt: &str) -> Result<StartRunResponse> {
        self.calls
            .borrow_mut()
            .push(format!("POST /evaluate {prompt}"));
        if let Some((status, detail)) = self.reject_start.borrow().clone() {
            return Err(EvalError::StartRejected { status, detail });
        }
        Ok(StartRunResponse {
            message: Some("Evaluation started".to_owned()),
            evaluation_id: *self.start_run_id.borrow(),
        })
    }

    fn list_runs(&self, page: u32, limit: u32) -> Result<RunPage> {
        self.calls
            .borrow_mut()
            .push(format!("GET /evaluations?page={page}&limit={limit}"));
        let mut runs = self.runs.borrow().clone();
        runs.sort_by_key(|r| std::cmp::Reverse(r.run_id));
        let total = runs.len() as u32;
        let pages = total.div_ceil(limit);
        let evaluations = runs
            .into_iter()
            .skip(((page.max(1) - 1) * limit) as usize)
            .take(limit as usize)
            .collect();
        Ok(RunPage {
            evaluations,
            total_count: u64::from(total),
            page,
            pages,
        })
    }

    fn test_case_details(&self, run_id: RunId, test_case_id: TestCaseId) -> Result<TestCaseDetails> {
        self.calls
            .borrow_mut()
            .push(format!("GET /test-case-details/{run_id}/{test_case_id}"));
        self.details
            .borrow()
            .get(&(run_id, test_case_id))
            .cloned()
            .ok_or_else(|| EvalError::DetailUnavailable {
                run_id: run_id.get(),
                test_case_id: test_case_id.get(),
                detail: "404 Not Found".to_owned(),
            })
    }

    fn evaluation_settings(&self) -> Result<EvaluationSettings> {
        Ok(EvaluationSettings {
            temperature: 0.0,
            system_prompt: String::new(),
            evaluation_prompt_template: String::new(),
            scoring_model: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn detail(id: u64, criterion: &str, result: TestCaseOutcome) -> TestCaseDetails {
    TestCaseDetails {
        id: TestCaseId(id),
        input: format!("input {id}"),
        description: String::new(),
        output: format!("output {id}"),
        result,
        explanation: String::new(),
        criterion: CriterionKey::from(criterion),
        prompt_tokens: None,
        response_tokens: None,
        input_model: None,
        output_model: None,
        evaluation_cost: None,
        scoring_cost: None,
    }
}

/// Historical run with `passed` of `total` test cases passing, split over
/// the two rubric criteria. `with_detail` controls whether per-test-case
/// results are embedded.
pub fn historical_run(run_id: u64, passed: u32, total: u32, with_detail: bool) -> RunSummary {
    let criteria = ["removing_filler_text", "retaining_key_information"];
    let mut per_criterion = BTreeMap::new();
    let mut details = BTreeMap::new();
    for id in 1..=total {
        let criterion = criteria[(id % 2) as usize];
        let outcome = if id <= passed {
            TestCaseOutcome::Pass
        } else {
            TestCaseOutcome::Fail
        };
        let score = per_criterion
            .entry(CriterionKey::from(criterion))
            .or_insert(CriterionScore {
                pass_count: 0,
                total_count: 0,
                cost: 0.0,
            });
        score.total_count += 1;
        if outcome.is_pass() {
            score.pass_count += 1;
        }
        details.insert(
            TestCaseId(u64::from(id)),
            detail(u64::from(id), criterion, outcome),
        );
    }
    RunSummary {
        run_id: RunId(run_id),
        timestamp: "2024-11-02T10:15:00".to_owned(),
        prompt_text: format!("prompt of run {run_id}"),
        evaluation_model: "gpt-4o-mini".to_owned(),
        scoring_model: "gpt-4o".to_owned(),
        total_score: passed,
        total_tokens: 1000,
        total_cost: 0.01,
        per_criterion,
        detailed_results: with_detail.then_some(details),
    }
}

pub fn result_frame(id: u64, criterion: &str, outcome: &str, run: Option<u64>) -> String {
    let run = run.map(|r| format!(r#","evaluation_id":{r}"#)).unwrap_or_default();
    format!(r#"{{"current_result":{{"id":{id},"criterion":"{criterion}","result":"{outcome}"{run}}}}}"#)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Drives a session synchronously, executing effects against the fake
/// backend as soon as they are emitted.
pub struct Harness {
    pub session: Session<RecordingTransport>,
    pub backend: FakeBackend,
    pub now: Instant,
    /// Hold start requests instead of resolving them immediately.
    pub defer_starts: bool,
    pub pending_starts: Vec<(SubmissionTicket, String)>,
    pub history_fetches: usize,
}

impl Harness {
    pub fn new(backend: FakeBackend) -> Self {
        init_test_logging();
        let boot = bootstrap(&backend, &BaseUrl::default()).expect("bootstrap");
        let mut session = Session::new(boot, &DashboardConfig::default(), RecordingTransport::new())
            .expect("session");
        let now = Instant::now();
        let effects = session.start(now);
        let mut harness = Self {
            session,
            backend,
            now,
            defer_starts: false,
            pending_starts: Vec::new(),
            history_fetches: 0,
        };
        harness.run(effects);
        harness
    }

    /// Harness with an open live subscription.
    pub fn connected(backend: FakeBackend) -> Self {
        let mut harness = Self::new(backend);
        harness.open();
        harness
    }

    pub fn epoch(&self) -> u64 {
        self.session.connection().epoch()
    }

    pub fn open(&mut self) {
        let epoch = self.epoch();
        self.input(SessionInput::Transport(TransportEvent::Opened { epoch }));
    }

    pub fn frame(&mut self, text: &str) {
        let epoch = self.epoch();
        self.input(SessionInput::Transport(TransportEvent::Frame {
            epoch,
            text: text.to_owned(),
        }));
    }

    pub fn result(&mut self, id: u64, criterion: &str, outcome: &str, run: Option<u64>) {
        self.frame(&result_frame(id, criterion, outcome, run));
    }

    pub fn submit(&mut self, prompt: &str) {
        self.input(SessionInput::Submit {
            prompt: prompt.to_owned(),
        });
    }

    pub fn input(&mut self, input: SessionInput) {
        let effects = self.session.handle(input, self.now);
        self.run(effects);
    }

    /// Resolve a held start request.
    pub fn resolve_start(&mut self, index: usize, result: Result<StartRunResponse>) {
        let (ticket, _) = self.pending_starts.remove(index);
        self.input(SessionInput::SubmissionResolved { ticket, result });
    }

    fn run(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            let input = match effect {
                Effect::StartRun { ticket, prompt } => {
                    if self.defer_starts {
                        self.pending_starts.push((ticket, prompt));
                        continue;
                    }
                    let result = self.backend.start_run(&prompt);
                    SessionInput::SubmissionResolved { ticket, result }
                }
                Effect::FetchHistory(request) => {
                    self.history_fetches += 1;
                    let result = self.backend.list_runs(request.page, request.limit);
                    SessionInput::HistoryLoaded {
                        seq: request.seq,
                        result,
                    }
                }
                Effect::FetchDetail {
                    run_id,
                    test_case_id,
                } => {
                    let result = self.backend.test_case_details(run_id, test_case_id);
                    SessionInput::DetailLoaded {
                        run_id,
                        test_case_id,
                        result,
                    }
                }
            };
            queue.extend(self.session.handle(input, self.now));
        }
    }
}
