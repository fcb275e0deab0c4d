//! Dashboard session: the single owner of all live-evaluation state.
//!
//! A [`Session`] is created once the backend has been bootstrapped and is
//! torn down with [`SessionInput::Shutdown`]. Everything that happens to it
//! arrives as one [`SessionInput`] and is handled by one `match`; work the
//! session cannot do itself (HTTP calls) leaves as [`Effect`]s for the
//! driver, whose results come back as inputs tagged with what they belong to.

use std::collections::VecDeque;
use std::time::Instant;

use evalboard_error::{ErrorClass, EvalError, Result};
use evalboard_types::{
    InboundMessage, RunId, RunPage, RuntimeConfig, ServerProgress, StartRunResponse,
    TestCaseAnalysis, TestCaseDetails, TestCaseId,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::Bootstrap;
use crate::config::DashboardConfig;
use crate::connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, Transport, TransportEvent,
};
use crate::controller::{Resolution, RunController, RunPhase, SubmissionTicket, SurfacedError};
use crate::detail::{DetailCache, DetailState};
use crate::history::{HistoryBrowser, HistoryRequest, TrendSeries};
use crate::ledger::LedgerView;
use crate::view::Scoreboard;

const MAX_PENDING_NOTICES: usize = 64;

pub const NOTICE_COMPLETED: &str = "Evaluation completed successfully";
pub const NOTICE_FAILED: &str = "Evaluation failed";
pub const BANNER_RECONNECTING: &str = "Connection error. Attempting to reconnect...";

/// Everything that can happen to a session.
#[derive(Debug)]
pub enum SessionInput {
    Transport(TransportEvent),
    /// Reconnect timer check.
    Tick,
    Submit {
        prompt: String,
    },
    SubmissionResolved {
        ticket: SubmissionTicket,
        result: Result<StartRunResponse>,
    },
    RefreshHistory,
    NextPage,
    PrevPage,
    SetPageSize(u32),
    HistoryLoaded {
        seq: u64,
        result: Result<RunPage>,
    },
    SelectRun(RunId),
    RequestDetail(TestCaseId),
    DetailLoaded {
        run_id: RunId,
        test_case_id: TestCaseId,
        result: Result<TestCaseDetails>,
    },
    Shutdown,
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartRun {
        ticket: SubmissionTicket,
        prompt: String,
    },
    FetchHistory(HistoryRequest),
    FetchDetail {
        run_id: RunId,
        test_case_id: TestCaseId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug)]
pub struct Session<T: Transport> {
    runtime: RuntimeConfig,
    analysis: TestCaseAnalysis,
    endpoint: String,
    connection: ConnectionManager<T>,
    controller: RunController,
    history: HistoryBrowser,
    details: DetailCache,
    notices: VecDeque<Notice>,
    banner: Option<SurfacedError>,
    server_progress: Option<ServerProgress>,
    status_line: Option<String>,
    prompt_prefill: Option<String>,
}

impl<T: Transport> Session<T> {
    pub fn new(boot: Bootstrap, config: &DashboardConfig, transport: T) -> Result<Self> {
        Ok(Self {
            runtime: boot.runtime,
            analysis: boot.analysis,
            endpoint: boot.endpoint,
            connection: ConnectionManager::new(transport, config.reconnect_policy()),
            controller: RunController::new(),
            history: HistoryBrowser::new(config.page_size)?,
            details: DetailCache::new(),
            notices: VecDeque::new(),
            banner: None,
            server_progress: None,
            status_line: None,
            prompt_prefill: None,
        })
    }

    /// Open the live subscription and load the first history page.
    pub fn start(&mut self, now: Instant) -> Vec<Effect> {
        let handle = self.connection.connect(&self.endpoint, now);
        debug!(epoch = handle.epoch, endpoint = %handle.endpoint, "session started");
        let mut effects = vec![Effect::FetchHistory(self.history.refresh())];
        self.pump(&mut effects);
        effects
    }

    pub fn handle(&mut self, input: SessionInput, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            SessionInput::Transport(event) => self.connection.handle(event, now),
            SessionInput::Tick => self.connection.tick(now),
            SessionInput::Submit { prompt } => {
                match self
                    .controller
                    .begin_submission(&prompt, self.connection.is_open())
                {
                    Ok(ticket) => {
                        self.server_progress = None;
                        self.status_line = None;
                        self.prompt_prefill = None;
                        effects.push(Effect::StartRun { ticket, prompt });
                    }
                    Err(err) => self.reject(&err),
                }
            }
            SessionInput::SubmissionResolved { ticket, result } => {
                match self.controller.resolve_submission(ticket, result) {
                    Resolution::Started { .. } | Resolution::Stale => {}
                    Resolution::Rejected(err) => {
                        self.notify(NoticeLevel::Error, NOTICE_FAILED);
                        debug!(message = %err.message, "submission rejected");
                    }
                    Resolution::LateFailure(err) => {
                        self.notify(NoticeLevel::Warning, err.message);
                    }
                }
            }
            SessionInput::RefreshHistory => {
                effects.push(Effect::FetchHistory(self.history.refresh()));
            }
            SessionInput::NextPage => {
                effects.extend(self.history.next_page().map(Effect::FetchHistory));
            }
            SessionInput::PrevPage => {
                effects.extend(self.history.prev_page().map(Effect::FetchHistory));
            }
            SessionInput::SetPageSize(limit) => match self.history.set_limit(limit) {
                Ok(request) => effects.push(Effect::FetchHistory(request)),
                Err(err) => self.notify(NoticeLevel::Warning, err.to_string()),
            },
            SessionInput::HistoryLoaded { seq, result } => {
                self.history.apply(seq, result);
            }
            SessionInput::SelectRun(run_id) => self.select_run(run_id),
            SessionInput::RequestDetail(test_case_id) => match self.request_detail(test_case_id) {
                Ok(effect) => effects.extend(effect),
                Err(err) => {
                    warn!(error = %err, test_case_id = %test_case_id, "detail lookup rejected");
                    self.notify(NoticeLevel::Warning, err.to_string());
                }
            },
            SessionInput::DetailLoaded {
                run_id,
                test_case_id,
                result,
            } => {
                let failure = match self.details.complete(run_id, test_case_id, result) {
                    DetailState::Failed(message) => Some(message.clone()),
                    DetailState::Loading | DetailState::Ready(_) => None,
                };
                if let Some(message) = failure {
                    self.notify(NoticeLevel::Warning, message);
                }
            }
            SessionInput::Shutdown => {
                info!("session shutting down");
                self.connection.close();
            }
        }
        self.pump(&mut effects);
        effects
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn analysis(&self) -> &TestCaseAnalysis {
        &self.analysis
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    pub fn history(&self) -> &HistoryBrowser {
        &self.history
    }

    pub fn ledger(&self) -> LedgerView {
        self.controller.view()
    }

    pub fn scoreboard(&self) -> Scoreboard {
        Scoreboard::build(&self.controller.view(), &self.analysis)
    }

    pub fn server_progress(&self) -> Option<&ServerProgress> {
        self.server_progress.as_ref()
    }

    pub fn banner(&self) -> Option<&SurfacedError> {
        self.banner.as_ref()
    }

    /// Prompt of the selected historical run, offered for resubmission.
    pub fn prompt_prefill(&self) -> Option<&str> {
        self.prompt_prefill.as_deref()
    }

    /// Detail of a test case in the displayed run.
    pub fn detail(&self, test_case_id: TestCaseId) -> Option<&DetailState> {
        let run_id = self.controller.ledger().run_id()?;
        self.details.get(run_id, test_case_id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.connection.next_deadline()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let ledger = self.controller.view();
        DashboardSnapshot {
            connection: self.connection.state(),
            reconnect_attempts: self.connection.attempts(),
            phase: self.controller.phase(),
            scoreboard: Scoreboard::build(&ledger, &self.analysis),
            ledger,
            server_progress: self.server_progress.clone(),
            status_line: self.status_line.clone(),
            last_error: self.controller.last_error().cloned(),
            banner: self.banner.clone(),
            history_page: self.history.page(),
            history_pages: self.history.current().map_or(0, |p| p.pages),
            trend: self.history.trend(),
            prompt_prefill: self.prompt_prefill.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn pump(&mut self, effects: &mut Vec<Effect>) {
        for event in self.connection.drain_events() {
            match event {
                ConnectionEvent::StateChanged { from, to } => self.on_state_change(from, to),
                ConnectionEvent::Message(message) => self.dispatch(message, effects),
                ConnectionEvent::Lost(err) => {
                    let surfaced = self.controller.surface(&err);
                    self.notify(NoticeLevel::Error, surfaced.message.clone());
                    self.banner = Some(surfaced);
                }
            }
        }
    }

    fn on_state_change(&mut self, from: ConnectionState, to: ConnectionState) {
        match to {
            ConnectionState::Open => {
                if self
                    .banner
                    .as_ref()
                    .is_some_and(|b| b.class == ErrorClass::Connection)
                {
                    self.banner = None;
                }
            }
            ConnectionState::ClosedRetrying => {
                self.banner = Some(SurfacedError {
                    class: ErrorClass::Connection,
                    message: BANNER_RECONNECTING.to_owned(),
                });
            }
            ConnectionState::Connecting | ConnectionState::ClosedFinal => {}
        }
        debug!(from = %from, to = %to, "session saw connection change");
    }

    fn dispatch(&mut self, message: InboundMessage, effects: &mut Vec<Effect>) {
        match message {
            InboundMessage::Result(event) => {
                let outcome = self.controller.ingest(&event);
                debug!(
                    test_case_id = %event.test_case_id,
                    criterion = %event.criterion,
                    outcome = ?outcome,
                    "result dispatched"
                );
            }
            InboundMessage::Progress(progress) => {
                if self.controller.phase().is_live() {
                    self.server_progress = Some(progress);
                }
            }
            InboundMessage::Status { status, message } => {
                self.status_line = message.or(status);
            }
            InboundMessage::Completed => {
                if self.controller.complete_run() {
                    self.server_progress = None;
                    self.notify(NoticeLevel::Success, NOTICE_COMPLETED);
                    effects.push(Effect::FetchHistory(self.history.refresh()));
                }
            }
            InboundMessage::Failed { error } => {
                if let Some(err) = self.controller.fail_run(error) {
                    self.server_progress = None;
                    debug!(message = %err.message, "run failure surfaced");
                    self.notify(NoticeLevel::Error, NOTICE_FAILED);
                }
            }
            InboundMessage::Ping => {}
        }
    }

    fn select_run(&mut self, run_id: RunId) {
        let summary = match self.history.find(run_id) {
            Ok(summary) => summary.clone(),
            Err(err) => {
                self.notify(NoticeLevel::Warning, err.to_string());
                return;
            }
        };
        if let Some(details) = summary.details() {
            for detail in details.values() {
                self.details.insert(run_id, detail.clone());
            }
        }
        self.prompt_prefill = Some(summary.prompt_text.clone());
        self.server_progress = None;
        self.status_line = None;
        self.controller.select_historical(summary);
        info!(run_id = %run_id, "historical run selected");
    }

    fn request_detail(&mut self, test_case_id: TestCaseId) -> Result<Option<Effect>> {
        let run_id = self
            .controller
            .ledger()
            .run_id()
            .ok_or(EvalError::NoRunSelected)?;
        let embedded = self
            .controller
            .selected()
            .filter(|summary| summary.run_id == run_id)
            .and_then(|summary| summary.details())
            .and_then(|details| details.get(&test_case_id))
            .cloned();
        if let Some(detail) = embedded {
            self.details.insert(run_id, detail);
            return Ok(None);
        }
        if self.details.begin(run_id, test_case_id) {
            Ok(Some(Effect::FetchDetail {
                run_id,
                test_case_id,
            }))
        } else {
            Ok(None)
        }
    }

    fn reject(&mut self, err: &EvalError) {
        warn!(error = %err, class = %err.class(), "submission rejected");
        let surfaced = self.controller.surface(err);
        self.notify(NoticeLevel::Error, surfaced.message);
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        if self.notices.len() == MAX_PENDING_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            level,
            message: message.into(),
        });
    }
}

/// Serializable state of the whole dashboard, used for headless output.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub phase: RunPhase,
    pub ledger: LedgerView,
    pub scoreboard: Scoreboard,
    pub server_progress: Option<ServerProgress>,
    pub status_line: Option<String>,
    pub last_error: Option<SurfacedError>,
    pub banner: Option<SurfacedError>,
    pub history_page: u32,
    pub history_pages: u32,
    pub trend: TrendSeries,
    pub prompt_prefill: Option<String>,
}
