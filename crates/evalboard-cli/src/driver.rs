//! Event loop for a live session.
//!
//! The driver owns the [`Session`] and the single input channel. Socket
//! threads and HTTP workers only ever send [`SessionInput`]s into that
//! channel; the loop applies them one at a time, fires reconnect timers when
//! nothing arrives before the next deadline, and hands new [`Effect`]s to
//! worker threads.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread;
use std::time::{Duration, Instant};

use evalboard_core::{
    Backend, ConnectionState, DashboardConfig, DashboardSnapshot, Effect, Notice, RunPhase,
    Session, SessionInput, bootstrap,
};
use evalboard_error::{ErrorClass, EvalError, Result};
use tracing::{debug, info, warn};

use crate::http::HttpBackend;
use crate::ws::WsTransport;

/// Longest wait between loop iterations when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Receives progress while a run streams in.
pub trait Observer {
    fn on_update(&mut self, session: &Session<WsTransport>);
    fn on_notice(&mut self, notice: &Notice);
}

/// How a live run ended.
#[derive(Debug)]
pub struct RunReport {
    pub snapshot: DashboardSnapshot,
    /// Set when the run did not complete.
    pub error: Option<EvalError>,
}

pub struct Driver {
    session: Session<WsTransport>,
    backend: Arc<HttpBackend>,
    inputs: Sender<SessionInput>,
    receiver: Receiver<SessionInput>,
}

impl Driver {
    /// Bootstrap against the configured backend and open the subscription.
    pub fn connect(config: &DashboardConfig) -> Result<Self> {
        let probe = HttpBackend::new(config.base_url.clone(), config.request_timeout)?;
        let boot = bootstrap(&probe, &config.base_url)?;
        let backend = Arc::new(probe.rebased(boot.api_base.clone()));
        let (inputs, receiver) = channel();
        let transport = WsTransport::new(inputs.clone());
        let session = Session::new(boot, config, transport)?;
        let mut driver = Self {
            session,
            backend,
            inputs,
            receiver,
        };
        let effects = driver.session.start(Instant::now());
        driver.spawn_effects(effects);
        Ok(driver)
    }

    /// Submit `prompt` once the subscription is open and pump events until
    /// the run completes, fails, or the connection is lost.
    pub fn run_prompt(mut self, prompt: &str, observer: &mut dyn Observer) -> RunReport {
        let mut submitted = false;
        let error = loop {
            if !submitted && self.session.connection().is_open() {
                self.apply(
                    SessionInput::Submit {
                        prompt: prompt.to_owned(),
                    },
                    observer,
                );
                submitted = true;
            }

            if let Some(outcome) = self.finished(submitted) {
                break outcome;
            }

            let wait = self
                .session
                .next_deadline()
                .map_or(IDLE_WAIT, |deadline| {
                    deadline.saturating_duration_since(Instant::now()).min(IDLE_WAIT)
                });
            match self.receiver.recv_timeout(wait) {
                Ok(input) => self.apply(input, observer),
                Err(RecvTimeoutError::Timeout) => self.apply(SessionInput::Tick, observer),
                Err(RecvTimeoutError::Disconnected) => {
                    break Some(EvalError::internal("driver input channel closed"));
                }
            }
        };

        self.apply(SessionInput::Shutdown, observer);
        RunReport {
            snapshot: self.session.snapshot(),
            error,
        }
    }

    /// `Some(None)` on success, `Some(Some(err))` on failure, `None` while
    /// the run is still going.
    fn finished(&self, submitted: bool) -> Option<Option<EvalError>> {
        let connection = self.session.connection();
        if connection.state() == ConnectionState::ClosedFinal {
            let attempts = connection.attempts();
            return Some(Some(EvalError::ConnectionLost { attempts }));
        }
        if !submitted {
            return None;
        }
        let controller = self.session.controller();
        match controller.phase() {
            RunPhase::Complete { .. } => Some(None),
            RunPhase::Idle | RunPhase::Historical { .. } => {
                let err = match controller.last_error() {
                    Some(e) if e.class == ErrorClass::Submission => EvalError::StartFailed {
                        detail: e.message.clone(),
                    },
                    Some(e) => EvalError::RunFailed {
                        detail: e.message.clone(),
                    },
                    None => EvalError::RunFailed {
                        detail: "run ended without completing".to_owned(),
                    },
                };
                Some(Some(err))
            }
            RunPhase::Live { .. } => None,
        }
    }

    fn apply(&mut self, input: SessionInput, observer: &mut dyn Observer) {
        let effects = self.session.handle(input, Instant::now());
        for notice in self.session.drain_notices() {
            observer.on_notice(&notice);
        }
        observer.on_update(&self.session);
        self.spawn_effects(effects);
    }

    fn spawn_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            let backend = Arc::clone(&self.backend);
            let inputs = self.inputs.clone();
            let label = effect_label(&effect);
            let spawned = thread::Builder::new()
                .name(format!("evalboard-{label}"))
                .spawn(move || {
                    let input = execute(backend.as_ref(), effect);
                    if inputs.send(input).is_err() {
                        debug!(effect = label, "session gone before effect finished");
                    }
                });
            if let Err(err) = spawned {
                warn!(effect = label, error = %err, "failed to spawn worker");
            }
        }
    }
}

fn effect_label(effect: &Effect) -> &'static str {
    match effect {
        Effect::StartRun { .. } => "start",
        Effect::FetchHistory(_) => "history",
        Effect::FetchDetail { .. } => "detail",
    }
}

/// Run one effect against `backend` and wrap the result as session input.
pub fn execute<B: Backend + ?Sized>(backend: &B, effect: Effect) -> SessionInput {
    match effect {
        Effect::StartRun { ticket, prompt } => {
            info!(generation = ticket.generation(), "starting evaluation");
            SessionInput::SubmissionResolved {
                ticket,
                result: backend.start_run(&prompt),
            }
        }
        Effect::FetchHistory(request) => SessionInput::HistoryLoaded {
            seq: request.seq,
            result: backend.list_runs(request.page, request.limit),
        },
        Effect::FetchDetail {
            run_id,
            test_case_id,
        } => SessionInput::DetailLoaded {
            run_id,
            test_case_id,
            result: backend.test_case_details(run_id, test_case_id),
        },
    }
}
