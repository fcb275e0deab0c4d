//! Live evaluation state machine for the evalboard dashboard.
//!
//! The crate performs no I/O. A driver owns a [`Session`], feeds it
//! [`SessionInput`]s (socket events, timer ticks, user actions, completed
//! HTTP calls) and executes the [`Effect`]s it returns against a
//! [`Backend`]. All state transitions happen inside [`Session::handle`], one
//! input at a time.
//!
//! Layers, leaves first:
//! - [`ledger`]: idempotent result counting for one run.
//! - [`connection`]: subscription lifecycle and reconnect backoff.
//! - [`controller`]: idle / live / complete / historical phases.
//! - [`history`], [`detail`], [`view`]: history paging, detail cache and the
//!   scoreboard view model.
//! - [`session`]: wires the above together.

pub mod backend;
pub mod config;
pub mod connection;
pub mod controller;
pub mod detail;
pub mod history;
pub mod ledger;
pub mod session;
pub mod view;

pub use backend::{Backend, Bootstrap, bootstrap};
pub use config::DashboardConfig;
pub use connection::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL, ReconnectPolicy, RecordingTransport,
    ScheduledRetry, Transport, TransportEvent,
};
pub use controller::{Resolution, RunController, RunPhase, SubmissionTicket, SurfacedError};
pub use detail::{DetailCache, DetailState};
pub use history::{HistoryBrowser, HistoryRequest, TrendPoint, TrendSeries};
pub use ledger::{CriterionTally, DiscardReason, IngestOutcome, Ledger, LedgerView};
pub use session::{DashboardSnapshot, Effect, Notice, NoticeLevel, Session, SessionInput};
pub use view::{Cell, CriterionRow, ScoreBand, Scoreboard};
