//! Live connection manager.
//!
//! Owns one logical subscription to the backend's live channel and the
//! reconnect-with-backoff state machine around it. The manager never blocks
//! and never spawns: the caller feeds it [`TransportEvent`]s and calls
//! [`ConnectionManager::tick`] when [`ConnectionManager::next_deadline`]
//! passes, then drains the resulting [`ConnectionEvent`]s.
//!
//! ```text
//!   connect ──> Connecting ──Opened──> Open
//!                   ^                   │ unexpected close
//!                   │ retry due         v
//!                   └──────────── ClosedRetrying ──budget spent──> ClosedFinal
//! ```
//!
//! Every physical socket gets a fresh epoch. Transport events carry the
//! epoch they were produced under, so anything from a superseded socket is
//! ignored rather than mistaken for the current one.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use evalboard_error::{EvalError, Result};
use evalboard_types::{InboundMessage, OutboundMessage, decode_frame};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

/// Default delay between an unexpected close and the next attempt.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
/// Default number of retries allowed between two successful opens.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Physical socket operations.
///
/// Implementations report progress asynchronously as [`TransportEvent`]s
/// tagged with the epoch passed to [`Transport::open`].
pub trait Transport {
    /// Begin opening a socket to `endpoint` for `epoch`.
    fn open(&mut self, epoch: u64, endpoint: &str) -> Result<()>;
    /// Send one text frame on the socket opened for `epoch`.
    fn send_text(&mut self, epoch: u64, text: &str) -> Result<()>;
    /// Close the socket for `epoch`. Must tolerate already-closed sockets.
    fn close(&mut self, epoch: u64);
}

/// Something that happened on a physical socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum TransportEvent {
    Opened { epoch: u64 },
    Frame { epoch: u64, text: String },
    Closed { epoch: u64, reason: Option<String> },
    Failed { epoch: u64, detail: String },
}

impl TransportEvent {
    pub const fn epoch(&self) -> u64 {
        match self {
            Self::Opened { epoch }
            | Self::Frame { epoch, .. }
            | Self::Closed { epoch, .. }
            | Self::Failed { epoch, .. } => *epoch,
        }
    }
}

/// Transport that performs no I/O and records every call.
///
/// Used for headless replays and as the test double for the manager.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    pub opened: Vec<(u64, String)>,
    pub sent: Vec<(u64, String)>,
    pub closed: Vec<u64>,
    /// When set, [`Transport::open`] fails with this detail.
    pub refuse_open: Option<String>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch of the most recent open call.
    pub fn last_epoch(&self) -> Option<u64> {
        self.opened.last().map(|(epoch, _)| *epoch)
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, epoch: u64, endpoint: &str) -> Result<()> {
        self.opened.push((epoch, endpoint.to_owned()));
        match &self.refuse_open {
            Some(detail) => Err(EvalError::connection(detail.clone())),
            None => Ok(()),
        }
    }

    fn send_text(&mut self, epoch: u64, text: &str) -> Result<()> {
        self.sent.push((epoch, text.to_owned()));
        Ok(())
    }

    fn close(&mut self, epoch: u64) {
        self.closed.push(epoch);
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of the logical subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedRetrying,
    ClosedFinal,
}

impl ConnectionState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosedRetrying => "closed-retrying",
            Self::ClosedFinal => "closed-final",
        }
    }

    const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// A retry waiting for its timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// 1-based attempt number since the last successful open.
    pub attempt: u32,
    pub due: Instant,
}

/// Identity of the subscription returned by [`ConnectionManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub endpoint: String,
    pub epoch: u64,
}

/// Output of the manager, drained by the session.
#[derive(Debug)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Message(InboundMessage),
    /// Retry budget exhausted. Non-retryable.
    Lost(EvalError),
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ConnectionManager<T: Transport> {
    transport: T,
    policy: ReconnectPolicy,
    state: ConnectionState,
    endpoint: Option<String>,
    epoch: u64,
    attempts: u32,
    retry_at: Option<Instant>,
    last_error: Option<String>,
    torn_down: bool,
    events: VecDeque<ConnectionEvent>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            policy,
            state: ConnectionState::ClosedFinal,
            endpoint: None,
            epoch: 0,
            attempts: 0,
            retry_at: None,
            last_error: None,
            torn_down: false,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Retries made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Most recent transient failure, cleared on a successful open.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scheduled_retry(&self) -> Option<ScheduledRetry> {
        self.retry_at.map(|due| ScheduledRetry {
            attempt: self.attempts + 1,
            due,
        })
    }

    /// When [`ConnectionManager::tick`] next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Open the subscription, replacing any existing one.
    pub fn connect(&mut self, endpoint: &str, now: Instant) -> ConnectionHandle {
        if self.state.is_active() {
            self.transport.close(self.epoch);
        }
        self.torn_down = false;
        self.attempts = 0;
        self.retry_at = None;
        self.last_error = None;
        self.endpoint = Some(endpoint.to_owned());
        info!(endpoint, "connecting live subscription");
        self.open_socket(now);
        ConnectionHandle {
            endpoint: endpoint.to_owned(),
            epoch: self.epoch,
        }
    }

    /// Feed one transport event.
    pub fn handle(&mut self, event: TransportEvent, now: Instant) {
        if self.torn_down || event.epoch() != self.epoch {
            trace!(
                event_epoch = event.epoch(),
                epoch = self.epoch,
                torn_down = self.torn_down,
                "ignoring event from superseded socket"
            );
            return;
        }
        match event {
            TransportEvent::Opened { .. } => {
                if self.state != ConnectionState::Connecting {
                    return;
                }
                if self.attempts > 0 {
                    info!(epoch = self.epoch, attempts = self.attempts, "reconnected");
                } else {
                    info!(epoch = self.epoch, "live subscription open");
                }
                self.attempts = 0;
                self.last_error = None;
                self.transition(ConnectionState::Open);
            }
            TransportEvent::Frame { text, .. } => self.dispatch_frame(&text),
            TransportEvent::Closed { reason, .. } => {
                let detail = reason.unwrap_or_else(|| "connection closed".to_owned());
                self.on_unexpected_close(detail, now);
            }
            TransportEvent::Failed { detail, .. } => self.on_unexpected_close(detail, now),
        }
    }

    /// Fire the pending retry if it is due.
    pub fn tick(&mut self, now: Instant) {
        if self.torn_down || self.state != ConnectionState::ClosedRetrying {
            return;
        }
        let Some(due) = self.retry_at else {
            return;
        };
        if now < due {
            return;
        }
        self.retry_at = None;
        self.attempts += 1;
        info!(
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            "reconnecting"
        );
        self.open_socket(now);
    }

    /// Send a keepalive acknowledgement. Only valid while open.
    pub fn send(&mut self, message: OutboundMessage) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(EvalError::NotConnected);
        }
        let text = message.encode()?;
        self.transport.send_text(self.epoch, &text)
    }

    /// Tear the subscription down. Cancels any pending retry; idempotent.
    pub fn close(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.retry_at = None;
        if self.state.is_active() {
            self.transport.close(self.epoch);
        }
        info!(epoch = self.epoch, "live subscription torn down");
        self.transition(ConnectionState::ClosedFinal);
    }

    pub fn drain_events(&mut self) -> Vec<ConnectionEvent> {
        self.events.drain(..).collect()
    }

    fn open_socket(&mut self, now: Instant) {
        self.epoch += 1;
        self.transition(ConnectionState::Connecting);
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        if let Err(err) = self.transport.open(self.epoch, &endpoint) {
            self.on_unexpected_close(err.to_string(), now);
        }
    }

    fn on_unexpected_close(&mut self, detail: String, now: Instant) {
        if !self.state.is_active() {
            return;
        }
        if self.attempts < self.policy.max_attempts {
            let due = now + self.policy.interval;
            warn!(
                epoch = self.epoch,
                detail = %detail,
                next_attempt = self.attempts + 1,
                delay_ms = self.policy.interval.as_millis() as u64,
                "live subscription closed; retry scheduled"
            );
            self.retry_at = Some(due);
            self.last_error = Some(detail);
            self.transition(ConnectionState::ClosedRetrying);
        } else {
            error!(
                epoch = self.epoch,
                attempts = self.attempts,
                detail = %detail,
                "reconnect budget exhausted"
            );
            self.retry_at = None;
            self.last_error = Some(detail);
            self.transition(ConnectionState::ClosedFinal);
            self.events.push_back(ConnectionEvent::Lost(EvalError::ConnectionLost {
                attempts: self.attempts,
            }));
        }
    }

    fn dispatch_frame(&mut self, text: &str) {
        let decoded = match decode_frame(text) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                return;
            }
        };
        for err in decoded.rejected {
            warn!(error = %err, "dropping malformed message");
        }
        for message in decoded.messages {
            if message == InboundMessage::Ping {
                if let Err(err) = self.send(OutboundMessage::Pong) {
                    warn!(error = %err, "failed to acknowledge ping");
                }
                continue;
            }
            self.events.push_back(ConnectionEvent::Message(message));
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(from = %from, to = %to, epoch = self.epoch, "connection state");
        self.state = to;
        self.events
            .push_back(ConnectionEvent::StateChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "ws://localhost:8000/ws";

    fn manager() -> (ConnectionManager<RecordingTransport>, Instant) {
        let mut manager =
            ConnectionManager::new(RecordingTransport::new(), ReconnectPolicy::default());
        let now = Instant::now();
        manager.connect(ENDPOINT, now);
        (manager, now)
    }

    fn open(manager: &mut ConnectionManager<RecordingTransport>, now: Instant) {
        let epoch = manager.epoch();
        manager.handle(TransportEvent::Opened { epoch }, now);
    }

    fn drop_socket(manager: &mut ConnectionManager<RecordingTransport>, now: Instant) {
        let epoch = manager.epoch();
        manager.handle(
            TransportEvent::Closed {
                epoch,
                reason: None,
            },
            now,
        );
    }

    #[test]
    fn connect_then_open() {
        let (mut manager, now) = manager();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        open(&mut manager, now);
        assert!(manager.is_open());
        let changes: Vec<_> = manager
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![ConnectionState::Connecting, ConnectionState::Open]
        );
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (mut manager, now) = manager();
        open(&mut manager, now);
        manager.handle(
            TransportEvent::Frame {
                epoch: manager.epoch(),
                text: r#"{"type":"ping"}"#.to_owned(),
            },
            now,
        );
        assert_eq!(
            manager.transport().sent,
            vec![(1, r#"{"type":"pong"}"#.to_owned())]
        );
        assert!(
            manager
                .drain_events()
                .iter()
                .all(|e| !matches!(e, ConnectionEvent::Message(_)))
        );
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (mut manager, now) = manager();
        open(&mut manager, now);
        manager.drain_events();
        for text in ["nope", "{}", r#"{"current_result":{"id":1}}"#] {
            manager.handle(
                TransportEvent::Frame {
                    epoch: manager.epoch(),
                    text: text.to_owned(),
                },
                now,
            );
        }
        assert!(manager.drain_events().is_empty());
        assert!(manager.is_open());
    }

    #[test]
    fn retry_fires_after_interval() {
        let (mut manager, now) = manager();
        open(&mut manager, now);
        drop_socket(&mut manager, now);
        assert_eq!(manager.state(), ConnectionState::ClosedRetrying);
        let retry = manager.scheduled_retry().unwrap();
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.due, now + DEFAULT_RECONNECT_INTERVAL);

        manager.tick(now + Duration::from_secs(1));
        assert_eq!(manager.state(), ConnectionState::ClosedRetrying, "not due yet");

        manager.tick(retry.due);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.attempts(), 1);
        assert_eq!(manager.transport().opened.len(), 2);
    }

    #[test]
    fn superseded_epoch_is_ignored() {
        let (mut manager, now) = manager();
        open(&mut manager, now);
        drop_socket(&mut manager, now);
        manager.tick(now + DEFAULT_RECONNECT_INTERVAL);
        manager.handle(TransportEvent::Opened { epoch: 1 }, now);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        manager.handle(
            TransportEvent::Closed {
                epoch: 1,
                reason: None,
            },
            now,
        );
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn refused_open_schedules_retry() {
        let mut manager = ConnectionManager::new(
            RecordingTransport {
                refuse_open: Some("connection refused".to_owned()),
                ..RecordingTransport::default()
            },
            ReconnectPolicy::default(),
        );
        let now = Instant::now();
        manager.connect(ENDPOINT, now);
        assert_eq!(manager.state(), ConnectionState::ClosedRetrying);
        assert_eq!(manager.last_error(), Some("connection error: connection refused"));
    }

    #[test]
    fn close_is_idempotent_and_cancels_retry() {
        let (mut manager, now) = manager();
        open(&mut manager, now);
        drop_socket(&mut manager, now);
        manager.close();
        manager.close();
        assert_eq!(manager.state(), ConnectionState::ClosedFinal);
        assert!(manager.scheduled_retry().is_none());
        manager.tick(now + Duration::from_secs(60));
        assert_eq!(manager.transport().opened.len(), 1);
        assert!(manager.send(OutboundMessage::Pong).is_err());
    }

    #[test]
    fn teardown_while_open_closes_socket_without_retry() {
        let (mut manager, now) = manager();
        open(&mut manager, now);
        manager.close();
        assert_eq!(manager.transport().closed, vec![1]);
        drop_socket(&mut manager, now);
        assert_eq!(manager.state(), ConnectionState::ClosedFinal);
        assert!(manager.scheduled_retry().is_none());
        assert!(
            !manager
                .drain_events()
                .iter()
                .any(|e| matches!(e, ConnectionEvent::Lost(_)))
        );
    }
}
