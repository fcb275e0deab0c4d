//! WebSocket transport: one reader thread per socket.
//!
//! Every socket the connection manager opens gets its own thread and its
//! epoch. The thread reports `Opened`, `Frame`, `Closed` and `Failed` events
//! tagged with that epoch into the driver's input channel, so a late event
//! from a replaced socket is recognised and dropped by the manager. Outbound
//! text and close requests reach the thread over a per-socket channel that
//! it polls between reads.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread;
use std::time::Duration;

use evalboard_core::{SessionInput, Transport, TransportEvent};
use evalboard_error::{EvalError, Result};
use tracing::{debug, trace, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// How long a read blocks before the thread checks for outbound work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug)]
pub struct WsTransport {
    events: Sender<SessionInput>,
    current: Option<(u64, Sender<Outbound>)>,
    poll_interval: Duration,
}

impl WsTransport {
    pub fn new(events: Sender<SessionInput>) -> Self {
        Self {
            events,
            current: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, epoch: u64, endpoint: &str) -> Result<()> {
        let (outbound_tx, outbound_rx) = channel();
        let events = self.events.clone();
        let endpoint = endpoint.to_owned();
        let poll_interval = self.poll_interval;
        thread::Builder::new()
            .name(format!("evalboard-ws-{epoch}"))
            .spawn(move || run_socket(epoch, &endpoint, &events, &outbound_rx, poll_interval))
            .map_err(|err| EvalError::connection(format!("failed to spawn socket thread: {err}")))?;
        if let Some((previous, sender)) = self.current.replace((epoch, outbound_tx)) {
            debug!(previous, epoch, "replacing socket");
            let _ = sender.send(Outbound::Close);
        }
        Ok(())
    }

    fn send_text(&mut self, epoch: u64, text: &str) -> Result<()> {
        match &self.current {
            Some((current, sender)) if *current == epoch => sender
                .send(Outbound::Text(text.to_owned()))
                .map_err(|_| EvalError::connection("socket thread has exited")),
            _ => Err(EvalError::NotConnected),
        }
    }

    fn close(&mut self, epoch: u64) {
        if self.current.as_ref().is_some_and(|(current, _)| *current == epoch) {
            if let Some((_, sender)) = self.current.take() {
                let _ = sender.send(Outbound::Close);
            }
        }
    }
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

fn run_socket(
    epoch: u64,
    endpoint: &str,
    events: &Sender<SessionInput>,
    outbound: &Receiver<Outbound>,
    poll_interval: Duration,
) {
    let emit = |event: TransportEvent| events.send(SessionInput::Transport(event)).is_ok();

    let mut socket = match tungstenite::connect(endpoint) {
        Ok((socket, response)) => {
            debug!(epoch, status = response.status().as_u16(), "websocket handshake complete");
            socket
        }
        Err(err) => {
            emit(TransportEvent::Failed {
                epoch,
                detail: err.to_string(),
            });
            return;
        }
    };
    if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
        if let Err(err) = stream.set_read_timeout(Some(poll_interval)) {
            warn!(epoch, error = %err, "failed to set socket read timeout");
        }
    }
    if !emit(TransportEvent::Opened { epoch }) {
        shutdown(&mut socket, epoch);
        return;
    }

    loop {
        match drain_outbound(&mut socket, outbound) {
            Ok(true) => {}
            Ok(false) => {
                shutdown(&mut socket, epoch);
                return;
            }
            Err(err) => {
                emit(TransportEvent::Failed {
                    epoch,
                    detail: err.to_string(),
                });
                return;
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                trace!(epoch, bytes = text.len(), "frame received");
                if !emit(TransportEvent::Frame { epoch, text }) {
                    shutdown(&mut socket, epoch);
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                emit(TransportEvent::Closed { epoch, reason });
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                emit(TransportEvent::Closed {
                    epoch,
                    reason: None,
                });
                return;
            }
            Err(err) => {
                emit(TransportEvent::Failed {
                    epoch,
                    detail: err.to_string(),
                });
                return;
            }
        }
    }
}

/// Send queued outbound text. Returns `Ok(false)` once the socket should
/// be closed.
fn drain_outbound(socket: &mut Socket, outbound: &Receiver<Outbound>) -> tungstenite::Result<bool> {
    loop {
        match outbound.try_recv() {
            Ok(Outbound::Text(text)) => socket.send(Message::Text(text))?,
            Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => return Ok(false),
            Err(TryRecvError::Empty) => return Ok(true),
        }
    }
}

fn shutdown(socket: &mut Socket, epoch: u64) {
    if let Err(err) = socket.close(None) {
        trace!(epoch, error = %err, "close handshake not sent");
    }
    let _ = socket.flush();
    debug!(epoch, "socket closed locally");
}
