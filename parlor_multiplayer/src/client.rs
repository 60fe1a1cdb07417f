// Client-side networking: connect, join handshake, and the per-connection
// reader and writer threads.
//
// `connect` is synchronous: it dials the host, sends `Join`, and blocks until
// the host's verdict or the caller's deadline. Only after `JoinAccepted` does
// it spawn the two I/O threads and hand back a `NetworkClient`.
//
// The reader thread turns inbound frames into `SessionEvent`s. It keeps its
// own roster copy (updated from `JoinAccepted` and `PlayerLeft`) so departure
// events can carry the player's name, and runs every `StateUpdate` through a
// `TickGate` so duplicates and stragglers never reach the application. The
// stream ends when the connection does: after an end-of-session notice the
// final event is `SessionEnded`, after a failure it is `ConnectionError`, and
// after our own `leave` there is no final event at all.
//
// The writer thread drains the outbound queue and, when it has been idle for
// one heartbeat period, sends `Heartbeat` on its own — the host drops peers
// that go silent, so liveness must not depend on the application chatting.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use parlor_protocol::{
    ChatOrder, Envelope, ErrorCode, FrameError, Message, PlayerId, PlayerInfo, RejectReason,
    SessionInfo, read_frame, write_frame,
};

use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::session::MAX_NAME_LEN;
use crate::sync::TickGate;

/// Tuning for one client connection.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Deadline for the whole of `connect`: dialing plus awaiting the verdict.
    pub connect_timeout: Duration,
    /// Idle gap after which the writer sends a `Heartbeat`. Must be well
    /// under the host's silence tolerance.
    pub heartbeat_period: Duration,
    /// Depth of the outbound queue.
    pub send_queue_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_period: Duration::from_secs(1),
            send_queue_depth: 64,
        }
    }
}

/// A joined connection to a hosted session.
#[derive(Debug)]
pub struct NetworkClient {
    player_id: PlayerId,
    session: SessionInfo,
    stream: TcpStream,
    outbox: SyncSender<Message>,
    inbox: Receiver<SessionEvent>,
    open: Arc<AtomicBool>,
    leaving: Arc<AtomicBool>,
    _reader_thread: Option<JoinHandle<()>>,
    _writer_thread: Option<JoinHandle<()>>,
}

impl NetworkClient {
    /// Dial `address:port`, perform the join handshake as `display_name`, and
    /// return a live client.
    ///
    /// The display name is validated locally before any I/O, so a bad name
    /// fails with `JoinRejected(InvalidName)` even when the host is down.
    /// `ConnectTimeout` means the deadline passed without a verdict; a
    /// rejection by the host comes back as `JoinRejected`.
    pub fn connect(
        address: &str,
        port: u16,
        display_name: &str,
        config: &ClientConfig,
    ) -> Result<NetworkClient> {
        let name = display_name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(Error::JoinRejected(RejectReason::InvalidName));
        }

        let mut addrs = (address, port).to_socket_addrs()?;
        let Some(addr) = addrs.next() else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{address}:{port} did not resolve"),
            )));
        };
        let deadline = Instant::now() + config.connect_timeout;
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                Error::ConnectTimeout
            } else {
                Error::Io(e)
            }
        })?;
        // The dial and the verdict wait share the one deadline. Bound the
        // handshake read by what is left; cleared again before normal
        // operation.
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::ConnectTimeout);
        }
        stream.set_read_timeout(Some(remaining))?;

        let mut writer = BufWriter::new(stream.try_clone()?);
        let mut reader = BufReader::new(stream.try_clone()?);
        write_frame(&mut writer, &Envelope::new(1, Message::Join { name: name.into() }))?;

        // Nothing is broadcast to a connection before its verdict, so the
        // first frame is always ours.
        let envelope = match read_frame(&mut reader) {
            Ok(envelope) => envelope,
            Err(FrameError::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(Error::ConnectTimeout);
            }
            Err(e) => return Err(e.into()),
        };
        let (player_id, session) = match envelope.message {
            Message::JoinAccepted { player_id, session } => (player_id, session),
            Message::JoinRejected { reason } => return Err(Error::JoinRejected(reason)),
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "expected a join verdict, got {other:?}"
                )));
            }
        };
        stream.set_read_timeout(None)?;

        info!(
            player = player_id.0,
            session = %session.session_id,
            "joined session"
        );

        let open = Arc::new(AtomicBool::new(true));
        let leaving = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::sync_channel(config.send_queue_depth);

        let roster = session.players.clone();
        let reader_open = open.clone();
        let reader_leaving = leaving.clone();
        let last_seq = envelope.seq;
        let reader_thread = thread::spawn(move || {
            reader_loop(reader, &event_tx, &reader_open, &reader_leaving, last_seq, roster);
        });

        let writer_open = open.clone();
        let heartbeat_period = config.heartbeat_period;
        let writer_thread = thread::spawn(move || {
            // The join consumed sequence 1.
            writer_loop(writer, &out_rx, heartbeat_period, &writer_open, 2);
        });

        Ok(NetworkClient {
            player_id,
            session,
            stream,
            outbox: out_tx,
            inbox: event_rx,
            open,
            leaving,
            _reader_thread: Some(reader_thread),
            _writer_thread: Some(writer_thread),
        })
    }

    /// Identifier the host assigned to this player.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Session identity and roster as of the join. Later changes arrive as
    /// events.
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Whether the connection was still open at the last I/O.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Enqueue one message. Never blocks: a queue the host is not draining
    /// means the connection is dead in all but name, so it is closed and the
    /// send fails.
    pub fn send(&self, message: Message) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        match self.outbox.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("outbound queue full, closing connection");
                self.open.store(false, Ordering::SeqCst);
                let _ = self.stream.shutdown(Shutdown::Both);
                Err(Error::NotConnected)
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::NotConnected),
        }
    }

    /// Set this player's lobby ready flag.
    pub fn send_ready(&self) -> Result<()> {
        self.send(Message::PlayerReady)
    }

    /// Send a chat line. The host stamps the display order; the order sent
    /// here is a placeholder.
    pub fn send_chat(&self, text: &str) -> Result<()> {
        self.send(Message::ChatText {
            player_id: self.player_id,
            order: ChatOrder(0),
            text: text.to_string(),
        })
    }

    /// Announce departure. The host unseats the player and closes the
    /// connection; the event stream then simply ends.
    pub fn leave(&self) -> Result<()> {
        self.leaving.store(true, Ordering::SeqCst);
        self.send(Message::PlayerLeft {
            player_id: self.player_id,
        })
    }

    /// Drain whatever events have arrived, without blocking.
    pub fn poll(&self) -> Vec<SessionEvent> {
        self.inbox.try_iter().collect()
    }

    /// Blocking event stream. Yields events in arrival order and ends when
    /// the connection closes.
    pub fn events(&self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.inbox.iter()
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        // Abrupt teardown; call `leave` first for a graceful departure.
        self.leaving.store(true, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn reader_loop(
    mut reader: BufReader<TcpStream>,
    events: &mpsc::Sender<SessionEvent>,
    open: &AtomicBool,
    leaving: &AtomicBool,
    mut last_seq: u64,
    mut roster: Vec<PlayerInfo>,
) {
    let mut gate = TickGate::new();
    loop {
        match read_frame(&mut reader) {
            Ok(envelope) => {
                if envelope.seq != last_seq + 1 {
                    warn!(
                        got = envelope.seq,
                        expected = last_seq + 1,
                        "sequence gap from host"
                    );
                }
                last_seq = envelope.seq;
                match envelope.message {
                    Message::StateUpdate { tick, snapshot } => {
                        if gate.admit(tick) {
                            if events
                                .send(SessionEvent::StateUpdate { tick, snapshot })
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            debug!(tick = tick.0, "stale state update dropped");
                        }
                    }
                    Message::ChatText {
                        player_id,
                        order,
                        text,
                    } => {
                        if events
                            .send(SessionEvent::ChatReceived {
                                player_id,
                                order,
                                text,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Message::JoinAccepted { player_id, session } => {
                        let Some(player) =
                            session.players.iter().find(|p| p.id == player_id).cloned()
                        else {
                            warn!(player = player_id.0, "join notice without roster entry");
                            continue;
                        };
                        roster = session.players;
                        if events.send(SessionEvent::PlayerJoined { player }).is_err() {
                            break;
                        }
                    }
                    Message::PlayerLeft { player_id } => {
                        let name = roster
                            .iter()
                            .find(|p| p.id == player_id)
                            .map(|p| p.name.clone())
                            .unwrap_or_default();
                        roster.retain(|p| p.id != player_id);
                        if events
                            .send(SessionEvent::PlayerLeft { player_id, name })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Message::Error { code, detail } => {
                        if code == ErrorCode::SessionEnded {
                            info!("session ended by host");
                            let _ = events.send(SessionEvent::SessionEnded);
                        } else {
                            warn!(%code, %detail, "host reported an error");
                            let _ = events.send(SessionEvent::ConnectionError {
                                detail: format!("{code}: {detail}"),
                            });
                        }
                        break;
                    }
                    // Client-to-host variants; a host never sends these.
                    other @ (Message::Join { .. }
                    | Message::JoinRejected { .. }
                    | Message::PlayerReady
                    | Message::Heartbeat) => {
                        debug!(?other, "ignoring unexpected frame from host");
                    }
                }
            }
            Err(FrameError::Closed) => {
                if !leaving.load(Ordering::SeqCst) {
                    let _ = events.send(SessionEvent::ConnectionError {
                        detail: "connection closed by host".to_string(),
                    });
                }
                break;
            }
            Err(FrameError::Io(e)) => {
                if !leaving.load(Ordering::SeqCst) {
                    let _ = events.send(SessionEvent::ConnectionError {
                        detail: e.to_string(),
                    });
                }
                break;
            }
            Err(e) => {
                let _ = events.send(SessionEvent::ConnectionError {
                    detail: e.to_string(),
                });
                break;
            }
        }
    }
    open.store(false, Ordering::SeqCst);
    // Dropping `events` here is what ends the application's stream.
}

fn writer_loop(
    mut writer: BufWriter<TcpStream>,
    outbox: &Receiver<Message>,
    heartbeat_period: Duration,
    open: &AtomicBool,
    mut next_seq: u64,
) {
    loop {
        let message = match outbox.recv_timeout(heartbeat_period) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => Message::Heartbeat,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let envelope = Envelope::new(next_seq, message);
        next_seq += 1;
        if let Err(e) = write_frame(&mut writer, &envelope) {
            debug!(error = %e, "send loop ending");
            break;
        }
    }
    open.store(false, Ordering::SeqCst);
    let _ = writer.get_ref().shutdown(Shutdown::Both);
}
