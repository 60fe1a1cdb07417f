// Host-side networking: listener, per-connection I/O threads, and the event
// loop that owns the session.
//
// Thread layout per hosted session:
// - one accept thread polling a nonblocking listener;
// - one reader thread per connection, decoding frames into the loop channel;
// - one writer thread per connection, draining a bounded queue to the socket;
// - one event loop thread owning the `Session`, the connection table and the
//   chat order counter. Everything reaches it over a single mpsc channel, so
//   no session state is ever locked or shared.
//
// The loop's `recv_timeout` is paced by a sweep deadline: every sweep
// interval it drops peers that have been silent longer than the configured
// heartbeat interval, busy queue or not. Connections that never complete a
// join are swept by the same pass.
//
// Closing a connection has two flavors. A graceful close drops the writer's
// queue sender; the writer drains whatever is still queued (a JoinRejected, a
// protocol error, the session-ended notice) and only then closes the socket.
// A forced close shuts the socket down first, for peers that are unresponsive
// or not draining their queue.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use parlor_protocol::{
    Envelope, ErrorCode, FrameError, Message, PlayerId, RejectReason, SessionInfo, SessionState,
    TickSequence, read_frame, write_frame,
};

use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::session::{ConnectionId, Session};
use crate::sync::ChatRelay;

/// Default listen port for hosted sessions.
pub const DEFAULT_PORT: u16 = 7777;

/// Tuning for one hosted session's network side.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind. Port 0 asks the OS for a free one; the bound port is
    /// reported through `HostHandle::local_addr`.
    pub bind_addr: String,
    pub port: u16,
    /// Longest silence tolerated per connection before it is dropped. Also
    /// the deadline for a fresh connection to complete its join.
    pub heartbeat_interval: Duration,
    /// Depth of each connection's outbound queue. A peer that lets its queue
    /// fill up is dropped rather than allowed to stall the loop.
    pub send_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            heartbeat_interval: Duration::from_secs(5),
            send_queue_depth: 64,
        }
    }
}

/// Join outcome reported back to a local seat request.
pub(crate) type JoinVerdict = std::result::Result<PlayerId, RejectReason>;

/// Requests from the hosting process into the event loop.
pub(crate) enum Control {
    /// Broadcast a stamped snapshot (from `StateSynchronizer::publish`).
    Publish {
        tick: TickSequence,
        snapshot: Vec<u8>,
    },
    /// Seat a player on the hosting process itself (hot-seat play).
    LocalJoin {
        name: String,
        reply: Sender<JoinVerdict>,
    },
    LocalReady {
        player_id: PlayerId,
    },
    LocalChat {
        player_id: PlayerId,
        text: String,
    },
    /// Roster snapshot for registry queries.
    Query {
        reply: Sender<SessionInfo>,
    },
    Stop,
}

/// Everything the event loop can receive, from sockets and from the host.
pub(crate) enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    FrameFrom {
        conn: ConnectionId,
        envelope: Envelope,
    },
    ConnectionClosed {
        conn: ConnectionId,
        cause: CloseCause,
    },
    Control(Control),
}

pub(crate) enum CloseCause {
    /// Peer closed the stream at a frame boundary.
    Graceful,
    /// Peer sent bytes that do not decode as a frame.
    Malformed(String),
    /// Read failed below the framing layer.
    Transport(String),
}

enum ConnState {
    Connecting,
    Open,
}

impl ConnState {
    fn is_open(&self) -> bool {
        matches!(self, ConnState::Open)
    }
}

/// One row in the loop's connection table.
struct Connection {
    state: ConnState,
    /// Feeds this connection's writer thread.
    queue: SyncSender<Message>,
    /// Kept for forced shutdown; reader and writer own their own clones.
    stream: TcpStream,
    last_recv: Instant,
    /// Last inbound envelope sequence, for gap detection.
    last_seq: Option<u64>,
    player: Option<PlayerId>,
}

/// Running network side of one hosted session. Owned by the registry;
/// dropping it stops the loop and joins it.
pub(crate) struct NetworkServer {
    tx: Sender<InternalEvent>,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl NetworkServer {
    /// Bind the listener and start the accept and event loop threads. Binding
    /// happens on the caller's thread so a bad address fails here, not later.
    pub(crate) fn start(
        session: Session,
        config: &ServerConfig,
        events: Sender<SessionEvent>,
    ) -> Result<NetworkServer> {
        let addr = format!("{}:{}", config.bind_addr, config.port);
        let listener = TcpListener::bind(&addr).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();

        let accept_tx = tx.clone();
        let accept_flag = keep_running.clone();
        thread::spawn(move || accept_loop(&listener, &accept_tx, &accept_flag));

        let state = LoopState {
            session,
            connections: BTreeMap::new(),
            next_conn_id: 1,
            chat: ChatRelay::new(),
            events,
            tx: tx.clone(),
            keep_running,
            config: config.clone(),
        };
        let thread = thread::spawn(move || run_session_loop(state, &rx));

        info!(%local_addr, "session listening");
        Ok(NetworkServer {
            tx,
            local_addr,
            thread: Some(thread),
        })
    }

    pub(crate) fn control(&self) -> Sender<InternalEvent> {
        self.tx.clone()
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Roster snapshot from the live loop, or `None` once it has exited.
    pub(crate) fn info(&self) -> Option<SessionInfo> {
        let (reply, verdict) = mpsc::channel();
        self.tx
            .send(InternalEvent::Control(Control::Query { reply }))
            .ok()?;
        verdict.recv().ok()
    }

    /// End the session: notify every client, close every connection, release
    /// the listener, and join the loop thread. Safe to call twice.
    pub(crate) fn stop(&mut self) {
        let _ = self.tx.send(InternalEvent::Control(Control::Stop));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How often the loop sweeps silent connections. A fraction of the heartbeat
/// interval, clamped so tests with very short intervals still get timely
/// sweeps without spinning.
fn sweep_interval(heartbeat: Duration) -> Duration {
    (heartbeat / 4).clamp(Duration::from_millis(10), Duration::from_millis(250))
}

fn accept_loop(listener: &TcpListener, tx: &Sender<InternalEvent>, keep_running: &AtomicBool) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!(%addr, "inbound connection");
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                if tx.send(InternalEvent::NewConnection { stream }).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!(error = %e, "accept failed, listener closing");
                break;
            }
        }
    }
}

fn reader_loop(
    stream: TcpStream,
    conn: ConnectionId,
    tx: &Sender<InternalEvent>,
    keep_running: &AtomicBool,
) {
    let mut reader = BufReader::new(stream);
    while keep_running.load(Ordering::SeqCst) {
        match read_frame(&mut reader) {
            Ok(envelope) => {
                if tx.send(InternalEvent::FrameFrom { conn, envelope }).is_err() {
                    break;
                }
            }
            Err(err) => {
                let cause = match err {
                    FrameError::Closed => CloseCause::Graceful,
                    FrameError::Io(e) => CloseCause::Transport(e.to_string()),
                    other => CloseCause::Malformed(other.to_string()),
                };
                let _ = tx.send(InternalEvent::ConnectionClosed { conn, cause });
                break;
            }
        }
    }
}

/// Drain the queue to the socket, stamping per-connection sequence numbers in
/// send order. Exits when the queue's senders are gone (after writing out
/// anything still buffered) or when a write fails; closes the socket either
/// way, which is what finally unblocks the matching reader.
fn writer_loop(stream: TcpStream, queue: &Receiver<Message>) {
    let mut writer = BufWriter::new(stream);
    let mut seq = 0u64;
    while let Ok(message) = queue.recv() {
        seq += 1;
        if let Err(e) = write_frame(&mut writer, &Envelope::new(seq, message)) {
            debug!(error = %e, "send loop ending");
            break;
        }
    }
    let _ = writer.get_ref().shutdown(Shutdown::Both);
}

struct LoopState {
    session: Session,
    connections: BTreeMap<ConnectionId, Connection>,
    next_conn_id: u64,
    chat: ChatRelay,
    events: Sender<SessionEvent>,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
    config: ServerConfig,
}

fn run_session_loop(mut state: LoopState, rx: &Receiver<InternalEvent>) {
    let sweep = sweep_interval(state.config.heartbeat_interval);
    debug!(session = state.session.id(), "session loop started");
    let mut next_sweep = Instant::now() + sweep;
    while state.keep_running.load(Ordering::SeqCst) {
        let wait = next_sweep.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(event) => {
                state.handle_event(event);
                while let Ok(event) = rx.try_recv() {
                    state.handle_event(event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        // The sweep runs on its deadline whether or not traffic kept the
        // queue busy; steady heartbeats must not starve it.
        if Instant::now() >= next_sweep {
            state.sweep_silent_connections();
            next_sweep = Instant::now() + sweep;
        }
    }
    debug!(session = state.session.id(), "session loop exited");
}

impl LoopState {
    fn handle_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::NewConnection { stream } => self.accept_connection(stream),
            InternalEvent::FrameFrom { conn, envelope } => self.handle_frame(conn, envelope),
            InternalEvent::ConnectionClosed { conn, cause } => self.handle_closed(conn, &cause),
            InternalEvent::Control(control) => self.handle_control(control),
        }
    }

    fn accept_connection(&mut self, stream: TcpStream) {
        if self.session.state() == SessionState::Ended {
            // Dropping the stream closes it; the peer sees a dead socket.
            return;
        }
        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "dropping connection, clone failed");
                return;
            }
        };
        let writer_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "dropping connection, clone failed");
                return;
            }
        };

        let conn = ConnectionId(self.next_conn_id);
        self.next_conn_id += 1;

        let (queue, queue_rx) = mpsc::sync_channel(self.config.send_queue_depth);
        thread::spawn(move || writer_loop(writer_stream, &queue_rx));

        let tx = self.tx.clone();
        let keep_running = self.keep_running.clone();
        thread::spawn(move || reader_loop(reader_stream, conn, &tx, &keep_running));

        let now = Instant::now();
        self.connections.insert(
            conn,
            Connection {
                state: ConnState::Connecting,
                queue,
                stream,
                last_recv: now,
                last_seq: None,
                player: None,
            },
        );
        debug!(conn = conn.0, "connection accepted, awaiting join");
    }

    fn handle_frame(&mut self, conn: ConnectionId, envelope: Envelope) {
        let (open, player) = {
            let Some(entry) = self.connections.get_mut(&conn) else {
                // Already torn down; the reader just hadn't noticed yet.
                return;
            };
            entry.last_recv = Instant::now();
            let expected = entry.last_seq.map_or(1, |seq| seq + 1);
            if envelope.seq != expected {
                warn!(
                    conn = conn.0,
                    got = envelope.seq,
                    expected,
                    "sequence gap on connection"
                );
            }
            entry.last_seq = Some(envelope.seq);
            (entry.state.is_open(), entry.player)
        };

        if !open {
            match envelope.message {
                Message::Join { name } => self.handle_join(conn, &name),
                // Nothing but a join means anything before the handshake.
                other => debug!(conn = conn.0, ?other, "frame before join discarded"),
            }
            return;
        }

        let Some(player_id) = player else {
            return;
        };
        self.session.touch(player_id);
        match envelope.message {
            Message::Heartbeat => {}
            Message::PlayerReady => {
                if self.session.set_ready(player_id) {
                    debug!(player = player_id.0, "player ready");
                    let _ = self.events.send(SessionEvent::PlayerReady { player_id });
                }
            }
            // The sender's identity and the order stamp come from the host,
            // not from the wire; clients cannot speak for other players.
            Message::ChatText { text, .. } => self.relay_chat(Some(conn), player_id, text),
            Message::PlayerLeft { player_id: claimed } => {
                if claimed == player_id {
                    info!(player = player_id.0, "player leaving");
                    self.drop_connection(conn, false);
                } else {
                    self.protocol_violation(conn, "PlayerLeft for another player");
                }
            }
            Message::Join { .. } => self.protocol_violation(conn, "second Join on an open connection"),
            Message::StateUpdate { .. } => self.protocol_violation(conn, "StateUpdate from a client"),
            Message::JoinAccepted { .. } | Message::JoinRejected { .. } | Message::Error { .. } => {
                self.protocol_violation(conn, "host-only message from a client");
            }
        }
    }

    fn handle_join(&mut self, conn: ConnectionId, name: &str) {
        match self.session.add_player(name, Some(conn)) {
            Ok(player_id) => {
                if let Some(entry) = self.connections.get_mut(&conn) {
                    // Open before announcing, so the join broadcast below is
                    // the first frame this connection ever receives.
                    entry.state = ConnState::Open;
                    entry.player = Some(player_id);
                }
                info!(
                    session = self.session.id(),
                    player = player_id.0,
                    name,
                    "player joined"
                );
                self.announce_player(player_id);
            }
            Err(reason) => {
                info!(conn = conn.0, %reason, "join refused");
                self.send_to(conn, Message::JoinRejected { reason });
                self.drop_connection(conn, false);
            }
        }
    }

    /// Broadcast `JoinAccepted` with the updated roster. The joining side
    /// reads it as its verdict; every established client reads it as a
    /// roster change.
    fn announce_player(&mut self, player_id: PlayerId) {
        let session = self.session.info();
        let player = session.players.iter().find(|p| p.id == player_id).cloned();
        self.broadcast(Message::JoinAccepted { player_id, session });
        if let Some(player) = player {
            let _ = self.events.send(SessionEvent::PlayerJoined { player });
        }
    }

    /// Stamp one chat line and fan it out. `from` is the sending connection,
    /// excluded from the broadcast; chat from a locally seated player has no
    /// connection and goes to everyone.
    fn relay_chat(&mut self, from: Option<ConnectionId>, player_id: PlayerId, text: String) {
        if self.session.player(player_id).is_none() {
            warn!(player = player_id.0, "chat from unknown player dropped");
            return;
        }
        let order = self.chat.stamp();
        debug!(player = player_id.0, order = order.0, "chat relayed");
        self.broadcast_except(
            from,
            Message::ChatText {
                player_id,
                order,
                text: text.clone(),
            },
        );
        let _ = self.events.send(SessionEvent::ChatReceived {
            player_id,
            order,
            text,
        });
    }

    fn handle_closed(&mut self, conn: ConnectionId, cause: &CloseCause) {
        if !self.connections.contains_key(&conn) {
            return;
        }
        match cause {
            CloseCause::Graceful => debug!(conn = conn.0, "connection closed by peer"),
            CloseCause::Malformed(detail) => {
                warn!(conn = conn.0, %detail, "closing connection after malformed frame");
            }
            CloseCause::Transport(detail) => warn!(conn = conn.0, %detail, "connection lost"),
        }
        self.drop_connection(conn, true);
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Publish { tick, snapshot } => {
                if self.session.record_snapshot(tick, snapshot.clone()) {
                    debug!(tick = tick.0, bytes = snapshot.len(), "state broadcast");
                    self.broadcast(Message::StateUpdate { tick, snapshot });
                } else {
                    warn!(
                        session = self.session.id(),
                        tick = tick.0,
                        state = ?self.session.state(),
                        "snapshot ignored, session is not running"
                    );
                }
            }
            Control::LocalJoin { name, reply } => {
                let verdict = self.session.add_player(&name, None);
                if let Ok(player_id) = verdict {
                    info!(
                        session = self.session.id(),
                        player = player_id.0,
                        "local player seated"
                    );
                    self.announce_player(player_id);
                }
                let _ = reply.send(verdict);
            }
            Control::LocalReady { player_id } => {
                if self.session.set_ready(player_id) {
                    let _ = self.events.send(SessionEvent::PlayerReady { player_id });
                }
            }
            Control::LocalChat { player_id, text } => self.relay_chat(None, player_id, text),
            Control::Query { reply } => {
                let _ = reply.send(self.session.info());
            }
            Control::Stop => self.shutdown(),
        }
    }

    /// Report a client that broke the message rules: tell it why, close its
    /// connection, and treat its player as departed.
    fn protocol_violation(&mut self, conn: ConnectionId, detail: &str) {
        warn!(conn = conn.0, detail, "protocol violation");
        self.send_to(
            conn,
            Message::Error {
                code: ErrorCode::ProtocolViolation,
                detail: detail.to_string(),
            },
        );
        self.drop_connection(conn, false);
    }

    fn broadcast(&mut self, message: Message) {
        self.broadcast_except(None, message);
    }

    fn broadcast_except(&mut self, except: Option<ConnectionId>, message: Message) {
        let mut dropped: Vec<ConnectionId> = Vec::new();
        for (&conn, entry) in &self.connections {
            if !entry.state.is_open() || Some(conn) == except {
                continue;
            }
            match entry.queue.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(conn = conn.0, "outbound queue full, dropping slow connection");
                    dropped.push(conn);
                }
                Err(TrySendError::Disconnected(_)) => dropped.push(conn),
            }
        }
        for conn in dropped {
            self.drop_connection(conn, true);
        }
    }

    /// Queue one message for one connection, open or not. Used for join
    /// verdicts and error notices; a full queue here means the peer is gone
    /// in all but name.
    fn send_to(&mut self, conn: ConnectionId, message: Message) {
        let failed = match self.connections.get(&conn) {
            Some(entry) => entry.queue.try_send(message).is_err(),
            None => return,
        };
        if failed {
            self.drop_connection(conn, true);
        }
    }

    /// Remove a connection from the table and, if it was seated, unseat the
    /// player and tell everyone. `force` shuts the socket down immediately;
    /// otherwise the writer flushes its queue first.
    fn drop_connection(&mut self, conn: ConnectionId, force: bool) {
        let Some(entry) = self.connections.remove(&conn) else {
            return;
        };
        if force {
            let _ = entry.stream.shutdown(Shutdown::Both);
        }
        let player = entry.player;
        drop(entry);
        if let Some(player_id) = player {
            self.drop_player_record(player_id);
        }
    }

    fn drop_player_record(&mut self, player_id: PlayerId) {
        let Some(removed) = self.session.remove_player(player_id) else {
            return;
        };
        info!(
            session = self.session.id(),
            player = player_id.0,
            name = %removed.name,
            "player left"
        );
        self.broadcast(Message::PlayerLeft { player_id });
        let _ = self.events.send(SessionEvent::PlayerLeft {
            player_id,
            name: removed.name,
        });
    }

    /// Periodic sweep: drop connections silent for longer than the heartbeat
    /// interval. Seated players leave loudly, connections that never joined
    /// are discarded quietly.
    fn sweep_silent_connections(&mut self) {
        let now = Instant::now();
        let limit = self.config.heartbeat_interval;
        let expired: Vec<(ConnectionId, bool)> = self
            .connections
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_recv) >= limit)
            .map(|(&conn, entry)| (conn, entry.state.is_open()))
            .collect();
        for (conn, was_open) in expired {
            if was_open {
                info!(conn = conn.0, "heartbeat silence, dropping connection");
            } else {
                debug!(conn = conn.0, "join deadline passed, dropping connection");
            }
            self.drop_connection(conn, true);
        }
    }

    /// End of session: mark it Ended, notify every client, close everything,
    /// and stop the accept thread. The writers flush the notice before the
    /// sockets close.
    fn shutdown(&mut self) {
        info!(session = self.session.id(), "session ending");
        self.session.end();
        self.broadcast(Message::Error {
            code: ErrorCode::SessionEnded,
            detail: "session ended by host".to_string(),
        });
        let _ = self.events.send(SessionEvent::SessionEnded);
        self.connections.clear();
        self.keep_running.store(false, Ordering::SeqCst);
    }
}
