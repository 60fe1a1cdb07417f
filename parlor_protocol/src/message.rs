// Protocol messages exchanged between a session host and its clients.
//
// One `Message` enum defines the full protocol vocabulary; direction rules
// (which side may send which variant) are enforced by the host, not by the
// type system — a client sending a host-only variant is a protocol violation
// and loses its connection. Supporting structs (`PlayerInfo`, `SessionInfo`)
// describe the roster snapshot carried by `JoinAccepted`. All types derive
// `Serialize`/`Deserialize` for JSON framing (see `framing.rs`).
//
// Game-state snapshots are opaque byte payloads (`Vec<u8>`) — the session
// layer never inspects them. This keeps the protocol crate independent of any
// game engine: engines serialize state before publishing and deserialize on
// receipt.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ChatOrder, PlayerId, SessionState, TickSequence};

/// The unit of wire exchange between host and clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Request to join a session (handshake, client to host).
    Join { name: String },
    /// A player was seated. Broadcast to every connection: the joining client
    /// reads its own id and the roster from it, established clients treat it
    /// as the roster change.
    JoinAccepted {
        player_id: PlayerId,
        session: SessionInfo,
    },
    /// Join refused; the connection closes after this message.
    JoinRejected { reason: RejectReason },
    /// The sender's lobby ready flag is now set (client to host).
    PlayerReady,
    /// Authoritative game state for one tick (host to clients).
    StateUpdate {
        tick: TickSequence,
        snapshot: Vec<u8>,
    },
    /// Chat line. `order` is stamped by the host before relay; senders set 0.
    ChatText {
        player_id: PlayerId,
        order: ChatOrder,
        text: String,
    },
    /// A player left the session (host to clients). A client sends it with
    /// its own id to announce graceful departure.
    PlayerLeft { player_id: PlayerId },
    /// Liveness signal (client to host) while the send queue is idle.
    Heartbeat,
    /// Terminal error notice; the connection closes after this message.
    Error { code: ErrorCode, detail: String },
}

/// Why a `Join` was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The session already holds its maximum player count.
    CapacityExceeded,
    /// The session is not in Lobby (game underway or ended).
    NotJoinable,
    /// Display name empty or over the length bound.
    InvalidName,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::CapacityExceeded => "session is full",
            RejectReason::NotJoinable => "session is not accepting joins",
            RejectReason::InvalidName => "invalid display name",
        };
        f.write_str(s)
    }
}

/// Code carried by `Message::Error` just before the host closes a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The peer sent a variant it is not allowed to send.
    ProtocolViolation,
    /// The host ended the session.
    SessionEnded,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ProtocolViolation => "protocol violation",
            ErrorCode::SessionEnded => "session ended",
        };
        f.write_str(s)
    }
}

/// Public identity of one seated player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub ready: bool,
}

/// Point-in-time snapshot of a session's identity and roster. Carried inside
/// `JoinAccepted` and returned by the host-side registry queries; players are
/// listed in join order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub game_id: String,
    pub mode: String,
    pub state: SessionState,
    pub max_players: u32,
    pub players: Vec<PlayerInfo>,
}
