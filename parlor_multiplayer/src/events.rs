// Application-facing session events.
//
// Both sides surface multiplayer activity through one ordered stream of
// `SessionEvent`s: the host handle emits them from the session event loop,
// the client from its reader thread. Menu UI, rendering, and the active game
// engine observe multiplayer state exclusively through this stream.
//
// Side notes: `StateUpdate` appears only on the client stream (the host's
// engine is its source and would only hear its own echo); `PlayerReady`
// appears only on the host stream (readiness is not relayed to clients).

use parlor_protocol::{ChatOrder, PlayerId, PlayerInfo, TickSequence};

/// One observable multiplayer occurrence.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A player was seated — a remote join or a host-seated local player.
    PlayerJoined { player: PlayerInfo },
    /// A player's lobby ready flag is now set.
    PlayerReady { player_id: PlayerId },
    /// Authoritative game state for one tick. Stale and duplicate ticks are
    /// dropped before reaching the stream.
    StateUpdate {
        tick: TickSequence,
        snapshot: Vec<u8>,
    },
    /// A stamped chat line; `order` is the one consistent display order.
    ChatReceived {
        player_id: PlayerId,
        order: ChatOrder,
        text: String,
    },
    /// A player left. Graceful departure, heartbeat silence, and a dropped
    /// connection all look the same to observers.
    PlayerLeft { player_id: PlayerId, name: String },
    /// The host ended the session. Terminal.
    SessionEnded,
    /// The local connection failed. Terminal on the client stream.
    ConnectionError { detail: String },
}
