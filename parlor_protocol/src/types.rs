// Core ID types for the multiplayer protocol.
//
// Lightweight newtypes shared by `message.rs` (wire messages) and the session
// bookkeeping in `parlor_multiplayer`. Hosts assign compact integer ids to
// players; the tick and chat-order counters are session-scoped and strictly
// monotonic.

use serde::{Deserialize, Serialize};

/// Host-assigned player id, unique within one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

/// Monotonically increasing snapshot counter, starting at 1 per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TickSequence(pub u64);

/// Host-assigned chat ordering index, monotonic per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatOrder(pub u64);

/// Session lifecycle state. `Ended` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Accepting joins; players signal readiness here.
    Lobby,
    /// Every seated player is ready; awaiting the first snapshot.
    Ready,
    /// The game engine is publishing snapshots.
    Running,
    /// Ended by the host. No further mutation.
    Ended,
}
