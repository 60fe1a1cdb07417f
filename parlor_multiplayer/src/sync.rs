// Ordering counters bridging the game engine to the broadcast path.
//
// Three small types, one per ordering concern:
// - `StateSynchronizer`: host side. Owned by the embedding game engine via
//   `HostHandle::take_synchronizer`; stamps each published snapshot with the
//   next tick sequence and hands it to the session event loop. `&mut self` on
//   `publish` is the single-writer guarantee — there is exactly one
//   synchronizer per session and one caller driving it.
// - `ChatRelay`: host side. Stamps every chat line (remote or local) with the
//   session-wide order index so all clients display chat in one order
//   regardless of arrival jitter. Driven only by the event loop.
// - `TickGate`: client side. Admits a `StateUpdate` only when its tick is
//   strictly newer than the last admitted one, so duplicate and reordered
//   delivery never reaches the application.

use std::sync::mpsc::Sender;

use parlor_protocol::{ChatOrder, TickSequence};

use crate::error::{Error, Result};
use crate::server::{Control, InternalEvent};

/// Host-side publisher for authoritative game state.
///
/// Obtained once per session from `HostHandle::take_synchronizer`. The engine
/// calls `publish` once per simulation tick.
pub struct StateSynchronizer {
    next_tick: u64,
    control: Sender<InternalEvent>,
}

impl StateSynchronizer {
    pub(crate) fn new(control: Sender<InternalEvent>) -> Self {
        Self {
            next_tick: 0,
            control,
        }
    }

    /// Stamp `snapshot` with the next tick sequence (1, 2, 3, …) and hand it
    /// to the session loop for broadcast. Returns the assigned tick.
    ///
    /// The loop drops publishes against a session that is not Ready/Running,
    /// so assigned ticks are strictly increasing but the broadcast ticks may
    /// start above 1 if the engine published into the lobby.
    pub fn publish(&mut self, snapshot: Vec<u8>) -> Result<TickSequence> {
        self.next_tick += 1;
        let tick = TickSequence(self.next_tick);
        self.control
            .send(InternalEvent::Control(Control::Publish { tick, snapshot }))
            .map_err(|_| Error::SessionClosed)?;
        Ok(tick)
    }
}

/// Host-side chat order stamp, monotonic per session starting at 1.
#[derive(Default)]
pub struct ChatRelay {
    next_order: u64,
}

impl ChatRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&mut self) -> ChatOrder {
        self.next_order += 1;
        ChatOrder(self.next_order)
    }
}

/// Client-side staleness filter for `StateUpdate` ticks.
#[derive(Default)]
pub struct TickGate {
    last_applied: Option<TickSequence>,
}

impl TickGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `tick` if it is strictly newer than the last admitted tick.
    /// Duplicates and reordered stragglers return false and leave the gate
    /// unchanged.
    pub fn admit(&mut self, tick: TickSequence) -> bool {
        if self.last_applied.is_some_and(|last| tick <= last) {
            return false;
        }
        self.last_applied = Some(tick);
        true
    }

    pub fn last_applied(&self) -> Option<TickSequence> {
        self.last_applied
    }
}
