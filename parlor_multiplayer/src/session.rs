// Session membership and lifecycle bookkeeping.
//
// `Session` is the data structure the server's event loop drives. It tracks
// seated players in join order, ready flags, the lifecycle state machine, and
// the latest snapshot stamp. All mutation happens through methods called from
// that single loop (or, for idle sessions, from the registry's owning thread)
// — no internal locking.
//
// `Session` performs no I/O. Connections live in the server's table; a player
// references its connection by `ConnectionId`, and locally seated players
// carry no connection at all. This keeps every invariant here testable
// without a socket.
//
// State machine: Lobby → Ready (all seated players ready) → Running (first
// snapshot recorded) → Ended (explicit, terminal). A session whose membership
// drops to zero reverts to an empty Lobby and keeps accepting joins; only the
// host ends it for good.

use std::time::{Instant, SystemTime};

use parlor_protocol::{PlayerId, PlayerInfo, RejectReason, SessionInfo, SessionState, TickSequence};

/// Host-side handle naming one connection in the `NetworkServer` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Display name bound in characters, enforced at join time (after trimming).
pub const MAX_NAME_LEN: usize = 32;

/// One active multiplayer game instance.
pub struct Session {
    id: String,
    game_id: String,
    mode: String,
    players: Vec<SessionPlayer>,
    next_player_id: u32,
    max_players: u32,
    state: SessionState,
    latest: Option<(TickSequence, Vec<u8>)>,
    created_at: SystemTime,
}

/// One participant. `conn` is `None` for players seated by the hosting
/// process itself.
pub struct SessionPlayer {
    pub id: PlayerId,
    pub name: String,
    pub ready: bool,
    pub conn: Option<ConnectionId>,
    pub last_seen: Instant,
}

impl Session {
    pub fn new(id: String, game_id: String, mode: String, max_players: u32) -> Self {
        Self {
            id,
            game_id,
            mode,
            players: Vec::new(),
            next_player_id: 1,
            max_players,
            state: SessionState::Lobby,
            latest: None,
            created_at: SystemTime::now(),
        }
    }

    /// Seat a player. Returns the assigned id, or the reason the join must be
    /// refused. Joins are accepted in Lobby only; the player list keeps join
    /// order, which doubles as turn/display order.
    pub fn add_player(
        &mut self,
        name: &str,
        conn: Option<ConnectionId>,
    ) -> Result<PlayerId, RejectReason> {
        if self.state != SessionState::Lobby {
            return Err(RejectReason::NotJoinable);
        }
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(RejectReason::InvalidName);
        }
        if self.players.len() as u32 >= self.max_players {
            return Err(RejectReason::CapacityExceeded);
        }

        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;
        self.players.push(SessionPlayer {
            id,
            name: name.to_string(),
            ready: false,
            conn,
            last_seen: Instant::now(),
        });
        Ok(id)
    }

    /// Unseat a player. When the last one goes, the session reverts to an
    /// empty Lobby (unless already Ended) so fresh joins can start over. A
    /// departure can also complete readiness: when everyone still seated is
    /// ready, the lobby moves to Ready.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<SessionPlayer> {
        let idx = self.players.iter().position(|p| p.id == id)?;
        let removed = self.players.remove(idx);
        if self.players.is_empty() && self.state != SessionState::Ended {
            self.state = SessionState::Lobby;
            self.latest = None;
        } else if self.state == SessionState::Lobby && self.players.iter().all(|p| p.ready) {
            // The departing player may have been the one holding the lobby
            // back.
            self.state = SessionState::Ready;
        }
        Some(removed)
    }

    /// Set a player's ready flag. Returns true if the flag changed. Once
    /// every seated player is ready the session moves Lobby → Ready.
    pub fn set_ready(&mut self, id: PlayerId) -> bool {
        let Some(player) = self.players.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if player.ready {
            return false;
        }
        player.ready = true;
        if self.state == SessionState::Lobby && self.players.iter().all(|p| p.ready) {
            self.state = SessionState::Ready;
        }
        true
    }

    /// Record an inbound sign of life for a player.
    pub fn touch(&mut self, id: PlayerId) {
        if let Some(player) = self.players.iter_mut().find(|p| p.id == id) {
            player.last_seen = Instant::now();
        }
    }

    /// Stamp the latest snapshot. The first snapshot against a Ready session
    /// performs Ready → Running. Returns false (and stores nothing) when the
    /// session is not ready to run — publishing into a Lobby would bypass the
    /// all-ready gate, and Ended is immutable.
    pub fn record_snapshot(&mut self, tick: TickSequence, snapshot: Vec<u8>) -> bool {
        if self.state == SessionState::Ready {
            self.state = SessionState::Running;
        }
        if self.state != SessionState::Running {
            return false;
        }
        self.latest = Some((tick, snapshot));
        true
    }

    /// Transition to Ended. Terminal; every later mutation is a no-op.
    pub fn end(&mut self) {
        self.state = SessionState::Ended;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> &[SessionPlayer] {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> Option<&SessionPlayer> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Latest recorded snapshot stamp, if the game has produced one.
    pub fn latest_tick(&self) -> Option<TickSequence> {
        self.latest.as_ref().map(|(tick, _)| *tick)
    }

    /// Point-in-time roster snapshot, players in join order.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            game_id: self.game_id.clone(),
            mode: self.mode.clone(),
            state: self.state,
            max_players: self.max_players,
            players: self
                .players
                .iter()
                .map(|p| PlayerInfo {
                    id: p.id,
                    name: p.name.clone(),
                    ready: p.ready,
                })
                .collect(),
        }
    }
}
