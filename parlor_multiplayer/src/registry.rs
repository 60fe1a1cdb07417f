// Session registry: the single authority for creating, finding, and ending
// sessions in one launcher process.
//
// Two kinds of entry live in the table. An idle session is pure bookkeeping
// for local play: a `Session` value owned directly by the registry, no
// networking. A hosted session owns a running `NetworkServer`; its `Session`
// lives inside that server's event loop, so registry queries go over the
// loop's control channel instead of touching shared state.
//
// `host_session` hands back a `HostHandle`: the hosting process's whole view
// of its session. It carries the event stream, the hot-seat controls, and
// (once) the `StateSynchronizer` the game engine publishes through. The
// handle stays independent of the registry borrow, so a UI can hold it while
// the registry keeps serving lookups.
//
// Ending a session is idempotent and covers both flavors; dropping the
// registry ends every hosted session it still owns.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::info;

use parlor_protocol::{PlayerId, SessionInfo};

use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::server::{Control, InternalEvent, NetworkServer, ServerConfig};
use crate::session::Session;
use crate::sync::StateSynchronizer;

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Concurrent sessions (idle plus hosted) this process will track.
    pub max_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_sessions: 16 }
    }
}

/// Owner of every session in this process.
pub struct SessionRegistry {
    max_sessions: usize,
    next_session: u64,
    entries: Vec<RegistryEntry>,
}

enum RegistryEntry {
    Idle(Session),
    Hosted {
        session_id: String,
        server: NetworkServer,
    },
}

impl RegistryEntry {
    fn session_id(&self) -> &str {
        match self {
            RegistryEntry::Idle(session) => session.id(),
            RegistryEntry::Hosted { session_id, .. } => session_id,
        }
    }
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            next_session: 0,
            entries: Vec::new(),
        }
    }

    /// Create an idle session for local bookkeeping. Returns its id, unique
    /// for the life of this registry.
    pub fn create_session(
        &mut self,
        game_id: &str,
        mode: &str,
        max_players: u32,
    ) -> Result<String> {
        self.ensure_capacity()?;
        let id = self.allocate_id();
        info!(session = %id, game = game_id, "session created");
        self.entries.push(RegistryEntry::Idle(Session::new(
            id.clone(),
            game_id.to_string(),
            mode.to_string(),
            max_players,
        )));
        Ok(id)
    }

    /// Create a session and open it to the network. The listener is bound
    /// before this returns; the bound address (and OS-assigned port, when
    /// `config.port` is 0) is on the returned handle.
    pub fn host_session(
        &mut self,
        game_id: &str,
        mode: &str,
        max_players: u32,
        config: &ServerConfig,
    ) -> Result<HostHandle> {
        self.ensure_capacity()?;
        let id = self.allocate_id();
        let session = Session::new(id.clone(), game_id.to_string(), mode.to_string(), max_players);
        let (events_tx, events) = mpsc::channel();
        let server = NetworkServer::start(session, config, events_tx)?;
        let control = server.control();
        let local_addr = server.local_addr();
        info!(session = %id, game = game_id, %local_addr, "session hosted");
        let handle = HostHandle {
            session_id: id.clone(),
            local_addr,
            synchronizer: Some(StateSynchronizer::new(control.clone())),
            control,
            events,
        };
        self.entries.push(RegistryEntry::Hosted {
            session_id: id,
            server,
        });
        Ok(handle)
    }

    /// Look one session up. For hosted sessions the snapshot comes from the
    /// live event loop.
    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.session_id() == session_id)?;
        match entry {
            RegistryEntry::Idle(session) => Some(session.info()),
            RegistryEntry::Hosted { server, .. } => server.info(),
        }
    }

    /// Snapshots of every tracked session, in creation order.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                RegistryEntry::Idle(session) => Some(session.info()),
                RegistryEntry::Hosted { server, .. } => server.info(),
            })
            .collect()
    }

    /// End a session and forget it. For hosted sessions every client gets
    /// the end notice before its connection closes. Unknown ids are a no-op,
    /// so ending twice is safe.
    pub fn end_session(&mut self, session_id: &str) {
        let Some(idx) = self
            .entries
            .iter()
            .position(|entry| entry.session_id() == session_id)
        else {
            return;
        };
        match self.entries.remove(idx) {
            RegistryEntry::Idle(mut session) => {
                session.end();
                info!(session = session_id, "idle session ended");
            }
            RegistryEntry::Hosted { mut server, .. } => {
                server.stop();
                info!(session = session_id, "hosted session ended");
            }
        }
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.entries.len() >= self.max_sessions {
            return Err(Error::CapacityExceeded {
                max: self.max_sessions,
            });
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> String {
        self.next_session += 1;
        format!("session-{}", self.next_session)
    }
}

/// The hosting process's handle to one hosted session.
///
/// Outlives the registry borrow that created it. Operations fail with
/// `SessionClosed` once the session has been ended.
pub struct HostHandle {
    session_id: String,
    local_addr: SocketAddr,
    control: Sender<InternalEvent>,
    events: Receiver<SessionEvent>,
    synchronizer: Option<StateSynchronizer>,
}

impl HostHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Bound listen address, with the real port when 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hand the session's one `StateSynchronizer` to the game engine. There
    /// is exactly one; the second call returns `None`.
    pub fn take_synchronizer(&mut self) -> Option<StateSynchronizer> {
        self.synchronizer.take()
    }

    /// Seat a player on the hosting process itself (hot-seat play). The
    /// roster change is announced to every connected client.
    pub fn add_local_player(&self, name: &str) -> Result<PlayerId> {
        let (reply, verdict) = mpsc::channel();
        self.control
            .send(InternalEvent::Control(Control::LocalJoin {
                name: name.to_string(),
                reply,
            }))
            .map_err(|_| Error::SessionClosed)?;
        match verdict.recv() {
            Ok(Ok(player_id)) => Ok(player_id),
            Ok(Err(reason)) => Err(Error::JoinRejected(reason)),
            Err(_) => Err(Error::SessionClosed),
        }
    }

    /// Set a locally seated player's ready flag.
    pub fn set_ready(&self, player_id: PlayerId) -> Result<()> {
        self.control
            .send(InternalEvent::Control(Control::LocalReady { player_id }))
            .map_err(|_| Error::SessionClosed)
    }

    /// Send chat as a locally seated player.
    pub fn send_chat(&self, player_id: PlayerId, text: &str) -> Result<()> {
        self.control
            .send(InternalEvent::Control(Control::LocalChat {
                player_id,
                text: text.to_string(),
            }))
            .map_err(|_| Error::SessionClosed)
    }

    /// Roster snapshot from the live event loop. Doubles as a barrier: state
    /// changes requested before this call are reflected in the answer.
    pub fn info(&self) -> Result<SessionInfo> {
        let (reply, verdict) = mpsc::channel();
        self.control
            .send(InternalEvent::Control(Control::Query { reply }))
            .map_err(|_| Error::SessionClosed)?;
        verdict.recv().map_err(|_| Error::SessionClosed)
    }

    /// Drain whatever events have arrived, without blocking.
    pub fn poll(&self) -> Vec<SessionEvent> {
        self.events.try_iter().collect()
    }

    /// Blocking event stream. Ends when the session does.
    pub fn events(&self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use parlor_protocol::{RejectReason, SessionState, TickSequence};

    use super::*;

    fn loopback() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn idle_sessions_are_created_listed_and_found() {
        let mut registry = SessionRegistry::new(RegistryConfig::default());
        let a = registry.create_session("snake", "normal", 4).unwrap();
        let b = registry.create_session("tetris", "duel", 2).unwrap();
        assert_ne!(a, b);

        let info = registry.get(&a).unwrap();
        assert_eq!(info.game_id, "snake");
        assert_eq!(info.state, SessionState::Lobby);
        assert!(info.players.is_empty());

        let listed: Vec<String> = registry
            .list_sessions()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(listed, vec![a, b]);
    }

    #[test]
    fn capacity_limits_session_creation() {
        let mut registry = SessionRegistry::new(RegistryConfig { max_sessions: 1 });
        registry.create_session("snake", "normal", 4).unwrap();
        let err = registry.create_session("snake", "normal", 4).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { max: 1 }));
    }

    #[test]
    fn ending_a_session_is_idempotent() {
        let mut registry = SessionRegistry::new(RegistryConfig::default());
        let id = registry.create_session("snake", "normal", 4).unwrap();
        registry.end_session(&id);
        assert!(registry.get(&id).is_none());
        registry.end_session(&id);
        registry.end_session("session-never-was");
    }

    #[test]
    fn ids_stay_unique_after_removal() {
        let mut registry = SessionRegistry::new(RegistryConfig::default());
        let a = registry.create_session("snake", "normal", 4).unwrap();
        registry.end_session(&a);
        let b = registry.create_session("snake", "normal", 4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hosted_session_serves_queries_and_local_players() {
        let mut registry = SessionRegistry::new(RegistryConfig::default());
        let mut handle = registry
            .host_session("snake", "normal", 4, &loopback())
            .unwrap();
        assert_ne!(handle.local_addr().port(), 0);

        let info = registry.get(handle.session_id()).unwrap();
        assert_eq!(info.state, SessionState::Lobby);
        assert!(info.players.is_empty());

        // `add_local_player` replies only after the roster event is queued.
        let ann = handle.add_local_player("Ann").unwrap();
        assert!(matches!(
            handle.poll().as_slice(),
            [SessionEvent::PlayerJoined { player }] if player.id == ann
        ));

        handle.set_ready(ann).unwrap();
        let info = handle.info().unwrap();
        assert_eq!(info.state, SessionState::Ready);
        assert!(info.players[0].ready);
        assert_eq!(handle.poll(), vec![SessionEvent::PlayerReady { player_id: ann }]);

        let mut sync = handle.take_synchronizer().unwrap();
        assert!(handle.take_synchronizer().is_none());
        assert_eq!(sync.publish(b"tick one".to_vec()).unwrap(), TickSequence(1));
        let info = handle.info().unwrap();
        assert_eq!(info.state, SessionState::Running);

        registry.end_session(handle.session_id());
        assert!(registry.get(handle.session_id()).is_none());
        assert!(handle.poll().contains(&SessionEvent::SessionEnded));
        assert!(matches!(handle.info(), Err(Error::SessionClosed)));
        assert!(matches!(
            handle.add_local_player("Late"),
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn local_join_verdicts_mirror_session_rules() {
        let mut registry = SessionRegistry::new(RegistryConfig::default());
        let handle = registry
            .host_session("snake", "normal", 1, &loopback())
            .unwrap();
        handle.add_local_player("Ann").unwrap();
        let err = handle.add_local_player("Bo").unwrap_err();
        assert!(matches!(
            err,
            Error::JoinRejected(RejectReason::CapacityExceeded)
        ));
        let err = handle.add_local_player("   ").unwrap_err();
        assert!(matches!(err, Error::JoinRejected(RejectReason::InvalidName)));
    }

    #[test]
    fn dropping_the_registry_ends_hosted_sessions() {
        let handle = {
            let mut registry = SessionRegistry::new(RegistryConfig::default());
            registry
                .host_session("snake", "normal", 4, &loopback())
                .unwrap()
        };
        assert!(matches!(handle.info(), Err(Error::SessionClosed)));
        assert!(handle.poll().contains(&SessionEvent::SessionEnded));
    }
}
