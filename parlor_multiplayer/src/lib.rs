// parlor_multiplayer — session hosting and joining for Parlor terminal games.
//
// This crate is the launcher's multiplayer layer: one player hosts a session
// over TCP, others join it by address, and everyone exchanges lobby changes,
// chat, and authoritative game state through the host. The host's game engine
// is the single source of truth; clients render the snapshots it publishes.
//
// Module overview:
// - `session.rs`:  Session state — roster in join order, ready flags, the
//                  Lobby/Ready/Running/Ended lifecycle, latest snapshot
//                  stamp. The data structure `server.rs` drives; no I/O.
// - `server.rs`:   TCP listener, reader and writer threads (one pair per
//                  connection), and the event loop that owns the `Session`.
//                  `std::net` with a thread-per-connection architecture and
//                  an `mpsc` channel funneling everything into one loop.
// - `client.rs`:   Connect-and-join handshake plus the client's reader and
//                  writer threads; surfaces the session as an event stream.
// - `registry.rs`: Process-wide session table. `host_session` returns the
//                  `HostHandle` a launcher UI drives; `end_session` tears a
//                  session down with notice to every client.
// - `sync.rs`:     Ordering counters: tick stamping for published state,
//                  order stamping for chat, and the client-side tick gate.
// - `events.rs`:   The `SessionEvent` stream both sides expose.
// - `error.rs`:    What the API calls can return.
//
// Dependencies: `parlor_protocol` (shared message types and framing).
// No dependency on any game engine or renderer.
//
// Hosting can run embedded in the launcher via `SessionRegistry` or as the
// standalone `parlor-host` binary (`main.rs`).

pub mod client;
pub mod error;
pub mod events;
pub mod registry;
pub mod server;
pub mod session;
pub mod sync;

pub use client::{ClientConfig, NetworkClient};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use registry::{HostHandle, RegistryConfig, SessionRegistry};
pub use server::ServerConfig;
pub use sync::StateSynchronizer;

/// Join a hosted session with default client tuning.
pub fn join_session(address: &str, port: u16, display_name: &str) -> Result<NetworkClient> {
    NetworkClient::connect(address, port, display_name, &ClientConfig::default())
}
