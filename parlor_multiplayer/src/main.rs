// CLI entry point: host one Parlor session as a standalone process.
//
// Opens a session lobby that clients join over TCP, then serves it until
// Ctrl+C. Lobby changes and chat are relayed by the session loop itself; this
// binary just logs the event stream. It never runs a game — publishing state
// is the embedding launcher's job, so a session hosted here stays in the
// lobby/chat stage. See `server.rs` for the networking architecture and
// `session.rs` for the session state.
//
// Logging goes through `tracing`; `RUST_LOG` overrides the default level.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use parlor_multiplayer::server::DEFAULT_PORT;
use parlor_multiplayer::{RegistryConfig, ServerConfig, SessionEvent, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "parlor-host", about = "Host a Parlor multiplayer session")]
struct Args {
    /// Game this session is for.
    #[arg(long, default_value = "snake")]
    game: String,

    /// Mode label shown to joiners.
    #[arg(long, default_value = "normal")]
    mode: String,

    /// Maximum seated players.
    #[arg(long, default_value_t = 4)]
    max_players: u32,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Listen port. 0 lets the OS pick one.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log debug detail (unless RUST_LOG says otherwise).
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let mut registry = SessionRegistry::new(RegistryConfig::default());
    let config = ServerConfig {
        bind_addr: args.bind,
        port: args.port,
        ..ServerConfig::default()
    };
    let handle = match registry.host_session(&args.game, &args.mode, args.max_players, &config) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to host the session");
            std::process::exit(1);
        }
    };

    let (ctrlc_tx, ctrlc_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    }) {
        error!(error = %e, "failed to install the Ctrl-C handler");
        std::process::exit(1);
    }

    info!(
        session = handle.session_id(),
        addr = %handle.local_addr(),
        game = %args.game,
        "session open, press Ctrl+C to stop"
    );

    loop {
        if ctrlc_rx.try_recv().is_ok() {
            break;
        }
        for event in handle.poll() {
            log_event(&event);
        }
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    let session_id = handle.session_id().to_string();
    registry.end_session(&session_id);
}

fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PlayerJoined { player } => {
            info!(player = player.id.0, name = %player.name, "player joined");
        }
        SessionEvent::PlayerReady { player_id } => info!(player = player_id.0, "player ready"),
        // Not produced on the host stream; the host is the source of state.
        SessionEvent::StateUpdate { tick, .. } => debug!(tick = tick.0, "state update"),
        SessionEvent::ChatReceived {
            player_id,
            order,
            text,
        } => info!(player = player_id.0, order = order.0, text = %text, "chat"),
        SessionEvent::PlayerLeft { player_id, name } => {
            info!(player = player_id.0, name = %name, "player left");
        }
        SessionEvent::SessionEnded => info!("session ended"),
        SessionEvent::ConnectionError { detail } => warn!(%detail, "connection error"),
    }
}
