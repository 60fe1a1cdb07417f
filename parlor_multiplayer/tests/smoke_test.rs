// Integration smoke test for the session host.
//
// Hosts a session on localhost and connects mock TCP clients that speak the
// protocol crate's framing directly: join handshake, roster broadcasts, chat
// relay, heartbeat policing, protocol violations, and session teardown.
//
// Each client is a plain socket plus a sequence counter — no `NetworkClient`
// involved. This pins down the host's wire behavior on its own, independent
// of the client implementation (which `multiplayer_tests` covers end to end).

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use parlor_multiplayer::{HostHandle, RegistryConfig, ServerConfig, SessionEvent, SessionRegistry};
use parlor_protocol::{
    ChatOrder, Envelope, ErrorCode, FrameError, Message, PlayerId, RejectReason, SessionInfo,
    TickSequence, read_frame, write_frame,
};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[test]
fn join_handshake_carries_the_roster() {
    let (_registry, handle) = host(4, loopback());

    // 1. First join: verdict names the player and a one-entry roster.
    let mut ann = TestClient::connect(handle.local_addr());
    let (ann_id, roster) = ann.join("Ann");
    assert_eq!(ann_id, PlayerId(1));
    assert_eq!(roster.players.len(), 1);
    assert_eq!(roster.players[0].name, "Ann");

    // 2. Second join: newer roster, and Ann hears about it too.
    let mut bo = TestClient::connect(handle.local_addr());
    let (bo_id, roster) = bo.join("Bo");
    assert_eq!(bo_id, PlayerId(2));
    let names: Vec<&str> = roster.players.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["Ann", "Bo"]);

    match ann.recv() {
        Message::JoinAccepted { player_id, session } => {
            assert_eq!(player_id, bo_id);
            assert_eq!(session.players.len(), 2);
        }
        other => panic!("expected JoinAccepted for Bo, got {other:?}"),
    }

    // 3. The host-side stream saw both joins.
    wait_for_host_event(&handle, "PlayerJoined Ann", |e| {
        matches!(e, SessionEvent::PlayerJoined { player } if player.name == "Ann")
    });
    wait_for_host_event(&handle, "PlayerJoined Bo", |e| {
        matches!(e, SessionEvent::PlayerJoined { player } if player.name == "Bo")
    });
}

#[test]
fn blank_name_is_rejected_on_the_wire() {
    let (_registry, handle) = host(4, loopback());

    let mut client = TestClient::connect(handle.local_addr());
    client.send(Message::Join { name: "   ".into() });
    match client.recv() {
        Message::JoinRejected { reason } => assert_eq!(reason, RejectReason::InvalidName),
        other => panic!("expected JoinRejected, got {other:?}"),
    }
    // The verdict is the connection's last frame.
    assert!(matches!(client.read_result(), Err(FrameError::Closed)));
}

#[test]
fn capacity_rejects_the_extra_join() {
    let (registry, handle) = host(1, loopback());

    let mut ann = TestClient::connect(handle.local_addr());
    ann.join("Ann");

    let mut late = TestClient::connect(handle.local_addr());
    late.send(Message::Join { name: "Late".into() });
    match late.recv() {
        Message::JoinRejected { reason } => assert_eq!(reason, RejectReason::CapacityExceeded),
        other => panic!("expected JoinRejected, got {other:?}"),
    }
    assert!(matches!(late.read_result(), Err(FrameError::Closed)));

    // Membership is untouched by the refused join.
    let info = registry.get(handle.session_id()).unwrap();
    assert_eq!(info.players.len(), 1);
    assert_eq!(info.players[0].name, "Ann");
}

#[test]
fn client_state_update_loses_the_connection() {
    let (_registry, handle) = host(4, loopback());

    let mut ann = TestClient::connect(handle.local_addr());
    ann.join("Ann");
    let mut bo = TestClient::connect(handle.local_addr());
    bo.join("Bo");
    let _ = ann.recv(); // Bo's join broadcast.

    // State flows host to clients only.
    ann.send(Message::StateUpdate {
        tick: TickSequence(1),
        snapshot: vec![1, 2, 3],
    });

    match ann.recv() {
        Message::Error { code, .. } => assert_eq!(code, ErrorCode::ProtocolViolation),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(matches!(ann.read_result(), Err(FrameError::Closed)));

    // The violator counts as departed, for the host and for Bo alike.
    wait_for_host_event(&handle, "PlayerLeft Ann", |e| {
        matches!(e, SessionEvent::PlayerLeft { name, .. } if name == "Ann")
    });
    match bo.recv() {
        Message::PlayerLeft { player_id } => assert_eq!(player_id, PlayerId(1)),
        other => panic!("expected PlayerLeft, got {other:?}"),
    }
}

#[test]
fn chat_relays_in_send_order_to_everyone_else() {
    let (_registry, handle) = host(4, loopback());

    let mut ann = TestClient::connect(handle.local_addr());
    let (ann_id, _) = ann.join("Ann");
    let mut bo = TestClient::connect(handle.local_addr());
    let (bo_id, _) = bo.join("Bo");
    let _ = ann.recv(); // Bo's join broadcast.

    // 1. Ann's three lines reach Bo in send order with ascending stamps.
    for text in ["one", "two", "three"] {
        ann.send(Message::ChatText {
            player_id: ann_id,
            order: ChatOrder(0),
            text: text.into(),
        });
    }
    let mut last_order = 0;
    for expected in ["one", "two", "three"] {
        match bo.recv() {
            Message::ChatText {
                player_id,
                order,
                text,
            } => {
                assert_eq!(player_id, ann_id);
                assert_eq!(text, expected);
                assert!(order.0 > last_order, "orders must ascend");
                last_order = order.0;
            }
            other => panic!("expected ChatText, got {other:?}"),
        }
    }

    // 2. Senders do not hear their own echo: the next frame Ann sees is
    //    Bo's reply, not one of her own lines.
    bo.send(Message::ChatText {
        player_id: bo_id,
        order: ChatOrder(0),
        text: "reply".into(),
    });
    match ann.recv() {
        Message::ChatText {
            player_id, text, ..
        } => {
            assert_eq!(player_id, bo_id);
            assert_eq!(text, "reply");
        }
        other => panic!("expected Bo's reply, got {other:?}"),
    }

    // 3. The host stream carries all four lines, in one stamped order.
    let mut orders = Vec::new();
    let deadline = Instant::now() + POLL_TIMEOUT;
    'collect: while Instant::now() < deadline {
        for event in handle.poll() {
            if let SessionEvent::ChatReceived { order, text, .. } = event {
                orders.push(order.0);
                if text == "reply" {
                    break 'collect;
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    assert_eq!(orders.len(), 4, "host should see every chat line");
    assert!(orders.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn heartbeats_defer_the_silence_drop() {
    let mut config = loopback();
    config.heartbeat_interval = Duration::from_millis(300);
    let (registry, handle) = host(4, config);

    let mut ann = TestClient::connect(handle.local_addr());
    ann.join("Ann");

    // 1. Twice the tolerance with nothing but heartbeats: still seated.
    for _ in 0..6 {
        thread::sleep(Duration::from_millis(100));
        ann.send(Message::Heartbeat);
    }
    let info = registry.get(handle.session_id()).unwrap();
    assert_eq!(info.players.len(), 1);

    // 2. Then silence: the host unseats her and closes the socket.
    wait_for_host_event(&handle, "PlayerLeft Ann", |e| {
        matches!(e, SessionEvent::PlayerLeft { name, .. } if name == "Ann")
    });
    assert!(ann.read_result().is_err());
}

#[test]
fn connections_that_never_join_are_dropped_quietly() {
    let mut config = loopback();
    config.heartbeat_interval = Duration::from_millis(300);
    let (_registry, handle) = host(4, config);

    let idle = TcpStream::connect(handle.local_addr()).unwrap();
    idle.set_read_timeout(Some(POLL_TIMEOUT)).unwrap();
    let mut reader = BufReader::new(idle);

    // The join deadline passes; the host closes without a word.
    assert!(read_frame(&mut reader).is_err());
    assert!(handle.poll().is_empty(), "no events for a nameless socket");
}

#[test]
fn leaving_unseats_and_notifies_the_rest() {
    let (registry, handle) = host(4, loopback());

    let mut ann = TestClient::connect(handle.local_addr());
    let (ann_id, _) = ann.join("Ann");
    let mut bo = TestClient::connect(handle.local_addr());
    bo.join("Bo");
    let _ = ann.recv(); // Bo's join broadcast.

    ann.send(Message::PlayerLeft { player_id: ann_id });

    match bo.recv() {
        Message::PlayerLeft { player_id } => assert_eq!(player_id, ann_id),
        other => panic!("expected PlayerLeft, got {other:?}"),
    }
    wait_for_host_event(&handle, "PlayerLeft Ann", |e| {
        matches!(e, SessionEvent::PlayerLeft { name, .. } if name == "Ann")
    });
    // Goodbye means goodbye: no error frame, just the close.
    assert!(matches!(ann.read_result(), Err(FrameError::Closed)));

    let info = registry.get(handle.session_id()).unwrap();
    assert_eq!(info.players.len(), 1);
}

#[test]
fn leaving_for_someone_else_is_a_violation() {
    let (_registry, handle) = host(4, loopback());

    let mut ann = TestClient::connect(handle.local_addr());
    ann.join("Ann");
    let mut bo = TestClient::connect(handle.local_addr());
    let (bo_id, _) = bo.join("Bo");
    let _ = ann.recv(); // Bo's join broadcast.

    ann.send(Message::PlayerLeft { player_id: bo_id });
    match ann.recv() {
        Message::Error { code, .. } => assert_eq!(code, ErrorCode::ProtocolViolation),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(matches!(ann.read_result(), Err(FrameError::Closed)));

    // Bo is still seated; Ann is the one who left.
    wait_for_host_event(&handle, "PlayerLeft Ann", |e| {
        matches!(e, SessionEvent::PlayerLeft { name, .. } if name == "Ann")
    });
}

#[test]
fn ending_the_session_notifies_every_client() {
    let (mut registry, handle) = host(4, loopback());

    let mut ann = TestClient::connect(handle.local_addr());
    ann.join("Ann");
    let mut bo = TestClient::connect(handle.local_addr());
    bo.join("Bo");
    let _ = ann.recv(); // Bo's join broadcast.

    registry.end_session(handle.session_id());

    for client in [&mut ann, &mut bo] {
        match client.recv() {
            Message::Error { code, .. } => assert_eq!(code, ErrorCode::SessionEnded),
            other => panic!("expected the end notice, got {other:?}"),
        }
        assert!(matches!(client.read_result(), Err(FrameError::Closed)));
    }
    assert!(handle.poll().contains(&SessionEvent::SessionEnded));
    assert!(registry.get(handle.session_id()).is_none());
}

#[test]
fn the_end_notice_survives_busy_sweeps() {
    // End sessions over and over against a live sweep cadence; the notice
    // must come through every single time, however the teardown lands
    // relative to the loop's wakeups.
    for _ in 0..100 {
        let mut config = loopback();
        config.heartbeat_interval = Duration::from_millis(200);
        let (mut registry, handle) = host(4, config);

        let mut ann = TestClient::connect(handle.local_addr());
        ann.join("Ann");

        registry.end_session(handle.session_id());
        match ann.recv() {
            Message::Error { code, .. } => assert_eq!(code, ErrorCode::SessionEnded),
            other => panic!("expected the end notice, got {other:?}"),
        }
        assert!(matches!(ann.read_result(), Err(FrameError::Closed)));
        assert!(handle.poll().contains(&SessionEvent::SessionEnded));
    }
}

// --- Helpers ---

fn loopback() -> ServerConfig {
    ServerConfig {
        port: 0,
        ..ServerConfig::default()
    }
}

fn host(max_players: u32, config: ServerConfig) -> (SessionRegistry, HostHandle) {
    let mut registry = SessionRegistry::new(RegistryConfig::default());
    let handle = registry
        .host_session("snake", "normal", max_players, &config)
        .unwrap();
    (registry, handle)
}

/// Poll the host's event stream until `matching` accepts an event; panic
/// after the shared deadline. Non-matching events are discarded.
fn wait_for_host_event(
    handle: &HostHandle,
    what: &str,
    matching: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let deadline = Instant::now() + POLL_TIMEOUT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        for event in handle.poll() {
            if matching(&event) {
                return event;
            }
            seen.push(event);
        }
        thread::sleep(POLL_INTERVAL);
    }
    panic!("timed out waiting for {what}; saw {seen:?}");
}

/// A mock client: plain framed TCP plus the per-connection send sequence.
struct TestClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    next_seq: u64,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(POLL_TIMEOUT)).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        TestClient {
            reader,
            writer: BufWriter::new(stream),
            next_seq: 0,
        }
    }

    fn send(&mut self, message: Message) {
        self.next_seq += 1;
        write_frame(&mut self.writer, &Envelope::new(self.next_seq, message)).unwrap();
    }

    fn recv(&mut self) -> Message {
        read_frame(&mut self.reader).unwrap().message
    }

    fn read_result(&mut self) -> Result<Envelope, FrameError> {
        read_frame(&mut self.reader)
    }

    /// Join and unpack the verdict.
    fn join(&mut self, name: &str) -> (PlayerId, SessionInfo) {
        self.send(Message::Join { name: name.into() });
        match self.recv() {
            Message::JoinAccepted { player_id, session } => (player_id, session),
            other => panic!("expected JoinAccepted, got {other:?}"),
        }
    }
}
