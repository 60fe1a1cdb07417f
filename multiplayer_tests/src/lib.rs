// Test-only helpers for multiplayer integration tests.
//
// The polling helpers turn the non-blocking event streams of `NetworkClient`
// and `HostHandle` into synchronous waits with a shared timeout, so test
// scenarios read top to bottom. `RawClient` speaks the wire format directly
// over a plain TCP socket, for roles the real client cannot play: scripted
// hosts, peers that misbehave, peers that stop reading.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use parlor_multiplayer::SessionEvent;
use parlor_protocol::{
    Envelope, FrameError, Message, PlayerId, SessionInfo, read_frame, write_frame,
};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll until `matching` accepts an event and return it, discarding everything
/// seen before it. Panics with the discarded events after `POLL_TIMEOUT`.
pub fn wait_for_event(
    mut poll: impl FnMut() -> Vec<SessionEvent>,
    what: &str,
    mut matching: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    let start = Instant::now();
    let mut seen = Vec::new();
    loop {
        assert!(
            start.elapsed() < POLL_TIMEOUT,
            "timed out waiting for {what}; saw {seen:?}"
        );
        for event in poll() {
            if matching(&event) {
                return event;
            }
            seen.push(event);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Poll until `stop` accepts an event. Returns everything seen up to and
/// including that event, in arrival order. Panics after `POLL_TIMEOUT`.
pub fn collect_events_until(
    mut poll: impl FnMut() -> Vec<SessionEvent>,
    what: &str,
    mut stop: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let start = Instant::now();
    let mut seen = Vec::new();
    loop {
        assert!(
            start.elapsed() < POLL_TIMEOUT,
            "timed out waiting for {what}; saw {seen:?}"
        );
        for event in poll() {
            let done = stop(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// A scripted peer: a plain framed TCP stream plus the per-connection send
/// sequence the envelope format expects.
pub struct RawClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    next_seq: u64,
}

impl RawClient {
    /// Connect with `POLL_TIMEOUT` as the read timeout, so a test expecting
    /// a frame that never comes fails instead of hanging.
    pub fn connect(addr: SocketAddr) -> RawClient {
        let stream = TcpStream::connect(addr).expect("RawClient::connect failed");
        stream.set_read_timeout(Some(POLL_TIMEOUT)).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        RawClient {
            reader,
            writer: BufWriter::new(stream),
            next_seq: 0,
        }
    }

    pub fn send(&mut self, message: Message) {
        self.next_seq += 1;
        write_frame(&mut self.writer, &Envelope::new(self.next_seq, message))
            .expect("RawClient::send failed");
    }

    pub fn recv(&mut self) -> Message {
        read_frame(&mut self.reader)
            .expect("RawClient::recv failed")
            .message
    }

    /// Like `recv`, but hands back the framing outcome for tests that expect
    /// the connection to close.
    pub fn read_result(&mut self) -> Result<Envelope, FrameError> {
        read_frame(&mut self.reader)
    }

    /// Join and unpack the accepted verdict.
    pub fn join(&mut self, name: &str) -> (PlayerId, SessionInfo) {
        self.send(Message::Join { name: name.into() });
        match self.recv() {
            Message::JoinAccepted { player_id, session } => (player_id, session),
            other => panic!("expected JoinAccepted, got {other:?}"),
        }
    }
}
