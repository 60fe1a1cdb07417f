// parlor_protocol — wire protocol for multiplayer session communication.
//
// This crate defines the message types, framing, and serialization used by
// the session host (`parlor_multiplayer`) and joining game clients to talk
// over TCP. It is shared by both sides and has no dependency on any game
// engine or UI crate.
//
// Module overview:
// - `types.rs`:    Core ID types — `PlayerId`, `TickSequence`, `ChatOrder` —
//                  and the `SessionState` lifecycle enum.
// - `message.rs`:  The `Message` enum plus roster structs (`PlayerInfo`,
//                  `SessionInfo`) and the reject/error code enums.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then a JSON `Envelope`
//                  carrying the protocol version and the send sequence.
//
// Design decisions:
// - **JSON payloads.** Self-describing and debuggable straight off a packet
//   capture; a binary encoding can replace it later if bandwidth matters.
// - **Snapshots as opaque `Vec<u8>`.** The session layer never inspects game
//   state, which keeps this crate independent of every game engine.
// - **No async runtime.** Framing works over plain `std::io::Read`/`Write`,
//   so blocking TCP streams and buffered wrappers both fit.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{Envelope, FrameError, MAX_FRAME_SIZE, PROTOCOL_VERSION, read_frame, write_frame};
pub use message::{ErrorCode, Message, PlayerInfo, RejectReason, SessionInfo};
pub use types::{ChatOrder, PlayerId, SessionState, TickSequence};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Frame a message under a fresh envelope, read it back, compare both.
    fn roundtrip(seq: u64, msg: &Message) {
        let envelope = Envelope::new(seq, msg.clone());
        let mut wire = Vec::new();
        write_frame(&mut wire, &envelope).unwrap();

        let mut cursor = Cursor::new(&wire);
        let recovered = read_frame(&mut cursor).unwrap();
        assert_eq!(recovered.seq, seq);
        assert_eq!(&recovered.message, msg);
    }

    fn sample_session_info() -> SessionInfo {
        SessionInfo {
            session_id: "session-3".into(),
            game_id: "snake".into(),
            mode: "normal".into(),
            state: SessionState::Lobby,
            max_players: 4,
            players: vec![
                PlayerInfo {
                    id: PlayerId(1),
                    name: "Ann".into(),
                    ready: true,
                },
                PlayerInfo {
                    id: PlayerId(2),
                    name: "Bo".into(),
                    ready: false,
                },
            ],
        }
    }

    #[test]
    fn roundtrip_join() {
        roundtrip(1, &Message::Join { name: "Ann".into() });
    }

    #[test]
    fn roundtrip_join_accepted() {
        roundtrip(
            2,
            &Message::JoinAccepted {
                player_id: PlayerId(2),
                session: sample_session_info(),
            },
        );
    }

    #[test]
    fn roundtrip_join_rejected() {
        roundtrip(
            1,
            &Message::JoinRejected {
                reason: RejectReason::CapacityExceeded,
            },
        );
    }

    #[test]
    fn roundtrip_player_ready() {
        roundtrip(3, &Message::PlayerReady);
    }

    #[test]
    fn roundtrip_state_update() {
        roundtrip(
            10,
            &Message::StateUpdate {
                tick: TickSequence(42),
                snapshot: vec![1, 2, 3, 4, 5],
            },
        );
    }

    #[test]
    fn roundtrip_state_update_empty_snapshot() {
        roundtrip(
            11,
            &Message::StateUpdate {
                tick: TickSequence(1),
                snapshot: vec![],
            },
        );
    }

    #[test]
    fn roundtrip_chat_text() {
        roundtrip(
            4,
            &Message::ChatText {
                player_id: PlayerId(1),
                order: ChatOrder(9),
                text: "good luck, have fun".into(),
            },
        );
    }

    #[test]
    fn roundtrip_chat_text_empty() {
        roundtrip(
            5,
            &Message::ChatText {
                player_id: PlayerId(2),
                order: ChatOrder(10),
                text: String::new(),
            },
        );
    }

    #[test]
    fn roundtrip_player_left() {
        roundtrip(
            6,
            &Message::PlayerLeft {
                player_id: PlayerId(2),
            },
        );
    }

    #[test]
    fn roundtrip_heartbeat() {
        roundtrip(7, &Message::Heartbeat);
    }

    #[test]
    fn roundtrip_error() {
        roundtrip(
            8,
            &Message::Error {
                code: ErrorCode::ProtocolViolation,
                detail: "client sent StateUpdate".into(),
            },
        );
    }

    #[test]
    fn reject_reasons_display() {
        assert_eq!(RejectReason::CapacityExceeded.to_string(), "session is full");
        assert_eq!(
            RejectReason::NotJoinable.to_string(),
            "session is not accepting joins"
        );
        assert_eq!(RejectReason::InvalidName.to_string(), "invalid display name");
    }
}
