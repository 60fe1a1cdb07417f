// Length-delimited framing over TCP.
//
// One frame = a 4-byte big-endian length prefix followed by a JSON-encoded
// `Envelope`: the protocol version, the per-connection send sequence, and the
// `Message` itself. `write_frame` serializes and delimits; `read_frame`
// validates and decodes. Decoding is pure — connection policy on failure
// (close, log, ignore) belongs to the caller.
//
// A `MAX_FRAME_SIZE` bound (1 MiB) protects against unbounded allocation from
// malformed or malicious length prefixes. Game-state snapshots are the
// largest expected payloads and stay far below it for terminal games.
//
// `read_frame` distinguishes a clean close at a frame boundary
// (`FrameError::Closed`, a graceful disconnect) from truncation inside a
// frame (`FrameError::Malformed`) — the session layer treats the first as a
// departure and the second as a wire fault.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;

/// Wire protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum allowed frame payload size (1 MiB). Protects against unbounded
/// allocation from malformed length prefixes.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// What one frame carries: version, send sequence, message.
///
/// The sequence number is assigned by the sending side at send time and
/// increases by one per frame on that connection; receivers use it to detect
/// gaps and reorderings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub seq: u64,
    pub message: Message,
}

impl Envelope {
    /// Wrap a message for sending under the current protocol version.
    pub fn new(seq: u64, message: Message) -> Self {
        Envelope {
            version: PROTOCOL_VERSION,
            seq,
            message,
        }
    }
}

/// Failure while reading or writing one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream closed cleanly at a frame boundary.
    #[error("connection closed")]
    Closed,
    /// The frame violates the wire format: truncated, undecodable payload,
    /// or unrecognized message tag.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Declared or actual payload length exceeds `MAX_FRAME_SIZE`.
    #[error("frame of {len} bytes exceeds the frame size limit")]
    Oversize { len: u64 },
    /// The envelope carries a version this build does not speak.
    #[error("unsupported protocol version {got}")]
    Version { got: u32 },
    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Write one frame: 4-byte big-endian payload length, then the JSON envelope.
pub fn write_frame<W: Write>(writer: &mut W, envelope: &Envelope) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(envelope)
        .map_err(|e| FrameError::Malformed(format!("unencodable message: {e}")))?;
    let len = payload.len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(FrameError::Oversize { len: len as u64 });
    }
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame and decode its envelope.
///
/// Returns `Closed` when the stream ends exactly on a frame boundary,
/// `Malformed` when it ends inside a frame or the payload does not decode,
/// `Oversize`/`Version` for the respective bound violations.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Envelope, FrameError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Err(FrameError::Closed),
            Ok(0) => {
                return Err(FrameError::Malformed(
                    "stream closed inside a length prefix".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::Oversize {
            len: u64::from(len),
        });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Malformed("stream closed inside a frame payload".to_string())
        } else {
            FrameError::Io(e)
        }
    })?;
    let envelope: Envelope = serde_json::from_slice(&payload)
        .map_err(|e| FrameError::Malformed(format!("undecodable payload: {e}")))?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(FrameError::Version {
            got: envelope.version,
        });
    }
    Ok(envelope)
}
