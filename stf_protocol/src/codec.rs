//! Framing of the protocol on a byte stream.
//!
//! Every frame is `u32 LE length | u8 version | u64 LE request id | payload`, the length covering
//! everything after itself. Payloads are bincode with the standard configuration, limited to the
//! frame size so a forged length prefix cannot make the decoder allocate more than a frame.

use bincode::config::Config;
use bincode::{Decode, Encode};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use stf_traits::{StfError, StfResult};

pub const PROTOCOL_VERSION: u8 = 1;

/// Largest accepted frame, header included.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const HEADER_LEN: usize = 1 + 8;

/// A frame with its payload still encoded.
///
/// The request id is readable even when the payload is not, so a malformed request can still be
/// answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub request_id: u64,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn decode<T: Decode<()>>(&self) -> StfResult<T> {
        decode_payload(&self.payload)
    }
}

fn wire_config() -> impl Config {
    bincode::config::standard().with_limit::<MAX_FRAME_LEN>()
}

pub fn encode_payload<T: Encode>(message: &T) -> StfResult<Vec<u8>> {
    bincode::encode_to_vec(message, wire_config())
        .map_err(|e| StfError::new_with_cause("bincode encode failed", e))
}

pub fn decode_payload<T: Decode<()>>(bytes: &[u8]) -> StfResult<T> {
    let (decoded, read): (T, usize) =
        bincode::decode_from_slice(bytes, wire_config())
            .map_err(|e| StfError::new_with_cause("bincode decode failed", e))?;
    if read != bytes.len() {
        return Err(format!(
            "trailing bytes after payload: decoded {read} of {} bytes",
            bytes.len()
        )
        .into());
    }
    Ok(decoded)
}

pub fn write_frame<W: Write>(writer: &mut W, request_id: u64, payload: &[u8]) -> StfResult<()> {
    let len = HEADER_LEN + payload.len();
    if len > MAX_FRAME_LEN {
        return Err(format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit").into());
    }
    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_le_bytes());
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(payload);
    writer
        .write_all(&frame)
        .and_then(|_| writer.flush())
        .map_err(|e| StfError::new_with_cause("failed to write frame", e))
}

/// Encodes `message` and writes it as one frame.
pub fn write_message<W: Write, T: Encode>(
    writer: &mut W,
    request_id: u64,
    message: &T,
) -> StfResult<()> {
    let payload = encode_payload(message)?;
    write_frame(writer, request_id, &payload)
}

/// Reads the next frame. Returns `Ok(None)` when the peer closed the stream between frames.
pub fn read_frame<R: Read>(reader: &mut R) -> StfResult<Option<RawFrame>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(StfError::new_with_cause("failed to read frame length", e)),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&len) {
        return Err(format!("invalid frame length {len}").into());
    }

    let mut frame = vec![0u8; len];
    reader
        .read_exact(&mut frame)
        .map_err(|e| StfError::new_with_cause("truncated frame", e))?;

    let version = frame[0];
    if version != PROTOCOL_VERSION {
        return Err(format!(
            "unsupported protocol version {version}, expected {PROTOCOL_VERSION}"
        )
        .into());
    }
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&frame[1..HEADER_LEN]);
    Ok(Some(RawFrame {
        request_id: u64::from_le_bytes(id_bytes),
        payload: frame.split_off(HEADER_LEN),
    }))
}
