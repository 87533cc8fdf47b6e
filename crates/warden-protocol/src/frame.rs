//! Length-prefixed framing.
//!
//! Format: `[4-byte big-endian length][JSON payload]`. Frames larger than
//! [`MAX_FRAME_LEN`] are refused in both directions.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use warden_common::constants::MAX_FRAME_LEN;
use warden_common::error::{Result, WardenError};

fn transport_error(context: &str, err: &io::Error) -> WardenError {
    WardenError::Protocol {
        message: format!("{context}: {err}"),
    }
}

/// Serializes `message` and writes it as one frame.
///
/// # Errors
///
/// Returns [`WardenError::Serialization`] if encoding fails or
/// [`WardenError::Protocol`] if the frame is too large or the write fails.
pub fn write_message<W: Write, T: Serialize>(w: &mut W, message: &T) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| WardenError::Protocol {
            message: format!("frame too large: {} bytes", payload.len()),
        })?;
    w.write_all(&len.to_be_bytes())
        .and_then(|()| w.write_all(&payload))
        .and_then(|()| w.flush())
        .map_err(|e| transport_error("write frame", &e))
}

/// Reads one frame and decodes it.
///
/// Returns `Ok(None)` if the stream ends cleanly before a frame starts.
///
/// # Errors
///
/// Returns [`WardenError::Protocol`] for truncated or oversized frames and
/// read failures, or [`WardenError::Serialization`] if decoding fails.
pub fn read_message<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<Option<T>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match r.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(WardenError::Protocol {
                    message: "stream ended inside frame header".into(),
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(transport_error("read frame header", &e)),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WardenError::Protocol {
            message: format!("frame too large: {len} bytes"),
        });
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .map_err(|e| transport_error("read frame payload", &e))?;
    Ok(Some(serde_json::from_slice(&payload)?))
}
