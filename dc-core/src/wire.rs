//! Bridge framing. Each frame is a big-endian `u32` payload length followed by one JSON
//! [`BridgeMessage`]. [`FrameBuffer`] reassembles frames from arbitrary stream reads.

use crate::protocol::BridgeMessage;

const PREFIX: usize = std::mem::size_of::<u32>();
/// Largest payload accepted in either direction.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("message does not serialize: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("payload of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    /// The buffer ends inside a frame.
    #[error("incomplete frame")]
    NeedMore,
    /// Zero-length frame; it carries no message.
    #[error("empty frame")]
    Empty,
    /// Declared length is over [`MAX_PAYLOAD`]. The stream cannot be resynchronised.
    #[error("declared payload of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
    #[error("payload is not a bridge message: {0}")]
    Decode(#[from] serde_json::Error),
}

pub fn encode_frame(msg: &BridgeMessage) -> Result<Vec<u8>, FrameEncodeError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_PAYLOAD {
        return Err(FrameEncodeError::TooLarge(body.len()));
    }
    let mut frame = (body.len() as u32).to_be_bytes().to_vec();
    frame.extend(body);
    Ok(frame)
}

/// Payload length announced by the prefix at the front of `bytes`, once the prefix is complete.
fn declared_len(bytes: &[u8]) -> Result<usize, FrameDecodeError> {
    let prefix: [u8; PREFIX] = bytes
        .get(..PREFIX)
        .and_then(|p| p.try_into().ok())
        .ok_or(FrameDecodeError::NeedMore)?;
    match u32::from_be_bytes(prefix) as usize {
        0 => Err(FrameDecodeError::Empty),
        n if n > MAX_PAYLOAD => Err(FrameDecodeError::TooLarge(n)),
        n => Ok(n),
    }
}

/// Decode the frame at the front of `bytes`, returning the message and the bytes it spans.
pub fn decode_frame(bytes: &[u8]) -> Result<(BridgeMessage, usize), FrameDecodeError> {
    let len = declared_len(bytes)?;
    let body = bytes
        .get(PREFIX..PREFIX + len)
        .ok_or(FrameDecodeError::NeedMore)?;
    Ok((serde_json::from_slice(body)?, PREFIX + len))
}

/// Accumulates stream bytes and yields complete messages in order.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a returned message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete message, `Ok(None)` when more input is needed.
    ///
    /// Empty frames are skipped. A frame whose JSON does not decode is consumed and reported,
    /// so the caller may carry on with the next one. `TooLarge` leaves the buffer untouched.
    pub fn next_message(&mut self) -> Result<Option<BridgeMessage>, FrameDecodeError> {
        loop {
            match decode_frame(&self.buf) {
                Ok((msg, used)) => {
                    self.buf.drain(..used);
                    return Ok(Some(msg));
                }
                Err(FrameDecodeError::NeedMore) => return Ok(None),
                Err(FrameDecodeError::Empty) => {
                    self.buf.drain(..PREFIX);
                }
                Err(FrameDecodeError::Decode(e)) => {
                    let len = declared_len(&self.buf)?;
                    self.buf.drain(..PREFIX + len);
                    return Err(FrameDecodeError::Decode(e));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
