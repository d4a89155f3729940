//! Framing: 4-byte big-endian signal code + 2-byte big-endian text length + UTF-8 text.
//! Every frame carries exactly one text payload, control frames included.

use crate::protocol::{Frame, Signal};

const SIGNAL_SIZE: usize = 4;
const LEN_SIZE: usize = 2;
const HEADER_SIZE: usize = SIGNAL_SIZE + LEN_SIZE;

/// Longest text payload a frame can carry, in bytes.
pub const MAX_TEXT_LEN: usize = u16::MAX as usize;

/// Encode a frame into its wire bytes.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameEncodeError> {
    let text = frame.text.as_bytes();
    if text.len() > MAX_TEXT_LEN {
        return Err(FrameEncodeError::TooLarge(text.len()));
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + text.len());
    out.extend_from_slice(&frame.signal.code().to_be_bytes());
    out.extend_from_slice(&(text.len() as u16).to_be_bytes());
    out.extend_from_slice(text);
    Ok(out)
}

/// Error encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("text payload of {0} bytes exceeds the 65535-byte frame limit")]
    TooLarge(usize),
}

/// Decode one frame from the front of `bytes`. Returns the frame and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` until the whole frame is present.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameDecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let code = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
    if bytes.len() < HEADER_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let text = std::str::from_utf8(&bytes[HEADER_SIZE..HEADER_SIZE + len])
        .map_err(FrameDecodeError::InvalidText)?;
    Ok((
        Frame::new(Signal::from_code(code), text),
        HEADER_SIZE + len,
    ))
}

/// Error decoding a frame (need more bytes, or the payload is not UTF-8).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("text payload is not valid UTF-8: {0}")]
    InvalidText(#[from] std::str::Utf8Error),
}
