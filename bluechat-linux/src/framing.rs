//! `tokio_util` codec over the core frame encoding, so workers can use `FramedRead`/`FramedWrite`.

use bluechat_core::wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
use bluechat_core::Frame;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("stream i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        match decode_frame(src) {
            Ok((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(FrameDecodeError::NeedMore) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let bytes = encode_frame(&frame)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluechat_core::Signal;
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[test]
    fn decode_waits_for_whole_frame() {
        let bytes = encode_frame(&Frame::new(Signal::Message, "hello")).unwrap();
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[5..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.text, "hello");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn frames_cross_a_stream() {
        let (a, b) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(a, FrameCodec);
        let mut stream = FramedRead::new(b, FrameCodec);
        sink.send(Frame::new(Signal::Handshake, "B")).await.unwrap();
        sink.send(Frame::control(Signal::Terminate)).await.unwrap();
        drop(sink);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.signal, Signal::Handshake);
        assert_eq!(first.text, "B");
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.signal, Signal::Terminate);
        assert!(stream.next().await.is_none());
    }
}
