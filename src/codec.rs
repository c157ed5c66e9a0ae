//! `tokio_util` codec for mux frames.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{encode_frame, try_decode_frame, FrameHeader};
use crate::types::{Frame, MuxError, HEADER_SIZE};

/// Frame codec used on both directions of a session transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct MuxFrameCodec;

impl MuxFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MuxFrameCodec {
    type Item = Frame;
    type Error = MuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        try_decode_frame(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                // The transport ended in the middle of a frame.
                let expected = if src.len() < HEADER_SIZE {
                    HEADER_SIZE
                } else {
                    FrameHeader::parse(&src[..HEADER_SIZE])?.frame_len()
                };
                Err(MuxError::TruncatedFrame {
                    expected,
                    available: src.len(),
                })
            }
        }
    }
}

impl Encoder<Frame> for MuxFrameCodec {
    type Error = MuxError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    #[test]
    fn test_decode_eof_reports_truncated_payload() {
        let mut codec = MuxFrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::data(6, Bytes::from_static(b"abcdef")), &mut buf)
            .unwrap();
        buf.truncate(HEADER_SIZE + 2);

        match codec.decode_eof(&mut buf) {
            Err(MuxError::TruncatedFrame {
                expected,
                available,
            }) => {
                assert_eq!(expected, HEADER_SIZE + 6);
                assert_eq!(available, HEADER_SIZE + 2);
            }
            other => panic!("expected truncated frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_eof_reports_truncated_header() {
        let mut codec = MuxFrameCodec::new();
        let mut buf = BytesMut::from(&[0x02u8, 0, 0][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(MuxError::TruncatedFrame {
                expected: HEADER_SIZE,
                available: 3
            })
        ));
    }

    #[test]
    fn test_decode_eof_on_clean_boundary() {
        let mut codec = MuxFrameCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_framed_read_splits_byte_stream() {
        let mut codec = MuxFrameCodec::new();
        let mut wire = BytesMut::new();
        codec
            .encode(Frame::open(2, Bytes::from_static(b"hello")), &mut wire)
            .unwrap();
        codec
            .encode(Frame::data(2, Bytes::from_static(b" world")), &mut wire)
            .unwrap();
        codec.encode(Frame::close(2), &mut wire).unwrap();

        let mut frames = FramedRead::new(&wire[..], MuxFrameCodec::new());
        let mut seen = Vec::new();
        while let Some(frame) = frames.next().await {
            seen.push(frame.unwrap());
        }

        assert_eq!(
            seen,
            vec![
                Frame::open(2, Bytes::from_static(b"hello")),
                Frame::data(2, Bytes::from_static(b" world")),
                Frame::close(2),
            ]
        );
    }
}
