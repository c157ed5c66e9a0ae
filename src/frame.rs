//! Frame encoding and decoding.
//!
//! Layout, all multi-byte fields big-endian:
//!
//! ```text
//! +------+-----------+--------+-----------------+
//! | flag | stream id | length | payload         |
//! | 1B   | 4B        | 2B     | length bytes    |
//! +------+-----------+--------+-----------------+
//! ```

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};

use crate::types::{Flag, Frame, MuxError, Result, StreamId, HEADER_SIZE, MAX_PAYLOAD};

/// Parsed fixed-size header of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flag: Flag,
    pub stream_id: StreamId,
    pub length: u16,
}

impl FrameHeader {
    /// Parse the first `HEADER_SIZE` bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(MuxError::TruncatedFrame {
                expected: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let flag = Flag::try_from(buf[0])?;
        let stream_id = BigEndian::read_u32(&buf[1..5]);
        let length = BigEndian::read_u16(&buf[5..7]);

        Ok(Self {
            flag,
            stream_id,
            length,
        })
    }

    pub fn write(&self, dst: &mut [u8; HEADER_SIZE]) {
        dst[0] = self.flag.to_u8();
        BigEndian::write_u32(&mut dst[1..5], self.stream_id);
        BigEndian::write_u16(&mut dst[5..7], self.length);
    }

    /// Header plus payload length.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// Append the wire form of `frame` to `dst`.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let size = frame.payload.len();
    if size > MAX_PAYLOAD {
        return Err(MuxError::PayloadTooLarge(size));
    }

    let header = FrameHeader {
        flag: frame.flag,
        stream_id: frame.stream_id,
        length: size as u16,
    };
    let mut raw = [0u8; HEADER_SIZE];
    header.write(&mut raw);

    dst.reserve(HEADER_SIZE + size);
    dst.put_slice(&raw);
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` and leaves `src` untouched when the header or the
/// payload is not complete yet.
pub fn try_decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::parse(&src[..HEADER_SIZE])?;
    let total = header.frame_len();
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.length as usize).freeze();

    Ok(Some(Frame {
        flag: header.flag,
        stream_id: header.stream_id,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_header_layout_is_big_endian() {
        let frame = Frame::data(0x0102_0304, Bytes::from_static(b"hey"));
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf).unwrap();

        assert_eq!(
            &buf[..],
            &[0x02, 0x01, 0x02, 0x03, 0x04, 0x00, 0x03, b'h', b'e', b'y']
        );
    }

    #[test]
    fn test_close_frame_is_header_only() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::close(9), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x01, 0, 0, 0, 9, 0, 0]);
    }

    #[test]
    fn test_decode_waits_for_complete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::open(2, vec![7u8; 32]), &mut buf).unwrap();
        let full = buf.clone();

        let mut partial = BytesMut::from(&full[..HEADER_SIZE + 10]);
        assert!(try_decode_frame(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), HEADER_SIZE + 10);

        let mut header_only = BytesMut::from(&full[..4]);
        assert!(try_decode_frame(&mut header_only).unwrap().is_none());

        let mut complete = full;
        let frame = try_decode_frame(&mut complete).unwrap().unwrap();
        assert_eq!(frame.flag, Flag::Open);
        assert_eq!(frame.stream_id, 2);
        assert_eq!(frame.payload.len(), 32);
        assert!(complete.is_empty());
    }

    #[test]
    fn test_decode_leaves_following_frame_in_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(4, Bytes::from_static(b"one")), &mut buf).unwrap();
        encode_frame(&Frame::close(4), &mut buf).unwrap();

        let first = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"one"));
        assert_eq!(buf.len(), HEADER_SIZE);

        let second = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(second, Frame::close(4));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let mut buf = BytesMut::from(&[0x07u8, 0, 0, 0, 1, 0, 0][..]);
        assert!(matches!(
            try_decode_frame(&mut buf),
            Err(MuxError::UnknownFlag(0x07))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let frame = Frame::data(2, vec![0u8; MAX_PAYLOAD + 1]);
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_frame(&frame, &mut buf),
            Err(MuxError::PayloadTooLarge(n)) if n == MAX_PAYLOAD + 1
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_max_payload_fits() {
        let frame = Frame::data(2, vec![1u8; MAX_PAYLOAD]);
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf).unwrap();
        assert_eq!(&buf[5..7], &[0xFF, 0xFF]);
        assert_eq!(buf.len(), HEADER_SIZE + MAX_PAYLOAD);
    }
}
