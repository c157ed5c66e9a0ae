//! Core wire types and the crate error.

use bytes::Bytes;
use std::fmt;
use std::io;
use thiserror::Error;

/// Identifier of a logical stream within one session.
pub type StreamId = u32;

/// Size of the fixed frame header: flag (1) + stream id (4) + length (2).
pub const HEADER_SIZE: usize = 7;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Frame kind carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    /// First frame of a stream; may carry payload.
    Open = 0,
    /// The sender closed its side of the stream.
    Close = 1,
    /// Payload for an already opened stream.
    Data = 2,
}

impl Flag {
    /// Wire representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Flag {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Flag::Open),
            1 => Ok(Flag::Close),
            2 => Ok(Flag::Data),
            other => Err(MuxError::UnknownFlag(other)),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flag::Open => "OPEN",
            Flag::Close => "CLOSE",
            Flag::Data => "DATA",
        };
        f.write_str(name)
    }
}

/// One header + payload unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flag: Flag,
    pub stream_id: StreamId,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(flag: Flag, stream_id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self {
            flag,
            stream_id,
            payload: payload.into(),
        }
    }

    /// OPEN frame carrying the first chunk of a stream.
    pub fn open(stream_id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self::new(Flag::Open, stream_id, payload)
    }

    pub fn data(stream_id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self::new(Flag::Data, stream_id, payload)
    }

    /// CLOSE frames never carry payload.
    pub fn close(stream_id: StreamId) -> Self {
        Self::new(Flag::Close, stream_id, Bytes::new())
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame Flag: {}, StreamID: {}, Datasize: {}",
            self.flag,
            self.stream_id,
            self.payload.len()
        )
    }
}

/// Errors produced by sessions, streams and their collaborators.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("session closed")]
    SessionClosed,

    #[error("stream {0} closed")]
    StreamClosed(StreamId),

    #[error("stream {0} already closed")]
    AlreadyClosed(StreamId),

    #[error("read deadline exceeded")]
    DeadlineExceeded,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("truncated frame: expected {expected} bytes, {available} available")]
    TruncatedFrame { expected: usize, available: usize },

    #[error("unknown frame flag 0x{0:02x}")]
    UnknownFlag(u8),

    #[error("payload of {0} bytes exceeds the 65535 byte frame limit")]
    PayloadTooLarge(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("task pool closed")]
    PoolClosed,
}

impl MuxError {
    /// Whether the error tears down the whole session rather than one stream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuxError::SessionClosed
                | MuxError::Transport(_)
                | MuxError::TruncatedFrame { .. }
                | MuxError::UnknownFlag(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
