//! # muxwire
//!
//! Multiplexes many independent, bidirectional byte streams over one
//! reliable, ordered transport such as a TCP connection.
//!
//! ## Quick Start
//!
//! ```no_run
//! use muxwire::{Config, Session};
//!
//! # async fn demo() -> muxwire::Result<()> {
//! let session = muxwire::tcp::connect("127.0.0.1:6969", Config::default()).await?;
//!
//! let stream = session.open()?;
//! stream.write(b"hello").await?;
//!
//! let mut reply = [0u8; 5];
//! stream.read_exact(&mut reply).await?;
//! stream.close().await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Wire Format
//!
//! Every frame is a 7-byte header followed by the payload:
//!
//! | Offset | Size | Field     | Encoding                  |
//! |--------|------|-----------|---------------------------|
//! | 0      | 1    | flag      | 0 = OPEN, 1 = CLOSE, 2 = DATA |
//! | 1      | 4    | stream id | big-endian                |
//! | 5      | 2    | length    | big-endian, payload bytes |
//!
//! A stream's first frame is OPEN and carries data. Writes larger than
//! 65535 bytes are split over several frames. CLOSE carries no payload.
//!
//! ## Stream Ids
//!
//! The initiator allocates even ids (2, 4, ...), the acceptor odd ids
//! (3, 5, ...), so both ends can open streams without coordination.
//!
//! ## Obfuscation
//!
//! With a key configured, every byte on the wire is XORed with a rolling
//! key. That is obfuscation, not encryption; see [`obfuscate`].

pub mod codec;
pub mod config;
pub mod frame;
pub mod obfuscate;
pub mod pool;
pub mod session;
pub mod stream;
mod table;
pub mod tcp;
pub mod types;

// Re-export main types for convenience
pub use codec::MuxFrameCodec;
pub use config::{Config, Role};
pub use frame::{encode_frame, try_decode_frame, FrameHeader};
pub use obfuscate::RollingXor;
pub use pool::TaskPool;
pub use session::Session;
pub use stream::Stream;
pub use types::{Flag, Frame, MuxError, Result, StreamId, HEADER_SIZE, MAX_PAYLOAD};
