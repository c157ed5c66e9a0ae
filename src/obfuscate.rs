//! Rolling XOR obfuscation of wire bytes.
//!
//! This is NOT encryption. A repeating key is XORed over the byte stream, so
//! anyone who sees enough traffic can recover it. It only hides the frame
//! structure from casual inspection and provides neither confidentiality nor
//! integrity. A key mismatch between peers is not detected: the receiver
//! just sees garbage.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Keystream state for one direction of a session.
///
/// The position persists across calls, so a frame split over many reads (or
/// many small frames) continues exactly where the previous bytes stopped.
#[derive(Clone)]
pub struct RollingXor {
    key: Arc<[u8]>,
    pos: usize,
}

impl RollingXor {
    /// `None` for an empty key, since there is nothing to XOR with.
    pub fn new(key: impl Into<Arc<[u8]>>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() {
            return None;
        }
        Some(Self { key, pos: 0 })
    }

    /// XOR `data` in place and advance the keystream position.
    ///
    /// The position moves before each byte, so the first byte of a session
    /// uses `key[1 % len]`.
    pub fn apply(&mut self, data: &mut [u8]) {
        let len = self.key.len();
        for b in data.iter_mut() {
            self.pos = (self.pos + 1) % len;
            *b ^= self.key[self.pos];
        }
    }

    /// Index of the key byte used last.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl std::fmt::Debug for RollingXor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingXor")
            .field("key_len", &self.key.len())
            .field("pos", &self.pos)
            .finish()
    }
}

/// Reader adapter that removes the obfuscation from everything read through it.
///
/// With no keystream it is a plain pass-through.
#[derive(Debug)]
pub struct Deobfuscated<R> {
    inner: R,
    keystream: Option<RollingXor>,
}

impl<R> Deobfuscated<R> {
    pub fn new(inner: R, keystream: Option<RollingXor>) -> Self {
        Self { inner, keystream }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Deobfuscated<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if let Some(keystream) = this.keystream.as_mut() {
            keystream.apply(&mut buf.filled_mut()[before..]);
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_empty_key_disables_obfuscation() {
        assert!(RollingXor::new(Vec::<u8>::new()).is_none());
    }

    #[test]
    fn test_apply_twice_restores_input() {
        let mut enc = RollingXor::new(b"secret".to_vec()).unwrap();
        let mut dec = RollingXor::new(b"secret".to_vec()).unwrap();

        let original = b"multiplexed bytes".to_vec();
        let mut data = original.clone();
        enc.apply(&mut data);
        assert_ne!(data, original);
        dec.apply(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_position_persists_across_calls() {
        let mut whole = RollingXor::new(b"abc".to_vec()).unwrap();
        let mut split = RollingXor::new(b"abc".to_vec()).unwrap();

        let mut a = vec![0u8; 7];
        whole.apply(&mut a);

        let mut b1 = vec![0u8; 2];
        let mut b2 = vec![0u8; 5];
        split.apply(&mut b1);
        split.apply(&mut b2);
        b1.extend_from_slice(&b2);

        assert_eq!(a, b1);
        assert_eq!(a, b"bcabcab".to_vec());
        assert_eq!(whole.position(), 1);
    }

    #[test]
    fn test_first_byte_uses_second_key_byte() {
        let mut keystream = RollingXor::new(b"ab".to_vec()).unwrap();
        let mut data = [0u8; 4];
        keystream.apply(&mut data);
        assert_eq!(data, *b"baba");

        let mut single = RollingXor::new(b"z".to_vec()).unwrap();
        let mut data = [0u8; 2];
        single.apply(&mut data);
        assert_eq!(data, *b"zz");
    }

    #[tokio::test]
    async fn test_deobfuscated_reader_across_small_reads() {
        let mut enc = RollingXor::new(b"k1".to_vec()).unwrap();
        let mut wire = b"frame bytes over the wire".to_vec();
        enc.apply(&mut wire);

        let mut reader = Deobfuscated::new(&wire[..], RollingXor::new(b"k1".to_vec()));
        let mut out = Vec::new();
        let mut chunk = [0u8; 3];
        loop {
            let n = reader.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, b"frame bytes over the wire".to_vec());
    }

    #[tokio::test]
    async fn test_passthrough_without_key() {
        let mut reader = Deobfuscated::new(&b"plain"[..], None);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "plain");
    }
}
