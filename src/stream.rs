//! Logical streams multiplexed over a session.
//!
//! A stream is created unsynced when opened locally and becomes synced once
//! its first chunk (flagged OPEN) has been written. Streams opened by the
//! peer start synced. Independently of that, a stream ends either closed by
//! the peer (buffered bytes stay readable, then reads return `Ok(0)`) or
//! closed locally. Each side tears down on its own; there is no close
//! handshake.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::SessionShared;
use crate::types::{Flag, Frame, MuxError, Result, StreamId, MAX_PAYLOAD};

/// Handle to one logical stream. Clones share the same stream.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: StreamId,
    session: Arc<SessionShared>,
    synced: AtomicBool,
    closed: AtomicBool,
    write_lock: tokio::sync::Mutex<()>,
    recv: Mutex<RecvState>,
    /// Holds at most one pending wake-up; repeated notifications collapse.
    readable: Notify,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RecvState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    read_deadline: Option<Instant>,
    closed_by_peer: bool,
}

impl RecvState {
    fn push(&mut self, chunk: Bytes) {
        self.buffered += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Move as many buffered bytes as fit into `dst`, oldest first.
    fn take(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            copied += n;
        }
        self.buffered -= copied;
        copied
    }
}

impl Stream {
    /// Locally opened stream; nothing has been sent yet.
    pub(crate) fn outbound(session: Arc<SessionShared>, id: StreamId) -> Self {
        Self::new(session, id, false)
    }

    /// Stream announced by an OPEN frame from the peer.
    pub(crate) fn inbound(session: Arc<SessionShared>, id: StreamId) -> Self {
        Self::new(session, id, true)
    }

    fn new(session: Arc<SessionShared>, id: StreamId, synced: bool) -> Self {
        let cancel = session.cancel.child_token();
        Self {
            inner: Arc::new(StreamInner {
                id,
                session,
                synced: AtomicBool::new(synced),
                closed: AtomicBool::new(false),
                write_lock: tokio::sync::Mutex::new(()),
                recv: Mutex::new(RecvState::default()),
                readable: Notify::new(),
                cancel,
            }),
        }
    }

    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    /// Whether an OPEN frame for this stream is on the wire.
    pub fn is_synced(&self) -> bool {
        self.inner.synced.load(Ordering::Acquire)
    }

    /// Whether the stream was closed, locally or by the peer.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_closed_by_peer(&self) -> bool {
        self.recv_state().closed_by_peer
    }

    /// Bytes received but not read yet.
    pub fn buffered(&self) -> usize {
        self.recv_state().buffered
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.recv_state().read_deadline
    }

    /// Write all of `buf`, split into frames of at most 65535 bytes.
    ///
    /// The first frame ever sent for the stream carries the OPEN flag. A
    /// transport error aborts the write and is returned as is; nothing is
    /// retried.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.ensure_open()?;

        let _guard = self.inner.write_lock.lock().await;
        self.ensure_open()?;

        for chunk in buf.chunks(MAX_PAYLOAD) {
            let flag = if self.is_synced() {
                Flag::Data
            } else {
                Flag::Open
            };
            let frame = Frame::new(flag, self.inner.id, Bytes::copy_from_slice(chunk));
            self.inner.session.write_frame(frame).await?;
            if flag == Flag::Open {
                self.inner.synced.store(true, Ordering::Release);
            }
        }

        Ok(buf.len())
    }

    /// Read buffered bytes into `buf`, waiting for data if none are buffered.
    ///
    /// Returns `Ok(0)` for an empty `buf`, and once the peer closed the
    /// stream and everything it sent has been read. Fails with
    /// [`MuxError::DeadlineExceeded`] when the read deadline passes, and with
    /// [`MuxError::StreamClosed`] / [`MuxError::SessionClosed`] after a local
    /// close.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let deadline = {
                let mut state = self.recv_state();
                if state.buffered > 0 {
                    return Ok(state.take(buf));
                }
                if state.closed_by_peer {
                    return Ok(0);
                }
                // Checked under the lock: a peer close sets the flag here
                // before it cancels.
                if self.inner.cancel.is_cancelled() {
                    return Err(self.closed_error());
                }
                state.read_deadline
            };

            let expired = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.inner.readable.notified() => {}
                _ = self.inner.cancel.cancelled() => {}
                _ = expired => return Err(MuxError::DeadlineExceeded),
            }
        }
    }

    /// Fill `buf` completely.
    ///
    /// Running into the end of the stream first is an `UnexpectedEof`
    /// transport error.
    pub async fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(MuxError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream {} ended after {} bytes", self.inner.id, filled),
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Read until the peer closes the stream, appending to `out`.
    pub async fn read_to_end(&self, out: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = vec![0u8; 16 * 1024];
        let mut total = 0;
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// Close the stream. Only the first call has any effect.
    ///
    /// The stream leaves the session table, a CLOSE frame is sent if the
    /// peer ever learned about the stream, and pending reads are woken.
    /// Waits for a write in progress on this stream to finish first.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(MuxError::AlreadyClosed(self.inner.id));
        }
        self.inner.session.streams.remove_stream(self);

        {
            let _guard = self.inner.write_lock.lock().await;
            if self.is_synced() {
                let frame = Frame::close(self.inner.id);
                if let Err(e) = self.inner.session.write_frame(frame).await {
                    debug!("Stream {} CLOSE not sent: {}", self.inner.id, e);
                }
            }
        }

        self.inner.cancel.cancel();
        debug!("Stream {} closed", self.inner.id);
        Ok(())
    }

    /// Set the read and write deadlines. `None` clears them.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    /// Set the absolute point in time after which a waiting read fails.
    ///
    /// A read that is already waiting is woken to pick up the new deadline.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.recv_state().read_deadline = deadline;
        self.inner.readable.notify_one();
    }

    /// Accepted for interface compatibility; writes have no deadline.
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) {}

    /// Same underlying stream as `other`.
    pub fn same_as(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Buffer a payload delivered by the dispatch task and wake a reader.
    pub(crate) fn receive(&self, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        self.recv_state().push(payload);
        self.inner.readable.notify_one();
    }

    /// Apply a CLOSE frame from the peer. No CLOSE is sent back.
    pub(crate) fn close_by_peer(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.session.streams.remove_stream(self);
        self.recv_state().closed_by_peer = true;
        self.inner.cancel.cancel();
        debug!("Stream {} closed by peer", self.inner.id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn closed_error(&self) -> MuxError {
        if self.inner.session.cancel.is_cancelled() {
            MuxError::SessionClosed
        } else {
            MuxError::StreamClosed(self.inner.id)
        }
    }

    fn recv_state(&self) -> MutexGuard<'_, RecvState> {
        self.inner.recv.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("synced", &self.is_synced())
            .field("closed", &self.is_closed())
            .finish()
    }
}
