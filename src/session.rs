//! Session (muxer): owns the transport and routes frames to streams.
//!
//! One background task per session reads frames strictly in order and
//! applies them:
//!
//! - `OPEN`: register a new stream, buffer its payload, hand it to `accept()`
//! - `DATA`: append to the addressed stream; unknown ids are dropped
//! - `CLOSE`: mark the addressed stream closed by the peer
//!
//! Any read failure, including a transport that ends in the middle of a
//! frame, ends that task and closes the whole session. Every stream of the
//! session fails with it.
//!
//! The accept queue is the only bounded resource. When it is full (with the
//! default backlog of 0: whenever nobody is waiting in `accept()`), the
//! dispatch task waits, and frames for every other stream of the session
//! wait with it until the application accepts.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::MuxFrameCodec;
use crate::config::{Config, Role};
use crate::obfuscate::{Deobfuscated, RollingXor};
use crate::stream::Stream;
use crate::table::StreamTable;
use crate::types::{Flag, Frame, MuxError, Result, MAX_PAYLOAD};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type FrameSource = FramedRead<Deobfuscated<BoxedRead>, MuxFrameCodec>;

/// A multiplexed session over one transport connection.
///
/// Cloning yields another handle to the same session.
///
/// # Example
///
/// ```no_run
/// use muxwire::{Config, Session};
///
/// # async fn demo() -> muxwire::Result<()> {
/// let (left, right) = tokio::io::duplex(64 * 1024);
/// let client = Session::initiator(left, Config::default())?;
/// let server = Session::acceptor(right, Config::default())?;
///
/// let stream = client.open()?;
/// stream.write(b"ping").await?;
///
/// let peer = server.accept().await?;
/// let mut buf = [0u8; 4];
/// peer.read_exact(&mut buf).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

pub(crate) struct SessionShared {
    role: Role,
    next_id: AtomicU32,
    pub(crate) streams: StreamTable,
    writer: Mutex<FrameWriter>,
    accepts: Mutex<mpsc::Receiver<Stream>>,
    pub(crate) cancel: CancellationToken,
    close_requested: AtomicBool,
    shut_down: AtomicBool,
    done: CancellationToken,
}

/// Write half of the transport plus the write-direction keystream.
///
/// Only reachable through the session write lock, which keeps frames from
/// different streams from interleaving on the wire.
struct FrameWriter {
    sink: BoxedWrite,
    keystream: Option<RollingXor>,
    codec: MuxFrameCodec,
    buf: BytesMut,
}

impl FrameWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.buf.clear();
        self.codec.encode(frame, &mut self.buf)?;
        if let Some(keystream) = self.keystream.as_mut() {
            keystream.apply(&mut self.buf[..]);
        }
        self.sink.write_all(&self.buf).await?;
        self.sink.flush().await?;
        Ok(())
    }
}

/// Sending side of the accept queue, owned by the dispatch task.
struct AcceptQueue {
    tx: mpsc::Sender<Stream>,
    rendezvous: bool,
}

impl AcceptQueue {
    async fn push(&self, stream: Stream) -> Result<()> {
        self.tx
            .send(stream)
            .await
            .map_err(|_| MuxError::SessionClosed)?;
        if self.rendezvous {
            // The single slot frees up only once accept() has taken the stream.
            let _permit = self
                .tx
                .reserve()
                .await
                .map_err(|_| MuxError::SessionClosed)?;
        }
        Ok(())
    }
}

impl Session {
    /// Wrap `transport` and start the dispatch task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T>(transport: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        if let Some(size) = config.max_frame_size {
            debug!(
                "max_frame_size {} accepted but not applied, frames split at {} bytes",
                size, MAX_PAYLOAD
            );
        }

        let Config {
            role,
            backlog,
            capacity,
            key,
            ..
        } = config;

        let key: Option<Arc<[u8]>> = key.map(Arc::from);
        let read_keystream = key.clone().and_then(RollingXor::new);
        let write_keystream = key.and_then(RollingXor::new);

        let (read_half, write_half) = tokio::io::split(transport);
        let (accept_tx, accept_rx) = mpsc::channel(backlog.max(1));

        let shared = Arc::new(SessionShared {
            role,
            next_id: AtomicU32::new(role.id_seed()),
            streams: StreamTable::with_capacity(capacity),
            writer: Mutex::new(FrameWriter {
                sink: Box::new(write_half),
                keystream: write_keystream,
                codec: MuxFrameCodec::new(),
                buf: BytesMut::new(),
            }),
            accepts: Mutex::new(accept_rx),
            cancel: CancellationToken::new(),
            close_requested: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            done: CancellationToken::new(),
        });

        let reader: BoxedRead = Box::new(read_half);
        let frames = FramedRead::new(
            Deobfuscated::new(reader, read_keystream),
            MuxFrameCodec::new(),
        );
        let queue = AcceptQueue {
            tx: accept_tx,
            rendezvous: backlog == 0,
        };
        tokio::spawn(dispatch(Arc::clone(&shared), frames, queue));

        info!("Session started as {:?} (backlog {})", role, backlog);
        Ok(Self { shared })
    }

    /// Session that allocates even stream ids.
    pub fn initiator<T>(transport: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::new(transport, config.with_role(Role::Initiator))
    }

    /// Session that allocates odd stream ids.
    pub fn acceptor<T>(transport: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::new(transport, config.with_role(Role::Acceptor))
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Create a locally initiated stream.
    ///
    /// Nothing goes on the wire until the first write, which carries the
    /// OPEN flag.
    pub fn open(&self) -> Result<Stream> {
        if self.shared.cancel.is_cancelled() {
            return Err(MuxError::SessionClosed);
        }

        let id = self
            .shared
            .next_id
            .fetch_add(2, Ordering::Relaxed)
            .wrapping_add(2);
        let stream = Stream::outbound(Arc::clone(&self.shared), id);
        self.shared.streams.insert(stream.clone());
        debug!("Stream {} opened", id);
        Ok(stream)
    }

    /// Wait for the next stream opened by the peer.
    pub async fn accept(&self) -> Result<Stream> {
        let cancel = &self.shared.cancel;
        if cancel.is_cancelled() {
            return Err(MuxError::SessionClosed);
        }

        let mut accepts = tokio::select! {
            _ = cancel.cancelled() => return Err(MuxError::SessionClosed),
            accepts = self.shared.accepts.lock() => accepts,
        };

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MuxError::SessionClosed),
            next = accepts.recv() => next.ok_or(MuxError::SessionClosed)?,
        };
        debug!("Stream {} accepted", stream.id());
        Ok(stream)
    }

    /// Close the session: cancel every stream and shut the transport down.
    ///
    /// Pending `accept()` and `read()` calls return an error. A second call
    /// reports [`MuxError::SessionClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.shared.close_requested.swap(true, Ordering::AcqRel) {
            return Err(MuxError::SessionClosed);
        }
        self.shared.cancel.cancel();
        match self.shared.shutdown_transport().await {
            // The dispatch task got there first.
            Ok(()) | Err(MuxError::SessionClosed) => {}
            Err(e) => return Err(e),
        }
        info!("Session closed");
        Ok(())
    }

    /// Visit a snapshot of the registered streams until `visit` returns false.
    ///
    /// Streams opened or closed during the walk do not affect it.
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&Stream) -> bool,
    {
        for stream in self.shared.streams.snapshot() {
            if !visit(&stream) {
                break;
            }
        }
    }

    pub fn stream_count(&self) -> usize {
        self.shared.streams.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves once the dispatch task has torn the session down.
    pub async fn closed(&self) {
        self.shared.done.cancelled().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.shared.role)
            .field("streams", &self.shared.streams.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionShared {
    /// Serialize one frame onto the transport under the session write lock.
    ///
    /// A failed write is fatal: the session is cancelled.
    pub(crate) async fn write_frame(&self, frame: Frame) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MuxError::SessionClosed);
        }

        let mut writer = tokio::select! {
            _ = self.cancel.cancelled() => return Err(MuxError::SessionClosed),
            writer = self.writer.lock() => writer,
        };
        if self.cancel.is_cancelled() {
            return Err(MuxError::SessionClosed);
        }

        trace!("Sending {}", frame);
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => Err(MuxError::SessionClosed),
            sent = writer.send(frame) => sent,
        };

        if let Err(e) = &sent {
            if e.is_fatal() && !matches!(e, MuxError::SessionClosed) {
                warn!("Transport write failed, closing session: {}", e);
                self.cancel.cancel();
            }
        }
        sent
    }

    async fn shutdown_transport(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(MuxError::SessionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.sink.shutdown().await?;
        Ok(())
    }

    async fn route(self: &Arc<Self>, frame: Frame, accepts: &AcceptQueue) -> Result<()> {
        let Frame {
            flag,
            stream_id,
            payload,
        } = frame;

        match flag {
            Flag::Open => {
                let stream = Stream::inbound(Arc::clone(self), stream_id);
                if self.streams.insert(stream.clone()).is_some() {
                    warn!("Stream {} reopened by peer, replacing old entry", stream_id);
                }
                stream.receive(payload);
                debug!("Stream {} opened by peer", stream_id);

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(MuxError::SessionClosed),
                    pushed = accepts.push(stream) => pushed,
                }
            }
            Flag::Data => {
                match self.streams.get(stream_id) {
                    Some(stream) => stream.receive(payload),
                    None => trace!(
                        "Dropping {} bytes for unknown stream {}",
                        payload.len(),
                        stream_id
                    ),
                }
                Ok(())
            }
            Flag::Close => {
                match self.streams.get(stream_id) {
                    Some(stream) => stream.close_by_peer(),
                    None => trace!("Dropping CLOSE for unknown stream {}", stream_id),
                }
                Ok(())
            }
        }
    }

    /// Final cleanup once the dispatch task stops.
    async fn terminate(&self) {
        self.cancel.cancel();
        if let Err(e) = self.shutdown_transport().await {
            trace!("Transport shutdown skipped: {}", e);
        }

        // Streams hold the session; dropping the table entries breaks the cycle.
        let dropped = self.streams.drain();
        if !dropped.is_empty() {
            debug!("{} streams closed with the session", dropped.len());
        }
        if let Ok(mut accepts) = self.accepts.try_lock() {
            accepts.close();
            while accepts.try_recv().is_ok() {}
        }

        self.done.cancel();
    }
}

async fn dispatch(shared: Arc<SessionShared>, mut frames: FrameSource, accepts: AcceptQueue) {
    let outcome = loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => break Err(MuxError::SessionClosed),
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                if let Err(e) = shared.route(frame, &accepts).await {
                    break Err(e);
                }
            }
            Some(Err(e)) => break Err(e),
            None => break Ok(()),
        }
    };

    match outcome {
        Ok(()) => info!("Transport closed by peer, ending session"),
        Err(MuxError::SessionClosed) => debug!("Session read loop stopped"),
        Err(e) => warn!("Session read loop failed: {}", e),
    }

    drop(accepts);
    drop(frames);
    shared.terminate().await;
}
