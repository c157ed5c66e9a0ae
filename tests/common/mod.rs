#![allow(dead_code)]

use std::time::Duration;

use bytes::BytesMut;
use muxwire::{encode_frame, Config, Frame, MuxFrameCodec, Session};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Initiator and acceptor sessions joined by an in-memory pipe.
pub fn session_pair(client: Config, server: Config) -> (Session, Session) {
    init_tracing();
    let (left, right) = tokio::io::duplex(1 << 20);
    let client = Session::initiator(left, client).unwrap();
    let server = Session::acceptor(right, server).unwrap();
    (client, server)
}

/// Session under test plus a peer that speaks raw frames.
pub fn raw_pair(config: Config) -> (Session, RawPeer) {
    init_tracing();
    let (left, right) = tokio::io::duplex(1 << 20);
    let session = Session::new(left, config).unwrap();
    let (read, write) = tokio::io::split(right);
    let peer = RawPeer {
        frames: FramedRead::new(read, MuxFrameCodec::new()),
        sink: write,
    };
    (session, peer)
}

pub struct RawPeer {
    frames: FramedRead<ReadHalf<DuplexStream>, MuxFrameCodec>,
    sink: WriteHalf<DuplexStream>,
}

impl RawPeer {
    pub async fn next_frame(&mut self) -> Frame {
        tokio::time::timeout(TIMEOUT, self.frames.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("transport ended")
            .expect("frame failed to decode")
    }

    pub async fn send(&mut self, frame: Frame) {
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf).unwrap();
        self.send_raw(&buf).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.sink.write_all(bytes).await.unwrap();
        self.sink.flush().await.unwrap();
    }

    pub async fn shutdown(&mut self) {
        self.sink.shutdown().await.unwrap();
    }
}
