//! # Message Transports
//!
//! Frame-oriented push/pull transports under the secure channel. A transport
//! moves whole opaque frames; it knows nothing about encryption.
//!
//! Both implementations feed inbound frames through a bounded queue so that
//! blocking and non-blocking pulls share one code path.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::TransportError;
use crate::constants::channel::DEFAULT_INBOUND_QUEUE;

/// Push/pull transport for whole frames
#[async_trait]
pub trait MessageTransport: Send + Sync + Debug {
    /// Push one frame to the peer
    async fn push(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Wait for the next frame; `Ok(None)` when the peer has gone away
    async fn pull(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Take a frame if one is already queued
    fn try_pull(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the transport; later pushes and pulls fail with `Closed`
    fn close(&self);

    /// Human-readable peer description for logs
    fn peer(&self) -> String;
}

async fn pull_from(
    inbound: &Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: &CancellationToken,
) -> Result<Option<Vec<u8>>, TransportError> {
    if closed.is_cancelled() {
        return Err(TransportError::Closed);
    }
    let mut receiver = inbound.lock().await;
    tokio::select! {
        biased;
        _ = closed.cancelled() => Err(TransportError::Closed),
        frame = receiver.recv() => Ok(frame),
    }
}

fn try_pull_from(
    inbound: &Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: &CancellationToken,
) -> Result<Option<Vec<u8>>, TransportError> {
    if closed.is_cancelled() {
        return Err(TransportError::Closed);
    }
    // Another caller is parked in pull(); nothing to hand out right now
    let Ok(mut receiver) = inbound.try_lock() else {
        return Ok(None);
    };
    match receiver.try_recv() {
        Ok(frame) => Ok(Some(frame)),
        Err(mpsc::error::TryRecvError::Empty) => Ok(None),
        Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
    }
}

/// In-process transport; one half of a connected pair
#[derive(Debug)]
pub struct MemoryTransport {
    name: String,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: CancellationToken,
}

impl MemoryTransport {
    /// Create two connected transports
    pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            MemoryTransport {
                name: "memory:a".to_string(),
                outbound: b_tx,
                inbound: Mutex::new(a_rx),
                closed: CancellationToken::new(),
            },
            MemoryTransport {
                name: "memory:b".to_string(),
                outbound: a_tx,
                inbound: Mutex::new(b_rx),
                closed: CancellationToken::new(),
            },
        )
    }

    /// Connected pair behind `Arc`, ready to hand to a channel
    pub fn shared_pair(capacity: usize) -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
        let (a, b) = Self::pair(capacity);
        (Arc::new(a), Arc::new(b))
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn push(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn pull(&self) -> Result<Option<Vec<u8>>, TransportError> {
        pull_from(&self.inbound, &self.closed).await
    }

    fn try_pull(&self) -> Result<Option<Vec<u8>>, TransportError> {
        try_pull_from(&self.inbound, &self.closed)
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}

/// TCP transport with u32 big-endian length-prefixed frames
///
/// A background reader task decodes frames into a bounded queue. An optional
/// identity frame is written first so the dispatcher can route per worker.
#[derive(Debug)]
pub struct TcpTransport {
    peer_address: String,
    writer: Mutex<OwnedWriteHalf>,
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: CancellationToken,
    max_frame_bytes: usize,
    reader_task: JoinHandle<()>,
}

impl TcpTransport {
    /// Connect to a dispatcher endpoint
    pub async fn connect(
        address: &str,
        identity: Option<&str>,
        max_frame_bytes: usize,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::connect(address, e.to_string()))?;
        info!(address = %address, identity = ?identity, "🔌 TCP transport connected");

        let transport = Self::from_stream(stream, max_frame_bytes)?;
        if let Some(identity) = identity {
            transport.push(identity.as_bytes().to_vec()).await?;
        }
        Ok(transport)
    }

    /// Wrap an already-connected stream (accepting side)
    pub fn from_stream(stream: TcpStream, max_frame_bytes: usize) -> Result<Self, TransportError> {
        let peer_address = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(DEFAULT_INBOUND_QUEUE);
        let closed = CancellationToken::new();

        let reader_task = tokio::spawn(Self::read_frames(
            reader,
            tx,
            closed.clone(),
            max_frame_bytes,
            peer_address.clone(),
        ));

        Ok(Self {
            peer_address,
            writer: Mutex::new(writer),
            inbound: Mutex::new(rx),
            closed,
            max_frame_bytes,
            reader_task,
        })
    }

    async fn read_frames(
        mut reader: OwnedReadHalf,
        frames: mpsc::Sender<Vec<u8>>,
        closed: CancellationToken,
        max_frame_bytes: usize,
        peer_address: String,
    ) {
        loop {
            let length = tokio::select! {
                _ = closed.cancelled() => break,
                length = reader.read_u32() => length,
            };
            let length = match length {
                Ok(length) => length as usize,
                Err(e) => {
                    debug!(peer = %peer_address, error = %e, "TCP reader finished");
                    break;
                }
            };
            if length > max_frame_bytes {
                warn!(
                    peer = %peer_address,
                    size_bytes = length,
                    limit_bytes = max_frame_bytes,
                    "Oversized frame; dropping connection"
                );
                break;
            }

            let mut frame = vec![0u8; length];
            if let Err(e) = reader.read_exact(&mut frame).await {
                debug!(peer = %peer_address, error = %e, "TCP reader finished mid-frame");
                break;
            }
            if frames.send(frame).await.is_err() {
                break;
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.closed.cancel();
        self.reader_task.abort();
    }
}

#[async_trait]
impl MessageTransport for TcpTransport {
    async fn push(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if frame.len() > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                size_bytes: frame.len(),
                limit_bytes: self.max_frame_bytes,
            });
        }
        let length = u32::try_from(frame.len()).map_err(|_| TransportError::FrameTooLarge {
            size_bytes: frame.len(),
            limit_bytes: u32::MAX as usize,
        })?;

        let mut writer = self.writer.lock().await;
        writer.write_u32(length).await?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn pull(&self) -> Result<Option<Vec<u8>>, TransportError> {
        pull_from(&self.inbound, &self.closed).await
    }

    fn try_pull(&self) -> Result<Option<Vec<u8>>, TransportError> {
        try_pull_from(&self.inbound, &self.closed)
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn peer(&self) -> String {
        self.peer_address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_memory_pair_moves_frames_both_ways() {
        let (a, b) = MemoryTransport::pair(8);
        a.push(b"ping".to_vec()).await.unwrap();
        assert_eq!(b.pull().await.unwrap(), Some(b"ping".to_vec()));

        b.push(b"pong".to_vec()).await.unwrap();
        assert_eq!(a.try_pull().unwrap(), Some(b"pong".to_vec()));
        assert_eq!(a.try_pull().unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_pull() {
        let (a, _b) = MemoryTransport::shared_pair(8);
        let puller = {
            let a = a.clone();
            tokio::spawn(async move { a.pull().await })
        };
        tokio::task::yield_now().await;
        a.close();

        let result = puller.await.unwrap();
        assert_eq!(result, Err(TransportError::Closed));
        assert_eq!(a.push(vec![1]).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_dropped_peer_reports_end_of_stream() {
        let (a, b) = MemoryTransport::pair(8);
        drop(b);
        assert_eq!(a.pull().await.unwrap(), None);
        assert_eq!(a.try_pull(), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_tcp_frames_and_identity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            TcpTransport::from_stream(stream, 1024).unwrap()
        });

        let client = TcpTransport::connect(&address, Some("Worker-3"), 1024)
            .await
            .unwrap();
        let server = accept.await.unwrap();

        assert_eq!(server.pull().await.unwrap(), Some(b"Worker-3".to_vec()));

        client.push(b"frame-1".to_vec()).await.unwrap();
        server.push(b"frame-2".to_vec()).await.unwrap();
        assert_eq!(server.pull().await.unwrap(), Some(b"frame-1".to_vec()));
        assert_eq!(client.pull().await.unwrap(), Some(b"frame-2".to_vec()));
    }

    #[tokio::test]
    async fn test_tcp_rejects_oversized_push() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _accept = tokio::spawn(async move { listener.accept().await });

        let client = TcpTransport::connect(&address, None, 4).await.unwrap();
        let err = client.push(vec![0u8; 5]).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::FrameTooLarge {
                size_bytes: 5,
                limit_bytes: 4
            }
        );
    }
}
