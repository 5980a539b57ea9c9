//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Chat connection handle
//!
//! A [`ChatConnection`] is the write side of one client stream plus a close
//! signal. It is cheap to clone: the session that owns the stream keeps one
//! clone, the registry keeps another so the broadcast engine can deliver to it.
//! The read side is handed to the session separately and never shared.

use crate::{ChatError, ConnectionId, Result};
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, trace};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared handle to a single client connection
#[derive(Clone)]
pub struct ChatConnection {
    writer: Arc<Mutex<BoxedWriter>>,

    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    created_at: Instant,

    // Cancelled exactly once, by whoever wins `close_started`
    closed: CancellationToken,
    close_started: Arc<AtomicBool>,

    bytes_sent: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl ChatConnection {
    /// Split a TCP stream into a shared connection handle and its read half
    #[instrument(skip(socket), fields(connection_id = %id))]
    pub fn wrap(socket: TcpStream, id: ConnectionId) -> Result<(Self, OwnedReadHalf)> {
        let peer_addr = socket.peer_addr()?;

        info!(peer_addr = %peer_addr, "Creating new chat connection");

        let (reader, writer) = socket.into_split();
        Ok((Self::from_parts(writer, id, Some(peer_addr)), reader))
    }

    /// Build a connection around any writer
    ///
    /// Used for streams that are not TCP sockets, such as in-memory duplex
    /// pipes.
    pub fn from_parts<W>(writer: W, id: ConnectionId, peer_addr: Option<SocketAddr>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        counter!("tcpchat.connections.total").increment(1);
        gauge!("tcpchat.connections.open").increment(1.0);

        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            id,
            peer_addr,
            created_at: Instant::now(),
            closed: CancellationToken::new(),
            close_started: Arc::new(AtomicBool::new(false)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address, if the stream has one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Get when the connection was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get the number of completed writes
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Write `bytes` and flush
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ChatError::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        drop(writer);

        self.bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.writes.fetch_add(1, Ordering::Relaxed);
        counter!("tcpchat.bytes.sent").increment(bytes.len() as u64);
        trace!(connection_id = %self.id, len = bytes.len(), "Wrote to connection");
        Ok(())
    }

    /// Write a string and flush
    pub async fn send_str(&self, text: &str) -> Result<()> {
        self.send(text.as_bytes()).await
    }

    /// Write `bytes`, failing with [`ChatError::Timeout`] if the peer stalls
    pub async fn send_timeout(&self, bytes: &[u8], limit: Duration) -> Result<()> {
        match tokio::time::timeout(limit, self.send(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout),
        }
    }

    /// Close the connection
    ///
    /// Wakes the owning session out of any pending read. The write side is
    /// shut down right away unless another write currently holds it, in which
    /// case it is released when the last handle drops.
    pub async fn close(&self) {
        if self.close_started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        gauge!("tcpchat.connections.open").decrement(1.0);
        debug!(connection_id = %self.id, "Closing connection");

        if let Ok(mut writer) = self.writer.try_lock() {
            if let Err(e) = writer.shutdown().await {
                debug!(connection_id = %self.id, error = %e, "Write side shutdown failed");
            }
        }
    }

    /// Check whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Future that resolves once the connection is closed
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

impl std::fmt::Debug for ChatConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    /// Accepts writes but refuses to shut down
    struct StubbornWriter;

    impl AsyncWrite for StubbornWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "already gone")))
        }
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (local, mut remote) = duplex(1024);
        let conn = ChatConnection::from_parts(local, ConnectionId::new(1), None);

        conn.send_str("hello\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");
        assert_eq!(conn.bytes_sent(), 6);
        assert_eq!(conn.writes(), 1);
    }

    #[tokio::test]
    async fn test_close_rejects_sends_and_signals() {
        let (local, mut remote) = duplex(1024);
        let conn = ChatConnection::from_parts(local, ConnectionId::new(2), None);
        let watcher = conn.clone();

        conn.close().await;
        assert!(watcher.is_closed());
        watcher.closed().await;

        assert!(matches!(
            conn.send_str("late").await,
            Err(ChatError::ConnectionClosed)
        ));

        // Write side was shut down, so the peer sees EOF
        let mut buf = [0u8; 4];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_logs_shutdown_failure() {
        let conn = ChatConnection::from_parts(StubbornWriter, ConnectionId::new(5), None);

        conn.close().await;

        assert!(conn.is_closed());
        assert!(logs_contain("Write side shutdown failed"));
        assert!(logs_contain("already gone"));
    }

    #[tokio::test]
    async fn test_send_timeout_on_stalled_peer() {
        // Peer never reads, so the pipe fills up and the write stalls
        let (local, _remote) = duplex(8);
        let conn = ChatConnection::from_parts(local, ConnectionId::new(3), None);

        let result = conn
            .send_timeout(&[b'x'; 64], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ChatError::Timeout)));
    }

    #[tokio::test]
    async fn test_wrap_tcp_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        let mut client = client_task.await.unwrap();

        let (conn, _reader) = ChatConnection::wrap(server, ConnectionId::new(4)).unwrap();
        assert!(conn.peer_addr().is_some());

        conn.send_str("ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
