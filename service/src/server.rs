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

//! Chat server
//!
//! The ChatServer owns the TCP listener, the registry, the outbound queue
//! and the transcript. `start` spawns the accept loop and the broadcast
//! engine, `shutdown` tears all of it down again.

use crate::message::capacity_rejection;
use crate::session::SessionContext;
use crate::{
    BroadcastEngine, ChatConnection, ChatError, ChatSession, ConnectionId, LifecycleNotifier,
    OutboundQueue, Registry, Result, ServerConfig, ServerMetrics, ServerSnapshot, Transcript,
    TranscriptHandle,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Multi-user chat server
///
/// # Example
///
/// ```no_run
/// use tcpchat_service::{ChatServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::new("0.0.0.0:8989".parse()?);
///     let server = ChatServer::new(config).await?;
///     server.start().await?;
///
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    metrics: Arc<ServerMetrics>,
    queue: OutboundQueue,
    transcript: TranscriptHandle,
    /// Taken by the accept loop on start
    listener: Mutex<Option<TcpListener>>,
    /// Taken by the engine task on start
    engine: Mutex<Option<BroadcastEngine>>,
    bind_address: SocketAddr,
    started_at: Instant,
    running: AtomicBool,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatServer {
    /// Bind the listener and create a fresh transcript
    ///
    /// Does not accept connections until `start()` is called.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_address).await?;
        let bind_address = listener.local_addr()?;

        let transcript = Transcript::create(config.history_path(bind_address)).await?;
        let handle = transcript.handle();

        let metrics = Arc::new(ServerMetrics::new());
        let registry = Arc::new(Registry::new(config.max_users));
        let (queue, consumer) = OutboundQueue::bounded(config.queue_capacity());
        let engine = BroadcastEngine::new(
            registry.clone(),
            consumer,
            transcript,
            metrics.clone(),
            config.write_timeout,
        );

        info!(
            address = %bind_address,
            max_users = config.max_users,
            queue_capacity = config.queue_capacity(),
            "Chat server bound"
        );

        Ok(Self {
            config,
            registry,
            metrics,
            queue,
            transcript: handle,
            listener: Mutex::new(Some(listener)),
            engine: Mutex::new(Some(engine)),
            bind_address,
            started_at: Instant::now(),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start accepting connections and broadcasting
    ///
    /// A server can only be started once.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ChatError::Other("Server already running".to_string()));
        }

        let (Some(listener), Some(engine)) =
            (self.listener.lock().await.take(), self.engine.lock().await.take())
        else {
            self.running.store(false, Ordering::SeqCst);
            return Err(ChatError::Other("Server cannot be restarted".to_string()));
        };

        info!(address = %self.bind_address, "Starting chat server");

        let engine_handle = tokio::spawn(engine.run());
        let accept = AcceptLoop {
            listener,
            ctx: self.session_context(),
            sessions: self.sessions.clone(),
            max_users: self.config.max_users,
            next_id: 0,
        };
        let accept_handle = tokio::spawn(accept.run());

        self.tasks.lock().await.extend([accept_handle, engine_handle]);
        Ok(())
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            notifier: LifecycleNotifier::new(self.queue.clone()),
            transcript: self.transcript.clone(),
            metrics: self.metrics.clone(),
            banner_path: self.config.banner_path.clone(),
            read_buffer_size: self.config.read_buffer_size,
            write_timeout: self.config.write_timeout,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Shutdown the server
    ///
    /// Stops accepting, closes the queue and every connection, waits up to
    /// the shutdown timeout for tasks to finish and deletes the transcript.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(ChatError::ServerNotRunning);
        }

        info!("Shutting down chat server");

        self.shutdown.cancel();
        self.queue.close();

        let connections = self.registry.drain().await;
        debug!(count = connections.len(), "Closing registered connections");
        for connection in connections {
            connection.close().await;
        }

        let limit = self.config.shutdown_timeout;
        self.sessions.close();
        if tokio::time::timeout(limit, self.sessions.wait()).await.is_err() {
            warn!(
                remaining = self.sessions.len(),
                "Sessions still running after shutdown timeout"
            );
        }

        for handle in self.tasks.lock().await.drain(..) {
            if tokio::time::timeout(limit, handle).await.is_err() {
                warn!("Server task did not stop within shutdown timeout");
            }
        }

        self.transcript.remove().await?;

        info!("Chat server shutdown complete");
        Ok(())
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the server's bind address
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Get the number of registered sessions
    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    /// Get a snapshot of the server state
    pub async fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_sessions: self.registry.count().await,
            total_connections: self.metrics.total_connections(),
            bind_address: self.bind_address,
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Get the connection registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get the transcript handle
    pub fn transcript(&self) -> &TranscriptHandle {
        &self.transcript
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer")
            .field("bind_address", &self.bind_address)
            .field("running", &self.is_running())
            .field("max_users", &self.config.max_users)
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("ChatServer dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.shutdown.cancel();
            self.queue.close();
        }
    }
}

/// Accepts connections, applies the capacity gate, spawns sessions
struct AcceptLoop {
    listener: TcpListener,
    ctx: SessionContext,
    sessions: TaskTracker,
    max_users: usize,
    next_id: u64,
}

impl AcceptLoop {
    async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                result = self.listener.accept() => result,
                _ = self.ctx.shutdown.cancelled() => break,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    self.next_id += 1;
                    let id = ConnectionId::new(self.next_id);
                    self.ctx.metrics.connection_accepted();
                    debug!(connection_id = %id, peer = %peer_addr, "Accepted connection");

                    if self.ctx.registry.is_full().await {
                        self.reject(socket, id, peer_addr);
                        continue;
                    }

                    match ChatConnection::wrap(socket, id) {
                        Ok((connection, reader)) => self.spawn_session(connection, reader),
                        Err(e) => error!(connection_id = %id, error = %e, "Failed to wrap connection"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    // Back off on errors to avoid tight loop
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        info!("Accept loop terminated");
    }

    fn reject(&self, mut socket: TcpStream, id: ConnectionId, peer_addr: SocketAddr) {
        warn!(
            connection_id = %id,
            peer = %peer_addr,
            max_users = self.max_users,
            "Chat is full, rejecting connection"
        );
        self.ctx.metrics.connection_rejected();

        let notice = capacity_rejection(self.max_users);
        let write_timeout = self.ctx.write_timeout;
        self.sessions.spawn(async move {
            let write = async {
                socket.write_all(notice.as_bytes()).await?;
                socket.shutdown().await
            };
            match tokio::time::timeout(write_timeout, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(connection_id = %id, error = %e, "Rejection notice failed"),
                Err(_) => debug!(connection_id = %id, "Rejection notice timed out"),
            }
        });
    }

    fn spawn_session(&self, connection: ChatConnection, reader: tokio::net::tcp::OwnedReadHalf) {
        let id = connection.id();
        let session = ChatSession::new(connection.clone(), reader, self.ctx.clone());
        let ctx = self.ctx.clone();

        self.sessions.spawn(supervise(id, connection, ctx, tokio::spawn(session.run())));
    }
}

/// Wait for a session task, cleaning up after it if it panicked
async fn supervise<T>(
    id: ConnectionId,
    connection: ChatConnection,
    ctx: SessionContext,
    session: JoinHandle<T>,
) {
    let Err(e) = session.await else {
        return;
    };
    error!(connection_id = %id, error = %e, "Session task failed");

    let freed = ctx.registry.unregister(id).await;
    connection.close().await;
    if let Some(name) = freed {
        ctx.metrics.session_ended(connection.created_at().elapsed());
        if let Err(e) = ctx.notifier.left(id, &name).await {
            debug!(connection_id = %id, error = %e, "Leave announcement dropped");
        }
    }
}
