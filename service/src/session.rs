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

//! Per-connection session handler
//!
//! A [`ChatSession`] owns one connection for its whole life and walks it
//! through `Connecting → NameNegotiation → Active → Closing`:
//!
//! - **Connecting**: the optional banner is written.
//! - **NameNegotiation**: prompt, read a line, sanitize. Empty names re-prompt,
//!   taken names get a notice and re-prompt, a unique name registers.
//! - **Active**: announce the join, replay the transcript, then loop: prompt,
//!   read, sanitize, enqueue.
//! - **Closing**: unregister, close, announce the departure.
//!
//! Only read failures on this session's own connection drive transitions;
//! failed prompt writes are logged and ignored.

use crate::message::{NAME_PROMPT, NAME_TAKEN_NOTICE, capacity_rejection, prompt, timestamp};
use crate::{
    ChatConnection, ChatError, ChatMessage, ConnectionId, DisplayName, LifecycleNotifier,
    OutboundQueue, Registry, Result, ServerMetrics, SessionState, TranscriptHandle,
};
use metrics::counter;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Server-wide state every session works against
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Connection registry
    pub registry: Arc<Registry>,
    /// Outbound queue chat messages are pushed onto
    pub queue: OutboundQueue,
    /// Join/leave announcer
    pub notifier: LifecycleNotifier,
    /// Transcript replayed to new sessions
    pub transcript: TranscriptHandle,
    /// Server metrics
    pub metrics: Arc<ServerMetrics>,
    /// Banner file written on connect
    pub banner_path: Option<PathBuf>,
    /// Maximum bytes taken per read
    pub read_buffer_size: usize,
    /// Timeout for writes to this session's own connection
    pub write_timeout: Duration,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
}

/// What a finished session did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Name the session registered under, if it got that far
    pub name: Option<DisplayName>,
    /// Chat messages the session enqueued
    pub messages_sent: u64,
    /// State the session finished in
    pub final_state: SessionState,
}

/// Handler for a single client connection
pub struct ChatSession<R> {
    id: ConnectionId,
    connection: ChatConnection,
    reader: BufReader<R>,
    ctx: SessionContext,
    state: SessionState,
    name: Option<DisplayName>,
    messages_sent: u64,
    started_at: Instant,
}

impl<R> ChatSession<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a session for `connection`, reading from `reader`
    pub fn new(connection: ChatConnection, reader: R, ctx: SessionContext) -> Self {
        let capacity = ctx.read_buffer_size.max(1);
        Self {
            id: connection.id(),
            connection,
            reader: BufReader::with_capacity(capacity, reader),
            ctx,
            state: SessionState::Connecting,
            name: None,
            messages_sent: 0,
            started_at: Instant::now(),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion
    ///
    /// Always ends in `Closed` with the connection closed and unregistered.
    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn run(mut self) -> SessionOutcome {
        match self.drive().await {
            Ok(()) => debug!("Session ended"),
            Err(e) if e.is_connection_error() => debug!(error = %e, "Session connection lost"),
            Err(ChatError::QueueClosed) => debug!("Session ended by server shutdown"),
            Err(e) => warn!(error = %e, "Session ended with error"),
        }

        self.close().await;

        SessionOutcome {
            name: self.name,
            messages_sent: self.messages_sent,
            final_state: self.state,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        trace!(from = %self.state, to = %state, "Session state change");
        self.state = state;
    }

    async fn drive(&mut self) -> Result<()> {
        self.send_banner().await;

        self.set_state(SessionState::NameNegotiation);
        let name = match self.negotiate_name().await? {
            Some(name) => name,
            None => return Ok(()),
        };

        self.set_state(SessionState::Active);
        info!(name = %name, "Session joined");
        self.ctx.notifier.joined(self.id, &name).await?;
        self.replay_history().await;

        self.relay(&name).await
    }

    async fn send_banner(&self) {
        let Some(path) = &self.ctx.banner_path else {
            return;
        };
        match tokio::fs::read(path).await {
            Ok(banner) if !banner.is_empty() => self.write(&banner).await,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(path = %path.display(), "No banner file");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read banner"),
        }
    }

    /// Returns `None` if the connection went away or the server is full
    async fn negotiate_name(&mut self) -> Result<Option<DisplayName>> {
        loop {
            self.write(NAME_PROMPT.as_bytes()).await;

            let Some(line) = self.read_line().await? else {
                debug!("Connection closed during name negotiation");
                return Ok(None);
            };

            let Ok(name) = DisplayName::parse(&line) else {
                continue;
            };

            match self.ctx.registry.register(&self.connection, name.clone()).await {
                Ok(()) => {
                    self.ctx.metrics.session_registered();
                    self.name = Some(name.clone());
                    return Ok(Some(name));
                }
                Err(ChatError::NameTaken(taken)) => {
                    debug!(name = %taken, "Requested name is taken");
                    self.ctx.metrics.name_collision();
                    self.write(NAME_TAKEN_NOTICE.as_bytes()).await;
                }
                Err(ChatError::ServerFull(max)) => {
                    info!(max_users = max, "Server filled up during name negotiation");
                    self.ctx.metrics.connection_rejected();
                    self.write(capacity_rejection(max).as_bytes()).await;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn replay_history(&self) {
        match self.ctx.transcript.read_all().await {
            Ok(history) if !history.is_empty() => {
                debug!(bytes = history.len(), "Replaying transcript");
                self.write(&history).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read transcript"),
        }
    }

    async fn relay(&mut self, name: &DisplayName) -> Result<()> {
        let mut buf = vec![0u8; self.ctx.read_buffer_size.max(1)];

        loop {
            self.write(prompt(&timestamp(), name).as_bytes()).await;

            let n = tokio::select! {
                result = self.reader.read(&mut buf) => result?,
                _ = self.connection.closed() => return Ok(()),
                _ = self.ctx.shutdown.cancelled() => return Ok(()),
            };
            if n == 0 {
                debug!("Client closed the connection");
                return Ok(());
            }

            if let Some(message) = ChatMessage::from_bytes(self.id, name.clone(), &buf[..n]) {
                trace!(len = message.text().len(), "Enqueueing message");
                self.ctx.metrics.message_received();
                counter!("tcpchat.messages.received").increment(1);
                self.ctx.queue.push(message).await?;
                self.messages_sent += 1;
            }
        }
    }

    /// Read one line, at most `read_buffer_size` bytes
    ///
    /// Returns `None` on EOF or when the connection is closed.
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = Vec::new();
        let limit = self.ctx.read_buffer_size.max(1) as u64;
        let mut limited = (&mut self.reader).take(limit);

        let n = tokio::select! {
            result = limited.read_until(b'\n', &mut line) => result?,
            _ = self.connection.closed() => return Ok(None),
            _ = self.ctx.shutdown.cancelled() => return Ok(None),
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Write to this session's own connection; failures are not fatal
    async fn write(&self, bytes: &[u8]) {
        if let Err(e) = self
            .connection
            .send_timeout(bytes, self.ctx.write_timeout)
            .await
        {
            debug!(error = %e, "Write to own connection failed");
        }
    }

    async fn close(&mut self) {
        self.set_state(SessionState::Closing);

        let freed = self.ctx.registry.unregister(self.id).await;
        self.connection.close().await;

        let departed = match (freed, self.name.clone()) {
            (Some(name), _) => Some(name),
            // Dropped earlier by the broadcast engine; the name may already
            // belong to someone else.
            (None, Some(name)) => {
                if self.ctx.registry.contains_name(&name).await {
                    debug!(name = %name, "Name reused before leave, not announcing");
                    None
                } else {
                    Some(name)
                }
            }
            (None, None) => None,
        };

        if self.name.is_some() {
            self.ctx
                .metrics
                .session_ended(self.started_at.elapsed());
        }
        if let Some(name) = departed {
            info!(name = %name, "Session left");
            if let Err(e) = self.ctx.notifier.left(self.id, &name).await {
                debug!(error = %e, "Leave announcement dropped");
            }
        }

        self.set_state(SessionState::Closed);
    }
}

impl<R> std::fmt::Debug for ChatSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("name", &self.name)
            .finish()
    }
}
