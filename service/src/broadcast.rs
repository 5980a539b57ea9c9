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

//! Broadcast engine
//!
//! The single consumer of the outbound queue and the only place that walks
//! the registry to deliver. For every drained message it:
//!
//! 1. takes the registry lock,
//! 2. appends chat messages to the transcript,
//! 3. writes the payload plus the recipient's own prompt to every registered
//!    connection except the one the message came from,
//! 4. closes and unregisters recipients whose delivery failed, after the
//!    iteration over the snapshot is complete.
//!
//! Transcript order, delivery order and queue drain order are therefore the
//! same total order across the whole server.

use crate::message::{prompt, timestamp};
use crate::{
    ConnectionId, OutboundMessage, QueueConsumer, Registry, RegistryEntry, ServerMetrics,
    Transcript,
};
use futures_util::future::join_all;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of delivering one message
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    /// Number of recipients attempted
    pub recipients: usize,
    /// Number of successful deliveries
    pub delivered: usize,
    /// Recipients that failed and were dropped (ConnectionId and error message)
    pub failed: Vec<(ConnectionId, String)>,
}

impl DeliveryReport {
    /// Check if every delivery succeeded
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Single consumer fanning queued messages out to registered connections
pub struct BroadcastEngine {
    registry: Arc<Registry>,
    consumer: QueueConsumer,
    transcript: Transcript,
    metrics: Arc<ServerMetrics>,
    write_timeout: Duration,
}

impl BroadcastEngine {
    /// Create a broadcast engine
    pub fn new(
        registry: Arc<Registry>,
        consumer: QueueConsumer,
        transcript: Transcript,
        metrics: Arc<ServerMetrics>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            consumer,
            transcript,
            metrics,
            write_timeout,
        }
    }

    /// Drain the queue until it is closed
    pub async fn run(mut self) {
        info!("Broadcast engine started");

        while let Some(message) = self.consumer.recv().await {
            let report = self.deliver(message).await;
            if !report.all_delivered() {
                debug!(
                    delivered = report.delivered,
                    failed = report.failed.len(),
                    "Broadcast finished with failures"
                );
            }
        }

        info!(
            transcript_lines = self.transcript.lines(),
            "Broadcast engine stopped"
        );
    }

    /// Deliver one message to every registered connection except its origin
    pub async fn deliver(&mut self, message: OutboundMessage) -> DeliveryReport {
        let mut registry = self.registry.lock().await;

        let (origin, payload) = match &message {
            OutboundMessage::Chat(chat) => {
                let line = chat.format_line(&timestamp());
                if let Err(e) = self.transcript.append(&line).await {
                    error!(error = %e, "Failed to append to transcript");
                }
                self.metrics.message_broadcast();
                counter!("tcpchat.messages.broadcast").increment(1);
                (chat.origin(), format!("\n{}", line))
            }
            OutboundMessage::Lifecycle(event) => {
                counter!("tcpchat.lifecycle.announced").increment(1);
                (event.origin(), event.render())
            }
        };

        let recipients: Vec<RegistryEntry> = registry
            .snapshot()
            .into_iter()
            .filter(|entry| entry.id() != origin)
            .collect();

        let prompt_time = timestamp();
        let write_timeout = self.write_timeout;
        let sends = recipients.iter().map(|entry| {
            let mut bytes = payload.clone();
            bytes.push_str(&prompt(&prompt_time, &entry.name));
            async move {
                let result = entry
                    .connection
                    .send_timeout(bytes.as_bytes(), write_timeout)
                    .await;
                (entry, result)
            }
        });
        let results = join_all(sends).await;

        let mut report = DeliveryReport {
            recipients: recipients.len(),
            ..Default::default()
        };
        let mut dropped = Vec::new();
        for (entry, result) in results {
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    self.metrics.delivery();
                }
                Err(e) => {
                    warn!(
                        connection_id = %entry.id(),
                        name = %entry.name,
                        error = %e,
                        "Delivery failed, dropping recipient"
                    );
                    self.metrics.delivery_failure();
                    counter!("tcpchat.delivery.failures").increment(1);
                    report.failed.push((entry.id(), e.to_string()));
                    dropped.push(entry);
                }
            }
        }

        // Removals happen only after the snapshot has been fully walked
        for entry in dropped {
            entry.connection.close().await;
            registry.remove(entry.id());
        }

        report
    }
}

impl std::fmt::Debug for BroadcastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastEngine")
            .field("transcript", &self.transcript.handle().path())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatConnection, ChatMessage, DisplayName, LifecycleEvent, OutboundQueue};
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};
    use tracing_test::traced_test;

    struct Harness {
        engine: BroadcastEngine,
        registry: Arc<Registry>,
        queue: OutboundQueue,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::create(dir.path().join("chat-test.txt"))
            .await
            .unwrap();
        let registry = Arc::new(Registry::new(10));
        let (queue, consumer) = OutboundQueue::bounded(16);
        let engine = BroadcastEngine::new(
            registry.clone(),
            consumer,
            transcript,
            Arc::new(ServerMetrics::new()),
            Duration::from_millis(200),
        );
        Harness {
            engine,
            registry,
            queue,
            _dir: dir,
        }
    }

    async fn join(registry: &Registry, id: u64, name: &str) -> (ChatConnection, DuplexStream) {
        let (local, remote) = duplex(4096);
        let conn = ChatConnection::from_parts(local, ConnectionId::new(id), None);
        registry
            .register(&conn, DisplayName::parse(name).unwrap())
            .await
            .unwrap();
        (conn, remote)
    }

    async fn read_available(stream: &mut DuplexStream) -> String {
        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf))
            .await
            .map(|r| r.unwrap())
            .unwrap_or(0);
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn chat(id: u64, name: &str, text: &str) -> OutboundMessage {
        ChatMessage::new(ConnectionId::new(id), DisplayName::parse(name).unwrap(), text)
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn test_chat_skips_sender_and_reprompts_recipients() {
        let mut h = harness().await;
        let (_alice, mut alice_rx) = join(&h.registry, 1, "alice").await;
        let (_bob, mut bob_rx) = join(&h.registry, 2, "bob").await;

        let report = h.engine.deliver(chat(1, "alice", "hello")).await;
        assert_eq!(report.recipients, 1);
        assert_eq!(report.delivered, 1);

        let received = read_available(&mut bob_rx).await;
        assert!(received.starts_with("\n["));
        assert!(received.contains("][alice]: hello\n"));
        assert!(received.ends_with("][bob]: "));

        assert_eq!(read_available(&mut alice_rx).await, "");
    }

    #[tokio::test]
    async fn test_chat_is_transcribed_once() {
        let mut h = harness().await;
        let (_alice, _alice_rx) = join(&h.registry, 1, "alice").await;
        let (_bob, _bob_rx) = join(&h.registry, 2, "bob").await;
        let (_carol, _carol_rx) = join(&h.registry, 3, "carol").await;
        let handle = h.engine.transcript.handle();

        h.engine.deliver(chat(1, "alice", "hello")).await;
        h.engine.deliver(chat(2, "bob", "hi alice")).await;

        let transcript = String::from_utf8(handle.read_all().await.unwrap()).unwrap();
        let lines: Vec<_> = transcript.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("][alice]: hello"));
        assert!(lines[1].ends_with("][bob]: hi alice"));
    }

    #[tokio::test]
    async fn test_lifecycle_not_transcribed() {
        let mut h = harness().await;
        let (_alice, mut alice_rx) = join(&h.registry, 1, "alice").await;
        let (_bob, _bob_rx) = join(&h.registry, 2, "bob").await;
        let handle = h.engine.transcript.handle();

        let event = LifecycleEvent::joined(ConnectionId::new(2), DisplayName::parse("bob").unwrap());
        let report = h.engine.deliver(event.into()).await;
        assert_eq!(report.delivered, 1);

        let received = read_available(&mut alice_rx).await;
        assert!(received.starts_with("\nbob has joined our chat...\n["));
        assert!(handle.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_recipient_dropped_after_iteration() {
        let mut h = harness().await;
        let (_alice, _alice_rx) = join(&h.registry, 1, "alice").await;
        let (bob, bob_rx) = join(&h.registry, 2, "bob").await;
        let (_carol, mut carol_rx) = join(&h.registry, 3, "carol").await;

        // Bob's peer disappears, so writes to bob fail
        drop(bob_rx);

        let report = h.engine.deliver(chat(1, "alice", "anyone there?")).await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ConnectionId::new(2));

        assert!(bob.is_closed());
        assert_eq!(h.registry.count().await, 2);
        assert!(
            !h.registry
                .contains_name(&DisplayName::parse("bob").unwrap())
                .await
        );
        assert!(read_available(&mut carol_rx).await.contains("anyone there?"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delivery_failure_is_logged() {
        let mut h = harness().await;
        let (_alice, _alice_rx) = join(&h.registry, 1, "alice").await;
        let (_bob, bob_rx) = join(&h.registry, 2, "bob").await;
        drop(bob_rx);

        h.engine.deliver(chat(1, "alice", "ping")).await;
        assert!(logs_contain("Delivery failed, dropping recipient"));
        assert!(logs_contain("conn-2"));
    }

    #[tokio::test]
    async fn test_run_stops_when_queue_closed() {
        let h = harness().await;
        let (_alice, _alice_rx) = join(&h.registry, 1, "alice").await;
        let (_bob, mut bob_rx) = join(&h.registry, 2, "bob").await;
        let queue = h.queue.clone();

        let task = tokio::spawn(h.engine.run());
        queue.push(chat(1, "alice", "first")).await.unwrap();
        assert!(read_available(&mut bob_rx).await.contains("first"));

        queue.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
