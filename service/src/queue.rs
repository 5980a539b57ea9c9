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

//! Bounded outbound queue
//!
//! Many sessions produce, exactly one broadcast engine consumes. Pushing onto
//! a full queue waits for space. Closing the queue wakes the consumer even
//! while producers still hold handles, which is how the server stops the
//! broadcast engine.

use crate::{ChatError, ChatMessage, LifecycleEvent, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Item carried by the outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A chat message from a session
    Chat(ChatMessage),
    /// A join or leave announcement
    Lifecycle(LifecycleEvent),
}

impl From<ChatMessage> for OutboundMessage {
    fn from(message: ChatMessage) -> Self {
        Self::Chat(message)
    }
}

impl From<LifecycleEvent> for OutboundMessage {
    fn from(event: LifecycleEvent) -> Self {
        Self::Lifecycle(event)
    }
}

/// Producer handle for the outbound queue
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundMessage>,
    closed: CancellationToken,
}

/// Consumer end of the outbound queue
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<OutboundMessage>,
    closed: CancellationToken,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages
    pub fn bounded(capacity: usize) -> (Self, QueueConsumer) {
        let (tx, rx) = mpsc::channel(capacity);
        let closed = CancellationToken::new();
        (
            Self {
                tx,
                closed: closed.clone(),
            },
            QueueConsumer { rx, closed },
        )
    }

    /// Enqueue a message, waiting for space if the queue is full
    pub async fn push(&self, message: impl Into<OutboundMessage>) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ChatError::QueueClosed);
        }
        tokio::select! {
            result = self.tx.send(message.into()) => result.map_err(|_| ChatError::QueueClosed),
            _ = self.closed.cancelled() => Err(ChatError::QueueClosed),
        }
    }

    /// Close the queue
    ///
    /// Pending and future pushes fail; the consumer stops receiving.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Check whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Free slots remaining
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

impl QueueConsumer {
    /// Wait for the next message
    ///
    /// Returns `None` once the queue is closed.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }
}
