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

//! Join and leave announcements
//!
//! Announcements go through the outbound queue, so they are ordered with chat
//! messages and delivered by the broadcast engine under the registry lock.
//! They are never written to the transcript.

use crate::{ConnectionId, DisplayName, OutboundQueue, Result};
use std::fmt;
use tracing::debug;

/// Kind of lifecycle announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    /// A session registered its name
    Joined,
    /// A registered session ended
    Left,
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined => write!(f, "joined"),
            Self::Left => write!(f, "left"),
        }
    }
}

/// A join or leave announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    kind: LifecycleKind,
    origin: ConnectionId,
    name: DisplayName,
}

impl LifecycleEvent {
    /// Announcement that `name` joined on connection `origin`
    pub fn joined(origin: ConnectionId, name: DisplayName) -> Self {
        Self {
            kind: LifecycleKind::Joined,
            origin,
            name,
        }
    }

    /// Announcement that `name` left from connection `origin`
    pub fn left(origin: ConnectionId, name: DisplayName) -> Self {
        Self {
            kind: LifecycleKind::Left,
            origin,
            name,
        }
    }

    /// Kind of announcement
    pub fn kind(&self) -> LifecycleKind {
        self.kind
    }

    /// Connection that triggered the announcement (never a recipient)
    pub fn origin(&self) -> ConnectionId {
        self.origin
    }

    /// Display name being announced
    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    /// Text delivered to the other sessions
    pub fn render(&self) -> String {
        match self.kind {
            LifecycleKind::Joined => format!("\n{} has joined our chat...\n", self.name),
            LifecycleKind::Left => format!("\n{} has left our chat...\n", self.name),
        }
    }
}

/// Routes lifecycle announcements onto the outbound queue
#[derive(Debug, Clone)]
pub struct LifecycleNotifier {
    queue: OutboundQueue,
}

impl LifecycleNotifier {
    /// Create a notifier publishing to `queue`
    pub fn new(queue: OutboundQueue) -> Self {
        Self { queue }
    }

    /// Announce that `name` joined
    ///
    /// Call only after the registry entry exists.
    pub async fn joined(&self, origin: ConnectionId, name: &DisplayName) -> Result<()> {
        debug!(connection_id = %origin, name = %name, "Announcing join");
        self.queue
            .push(LifecycleEvent::joined(origin, name.clone()))
            .await
    }

    /// Announce that `name` left
    ///
    /// Call only after the registry entry is gone.
    pub async fn left(&self, origin: ConnectionId, name: &DisplayName) -> Result<()> {
        debug!(connection_id = %origin, name = %name, "Announcing departure");
        self.queue
            .push(LifecycleEvent::left(origin, name.clone()))
            .await
    }
}
