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

//! Lock-free metrics for the chat server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// All metrics are stored as atomics and can be updated from any session
/// without locks. Use [`ServerMetrics::snapshot`] for a point-in-time view.
#[derive(Debug)]
pub struct ServerMetrics {
    // Connections
    total_connections: AtomicU64,
    rejected_connections: AtomicU64,
    active_sessions: AtomicU64,
    name_collisions: AtomicU64,

    // Traffic
    messages_received: AtomicU64,
    messages_broadcast: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,

    total_session_duration_ns: AtomicU64,
    completed_sessions: AtomicU64,

    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            name_collisions: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_broadcast: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            total_session_duration_ns: AtomicU64::new(0),
            completed_sessions: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    // Connection tracking

    /// Record an accepted connection
    pub fn connection_accepted(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection turned away at the capacity gate
    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session entering the registry
    pub fn session_registered(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a registered session ending
    pub fn session_ended(&self, duration: Duration) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.completed_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_session_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a name attempt that hit a reserved name
    pub fn name_collision(&self) {
        self.name_collisions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the total number of accepted connections
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Get the number of currently registered sessions
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    // Traffic tracking

    /// Record a chat message read from a session
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message drained and fanned out by the broadcast engine
    pub fn message_broadcast(&self) {
        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful delivery to one recipient
    pub fn delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed delivery to one recipient
    pub fn delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Snapshot

    /// Get a snapshot of all metrics
    ///
    /// Values are read individually, so the snapshot can be slightly
    /// inconsistent while sessions are updating it.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            name_collisions: self.name_collisions.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_broadcast: self.messages_broadcast.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_session_duration: self.average_session_duration(),
        }
    }

    fn average_session_duration(&self) -> Duration {
        let completed = self.completed_sessions.load(Ordering::Relaxed);
        if completed == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_session_duration_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / completed)
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Connections accepted since server start
    pub total_connections: u64,
    /// Connections refused at the capacity gate
    pub rejected_connections: u64,
    /// Currently registered sessions
    pub active_sessions: u64,
    /// Name attempts refused because the name was taken
    pub name_collisions: u64,
    /// Chat messages read from sessions
    pub messages_received: u64,
    /// Messages fanned out by the broadcast engine
    pub messages_broadcast: u64,
    /// Successful per-recipient deliveries
    pub deliveries: u64,
    /// Failed per-recipient deliveries
    pub delivery_failures: u64,
    /// Server uptime
    pub uptime: Duration,
    /// Average duration of completed sessions
    pub avg_session_duration: Duration,
}

impl MetricsSnapshot {
    /// Messages broadcast per second
    pub fn messages_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.messages_broadcast as f64 / self.uptime.as_secs_f64()
    }

    /// Fraction of deliveries that failed
    pub fn delivery_failure_rate(&self) -> f64 {
        let attempts = self.deliveries + self.delivery_failures;
        if attempts == 0 {
            return 0.0;
        }
        self.delivery_failures as f64 / attempts as f64
    }
}
