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

//! Core types for the chat service

use crate::{ChatError, sanitize};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Unique identifier for a connection (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A sanitized, non-empty display name
///
/// Construction always runs the input through [`sanitize::sanitize`], so a
/// `DisplayName` never carries control characters or surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayName(String);

impl DisplayName {
    /// Sanitize and validate a display name
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, ChatError> {
        let name = sanitize::sanitize(raw.as_ref());
        if name.is_empty() {
            return Err(ChatError::EmptyName);
        }
        Ok(Self(name))
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the name, returning the inner string
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, banner being written
    Connecting,
    /// Waiting for a unique, non-empty display name
    NameNegotiation,
    /// Registered and relaying messages
    Active,
    /// Unregistering and announcing departure
    Closing,
    /// Session finished
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::NameNegotiation => write!(f, "name-negotiation"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of registered sessions
    pub active_sessions: usize,
    /// Total connections accepted since server start
    pub total_connections: u64,
    /// Server bind address
    pub bind_address: SocketAddr,
    /// Server uptime
    pub uptime: Duration,
    /// Server start time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChatServer {{ active: {}, total: {}, addr: {}, uptime: {:?} }}",
            self.active_sessions, self.total_connections, self.bind_address, self.uptime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id() {
        let id1 = ConnectionId::new(1);
        let id2 = ConnectionId::new(2);

        assert_eq!(id1.as_u64(), 1);
        assert_ne!(id1, id2);
        assert!(id1 < id2);
        assert_eq!(id2.to_string(), "conn-2");
    }

    #[test]
    fn test_display_name_sanitizes() {
        let name = DisplayName::parse("  al\x07ice\r\n").unwrap();
        assert_eq!(name.as_str(), "alice");
    }

    #[test]
    fn test_display_name_rejects_empty() {
        assert!(matches!(DisplayName::parse(""), Err(ChatError::EmptyName)));
        assert!(matches!(
            DisplayName::parse(" \t\r\n\x1b "),
            Err(ChatError::EmptyName)
        ));
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::NameNegotiation.to_string(), "name-negotiation");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
