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

//! Server configuration
//!
//! # Example
//!
//! ```
//! use tcpchat_service::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::new("127.0.0.1:2525".parse().unwrap())
//!     .with_max_users(25)
//!     .with_write_timeout(Duration::from_secs(5))
//!     .without_banner();
//!
//! assert_eq!(config.queue_capacity(), 250);
//! assert!(config.validate().is_ok());
//! ```

use crate::{ChatError, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port used when none is given on the command line
pub const DEFAULT_PORT: u16 = 8989;

/// Maximum number of simultaneous sessions by default
pub const DEFAULT_MAX_USERS: usize = 10;

/// Outbound queue slots reserved per allowed user
pub const QUEUE_SLOTS_PER_USER: usize = 10;

/// Size of the per-session read buffer
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Server configuration
///
/// Use the builder methods to customize the configuration and call
/// [`ServerConfig::validate`] before handing it to the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of registered sessions
    pub max_users: usize,

    /// Outbound queue capacity override
    ///
    /// `None` means `max_users * QUEUE_SLOTS_PER_USER`.
    pub queue_capacity: Option<usize>,

    /// Maximum number of bytes taken from a connection per read
    pub read_buffer_size: usize,

    /// Timeout for a single write to a client
    ///
    /// A delivery that exceeds it is treated as a failed delivery.
    pub write_timeout: Duration,

    /// Time to wait for background tasks during shutdown
    pub shutdown_timeout: Duration,

    /// Directory the chat transcript is written to
    pub history_dir: PathBuf,

    /// Optional welcome banner sent before the name prompt
    pub banner_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_users: DEFAULT_MAX_USERS,
            queue_capacity: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            history_dir: PathBuf::from("."),
            banner_path: Some(PathBuf::from("logo.txt")),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given bind address
    ///
    /// All other settings will use their default values.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Set the maximum number of simultaneous sessions
    pub fn with_max_users(mut self, max: usize) -> Self {
        self.max_users = max;
        self
    }

    /// Override the outbound queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the write timeout duration
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the transcript directory
    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = dir.into();
        self
    }

    /// Set the banner file
    pub fn with_banner(mut self, path: impl Into<PathBuf>) -> Self {
        self.banner_path = Some(path.into());
        self
    }

    /// Disable the welcome banner
    pub fn without_banner(mut self) -> Self {
        self.banner_path = None;
        self
    }

    /// Effective outbound queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.max_users.saturating_mul(QUEUE_SLOTS_PER_USER))
    }

    /// Transcript file path for a server listening on `addr`
    ///
    /// One transcript exists per listen port.
    pub fn history_path(&self, addr: SocketAddr) -> PathBuf {
        history_file(&self.history_dir, addr.port())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_users == 0 {
            return Err(ChatError::Config(
                "max_users must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity() == 0 {
            return Err(ChatError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(ChatError::Config(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.write_timeout.is_zero() {
            return Err(ChatError::Config(
                "write_timeout must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ChatError::Config(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn history_file(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("chat-{}.txt", port))
}
