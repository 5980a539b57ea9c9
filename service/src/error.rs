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

//! Error types for the chat service

use thiserror::Error;

/// Result type for chat service operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat service error types
#[derive(Debug, Error)]
pub enum ChatError {
    /// I/O error from the underlying stream, listener or transcript file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid server configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The requested display name is already reserved by another session
    #[error("Name '{0}' is already in use")]
    NameTaken(String),

    /// The registry already holds the maximum number of sessions
    #[error("Maximum users ({0}) reached")]
    ServerFull(usize),

    /// A display name was empty after sanitization
    #[error("Display name cannot be empty")]
    EmptyName,

    /// The outbound queue has been closed (server shutting down)
    #[error("Outbound queue closed")]
    QueueClosed,

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl ChatError {
    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ChatError::ConnectionClosed | ChatError::Timeout | ChatError::Io(_)
        )
    }
}
