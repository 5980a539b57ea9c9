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

//! Chat messages and the text the server puts on the wire

use crate::{ConnectionId, DisplayName, sanitize};
use chrono::Local;

/// Prompt written while waiting for a display name
pub const NAME_PROMPT: &str = "[ENTER YOUR NAME]:";

/// Notice written when the requested name is reserved
pub const NAME_TAKEN_NOTICE: &str = "This name is already in use. Please choose another name.\n";

/// Timestamp layout used in prompts, deliveries and the transcript
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted for the wire
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Input prompt for `name`: `[timestamp][name]: `
pub fn prompt(timestamp: &str, name: &DisplayName) -> String {
    format!("[{}][{}]: ", timestamp, name)
}

/// Line written when the server is at capacity
pub fn capacity_rejection(max_users: usize) -> String {
    format!(
        "Sorry, the chat is full (max {} users). Try again later.\n",
        max_users
    )
}

/// A single chat message
///
/// Immutable once built. The text is sanitized on construction and is never
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    origin: ConnectionId,
    sender: DisplayName,
    text: String,
}

impl ChatMessage {
    /// Build a message from raw client input
    ///
    /// Returns `None` if nothing is left after sanitization.
    pub fn new(origin: ConnectionId, sender: DisplayName, raw: &str) -> Option<Self> {
        Self::from_sanitized(origin, sender, sanitize::sanitize(raw))
    }

    /// Build a message from bytes read off a connection
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn from_bytes(origin: ConnectionId, sender: DisplayName, raw: &[u8]) -> Option<Self> {
        Self::from_sanitized(origin, sender, sanitize::sanitize_bytes(raw))
    }

    fn from_sanitized(origin: ConnectionId, sender: DisplayName, text: String) -> Option<Self> {
        if text.is_empty() {
            return None;
        }
        Some(Self {
            origin,
            sender,
            text,
        })
    }

    /// Connection the message was read from
    pub fn origin(&self) -> ConnectionId {
        self.origin
    }

    /// Display name of the sender
    pub fn sender(&self) -> &DisplayName {
        &self.sender
    }

    /// Sanitized message text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Transcript line: `[timestamp][sender]: text\n`
    pub fn format_line(&self, timestamp: &str) -> String {
        format!("[{}][{}]: {}\n", timestamp, self.sender, self.text)
    }
}
