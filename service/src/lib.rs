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

//! Multi-user TCP Chat Server Core
//!
//! Clients connect over plain TCP, pick a unique display name and then every
//! line they type is timestamped and relayed to all other participants.
//!
//! # Architecture
//!
//! ```text
//! ChatServer ── AcceptLoop ── ChatSession (one per connection)
//!     │                          │  register / unregister
//!     │                          ▼
//!     │                       Registry ◄──────────┐
//!     │                          │ push           │ lock, snapshot, remove
//!     │                          ▼                │
//!     └──────────────────── OutboundQueue ──► BroadcastEngine ──► Transcript
//! ```
//!
//! - Sessions only ever write to their own connection.
//! - The broadcast engine is the single consumer of the queue and the only
//!   component that writes to other connections. It holds the registry lock
//!   for a whole delivery round.
//! - Join and leave announcements travel through the same queue, so they are
//!   ordered with chat messages.
//!
//! # Example
//!
//! ```no_run
//! use tcpchat_service::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("127.0.0.1:8989".parse()?).with_max_users(10);
//!     let server = ChatServer::new(config).await?;
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod broadcast;
mod config;
mod connection;
mod error;
pub mod message;
mod metrics;
mod notifier;
mod queue;
mod registry;
pub mod sanitize;
mod server;
mod session;
mod transcript;
mod types;

pub use broadcast::{BroadcastEngine, DeliveryReport};
pub use config::{
    DEFAULT_MAX_USERS, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE, QUEUE_SLOTS_PER_USER, ServerConfig,
};
pub use connection::ChatConnection;
pub use error::{ChatError, Result};
pub use message::ChatMessage;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use notifier::{LifecycleEvent, LifecycleKind, LifecycleNotifier};
pub use queue::{OutboundMessage, OutboundQueue, QueueConsumer};
pub use registry::{Registry, RegistryEntry, RegistryGuard};
pub use sanitize::sanitize;
pub use server::ChatServer;
pub use session::{ChatSession, SessionContext, SessionOutcome};
pub use transcript::{Transcript, TranscriptHandle};
pub use types::{ConnectionId, DisplayName, ServerSnapshot, SessionState};
