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

//! # tcpchat client
//!
//! A dumb terminal relay for the tcpchat server: input lines go to the
//! socket, whatever the server sends goes to the output.
//!
//! ```no_run
//! use tcpchat_client::{ChatClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ChatClient::connect(ClientConfig::new("localhost", 8989)).await?;
//!     client.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;

pub use client::{ChatClient, RelayStats};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
