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

//! Command line arguments

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tcpchat_service::{DEFAULT_MAX_USERS, DEFAULT_PORT, ServerConfig};

/// Multi-user TCP chat server
#[derive(Parser, Debug, Clone)]
#[command(name = "tcpchat-server", version, about = "Multi-user TCP chat server")]
pub struct Args {
    /// Port to listen on
    #[arg(value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Maximum number of registered users
    #[arg(long, default_value_t = DEFAULT_MAX_USERS)]
    pub max_users: usize,

    /// File sent to every client before the name prompt
    #[arg(long, default_value = "logo.txt")]
    pub banner: PathBuf,

    /// Do not send a banner
    #[arg(long)]
    pub no_banner: bool,

    /// Directory the chat transcript is kept in
    #[arg(long, default_value = ".")]
    pub history_dir: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Build the server configuration
    pub fn into_config(self) -> ServerConfig {
        let config = ServerConfig::new(SocketAddr::new(self.host, self.port))
            .with_max_users(self.max_users)
            .with_history_dir(self.history_dir);
        if self.no_banner {
            config.without_banner()
        } else {
            config.with_banner(self.banner)
        }
    }
}
