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

//! tcpchat client binary

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tcpchat_client::{ChatClient, ClientConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Terminal client for tcpchat
#[derive(Parser, Debug)]
#[command(name = "tcpchat-client", version, about = "Terminal client for tcpchat")]
struct Args {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(value_name = "PORT", default_value_t = 8989)]
    port: u16,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so they never mix with the chat on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::new(args.host, args.port)
        .with_connect_timeout(Duration::from_secs(args.connect_timeout));

    let client = match ChatClient::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Error connecting to server");
            return ExitCode::FAILURE;
        }
    };

    match client.run(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Connection lost");
            ExitCode::FAILURE
        }
    }
}
