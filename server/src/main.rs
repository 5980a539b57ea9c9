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

//! tcpchat server binary
//!
//! ```bash
//! tcpchat-server            # listen on 0.0.0.0:8989
//! tcpchat-server 2525 --max-users 20
//! RUST_LOG=tcpchat_service=debug tcpchat-server
//! ```

mod cli;

use clap::Parser;
use cli::Args;
use std::process::ExitCode;
use tcpchat_service::{ChatServer, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Chat server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let server = ChatServer::new(args.into_config()).await?;
    println!("Listening on the port {}", server.bind_address());

    server.start().await?;
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    server.shutdown().await?;
    let metrics = server.metrics().snapshot();
    info!(
        connections = metrics.total_connections,
        rejected = metrics.rejected_connections,
        messages = metrics.messages_broadcast,
        "Chat server stopped"
    );
    Ok(())
}
