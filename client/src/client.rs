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

//! Line relay between a local terminal and a chat server

use crate::{ClientConfig, ClientError, Result};
use futures_util::StreamExt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, instrument, warn};

/// Longest input line the relay accepts
const MAX_INPUT_LINE: usize = 8192;

/// Counters for a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Non-empty lines sent to the server
    pub lines_sent: u64,
    /// Bytes received from the server
    pub bytes_received: u64,
}

/// Connected chat client
///
/// The client keeps no chat state of its own. Prompts, notices and
/// messages are whatever the server sends.
#[derive(Debug)]
pub struct ChatClient {
    config: ClientConfig,
    stream: TcpStream,
}

impl ChatClient {
    /// Connect to the configured server
    #[instrument(skip(config), fields(address = %config.address()))]
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(config.address()))
            .await
            .map_err(|_| ClientError::ConnectionTimeout)??;
        stream.set_nodelay(true)?;
        info!("Connected to chat server");
        Ok(Self { config, stream })
    }

    /// Local address of the connection
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Relay until the server closes the connection
    ///
    /// Lines from `input` are trimmed and sent with a trailing newline;
    /// blank lines are skipped. Everything the server sends is copied to
    /// `output` unchanged. When `input` ends, the write side is shut down
    /// and the relay keeps copying until the server hangs up.
    pub async fn run<I, O>(self, input: I, mut output: O) -> Result<RelayStats>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = self.stream.into_split();
        let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_INPUT_LINE));
        let mut buf = vec![0u8; self.config.buffer_size.max(1)];
        let mut stats = RelayStats::default();
        let mut input_open = true;

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        debug!("Server closed the connection");
                        break;
                    }
                    stats.bytes_received += n as u64;
                    output.write_all(&buf[..n]).await?;
                    output.flush().await?;
                }
                line = lines.next(), if input_open => match line {
                    Some(Ok(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        writer.write_all(format!("{}\n", text).as_bytes()).await?;
                        stats.lines_sent += 1;
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(max = MAX_INPUT_LINE, "Input line too long, discarded");
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        debug!("Input closed");
                        input_open = false;
                        writer.shutdown().await?;
                    }
                },
            }
        }

        output.flush().await?;
        Ok(stats)
    }
}
