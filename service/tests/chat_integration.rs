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

//! Integration tests for the tcpchat-service crate over real TCP sockets

use std::net::SocketAddr;
use tcpchat_service::message::{NAME_PROMPT, NAME_TAKEN_NOTICE};
use tcpchat_service::{ChatServer, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A raw TCP participant that buffers everything it has not consumed yet
struct Peer {
    stream: TcpStream,
    pending: String,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            pending: String::new(),
        }
    }

    /// Connect and complete name negotiation
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut peer = Self::connect(addr).await;
        peer.expect(NAME_PROMPT).await;
        peer.send(&format!("{}\n", name)).await;
        peer.expect(&format!("][{}]: ", name)).await;
        peer
    }

    async fn send(&mut self, text: &str) {
        self.stream.write_all(text.as_bytes()).await.unwrap();
    }

    /// Read until `wanted` shows up, returning everything up to and including it
    async fn expect(&mut self, wanted: &str) -> String {
        loop {
            if let Some(pos) = self.pending.find(wanted) {
                let rest = self.pending.split_off(pos + wanted.len());
                return std::mem::replace(&mut self.pending, rest);
            }
            let mut buf = [0u8; 1024];
            let n = timeout(READ_TIMEOUT, self.stream.read(&mut buf))
                .await
                .unwrap_or_else(|_| {
                    panic!("timed out waiting for {:?}, have {:?}", wanted, self.pending)
                })
                .unwrap();
            assert!(n > 0, "EOF waiting for {:?}, have {:?}", wanted, self.pending);
            self.pending.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    /// Everything that arrives within `wait`
    async fn drain(&mut self, wait: Duration) -> String {
        let mut buf = [0u8; 1024];
        while let Ok(Ok(n)) = timeout(wait, self.stream.read(&mut buf)).await {
            if n == 0 {
                break;
            }
            self.pending.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        std::mem::take(&mut self.pending)
    }

    /// Read until the server closes the connection
    async fn read_to_close(&mut self) -> String {
        let mut rest = Vec::new();
        timeout(READ_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .expect("server did not close the connection")
            .unwrap();
        let mut all = std::mem::take(&mut self.pending);
        all.push_str(&String::from_utf8_lossy(&rest));
        all
    }
}

async fn start_server(dir: &tempfile::TempDir, max_users: usize) -> ChatServer {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_max_users(max_users)
        .with_history_dir(dir.path())
        .without_banner()
        .with_shutdown_timeout(Duration::from_secs(1));
    let server = ChatServer::new(config).await.unwrap();
    server.start().await.unwrap();
    server
}

#[tokio::test]
async fn test_duplicate_name_and_sender_exclusion() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(&dir, 10).await;
    let addr = server.bind_address();

    let mut alice = Peer::join(addr, "alice").await;

    let mut second = Peer::connect(addr).await;
    second.expect(NAME_PROMPT).await;
    second.send("alice\n").await;
    let seen = second.expect(NAME_PROMPT).await;
    assert!(seen.contains(NAME_TAKEN_NOTICE));
    second.send("bob\n").await;
    second.expect("][bob]: ").await;
    let mut bob = second;

    alice.expect("\nbob has joined our chat...\n").await;
    alice.expect("][alice]: ").await;

    alice.send("hello\n").await;
    let delivered = bob.expect("][bob]: ").await;
    assert!(delivered.starts_with("\n["));
    assert!(delivered.contains("][alice]: hello\n"));

    let echoed = alice.drain(Duration::from_millis(200)).await;
    assert!(!echoed.contains("hello"), "sender received own message: {:?}", echoed);

    let history = std::fs::read_to_string(server.transcript().path()).unwrap();
    let lines: Vec<_> = history.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with('['));
    assert!(lines[0].ends_with("][alice]: hello"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_capacity_rejection_before_name_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(&dir, 1).await;
    let addr = server.bind_address();

    let _alice = Peer::join(addr, "alice").await;

    let mut late = Peer::connect(addr).await;
    let received = late.read_to_close().await;
    assert_eq!(
        received,
        "Sorry, the chat is full (max 1 users). Try again later.\n"
    );
    assert!(!received.contains(NAME_PROMPT));

    assert_eq!(server.connection_count().await, 1);
    assert_eq!(server.metrics().snapshot().rejected_connections, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_joiner_receives_history() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(&dir, 10).await;
    let addr = server.bind_address();

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect("bob has joined our chat...").await;

    alice.send("first\n").await;
    bob.expect("][alice]: first\n").await;
    bob.send("second\n").await;
    alice.expect("][bob]: second\n").await;

    let mut carol = Peer::connect(addr).await;
    carol.expect(NAME_PROMPT).await;
    carol.send("carol\n").await;
    let replay = carol.expect("][carol]: ").await;

    let first = replay.find("][alice]: first\n").unwrap();
    let second = replay.find("][bob]: second\n").unwrap();
    assert!(first < second);
    assert!(!replay.contains("has joined"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leave_notice_reaches_remaining_users() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(&dir, 10).await;
    let addr = server.bind_address();

    let mut alice = Peer::join(addr, "alice").await;
    let bob = Peer::join(addr, "bob").await;
    alice.expect("bob has joined our chat...").await;

    drop(bob);
    alice.expect("\nbob has left our chat...\n").await;

    // The name is free again once bob has left
    let _bob_again = Peer::join(addr, "bob").await;
    alice.expect("bob has joined our chat...").await;
    assert_eq!(server.connection_count().await, 2);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_control_characters_are_stripped() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(&dir, 10).await;
    let addr = server.bind_address();

    let mut alice = Peer::connect(addr).await;
    alice.expect(NAME_PROMPT).await;
    alice.send("al\x1bice\r\n").await;
    alice.expect("][alice]: ").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect("bob has joined our chat...").await;
    alice.expect("][alice]: ").await;

    bob.send("  he\x07llo\r\n").await;
    let delivered = alice.expect("][alice]: ").await;
    assert!(delivered.contains("][bob]: hello\n"));

    // Whitespace-only input is dropped entirely
    bob.send(" \t\r\n").await;
    assert!(!alice.drain(Duration::from_millis(200)).await.contains("][bob]:"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disconnects_everyone() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(&dir, 10).await;
    let addr = server.bind_address();
    let transcript = server.transcript().path().to_path_buf();

    let mut alice = Peer::join(addr, "alice").await;
    let mut pending = Peer::connect(addr).await;
    pending.expect(NAME_PROMPT).await;

    server.shutdown().await.unwrap();

    alice.read_to_close().await;
    pending.read_to_close().await;
    assert!(!transcript.exists());
    assert!(TcpStream::connect(addr).await.is_err());
}
