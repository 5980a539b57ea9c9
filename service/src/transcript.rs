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

//! Chat history transcript
//!
//! An append-only file of formatted chat lines, one per listen port. The
//! broadcast engine is the only writer; sessions read the whole file once
//! when they join. A session joining while a message is being broadcast may
//! or may not see that message, but always sees everything written before.

use crate::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Writer half of the transcript, owned by the broadcast engine
#[derive(Debug)]
pub struct Transcript {
    file: File,
    handle: TranscriptHandle,
    lines: u64,
}

/// Shared, read-only view of the transcript
#[derive(Debug, Clone)]
pub struct TranscriptHandle {
    path: Arc<PathBuf>,
}

impl Transcript {
    /// Create a fresh transcript at `path`, removing any previous file
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        remove_if_exists(&path).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "Chat transcript created");

        Ok(Self {
            file,
            handle: TranscriptHandle {
                path: Arc::new(path),
            },
            lines: 0,
        })
    }

    /// Append one formatted line
    pub async fn append(&mut self, line: &str) -> Result<()> {
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.lines += 1;
        debug!(lines = self.lines, "Transcript appended");
        Ok(())
    }

    /// Number of lines appended so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Read-only handle for sessions
    pub fn handle(&self) -> TranscriptHandle {
        self.handle.clone()
    }
}

impl TranscriptHandle {
    /// Path of the transcript file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole transcript
    ///
    /// A missing file reads as empty.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        match fs::read(self.path.as_path()).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the transcript file
    pub async fn remove(&self) -> Result<()> {
        remove_if_exists(&self.path).await?;
        info!(path = %self.path.display(), "Chat transcript removed");
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale transcript");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove transcript");
            Err(e.into())
        }
    }
}
