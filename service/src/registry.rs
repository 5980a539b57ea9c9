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

//! Connection registry
//!
//! The registry is the authoritative map from live connections to display
//! names, plus a reservation set of taken names. Both structures live behind
//! one async mutex and are only ever mutated together, so they always agree
//! on membership.
//!
//! The broadcast engine holds the lock for a whole delivery round through a
//! [`RegistryGuard`]: it iterates a point-in-time snapshot and removes failed
//! recipients only after the iteration is finished.

use crate::{ChatConnection, ChatError, ConnectionId, DisplayName, Result};
use metrics::gauge;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// A registered connection and the name it chose
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Connection handle used for delivery
    pub connection: ChatConnection,
    /// Display name reserved by the connection
    pub name: DisplayName,
}

impl RegistryEntry {
    /// Connection ID of the entry
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<ConnectionId, RegistryEntry>,
    names: HashSet<DisplayName>,
}

impl RegistryState {
    fn remove(&mut self, id: ConnectionId) -> Option<DisplayName> {
        let entry = self.entries.remove(&id)?;
        self.names.remove(&entry.name);
        gauge!("tcpchat.sessions.active").set(self.entries.len() as f64);
        Some(entry.name)
    }

    fn snapshot(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by_key(RegistryEntry::id);
        entries
    }
}

/// Registry of live, named connections
#[derive(Debug)]
pub struct Registry {
    state: Mutex<RegistryState>,
    max_users: usize,
}

impl Registry {
    /// Create an empty registry that admits at most `max_users` entries
    pub fn new(max_users: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            max_users,
        }
    }

    /// Maximum number of entries
    pub fn max_users(&self) -> usize {
        self.max_users
    }

    /// Register `connection` under `name`
    ///
    /// Fails with [`ChatError::NameTaken`] if the name is reserved and with
    /// [`ChatError::ServerFull`] if the registry is at capacity. On failure
    /// the registry is left unchanged.
    pub async fn register(&self, connection: &ChatConnection, name: DisplayName) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.names.contains(&name) {
            debug!(connection_id = %connection.id(), name = %name, "Name already reserved");
            return Err(ChatError::NameTaken(name.into_inner()));
        }

        if state.entries.contains_key(&connection.id()) {
            warn!(connection_id = %connection.id(), "Connection registered twice");
            return Err(ChatError::Other(format!(
                "{} is already registered",
                connection.id()
            )));
        }

        if state.entries.len() >= self.max_users {
            return Err(ChatError::ServerFull(self.max_users));
        }

        state.names.insert(name.clone());
        state.entries.insert(
            connection.id(),
            RegistryEntry {
                connection: connection.clone(),
                name,
            },
        );
        gauge!("tcpchat.sessions.active").set(state.entries.len() as f64);
        Ok(())
    }

    /// Remove the entry for `id`, returning the freed name
    ///
    /// Returns `None` if the connection never registered.
    pub async fn unregister(&self, id: ConnectionId) -> Option<DisplayName> {
        self.state.lock().await.remove(id)
    }

    /// Number of registered connections
    pub async fn count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Check whether the registry is at capacity
    pub async fn is_full(&self) -> bool {
        self.count().await >= self.max_users
    }

    /// Check whether `name` is reserved
    pub async fn contains_name(&self, name: &DisplayName) -> bool {
        self.state.lock().await.names.contains(name)
    }

    /// Name registered for `id`, if any
    pub async fn name_of(&self, id: ConnectionId) -> Option<DisplayName> {
        self.state
            .lock()
            .await
            .entries
            .get(&id)
            .map(|entry| entry.name.clone())
    }

    /// Point-in-time copy of all entries, ordered by connection ID
    pub async fn snapshot(&self) -> Vec<RegistryEntry> {
        self.state.lock().await.snapshot()
    }

    /// Acquire the registry lock for a delivery round
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            state: self.state.lock().await,
        }
    }

    /// Remove every entry, returning the removed connections
    pub async fn drain(&self) -> Vec<ChatConnection> {
        let mut state = self.state.lock().await;
        state.names.clear();
        let drained = state
            .entries
            .drain()
            .map(|(_, entry)| entry.connection)
            .collect();
        gauge!("tcpchat.sessions.active").set(0.0);
        drained
    }

    #[cfg(test)]
    async fn is_consistent(&self) -> bool {
        let state = self.state.lock().await;
        state.entries.len() == state.names.len()
            && state
                .entries
                .values()
                .all(|entry| state.names.contains(&entry.name))
    }
}

/// Exclusive access to the registry for the duration of a delivery round
pub struct RegistryGuard<'a> {
    state: MutexGuard<'a, RegistryState>,
}

impl RegistryGuard<'_> {
    /// Point-in-time copy of all entries, ordered by connection ID
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.state.snapshot()
    }

    /// Remove the entry for `id` while holding the lock
    pub fn remove(&mut self, id: ConnectionId) -> Option<DisplayName> {
        self.state.remove(id)
    }

    /// Number of registered connections
    pub fn count(&self) -> usize {
        self.state.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::duplex;

    fn connection(id: u64) -> ChatConnection {
        let (local, _remote) = duplex(64);
        ChatConnection::from_parts(local, ConnectionId::new(id), None)
    }

    fn name(raw: &str) -> DisplayName {
        DisplayName::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = Registry::new(10);
        let conn = connection(1);

        registry.register(&conn, name("alice")).await.unwrap();
        assert_eq!(registry.count().await, 1);
        assert!(registry.contains_name(&name("alice")).await);
        assert_eq!(registry.name_of(conn.id()).await, Some(name("alice")));

        assert_eq!(registry.unregister(conn.id()).await, Some(name("alice")));
        assert_eq!(registry.count().await, 0);
        assert!(!registry.contains_name(&name("alice")).await);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_without_change() {
        let registry = Registry::new(10);
        let first = connection(1);
        let second = connection(2);

        registry.register(&first, name("alice")).await.unwrap();
        let result = registry.register(&second, name("alice")).await;

        assert!(matches!(result, Err(ChatError::NameTaken(ref n)) if n == "alice"));
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.name_of(second.id()).await, None);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_freed_name_can_be_reused() {
        let registry = Registry::new(10);
        let first = connection(1);
        let second = connection(2);

        registry.register(&first, name("alice")).await.unwrap();
        registry.unregister(first.id()).await;
        registry.register(&second, name("alice")).await.unwrap();
        assert_eq!(registry.name_of(second.id()).await, Some(name("alice")));
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let registry = Registry::new(1);
        registry.register(&connection(1), name("alice")).await.unwrap();
        assert!(registry.is_full().await);

        let result = registry.register(&connection(2), name("bob")).await;
        assert!(matches!(result, Err(ChatError::ServerFull(1))));
        assert_eq!(registry.count().await, 1);
        assert!(!registry.contains_name(&name("bob")).await);
    }

    #[tokio::test]
    async fn test_same_connection_cannot_register_twice() {
        let registry = Registry::new(10);
        let conn = connection(1);
        registry.register(&conn, name("alice")).await.unwrap();
        assert!(registry.register(&conn, name("alice2")).await.is_err());
        assert_eq!(registry.count().await, 1);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_unregister_unknown_connection() {
        let registry = Registry::new(10);
        assert_eq!(registry.unregister(ConnectionId::new(99)).await, None);
    }

    #[tokio::test]
    async fn test_guard_snapshot_and_remove() {
        let registry = Registry::new(10);
        for (id, n) in [(3, "carol"), (1, "alice"), (2, "bob")] {
            registry.register(&connection(id), name(n)).await.unwrap();
        }

        let mut guard = registry.lock().await;
        let snapshot = guard.snapshot();
        let ids: Vec<_> = snapshot.iter().map(|e| e.id().as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        assert_eq!(guard.remove(ConnectionId::new(2)), Some(name("bob")));
        assert_eq!(guard.count(), 2);
        // Snapshot taken earlier is unaffected
        assert_eq!(snapshot.len(), 3);
        drop(guard);

        assert!(!registry.contains_name(&name("bob")).await);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_drain_clears_everything() {
        let registry = Registry::new(10);
        registry.register(&connection(1), name("alice")).await.unwrap();
        registry.register(&connection(2), name("bob")).await.unwrap();

        let drained = registry.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.count().await, 0);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_concurrent_registration_keeps_names_unique() {
        let registry = Arc::new(Registry::new(100));
        let mut tasks = Vec::new();

        // 50 connections race for 5 names
        for id in 0..50u64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let conn = connection(id);
                let wanted = name(&format!("user{}", id % 5));
                registry.register(&conn, wanted).await.is_ok()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 5);
        assert_eq!(registry.count().await, 5);
        assert!(registry.is_consistent().await);
    }
}
