// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for testing operators: a channel-backed terminal operator and a
//! persister that records how it was used.

#![allow(clippy::panic)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::entry::Entry;
use crate::errors::{ConfigError, OperatorError};
use crate::operator::{Operator, OperatorRef};
use crate::persister::{MemoryPersister, Persister};

const ENTRY_TIMEOUT: Duration = Duration::from_secs(5);
const NO_ENTRY_WAIT: Duration = Duration::from_millis(100);

/// A terminal operator that forwards every processed entry to a channel.
pub struct FakeOutput {
    id: String,
    tx: mpsc::UnboundedSender<Entry>,
}

impl FakeOutput {
    pub fn new(id: impl Into<String>) -> (Arc<FakeOutput>, EntryReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(FakeOutput { id: id.into(), tx }), EntryReceiver { rx })
    }
}

#[async_trait]
impl Operator for FakeOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator_type(&self) -> &str {
        "fake_output"
    }

    fn can_output(&self) -> bool {
        false
    }

    fn can_process(&self) -> bool {
        true
    }

    fn output_ids(&self) -> Vec<String> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<OperatorRef> {
        Vec::new()
    }

    fn set_outputs(&self, _operators: &[OperatorRef]) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn start(&self, _persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        Ok(())
    }

    async fn process(&self, entry: Entry) -> Result<(), OperatorError> {
        // Receivers dropped by a finished test are not an error.
        let _ = self.tx.send(entry);
        Ok(())
    }
}

/// Receiving side of a [`FakeOutput`].
pub struct EntryReceiver {
    rx: mpsc::UnboundedReceiver<Entry>,
}

impl EntryReceiver {
    /// Waits up to five seconds for the next entry, panicking otherwise.
    pub async fn expect_entry(&mut self) -> Entry {
        match tokio::time::timeout(ENTRY_TIMEOUT, self.rx.recv()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => panic!("output channel closed while waiting for an entry"),
            Err(_) => panic!("timed out waiting for an entry"),
        }
    }

    /// Asserts that no entry arrives within a short grace period.
    pub async fn expect_no_entry(&mut self) {
        if let Ok(Some(entry)) = tokio::time::timeout(NO_ENTRY_WAIT, self.rx.recv()).await {
            panic!("unexpected entry: {entry:?}");
        }
    }
}

/// In-memory persister that records every call as `"<method> <key>"`.
#[derive(Debug, Default)]
pub struct MockPersister {
    store: MemoryPersister,
    calls: Mutex<Vec<String>>,
}

impl MockPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, method: &str, key: &str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{method} {key}"));
    }
}

#[async_trait]
impl Persister for MockPersister {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, OperatorError> {
        self.record("get", key);
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), OperatorError> {
        self.record("set", key);
        self.store.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), OperatorError> {
        self.record("delete", key);
        self.store.delete(key).await
    }
}
