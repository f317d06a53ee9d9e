// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Checkpoint storage handed to every operator on start.
//!
//! Operators that need resumable state read and write opaque byte values by
//! key. The inputs shipped with this crate accept a persister and ignore it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::OperatorError;

#[async_trait]
pub trait Persister: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, OperatorError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), OperatorError>;
    async fn delete(&self, key: &str) -> Result<(), OperatorError>;
}

/// Process-local persister. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, OperatorError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), OperatorError> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), OperatorError> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// Namespaces every key with an operator id so operators sharing one store
/// cannot collide.
pub struct ScopedPersister {
    scope: String,
    inner: Arc<dyn Persister>,
}

impl ScopedPersister {
    pub fn new(scope: impl Into<String>, inner: Arc<dyn Persister>) -> Self {
        ScopedPersister {
            scope: scope.into(),
            inner,
        }
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}.{}", self.scope, key)
    }
}

#[async_trait]
impl Persister for ScopedPersister {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, OperatorError> {
        self.inner.get(&self.scoped_key(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), OperatorError> {
        self.inner.set(&self.scoped_key(key), value).await
    }

    async fn delete(&self, key: &str) -> Result<(), OperatorError> {
        self.inner.delete(&self.scoped_key(key)).await
    }
}
