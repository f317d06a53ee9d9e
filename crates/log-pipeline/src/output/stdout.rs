// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes every entry as a single JSON line.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::Entry;
use crate::errors::{ConfigError, OperatorError};
use crate::operator::helper::{BasicConfig, BasicOperator};
use crate::operator::{Builder, Operator, OperatorRef};
use crate::persister::Persister;

pub const OPERATOR_TYPE: &str = "stdout";

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdoutConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
}

impl Default for StdoutConfig {
    fn default() -> Self {
        StdoutConfig {
            basic: BasicConfig::new(OPERATOR_TYPE),
        }
    }
}

impl StdoutConfig {
    pub fn build_stdout(&self) -> Result<Arc<StdoutOperator>, ConfigError> {
        self.build_with_writer(Box::new(tokio::io::stdout()))
    }

    /// Builds the operator around any async writer instead of stdout.
    pub fn build_with_writer(&self, writer: Sink) -> Result<Arc<StdoutOperator>, ConfigError> {
        Ok(Arc::new(StdoutOperator {
            basic: self.basic.build()?,
            writer: Mutex::new(writer),
        }))
    }
}

impl Builder for StdoutConfig {
    fn id(&self) -> &str {
        self.basic.id()
    }

    fn operator_type(&self) -> &str {
        &self.basic.operator_type
    }

    fn build(&self) -> Result<OperatorRef, ConfigError> {
        Ok(self.build_stdout()?)
    }
}

pub struct StdoutOperator {
    basic: BasicOperator,
    writer: Mutex<Sink>,
}

#[async_trait]
impl Operator for StdoutOperator {
    fn id(&self) -> &str {
        self.basic.id()
    }

    fn operator_type(&self) -> &str {
        self.basic.operator_type()
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
        if let Err(e) = self.writer.lock().await.flush().await {
            debug!(operator_id = %self.id(), "Failed to flush output: {e}");
        }
        Ok(())
    }

    async fn process(&self, entry: Entry) -> Result<(), OperatorError> {
        let mut line = serde_json::to_vec(&entry).map_err(std::io::Error::from)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
