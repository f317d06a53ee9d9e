// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Discards every entry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::errors::{ConfigError, OperatorError};
use crate::operator::helper::{BasicConfig, BasicOperator};
use crate::operator::{Builder, Operator, OperatorRef};
use crate::persister::Persister;

pub const OPERATOR_TYPE: &str = "drop_output";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
}

impl Default for DropConfig {
    fn default() -> Self {
        DropConfig {
            basic: BasicConfig::new(OPERATOR_TYPE),
        }
    }
}

impl Builder for DropConfig {
    fn id(&self) -> &str {
        self.basic.id()
    }

    fn operator_type(&self) -> &str {
        &self.basic.operator_type
    }

    fn build(&self) -> Result<OperatorRef, ConfigError> {
        Ok(Arc::new(DropOperator {
            basic: self.basic.build()?,
        }))
    }
}

pub struct DropOperator {
    basic: BasicOperator,
}

#[async_trait]
impl Operator for DropOperator {
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
        Ok(())
    }

    async fn process(&self, _entry: Entry) -> Result<(), OperatorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drop_accepts_everything() {
        let op = DropConfig::default().build().unwrap();
        assert!(op.can_process());
        op.process(Entry::new()).await.unwrap();
        op.stop().await.unwrap();
        op.stop().await.unwrap();
    }
}
