// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deletes a field. Removing a field that does not exist is an entry error,
//! handled by the configured on-error policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, Field};
use crate::errors::{ConfigError, EntryError, OperatorError};
use crate::operator::helper::{BasicConfig, TransformerConfig, TransformerOperator};
use crate::operator::{Builder, Operator, OperatorRef};
use crate::persister::Persister;

pub const OPERATOR_TYPE: &str = "remove";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    pub field: Field,
}

impl RemoveConfig {
    pub fn new(field: Field) -> Self {
        RemoveConfig {
            basic: BasicConfig::new(OPERATOR_TYPE),
            transformer: TransformerConfig::default(),
            field,
        }
    }

    pub fn build_remove(&self) -> Result<Arc<RemoveOperator>, ConfigError> {
        Ok(Arc::new(RemoveOperator {
            transformer: self.transformer.build(self.basic.build()?),
            field: self.field.clone(),
        }))
    }
}

impl Builder for RemoveConfig {
    fn id(&self) -> &str {
        self.basic.id()
    }

    fn operator_type(&self) -> &str {
        &self.basic.operator_type
    }

    fn set_default_output(&mut self, output: &str) {
        self.transformer.writer.set_default_output(output);
    }

    fn build(&self) -> Result<OperatorRef, ConfigError> {
        Ok(self.build_remove()?)
    }
}

pub struct RemoveOperator {
    transformer: TransformerOperator,
    field: Field,
}

#[async_trait]
impl Operator for RemoveOperator {
    fn id(&self) -> &str {
        self.transformer.id()
    }

    fn operator_type(&self) -> &str {
        self.transformer.basic().operator_type()
    }

    fn can_output(&self) -> bool {
        true
    }

    fn can_process(&self) -> bool {
        true
    }

    fn output_ids(&self) -> Vec<String> {
        self.transformer.output_ids()
    }

    fn outputs(&self) -> Vec<OperatorRef> {
        self.transformer.outputs()
    }

    fn set_outputs(&self, operators: &[OperatorRef]) -> Result<(), ConfigError> {
        self.transformer.set_outputs(operators)
    }

    async fn start(&self, _persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        Ok(())
    }

    async fn process(&self, entry: Entry) -> Result<(), OperatorError> {
        self.transformer
            .process_with(entry, |entry| match entry.delete(&self.field) {
                Some(_) => Ok(()),
                None => Err(EntryError::FieldNotFound(self.field.clone())),
            })
            .await
    }
}
