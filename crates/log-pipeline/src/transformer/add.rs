// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sets a field to a fixed value.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::{Entry, Field, FieldRoot};
use crate::errors::{ConfigError, OperatorError};
use crate::operator::helper::{BasicConfig, TransformerConfig, TransformerOperator};
use crate::operator::{Builder, Operator, OperatorRef};
use crate::persister::Persister;

pub const OPERATOR_TYPE: &str = "add";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    pub field: Field,
    pub value: Value,
}

impl AddConfig {
    pub fn new(field: Field, value: Value) -> Self {
        AddConfig {
            basic: BasicConfig::new(OPERATOR_TYPE),
            transformer: TransformerConfig::default(),
            field,
            value,
        }
    }

    pub fn build_add(&self) -> Result<Arc<AddOperator>, ConfigError> {
        let section_root = self.field.is_root() && self.field.root() != FieldRoot::Body;
        if section_root && !self.value.is_object() {
            return Err(ConfigError::InvalidParameter {
                name: "value",
                reason: format!("{} must be set to a map", self.field.root()),
            });
        }
        Ok(Arc::new(AddOperator {
            transformer: self.transformer.build(self.basic.build()?),
            field: self.field.clone(),
            value: self.value.clone(),
        }))
    }
}

impl Builder for AddConfig {
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
        Ok(self.build_add()?)
    }
}

pub struct AddOperator {
    transformer: TransformerOperator,
    field: Field,
    value: Value,
}

#[async_trait]
impl Operator for AddOperator {
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
            .process_with(entry, |entry| {
                entry.set(&self.field, self.value.clone())?;
                Ok(())
            })
            .await
    }
}
