// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keeps only the configured fields of an entry.
//!
//! Each section (body, attributes, resource) is handled on its own. A section
//! with no configured field is left as it is. Otherwise the section is rebuilt
//! from the values found at the configured paths, keeping the ancestor maps
//! those paths need. Fields that share an ancestor are merged under it, so the
//! result does not depend on the order fields are listed in. If none of the
//! paths exist the section becomes empty (`None`).
//!
//! A field addressing a whole section (e.g. `body`) keeps that section intact.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entry::{merge_at, Entry, Field, FieldRoot};
use crate::errors::{ConfigError, OperatorError};
use crate::operator::helper::{BasicConfig, TransformerConfig, TransformerOperator};
use crate::operator::{Builder, Operator, OperatorRef};
use crate::persister::Persister;

pub const OPERATOR_TYPE: &str = "retain";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl RetainConfig {
    pub fn new(fields: Vec<Field>) -> Self {
        RetainConfig {
            basic: BasicConfig::new(OPERATOR_TYPE),
            transformer: TransformerConfig::default(),
            fields,
        }
    }

    pub fn build_retain(&self) -> Result<Arc<RetainOperator>, ConfigError> {
        if self.fields.is_empty() {
            return Err(ConfigError::MissingParameter("fields"));
        }
        let transformer = self.transformer.build(self.basic.build()?);
        Ok(Arc::new(RetainOperator {
            transformer,
            body: SectionFields::collect(&self.fields, FieldRoot::Body),
            attributes: SectionFields::collect(&self.fields, FieldRoot::Attributes),
            resource: SectionFields::collect(&self.fields, FieldRoot::Resource),
        }))
    }
}

impl Builder for RetainConfig {
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
        Ok(self.build_retain()?)
    }
}

/// What to keep of one section.
#[derive(Debug, Clone, PartialEq)]
enum SectionFields {
    Untouched,
    Paths(Vec<Vec<String>>),
}

impl SectionFields {
    fn collect(fields: &[Field], root: FieldRoot) -> Self {
        let mut paths = Vec::new();
        for field in fields.iter().filter(|f| f.root() == root) {
            if field.is_root() {
                return SectionFields::Untouched;
            }
            paths.push(field.keys().to_vec());
        }
        if paths.is_empty() {
            SectionFields::Untouched
        } else {
            SectionFields::Paths(paths)
        }
    }

    fn retain(&self, source: Option<&Map<String, Value>>) -> Option<Map<String, Value>> {
        let SectionFields::Paths(paths) = self else {
            return source.cloned();
        };
        let source = source?;
        let mut retained = Map::new();
        for path in paths {
            if let Some(value) = crate::entry::lookup(source, path) {
                merge_at(&mut retained, path, value.clone());
            }
        }
        (!retained.is_empty()).then_some(retained)
    }
}

pub struct RetainOperator {
    transformer: TransformerOperator,
    body: SectionFields,
    attributes: SectionFields,
    resource: SectionFields,
}

impl RetainOperator {
    /// Prunes `entry` in place.
    pub fn retain(&self, entry: &mut Entry) {
        if self.body != SectionFields::Untouched {
            let body = entry.body.take();
            entry.body = self
                .body
                .retain(body.as_ref().and_then(Value::as_object))
                .map(Value::Object);
        }
        if self.attributes != SectionFields::Untouched {
            entry.attributes = self.attributes.retain(entry.attributes.as_ref());
        }
        if self.resource != SectionFields::Untouched {
            entry.resource = self.resource.retain(entry.resource.as_ref());
        }
    }
}

#[async_trait]
impl Operator for RetainOperator {
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
                self.retain(entry);
                Ok(())
            })
            .await
    }
}
