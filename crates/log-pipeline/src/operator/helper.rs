// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Building blocks shared by concrete operators: config fragments that are
//! flattened into each operator's config, and the runtime pieces that
//! implement output wiring, entry creation and on-error handling.

use std::collections::BTreeMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, warn, Span};

use super::{FatalSink, OperatorRef};
use crate::entry::Entry;
use crate::errors::{ConfigError, EntryError, OperatorError};

/// Identity shared by every operator config. The id defaults to the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub operator_type: String,
}

impl BasicConfig {
    pub fn new(operator_type: impl Into<String>) -> Self {
        BasicConfig {
            id: None,
            operator_type: operator_type.into(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.operator_type)
    }

    pub fn build(&self) -> Result<BasicOperator, ConfigError> {
        if self.operator_type.is_empty() {
            return Err(ConfigError::MissingParameter("type"));
        }
        if self.id().is_empty() {
            return Err(ConfigError::MissingParameter("id"));
        }
        let id = self.id().to_string();
        let span = tracing::info_span!("operator", id = %id, r#type = %self.operator_type);
        Ok(BasicOperator {
            id,
            operator_type: self.operator_type.clone(),
            span,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BasicOperator {
    id: String,
    operator_type: String,
    span: Span,
}

impl BasicOperator {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn operator_type(&self) -> &str {
        &self.operator_type
    }

    /// Span that background tasks of this operator are instrumented with.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Downstream wiring for operators that output entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default, deserialize_with = "one_or_many")]
    pub output: Vec<String>,
}

impl WriterConfig {
    pub fn set_default_output(&mut self, output: &str) {
        if self.output.is_empty() {
            self.output.push(output.to_string());
        }
    }

    pub fn build(&self, basic: BasicOperator) -> WriterOperator {
        WriterOperator {
            basic,
            output_ids: self.output.clone(),
            outputs: RwLock::new(Vec::new()),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

pub struct WriterOperator {
    basic: BasicOperator,
    output_ids: Vec<String>,
    outputs: RwLock<Vec<OperatorRef>>,
}

impl WriterOperator {
    #[must_use]
    pub fn basic(&self) -> &BasicOperator {
        &self.basic
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.basic.id()
    }

    #[must_use]
    pub fn output_ids(&self) -> Vec<String> {
        self.output_ids.clone()
    }

    #[must_use]
    pub fn outputs(&self) -> Vec<OperatorRef> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves every configured output id. Unknown ids and targets that do
    /// not process entries are configuration errors.
    pub fn set_outputs(&self, operators: &[OperatorRef]) -> Result<(), ConfigError> {
        let mut resolved = Vec::with_capacity(self.output_ids.len());
        for output in &self.output_ids {
            let operator = find_operator(operators, output).ok_or_else(|| {
                ConfigError::UnknownOutput {
                    id: self.id().to_string(),
                    output: output.clone(),
                }
            })?;
            resolved.push(check_can_process(self.id(), operator)?);
        }
        self.replace_outputs(resolved);
        Ok(())
    }

    fn replace_outputs(&self, resolved: Vec<OperatorRef>) {
        *self
            .outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner) = resolved;
    }

    /// Sends `entry` to every output in order. All outputs but the last get
    /// a copy. A fatal error from any output is returned immediately; other
    /// errors are logged and do not prevent delivery to remaining outputs.
    pub async fn write(&self, entry: Entry) -> Result<(), OperatorError> {
        let outputs = self.outputs();
        let Some((last, rest)) = outputs.split_last() else {
            return Ok(());
        };
        for output in rest {
            self.deliver(output, entry.clone()).await?;
        }
        self.deliver(last, entry).await
    }

    async fn deliver(&self, output: &OperatorRef, entry: Entry) -> Result<(), OperatorError> {
        match output.process(entry).await {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(
                    operator_id = %self.id(),
                    output = %output.id(),
                    "Failed to deliver entry: {e}"
                );
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

fn find_operator<'a>(operators: &'a [OperatorRef], id: &str) -> Option<&'a OperatorRef> {
    operators.iter().find(|operator| operator.id() == id)
}

fn check_can_process(id: &str, operator: &OperatorRef) -> Result<OperatorRef, ConfigError> {
    if !operator.can_process() {
        return Err(ConfigError::OutputCannotProcess {
            id: id.to_string(),
            output: operator.id().to_string(),
        });
    }
    Ok(OperatorRef::clone(operator))
}

/// Config shared by inputs: wiring plus static labels stamped onto every
/// entry the input creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(flatten)]
    pub writer: WriterConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource: BTreeMap<String, String>,
}

impl InputConfig {
    pub fn build(&self, basic: BasicOperator) -> InputOperator {
        InputOperator {
            writer: self.writer.build(basic),
            attributes: self.attributes.clone(),
            resource: self.resource.clone(),
            fatal: OnceLock::new(),
        }
    }
}

pub struct InputOperator {
    writer: WriterOperator,
    attributes: BTreeMap<String, String>,
    resource: BTreeMap<String, String>,
    fatal: OnceLock<FatalSink>,
}

impl InputOperator {
    #[must_use]
    pub fn writer(&self) -> &WriterOperator {
        &self.writer
    }

    #[must_use]
    pub fn basic(&self) -> &BasicOperator {
        self.writer.basic()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.writer.id()
    }

    /// Like [`WriterOperator::set_outputs`], except unknown ids only produce
    /// a warning: an input with no outputs is a degraded but valid pipeline.
    pub fn set_outputs(&self, operators: &[OperatorRef]) -> Result<(), ConfigError> {
        let mut resolved = Vec::new();
        for output in &self.writer.output_ids {
            match find_operator(operators, output) {
                Some(operator) => resolved.push(check_can_process(self.id(), operator)?),
                None => warn!(
                    operator_id = %self.id(),
                    "Output '{output}' does not exist, entries will not be sent to it"
                ),
            }
        }
        self.writer.replace_outputs(resolved);
        Ok(())
    }

    pub fn set_fatal_sink(&self, sink: FatalSink) {
        if self.fatal.set(sink).is_err() {
            warn!(operator_id = %self.id(), "Fatal error sink already set");
        }
    }

    /// Creates an entry with `body`, stamped with the configured static
    /// attributes and resource.
    #[must_use]
    pub fn new_entry(&self, body: Value) -> Entry {
        let mut entry = Entry::new();
        entry.body = Some(body);
        for (key, value) in &self.attributes {
            entry.add_attribute(key.clone(), value.clone());
        }
        for (key, value) in &self.resource {
            entry.add_resource_key(key.clone(), value.clone());
        }
        entry
    }

    /// Sends an entry downstream. Returns false when a fatal error occurred;
    /// the error has then been reported and the caller should stop reading.
    pub async fn write(&self, entry: Entry) -> bool {
        match self.writer.write(entry).await {
            Ok(()) => true,
            Err(e) => {
                error!(operator_id = %self.id(), "Fatal error while processing entry: {e}");
                match self.fatal.get() {
                    Some(sink) => sink.report(e),
                    None => warn!(operator_id = %self.id(), "No fatal error sink installed"),
                }
                false
            }
        }
    }
}

/// What a transformer does with an entry it failed to process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Log and forward the entry unchanged.
    #[default]
    Send,
    /// Log and discard the entry.
    Drop,
    /// Escalate to the pipeline owner.
    Fatal,
    /// Log and forward the entry to the named operator.
    Route(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformerConfig {
    #[serde(flatten)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub on_error: OnError,
}

impl TransformerConfig {
    pub fn build(&self, basic: BasicOperator) -> TransformerOperator {
        TransformerOperator {
            writer: self.writer.build(basic),
            on_error: self.on_error.clone(),
            error_output: RwLock::new(None),
        }
    }
}

pub struct TransformerOperator {
    writer: WriterOperator,
    on_error: OnError,
    error_output: RwLock<Option<OperatorRef>>,
}

impl TransformerOperator {
    #[must_use]
    pub fn writer(&self) -> &WriterOperator {
        &self.writer
    }

    #[must_use]
    pub fn basic(&self) -> &BasicOperator {
        self.writer.basic()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.writer.id()
    }

    #[must_use]
    pub fn on_error(&self) -> &OnError {
        &self.on_error
    }

    /// Configured outputs plus the error route, if any.
    #[must_use]
    pub fn output_ids(&self) -> Vec<String> {
        let mut ids = self.writer.output_ids();
        if let OnError::Route(route) = &self.on_error {
            if !ids.contains(route) {
                ids.push(route.clone());
            }
        }
        ids
    }

    #[must_use]
    pub fn outputs(&self) -> Vec<OperatorRef> {
        let mut outputs = self.writer.outputs();
        if let Some(route) = self.error_output() {
            if !outputs.iter().any(|o| o.id() == route.id()) {
                outputs.push(route);
            }
        }
        outputs
    }

    fn error_output(&self) -> Option<OperatorRef> {
        self.error_output
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_outputs(&self, operators: &[OperatorRef]) -> Result<(), ConfigError> {
        self.writer.set_outputs(operators)?;
        if let OnError::Route(route) = &self.on_error {
            let operator =
                find_operator(operators, route).ok_or_else(|| ConfigError::UnknownOutput {
                    id: self.id().to_string(),
                    output: route.clone(),
                })?;
            let operator = check_can_process(self.id(), operator)?;
            *self
                .error_output
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(operator);
        }
        Ok(())
    }

    /// Applies `transform` to `entry`, then forwards it. A transform failure
    /// is handled according to the configured [`OnError`].
    pub async fn process_with<F>(&self, mut entry: Entry, transform: F) -> Result<(), OperatorError>
    where
        F: FnOnce(&mut Entry) -> Result<(), EntryError> + Send,
    {
        match transform(&mut entry) {
            Ok(()) => self.writer.write(entry).await,
            Err(e) => self.handle_error(entry, e).await,
        }
    }

    async fn handle_error(&self, entry: Entry, error: EntryError) -> Result<(), OperatorError> {
        match &self.on_error {
            OnError::Send => {
                warn!(operator_id = %self.id(), "Failed to process entry, sending it on: {error}");
                self.writer.write(entry).await
            }
            OnError::Drop => {
                warn!(operator_id = %self.id(), "Failed to process entry, dropping it: {error}");
                Ok(())
            }
            OnError::Route(route) => {
                warn!(
                    operator_id = %self.id(),
                    "Failed to process entry, routing it to '{route}': {error}"
                );
                match self.error_output() {
                    Some(output) => self.writer.deliver(&output, entry).await,
                    None => Ok(()),
                }
            }
            OnError::Fatal => Err(OperatorError::Fatal {
                id: self.id().to_string(),
                source: error,
            }),
        }
    }
}
