// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by entries, operators and pipelines.

use std::io;

use crate::entry::{Field, FieldRoot};

/// Errors raised while addressing or mutating an entry through a [`Field`].
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("invalid field '{input}': {reason}")]
    Parse { input: String, reason: &'static str },

    #[error("{0} must be set to a map")]
    NotAMap(FieldRoot),
}

/// Errors detected while decoding, building or wiring operators.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("unsupported operator type '{0}'")]
    UnsupportedType(String),

    #[error("duplicate operator id '{0}'")]
    DuplicateId(String),

    #[error("operator '{id}' references unknown output '{output}'")]
    UnknownOutput { id: String, output: String },

    #[error("operator '{id}' cannot send entries to '{output}', which does not process entries")]
    OutputCannotProcess { id: String, output: String },

    #[error("pipeline contains a cycle involving operator '{0}'")]
    Cycle(String),

    #[error("failed to load TLS settings: {0}")]
    Tls(String),

    #[error("failed to decode operator config: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised while processing a single entry.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("field '{0}' does not exist")]
    FieldNotFound(Field),

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Errors returned by operator lifecycle and processing calls.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to listen on '{address}': {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat stdin: {0}")]
    Stdin(#[source] io::Error),

    #[error("operator '{0}' is already started")]
    AlreadyStarted(String),

    #[error("operator '{0}' does not process entries")]
    CannotProcess(String),

    #[error("checkpoint store failure: {0}")]
    Persist(String),

    #[error("fatal error in operator '{id}': {source}")]
    Fatal {
        id: String,
        #[source]
        source: EntryError,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl OperatorError {
    /// Returns true for errors that must stop the pipeline.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, OperatorError::Fatal { .. })
    }
}

/// Errors returned by [`crate::pipeline::Pipeline`] operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start operator '{id}': {source}")]
    Start {
        id: String,
        #[source]
        source: OperatorError,
    },

    #[error("pipeline already started")]
    AlreadyStarted,
}
