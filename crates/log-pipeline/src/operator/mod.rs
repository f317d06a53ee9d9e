// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The operator contract.
//!
//! An operator is built from its config without any I/O, wired to its
//! downstream operators, then started and eventually stopped:
//!
//! ```text
//! Builder::build -> set_outputs -> start(persister) -> process* -> stop
//! ```
//!
//! Entries are pushed synchronously: an operator awaits `process` on each of
//! its outputs before returning from its own `process`. Only inputs own
//! background tasks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::entry::Entry;
use crate::errors::{ConfigError, OperatorError};
use crate::persister::Persister;

pub mod helper;

pub type OperatorRef = Arc<dyn Operator>;

#[async_trait]
pub trait Operator: Send + Sync {
    fn id(&self) -> &str;

    fn operator_type(&self) -> &str;

    /// True when the operator sends entries to other operators.
    fn can_output(&self) -> bool;

    /// True when the operator accepts entries through [`Operator::process`].
    fn can_process(&self) -> bool;

    /// Downstream ids as configured, before resolution.
    fn output_ids(&self) -> Vec<String>;

    /// Downstream operators resolved by [`Operator::set_outputs`].
    fn outputs(&self) -> Vec<OperatorRef>;

    /// Resolves the configured output ids against `operators`.
    fn set_outputs(&self, operators: &[OperatorRef]) -> Result<(), ConfigError>;

    /// Installs the channel through which background tasks report fatal
    /// errors. Operators without background tasks ignore it.
    fn set_fatal_sink(&self, _sink: FatalSink) {}

    /// Begins producing or accepting entries. Must return promptly; long
    /// running work belongs in background tasks.
    async fn start(&self, persister: Arc<dyn Persister>) -> Result<(), OperatorError>;

    /// Stops all background work and waits for it to finish. Safe to call on
    /// an operator that never started and safe to call more than once.
    async fn stop(&self) -> Result<(), OperatorError>;

    async fn process(&self, entry: Entry) -> Result<(), OperatorError>;
}

impl fmt::Debug for dyn Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("id", &self.id())
            .field("type", &self.operator_type())
            .finish()
    }
}

/// A decoded operator config, ready to be built.
pub trait Builder: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn operator_type(&self) -> &str;

    /// Sets the output used when none was configured. Operators that do not
    /// output ignore it.
    fn set_default_output(&mut self, _output: &str) {}

    fn build(&self) -> Result<OperatorRef, ConfigError>;
}

/// Reports errors that must stop the whole pipeline to its owner.
#[derive(Debug, Clone)]
pub struct FatalSink {
    tx: mpsc::UnboundedSender<OperatorError>,
}

impl FatalSink {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OperatorError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FatalSink { tx }, rx)
    }

    pub fn report(&self, error: OperatorError) {
        // The receiver is gone once the pipeline owner stopped listening.
        let _ = self.tx.send(error);
    }
}
