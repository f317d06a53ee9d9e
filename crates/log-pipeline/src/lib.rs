// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! An embeddable log ingestion pipeline.
//!
//! Operators read raw log data, turn each record into an [`Entry`], reshape
//! it and forward it along a directed acyclic graph:
//!
//! - [`input`]: stdin and line-oriented TCP (optionally TLS) sources
//! - [`transformer`]: retain, add and remove
//! - [`output`]: JSON lines to stdout, or drop
//!
//! A [`PipelineConfig`] decodes operator configs through the [`registry`],
//! wires them and orders them; the resulting [`Pipeline`] starts and stops
//! the whole graph.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod entry;
pub mod errors;
pub mod input;
pub mod operator;
pub mod output;
pub mod persister;
pub mod pipeline;
pub mod registry;
pub mod resolver;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod transformer;

pub use entry::{Entry, Field, FieldRoot};
pub use errors::{ConfigError, EntryError, FieldError, OperatorError, PipelineError};
pub use operator::{Builder, Operator, OperatorRef};
pub use persister::{MemoryPersister, Persister};
pub use pipeline::{OperatorConfig, Pipeline, PipelineConfig};
