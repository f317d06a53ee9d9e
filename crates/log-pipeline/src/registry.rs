// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Maps operator type names to config decoders.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::ConfigError;
use crate::input::stdin::StdinConfig;
use crate::input::tcp::TcpInputConfig;
use crate::operator::Builder;
use crate::output::drop::DropConfig;
use crate::output::stdout::StdoutConfig;
use crate::transformer::add::AddConfig;
use crate::transformer::remove::RemoveConfig;
use crate::transformer::retain::RetainConfig;
use crate::{input, output, transformer};

pub type DecodeFn = fn(Value) -> Result<Box<dyn Builder>, ConfigError>;

#[derive(Debug, Default, Clone)]
pub struct Registry {
    decoders: HashMap<String, DecodeFn>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every operator shipped with this crate.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(input::stdin::OPERATOR_TYPE, decode::<StdinConfig>);
        registry.register(input::tcp::OPERATOR_TYPE, decode::<TcpInputConfig>);
        registry.register(transformer::retain::OPERATOR_TYPE, decode::<RetainConfig>);
        registry.register(transformer::add::OPERATOR_TYPE, decode::<AddConfig>);
        registry.register(transformer::remove::OPERATOR_TYPE, decode::<RemoveConfig>);
        registry.register(output::stdout::OPERATOR_TYPE, decode::<StdoutConfig>);
        registry.register(output::drop::OPERATOR_TYPE, decode::<DropConfig>);
        registry
    }

    /// Registers `decoder` for `operator_type`, replacing any previous one.
    pub fn register(&mut self, operator_type: impl Into<String>, decoder: DecodeFn) {
        self.decoders.insert(operator_type.into(), decoder);
    }

    #[must_use]
    pub fn lookup(&self, operator_type: &str) -> Option<DecodeFn> {
        self.decoders.get(operator_type).copied()
    }

    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Decodes a single operator config, dispatching on its `type` key.
    pub fn decode(&self, config: Value) -> Result<Box<dyn Builder>, ConfigError> {
        let operator_type = config
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ConfigError::MissingParameter("type"))?;
        let decoder = self
            .lookup(operator_type)
            .ok_or_else(|| ConfigError::UnsupportedType(operator_type.to_string()))?;
        decoder(config)
    }
}

/// The process-wide registry of built-in operators.
pub fn global() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::with_builtins)
}

fn decode<T>(config: Value) -> Result<Box<dyn Builder>, ConfigError>
where
    T: Builder + DeserializeOwned + 'static,
{
    Ok(Box::new(serde_json::from_value::<T>(config)?))
}
