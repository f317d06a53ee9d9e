// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use log_pipeline::input::stdin::StdinConfig;
use log_pipeline::input::tcp::TcpInputConfig;
use log_pipeline::input::tls::TlsServerConfig;
use log_pipeline::output::stdout::StdoutConfig;
use log_pipeline::transformer::retain::RetainConfig;
use log_pipeline::{ConfigError, Field, OperatorConfig, PipelineConfig};

use crate::hostname;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TCP_LISTEN_ADDRESS: &str = ":54525";

/// Reads `LP_LOG_LEVEL`, lowercased. Any `EnvFilter` directive is accepted.
pub fn log_level() -> String {
    env::var("LP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Stdin,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub input: InputKind,
    pub tcp_listen_address: String,
    /// Zero keeps the input's default.
    pub tcp_max_log_size: i64,
    pub tcp_tls_cert_file: Option<PathBuf>,
    pub tcp_tls_key_file: Option<PathBuf>,
    pub tcp_add_attributes: bool,
    /// A retain stage is only added when this is not empty.
    pub retain_fields: Vec<Field>,
    pub hostname: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<AgentConfig, ConfigError> {
        let input = match env::var("LP_INPUT")
            .map(|val| val.to_lowercase())
            .as_deref()
        {
            Err(_) | Ok("stdin") => InputKind::Stdin,
            Ok("tcp") => InputKind::Tcp,
            Ok(other) => {
                return Err(ConfigError::InvalidParameter {
                    name: "LP_INPUT",
                    reason: format!("expected 'stdin' or 'tcp', got '{other}'"),
                })
            }
        };

        let tcp_max_log_size = match env::var("LP_TCP_MAX_LOG_SIZE") {
            Ok(val) => val
                .trim()
                .parse::<i64>()
                .map_err(|e| ConfigError::InvalidParameter {
                    name: "LP_TCP_MAX_LOG_SIZE",
                    reason: e.to_string(),
                })?,
            Err(_) => 0,
        };

        let retain_fields = env::var("LP_RETAIN_FIELDS")
            .map(|val| parse_fields(&val))
            .unwrap_or(Ok(Vec::new()))?;

        let config = AgentConfig {
            input,
            tcp_listen_address: env::var("LP_TCP_LISTEN_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_TCP_LISTEN_ADDRESS.to_string()),
            tcp_max_log_size,
            tcp_tls_cert_file: env::var("LP_TCP_TLS_CERT_FILE").ok().map(PathBuf::from),
            tcp_tls_key_file: env::var("LP_TCP_TLS_KEY_FILE").ok().map(PathBuf::from),
            tcp_add_attributes: env::var("LP_TCP_ADD_ATTRIBUTES")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(false),
            retain_fields,
            hostname: hostname::resolve(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that only make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.tcp_tls_cert_file, &self.tcp_tls_key_file) {
            (Some(_), None) => Err(ConfigError::MissingParameter("LP_TCP_TLS_KEY_FILE")),
            (None, Some(_)) => Err(ConfigError::MissingParameter("LP_TCP_TLS_CERT_FILE")),
            _ if self.tcp_max_log_size < 0 => Err(ConfigError::InvalidParameter {
                name: "LP_TCP_MAX_LOG_SIZE",
                reason: format!("must not be negative, got {}", self.tcp_max_log_size),
            }),
            _ => Ok(()),
        }
    }

    fn tls(&self) -> Option<TlsServerConfig> {
        match (&self.tcp_tls_cert_file, &self.tcp_tls_key_file) {
            (Some(cert), Some(key)) => Some(TlsServerConfig::new(cert, key)),
            _ => None,
        }
    }

    /// `input -> [retain] -> stdout`, stamping `host.name` on the resource.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut resource = BTreeMap::new();
        resource.insert("host.name".to_string(), self.hostname.clone());

        let mut operators: Vec<OperatorConfig> = Vec::with_capacity(3);
        match self.input {
            InputKind::Stdin => {
                let mut stdin = StdinConfig::default();
                stdin.input.resource = resource;
                operators.push(stdin.into());
            }
            InputKind::Tcp => {
                let mut tcp = TcpInputConfig::new(&self.tcp_listen_address);
                tcp.input.resource = resource;
                tcp.max_log_size = self.tcp_max_log_size;
                tcp.tls = self.tls();
                tcp.add_attributes = self.tcp_add_attributes;
                operators.push(tcp.into());
            }
        }
        if !self.retain_fields.is_empty() {
            operators.push(RetainConfig::new(self.retain_fields.clone()).into());
        }
        operators.push(StdoutConfig::default().into());

        PipelineConfig { operators }
    }
}

/// Comma separated field expressions, e.g. `body.message,attributes['net.peer.ip']`.
fn parse_fields(value: &str) -> Result<Vec<Field>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            field.parse().map_err(|e: log_pipeline::FieldError| {
                ConfigError::InvalidParameter {
                    name: "LP_RETAIN_FIELDS",
                    reason: e.to_string(),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 8] = [
        "LP_INPUT",
        "LP_TCP_LISTEN_ADDRESS",
        "LP_TCP_MAX_LOG_SIZE",
        "LP_TCP_TLS_CERT_FILE",
        "LP_TCP_TLS_KEY_FILE",
        "LP_TCP_ADD_ATTRIBUTES",
        "LP_RETAIN_FIELDS",
        "LP_HOSTNAME",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn operator_types(config: &PipelineConfig) -> Vec<&str> {
        config
            .operators
            .iter()
            .map(|op| op.0.operator_type())
            .collect()
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        env::set_var("LP_HOSTNAME", "edge-01");
        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.input, InputKind::Stdin);
        assert_eq!(config.tcp_listen_address, ":54525");
        assert_eq!(config.tcp_max_log_size, 0);
        assert!(!config.tcp_add_attributes);
        assert!(config.retain_fields.is_empty());
        assert_eq!(config.hostname, "edge-01");
        assert_eq!(operator_types(&config.pipeline_config()), vec!["stdin", "stdout"]);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_tcp_with_retain() {
        clear_env();
        env::set_var("LP_INPUT", "TCP");
        env::set_var("LP_TCP_LISTEN_ADDRESS", "127.0.0.1:0");
        env::set_var("LP_TCP_MAX_LOG_SIZE", "65536");
        env::set_var("LP_TCP_ADD_ATTRIBUTES", "true");
        env::set_var("LP_RETAIN_FIELDS", "body, attributes['net.peer.ip'] ,");
        env::set_var("LP_HOSTNAME", "edge-01");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.input, InputKind::Tcp);
        assert_eq!(config.tcp_max_log_size, 65536);
        assert!(config.tcp_add_attributes);
        assert_eq!(
            config.retain_fields,
            vec![Field::body(Vec::<String>::new()), Field::attribute(["net.peer.ip"])]
        );

        let pipeline_config = config.pipeline_config();
        assert_eq!(
            operator_types(&pipeline_config),
            vec!["tcp_input", "retain", "stdout"]
        );
        let pipeline = pipeline_config.build().unwrap();
        assert_eq!(
            pipeline.operator("tcp_input").unwrap().output_ids(),
            vec!["retain"]
        );
        assert_eq!(
            pipeline.operator("retain").unwrap().output_ids(),
            vec!["stdout"]
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values() {
        clear_env();
        env::set_var("LP_INPUT", "kafka");
        assert!(matches!(
            AgentConfig::from_env(),
            Err(ConfigError::InvalidParameter { name: "LP_INPUT", .. })
        ));

        clear_env();
        env::set_var("LP_TCP_MAX_LOG_SIZE", "lots");
        assert!(matches!(
            AgentConfig::from_env(),
            Err(ConfigError::InvalidParameter {
                name: "LP_TCP_MAX_LOG_SIZE",
                ..
            })
        ));

        clear_env();
        env::set_var("LP_TCP_MAX_LOG_SIZE", "-1");
        assert!(matches!(
            AgentConfig::from_env(),
            Err(ConfigError::InvalidParameter {
                name: "LP_TCP_MAX_LOG_SIZE",
                ..
            })
        ));

        clear_env();
        env::set_var("LP_RETAIN_FIELDS", "body.ok,nowhere.x");
        assert!(matches!(
            AgentConfig::from_env(),
            Err(ConfigError::InvalidParameter {
                name: "LP_RETAIN_FIELDS",
                ..
            })
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_tls_files_must_be_paired() {
        clear_env();
        env::set_var("LP_TCP_TLS_CERT_FILE", "/etc/lp/server.crt");
        assert!(matches!(
            AgentConfig::from_env(),
            Err(ConfigError::MissingParameter("LP_TCP_TLS_KEY_FILE"))
        ));

        env::set_var("LP_TCP_TLS_KEY_FILE", "/etc/lp/server.key");
        let config = AgentConfig::from_env().unwrap();
        assert_eq!(
            config.tls(),
            Some(TlsServerConfig::new(
                "/etc/lp/server.crt",
                "/etc/lp/server.key"
            ))
        );
        clear_env();
    }
}
