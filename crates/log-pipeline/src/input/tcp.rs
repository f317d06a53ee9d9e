// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-oriented TCP listener, optionally wrapped in TLS.
//!
//! One task accepts connections and one task per connection reads lines.
//! Every line becomes an entry whose body is the line text, without its
//! `\n` or `\r\n` terminator. Bytes that are not UTF-8 are replaced. Entries from one connection are forwarded in
//! the order they were read; connections are independent of each other.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use super::tls::TlsServerConfig;
use super::{line_codec, line_text};
use crate::entry::Entry;
use crate::errors::{ConfigError, OperatorError};
use crate::operator::helper::{BasicConfig, InputConfig, InputOperator};
use crate::operator::{Builder, FatalSink, Operator, OperatorRef};
use crate::persister::Persister;
use crate::resolver::{CachingResolver, HostResolver};

pub const OPERATOR_TYPE: &str = "tcp_input";

/// Line length limit applied when `max_log_size` is zero.
pub const DEFAULT_MAX_LOG_SIZE: usize = 1024 * 1024;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpInputConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
    #[serde(flatten)]
    pub input: InputConfig,
    /// `host:port`. An empty host listens on all IPv4 interfaces and port 0
    /// requests an ephemeral port.
    #[serde(default)]
    pub listen_address: String,
    /// Maximum line length in bytes. Zero selects [`DEFAULT_MAX_LOG_SIZE`].
    #[serde(default)]
    pub max_log_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsServerConfig>,
    /// Adds `net.*` attributes describing both ends of the connection.
    #[serde(default)]
    pub add_attributes: bool,
}

impl TcpInputConfig {
    pub fn new(listen_address: impl Into<String>) -> Self {
        TcpInputConfig {
            basic: BasicConfig::new(OPERATOR_TYPE),
            input: InputConfig::default(),
            listen_address: listen_address.into(),
            max_log_size: 0,
            tls: None,
            add_attributes: false,
        }
    }

    pub fn build_tcp(&self) -> Result<Arc<TcpInput>, ConfigError> {
        self.build_with_resolver(Arc::new(CachingResolver::new()))
    }

    pub fn build_with_resolver(
        &self,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Arc<TcpInput>, ConfigError> {
        let input = self.input.build(self.basic.build()?);
        let address = normalize_address(&self.listen_address)?;
        let max_log_size = match self.max_log_size {
            0 => DEFAULT_MAX_LOG_SIZE,
            size if size < 0 => {
                return Err(ConfigError::InvalidParameter {
                    name: "max_log_size",
                    reason: format!("must not be negative, got {size}"),
                })
            }
            size => usize::try_from(size).map_err(|e| ConfigError::InvalidParameter {
                name: "max_log_size",
                reason: e.to_string(),
            })?,
        };

        Ok(Arc::new(TcpInput {
            address,
            tls: self.tls.clone(),
            connections: Arc::new(Connections {
                input,
                max_log_size,
                add_attributes: self.add_attributes,
                resolver,
            }),
            running: Mutex::new(None),
        }))
    }
}

impl Builder for TcpInputConfig {
    fn id(&self) -> &str {
        self.basic.id()
    }

    fn operator_type(&self) -> &str {
        &self.basic.operator_type
    }

    fn set_default_output(&mut self, output: &str) {
        self.input.writer.set_default_output(output);
    }

    fn build(&self) -> Result<OperatorRef, ConfigError> {
        Ok(self.build_tcp()?)
    }
}

/// Validates `host:port` and fills in the wildcard host for `:port`.
fn normalize_address(address: &str) -> Result<String, ConfigError> {
    if address.is_empty() {
        return Err(ConfigError::MissingParameter("listen_address"));
    }
    let invalid = |reason: String| ConfigError::InvalidParameter {
        name: "listen_address",
        reason,
    };
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid(format!("'{address}' is missing a port")))?;
    let port: u16 = port
        .parse()
        .map_err(|e| invalid(format!("invalid port in '{address}': {e}")))?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok(format!("{host}:{port}"))
}

pub struct TcpInput {
    address: String,
    tls: Option<TlsServerConfig>,
    connections: Arc<Connections>,
    running: Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TcpInput {
    /// The bound address while the operator is running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    #[must_use]
    pub fn resolver(&self) -> Arc<dyn HostResolver> {
        Arc::clone(&self.connections.resolver)
    }

    async fn bind(&self) -> Result<TcpListener, OperatorError> {
        let bind_error = |source| OperatorError::Bind {
            address: self.address.clone(),
            source,
        };
        let addr = tokio::net::lookup_host(&self.address)
            .await
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| {
                bind_error(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;
        TcpListener::bind(addr).await.map_err(bind_error)
    }
}

#[async_trait]
impl Operator for TcpInput {
    fn id(&self) -> &str {
        self.connections.input.id()
    }

    fn operator_type(&self) -> &str {
        self.connections.input.basic().operator_type()
    }

    fn can_output(&self) -> bool {
        true
    }

    fn can_process(&self) -> bool {
        false
    }

    fn output_ids(&self) -> Vec<String> {
        self.connections.input.writer().output_ids()
    }

    fn outputs(&self) -> Vec<OperatorRef> {
        self.connections.input.writer().outputs()
    }

    fn set_outputs(&self, operators: &[OperatorRef]) -> Result<(), ConfigError> {
        self.connections.input.set_outputs(operators)
    }

    fn set_fatal_sink(&self, sink: FatalSink) {
        self.connections.input.set_fatal_sink(sink);
    }

    async fn start(&self, _persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(OperatorError::AlreadyStarted(self.id().to_string()));
        }

        let acceptor = match &self.tls {
            Some(tls) => Some(TlsAcceptor::from(tls.load()?)),
            None => None,
        };
        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        info!(operator_id = %self.id(), "Listening for logs on {local_addr}");

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let span = self.connections.input.basic().span().clone();
        tracker.spawn(
            accept_loop(
                Arc::clone(&self.connections),
                listener,
                acceptor,
                cancel.clone(),
                tracker.clone(),
            )
            .instrument(span),
        );

        *running = Some(Running {
            local_addr,
            cancel,
            tracker,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        running.cancel.cancel();
        running.tracker.close();
        running.tracker.wait().await;
        debug!(operator_id = %self.id(), "Stopped listening on {}", running.local_addr);
        Ok(())
    }

    async fn process(&self, _entry: Entry) -> Result<(), OperatorError> {
        Err(OperatorError::CannotProcess(self.id().to_string()))
    }
}

async fn accept_loop(
    connections: Arc<Connections>,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    debug!("Failed to accept connection: {e}");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(ACCEPT_RETRY_DELAY) => continue,
                    }
                }
            },
        };
        debug!("Accepted connection from {peer}");
        tracker.spawn(
            Arc::clone(&connections)
                .handle(stream, acceptor.clone(), cancel.clone())
                .in_current_span(),
        );
    }
    debug!("Stopped accepting connections");
}

/// State shared by every connection task.
struct Connections {
    input: InputOperator,
    max_log_size: usize,
    add_attributes: bool,
    resolver: Arc<dyn HostResolver>,
}

impl Connections {
    async fn handle(
        self: Arc<Self>,
        stream: TcpStream,
        acceptor: Option<TlsAcceptor>,
        cancel: CancellationToken,
    ) {
        let attributes = if self.add_attributes {
            match (stream.local_addr(), stream.peer_addr()) {
                (Ok(local), Ok(peer)) => tokio::select! {
                    () = cancel.cancelled() => return,
                    attributes = self.net_attributes(local, peer) => Some(attributes),
                },
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to read connection addresses: {e}");
                    None
                }
            }
        } else {
            None
        };

        match acceptor {
            None => self.read_lines(stream, attributes, &cancel).await,
            Some(acceptor) => {
                let handshake = tokio::select! {
                    () = cancel.cancelled() => return,
                    handshake = acceptor.accept(stream) => handshake,
                };
                match handshake {
                    Ok(tls_stream) => self.read_lines(tls_stream, attributes, &cancel).await,
                    Err(e) => warn!("TLS handshake failed: {e}"),
                }
            }
        }
    }

    async fn read_lines<S>(
        &self,
        stream: S,
        attributes: Option<BTreeMap<&'static str, String>>,
        cancel: &CancellationToken,
    ) where
        S: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(stream, line_codec(self.max_log_size));
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = lines.next() => next,
            };
            let line = match next {
                None => break,
                Some(Ok(line)) => line_text(&line),
                Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                    warn!(
                        "Discarding line longer than the maximum log size of {} bytes",
                        self.max_log_size
                    );
                    continue;
                }
                Some(Err(AnyDelimiterCodecError::Io(e))) => {
                    debug!("Connection read failed: {e}");
                    break;
                }
            };

            let mut entry = self.input.new_entry(Value::String(line));
            if let Some(attributes) = &attributes {
                for (key, value) in attributes {
                    entry.add_attribute(*key, value.as_str());
                }
            }
            if !self.input.write(entry).await {
                break;
            }
        }
        debug!("Connection closed");
    }

    /// `net.host.*` describes this end of the connection, `net.peer.*` the
    /// client.
    async fn net_attributes(
        &self,
        local: SocketAddr,
        peer: SocketAddr,
    ) -> BTreeMap<&'static str, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert("net.transport", "IP.TCP".to_string());
        attributes.insert("net.host.ip", local.ip().to_string());
        attributes.insert("net.host.port", local.port().to_string());
        attributes.insert("net.host.name", self.resolver.host_from_ip(local.ip()).await);
        attributes.insert("net.peer.ip", peer.ip().to_string());
        attributes.insert("net.peer.port", peer.port().to_string());
        attributes.insert("net.peer.name", self.resolver.host_from_ip(peer.ip()).await);
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(":0").unwrap(), "0.0.0.0:0");
        assert_eq!(normalize_address("127.0.0.1:54525").unwrap(), "127.0.0.1:54525");
        assert_eq!(normalize_address("[::1]:8080").unwrap(), "[::1]:8080");
        assert!(matches!(
            normalize_address(""),
            Err(ConfigError::MissingParameter("listen_address"))
        ));
        assert!(normalize_address("localhost").is_err());
        assert!(normalize_address("localhost:http").is_err());
        assert!(normalize_address(":65536").is_err());
    }

    #[test]
    fn test_build_max_log_size() {
        let mut config = TcpInputConfig::new("127.0.0.1:0");
        let op = config.build_tcp().unwrap();
        assert_eq!(op.connections.max_log_size, DEFAULT_MAX_LOG_SIZE);

        config.max_log_size = 65536;
        let op = config.build_tcp().unwrap();
        assert_eq!(op.connections.max_log_size, 65536);

        config.max_log_size = -1;
        assert!(matches!(
            config.build_tcp(),
            Err(ConfigError::InvalidParameter {
                name: "max_log_size",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_tls_files_fail_start() {
        let mut config = TcpInputConfig::new("127.0.0.1:0");
        config.tls = Some(TlsServerConfig::new("/missing.crt", "/missing.key"));
        let op = config.build_tcp().unwrap();
        assert!(matches!(
            op.start(Arc::new(crate::persister::MemoryPersister::new())).await,
            Err(OperatorError::Config(ConfigError::Tls(_)))
        ));
        assert!(op.local_addr().await.is_none());
    }

    #[test]
    fn test_decode_config() {
        let config: TcpInputConfig = serde_json::from_value(json!({
            "type": "tcp_input",
            "listen_address": ":54525",
            "max_log_size": 65536,
            "add_attributes": true,
            "output": "retain",
            "resource": {"service.name": "edge"}
        }))
        .unwrap();
        assert_eq!(config.listen_address, ":54525");
        assert_eq!(config.max_log_size, 65536);
        assert!(config.add_attributes);
        assert_eq!(config.input.writer.output, vec!["retain"]);
        assert_eq!(config.input.resource["service.name"], "edge");
        assert!(config.tls.is_none());
    }

    #[tokio::test]
    async fn test_process_is_rejected() {
        let op = TcpInputConfig::new(":0").build_tcp().unwrap();
        assert!(!op.can_process());
        assert!(matches!(
            op.process(Entry::new()).await,
            Err(OperatorError::CannotProcess(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let op = TcpInputConfig::new(":0").build_tcp().unwrap();
        op.stop().await.unwrap();
        op.stop().await.unwrap();
        assert!(op.local_addr().await.is_none());
    }
}
