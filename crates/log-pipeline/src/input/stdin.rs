// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reads lines from the process standard input.
//!
//! Reading only starts when stdin is a pipe. On a terminal or a regular file
//! the operator logs a warning and stays idle. On unix the pipe is switched to
//! non-blocking mode and polled by the runtime, so `stop` leaves no read
//! running behind it.

use std::fs::File;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn, Instrument};

use super::tcp::DEFAULT_MAX_LOG_SIZE;
use super::{line_codec, line_text};
use crate::entry::Entry;
use crate::errors::{ConfigError, OperatorError};
use crate::operator::helper::{BasicConfig, InputConfig, InputOperator};
use crate::operator::{Builder, FatalSink, Operator, OperatorRef};
use crate::persister::Persister;

pub const OPERATOR_TYPE: &str = "stdin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdinConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
    #[serde(flatten)]
    pub input: InputConfig,
}

impl Default for StdinConfig {
    fn default() -> Self {
        StdinConfig {
            basic: BasicConfig::new(OPERATOR_TYPE),
            input: InputConfig::default(),
        }
    }
}

impl StdinConfig {
    pub fn build_stdin(&self) -> Result<Arc<StdinInput>, ConfigError> {
        self.build_inner(None)
    }

    /// Reads from `source` instead of the process stdin.
    pub fn build_with_source(&self, source: File) -> Result<Arc<StdinInput>, ConfigError> {
        self.build_inner(Some(source))
    }

    fn build_inner(&self, source: Option<File>) -> Result<Arc<StdinInput>, ConfigError> {
        Ok(Arc::new(StdinInput {
            input: Arc::new(self.input.build(self.basic.build()?)),
            source: std::sync::Mutex::new(source),
            running: Mutex::new(None),
        }))
    }
}

impl Builder for StdinConfig {
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
        Ok(self.build_stdin()?)
    }
}

pub struct StdinInput {
    input: Arc<InputOperator>,
    /// `None` reads the process stdin.
    source: std::sync::Mutex<Option<File>>,
    running: Mutex<Option<(CancellationToken, TaskTracker)>>,
}

impl StdinInput {
    fn open_source(&self) -> Result<File, OperatorError> {
        let source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        match source.as_ref() {
            Some(file) => file.try_clone(),
            None => process_stdin(),
        }
        .map_err(OperatorError::Stdin)
    }
}

#[cfg(unix)]
fn process_stdin() -> std::io::Result<File> {
    use std::os::fd::AsFd;
    Ok(File::from(std::io::stdin().as_fd().try_clone_to_owned()?))
}

#[cfg(windows)]
fn process_stdin() -> std::io::Result<File> {
    use std::os::windows::io::AsHandle;
    Ok(File::from(std::io::stdin().as_handle().try_clone_to_owned()?))
}

#[cfg(unix)]
fn is_pipe(file: &File) -> std::io::Result<bool> {
    use std::os::unix::fs::FileTypeExt;
    Ok(file.metadata()?.file_type().is_fifo())
}

#[cfg(not(unix))]
fn is_pipe(file: &File) -> std::io::Result<bool> {
    use std::io::IsTerminal;
    Ok(!file.is_terminal() && !file.metadata()?.is_file())
}

#[cfg(unix)]
fn async_source(file: File) -> std::io::Result<tokio::net::unix::pipe::Receiver> {
    tokio::net::unix::pipe::Receiver::from_file(file)
}

#[cfg(not(unix))]
fn async_source(file: File) -> std::io::Result<tokio::fs::File> {
    Ok(tokio::fs::File::from_std(file))
}

#[async_trait]
impl Operator for StdinInput {
    fn id(&self) -> &str {
        self.input.id()
    }

    fn operator_type(&self) -> &str {
        self.input.basic().operator_type()
    }

    fn can_output(&self) -> bool {
        true
    }

    fn can_process(&self) -> bool {
        false
    }

    fn output_ids(&self) -> Vec<String> {
        self.input.writer().output_ids()
    }

    fn outputs(&self) -> Vec<OperatorRef> {
        self.input.writer().outputs()
    }

    fn set_outputs(&self, operators: &[OperatorRef]) -> Result<(), ConfigError> {
        self.input.set_outputs(operators)
    }

    fn set_fatal_sink(&self, sink: FatalSink) {
        self.input.set_fatal_sink(sink);
    }

    async fn start(&self, _persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(OperatorError::AlreadyStarted(self.id().to_string()));
        }

        let source = self.open_source()?;
        if !is_pipe(&source).map_err(OperatorError::Stdin)? {
            warn!(operator_id = %self.id(), "No data is being written to stdin");
            return Ok(());
        }
        let source = async_source(source).map_err(OperatorError::Stdin)?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let span = self.input.basic().span().clone();
        tracker.spawn(read_lines(Arc::clone(&self.input), source, cancel.clone()).instrument(span));
        *running = Some((cancel, tracker));
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        if let Some((cancel, tracker)) = self.running.lock().await.take() {
            cancel.cancel();
            tracker.close();
            tracker.wait().await;
        }
        Ok(())
    }

    async fn process(&self, _entry: Entry) -> Result<(), OperatorError> {
        Err(OperatorError::CannotProcess(self.id().to_string()))
    }
}

async fn read_lines<S>(input: Arc<InputOperator>, source: S, cancel: CancellationToken)
where
    S: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(source, line_codec(DEFAULT_MAX_LOG_SIZE));
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => {
                if !input.write(input.new_entry(Value::String(line_text(&line)))).await {
                    return;
                }
            }
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                warn!("Discarding line longer than {DEFAULT_MAX_LOG_SIZE} bytes");
            }
            Some(Err(AnyDelimiterCodecError::Io(e))) => {
                error!("Scanning failed: {e}");
                break;
            }
            None => break,
        }
    }
    info!("Stdin has been closed");
}
