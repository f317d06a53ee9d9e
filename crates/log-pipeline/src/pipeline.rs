// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires operators into a directed acyclic graph and drives their lifecycle.
//!
//! Operators are kept in topological order (producers before consumers).
//! Starting walks that order backwards so every consumer is ready before its
//! producers emit anything; stopping walks it forwards so producers go quiet
//! before their consumers shut down.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use crate::errors::{ConfigError, OperatorError, PipelineError};
use crate::operator::{Builder, FatalSink, OperatorRef};
use crate::persister::{Persister, ScopedPersister};
use crate::registry;

/// An operator config decoded through the global registry.
#[derive(Debug)]
pub struct OperatorConfig(pub Box<dyn Builder>);

impl<'de> Deserialize<'de> for OperatorConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        registry::global()
            .decode(raw)
            .map(OperatorConfig)
            .map_err(de::Error::custom)
    }
}

impl<B: Builder + 'static> From<B> for OperatorConfig {
    fn from(builder: B) -> Self {
        OperatorConfig(Box::new(builder))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PipelineConfig {
    pub operators: Vec<OperatorConfig>,
}

impl PipelineConfig {
    /// Builds and wires every operator. An operator without configured
    /// outputs sends to the operator declared after it.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let mut builders: Vec<Box<dyn Builder>> =
            self.operators.into_iter().map(|config| config.0).collect();

        let ids: Vec<String> = builders.iter().map(|b| b.id().to_string()).collect();
        for (builder, next) in builders.iter_mut().zip(ids.iter().skip(1)) {
            builder.set_default_output(next);
        }

        let operators = builders
            .iter()
            .map(|builder| builder.build())
            .collect::<Result<Vec<_>, _>>()?;
        Pipeline::new(operators)
    }
}

pub struct Pipeline {
    operators: Vec<OperatorRef>,
    running: Mutex<Option<Vec<OperatorRef>>>,
    fatal_sink: FatalSink,
    fatal_rx: Mutex<mpsc::UnboundedReceiver<OperatorError>>,
}

impl Pipeline {
    /// Wires already built operators together.
    pub fn new(operators: Vec<OperatorRef>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for operator in &operators {
            if !seen.insert(operator.id()) {
                return Err(ConfigError::DuplicateId(operator.id().to_string()));
            }
        }

        for operator in &operators {
            operator.set_outputs(&operators)?;
        }
        let operators = topological_order(operators)?;

        let (fatal_sink, fatal_rx) = FatalSink::channel();
        for operator in &operators {
            operator.set_fatal_sink(fatal_sink.clone());
        }

        Ok(Pipeline {
            operators,
            running: Mutex::new(None),
            fatal_sink,
            fatal_rx: Mutex::new(fatal_rx),
        })
    }

    /// Operators in topological order.
    #[must_use]
    pub fn operators(&self) -> &[OperatorRef] {
        &self.operators
    }

    #[must_use]
    pub fn operator(&self, id: &str) -> Option<&OperatorRef> {
        self.operators.iter().find(|operator| operator.id() == id)
    }

    /// Starts every operator, consumers first. If one fails, the operators
    /// already started are stopped again.
    pub async fn start(&self, persister: Arc<dyn Persister>) -> Result<(), PipelineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(PipelineError::AlreadyStarted);
        }

        let mut started: Vec<OperatorRef> = Vec::with_capacity(self.operators.len());
        for operator in self.operators.iter().rev() {
            let scoped = Arc::new(ScopedPersister::new(operator.id(), Arc::clone(&persister)));
            debug!(operator_id = %operator.id(), "Starting operator");
            if let Err(source) = operator.start(scoped).await {
                error!(operator_id = %operator.id(), "Failed to start operator: {source}");
                stop_all(started.iter().rev()).await;
                return Err(PipelineError::Start {
                    id: operator.id().to_string(),
                    source,
                });
            }
            started.push(Arc::clone(operator));
        }

        started.reverse();
        *running = Some(started);
        info!("Started pipeline with {} operators", self.operators.len());
        Ok(())
    }

    /// Stops every operator, producers first. Safe to call at any time.
    pub async fn stop(&self) {
        let Some(started) = self.running.lock().await.take() else {
            return;
        };
        stop_all(started.iter()).await;
        info!("Stopped pipeline");
    }

    /// Waits for the next fatal error reported by any operator.
    pub async fn fatal_error(&self) -> Option<OperatorError> {
        self.fatal_rx.lock().await.recv().await
    }

    /// A sink for reporting fatal errors from outside the operator graph.
    #[must_use]
    pub fn fatal_sink(&self) -> FatalSink {
        self.fatal_sink.clone()
    }
}

async fn stop_all<'a>(operators: impl Iterator<Item = &'a OperatorRef>) {
    for operator in operators {
        debug!(operator_id = %operator.id(), "Stopping operator");
        if let Err(e) = operator.stop().await {
            error!(operator_id = %operator.id(), "Failed to stop operator: {e}");
        }
    }
}

/// Orders operators so that every operator comes before its outputs, using
/// Kahn's algorithm. Ties keep declaration order.
fn topological_order(operators: Vec<OperatorRef>) -> Result<Vec<OperatorRef>, ConfigError> {
    let index: HashMap<&str, usize> = operators
        .iter()
        .enumerate()
        .map(|(i, operator)| (operator.id(), i))
        .collect();

    let mut adjacency = vec![Vec::new(); operators.len()];
    let mut in_degree = vec![0usize; operators.len()];
    for (from, operator) in operators.iter().enumerate() {
        for output in operator.outputs() {
            if let Some(&to) = index.get(output.id()) {
                adjacency[from].push(to);
                in_degree[to] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..operators.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(operators.len());
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &next in &adjacency[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != operators.len() {
        let stuck = (0..operators.len())
            .find(|&i| in_degree[i] > 0)
            .map(|i| operators[i].id().to_string())
            .unwrap_or_default();
        return Err(ConfigError::Cycle(stuck));
    }

    Ok(order
        .into_iter()
        .map(|i| Arc::clone(&operators[i]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, Field};
    use crate::errors::EntryError;
    use crate::operator::Operator;
    use crate::persister::MemoryPersister;
    use crate::testutil::FakeOutput;
    use crate::transformer::add::AddConfig;
    use crate::transformer::remove::RemoveConfig;
    use crate::transformer::retain::RetainConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn ids(pipeline: &Pipeline) -> Vec<&str> {
        pipeline.operators().iter().map(|o| o.id()).collect()
    }

    fn decode(config: serde_json::Value) -> Result<Pipeline, ConfigError> {
        let config: PipelineConfig =
            serde_json::from_value(config).map_err(ConfigError::Decode)?;
        config.build()
    }

    #[test]
    fn test_linear_pipeline_defaults_outputs() {
        let pipeline = decode(json!({"operators": [
            {"type": "tcp_input", "listen_address": "127.0.0.1:0"},
            {"type": "retain", "fields": ["body.message"]},
            {"type": "drop_output"}
        ]}))
        .unwrap();
        assert_eq!(ids(&pipeline), vec!["tcp_input", "retain", "drop_output"]);
        assert_eq!(
            pipeline.operator("tcp_input").unwrap().output_ids(),
            vec!["retain"]
        );
        assert_eq!(
            pipeline.operator("retain").unwrap().output_ids(),
            vec!["drop_output"]
        );
    }

    #[test]
    fn test_topological_order_follows_outputs() {
        let pipeline = decode(json!({"operators": [
            {"type": "drop_output", "id": "sink"},
            {"type": "add", "id": "second", "field": "body.b", "value": 2, "output": "sink"},
            {"type": "add", "id": "first", "field": "body.a", "value": 1, "output": "second"},
            {"type": "stdin", "output": "first"}
        ]}))
        .unwrap();
        assert_eq!(ids(&pipeline), vec!["stdin", "first", "second", "sink"]);
    }

    #[test]
    fn test_build_errors() {
        let duplicate = decode(json!({"operators": [
            {"type": "drop_output", "id": "same"},
            {"type": "drop_output", "id": "same"}
        ]}));
        assert!(matches!(duplicate, Err(ConfigError::DuplicateId(id)) if id == "same"));

        let unknown = decode(json!({"operators": [
            {"type": "remove", "field": "body.x", "output": "nowhere"}
        ]}));
        assert!(matches!(unknown, Err(ConfigError::UnknownOutput { .. })));

        let into_input = decode(json!({"operators": [
            {"type": "remove", "field": "body.x", "output": "stdin"},
            {"type": "stdin"}
        ]}));
        assert!(matches!(
            into_input,
            Err(ConfigError::OutputCannotProcess { .. })
        ));

        let cycle = decode(json!({"operators": [
            {"type": "add", "id": "a", "field": "body.a", "value": 1, "output": "b"},
            {"type": "add", "id": "b", "field": "body.b", "value": 1, "output": "a"}
        ]}));
        assert!(matches!(cycle, Err(ConfigError::Cycle(_))));

        let unsupported = serde_json::from_value::<PipelineConfig>(json!({
            "operators": [{"type": "kafka_input"}]
        }));
        assert!(unsupported.is_err());
    }

    #[test]
    fn test_input_with_unknown_output_is_degraded() {
        let pipeline = decode(json!({"operators": [
            {"type": "stdin", "output": "missing"}
        ]}))
        .unwrap();
        assert!(pipeline.operator("stdin").unwrap().outputs().is_empty());
    }

    /// Records lifecycle calls into a shared log and optionally fails start.
    struct Recorder {
        id: String,
        output: Vec<String>,
        fail_start: bool,
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Operator for Recorder {
        fn id(&self) -> &str {
            &self.id
        }
        fn operator_type(&self) -> &str {
            "recorder"
        }
        fn can_output(&self) -> bool {
            !self.output.is_empty()
        }
        fn can_process(&self) -> bool {
            true
        }
        fn output_ids(&self) -> Vec<String> {
            self.output.clone()
        }
        fn outputs(&self) -> Vec<OperatorRef> {
            Vec::new()
        }
        fn set_outputs(&self, _operators: &[OperatorRef]) -> Result<(), ConfigError> {
            Ok(())
        }
        async fn start(&self, persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
            persister.set("started", vec![1]).await?;
            self.log.lock().unwrap().push(format!("start {}", self.id));
            if self.fail_start {
                return Err(OperatorError::Persist("boom".to_string()));
            }
            Ok(())
        }
        async fn stop(&self) -> Result<(), OperatorError> {
            self.log.lock().unwrap().push(format!("stop {}", self.id));
            Ok(())
        }
        async fn process(&self, _entry: Entry) -> Result<(), OperatorError> {
            Ok(())
        }
    }

    fn recorders(
        fail: Option<&str>,
    ) -> (Vec<OperatorRef>, Arc<StdMutex<Vec<String>>>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let operators = ["input", "transform", "output"]
            .into_iter()
            .map(|id| {
                Arc::new(Recorder {
                    id: id.to_string(),
                    output: Vec::new(),
                    fail_start: fail == Some(id),
                    log: Arc::clone(&log),
                }) as OperatorRef
            })
            .collect();
        (operators, log)
    }

    #[tokio::test]
    async fn test_start_and_stop_order() {
        let (operators, log) = recorders(None);
        let pipeline = Pipeline::new(operators).unwrap();
        let persister = Arc::new(MemoryPersister::new());

        pipeline.start(persister.clone()).await.unwrap();
        assert!(matches!(
            pipeline.start(persister.clone()).await,
            Err(PipelineError::AlreadyStarted)
        ));
        pipeline.stop().await;
        pipeline.stop().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start output",
                "start transform",
                "start input",
                "stop input",
                "stop transform",
                "stop output"
            ]
        );
        assert_eq!(
            persister.get("transform.started").await.unwrap(),
            Some(vec![1])
        );
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        let (operators, log) = recorders(Some("transform"));
        let pipeline = Pipeline::new(operators).unwrap();

        let error = pipeline
            .start(Arc::new(MemoryPersister::new()))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Start { ref id, .. } if id == "transform"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start output", "start transform", "stop output"]
        );

        pipeline.stop().await;
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_reach_the_owner() {
        let (output, mut rx) = FakeOutput::new("out");
        let mut remove = RemoveConfig::new(Field::body(["missing"]));
        remove.transformer.on_error = crate::operator::helper::OnError::Fatal;
        remove.transformer.writer.output = vec!["out".to_string()];
        let remove = remove.build_remove().unwrap();

        let pipeline = Pipeline::new(vec![remove as OperatorRef, output as OperatorRef]).unwrap();
        let sink = pipeline.fatal_sink();
        let result = pipeline.operator("remove").unwrap().process(Entry::new()).await;
        let Err(error) = result else {
            panic!("expected a fatal error");
        };
        sink.report(error);

        let fatal = pipeline.fatal_error().await.unwrap();
        assert!(matches!(
            fatal,
            OperatorError::Fatal {
                source: EntryError::FieldNotFound(_),
                ..
            }
        ));
        rx.expect_no_entry().await;
    }

    #[tokio::test]
    async fn test_entries_flow_through_built_pipeline() {
        let (output, mut rx) = FakeOutput::new("out");
        let mut add = AddConfig::new(Field::attribute(["env"]), json!("prod"));
        add.transformer.writer.output = vec!["retain".to_string()];
        let mut retain = RetainConfig::new(vec![Field::body(["keep"])]);
        retain.transformer.writer.output = vec!["out".to_string()];

        let pipeline = Pipeline::new(vec![
            add.build_add().unwrap() as OperatorRef,
            retain.build_retain().unwrap() as OperatorRef,
            output as OperatorRef,
        ])
        .unwrap();

        let mut entry = Entry::new();
        entry.body = Some(json!({"keep": 1, "drop": 2}));
        pipeline.operator("add").unwrap().process(entry).await.unwrap();

        let received = rx.expect_entry().await;
        assert_eq!(received.body, Some(json!({"keep": 1})));
        assert_eq!(received.attributes.unwrap()["env"], json!("prod"));
    }
}
