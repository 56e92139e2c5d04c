/// Node executor
///
/// Runs a single node of a run: invokes its handler with the resolved inputs,
/// applies the timeout and retry policy, honours cancellation, and records every
/// transition in the execution store. Handler panics are caught and reported as
/// execution errors so a misbehaving plugin cannot take the run down with it.

use crate::config::EngineConfig;
use crate::error::{HandlerError, Rejected};
use crate::graph::CompiledNode;
use crate::handlers::{elapsed_ms, HandlerContext, NodeHandler, NodeInputs, NodeOutput};
use crate::state::ExecutionStore;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Final result of running one node, after retries
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Completed,
    Failed(HandlerError),
}

/// Executes the nodes of one run
#[derive(Debug)]
pub struct NodeExecutor {
    store: Arc<ExecutionStore>,
    run_id: String,
    graph_id: String,
    /// Cancelled when the run is stopped
    cancel: CancellationToken,
    max_retries: u32,
    timeout: Option<Duration>,
    backoff: Duration,
}

impl NodeExecutor {
    pub fn new(
        store: Arc<ExecutionStore>,
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        cancel: CancellationToken,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            cancel,
            max_retries: config.max_retries,
            timeout: config.node_timeout(),
            backoff: config.retry_backoff(),
        }
    }

    /// Run a node to completion or final failure
    ///
    /// Retryable errors (execution errors and timeouts) re-invoke the handler up to
    /// the node's retry budget. Cancellation is never retried.
    pub async fn execute_node(
        &self,
        node: Arc<CompiledNode>,
        handler: Arc<dyn NodeHandler>,
        inputs: NodeInputs,
    ) -> NodeOutcome {
        let max_retries = node.settings.max_retries.unwrap_or(self.max_retries);
        let timeout = node
            .settings
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.timeout);

        tracing::info!(run_id = %self.run_id, "🚀 Starting node execution: {} (type: {})", node.id, node.node_type);
        self.track(&node.id, self.store.mark_node_running(&node.id, inputs.clone()));

        let mut attempt = 0;
        loop {
            let ctx = HandlerContext::new(
                self.run_id.clone(),
                self.graph_id.clone(),
                node.id.clone(),
                attempt,
                self.cancel.clone(),
                Some(Arc::clone(&self.store)),
            );
            let started = Instant::now();

            match self.invoke(handler.as_ref(), &node, &inputs, &ctx, timeout).await {
                Ok(mut output) => {
                    if !output.metadata.contains_key("executionTime") {
                        output.metadata.insert("executionTime".to_string(), elapsed_ms(started));
                    }
                    tracing::info!("✅ Node '{}' completed in {:?}", node.id, started.elapsed());
                    let metadata = serde_json::Value::Object(output.metadata.clone());
                    tracing::debug!("📊 Node '{}' metadata: {}", node.id, metadata);

                    self.track(&node.id, self.store.record_node_output(&node.id, output.into_port_map()));
                    return NodeOutcome::Completed;
                }
                Err(error) if error.is_retryable() && attempt < max_retries && !self.cancel.is_cancelled() => {
                    attempt += 1;
                    tracing::warn!(
                        "🔁 Node '{}' attempt {} failed: {}; retry {}/{}",
                        node.id,
                        attempt,
                        error,
                        attempt,
                        max_retries
                    );
                    self.track(&node.id, self.store.record_node_retry(&node.id, attempt, &error.to_string()));

                    if !self.backoff.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(self.backoff) => {}
                            _ = self.cancel.cancelled() => {
                                return self.give_up(&node.id, HandlerError::Cancelled);
                            }
                        }
                    }
                }
                Err(error) => return self.give_up(&node.id, error),
            }
        }
    }

    /// One handler invocation, bounded by the timeout and the run's cancellation
    async fn invoke(
        &self,
        handler: &dyn NodeHandler,
        node: &CompiledNode,
        inputs: &NodeInputs,
        ctx: &HandlerContext,
        timeout: Option<Duration>,
    ) -> Result<NodeOutput, HandlerError> {
        let call = AssertUnwindSafe(handler.execute(node, inputs, ctx)).catch_unwind();

        let guarded = async {
            let caught = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(caught) => caught,
                    Err(_) => Ok(Err(HandlerError::Timeout(limit.as_millis() as u64))),
                },
                None => call.await,
            };
            caught.unwrap_or_else(|_| {
                tracing::error!("💥 Handler '{}' panicked on node '{}'", node.node_type, node.id);
                Err(HandlerError::execution("handler panicked"))
            })
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HandlerError::Cancelled),
            result = guarded => result,
        }
    }

    fn give_up(&self, node_id: &str, error: HandlerError) -> NodeOutcome {
        match &error {
            HandlerError::Cancelled => tracing::warn!("🛑 Node '{}' cancelled", node_id),
            other => tracing::error!("❌ Node '{}' failed: {}", node_id, other),
        }
        self.track(node_id, self.store.record_node_error(node_id, error.to_string()));
        NodeOutcome::Failed(error)
    }

    /// Store updates are rejected once the run has been archived; that only
    /// loses bookkeeping, never the outcome, so it is logged and ignored.
    fn track(&self, node_id: &str, result: Result<(), Rejected>) {
        if let Err(rejected) = result {
            tracing::warn!(run_id = %self.run_id, node_id = %node_id, "⚠️ State update rejected: {}", rejected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeSettings;
    use crate::handlers::NodeConfig;
    use crate::state::NodeStatus;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then echoes its input
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NodeHandler for Flaky {
        fn node_type(&self) -> &str {
            "flaky"
        }

        fn category(&self) -> &str {
            "test"
        }

        async fn execute(
            &self,
            _node: &CompiledNode,
            inputs: &NodeInputs,
            _ctx: &HandlerContext,
        ) -> Result<NodeOutput, HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(HandlerError::execution(format!("failure {}", call)));
            }
            Ok(NodeOutput::new(inputs.get("input").cloned().unwrap_or(Value::Null)))
        }

        fn default_config(&self) -> Value {
            json!({})
        }
    }

    struct Panics;

    #[async_trait]
    impl NodeHandler for Panics {
        fn node_type(&self) -> &str {
            "panics"
        }

        fn category(&self) -> &str {
            "test"
        }

        async fn execute(
            &self,
            _node: &CompiledNode,
            _inputs: &NodeInputs,
            _ctx: &HandlerContext,
        ) -> Result<NodeOutput, HandlerError> {
            panic!("boom")
        }

        fn default_config(&self) -> Value {
            json!({})
        }
    }

    struct Sleeps;

    #[async_trait]
    impl NodeHandler for Sleeps {
        fn node_type(&self) -> &str {
            "sleeps"
        }

        fn category(&self) -> &str {
            "test"
        }

        async fn execute(
            &self,
            _node: &CompiledNode,
            _inputs: &NodeInputs,
            _ctx: &HandlerContext,
        ) -> Result<NodeOutput, HandlerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(NodeOutput::default())
        }

        fn default_config(&self) -> Value {
            json!({})
        }
    }

    fn node(id: &str, settings: NodeSettings) -> Arc<CompiledNode> {
        Arc::new(CompiledNode {
            id: id.to_string(),
            node_type: "test".to_string(),
            config: NodeConfig::Extension(Map::new()),
            data: Map::new(),
            settings,
        })
    }

    fn executor(config: EngineConfig) -> (Arc<ExecutionStore>, NodeExecutor, CancellationToken) {
        let store = Arc::new(ExecutionStore::default());
        let run = store.start_execution("g").unwrap();
        let cancel = CancellationToken::new();
        let executor = NodeExecutor::new(Arc::clone(&store), run.id.clone(), "g", cancel.clone(), &config);
        (store, executor, cancel)
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (store, executor, _) = executor(EngineConfig::default());
        let handler = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let inputs = NodeInputs::from([("input".to_string(), json!(7))]);

        let outcome = executor
            .execute_node(node("a", NodeSettings::retries(3)), handler.clone(), inputs)
            .await;

        assert_eq!(outcome, NodeOutcome::Completed);
        let state = store.node_state("a").unwrap();
        assert_eq!(state.status, NodeStatus::Completed);
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.outputs["output"], json!(7));
        assert_eq!(state.inputs["input"], json!(7));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn completes_with_debug_logging_enabled() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (store, executor, _) = executor(EngineConfig::default());
        let handler = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let inputs = NodeInputs::from([("input".to_string(), json!({ "k": 1 }))]);

        let outcome = executor.execute_node(node("a", NodeSettings::default()), handler, inputs).await;

        assert_eq!(outcome, NodeOutcome::Completed);
        assert_eq!(store.node_state("a").unwrap().outputs["output"], json!({ "k": 1 }));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_node() {
        let config = EngineConfig {
            max_retries: 1,
            ..EngineConfig::default()
        };
        let (store, executor, _) = executor(config);
        let handler = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });

        let outcome = executor
            .execute_node(node("a", NodeSettings::default()), handler.clone(), NodeInputs::new())
            .await;

        assert_eq!(outcome, NodeOutcome::Failed(HandlerError::execution("failure 1")));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let state = store.node_state("a").unwrap();
        assert_eq!(state.status, NodeStatus::Failed);
        assert_eq!(state.retry_count, 1);
    }

    #[tokio::test]
    async fn panics_become_execution_errors() {
        let (store, executor, _) = executor(EngineConfig::default());

        let outcome = executor
            .execute_node(node("a", NodeSettings::default()), Arc::new(Panics), NodeInputs::new())
            .await;

        assert_eq!(outcome, NodeOutcome::Failed(HandlerError::execution("handler panicked")));
        assert_eq!(store.node_state("a").unwrap().status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn timeouts_are_failures() {
        let (store, executor, _) = executor(EngineConfig::default());
        let settings = NodeSettings {
            timeout_ms: Some(20),
            ..NodeSettings::default()
        };

        let outcome = executor
            .execute_node(node("a", settings), Arc::new(Sleeps), NodeInputs::new())
            .await;

        assert_eq!(outcome, NodeOutcome::Failed(HandlerError::Timeout(20)));
        assert_eq!(store.node_state("a").unwrap().error.as_deref(), Some("timed out after 20 ms"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_and_is_not_retried() {
        let config = EngineConfig {
            max_retries: 5,
            ..EngineConfig::default()
        };
        let (store, executor, cancel) = executor(config);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let outcome = executor
            .execute_node(node("a", NodeSettings::default()), Arc::new(Sleeps), NodeInputs::new())
            .await;
        canceller.await.unwrap();

        assert_eq!(outcome, NodeOutcome::Failed(HandlerError::Cancelled));
        let state = store.node_state("a").unwrap();
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.error.as_deref(), Some("execution cancelled"));
    }
}
