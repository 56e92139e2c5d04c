/// End-to-end run scenarios against isolated registries and stores

use async_trait::async_trait;
use nodeflow::config::{EngineConfig, FailurePolicy, StoreConfig};
use nodeflow::graph::{CompiledNode, Edge, NodeSettings, Port, PortDataType};
use nodeflow::state::{ExecutionStatus, HistoryStatus, HistoryStorage, NodeStatus, SqliteHistoryStorage};
use nodeflow::{
    EngineError, ExecutionEngine, ExecutionStore, Graph, GraphError, HandlerContext, HandlerError,
    HandlerRegistry, Node, NodeHandler, NodeInputs, NodeOutput, RunStatus,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Node ids in invocation order, shared by the test handlers
#[derive(Default, Clone)]
struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    fn record(&self, node_id: &str) {
        self.0.lock().unwrap().push(node_id.to_string());
    }

    fn list(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Forwards its input, or publishes its own id when it has none
struct Echo(Calls);

#[async_trait]
impl NodeHandler for Echo {
    fn node_type(&self) -> &str {
        "echo"
    }

    fn category(&self) -> &str {
        "test"
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &NodeInputs,
        _ctx: &HandlerContext,
    ) -> Result<NodeOutput, HandlerError> {
        self.0.record(&node.id);
        let data = inputs.get("input").cloned().unwrap_or_else(|| json!(node.id));
        Ok(NodeOutput::new(data).with_port("id", json!(node.id)))
    }

    fn default_config(&self) -> Value {
        json!({})
    }
}

struct AlwaysFails(Calls);

#[async_trait]
impl NodeHandler for AlwaysFails {
    fn node_type(&self) -> &str {
        "fails"
    }

    fn category(&self) -> &str {
        "test"
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        _inputs: &NodeInputs,
        _ctx: &HandlerContext,
    ) -> Result<NodeOutput, HandlerError> {
        self.0.record(&node.id);
        Err(HandlerError::execution("always fails"))
    }

    fn default_config(&self) -> Value {
        json!({})
    }
}

/// Signals `entered`, then blocks until `release` (or cancellation)
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl NodeHandler for Gate {
    fn node_type(&self) -> &str {
        "gate"
    }

    fn category(&self) -> &str {
        "test"
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        _inputs: &NodeInputs,
        _ctx: &HandlerContext,
    ) -> Result<NodeOutput, HandlerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(NodeOutput::new(json!(node.id)))
    }

    fn default_config(&self) -> Value {
        json!({})
    }
}

/// Hangs on the first call only
#[derive(Default)]
struct SlowOnce {
    calls: AtomicU32,
}

#[async_trait]
impl NodeHandler for SlowOnce {
    fn node_type(&self) -> &str {
        "slowOnce"
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
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(NodeOutput::new(json!("eventually")))
    }

    fn default_config(&self) -> Value {
        json!({})
    }
}

/// Publishes everything it received
struct Collect;

#[async_trait]
impl NodeHandler for Collect {
    fn node_type(&self) -> &str {
        "collect"
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
        Ok(NodeOutput::new(json!(inputs)))
    }

    fn default_config(&self) -> Value {
        json!({})
    }

    fn input_ports(&self) -> Vec<Port> {
        vec![
            Port::new("items", PortDataType::Any).multiple(),
            Port::new("label", PortDataType::Any),
        ]
    }
}

struct Harness {
    engine: ExecutionEngine,
    calls: Calls,
    gate: Arc<Gate>,
}

fn harness(config: EngineConfig) -> Harness {
    let calls = Calls::default();
    let gate = Arc::new(Gate::default());

    let registry = HandlerRegistry::new();
    registry.register(Arc::new(Echo(calls.clone())));
    registry.register(Arc::new(AlwaysFails(calls.clone())));
    registry.register(gate.clone());
    registry.register(Arc::new(SlowOnce::default()));
    registry.register(Arc::new(Collect));

    let store = Arc::new(ExecutionStore::new(StoreConfig::default()));
    Harness {
        engine: ExecutionEngine::new(Arc::new(registry), store, config),
        calls,
        gate,
    }
}

fn chain(types: &[(&str, &str)]) -> Graph {
    let mut graph = Graph::new("scenario");
    for (id, node_type) in types {
        graph = graph.with_node(Node::new(*id, *node_type));
    }
    for pair in types.windows(2) {
        graph = graph.connect(pair[0].0, pair[1].0);
    }
    graph
}

/// Poll until `condition` holds, failing the test after a few seconds
async fn wait_until(store: &ExecutionStore, condition: impl Fn(&ExecutionStore) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition(store) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn node_status(store: &ExecutionStore, node_id: &str) -> Option<NodeStatus> {
    store.node_state(node_id).map(|node| node.status)
}

#[tokio::test]
async fn linear_chain_completes() {
    let h = harness(EngineConfig::default());
    let graph = chain(&[("a", "echo"), ("b", "echo"), ("c", "echo")]);

    let state = h.engine.run(graph).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.progress, 100.0);
    assert_eq!(state.completed_nodes, state.total_nodes);
    assert!(state.node_states.values().all(|node| node.status == NodeStatus::Completed));
    assert_eq!(state.node_states["c"].outputs["output"], json!("a"));
    assert_eq!(h.calls.list(), vec!["a", "b", "c"]);
    assert!(h.engine.store().is_archived());
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let h = harness(EngineConfig {
        max_retries: 2,
        ..EngineConfig::default()
    });
    let graph = chain(&[("a", "echo"), ("b", "fails")]);

    let state = h.engine.run(graph).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert!(!state.aborted);
    assert_eq!(state.node_states["a"].status, NodeStatus::Completed);
    let b = &state.node_states["b"];
    assert_eq!(b.status, NodeStatus::Failed);
    assert_eq!(b.retry_count, 2);
    assert_eq!(h.calls.list(), vec!["a", "b", "b", "b"]);
    assert!(state.error.as_deref().unwrap().contains("'b'"));
}

#[tokio::test]
async fn per_node_retry_budget_overrides_the_default() {
    let h = harness(EngineConfig {
        max_retries: 5,
        ..EngineConfig::default()
    });
    let graph = Graph::new("g").with_node(Node::new("b", "fails").with_settings(NodeSettings::retries(0)));

    let state = h.engine.run(graph).await.unwrap();

    assert_eq!(state.node_states["b"].retry_count, 0);
    assert_eq!(h.calls.list(), vec!["b"]);
}

#[tokio::test]
async fn isolated_branch_failure_keeps_independent_outputs() {
    let h = harness(EngineConfig {
        failure_policy: FailurePolicy::IsolateBranch,
        ..EngineConfig::default()
    });
    let graph = Graph::new("g")
        .with_node(Node::new("a", "echo"))
        .with_node(Node::new("b", "echo"))
        .with_node(Node::new("c", "fails"))
        .with_node(Node::new("d", "echo"))
        .connect("a", "b")
        .connect("c", "d");

    let state = h.engine.run(graph).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.node_states["a"].status, NodeStatus::Completed);
    assert_eq!(state.node_states["b"].status, NodeStatus::Completed);
    assert_eq!(state.node_states["b"].outputs["output"], json!("a"));
    assert_eq!(state.node_states["c"].status, NodeStatus::Failed);

    let d = &state.node_states["d"];
    assert_eq!(d.status, NodeStatus::Failed);
    assert_eq!(d.error.as_deref(), Some("upstream node 'c' failed"));
    assert!(!h.calls.list().contains(&"d".to_string()));
}

#[tokio::test]
async fn cascade_stops_dispatching_after_a_failure() {
    let h = harness(EngineConfig {
        failure_policy: FailurePolicy::Cascade,
        max_concurrency: 1,
        ..EngineConfig::default()
    });
    let graph = Graph::new("g")
        .with_node(Node::new("c", "fails"))
        .with_node(Node::new("a", "echo"));

    let state = h.engine.run(graph).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(h.calls.list(), vec!["c"]);
    assert!(state.node("a").is_none());
}

#[tokio::test]
async fn stop_cancels_the_running_node() {
    let h = harness(EngineConfig::default());
    let graph = chain(&[("a", "echo"), ("b", "gate"), ("c", "echo")]);

    let handle = h.engine.start(graph).unwrap();
    h.gate.entered.notified().await;
    h.engine.stop().unwrap();
    let state = handle.wait().await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.aborted);
    assert!(state.error.is_none());
    assert_eq!(state.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(state.node_states["a"].status, NodeStatus::Completed);
    assert_eq!(state.node_states["b"].status, NodeStatus::Failed);
    assert_eq!(state.node_states["b"].error.as_deref(), Some("execution cancelled"));
    assert!(state.node("c").is_none());
    assert!(h.engine.store().is_archived());
}

#[tokio::test]
async fn cyclic_graph_never_invokes_a_handler() {
    let h = harness(EngineConfig::default());
    let graph = chain(&[("a", "echo"), ("b", "echo")]).connect("b", "a");

    let err = h.engine.start(graph).unwrap_err();

    assert!(matches!(err, EngineError::Graph(GraphError::Cycle { ref nodes, .. }) if nodes.len() == 2));
    assert!(h.calls.list().is_empty());
    assert!(h.engine.store().current().is_none());
}

#[tokio::test]
async fn pause_holds_ready_nodes_until_resume() {
    let h = harness(EngineConfig::default());
    let graph = chain(&[("a", "gate"), ("b", "echo"), ("c", "echo")]);
    let store = Arc::clone(h.engine.store());

    let handle = h.engine.start(graph).unwrap();
    h.gate.entered.notified().await;

    h.engine.pause().unwrap();
    h.engine.pause().unwrap();
    h.gate.release.notify_one();

    wait_until(&store, |s| node_status(s, "b") == Some(NodeStatus::Paused)).await;
    assert_eq!(node_status(&store, "a"), Some(NodeStatus::Completed));
    assert_eq!(store.current().unwrap().status, RunStatus::Paused);
    assert!(h.calls.list().is_empty());
    assert!(!handle.is_finished());

    h.engine.resume().unwrap();
    let state = handle.wait().await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(h.calls.list(), vec!["b", "c"]);
    assert_eq!(state.node_states["c"].outputs["output"], json!("a"));
}

#[tokio::test]
async fn resume_returns_undispatched_paused_nodes_to_pending() {
    let h = harness(EngineConfig {
        max_concurrency: 1,
        ..EngineConfig::default()
    });
    let graph = Graph::new("fan-out")
        .with_node(Node::new("a", "gate"))
        .with_node(Node::new("b", "gate"))
        .with_node(Node::new("c", "echo"))
        .connect("a", "b")
        .connect("a", "c");
    let store = Arc::clone(h.engine.store());

    let handle = h.engine.start(graph).unwrap();
    h.gate.entered.notified().await;
    h.engine.pause().unwrap();
    h.gate.release.notify_one();

    wait_until(&store, |s| {
        node_status(s, "b") == Some(NodeStatus::Paused) && node_status(s, "c") == Some(NodeStatus::Paused)
    })
    .await;

    h.engine.resume().unwrap();
    h.gate.entered.notified().await;

    wait_until(&store, |s| node_status(s, "c") == Some(NodeStatus::Pending)).await;
    assert_eq!(node_status(&store, "b"), Some(NodeStatus::Running));
    assert_eq!(store.current().unwrap().status, RunStatus::Running);

    h.gate.release.notify_one();
    let state = handle.wait().await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.node_states["c"].status, NodeStatus::Completed);
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let h = harness(EngineConfig::default());
    let handle = h.engine.start(chain(&[("a", "gate")])).unwrap();
    h.gate.entered.notified().await;

    let err = h.engine.start(chain(&[("x", "echo")])).unwrap_err();
    assert!(matches!(err, EngineError::Rejected(_)));

    h.gate.release.notify_one();
    assert_eq!(handle.wait().await.unwrap().status, RunStatus::Completed);

    // a finished, archived run does not block the next one
    let next = h.engine.run(chain(&[("x", "echo")])).await.unwrap();
    assert_eq!(next.status, RunStatus::Completed);
    assert_eq!(h.engine.store().history(Some("scenario")).len(), 2);
}

#[tokio::test]
async fn timed_out_attempt_is_retried() {
    let h = harness(EngineConfig::default());
    let graph = Graph::new("g").with_node(Node::new("slow", "slowOnce").with_settings(NodeSettings {
        max_retries: Some(1),
        timeout_ms: Some(50),
    }));

    let state = h.engine.run(graph).await.unwrap();

    let slow = &state.node_states["slow"];
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(slow.retry_count, 1);
    assert_eq!(slow.outputs["output"], json!("eventually"));
}

#[tokio::test]
async fn inputs_follow_handles_and_accumulate_on_multiple_ports() {
    let h = harness(EngineConfig::default());
    let graph = Graph::new("g")
        .with_node(Node::new("a", "echo"))
        .with_node(Node::new("b", "echo"))
        .with_node(Node::new("sink", "collect"))
        .with_edge(Edge::new("e1", "a", "sink").with_handles(None, Some("items")))
        .with_edge(Edge::new("e2", "b", "sink").with_handles(None, Some("items")))
        .with_edge(Edge::new("e3", "b", "sink").with_handles(Some("id"), Some("label")));

    let state = h.engine.run(graph).await.unwrap();

    let sink = &state.node_states["sink"];
    assert_eq!(sink.inputs["items"], json!(["a", "b"]));
    assert_eq!(sink.inputs["label"], json!("b"));
    assert_eq!(sink.outputs["output"], json!({ "items": ["a", "b"], "label": "b" }));
}

#[tokio::test]
async fn repeated_runs_produce_the_same_node_states() {
    let h = harness(EngineConfig {
        failure_policy: FailurePolicy::IsolateBranch,
        ..EngineConfig::default()
    });
    let graph = Graph::new("g")
        .with_node(Node::new("a", "echo"))
        .with_node(Node::new("b", "echo"))
        .with_node(Node::new("c", "fails"))
        .connect("a", "b");

    let first = h.engine.run(graph.clone()).await.unwrap();
    let second = h.engine.run(graph).await.unwrap();

    let summary = |state: &nodeflow::ExecutionState| -> Vec<(String, NodeStatus, Option<Value>)> {
        state
            .node_states
            .values()
            .map(|node| (node.node_id.clone(), node.status, node.outputs.get("output").cloned()))
            .collect()
    };
    assert_eq!(summary(&first), summary(&second));
}

#[tokio::test]
async fn finished_runs_are_persisted() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let storage = Arc::new(SqliteHistoryStorage::with_pool(pool, 10).await.unwrap());

    let h = harness(EngineConfig::default());
    let engine = h.engine.with_history_storage(storage.clone());
    let state = engine.run(chain(&[("a", "echo"), ("b", "echo")])).await.unwrap();

    let records = storage.list("scenario", 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, state.id);
    assert_eq!(records[0].status, HistoryStatus::Completed);
    assert_eq!(records[0].progress.completed, 2);
    assert_eq!(records[0].clone().into_state().node_states, state.node_states);
}

proptest! {
    #[test]
    fn cyclic_graphs_are_rejected_before_any_handler_runs(
        n in 1usize..10,
        forward in prop::collection::vec((0usize..10, 0usize..10), 0..20),
        (head, tail) in (0usize..10, 0usize..10),
    ) {
        let h = harness(EngineConfig::default());
        let (head, tail) = (head % n, tail % n);
        let (head, tail) = (head.min(tail), head.max(tail));

        let mut graph = Graph::new("loops");
        for i in 0..n {
            graph = graph.with_node(Node::new(format!("n{}", i), "echo"));
        }
        for (a, b) in forward {
            let (a, b) = (a % n, b % n);
            if a < b {
                graph = graph.connect(&format!("n{}", a), &format!("n{}", b));
            }
        }
        // head ~> tail, then tail -> head
        for i in head..tail {
            graph = graph.connect(&format!("n{}", i), &format!("n{}", i + 1));
        }
        graph = graph.connect(&format!("n{}", tail), &format!("n{}", head));

        let err = h.engine.start(graph).unwrap_err();

        prop_assert!(matches!(err, EngineError::Graph(GraphError::Cycle { .. })), "expected cycle error, got {:?}", err);
        prop_assert!(h.calls.list().is_empty());
        prop_assert!(h.engine.store().current().is_none());
    }
}
