/// Petgraph-based DAG execution engine
///
/// Compiles a graph against the handler registry, starts a run in the execution
/// store and drives it on a background task: ready nodes are dispatched as their
/// predecessors complete, up to the configured concurrency, while pause, resume
/// and stop requests arrive through the store's control channel.

use crate::config::{EngineConfig, FailurePolicy};
use crate::error::{EngineError, GraphError, Rejected};
use crate::graph::{compile_graph, CompileOptions, CompiledGraph, Graph};
use crate::handlers::HandlerRegistry;
use crate::runtime::executor::{NodeExecutor, NodeOutcome};
use crate::runtime::scheduler::{ReadySet, Slot};
use crate::state::{
    ControlSignal, ExecutionState, ExecutionStore, HistoryRecord, HistoryStorage, NodeStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Orchestrates runs of compiled graphs
///
/// One engine drives at most one run at a time, the limit being enforced by its
/// execution store.
pub struct ExecutionEngine {
    registry: Arc<HandlerRegistry>,
    store: Arc<ExecutionStore>,
    config: EngineConfig,
    /// Where finished runs are persisted, if anywhere
    history: Option<Arc<dyn HistoryStorage>>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<HandlerRegistry>, store: Arc<ExecutionStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            config,
            history: None,
        }
    }

    /// Persist every finished run to `storage`
    pub fn with_history_storage(mut self, storage: Arc<dyn HistoryStorage>) -> Self {
        self.history = Some(storage);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a graph without running it
    pub fn compile(&self, graph: Graph) -> Result<CompiledGraph, GraphError> {
        compile_graph(
            graph,
            &self.registry,
            CompileOptions {
                strict_ports: self.config.strict_ports,
            },
        )
    }

    /// Compile a graph and start running it in the background
    ///
    /// Graph errors are returned before any run is created, so no handler is ever
    /// invoked for an invalid graph. Must be called from within a tokio runtime.
    pub fn start(&self, graph: Graph) -> Result<RunHandle, EngineError> {
        let compiled = self.compile(graph)?;
        self.start_compiled(compiled)
    }

    /// Start a run of an already compiled graph
    pub fn start_compiled(&self, graph: CompiledGraph) -> Result<RunHandle, EngineError> {
        let run = self.store.start_execution(graph.id())?;
        let control = self.store.subscribe_control();
        if let Err(rejected) = self.store.update_progress(0, graph.len()) {
            tracing::warn!(run_id = %run.id, "⚠️ Could not set node count: {}", rejected);
        }

        tracing::info!(
            run_id = %run.id,
            "🚀 Starting run of '{}' ({} nodes, policy {})",
            graph.id(),
            graph.len(),
            self.config.failure_policy
        );

        let cancel = CancellationToken::new();
        let executor = NodeExecutor::new(
            Arc::clone(&self.store),
            run.id.clone(),
            graph.id(),
            cancel.clone(),
            &self.config,
        );

        let driver = RunDriver {
            run_id: run.id.clone(),
            graph,
            store: Arc::clone(&self.store),
            executor: Arc::new(executor),
            policy: self.config.failure_policy,
            max_concurrency: self.config.max_concurrency.max(1),
            control,
            cancel,
            history: self.history.clone(),
        };

        Ok(RunHandle {
            run_id: run.id.clone(),
            handle: tokio::spawn(driver.drive()),
        })
    }

    /// Run a graph to its end and return the archived final state
    pub async fn run(&self, graph: Graph) -> Result<Arc<ExecutionState>, EngineError> {
        self.start(graph)?.wait().await
    }

    pub fn pause(&self) -> Result<(), Rejected> {
        self.store.pause()
    }

    pub fn resume(&self) -> Result<(), Rejected> {
        self.store.resume()
    }

    pub fn stop(&self) -> Result<(), Rejected> {
        self.store.stop()
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("config", &self.config)
            .field("history", &self.history.is_some())
            .finish()
    }
}

/// Handle to a run driven in the background
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    handle: JoinHandle<Result<Arc<ExecutionState>, EngineError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end and return its archived state
    pub async fn wait(self) -> Result<Arc<ExecutionState>, EngineError> {
        self.handle
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?
    }
}

/// Why the drive loop woke up
enum Wake {
    Joined(Option<Result<(usize, NodeOutcome), JoinError>>),
    Control(bool),
}

/// Owns one run from start to archive
struct RunDriver {
    run_id: String,
    graph: CompiledGraph,
    store: Arc<ExecutionStore>,
    executor: Arc<NodeExecutor>,
    policy: FailurePolicy,
    max_concurrency: usize,
    control: watch::Receiver<ControlSignal>,
    cancel: CancellationToken,
    history: Option<Arc<dyn HistoryStorage>>,
}

impl RunDriver {
    async fn drive(mut self) -> Result<Arc<ExecutionState>, EngineError> {
        let started = Instant::now();
        let mut ready = ReadySet::new(self.graph.schedule());
        let mut in_flight: JoinSet<(usize, NodeOutcome)> = JoinSet::new();
        let mut paused_nodes: HashSet<usize> = HashSet::new();
        let mut first_failure: Option<String> = None;
        let mut halted = false;
        let mut aborted = false;

        loop {
            let signal = *self.control.borrow_and_update();

            match signal {
                ControlSignal::Stop => {
                    aborted = true;
                    break;
                }
                ControlSignal::Run if !halted => {
                    for index in ready.ready() {
                        if in_flight.len() >= self.max_concurrency {
                            break;
                        }
                        paused_nodes.remove(&index);
                        self.dispatch(index, &mut ready, &mut in_flight);
                    }
                    // paused nodes left over by the concurrency limit wait as pending
                    for index in paused_nodes.drain() {
                        self.mark_waiting(index, NodeStatus::Pending);
                    }
                }
                ControlSignal::Pause if !halted => {
                    for index in ready.ready() {
                        if paused_nodes.insert(index) {
                            self.mark_waiting(index, NodeStatus::Paused);
                        }
                    }
                }
                _ => {}
            }

            if in_flight.is_empty() {
                if halted || ready.is_settled() {
                    break;
                }
                if signal == ControlSignal::Pause {
                    tracing::debug!(run_id = %self.run_id, "⏸️ Run paused, waiting for resume");
                    if self.control.changed().await.is_err() {
                        aborted = true;
                        break;
                    }
                    continue;
                }
                // Nothing running and nothing dispatchable
                break;
            }

            let wake = tokio::select! {
                joined = in_flight.join_next() => Wake::Joined(joined),
                changed = self.control.changed() => Wake::Control(changed.is_ok()),
            };

            match wake {
                Wake::Joined(Some(Ok((index, outcome)))) => {
                    if let Some(error) = self.settle(index, outcome, &mut ready) {
                        first_failure.get_or_insert(error);
                        if self.policy == FailurePolicy::Cascade {
                            halted = true;
                        }
                    }
                }
                Wake::Joined(Some(Err(e))) => {
                    tracing::error!(run_id = %self.run_id, "❌ Node task failed: {}", e);
                    first_failure.get_or_insert(format!("node task failed: {}", e));
                    halted = true;
                }
                Wake::Joined(None) => {}
                Wake::Control(true) => {}
                Wake::Control(false) => {
                    aborted = true;
                    break;
                }
            }
        }

        if aborted {
            self.cancel.cancel();
            let draining = in_flight.len();
            while in_flight.join_next().await.is_some() {}
            tracing::warn!(
                run_id = %self.run_id,
                "🛑 Run of '{}' aborted after {:?} ({} in-flight nodes cancelled)",
                self.graph.id(),
                started.elapsed(),
                draining
            );
        } else {
            let completed = ready.count(Slot::Completed);
            let result = match first_failure {
                Some(error) => self.store.fail(error),
                None if completed == self.graph.len() => self.store.complete(),
                None => self.store.fail(format!(
                    "run ended with {} of {} nodes completed",
                    completed,
                    self.graph.len()
                )),
            };
            if let Err(rejected) = result {
                tracing::warn!(run_id = %self.run_id, "⚠️ Final transition rejected: {}", rejected);
            }
        }

        let state = self.store.archive()?;
        tracing::info!(
            run_id = %self.run_id,
            "🎉 Run of '{}' finished as {:?} in {:?}",
            self.graph.id(),
            state.execution_status(),
            started.elapsed()
        );

        if let Some(storage) = &self.history {
            if let Err(e) = storage.save(&HistoryRecord::from(state.as_ref())).await {
                tracing::error!(run_id = %self.run_id, "❌ Failed to persist run history: {}", e);
            }
        }

        Ok(state)
    }

    fn dispatch(&self, index: usize, ready: &mut ReadySet, in_flight: &mut JoinSet<(usize, NodeOutcome)>) {
        ready.mark_running(index);

        let inputs = self
            .store
            .current()
            .map(|state| self.graph.resolve_inputs(index, &state))
            .unwrap_or_default();
        let node = Arc::clone(self.graph.node(index));
        let handler = Arc::clone(self.graph.handler(index));
        let executor = Arc::clone(&self.executor);

        tracing::debug!(run_id = %self.run_id, "📍 Dispatching node '{}'", node.id);
        in_flight.spawn(async move {
            let outcome = executor.execute_node(node, handler, inputs).await;
            (index, outcome)
        });
    }

    /// Apply a node outcome; returns the run-level error message on failure
    fn settle(&self, index: usize, outcome: NodeOutcome, ready: &mut ReadySet) -> Option<String> {
        let node_id = &self.graph.node(index).id;
        match outcome {
            NodeOutcome::Completed => {
                ready.mark_completed(index);
                None
            }
            NodeOutcome::Failed(error) => {
                for skipped in ready.mark_failed(index) {
                    let skipped_id = &self.graph.node(skipped).id;
                    tracing::debug!(run_id = %self.run_id, "⏭️ Skipping '{}' (upstream '{}' failed)", skipped_id, node_id);
                    if let Err(rejected) = self
                        .store
                        .record_node_error(skipped_id, format!("upstream node '{}' failed", node_id))
                    {
                        tracing::warn!(run_id = %self.run_id, "⚠️ State update rejected: {}", rejected);
                    }
                }
                Some(format!("node '{}' failed: {}", node_id, error))
            }
        }
    }

    /// Set the status of a ready node that is not being dispatched
    fn mark_waiting(&self, index: usize, status: NodeStatus) {
        let node_id = &self.graph.node(index).id;
        let result = self.store.update_node_state(node_id, |node| {
            node.status = status;
        });
        if let Err(rejected) = result {
            tracing::warn!(run_id = %self.run_id, "⚠️ State update rejected: {}", rejected);
        }
    }
}
