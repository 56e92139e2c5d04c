/// Execution state store
///
/// Holds the current run, the bounded log window and the bounded in-memory run
/// history. Reads are lock-free snapshot loads (ArcSwap); writes go through a
/// single writer lock and always publish a whole new snapshot, so an observer never
/// sees a half-applied update.
///
/// The store is also the control surface: `pause`/`resume`/`stop` flip the run
/// status here and notify the driving engine through a watch channel.

use crate::config::StoreConfig;
use crate::error::Rejected;
use crate::state::{
    BoundedBuffer, ExecutionEvent, ExecutionState, ExecutionStatus, LogEntry, LogLevel,
    NodeExecutionState, NodeStatus, Progress, RunStatus,
};
use arc_swap::ArcSwap;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};

/// What the driving engine should currently be doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

#[derive(Clone)]
struct StoreSnapshot {
    /// Most recent run, active or finished
    current: Option<Arc<ExecutionState>>,
    /// Whether `current` has been moved to history and frozen
    archived: bool,
    logs: Arc<BoundedBuffer<LogEntry>>,
    history: Arc<BoundedBuffer<Arc<ExecutionState>>>,
}

pub struct ExecutionStore {
    snapshot: ArcSwap<StoreSnapshot>,
    writer: Mutex<()>,
    control: watch::Sender<ControlSignal>,
    events: broadcast::Sender<ExecutionEvent>,
}

impl ExecutionStore {
    pub fn new(config: StoreConfig) -> Self {
        let (control, _) = watch::channel(ControlSignal::Run);
        let (events, _) = broadcast::channel(256);
        Self {
            snapshot: ArcSwap::from_pointee(StoreSnapshot {
                current: None,
                archived: false,
                logs: Arc::new(BoundedBuffer::new(config.log_capacity)),
                history: Arc::new(BoundedBuffer::new(config.history_capacity)),
            }),
            writer: Mutex::new(()),
            control,
            events,
        }
    }

    /// Apply a mutation under the writer lock and publish the result
    ///
    /// A rejected mutation publishes nothing.
    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut StoreSnapshot) -> Result<R, Rejected>,
    ) -> Result<R, Rejected> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = StoreSnapshot::clone(&self.snapshot.load());
        let result = apply(&mut next)?;
        self.snapshot.store(Arc::new(next));
        Ok(result)
    }

    /// Mutate the current, not yet archived run
    fn mutate_run<R>(
        &self,
        apply: impl FnOnce(&mut ExecutionState) -> Result<R, Rejected>,
    ) -> Result<R, Rejected> {
        self.mutate(|snapshot| {
            let archived = snapshot.archived;
            let run = snapshot.current.as_mut().ok_or(Rejected::NoActiveRun)?;
            if archived {
                return Err(Rejected::Archived(run.id.clone()));
            }
            apply(Arc::make_mut(run))
        })
    }

    fn emit(&self, event: ExecutionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ---- run lifecycle ----

    /// Begin a new run for `graph_id`
    ///
    /// Rejected while another run is active, or while a finished run is still
    /// attached to its engine. A finished run that was never archived is moved to
    /// history first. Logs of the previous run are cleared.
    pub fn start_execution(&self, graph_id: &str) -> Result<Arc<ExecutionState>, Rejected> {
        let run = self.mutate(|snapshot| {
            if let Some(current) = &snapshot.current {
                // A finished run is still owned by its engine until archived
                let draining = !snapshot.archived && self.control.receiver_count() > 0;
                if current.status.is_active() || draining {
                    return Err(Rejected::RunActive(current.id.clone()));
                }
                if !snapshot.archived {
                    Arc::make_mut(&mut snapshot.history).push(Arc::clone(current));
                }
            }

            let mut run = ExecutionState::new(graph_id);
            run.status = RunStatus::Running;
            let run = Arc::new(run);

            snapshot.current = Some(Arc::clone(&run));
            snapshot.archived = false;
            Arc::make_mut(&mut snapshot.logs).clear();
            Ok(run)
        })?;

        self.control.send_replace(ControlSignal::Run);
        tracing::info!(run_id = %run.id, "▶️ Started run for graph '{}'", graph_id);
        self.add_log(LogLevel::Info, format!("Execution started for graph '{}'", graph_id), None);
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.id.clone(),
            graph_id: graph_id.to_string(),
        });
        Ok(run)
    }

    /// Stop dispatching new nodes; idempotent while paused
    pub fn pause(&self) -> Result<(), Rejected> {
        let (run_id, changed) = self.mutate_run(|run| match run.status {
            RunStatus::Paused => Ok((run.id.clone(), false)),
            RunStatus::Running => {
                run.status = RunStatus::Paused;
                Ok((run.id.clone(), true))
            }
            status => Err(Rejected::InvalidTransition { action: "pause", status }),
        })?;

        if changed {
            self.control.send_replace(ControlSignal::Pause);
            self.add_log(LogLevel::Info, "Execution paused", None);
            self.emit(ExecutionEvent::RunPaused { run_id });
        }
        Ok(())
    }

    /// Re-enter dispatch from the frozen state; idempotent while running
    pub fn resume(&self) -> Result<(), Rejected> {
        let (run_id, changed) = self.mutate_run(|run| match run.status {
            RunStatus::Running => Ok((run.id.clone(), false)),
            RunStatus::Paused => {
                run.status = RunStatus::Running;
                Ok((run.id.clone(), true))
            }
            status => Err(Rejected::InvalidTransition { action: "resume", status }),
        })?;

        if changed {
            self.control.send_replace(ControlSignal::Run);
            self.add_log(LogLevel::Info, "Execution resumed", None);
            self.emit(ExecutionEvent::RunResumed { run_id });
        }
        Ok(())
    }

    /// Abort the active run
    ///
    /// The run becomes `failed` with `aborted` set and no error message. Without a
    /// driving engine listening the run is archived right away; otherwise the
    /// engine archives it once in-flight nodes have observed the cancellation.
    pub fn stop(&self) -> Result<(), Rejected> {
        let run_id = self.mutate_run(|run| {
            if run.status.is_terminal() {
                return Err(Rejected::InvalidTransition {
                    action: "stop",
                    status: run.status,
                });
            }
            run.status = RunStatus::Failed;
            run.aborted = true;
            run.end_time = Some(Utc::now());
            Ok(run.id.clone())
        })?;

        self.control.send_replace(ControlSignal::Stop);
        self.add_log(LogLevel::Warn, "Execution stopped by user", None);
        self.emit(ExecutionEvent::RunAborted { run_id });

        if self.control.receiver_count() == 0 {
            self.archive()?;
        }
        Ok(())
    }

    /// Natural completion, invoked by the engine
    pub fn complete(&self) -> Result<(), Rejected> {
        let run_id = self.mutate_run(|run| match run.status {
            RunStatus::Running | RunStatus::Paused => {
                run.status = RunStatus::Completed;
                run.end_time = Some(Utc::now());
                run.recalculate_progress();
                if run.total_nodes == 0 {
                    run.progress = 100.0;
                }
                Ok(run.id.clone())
            }
            status => Err(Rejected::InvalidTransition { action: "complete", status }),
        })?;

        self.add_log(LogLevel::Info, "Execution completed", None);
        self.emit(ExecutionEvent::RunCompleted { run_id });
        Ok(())
    }

    /// Terminal failure, invoked by the engine once a node exhausted its retries
    pub fn fail(&self, error: impl Into<String>) -> Result<(), Rejected> {
        let error = error.into();
        let run_id = self.mutate_run(|run| {
            if run.status.is_terminal() {
                return Err(Rejected::InvalidTransition {
                    action: "fail",
                    status: run.status,
                });
            }
            run.status = RunStatus::Failed;
            run.end_time = Some(Utc::now());
            run.error = Some(error.clone());
            Ok(run.id.clone())
        })?;

        self.add_log(LogLevel::Error, format!("Execution failed: {}", error), None);
        self.emit(ExecutionEvent::RunFailed {
            run_id,
            error: Some(error),
        });
        Ok(())
    }

    /// Freeze a finished run and move it to history; idempotent
    pub fn archive(&self) -> Result<Arc<ExecutionState>, Rejected> {
        self.mutate(|snapshot| {
            let current = snapshot.current.clone().ok_or(Rejected::NoActiveRun)?;
            if snapshot.archived {
                return Ok(current);
            }
            if current.status.is_active() {
                return Err(Rejected::InvalidTransition {
                    action: "archive",
                    status: current.status,
                });
            }

            Arc::make_mut(&mut snapshot.history).push(Arc::clone(&current));
            snapshot.archived = true;
            tracing::debug!(run_id = %current.id, "🗄️ Archived run ({})", current.status);
            Ok(current)
        })
    }

    // ---- node level ----

    /// Apply `update` to a node's state, creating the state on first touch
    pub fn update_node_state(
        &self,
        node_id: &str,
        update: impl FnOnce(&mut NodeExecutionState),
    ) -> Result<NodeExecutionState, Rejected> {
        self.mutate_run(|run| {
            let node = run
                .node_states
                .entry(node_id.to_string())
                .or_insert_with(|| NodeExecutionState::new(node_id));
            update(node);
            let node = node.clone();
            run.recalculate_progress();
            Ok(node)
        })
    }

    pub fn mark_node_running(
        &self,
        node_id: &str,
        inputs: BTreeMap<String, Value>,
    ) -> Result<(), Rejected> {
        let state = self.update_node_state(node_id, |node| {
            node.status = NodeStatus::Running;
            node.inputs = inputs;
            node.start_time = Some(Utc::now());
            node.end_time = None;
            node.duration_ms = None;
            node.error = None;
        })?;

        self.emit(ExecutionEvent::NodeStarted {
            run_id: self.current_run_id(),
            node_id: state.node_id,
        });
        Ok(())
    }

    /// Record a failed attempt that is about to be retried
    pub fn record_node_retry(&self, node_id: &str, attempt: u32, error: &str) -> Result<(), Rejected> {
        self.update_node_state(node_id, |node| {
            node.retry_count = attempt;
            node.error = Some(error.to_string());
        })?;

        self.add_log(
            LogLevel::Warn,
            format!("Attempt {} failed: {}; retrying", attempt, error),
            Some(node_id),
        );
        self.emit(ExecutionEvent::NodeRetrying {
            run_id: self.current_run_id(),
            node_id: node_id.to_string(),
            attempt,
            error: error.to_string(),
        });
        Ok(())
    }

    /// Node finished successfully; progress is recalculated
    pub fn record_node_output(
        &self,
        node_id: &str,
        outputs: BTreeMap<String, Value>,
    ) -> Result<(), Rejected> {
        let state = self.update_node_state(node_id, |node| {
            node.outputs = outputs;
            node.error = None;
            node.finish(NodeStatus::Completed);
        })?;

        let run_id = self.current_run_id();
        let progress = self.progress();
        self.add_log(LogLevel::Info, "Node completed", Some(node_id));
        self.emit(ExecutionEvent::NodeCompleted {
            run_id: run_id.clone(),
            node_id: node_id.to_string(),
            duration_ms: state.duration_ms,
        });
        self.emit(ExecutionEvent::ProgressUpdated {
            run_id,
            progress: progress.percent,
            completed_nodes: progress.completed_nodes,
            total_nodes: progress.total_nodes,
        });
        Ok(())
    }

    /// Node failed for good
    pub fn record_node_error(&self, node_id: &str, error: impl Into<String>) -> Result<(), Rejected> {
        let error = error.into();
        self.update_node_state(node_id, |node| {
            node.error = Some(error.clone());
            node.finish(NodeStatus::Failed);
        })?;

        self.add_log(LogLevel::Error, format!("Node failed: {}", error), Some(node_id));
        self.emit(ExecutionEvent::NodeFailed {
            run_id: self.current_run_id(),
            node_id: node_id.to_string(),
            error,
        });
        Ok(())
    }

    /// Set the run's node counters and recompute the percentage
    pub fn update_progress(&self, completed_nodes: usize, total_nodes: usize) -> Result<(), Rejected> {
        let (run_id, progress) = self.mutate_run(|run| {
            run.total_nodes = total_nodes;
            run.completed_nodes = completed_nodes.min(total_nodes);
            run.progress = if total_nodes == 0 {
                0.0
            } else {
                run.completed_nodes as f64 / total_nodes as f64 * 100.0
            };
            Ok((run.id.clone(), run.progress))
        })?;

        self.emit(ExecutionEvent::ProgressUpdated {
            run_id,
            progress,
            completed_nodes: completed_nodes.min(total_nodes),
            total_nodes,
        });
        Ok(())
    }

    // ---- logs ----

    /// Append a log entry to the bounded window, mirrored to tracing
    pub fn add_log(&self, level: LogLevel, message: impl Into<String>, node_id: Option<&str>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        };

        let run_id = self.current_run_id();
        let node = entry.node_id.as_deref().unwrap_or("-");
        match level {
            LogLevel::Info => tracing::info!(run_id = %run_id, node_id = %node, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(run_id = %run_id, node_id = %node, "{}", entry.message),
            LogLevel::Error => tracing::error!(run_id = %run_id, node_id = %node, "{}", entry.message),
        }

        let _ = self.mutate(|snapshot| {
            Arc::make_mut(&mut snapshot.logs).push(entry);
            Ok(())
        });
    }

    pub fn clear_logs(&self) {
        let _ = self.mutate(|snapshot| {
            Arc::make_mut(&mut snapshot.logs).clear();
            Ok(())
        });
    }

    /// Oldest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.snapshot.load().logs.to_vec()
    }

    // ---- history ----

    /// Insert a finished run into the in-memory history
    pub fn add_to_history(&self, state: ExecutionState) {
        let _ = self.mutate(|snapshot| {
            Arc::make_mut(&mut snapshot.history).push(Arc::new(state));
            Ok(())
        });
    }

    pub fn clear_history(&self) {
        let _ = self.mutate(|snapshot| {
            Arc::make_mut(&mut snapshot.history).clear();
            Ok(())
        });
    }

    /// Archived runs, most recent first, optionally filtered by graph
    pub fn history(&self, graph_id: Option<&str>) -> Vec<Arc<ExecutionState>> {
        self.snapshot
            .load()
            .history
            .iter()
            .rev()
            .filter(|run| graph_id.map_or(true, |id| run.graph_id == id))
            .cloned()
            .collect()
    }

    // ---- queries ----

    /// The most recent run, active or finished
    pub fn current(&self) -> Option<Arc<ExecutionState>> {
        self.snapshot.load().current.clone()
    }

    pub fn is_archived(&self) -> bool {
        self.snapshot.load().archived
    }

    pub fn node_state(&self, node_id: &str) -> Option<NodeExecutionState> {
        self.snapshot
            .load()
            .current
            .as_ref()
            .and_then(|run| run.node_states.get(node_id).cloned())
    }

    /// `idle` until the first run starts
    pub fn execution_status(&self) -> ExecutionStatus {
        self.snapshot
            .load()
            .current
            .as_ref()
            .map_or(ExecutionStatus::Idle, |run| run.execution_status())
    }

    pub fn progress(&self) -> Progress {
        match &self.snapshot.load().current {
            Some(run) => Progress {
                percent: run.progress,
                total_nodes: run.total_nodes,
                completed_nodes: run.completed_nodes,
            },
            None => Progress {
                percent: 0.0,
                total_nodes: 0,
                completed_nodes: 0,
            },
        }
    }

    fn current_run_id(&self) -> String {
        self.snapshot
            .load()
            .current
            .as_ref()
            .map(|run| run.id.clone())
            .unwrap_or_default()
    }

    // ---- channels ----

    /// Control channel consumed by the engine driving the current run
    pub fn subscribe_control(&self) -> watch::Receiver<ControlSignal> {
        self.control.subscribe()
    }

    pub fn control_signal(&self) -> ControlSignal {
        *self.control.borrow()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl std::fmt::Debug for ExecutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("ExecutionStore")
            .field("current", &snapshot.current.as_ref().map(|run| &run.id))
            .field("archived", &snapshot.archived)
            .field("logs", &snapshot.logs.len())
            .field("history", &snapshot.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ExecutionStore {
        ExecutionStore::new(StoreConfig {
            log_capacity: 5,
            history_capacity: 2,
        })
    }

    fn outputs(value: Value) -> BTreeMap<String, Value> {
        BTreeMap::from([("output".to_string(), value)])
    }

    #[test]
    fn one_active_run_per_store() {
        let store = store();
        let run = store.start_execution("g").unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(
            store.start_execution("g").unwrap_err(),
            Rejected::RunActive(run.id.clone())
        );

        store.complete().unwrap();
        let next = store.start_execution("g").unwrap();
        assert_ne!(next.id, run.id);
        // the unarchived finished run went to history
        assert_eq!(store.history(Some("g"))[0].id, run.id);
    }

    #[test]
    fn pause_is_idempotent() {
        let store = store();
        store.start_execution("g").unwrap();

        store.pause().unwrap();
        let once = store.current().unwrap();
        store.pause().unwrap();
        let twice = store.current().unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.status, RunStatus::Paused);
        assert_eq!(store.control_signal(), ControlSignal::Pause);

        store.resume().unwrap();
        store.resume().unwrap();
        assert_eq!(store.current().unwrap().status, RunStatus::Running);
        assert_eq!(store.control_signal(), ControlSignal::Run);
    }

    #[test]
    fn lifecycle_conditions_are_rejections() {
        let store = store();
        assert_eq!(store.pause().unwrap_err(), Rejected::NoActiveRun);
        assert_eq!(store.stop().unwrap_err(), Rejected::NoActiveRun);
        assert_eq!(store.execution_status(), ExecutionStatus::Idle);

        store.start_execution("g").unwrap();
        store.complete().unwrap();
        assert_eq!(
            store.resume().unwrap_err(),
            Rejected::InvalidTransition {
                action: "resume",
                status: RunStatus::Completed
            }
        );
        assert!(store.archive().is_ok());
    }

    #[test]
    fn stop_without_engine_archives_immediately() {
        let store = store();
        store.start_execution("g").unwrap();
        store.record_node_output("a", outputs(json!(1))).unwrap();

        store.stop().unwrap();
        assert!(store.is_archived());
        assert_eq!(store.execution_status(), ExecutionStatus::Aborted);

        let run = store.current().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.is_none());
        assert_eq!(run.node_states["a"].outputs["output"], json!(1));

        // archived runs are read-only
        assert!(matches!(
            store.record_node_error("a", "late"),
            Err(Rejected::Archived(_))
        ));
    }

    #[test]
    fn stop_with_engine_waits_for_archive() {
        let store = store();
        let control = store.subscribe_control();
        store.start_execution("g").unwrap();

        store.stop().unwrap();
        assert!(!store.is_archived());
        assert_eq!(*control.borrow(), ControlSignal::Stop);

        store.record_node_error("b", "execution cancelled").unwrap();
        store.archive().unwrap();
        store.archive().unwrap();
        assert_eq!(store.history(None).len(), 1);
    }

    #[test]
    fn node_states_are_created_lazily_and_drive_progress() {
        let store = store();
        store.start_execution("g").unwrap();
        store.update_progress(0, 4).unwrap();
        assert!(store.node_state("a").is_none());

        store.mark_node_running("a", BTreeMap::new()).unwrap();
        assert_eq!(store.node_state("a").unwrap().status, NodeStatus::Running);

        store.record_node_output("a", outputs(json!("x"))).unwrap();
        store.record_node_retry("b", 1, "flaky").unwrap();
        store.record_node_error("b", "gave up").unwrap();

        let b = store.node_state("b").unwrap();
        assert_eq!(b.status, NodeStatus::Failed);
        assert_eq!(b.retry_count, 1);
        assert_eq!(b.error.as_deref(), Some("gave up"));

        let progress = store.progress();
        assert_eq!(progress.completed_nodes, 1);
        assert_eq!(progress.percent, 25.0);
    }

    #[test]
    fn logs_and_history_are_bounded() {
        let store = store();
        for i in 0..8 {
            store.add_log(LogLevel::Info, format!("line {}", i), None);
        }
        let logs = store.logs();
        assert_eq!(logs.len(), 5);
        assert_eq!(logs[0].message, "line 3");

        for graph in ["a", "b", "a"] {
            store.start_execution(graph).unwrap();
            store.fail("boom").unwrap();
            store.archive().unwrap();
        }
        let history = store.history(None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].graph_id, "a");
        assert_eq!(store.history(Some("b")).len(), 1);

        store.clear_history();
        assert!(store.history(None).is_empty());
    }

    #[test]
    fn start_clears_previous_logs() {
        let store = store();
        store.add_log(LogLevel::Warn, "stale", Some("n"));
        store.start_execution("g").unwrap();
        assert!(store.logs().iter().all(|entry| entry.message != "stale"));
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let store = store();
        let mut events = store.subscribe_events();
        let run = store.start_execution("g").unwrap();
        store.pause().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ExecutionEvent::RunStarted {
                run_id: run.id.clone(),
                graph_id: "g".to_string()
            }
        );
        assert_eq!(events.recv().await.unwrap(), ExecutionEvent::RunPaused { run_id: run.id.clone() });
    }

    #[test]
    fn every_event_carries_its_run_id() {
        let store = store();
        let mut events = store.subscribe_events();
        let run = store.start_execution("g").unwrap();
        store.mark_node_running("n", BTreeMap::new()).unwrap();
        store.record_node_output("n", outputs(json!(1))).unwrap();
        store.complete().unwrap();

        let mut seen = 0;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.run_id(), run.id);
            seen += 1;
        }
        assert!(seen >= 4, "only {} events", seen);
    }

    #[test]
    fn restored_runs_join_the_bounded_history() {
        let store = store();
        for graph in ["x", "y", "z"] {
            let mut run = ExecutionState::new(graph);
            run.status = RunStatus::Completed;
            store.add_to_history(run);
        }

        let history = store.history(None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].graph_id, "z");
        assert_eq!(history[1].graph_id, "y");
        assert!(store.current().is_none());
    }
}
