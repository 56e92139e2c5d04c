/// Run and node state types
///
/// Snapshots of a run as seen by observers. Every field uses the editor's
/// camelCase JSON shape so states can be served and persisted as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a run
///
/// `pending → running ⇄ paused → completed | failed`. A stopped run is `failed`
/// with [`ExecutionState::aborted`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    /// Pending, running or paused
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running | RunStatus::Paused)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

/// State of a single node, created the first time the node is touched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionState {
    pub node_id: String,
    pub status: NodeStatus,
    /// Resolved values fed into the handler, keyed by input port
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Produced values, keyed by output port
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock milliseconds between start and end
    #[serde(default, rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Re-invocations after the first attempt
    #[serde(default)]
    pub retry_count: u32,
}

impl NodeExecutionState {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            error: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            retry_count: 0,
        }
    }

    /// Stamp the end time and derive the duration from the start time
    pub(crate) fn finish(&mut self, status: NodeStatus) {
        let now = Utc::now();
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = self
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
    }
}

/// One run of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub id: String,
    pub graph_id: String,
    pub status: RunStatus,
    /// Set when the run was stopped by the user; such runs are `failed` without an error
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub node_states: BTreeMap<String, NodeExecutionState>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// 0 to 100
    pub progress: f64,
    pub total_nodes: usize,
    pub completed_nodes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionState {
    /// A fresh pending run with a generated `exec_` id
    pub fn new(graph_id: impl Into<String>) -> Self {
        Self {
            id: format!("exec_{}", uuid::Uuid::new_v4().simple()),
            graph_id: graph_id.into(),
            status: RunStatus::Pending,
            aborted: false,
            node_states: BTreeMap::new(),
            start_time: Utc::now(),
            end_time: None,
            progress: 0.0,
            total_nodes: 0,
            completed_nodes: 0,
            error: None,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeExecutionState> {
        self.node_states.get(node_id)
    }

    pub fn count_nodes(&self, status: NodeStatus) -> usize {
        self.node_states.values().filter(|node| node.status == status).count()
    }

    /// `completed_nodes / total_nodes * 100`, or 0 for an empty run
    pub(crate) fn recalculate_progress(&mut self) {
        self.completed_nodes = self.count_nodes(NodeStatus::Completed);
        self.progress = if self.total_nodes == 0 {
            0.0
        } else {
            (self.completed_nodes as f64 / self.total_nodes as f64 * 100.0).min(100.0)
        };
    }

    /// Status as reported to callers, which tells an abort apart from a failure
    pub fn execution_status(&self) -> ExecutionStatus {
        match self.status {
            RunStatus::Pending => ExecutionStatus::Pending,
            RunStatus::Running => ExecutionStatus::Running,
            RunStatus::Paused => ExecutionStatus::Paused,
            RunStatus::Completed => ExecutionStatus::Completed,
            RunStatus::Failed if self.aborted => ExecutionStatus::Aborted,
            RunStatus::Failed => ExecutionStatus::Failed,
        }
    }
}

/// Coarse status of the store for the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Idle,
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

/// Run progress counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub percent: f64,
    pub total_nodes: usize,
    pub completed_nodes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => f.write_str("info"),
            LogLevel::Warn => f.write_str("warn"),
            LogLevel::Error => f.write_str("error"),
        }
    }
}

/// One run log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}
