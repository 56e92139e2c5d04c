/// Persisted history record
///
/// Storage shape of a finished run (`ExecutionHistory`): map fields become
/// key/value lists and the node counters are summarised as
/// `progress { total, completed, failed }`.

use crate::state::{ExecutionState, NodeExecutionState, NodeStatus, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Running => "running",
            HistoryStatus::Completed => "completed",
            HistoryStatus::Failed => "failed",
            HistoryStatus::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// One entry of a map flattened for storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStateEntry {
    pub key: String,
    pub value: NodeExecutionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub workflow_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: HistoryStatus,
    pub progress: HistoryProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Outputs of completed nodes keyed by node id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default)]
    pub node_states: Vec<NodeStateEntry>,
}

impl From<&ExecutionState> for HistoryRecord {
    fn from(state: &ExecutionState) -> Self {
        let status = match state.status {
            RunStatus::Completed => HistoryStatus::Completed,
            RunStatus::Failed if state.aborted => HistoryStatus::Aborted,
            RunStatus::Failed => HistoryStatus::Failed,
            RunStatus::Pending | RunStatus::Running | RunStatus::Paused => HistoryStatus::Running,
        };

        let mut results = Map::new();
        for node in state.node_states.values() {
            if node.status == NodeStatus::Completed {
                results.insert(node.node_id.clone(), serde_json::json!(node.outputs));
            }
        }

        Self {
            id: state.id.clone(),
            workflow_id: state.graph_id.clone(),
            started_at: state.start_time,
            completed_at: state.end_time,
            status,
            progress: HistoryProgress {
                total: state.total_nodes,
                completed: state.completed_nodes,
                failed: state.count_nodes(NodeStatus::Failed),
            },
            error: state.error.clone(),
            results: (!results.is_empty()).then_some(Value::Object(results)),
            node_states: state
                .node_states
                .iter()
                .map(|(key, value)| NodeStateEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

impl HistoryRecord {
    /// Rebuild the run state this record was taken from
    ///
    /// Paused and pending runs come back as `running`.
    pub fn into_state(self) -> ExecutionState {
        let (status, aborted) = match self.status {
            HistoryStatus::Running => (RunStatus::Running, false),
            HistoryStatus::Completed => (RunStatus::Completed, false),
            HistoryStatus::Failed => (RunStatus::Failed, false),
            HistoryStatus::Aborted => (RunStatus::Failed, true),
        };
        let progress = if status == RunStatus::Completed {
            100.0
        } else if self.progress.total == 0 {
            0.0
        } else {
            self.progress.completed as f64 / self.progress.total as f64 * 100.0
        };

        ExecutionState {
            id: self.id,
            graph_id: self.workflow_id,
            status,
            aborted,
            node_states: self
                .node_states
                .into_iter()
                .map(|entry| (entry.key, entry.value))
                .collect(),
            start_time: self.started_at,
            end_time: self.completed_at,
            progress,
            total_nodes: self.progress.total,
            completed_nodes: self.progress.completed,
            error: self.error,
        }
    }
}
