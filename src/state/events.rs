/// Execution events
///
/// Published by the store on a broadcast channel whenever a run or node changes
/// state. Presentation layers subscribe; a lagging subscriber loses events, never
/// the state itself.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExecutionEvent {
    RunStarted { run_id: String, graph_id: String },
    RunPaused { run_id: String },
    RunResumed { run_id: String },
    RunCompleted { run_id: String },
    RunFailed { run_id: String, error: Option<String> },
    RunAborted { run_id: String },
    NodeStarted { run_id: String, node_id: String },
    NodeRetrying { run_id: String, node_id: String, attempt: u32, error: String },
    NodeCompleted { run_id: String, node_id: String, duration_ms: Option<u64> },
    NodeFailed { run_id: String, node_id: String, error: String },
    ProgressUpdated { run_id: String, progress: f64, completed_nodes: usize, total_nodes: usize },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::RunPaused { run_id }
            | ExecutionEvent::RunResumed { run_id }
            | ExecutionEvent::RunCompleted { run_id }
            | ExecutionEvent::RunFailed { run_id, .. }
            | ExecutionEvent::RunAborted { run_id }
            | ExecutionEvent::NodeStarted { run_id, .. }
            | ExecutionEvent::NodeRetrying { run_id, .. }
            | ExecutionEvent::NodeCompleted { run_id, .. }
            | ExecutionEvent::NodeFailed { run_id, .. }
            | ExecutionEvent::ProgressUpdated { run_id, .. } => run_id,
        }
    }
}
