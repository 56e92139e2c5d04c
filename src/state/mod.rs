/// Execution State
///
/// Everything a run leaves behind and everything callers use to control it:
/// - Run and node state types
/// - The single-writer store with control operations and queries
/// - Bounded buffers for logs and in-memory history
/// - Broadcast events for presentation layers
/// - Persisted history records and their SQLite storage

pub mod events;
pub mod history;
pub mod ring;
pub mod storage;
pub mod store;
pub mod types;

pub use events::ExecutionEvent;
pub use history::{HistoryProgress, HistoryRecord, HistoryStatus, NodeStateEntry};
pub use ring::BoundedBuffer;
pub use storage::{HistoryStorage, SqliteHistoryStorage};
pub use store::{ControlSignal, ExecutionStore};
pub use types::{
    ExecutionState, ExecutionStatus, LogEntry, LogLevel, NodeExecutionState, NodeStatus, Progress,
    RunStatus,
};
