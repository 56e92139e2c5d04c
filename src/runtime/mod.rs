/// Runtime Execution Engine
///
/// This module drives graph runs. It handles:
/// - Topological ordering and ready-set tracking with petgraph
/// - Concurrent dispatch of ready nodes on tokio tasks
/// - Retries, timeouts and cooperative cancellation of handler invocations
/// - Pause, resume and stop through the execution store

// Run orchestration and the background drive loop
pub mod engine;

// Single-node execution with retry, timeout and cancellation
pub mod executor;

// Topology resolution and the ready set
pub mod scheduler;

// Re-export main types
pub use engine::{ExecutionEngine, RunHandle};
pub use executor::{NodeExecutor, NodeOutcome};
pub use scheduler::{ReadySet, Schedule, Slot};
