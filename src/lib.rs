/// NodeFlow: workflow graph execution engine
///
/// Takes a node/edge graph produced by an editor, compiles it against a registry of
/// node handlers, schedules it topologically, and drives every node through a
/// controllable run lifecycle (start, pause, resume, stop).

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Graph model - nodes, edges, ports, and load-time compilation
pub mod graph;

// Handler contract, typed node configs, built-in handlers, and the handler registry
pub mod handlers;

// Runtime - topology resolution, per-node execution, and the run drive loop
pub mod runtime;

// Run state store - current run, node states, logs, history, and persistence
pub mod state;

// HTTP API layer - run control surface, history, and handler catalog
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, GraphError, HandlerError, Rejected};
pub use graph::{compile_graph, CompiledGraph, Edge, Graph, Node};
pub use handlers::{HandlerContext, HandlerRegistry, NodeHandler, NodeInputs, NodeOutput};
pub use runtime::{ExecutionEngine, RunHandle, Schedule};
pub use state::{ExecutionState, ExecutionStore, NodeExecutionState, RunStatus};
pub use server::start_server;
