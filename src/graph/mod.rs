/// Graph Model
///
/// This module holds the snapshot graph the engine consumes and its load-time
/// compilation. It provides:
/// - Type definitions (Graph, Node, Edge, NodeSettings)
/// - Typed ports and type compatibility rules
/// - Compilation against the handler registry (structure, configs, ports)

// Core graph type definitions
pub mod types;

// Typed input/output ports
pub mod port;

// Load-time validation producing an execution-ready graph
pub mod compile;

// Re-export commonly used types
pub use compile::{compile_graph, CompileOptions, CompiledGraph, CompiledNode};
pub use port::{Port, PortDataType, DEFAULT_INPUT_PORT, DEFAULT_OUTPUT_PORT};
pub use types::{Edge, Graph, Node, NodeSettings, Position};
