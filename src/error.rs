/// Error types for graph compilation, node execution, and run control

use crate::graph::PortDataType;
use crate::state::RunStatus;
use thiserror::Error;

/// Structural problems found while compiling a graph
///
/// Every variant is fatal to the run before it starts: no handler is invoked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The graph is not acyclic
    #[error("graph contains a cycle through nodes [{}]", .nodes.join(", "))]
    Cycle { nodes: Vec<String>, edges: Vec<String> },

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("edge '{edge}' references unknown node '{node}'")]
    DanglingEdge { edge: String, node: String },

    /// Node type has no registered handler
    #[error("no handler registered for type '{node_type}' (node '{node}')")]
    UnknownHandler { node: String, node_type: String },

    #[error("invalid configuration for node '{node}': {message}")]
    InvalidConfig { node: String, message: String },

    #[error("input port '{port}' on node '{node}' receives {count} edges but does not accept multiple")]
    MultipleInputs { node: String, port: String, count: usize },

    #[error("edge '{edge}' references unknown port '{port}' on node '{node}'")]
    UnknownPort { edge: String, node: String, port: String },

    #[error("edge '{edge}' connects a {from_type} output to a {to_type} input")]
    IncompatiblePorts {
        edge: String,
        from_type: PortDataType,
        to_type: PortDataType,
    },

    #[error("required input port '{port}' on node '{node}' has no incoming edge")]
    MissingInput { node: String, port: String },
}

/// Failure of a single handler invocation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler-side failure (bad input shape, I/O error, ...)
    #[error("{0}")]
    Execution(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Cooperative stop; never retried
    #[error("execution cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Create an execution error with a message
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// A control or state operation that does not apply to the store's current state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejected {
    #[error("run '{0}' is already active")]
    RunActive(String),

    #[error("no active run")]
    NoActiveRun,

    #[error("cannot {action} a run that is {status}")]
    InvalidTransition { action: &'static str, status: RunStatus },

    #[error("run '{0}' is archived and read-only")]
    Archived(String),
}

/// Errors surfaced by the execution engine entry points
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Rejected(#[from] Rejected),

    /// The background run task ended without producing a final state
    #[error("run task failed: {0}")]
    Join(String),
}
