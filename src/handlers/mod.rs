/// Node handler contract
///
/// Every node type is backed by a `NodeHandler`. Handlers are stateless across
/// invocations: a run hands them the compiled node (with its typed config), the
/// inputs resolved from upstream outputs, and a `HandlerContext` carrying the run
/// identity, a cancellation token, and a log sink.
///
/// New node types plug in by implementing the trait and registering an instance in a
/// `HandlerRegistry`.

pub mod builtin;
pub mod registry;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::graph::{CompiledNode, Port, PortDataType, DEFAULT_INPUT_PORT, DEFAULT_OUTPUT_PORT};
use crate::state::{ExecutionStore, LogLevel};

pub use builtin::{FileInputConfig, FilterConfig, TransformConfig};
pub use registry::HandlerRegistry;
pub use schema::{FieldSchema, FieldType, InputSchema};

/// Values fed into a node, keyed by input port name
pub type NodeInputs = BTreeMap<String, Value>;

/// Result of a successful handler invocation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeOutput {
    /// Value published on the default `output` port
    pub data: Value,
    /// Additional named output ports
    pub ports: BTreeMap<String, Value>,
    /// Execution time and handler-specific diagnostics
    pub metadata: Map<String, Value>,
}

impl NodeOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ports: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_port(mut self, name: impl Into<String>, value: Value) -> Self {
        self.ports.insert(name.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Flatten into the per-port map recorded in the node's execution state
    pub fn into_port_map(self) -> BTreeMap<String, Value> {
        let mut outputs = self.ports;
        outputs.insert(DEFAULT_OUTPUT_PORT.to_string(), self.data);
        outputs
    }
}

/// Typed node configuration, one variant per built-in node type
///
/// Produced by the handler at compile time; plugin types carry their validated
/// object as `Extension`.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    FileInput(FileInputConfig),
    Filter(FilterConfig),
    Transform(TransformConfig),
    Extension(Map<String, Value>),
}

/// Per-invocation context handed to a handler
#[derive(Clone)]
pub struct HandlerContext {
    pub run_id: String,
    pub graph_id: String,
    pub node_id: String,
    /// Zero for the first attempt, incremented on every retry
    pub attempt: u32,
    /// Fired when the run is stopped; long-running handlers should watch it
    pub cancel: CancellationToken,
    logger: RunLogger,
}

impl HandlerContext {
    pub fn new(
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        node_id: impl Into<String>,
        attempt: u32,
        cancel: CancellationToken,
        store: Option<Arc<ExecutionStore>>,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            logger: RunLogger {
                store,
                node_id: node_id.clone(),
            },
            node_id,
            attempt,
            cancel,
        }
    }

    /// Context that is not attached to any run; logs go to tracing only
    pub fn detached(node_id: impl Into<String>) -> Self {
        Self::new("detached", "detached", node_id, 0, CancellationToken::new(), None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.logger.log(level, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }
}

/// Log sink scoped to one node of one run
#[derive(Clone)]
struct RunLogger {
    store: Option<Arc<ExecutionStore>>,
    node_id: String,
}

impl RunLogger {
    fn log(&self, level: LogLevel, message: String) {
        match &self.store {
            Some(store) => store.add_log(level, message, Some(&self.node_id)),
            None => tracing::info!(node_id = %self.node_id, "{}", message),
        }
    }
}

/// Executable implementation of one node type
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Unique node type key (e.g. "fileInput")
    fn node_type(&self) -> &str;

    /// Palette grouping only
    fn category(&self) -> &str;

    /// Run the node once
    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &NodeInputs,
        ctx: &HandlerContext,
    ) -> Result<NodeOutput, HandlerError>;

    /// Config used for nodes created without one. Must be pure.
    fn default_config(&self) -> Value;

    /// Declarative description of the config fields, checked before a run starts
    fn input_schema(&self) -> Option<InputSchema> {
        None
    }

    fn input_ports(&self) -> Vec<Port> {
        vec![Port::new(DEFAULT_INPUT_PORT, PortDataType::Any)]
    }

    fn output_ports(&self) -> Vec<Port> {
        vec![Port::new(DEFAULT_OUTPUT_PORT, PortDataType::Any)]
    }

    /// Turn a schema-validated config object into its typed variant
    fn parse_config(&self, data: &Map<String, Value>) -> Result<NodeConfig, String> {
        Ok(NodeConfig::Extension(data.clone()))
    }
}

/// Serializable summary of a registered handler, for catalog listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,
    pub category: String,
    pub default_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<InputSchema>,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl HandlerDescriptor {
    pub fn of(handler: &dyn NodeHandler) -> Self {
        Self {
            node_type: handler.node_type().to_string(),
            category: handler.category().to_string(),
            default_config: handler.default_config(),
            input_schema: handler.input_schema(),
            inputs: handler.input_ports(),
            outputs: handler.output_ports(),
        }
    }
}

/// Milliseconds elapsed since `started`, for handler metadata
pub(crate) fn elapsed_ms(started: std::time::Instant) -> Value {
    Value::from(started.elapsed().as_millis() as u64)
}
