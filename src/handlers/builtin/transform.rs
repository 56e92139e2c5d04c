/// Transform handler
///
/// Selects values out of the input with a JSONPath expression (jsonpath_lib).
/// The selection is published as an array, or as a single value when `unwrap` is
/// set and exactly one value matched.

use crate::error::HandlerError;
use crate::graph::{CompiledNode, Port, PortDataType, DEFAULT_INPUT_PORT, DEFAULT_OUTPUT_PORT};
use crate::handlers::{
    elapsed_ms, FieldSchema, FieldType, HandlerContext, InputSchema, NodeConfig, NodeHandler,
    NodeInputs, NodeOutput,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;

/// Typed config for `transform` nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub unwrap: bool,
}

fn root_path() -> String {
    "$".to_string()
}

#[derive(Debug, Default)]
pub struct TransformHandler;

#[async_trait]
impl NodeHandler for TransformHandler {
    fn node_type(&self) -> &str {
        "transform"
    }

    fn category(&self) -> &str {
        "transform"
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &NodeInputs,
        _ctx: &HandlerContext,
    ) -> Result<NodeOutput, HandlerError> {
        let NodeConfig::Transform(config) = &node.config else {
            return Err(HandlerError::execution(format!(
                "node '{}' does not carry a transform config",
                node.id
            )));
        };
        let started = Instant::now();

        let input = inputs
            .get(DEFAULT_INPUT_PORT)
            .ok_or_else(|| HandlerError::execution("Transform node requires an input value"))?;

        let selected = jsonpath_lib::select(input, &config.path).map_err(|e| {
            HandlerError::execution(format!("JSONPath '{}' failed: {:?}", config.path, e))
        })?;
        let matched = selected.len();

        let data = if config.unwrap && matched == 1 {
            selected[0].clone()
        } else {
            Value::Array(selected.into_iter().cloned().collect())
        };

        Ok(NodeOutput::new(data)
            .with_metadata("executionTime", elapsed_ms(started))
            .with_metadata("matched", json!(matched)))
    }

    fn default_config(&self) -> Value {
        json!({
            "path": "$",
            "unwrap": false
        })
    }

    fn input_schema(&self) -> Option<InputSchema> {
        Some(
            InputSchema::new()
                .field(FieldSchema::new("path", FieldType::String).required())
                .field(FieldSchema::new("unwrap", FieldType::Boolean).default_value(json!(false))),
        )
    }

    fn input_ports(&self) -> Vec<Port> {
        vec![Port::new(DEFAULT_INPUT_PORT, PortDataType::Any).required()]
    }

    fn output_ports(&self) -> Vec<Port> {
        vec![Port::new(DEFAULT_OUTPUT_PORT, PortDataType::Any).describe("Values selected by the JSONPath")]
    }

    fn parse_config(&self, data: &Map<String, Value>) -> Result<NodeConfig, String> {
        let config: TransformConfig =
            serde_json::from_value(Value::Object(data.clone())).map_err(|e| e.to_string())?;

        if !config.path.starts_with('$') {
            return Err(format!("JSONPath '{}' must start with '$'", config.path));
        }
        // Compile once against an empty document so syntax errors fail at load time
        jsonpath_lib::select(&json!({}), &config.path)
            .map_err(|e| format!("invalid JSONPath '{}': {:?}", config.path, e))?;

        Ok(NodeConfig::Transform(config))
    }
}
