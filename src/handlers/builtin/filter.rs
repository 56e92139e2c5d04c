/// Filter handler
///
/// Keeps the items of an input array whose `property` equals `condition`. With no
/// property or condition configured the array passes through unchanged.

use crate::error::HandlerError;
use crate::graph::{CompiledNode, Port, PortDataType, DEFAULT_INPUT_PORT, DEFAULT_OUTPUT_PORT};
use crate::handlers::{
    elapsed_ms, FieldSchema, FieldType, HandlerContext, InputSchema, NodeConfig, NodeHandler,
    NodeInputs, NodeOutput,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;

/// Typed config for `filter` nodes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default)]
    pub property: String,
    #[serde(default)]
    pub condition: Value,
}

impl FilterConfig {
    fn is_active(&self) -> bool {
        let has_condition = match &self.condition {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        };
        !self.property.is_empty() && has_condition
    }

    fn matches(&self, item: &Value) -> bool {
        let Some(value) = item.get(&self.property) else {
            return false;
        };
        if *value == self.condition {
            return true;
        }
        // "70" in the editor should match a numeric 70 in the data
        match (&self.condition, value) {
            (Value::String(expected), Value::Number(_) | Value::Bool(_)) => value.to_string() == *expected,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FilterHandler;

#[async_trait]
impl NodeHandler for FilterHandler {
    fn node_type(&self) -> &str {
        "filter"
    }

    fn category(&self) -> &str {
        "transform"
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &NodeInputs,
        ctx: &HandlerContext,
    ) -> Result<NodeOutput, HandlerError> {
        let NodeConfig::Filter(config) = &node.config else {
            return Err(HandlerError::execution(format!(
                "node '{}' does not carry a filter config",
                node.id
            )));
        };
        let started = Instant::now();

        let items = match inputs.get(DEFAULT_INPUT_PORT) {
            Some(items) => Some(items),
            None => {
                let fallback = inputs.get("data");
                if fallback.is_some() {
                    ctx.warn("Nothing on the 'input' port; filtering 'data' instead");
                }
                fallback
            }
        }
        .and_then(Value::as_array)
            .ok_or_else(|| HandlerError::execution("Filter node requires array input"))?;

        let filtered: Vec<Value> = if config.is_active() {
            items.iter().filter(|item| config.matches(item)).cloned().collect()
        } else {
            items.clone()
        };

        Ok(NodeOutput::new(json!(filtered))
            .with_metadata("executionTime", elapsed_ms(started))
            .with_metadata("timestamp", json!(Utc::now().timestamp_millis()))
            .with_metadata("originalCount", json!(items.len()))
            .with_metadata("filteredCount", json!(filtered.len())))
    }

    fn default_config(&self) -> Value {
        json!({
            "property": "",
            "condition": ""
        })
    }

    fn input_schema(&self) -> Option<InputSchema> {
        Some(InputSchema::new().field(FieldSchema::new("property", FieldType::String)))
    }

    fn input_ports(&self) -> Vec<Port> {
        vec![Port::new(DEFAULT_INPUT_PORT, PortDataType::Array)
            .required()
            .describe("Items to filter")]
    }

    fn output_ports(&self) -> Vec<Port> {
        vec![Port::new(DEFAULT_OUTPUT_PORT, PortDataType::Array).describe("Items matching the condition")]
    }

    fn parse_config(&self, data: &Map<String, Value>) -> Result<NodeConfig, String> {
        serde_json::from_value(Value::Object(data.clone()))
            .map(NodeConfig::Filter)
            .map_err(|e| e.to_string())
    }
}
