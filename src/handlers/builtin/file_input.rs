/// File input handler
///
/// Loads a file from the local filesystem and publishes its content. JSON files are
/// parsed, CSV files (quoted fields included) become an array of header-keyed objects, text and XML files are
/// passed through as strings.

use crate::error::HandlerError;
use crate::graph::{CompiledNode, Port, PortDataType, DEFAULT_OUTPUT_PORT};
use crate::handlers::{
    elapsed_ms, FieldSchema, FieldType, HandlerContext, InputSchema, NodeConfig, NodeHandler,
    NodeInputs, NodeOutput,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;

/// How the file content is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Text,
    Json,
    Csv,
    Xml,
}

impl FileType {
    fn as_str(self) -> &'static str {
        match self {
            FileType::Text => "text",
            FileType::Json => "json",
            FileType::Csv => "csv",
            FileType::Xml => "xml",
        }
    }
}

/// Typed config for `fileInput` nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInputConfig {
    pub file_path: String,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

#[derive(Debug, Default)]
pub struct FileInputHandler;

#[async_trait]
impl NodeHandler for FileInputHandler {
    fn node_type(&self) -> &str {
        "fileInput"
    }

    fn category(&self) -> &str {
        "collect"
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        _inputs: &NodeInputs,
        ctx: &HandlerContext,
    ) -> Result<NodeOutput, HandlerError> {
        let NodeConfig::FileInput(config) = &node.config else {
            return Err(HandlerError::execution(format!(
                "node '{}' does not carry a file input config",
                node.id
            )));
        };
        let started = Instant::now();

        let bytes = tokio::select! {
            read = tokio::fs::read(&config.file_path) => read.map_err(|e| {
                HandlerError::execution(format!("Failed to load file '{}': {}", config.file_path, e))
            })?,
            _ = ctx.cancel.cancelled() => return Err(HandlerError::Cancelled),
        };
        let size = bytes.len();
        let last_modified = tokio::fs::metadata(&config.file_path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(|modified| DateTime::<Utc>::from(modified).to_rfc3339());

        let text = String::from_utf8(bytes).map_err(|_| {
            HandlerError::execution(format!("File '{}' is not valid utf-8", config.file_path))
        })?;

        let content = match config.file_type {
            FileType::Json => serde_json::from_str(&text).map_err(|e| {
                HandlerError::execution(format!("Invalid JSON in '{}': {}", config.file_path, e))
            })?,
            FileType::Csv => parse_csv(&text).map_err(|e| {
                HandlerError::execution(format!("Invalid CSV in '{}': {}", config.file_path, e))
            })?,
            FileType::Text | FileType::Xml => Value::String(text),
        };

        ctx.info(format!("Loaded {} bytes from {}", size, config.file_path));

        Ok(NodeOutput::new(json!({
            "path": config.file_path,
            "type": config.file_type.as_str(),
            "content": content,
            "size": size,
            "lastModified": last_modified,
        }))
        .with_metadata("executionTime", elapsed_ms(started))
        .with_metadata("timestamp", json!(Utc::now().timestamp_millis()))
        .with_metadata("fileType", json!(config.file_type.as_str())))
    }

    fn default_config(&self) -> Value {
        json!({
            "filePath": "",
            "fileType": "text",
            "encoding": "utf-8"
        })
    }

    fn input_schema(&self) -> Option<InputSchema> {
        Some(
            InputSchema::new()
                .field(FieldSchema::new("filePath", FieldType::String).required())
                .field(
                    FieldSchema::new("fileType", FieldType::String)
                        .one_of([json!("text"), json!("json"), json!("csv"), json!("xml")])
                        .default_value(json!("text")),
                )
                .field(FieldSchema::new("encoding", FieldType::String).default_value(json!("utf-8"))),
        )
    }

    fn input_ports(&self) -> Vec<Port> {
        Vec::new()
    }

    fn output_ports(&self) -> Vec<Port> {
        vec![Port::new(DEFAULT_OUTPUT_PORT, PortDataType::File).describe("File content with path, size and type")]
    }

    fn parse_config(&self, data: &Map<String, Value>) -> Result<NodeConfig, String> {
        let config: FileInputConfig =
            serde_json::from_value(Value::Object(data.clone())).map_err(|e| e.to_string())?;

        let encoding = config.encoding.to_ascii_lowercase();
        if encoding != "utf-8" && encoding != "utf8" {
            return Err(format!("unsupported encoding '{}'", config.encoding));
        }

        Ok(NodeConfig::FileInput(config))
    }
}

/// Parse CSV with a header row into header-keyed objects
///
/// Quoted fields may contain delimiters and newlines. Cells beyond the header
/// width are keyed `column<N>`; blank lines are skipped.
fn parse_csv(text: &str) -> Result<Value, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: StringRecord = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (index, cell) in record.iter().enumerate() {
            let key = headers
                .get(index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("column{}", index + 1));
            row.insert(key, Value::String(cell.to_string()));
        }
        rows.push(Value::Object(row));
    }

    Ok(Value::Array(rows))
}
