/// Typed node ports
///
/// Ports are the named slots an edge attaches to. Handlers declare them; the
/// compiler uses them to validate edges and the engine uses them to route values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port used when an edge leaves `targetHandle` unset
pub const DEFAULT_INPUT_PORT: &str = "input";

/// Port used when an edge leaves `sourceHandle` unset
pub const DEFAULT_OUTPUT_PORT: &str = "output";

/// Data carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDataType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    File,
    User,
    Any,
}

impl PortDataType {
    /// `any` on either side matches everything, otherwise types must be equal
    pub fn is_compatible_with(self, target: PortDataType) -> bool {
        self == PortDataType::Any || target == PortDataType::Any || self == target
    }
}

impl fmt::Display for PortDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortDataType::String => "string",
            PortDataType::Number => "number",
            PortDataType::Boolean => "boolean",
            PortDataType::Object => "object",
            PortDataType::Array => "array",
            PortDataType::File => "file",
            PortDataType::User => "user",
            PortDataType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A named, typed input or output slot on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub name: String,
    pub data_type: PortDataType,
    /// Must be fed by an edge (checked in strict mode)
    #[serde(default)]
    pub required: bool,
    /// Accepts several edges; values accumulate in edge order
    #[serde(default)]
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Port {
    pub fn new(name: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
            multiple: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
