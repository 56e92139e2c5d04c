/// Declarative input schemas for node configuration
///
/// A handler may describe its config fields (type, required, enum, default). The
/// graph compiler validates every node's `data` against it before a run starts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON shape expected for a config field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Number => "a number",
            FieldType::Boolean => "a boolean",
            FieldType::Object => "an object",
            FieldType::Array => "an array",
        }
    }
}

/// One config field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            allowed: None,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, allowed: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(allowed.into_iter().collect());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Field list describing a handler's config object
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSchema {
    pub fields: Vec<FieldSchema>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Validate a config object, returning it with schema defaults filled in
    ///
    /// Unknown keys pass through. A required string field that is empty counts as missing.
    pub fn validate(&self, data: &Map<String, Value>) -> Result<Map<String, Value>, String> {
        let mut validated = data.clone();

        for field in &self.fields {
            let present = match data.get(&field.name) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) if s.is_empty() && field.required => None,
                Some(value) => Some(value),
            };

            let Some(value) = present else {
                if let Some(default) = &field.default {
                    validated.insert(field.name.clone(), default.clone());
                } else if field.required {
                    return Err(format!("missing required field '{}'", field.name));
                }
                continue;
            };

            if !field.field_type.matches(value) {
                return Err(format!(
                    "field '{}' must be {}",
                    field.name,
                    field.field_type.describe()
                ));
            }

            if let Some(allowed) = &field.allowed {
                if !allowed.contains(value) {
                    let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
                    return Err(format!(
                        "field '{}' must be one of [{}], got {}",
                        field.name,
                        options.join(", "),
                        value
                    ));
                }
            }
        }

        Ok(validated)
    }
}
