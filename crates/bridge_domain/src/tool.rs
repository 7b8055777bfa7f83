use std::collections::BTreeMap;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Object,
    Number,
    Integer,
    String,
    Array,
    Null,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct ParameterInfo {
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// Element description when `data_type` is an array.
    #[serde(default)]
    pub elem_info: Option<Box<ParameterInfo>>,
    /// Nested fields when `data_type` is an object.
    #[serde(default)]
    pub sub_params: BTreeMap<String, ParameterInfo>,
}

impl ParameterInfo {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            desc: String::new(),
            enum_values: Vec::new(),
            required: false,
            elem_info: None,
            sub_params: BTreeMap::new(),
        }
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.data_type.to_string()));
        if !self.desc.is_empty() {
            schema.insert("description".into(), json!(self.desc));
        }
        if !self.enum_values.is_empty() {
            schema.insert("enum".into(), json!(self.enum_values));
        }
        if let Some(elem) = &self.elem_info {
            schema.insert("items".into(), elem.to_json_schema());
        }
        if self.data_type == DataType::Object {
            let (properties, required) = object_properties(&self.sub_params);
            schema.insert("properties".into(), properties);
            if !required.is_empty() {
                schema.insert("required".into(), json!(required));
            }
        }
        Value::Object(schema)
    }
}

fn object_properties(params: &BTreeMap<String, ParameterInfo>) -> (Value, Vec<String>) {
    let properties = params
        .iter()
        .map(|(name, info)| (name.clone(), info.to_json_schema()))
        .collect::<Map<_, _>>();
    let required = params
        .iter()
        .filter(|(_, info)| info.required)
        .map(|(name, _)| name.clone())
        .collect();
    (Value::Object(properties), required)
}

/// Tool parameters, either described field by field or given as a ready
/// JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolParams {
    Params(BTreeMap<String, ParameterInfo>),
    JsonSchema(Value),
}

impl ToolParams {
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::JsonSchema(schema) => schema.clone(),
            Self::Params(params) => {
                let (properties, required) = object_properties(params);
                let mut schema = Map::new();
                schema.insert("type".into(), json!("object"));
                schema.insert("properties".into(), properties);
                if !required.is_empty() {
                    schema.insert("required".into(), json!(required));
                }
                Value::Object(schema)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct ToolInfo {
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub params: Option<ToolParams>,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self { name: name.into(), desc: desc.into(), params: None }
    }

    /// JSON schema of the parameters; an empty object schema when none are
    /// declared.
    pub fn parameters_schema(&self) -> Value {
        self.params
            .as_ref()
            .map(ToolParams::to_json_schema)
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
    }
}

/// How a model may use the tools bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolChoice {
    /// The model must not call tools.
    Forbidden,
    /// The model decides whether to call tools.
    Allowed,
    /// The model must call at least one tool.
    Forced,
}
