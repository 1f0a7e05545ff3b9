use serde_json::{json, Map, Value};

/// JSON type of one tool parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Closed set of values. The JSON type is taken from the first value.
    Enum(Vec<Value>),
}

impl ParamKind {
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Enum(values) => values.first().map(value_type).unwrap_or("string"),
        }
    }
}

fn value_type(v: &Value) -> &'static str {
    match v {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::String(_) | Value::Null => "string",
    }
}

/// Declaration of one tool parameter. A parameter with a default is optional.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub required: bool,
}

impl Param {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            default: None,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, default: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            default: Some(default),
            required: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Build an object schema from parameter declarations.
///
/// `required` is omitted when every parameter is optional.
pub fn build_parameters_schema(params: &[Param]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for p in params {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(p.kind.json_type()));
        if let ParamKind::Enum(values) = &p.kind {
            prop.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(desc) = &p.description {
            prop.insert("description".into(), json!(desc));
        }
        if let Some(default) = &p.default {
            prop.insert("default".into(), default.clone());
        }
        if p.required {
            required.push(json!(p.name));
        }
        properties.insert(p.name.clone(), Value::Object(prop));
    }

    let mut schema = Map::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    Value::Object(schema)
}

/// Names listed under `required` in an object schema.
pub fn required_names(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}
