//! Parameter vocabulary shared by local tools and remote adapters.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-Schema primitive a parameter value must conform to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl ParamType {
    /// JSON-Schema spelling of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Null => "null",
        }
    }

    /// `true` for `integer` and `number`.
    pub fn is_numeric(self) -> bool {
        matches!(self, ParamType::Integer | ParamType::Number)
    }

    /// Parses an exact JSON-Schema type name (`"string"`, `"integer"`, ...).
    pub fn from_schema_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ParamType::String),
            "integer" => Some(ParamType::Integer),
            "number" => Some(ParamType::Number),
            "boolean" => Some(ParamType::Boolean),
            "array" => Some(ParamType::Array),
            "object" => Some(ParamType::Object),
            "null" => Some(ParamType::Null),
            _ => None,
        }
    }

    /// Maps a declared host-language type name to a primitive.
    ///
    /// Understands both Python-style (`int`, `List[str]`, `Optional[float]`,
    /// `str | None`) and Rust-style (`i64`, `Vec<String>`, `Option<f64>`,
    /// `HashMap<K, V>`) spellings. Sequences map to `array`, mappings to
    /// `object`, optionals and unions to their first non-null alternative.
    /// Empty or unknown names map to `string`.
    pub fn from_type_name(name: &str) -> Self {
        let name = name.trim().trim_start_matches('&').trim();
        let name = name.strip_prefix("mut ").unwrap_or(name).trim();
        if name.is_empty() {
            return ParamType::String;
        }

        let alternatives = split_top_level(name, '|');
        if alternatives.len() > 1 {
            return first_non_null(&alternatives);
        }

        if name == "()" {
            return ParamType::Null;
        }
        if name.starts_with('[') || name.starts_with('(') {
            return ParamType::Array;
        }

        let (base, inner) = match name.find(['<', '[']) {
            Some(open) => {
                let close = name.rfind(['>', ']']).unwrap_or(name.len());
                let inner = if close > open { &name[open + 1..close] } else { "" };
                (&name[..open], Some(inner))
            }
            None => (name, None),
        };
        let base = base
            .rsplit("::")
            .next()
            .unwrap_or(base)
            .rsplit('.')
            .next()
            .unwrap_or(base)
            .to_ascii_lowercase();

        match base.as_str() {
            "option" | "optional" => inner.map_or(ParamType::String, ParamType::from_type_name),
            "union" => inner.map_or(ParamType::String, |inner| {
                first_non_null(&split_top_level(inner, ','))
            }),
            "list" | "vec" | "vecdeque" | "tuple" | "set" | "frozenset" | "hashset"
            | "btreeset" | "indexset" | "sequence" | "iterable" | "array" => ParamType::Array,
            "dict" | "hashmap" | "btreemap" | "indexmap" | "mapping" | "map" | "object"
            | "value" => ParamType::Object,
            "int" | "integer" | "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16"
            | "u32" | "u64" | "u128" | "usize" => ParamType::Integer,
            "float" | "number" | "f32" | "f64" | "decimal" => ParamType::Number,
            "bool" | "boolean" => ParamType::Boolean,
            "none" | "nonetype" | "null" => ParamType::Null,
            _ => ParamType::String,
        }
    }

    /// Returns `true` when `value` is an instance of this primitive.
    ///
    /// `integer` accepts only whole JSON numbers; `number` accepts any
    /// JSON number.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Null => value.is_null(),
        }
    }

    /// Name of the JSON type of `value`, for error messages.
    pub fn name_of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn first_non_null(alternatives: &[&str]) -> ParamType {
    alternatives
        .iter()
        .map(|alt| ParamType::from_type_name(alt))
        .find(|ty| *ty != ParamType::Null)
        .unwrap_or(ParamType::Null)
}

/// Splits on `sep` while ignoring separators nested in brackets.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '[' | '(' => depth += 1,
            '>' | ']' | ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Compile-time mapping from a Rust type to its parameter primitive.
pub trait SchemaType {
    const PARAM_TYPE: ParamType;
}

macro_rules! schema_type {
    ($param:expr => $($ty:ty),+) => {
        $(impl SchemaType for $ty {
            const PARAM_TYPE: ParamType = $param;
        })+
    };
}

schema_type!(ParamType::String => String, str, char, std::path::PathBuf);
schema_type!(ParamType::Integer => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
schema_type!(ParamType::Number => f32, f64);
schema_type!(ParamType::Boolean => bool);
schema_type!(ParamType::Object => Value, Map<String, Value>);
schema_type!(ParamType::Null => ());

impl<T: SchemaType + ?Sized> SchemaType for &T {
    const PARAM_TYPE: ParamType = T::PARAM_TYPE;
}

impl<T: SchemaType> SchemaType for Option<T> {
    const PARAM_TYPE: ParamType = T::PARAM_TYPE;
}

impl<T> SchemaType for Vec<T> {
    const PARAM_TYPE: ParamType = ParamType::Array;
}

impl<T> SchemaType for [T] {
    const PARAM_TYPE: ParamType = ParamType::Array;
}

impl<K, V, S> SchemaType for HashMap<K, V, S> {
    const PARAM_TYPE: ParamType = ParamType::Object;
}

impl<K, V> SchemaType for BTreeMap<K, V> {
    const PARAM_TYPE: ParamType = ParamType::Object;
}

impl<K, V, S> SchemaType for IndexMap<K, V, S> {
    const PARAM_TYPE: ParamType = ParamType::Object;
}

/// Type and constraints of one tool parameter.
///
/// `default` only matters when `required` is false. `enum_values`,
/// `minimum`/`maximum` (numeric types) and `pattern` (string type) are
/// applied only when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ParameterSpec {
    /// A required parameter of the given type with no constraints.
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            default: None,
            enum_values: None,
            minimum: None,
            maximum: None,
            pattern: None,
        }
    }

    /// A required parameter typed from the Rust type `T`.
    pub fn of<T: SchemaType + ?Sized>(name: impl Into<String>) -> Self {
        Self::new(name, T::PARAM_TYPE)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the parameter optional without a default.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Marks the parameter optional with the given default.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    pub fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.minimum(min).maximum(max)
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Renders `{type, description, enum?, minimum?, maximum?, pattern?}`.
    ///
    /// Bounds are emitted only for numeric types and `pattern` only for
    /// strings.
    pub fn to_wire_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), Value::from(self.param_type.as_str()));
        schema.insert("description".into(), Value::from(self.description.clone()));
        if let Some(values) = &self.enum_values {
            schema.insert("enum".into(), Value::Array(values.clone()));
        }
        if self.param_type.is_numeric() {
            if let Some(min) = self.minimum {
                schema.insert("minimum".into(), bound_to_json(min));
            }
            if let Some(max) = self.maximum {
                schema.insert("maximum".into(), bound_to_json(max));
            }
        }
        if self.param_type == ParamType::String
            && let Some(pattern) = &self.pattern
        {
            schema.insert("pattern".into(), Value::from(pattern.clone()));
        }
        Value::Object(schema)
    }
}

/// Integral bounds render as JSON integers (`0`, not `0.0`).
fn bound_to_json(bound: f64) -> Value {
    if bound.fract() == 0.0 && bound.abs() < i64::MAX as f64 {
        Value::from(bound as i64)
    } else {
        Value::from(bound)
    }
}

/// Renders the `{type: "object", properties, required}` object for a
/// parameter map, preserving declaration order.
pub fn object_schema(parameters: &IndexMap<String, ParameterSpec>) -> Value {
    let properties: Map<String, Value> = parameters
        .iter()
        .map(|(name, spec)| (name.clone(), spec.to_wire_schema()))
        .collect();
    let required: Vec<Value> = parameters
        .values()
        .filter(|spec| spec.required)
        .map(|spec| Value::from(spec.name.clone()))
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
