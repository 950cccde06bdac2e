//! Per-call structured-output schemas.
//!
//! The pipeline's output contracts (pre-filter verdicts, source
//! evaluations, learning extraction, report generation) are per-call data,
//! not compile-time types. They are represented as descriptors over a small
//! set of JSON-schema shapes; the gateway renders a descriptor into the
//! provider request and validates the parsed reply against it. Callers then
//! narrow the returned `serde_json::Value` through the accessors below.

use crate::{Error, Result};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub enum Schema {
    String,
    Boolean,
    /// Bounds are rendered into the provider schema as guidance only;
    /// consumers clamp, so an out-of-range reply never fails the call.
    Integer {
        minimum: Option<i64>,
        maximum: Option<i64>,
    },
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Array {
        items: Box<Schema>,
        max_items: Option<usize>,
    },
    Object {
        fields: Vec<Field>,
    },
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Schema,
    pub required: bool,
}

impl Field {
    pub fn required(name: &'static str, description: &'static str, schema: Schema) -> Self {
        Self {
            name,
            description,
            schema,
            required: true,
        }
    }

    pub fn optional(name: &'static str, description: &'static str, schema: Schema) -> Self {
        Self {
            name,
            description,
            schema,
            required: false,
        }
    }
}

impl Schema {
    pub fn unit_number() -> Self {
        Schema::Number {
            minimum: Some(0.0),
            maximum: Some(1.0),
        }
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array {
            items: Box::new(items),
            max_items: None,
        }
    }

    pub fn array_max(items: Schema, max_items: usize) -> Self {
        Schema::Array {
            items: Box::new(items),
            max_items: Some(max_items),
        }
    }

    pub fn object(fields: Vec<Field>) -> Self {
        Schema::Object { fields }
    }

    /// Render to a JSON-schema value for interpolation into provider requests.
    pub fn to_value(&self) -> Value {
        match self {
            Schema::String => json!({ "type": "string" }),
            Schema::Boolean => json!({ "type": "boolean" }),
            Schema::Integer { minimum, maximum } => {
                let mut v = json!({ "type": "integer" });
                if let Some(m) = minimum {
                    v["minimum"] = json!(m);
                }
                if let Some(m) = maximum {
                    v["maximum"] = json!(m);
                }
                v
            }
            Schema::Number { minimum, maximum } => {
                let mut v = json!({ "type": "number" });
                if let Some(m) = minimum {
                    v["minimum"] = json!(m);
                }
                if let Some(m) = maximum {
                    v["maximum"] = json!(m);
                }
                v
            }
            Schema::Array { items, max_items } => {
                let mut v = json!({ "type": "array", "items": items.to_value() });
                if let Some(m) = max_items {
                    v["maxItems"] = json!(m);
                }
                v
            }
            Schema::Object { fields } => {
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for f in fields {
                    let mut prop = f.schema.to_value();
                    if !f.description.is_empty() {
                        prop["description"] = json!(f.description);
                    }
                    properties.insert(f.name.to_string(), prop);
                    if f.required {
                        required.push(f.name);
                    }
                }
                json!({ "type": "object", "properties": properties, "required": required })
            }
        }
    }

    /// Structural validation of a model reply: types and required object
    /// fields. Numeric bounds and maxItems are intentionally not enforced
    /// here (consumers clamp/truncate instead of failing the whole call).
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<()> {
        match self {
            Schema::String => value
                .as_str()
                .map(|_| ())
                .ok_or_else(|| Error::Schema(format!("{path}: expected string"))),
            Schema::Boolean => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| Error::Schema(format!("{path}: expected boolean"))),
            Schema::Integer { .. } => value
                .as_i64()
                .map(|_| ())
                .ok_or_else(|| Error::Schema(format!("{path}: expected integer"))),
            Schema::Number { .. } => value
                .as_f64()
                .map(|_| ())
                .ok_or_else(|| Error::Schema(format!("{path}: expected number"))),
            Schema::Array { items, .. } => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| Error::Schema(format!("{path}: expected array")))?;
                for (i, v) in arr.iter().enumerate() {
                    items.validate_at(v, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            Schema::Object { fields } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| Error::Schema(format!("{path}: expected object")))?;
                for f in fields {
                    match obj.get(f.name) {
                        Some(v) if !v.is_null() => {
                            f.schema.validate_at(v, &format!("{path}.{}", f.name))?
                        }
                        _ if f.required => {
                            return Err(Error::Schema(format!(
                                "{path}: missing required field `{}`",
                                f.name
                            )))
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}

// ---- Narrowing accessors for validated replies ----

pub fn str_field<'a>(value: &'a Value, name: &str) -> Result<&'a str> {
    value
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Schema(format!("missing string field `{name}`")))
}

pub fn opt_str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn bool_field(value: &Value, name: &str) -> Result<bool> {
    value
        .get(name)
        .and_then(Value::as_bool)
        .ok_or_else(|| Error::Schema(format!("missing boolean field `{name}`")))
}

pub fn f64_field(value: &Value, name: &str) -> Result<f64> {
    value
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::Schema(format!("missing number field `{name}`")))
}

pub fn opt_i64_field(value: &Value, name: &str) -> Option<i64> {
    value.get(name).and_then(Value::as_i64)
}

pub fn array_field<'a>(value: &'a Value, name: &str) -> Result<&'a Vec<Value>> {
    value
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Schema(format!("missing array field `{name}`")))
}

pub fn opt_array_field<'a>(value: &'a Value, name: &str) -> Option<&'a Vec<Value>> {
    value.get(name).and_then(Value::as_array)
}
