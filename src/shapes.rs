// Response shape adapters
// Each adapter knows exactly where its endpoint puts the data it needs and
// reports ShapeNotRecognized instead of guessing between field names.

use serde_json::Value;

use crate::error::{ProbeError, Result};
use crate::http_client::NormalizedResponse;

/// Typed view over a normalized response
pub trait ResponseShape {
    type Output;

    fn adapt(&self, response: &NormalizedResponse) -> Result<Self::Output>;
}

/// A JSON array at a fixed pointer ("" is the body root)
#[derive(Debug, Clone)]
pub struct ListShape {
    pointer: String,
}

impl ListShape {
    pub fn at(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl ResponseShape for ListShape {
    type Output = Vec<Value>;

    fn adapt(&self, response: &NormalizedResponse) -> Result<Vec<Value>> {
        match response.pointer(&self.pointer) {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(not_recognized(
                &self.pointer,
                format!("expected an array, found {}", kind_of(other)),
            )),
            None => Err(not_recognized(&self.pointer, "pointer not present".to_string())),
        }
    }
}

/// An identifier (string or integer) at a fixed pointer
#[derive(Debug, Clone)]
pub struct IdShape {
    pointer: String,
}

impl IdShape {
    pub fn at(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl ResponseShape for IdShape {
    type Output = String;

    fn adapt(&self, response: &NormalizedResponse) -> Result<String> {
        match response.pointer(&self.pointer) {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Some(other) => Err(not_recognized(
                &self.pointer,
                format!("expected a string or integer id, found {}", kind_of(other)),
            )),
            None => Err(not_recognized(&self.pointer, "pointer not present".to_string())),
        }
    }
}

fn not_recognized(pointer: &str, detail: String) -> ProbeError {
    let endpoint = if pointer.is_empty() { "/" } else { pointer };
    ProbeError::ShapeNotRecognized {
        endpoint: format!("body{}", endpoint),
        detail,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
