// Ready-made poll predicates

use serde_json::Value;

use crate::error::{ProbeError, Result};
use crate::http_client::NormalizedResponse;
use crate::shapes::{ListShape, ResponseShape};

/// Predicate chosen at runtime
pub type BoxedPredicate = Box<dyn Fn(&NormalizedResponse) -> bool + Send + Sync>;

/// The list at `pointer` has at least one item
pub fn non_empty_list(pointer: &str) -> impl Fn(&NormalizedResponse) -> bool {
    let shape = ListShape::at(pointer);
    move |response: &NormalizedResponse| match shape.adapt(response) {
        Ok(items) => !items.is_empty(),
        Err(e) => {
            tracing::debug!("{}", e);
            false
        }
    }
}

/// The list at `pointer` has an item whose `field` equals `expected`
pub fn list_contains(
    pointer: &str,
    field: &str,
    expected: Value,
) -> impl Fn(&NormalizedResponse) -> bool {
    let shape = ListShape::at(pointer);
    let field = field.to_string();
    move |response: &NormalizedResponse| match shape.adapt(response) {
        Ok(items) => items
            .iter()
            .any(|item| item.get(&field).is_some_and(|v| matches_expected(v, &expected))),
        Err(e) => {
            tracing::debug!("{}", e);
            false
        }
    }
}

/// The response has exactly this status code
pub fn status_is(code: u16) -> impl Fn(&NormalizedResponse) -> bool {
    move |response: &NormalizedResponse| response.status_code == code
}

/// Build the poll condition from command-line options
///
/// `status` takes an exact status code, `contains` a `FIELD=VALUE` match in
/// the list at `pointer`; with neither, the list must be non-empty.
pub fn from_options(
    pointer: &str,
    contains: Option<&str>,
    status: Option<u16>,
) -> Result<BoxedPredicate> {
    match (status, contains) {
        (Some(code), None) => Ok(Box::new(status_is(code))),
        (Some(_), Some(_)) => Err(ProbeError::InvalidConfig(
            "status and contains conditions are mutually exclusive".to_string(),
        )),
        (None, Some(condition)) => {
            let (field, value) = condition.split_once('=').ok_or_else(|| {
                ProbeError::InvalidConfig(format!(
                    "contains condition must be FIELD=VALUE, got {}",
                    condition
                ))
            })?;
            Ok(Box::new(list_contains(pointer, field, parse_expected(value))))
        }
        (None, None) => Ok(Box::new(non_empty_list(pointer))),
    }
}

/// Parse a command-line value: JSON when it parses, a plain string otherwise
pub fn parse_expected(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Ids are compared across string and number representations
fn matches_expected(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::Number(e)) | (Value::Number(e), Value::String(a)) => {
            a == &e.to_string()
        }
        _ => actual == expected,
    }
}
