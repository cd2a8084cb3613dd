use serde_json::Value;

use crate::planners::types::PlanSections;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("malformed generation response: expected an array")]
    NotAnArray,
    #[error("malformed generation response: array is empty")]
    EmptyArray,
    #[error("malformed generation response: first element has no string output field")]
    MissingOutput,
    #[error("malformed generation response: output did not decode as a plan object: {0}")]
    InnerParse(String),
}

/// Unwrap the generation webhook's response envelope.
///
/// The webhook wraps the plan twice: the body is a JSON array whose first
/// element carries the plan object serialized *as a string* in its `output`
/// field. This function is the only place that knows about that shape; if the
/// upstream contract is ever fixed to return a plain object, only this module
/// changes.
pub fn unwrap_envelope(raw: &Value) -> Result<PlanSections, EnvelopeError> {
    let items = raw.as_array().ok_or(EnvelopeError::NotAnArray)?;
    let first = items.first().ok_or(EnvelopeError::EmptyArray)?;
    let output = first
        .get("output")
        .and_then(Value::as_str)
        .ok_or(EnvelopeError::MissingOutput)?;

    let inner: Value = serde_json::from_str(output)
        .map_err(|error| EnvelopeError::InnerParse(error.to_string()))?;
    if !inner.is_object() {
        return Err(EnvelopeError::InnerParse(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(inner).map_err(|error| EnvelopeError::InnerParse(error.to_string()))
}
