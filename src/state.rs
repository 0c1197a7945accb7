//! Conversions between the host's JSON state and typed structs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderError;

/// Remove null members from objects, recursively.
///
/// The host sends unset attributes as `null`; dropping them lets
/// `#[serde(default)]` fill in the zero value.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

/// Decode host state into a typed struct.
pub fn from_state<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    let value = match value {
        Value::Null => Value::Object(Default::default()),
        other => strip_nulls(other),
    };
    Ok(serde_json::from_value(value)?)
}

/// Encode a typed struct back into host state.
pub fn to_state<T: Serialize>(value: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(value)?)
}
