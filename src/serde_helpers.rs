//! Serde helpers for wire deserialization.
//!
//! When the `tracing` feature is enabled, this module also logs warnings for any
//! unknown fields encountered during deserialization, helping detect protocol drift
//! between this client and the chat backend.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize JSON with unknown field warnings.
///
/// Unknown fields trigger warnings but do not cause deserialization to fail. On failure the
/// offending path and value are logged before the error is returned.
///
/// # Example
///
/// ```ignore
/// let json = serde_json::json!({
///     "type": "typing",
///     "payload": { "is_typing": true, "cursor": 4 },
///     "timestamp": "2025-01-01T00:00:00Z"
/// });
/// let envelope: Envelope = deserialize_with_warnings(json)?;
/// // Logs: WARN unknown field "payload.cursor" with value "4" in Envelope
/// ```
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(
        type_name = %type_name::<T>(),
        json = %value,
        "deserializing JSON"
    );

    // Clone the value so we can look up unknown field values later
    let original = value.clone();

    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        // Re-deserialize with serde_path_to_error to get the error path
        let json_str = original.to_string();
        let jd = &mut serde_json::Deserializer::from_str(&json_str);
        let path_result: Result<T, _> = serde_path_to_error::deserialize(jd);
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            let value_display = format_value(lookup_value(&original, &path));

            tracing::warn!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %value_display,
                error = %path_err.inner(),
                "deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        let value_display = format_value(lookup_value(&original, &path));

        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %value_display,
            "unknown field in frame"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Look up a value in a JSON structure by a dotted path such as `payload.message.id`.
///
/// `?` segments emitted for `Option` wrappers are skipped. Returns `None` if the path
/// doesn't exist or traverses a non-container value.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty() && *s != "?") {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    const MAX_LEN: usize = 200;

    match value {
        Some(v) => {
            let rendered = v.to_string();
            if rendered.chars().count() > MAX_LEN {
                let truncated: String = rendered.chars().take(MAX_LEN).collect();
                format!("{truncated}...")
            } else {
                rendered
            }
        }
        None => "<unavailable>".to_owned(),
    }
}
