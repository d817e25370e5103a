//! Param-name mapping
//!
//! CDP field names are camelCase on the wire. Callers building params in
//! Rust-style snake_case can run them through `camelize_params` before a
//! command is built. Only the top-level keys of the params object are
//! rewritten; nested objects may carry data-bearing keys (header maps,
//! cookie names) that must pass through untouched.

use serde_json::Value;

/// Convert one snake_case identifier to camelCase
///
/// `max_total_buffer_size` becomes `maxTotalBufferSize`. Names without
/// underscores are returned unchanged.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;

    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }

    out
}

/// Rewrite the top-level keys of a params object to camelCase
///
/// Non-object values are returned unchanged.
pub fn camelize_params(params: Value) -> Value {
    match params {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (to_camel_case(&k), v))
                .collect(),
        ),
        other => other,
    }
}
