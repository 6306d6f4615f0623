//! Cache key derivation.
//!
//! A key is `endpoint(canonical-args)` where the arguments are rendered as JSON with object
//! keys sorted at every depth. Two argument values that differ only in property order map to
//! the same key; any other difference changes the rendered text.

use crate::types::CacheKey;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;

/// Builds the cache key for `endpoint` called with `args`.
#[must_use]
pub fn build_cache_key(endpoint: &str, args: &Value) -> CacheKey {
    let mut out = String::with_capacity(endpoint.len() + 32);
    out.push_str(endpoint);
    out.push('(');
    write_canonical(args, &mut out);
    out.push(')');
    CacheKey::from_canonical(out)
}

/// Serializes typed arguments into the JSON value the cache stores and keys on.
///
/// # Errors
///
/// Returns the serializer error for values JSON cannot represent (e.g. maps with non-string keys).
pub fn serialize_args<A: Serialize + ?Sized>(args: &A) -> Result<Value, serde_json::Error> {
    serde_json::to_value(args)
}

/// Renders `value` as compact JSON with sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}
