//! Server-timestamp sentinel substitution.
//!
//! Legacy clients send `{".sv": "timestamp"}` wherever they want the server
//! to stamp the current wall-clock ms. Clients cannot be updated
//! atomically, so the contract is preserved: the hub applies the
//! substitution exactly once, after receipt and before persistence.

use serde_json::Value;

/// Sentinel key clients use to request a server timestamp.
const SENTINEL_KEY: &str = ".sv";

/// Sentinel value selecting the timestamp substitution.
const SENTINEL_TIMESTAMP: &str = "timestamp";

/// Replace every `{".sv": "timestamp"}` object in the tree with `now_ms`.
///
/// The whole payload tree is walked; arrays and nested objects included.
/// Objects carrying extra keys next to `".sv"` are not sentinels and are
/// left untouched (recursion still visits their values).
pub fn resolve_timestamp_sentinels(value: &mut Value, now_ms: i64) {
    match value {
        Value::Object(map) => {
            if is_timestamp_sentinel(map) {
                *value = Value::from(now_ms);
                return;
            }
            for entry in map.values_mut() {
                resolve_timestamp_sentinels(entry, now_ms);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_timestamp_sentinels(item, now_ms);
            }
        }
        _ => {}
    }
}

fn is_timestamp_sentinel(map: &serde_json::Map<String, Value>) -> bool {
    map.len() == 1
        && map
            .get(SENTINEL_KEY)
            .and_then(Value::as_str)
            .is_some_and(|v| v == SENTINEL_TIMESTAMP)
}
