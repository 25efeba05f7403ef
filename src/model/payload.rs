use serde_json::Value;

/// Every source payload is a JSON-like tree. Typed access goes through the
/// extractors below; drivers keep their own field conventions.
pub type Payload = Value;

/// Walks a dotted path (`"constraint.pLI"`) into a payload.
pub fn value_at<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Reads a numeric field, accepting integers and floats.
pub fn number_at(payload: &Payload, path: &str) -> Option<f64> {
    value_at(payload, path).and_then(Value::as_f64)
}

pub fn string_at<'a>(payload: &'a Payload, path: &str) -> Option<&'a str> {
    value_at(payload, path).and_then(Value::as_str)
}

/// Counts a field for Track A extraction: arrays count their length,
/// numbers count their value, anything else counts zero.
pub fn count_at(payload: &Payload, path: &str) -> u64 {
    match value_at(payload, path) {
        Some(Value::Array(items)) => items.len() as u64,
        Some(Value::Number(n)) => n.as_u64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as u64),
        _ => 0,
    }
}
