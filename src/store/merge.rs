use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value, json};
use std::collections::HashSet;

pub const MERGE_HISTORY_KEY: &str = "merge_history";
const DEFAULT_HISTORY_CAP: usize = 50;

/// Controls the field-level merge rules. The score allowlist enumerates the
/// numeric fields the shipped sources actually emit; deployments with extra
/// sources extend it through configuration.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    score_keys: HashSet<String>,
    pub history_cap: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        let score_keys = [
            "pLI",
            "oe_lof",
            "oe_lof_upper",
            "mis_z",
            "score",
            "confidence_score",
            "percentile",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        MergePolicy {
            score_keys,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

impl MergePolicy {
    pub fn with_score_keys(keys: impl IntoIterator<Item = String>) -> Self {
        MergePolicy {
            score_keys: keys.into_iter().collect(),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    /// Merges an incoming payload into the existing one and appends a
    /// `merge_history` entry. Idempotent modulo the history tail: merging a
    /// payload with itself changes nothing but the history.
    pub fn merge(&self, existing: &Value, incoming: &Value, source: &str, version: u64) -> Value {
        let mut history = existing
            .get(MERGE_HISTORY_KEY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut merged = match (existing, incoming) {
            (Value::Object(e), Value::Object(n)) => {
                let mut stripped_e = e.clone();
                stripped_e.remove(MERGE_HISTORY_KEY);
                let mut stripped_n = n.clone();
                stripped_n.remove(MERGE_HISTORY_KEY);
                Value::Object(self.merge_objects(&stripped_e, &stripped_n))
            }
            _ => incoming.clone(),
        };

        history.push(json!({
            "merged_at": Utc::now().to_rfc3339(),
            "source": source,
            "version": version,
        }));
        if history.len() > self.history_cap {
            history.drain(..history.len() - self.history_cap);
        }
        if let Value::Object(map) = &mut merged {
            map.insert(MERGE_HISTORY_KEY.to_string(), Value::Array(history));
        }
        merged
    }

    fn merge_objects(&self, existing: &Map<String, Value>, incoming: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = existing.clone();
        for (key, new_value) in incoming {
            match existing.get(key) {
                Some(old_value) => {
                    merged.insert(key.clone(), self.merge_field(key, old_value, new_value));
                }
                None => {
                    merged.insert(key.clone(), new_value.clone());
                }
            }
        }
        merged
    }

    fn merge_field(&self, key: &str, existing: &Value, incoming: &Value) -> Value {
        match (existing, incoming) {
            (Value::Object(e), Value::Object(n)) => Value::Object(self.merge_objects(e, n)),
            (Value::Array(e), Value::Array(n)) => union_arrays(e, n),
            (Value::Number(e), Value::Number(n)) if self.score_keys.contains(key) => {
                let e_f = e.as_f64().unwrap_or(f64::MIN);
                let n_f = n.as_f64().unwrap_or(f64::MIN);
                if n_f > e_f {
                    incoming.clone()
                } else {
                    existing.clone()
                }
            }
            (Value::String(e), Value::String(n)) => match (parse_date(e), parse_date(n)) {
                (Some(e_date), Some(n_date)) if n_date > e_date => incoming.clone(),
                (Some(_), Some(_)) => existing.clone(),
                _ => incoming.clone(),
            },
            _ => incoming.clone(),
        }
    }
}

/// Set-union by canonical string form, order-stable: existing elements
/// first, then new elements in their incoming order.
fn union_arrays(existing: &[Value], incoming: &[Value]) -> Value {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<Value> = Vec::with_capacity(existing.len() + incoming.len());
    for item in existing.iter().chain(incoming.iter()) {
        let canonical = item.to_string();
        if seen.insert(canonical) {
            merged.push(item.clone());
        }
    }
    Value::Array(merged)
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    for format in crate::constants::DATE_FORMATS {
        if *format == "%+" {
            if let Ok(datetime) = DateTime::parse_from_str(text, format) {
                return Some(datetime.with_timezone(&Utc));
            }
        } else if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// Payload equality ignoring the `merge_history` tail, used by idempotence
/// checks and the unchanged-upsert shortcut.
pub fn payloads_equal_modulo_history(a: &Value, b: &Value) -> bool {
    strip_history(a) == strip_history(b)
}

fn strip_history(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut stripped = map.clone();
            stripped.remove(MERGE_HISTORY_KEY);
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}
