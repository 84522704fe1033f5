//! Meta-patch sanitization: scalar-only, PII-free, truncated, size-bounded.
//!
//! Raw patches arrive as JSON objects from the event pipeline. Only booleans,
//! finite numbers and short strings survive; strings that look like an email
//! address, URL, IP address or phone number are dropped outright. A patch whose
//! serialized form exceeds the byte budget is discarded as a whole.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::types::{Meta, MetaValue};

/// Appended to strings cut at the character limit.
pub const ELLIPSIS: char = '…';

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}")
        .expect("Invalid regex")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?|ftp|wss?|rtsp|mqtt)://|\bwww\.[a-z0-9-]+\.").expect("Invalid regex")
});

static IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("Invalid regex"));

static IPV6_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[0-9a-f]{1,4}:){3,7}[0-9a-f]{1,4}\b|\b[0-9a-f]{1,4}::[0-9a-f:]*")
        .expect("Invalid regex")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().-]{6,}\d").expect("Invalid regex"));

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("Invalid regex"));

/// True if `s` looks like personal or network-identifying data.
pub fn is_sensitive(s: &str) -> bool {
    if EMAIL_RE.is_match(s) || URL_RE.is_match(s) || IPV4_RE.is_match(s) || IPV6_RE.is_match(s)
    {
        return true;
    }
    PHONE_RE.find_iter(s).any(|m| {
        let candidate = m.as_str();
        let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
        (9..=15).contains(&digits) && !ISO_DATE_RE.is_match(candidate.trim_start_matches('+'))
    })
}

/// Cut `s` to `max_chars` characters, marking the cut with [`ELLIPSIS`].
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push(ELLIPSIS);
    out
}

/// Serialized size of a meta map in bytes.
pub fn meta_size(meta: &Meta) -> usize {
    serde_json::to_vec(meta).map(|v| v.len()).unwrap_or(usize::MAX)
}

fn sanitize_value(value: &Value, max_chars: usize) -> Option<MetaValue> {
    match value {
        Value::Bool(b) => Some(MetaValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(MetaValue::Int(i))
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(MetaValue::Float)
            }
        }
        Value::String(s) => {
            if is_sensitive(s) {
                None
            } else {
                Some(MetaValue::Text(truncate(s, max_chars)))
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Sanitize a raw patch. Returns `None` when the surviving entries exceed
/// `max_bytes` once serialized; the caller must then drop the patch entirely.
pub fn sanitize_meta(patch: &Map<String, Value>, max_bytes: usize, max_chars: usize) -> Option<Meta> {
    let mut meta = Meta::new();
    for (key, value) in patch {
        if key.is_empty() || is_sensitive(key) {
            continue;
        }
        if let Some(v) = sanitize_value(value, max_chars) {
            meta.0.insert(truncate(key, max_chars), v);
        }
    }
    if meta_size(&meta) > max_bytes {
        tracing::debug!(
            entries = meta.len(),
            max_bytes,
            "meta patch over budget, discarded"
        );
        return None;
    }
    Some(meta)
}

/// Merge an already-sanitized patch over `existing`. Returns `None` when the
/// merged map would exceed `max_bytes`, in which case `existing` is kept as-is.
pub fn merge_meta(existing: &Meta, patch: Meta, max_bytes: usize) -> Option<Meta> {
    if patch.is_empty() {
        return Some(existing.clone());
    }
    let mut merged = existing.clone();
    merged.0.extend(patch.0);
    if meta_size(&merged) > max_bytes {
        tracing::debug!(max_bytes, "merged meta over budget, patch dropped");
        return None;
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_keeps_scalars_drops_structures() {
        let meta = sanitize_meta(
            &patch(json!({
                "on": true,
                "brightness": 180,
                "temp": 21.5,
                "state": "heat",
                "attrs": {"a": 1},
                "list": [1, 2],
                "nothing": null
            })),
            2048,
            120,
        )
        .unwrap();

        assert_eq!(meta.len(), 4);
        assert_eq!(meta.get("on"), Some(&MetaValue::Bool(true)));
        assert_eq!(meta.get("brightness"), Some(&MetaValue::Int(180)));
        assert_eq!(meta.get("temp"), Some(&MetaValue::Float(21.5)));
        assert!(meta.get("attrs").is_none());
    }

    #[test]
    fn test_drops_pii_strings() {
        let meta = sanitize_meta(
            &patch(json!({
                "email": "someone@example.com",
                "url": "https://camera.local/stream",
                "www": "see www.example.org/page",
                "ip": "192.168.1.20",
                "ipv6": "fe80:0:0:0:200:f8ff:fe21:67cf",
                "phone": "+1 (555) 123-4567",
                "date": "2024-01-05",
                "clock": "10:00:00",
                "mode": "away"
            })),
            2048,
            120,
        )
        .unwrap();

        let keys: Vec<&String> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["clock", "date", "mode"]);
    }

    #[test]
    fn test_truncates_long_strings() {
        let long = "x".repeat(200);
        let meta = sanitize_meta(&patch(json!({ "note": long })), 2048, 120).unwrap();
        match meta.get("note") {
            Some(MetaValue::Text(s)) => {
                assert_eq!(s.chars().count(), 121);
                assert!(s.ends_with(ELLIPSIS));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "äöü".repeat(50);
        let t = truncate(&s, 10);
        assert_eq!(t.chars().count(), 11);
    }

    #[test]
    fn test_over_budget_patch_discarded_whole() {
        let mut raw = Map::new();
        for i in 0..40 {
            raw.insert(format!("key_{i}"), Value::String("v".repeat(100)));
        }
        assert!(sanitize_meta(&raw, 2048, 120).is_none());
    }

    #[test]
    fn test_merge_over_budget_keeps_existing() {
        let mut raw = Map::new();
        for i in 0..15 {
            raw.insert(format!("a_{i}"), Value::String("v".repeat(100)));
        }
        let existing = sanitize_meta(&raw, 2048, 120).unwrap();

        let mut raw2 = Map::new();
        for i in 0..15 {
            raw2.insert(format!("b_{i}"), Value::String("w".repeat(100)));
        }
        let patch = sanitize_meta(&raw2, 2048, 120).unwrap();

        assert!(merge_meta(&existing, patch, 2048).is_none());
    }

    #[test]
    fn test_merge_overwrites_keys() {
        let existing = sanitize_meta(&patch(json!({"state": "off", "n": 1})), 2048, 120).unwrap();
        let p = sanitize_meta(&patch(json!({"state": "on"})), 2048, 120).unwrap();
        let merged = merge_meta(&existing, p, 2048).unwrap();
        assert_eq!(merged.get("state"), Some(&MetaValue::Text("on".into())));
        assert_eq!(merged.get("n"), Some(&MetaValue::Int(1)));
    }
}
