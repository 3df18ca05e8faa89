//! Tolerant readers for loosely-typed control plane responses
//!
//! Responses are walked as generic JSON instead of being bound to a schema.
//! A key matches case-insensitively after trimming. At each object the
//! current level is checked before descending into children, and children
//! are visited in key order. The first match wins, even when it belongs to
//! an unrelated nested object that happens to share the key name.

use serde_json::{Map, Value};

/// Parse a response body: empty → None, JSON → value, else the trimmed text
pub fn decode_maybe_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
}

fn key_matches(key: &str, candidates: &[&str]) -> bool {
    let normalized = key.trim();
    candidates
        .iter()
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(normalized))
}

/// Depth-first search for the first value accepted by `pick` under any candidate key
fn find_first<T>(
    value: &Value,
    keys: &[&str],
    pick: &dyn Fn(&Value) -> Option<T>,
) -> Option<T> {
    match value {
        Value::Object(map) => {
            let here = map
                .iter()
                .filter(|(key, _)| key_matches(key, keys))
                .find_map(|(_, child)| pick(child));
            here.or_else(|| map.values().find_map(|child| find_first(child, keys, pick)))
        }
        Value::Array(items) => items.iter().find_map(|child| find_first(child, keys, pick)),
        _ => None,
    }
}

/// First non-blank string under any of `keys`, trimmed
pub fn find_first_string(value: &Value, keys: &[&str]) -> Option<String> {
    find_first(value, keys, &|child| {
        child
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// First boolean under any of `keys`
pub fn find_first_bool(value: &Value, keys: &[&str]) -> Option<bool> {
    find_first(value, keys, &Value::as_bool)
}

/// True when some object has `name == expected` next to an `endpoint` or `id`
pub fn payload_contains_destination_name(value: &Value, expected: &str) -> bool {
    let target = expected.trim();
    if target.is_empty() {
        return false;
    }
    match value {
        Value::Object(map) => {
            object_names_destination(map, target)
                || map
                    .values()
                    .any(|child| payload_contains_destination_name(child, target))
        }
        Value::Array(items) => items
            .iter()
            .any(|child| payload_contains_destination_name(child, target)),
        _ => false,
    }
}

fn object_names_destination(map: &Map<String, Value>, target: &str) -> bool {
    let named = map
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| name.trim() == target);
    named && (map.contains_key("endpoint") || map.contains_key("id"))
}

/// Summary row for a destination found in a list response
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DestinationRecord {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_ssl_verification: Option<bool>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
}

impl DestinationRecord {
    fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let field = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let record = Self {
            id: field("id"),
            name: field("name"),
            endpoint: field("endpoint"),
            log_format: field("log_format"),
            skip_ssl_verification: map.get("skip_ssl_verification").and_then(Value::as_bool),
            created_at: field("created_at"),
            updated_at: field("updated_at"),
        };
        if record.endpoint.is_empty() || (record.id.is_empty() && record.name.is_empty()) {
            return None;
        }
        Some(record)
    }

    fn dedup_key(&self) -> String {
        if self.id.is_empty() {
            format!("name:endpoint:{}|{}", self.name, self.endpoint)
        } else {
            format!("id:{}", self.id)
        }
    }
}

/// Every destination-shaped object in `payload`, deduplicated and sorted
/// by lowercased name, then lowercased id.
pub fn extract_destination_records(payloads: &[Value]) -> Vec<DestinationRecord> {
    fn walk(node: &Value, out: &mut Vec<DestinationRecord>) {
        match node {
            Value::Object(map) => match DestinationRecord::from_map(map) {
                Some(record) => out.push(record),
                None => map.values().for_each(|child| walk(child, out)),
            },
            Value::Array(items) => items.iter().for_each(|child| walk(child, out)),
            _ => {}
        }
    }

    let mut found = Vec::new();
    for payload in payloads {
        walk(payload, &mut found);
    }

    let mut seen = std::collections::HashSet::new();
    let mut records: Vec<DestinationRecord> = found
        .into_iter()
        .filter(|record| seen.insert(record.dedup_key()))
        .collect();
    records.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.to_lowercase().cmp(&b.id.to_lowercase()))
    });
    records
}

/// Regional webhook singleton as read back from the control plane
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WebhookConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_ssl_verification: Option<bool>,
    #[serde(rename = "audit_log_destination_id", skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl WebhookConfig {
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            enabled: find_first_bool(payload, &["enabled"]),
            endpoint: find_first_string(payload, &["endpoint"]),
            log_format: find_first_string(payload, &["log_format"]),
            skip_ssl_verification: find_first_bool(payload, &["skip_ssl_verification"]),
            destination_id: find_first_string(
                payload,
                &["audit_log_destination_id", "destination_id"],
            ),
            updated_at: find_first_string(payload, &["updated_at"]),
        }
    }

    /// Free for us to take: disabled and pointing at the `unconfigured` sentinel.
    /// A missing `enabled` reads as disabled.
    pub fn is_unconfigured(&self) -> bool {
        !self.enabled.unwrap_or(false)
            && self
                .endpoint
                .as_deref()
                .is_some_and(|e| e.trim().eq_ignore_ascii_case("unconfigured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_maybe_json() {
        assert_eq!(decode_maybe_json("  "), None);
        assert_eq!(decode_maybe_json(" {\"a\":1} "), Some(json!({"a": 1})));
        assert_eq!(decode_maybe_json(" plain text "), Some(json!("plain text")));
    }

    #[test]
    fn test_find_first_string_prefers_current_level() {
        let payload = json!({
            "data": {"id": "nested"},
            "ID": "  top  ",
        });
        assert_eq!(find_first_string(&payload, &["id"]).as_deref(), Some("top"));
    }

    #[test]
    fn test_find_first_string_candidate_keys() {
        let payload = json!({"data": [{"meta": {}}, {"audit_log_destination_id": "dest-9"}]});
        assert_eq!(
            find_first_string(&payload, &["id", "audit_log_destination_id", "destination_id"])
                .as_deref(),
            Some("dest-9")
        );
        // Blank and non-string values are skipped
        let payload = json!({"id": "  ", "inner": {"id": 7}, "other": {"id": "x"}});
        assert_eq!(find_first_string(&payload, &["id"]).as_deref(), Some("x"));
    }

    #[test]
    fn test_find_first_bool() {
        let payload = json!({"config": {"Enabled": true}});
        assert_eq!(find_first_bool(&payload, &["enabled"]), Some(true));
        assert_eq!(find_first_bool(&json!({"enabled": "yes"}), &["enabled"]), None);
    }

    #[test]
    fn test_destination_name_requires_sibling() {
        let listing = json!({"data": [
            {"name": "kongctl-host-1", "endpoint": "https://a"},
            {"labels": {"name": "kongctl-host-2"}},
            {"name": "kongctl-host-3", "id": "d3"},
        ]});
        assert!(payload_contains_destination_name(&listing, "kongctl-host-1"));
        assert!(!payload_contains_destination_name(&listing, "kongctl-host-2"));
        assert!(payload_contains_destination_name(&listing, " kongctl-host-3 "));
        assert!(!payload_contains_destination_name(&listing, ""));
    }

    #[test]
    fn test_extract_destination_records() {
        let page1 = json!({"data": [
            {"id": "b2", "name": "Beta", "endpoint": "https://b", "skip_ssl_verification": true},
            {"id": "a1", "name": "alpha", "endpoint": "https://a"},
        ]});
        let page2 = json!({"data": [
            {"id": "a1", "name": "alpha", "endpoint": "https://a"},
            {"name": "no-endpoint", "id": "zz"},
        ]});
        let records = extract_destination_records(&[page1, page2]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a1");
        assert_eq!(records[1].name, "Beta");
        assert_eq!(records[1].skip_ssl_verification, Some(true));
    }

    #[test]
    fn test_webhook_unconfigured_guard() {
        let free = WebhookConfig::from_payload(&json!({"enabled": false, "endpoint": "UNCONFIGURED"}));
        assert!(free.is_unconfigured());

        let missing_enabled = WebhookConfig::from_payload(&json!({"endpoint": "unconfigured"}));
        assert!(missing_enabled.is_unconfigured());

        let active = WebhookConfig::from_payload(&json!({
            "enabled": true,
            "endpoint": "https://siem.example.com",
            "audit_log_destination_id": "d1",
        }));
        assert!(!active.is_unconfigured());
        assert_eq!(active.destination_id.as_deref(), Some("d1"));

        let disabled_elsewhere =
            WebhookConfig::from_payload(&json!({"enabled": false, "endpoint": "https://x"}));
        assert!(!disabled_elsewhere.is_unconfigured());
    }
}
