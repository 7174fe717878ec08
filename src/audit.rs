use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{AuditAction, AuditEntity, NewAuditLog};
use crate::repo::Repo;

pub const REDACTED: &str = "[REDACTED]";

/// Exact, case-sensitive key names scrubbed from audit detail payloads.
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "apiKey", "passwordHash"];

/// Builder for the `{ before, after, metadata }` detail object.
#[derive(Default)]
pub struct Details {
    before: Option<Value>,
    after: Option<Value>,
    metadata: Option<Value>,
}

impl Details {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<T: Serialize>(mut self, v: &T) -> Self {
        self.before = serde_json::to_value(v).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, v: &T) -> Self {
        self.after = serde_json::to_value(v).ok();
        self
    }

    pub fn metadata(mut self, v: Value) -> Self {
        self.metadata = Some(v);
        self
    }

    pub fn build(self) -> Option<Value> {
        if self.before.is_none() && self.after.is_none() && self.metadata.is_none() {
            return None;
        }
        let mut out = serde_json::Map::new();
        if let Some(b) = self.before {
            out.insert("before".into(), b);
        }
        if let Some(a) = self.after {
            out.insert("after".into(), a);
        }
        if let Some(m) = self.metadata {
            out.insert("metadata".into(), m);
        }
        Some(Value::Object(out))
    }
}

/// Replaces sensitive values at the top level of before/after/metadata.
/// Nested objects are left alone; the keys are matched case-sensitively.
pub fn redact(details: &mut Value) {
    let Some(obj) = details.as_object_mut() else {
        return;
    };
    for section in ["before", "after", "metadata"] {
        if let Some(inner) = obj.get_mut(section).and_then(Value::as_object_mut) {
            for key in SENSITIVE_KEYS {
                if let Some(v) = inner.get_mut(*key) {
                    *v = json!(REDACTED);
                }
            }
        }
    }
}

/// Appends one audit row, best effort. The primary mutation has already
/// committed by the time this runs; a failed append is logged and dropped,
/// never surfaced to the client.
pub async fn record(
    repo: &dyn Repo,
    actor_id: Option<&str>,
    action: AuditAction,
    entity: AuditEntity,
    entity_id: Option<String>,
    details: Option<Value>,
    ip: Option<String>,
) {
    let mut details = details;
    if let Some(d) = details.as_mut() {
        redact(d);
    }
    let entry = NewAuditLog {
        actor_id: actor_id.map(str::to_string),
        action,
        entity,
        entity_id,
        details,
        ip_address: ip,
    };
    if let Err(e) = repo.insert_audit_log(entry).await {
        tracing::warn!(
            action = action.as_str(),
            entity = entity.as_str(),
            "audit append failed: {e}"
        );
    }
}

/// Char-safe prefix used for before/after content snapshots.
pub fn snippet(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_keys_are_scrubbed_in_each_section() {
        let mut details = json!({
            "before": { "password": "hunter2", "name": "ok" },
            "after": { "apiKey": "k-123", "passwordHash": "x" },
            "metadata": { "token": "t", "secret": "s" }
        });
        redact(&mut details);
        assert_eq!(details["before"]["password"], REDACTED);
        assert_eq!(details["before"]["name"], "ok");
        assert_eq!(details["after"]["apiKey"], REDACTED);
        assert_eq!(details["after"]["passwordHash"], REDACTED);
        assert_eq!(details["metadata"]["token"], REDACTED);
        assert_eq!(details["metadata"]["secret"], REDACTED);
    }

    #[test]
    fn redaction_is_case_sensitive_and_top_level_only() {
        let mut details = json!({
            "before": { "PASSWORD": "left", "nested": { "password": "left too" } }
        });
        redact(&mut details);
        assert_eq!(details["before"]["PASSWORD"], "left");
        assert_eq!(details["before"]["nested"]["password"], "left too");
    }

    #[test]
    fn empty_builder_yields_no_details() {
        assert!(Details::new().build().is_none());
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        assert_eq!(snippet("héllo wörld", 5), "héllo");
        assert_eq!(snippet("ab", 200), "ab");
    }
}
