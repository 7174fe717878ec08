use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::repo::{Repo, RepoResult};

pub struct SettingDef {
    pub key: &'static str,
    pub default: &'static str,
    /// Whether the key is exposed on the unauthenticated endpoint.
    pub public: bool,
}

const fn def(key: &'static str, default: &'static str, public: bool) -> SettingDef {
    SettingDef { key, default, public }
}

/// The one authoritative table of known settings. Unknown keys can still
/// be stored and read back, but only these have defaults, and only the
/// public ones ever leave through the anonymous endpoint.
pub static SETTING_DEFS: &[SettingDef] = &[
    def("siteName", "Quill", true),
    def("siteDescription", "A quiet place to write", true),
    def("postsPerPage", "9", true),
    def("maintenance.enabled", "false", true),
    def("maintenance.message", "We'll be back shortly.", true),
    def("maintenance.allowAdmin", "true", false),
    def("comments.enabled", "true", true),
    def("comments.autoApprove", "false", false),
    def("comments.requireName", "true", false),
    def("profanity.enabled", "false", false),
    def("profanity.action", "moderate", false),
    def("profanity.customWords", "", false),
    def("spam.honeypot", "true", false),
    def("spam.rateLimit", "true", false),
    def("spam.blockLinks", "false", false),
    def("seo.sitemap", "true", false),
    def("seo.robots", "true", false),
    def("seo.jsonLd", "true", false),
    def("seo.gaId", "", false),
];

static DEF_INDEX: Lazy<HashMap<&'static str, &'static SettingDef>> =
    Lazy::new(|| SETTING_DEFS.iter().map(|d| (d.key, d)).collect());

pub fn default_for(key: &str) -> Option<&'static str> {
    DEF_INDEX.get(key).map(|d| d.default)
}

pub struct SettingsStore<'a> {
    repo: &'a dyn Repo,
}

impl<'a> SettingsStore<'a> {
    pub fn new(repo: &'a dyn Repo) -> Self {
        Self { repo }
    }

    /// Stored value, else compiled-in default, else empty string.
    pub async fn get(&self, key: &str) -> RepoResult<String> {
        if let Some(row) = self.repo.get_setting(key).await? {
            return Ok(row.value);
        }
        Ok(default_for(key).unwrap_or("").to_string())
    }

    pub async fn set(&self, key: &str, value: &str) -> RepoResult<()> {
        self.repo.upsert_setting(key, value).await
    }

    pub async fn update_many(&self, entries: &BTreeMap<String, String>) -> RepoResult<()> {
        for (key, value) in entries {
            self.repo.upsert_setting(key, value).await?;
        }
        Ok(())
    }

    /// Every known key with defaults applied, plus any stored stragglers.
    pub async fn get_all(&self) -> RepoResult<BTreeMap<String, String>> {
        let mut out: BTreeMap<String, String> = SETTING_DEFS
            .iter()
            .map(|d| (d.key.to_string(), d.default.to_string()))
            .collect();
        for row in self.repo.all_settings().await? {
            out.insert(row.key, row.value);
        }
        Ok(out)
    }

    /// Dot-namespaced keys nested one level; dotless keys land under
    /// "general".
    pub async fn get_grouped(&self) -> RepoResult<Value> {
        Ok(group(&self.get_all().await?))
    }

    /// Typed allow-listed subset for the anonymous endpoint.
    pub async fn public_view(&self) -> RepoResult<Value> {
        let all = self.get_all().await?;
        let get = |key: &str| all.get(key).cloned().unwrap_or_default();
        Ok(json!({
            "siteName": get("siteName"),
            "siteDescription": get("siteDescription"),
            "postsPerPage": get("postsPerPage").parse::<i64>().unwrap_or(9),
            "maintenance": {
                "enabled": get("maintenance.enabled") == "true",
                "message": get("maintenance.message"),
            },
            "comments": {
                "enabled": get("comments.enabled") == "true",
            },
        }))
    }
}

pub fn group(flat: &BTreeMap<String, String>) -> Value {
    let mut groups: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
    for (key, value) in flat {
        let (group, field) = match key.split_once('.') {
            Some((g, f)) => (g, f),
            None => ("general", key.as_str()),
        };
        groups
            .entry(group)
            .or_default()
            .insert(field.to_string(), Value::String(value.clone()));
    }
    Value::Object(
        groups
            .into_iter()
            .map(|(g, fields)| (g.to_string(), Value::Object(fields)))
            .collect(),
    )
}

/// Inverse of [`group`]: one level of nesting back to dotted keys, with the
/// "general" group mapping to dotless keys. Non-string leaves keep their
/// JSON text form.
pub fn flatten(body: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(obj) = body.as_object() else {
        return out;
    };
    for (group, fields) in obj {
        match fields.as_object() {
            Some(fields) => {
                for (field, v) in fields {
                    let key = if group == "general" {
                        field.clone()
                    } else {
                        format!("{group}.{field}")
                    };
                    out.insert(key, leaf_to_string(v));
                }
            }
            None => {
                out.insert(group.clone(), leaf_to_string(fields));
            }
        }
    }
    out
}

fn leaf_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_nests_dotted_keys_and_buckets_the_rest() {
        let mut flat = BTreeMap::new();
        flat.insert("siteName".to_string(), "Quill".to_string());
        flat.insert("maintenance.enabled".to_string(), "false".to_string());
        flat.insert("maintenance.message".to_string(), "brb".to_string());
        let grouped = group(&flat);
        assert_eq!(grouped["general"]["siteName"], "Quill");
        assert_eq!(grouped["maintenance"]["enabled"], "false");
        assert_eq!(grouped["maintenance"]["message"], "brb");
    }

    #[test]
    fn flatten_round_trips_grouped_shape() {
        let body = json!({
            "general": { "siteName": "Quill" },
            "comments": { "enabled": true, "autoApprove": "false" }
        });
        let flat = flatten(&body);
        assert_eq!(flat["siteName"], "Quill");
        assert_eq!(flat["comments.enabled"], "true");
        assert_eq!(flat["comments.autoApprove"], "false");
    }

    #[test]
    fn every_public_key_is_in_the_table() {
        for d in SETTING_DEFS.iter().filter(|d| d.public) {
            assert!(default_for(d.key).is_some());
        }
        assert_eq!(SETTING_DEFS.iter().filter(|d| d.public).count(), 6);
    }
}
