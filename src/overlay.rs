//! File-backed moderation overlays.
//!
//! Operators can drop a `blacklist.json` / `whitelist.json` next to the
//! fallback store to override or pre-seed the database tiers without a
//! deployment. Each file maps a session id to an ordered entry list; the
//! blacklist file reserves a `_global` key for the process-wide sensitive
//! word list. Missing or malformed files degrade silently to "no overlay
//! data" and the database tier takes over.

use std::collections::HashMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistRule {
    pub pattern: String,
    /// `username` for exact name bans, `message` for substring bans.
    #[serde(rename = "type", default = "default_rule_kind")]
    pub kind: String,
}

fn default_rule_kind() -> String {
    "message".into()
}

#[derive(Debug, Default, Deserialize)]
pub struct BlacklistFile {
    #[serde(rename = "_global", default)]
    pub global_sensitive: Vec<String>,
    #[serde(flatten)]
    pub sessions: HashMap<String, Vec<BlacklistRule>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaqOverlayEntry {
    pub pattern: String,
    pub answer: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub product_types: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhitelistFile {
    #[serde(flatten)]
    pub sessions: HashMap<String, Vec<FaqOverlayEntry>>,
}

/// Load an overlay file, treating any failure as an empty overlay.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return T::default(),
    };
    match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "overlay file unreadable, ignoring");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_file_splits_global_from_sessions() {
        let parsed: BlacklistFile = serde_json::from_str(
            r#"{
                "_global": ["广告", "加微信"],
                "s-1": [
                    {"pattern": "troll", "type": "username"},
                    {"pattern": "刷屏"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.global_sensitive, vec!["广告", "加微信"]);
        let rules = &parsed.sessions["s-1"];
        assert_eq!(rules[0].kind, "username");
        assert_eq!(rules[1].kind, "message");
    }

    #[test]
    fn missing_or_malformed_file_is_empty() {
        let missing: WhitelistFile = load(Path::new("/nonexistent/whitelist.json"));
        assert!(missing.sessions.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.json");
        std::fs::write(&path, "{ not json").unwrap();
        let malformed: WhitelistFile = load(&path);
        assert!(malformed.sessions.is_empty());
    }
}
