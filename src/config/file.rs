//! On-disk `.watchme.json` schema.
//!
//! Every key is optional at this level. Presence is enforced once, in
//! [`resolve`](super::ConfigSources::resolve).

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::WatcherKind;

/// Keys that may appear at the top level of a config file or inside a
/// named profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_regexes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watcher: Option<WatcherKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_transfers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_persist_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsync_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchman_command: Option<String>,
}

impl ProfileSettings {
    /// Fill every unset key from `fallback`.
    pub fn or(self, fallback: &ProfileSettings) -> ProfileSettings {
        let fallback = fallback.clone();
        ProfileSettings {
            host: self.host.or(fallback.host),
            user: self.user.or(fallback.user),
            remote_path: self.remote_path.or(fallback.remote_path),
            local_path: self.local_path.or(fallback.local_path),
            debug: self.debug.or(fallback.debug),
            ignore_regexes: self.ignore_regexes.or(fallback.ignore_regexes),
            watcher: self.watcher.or(fallback.watcher),
            max_concurrent_transfers: self
                .max_concurrent_transfers
                .or(fallback.max_concurrent_transfers),
            ssh_port: self.ssh_port.or(fallback.ssh_port),
            control_path: self.control_path.or(fallback.control_path),
            control_persist_secs: self.control_persist_secs.or(fallback.control_persist_secs),
            ssh_command: self.ssh_command.or(fallback.ssh_command),
            rsync_command: self.rsync_command.or(fallback.rsync_command),
            watchman_command: self.watchman_command.or(fallback.watchman_command),
        }
    }
}

/// One parsed config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub defaults: ProfileSettings,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ProfileSettings>,
}

impl ConfigFile {
    /// Read `path`. A missing file is `Ok(None)`; unreadable or invalid JSON
    /// is an error naming the file.
    pub fn load(path: &Path) -> Result<Option<ConfigFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let parsed = serde_json::from_str(&raw).map_err(|source| SyncError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(parsed))
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileSettings> {
        self.profiles.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_top_level_and_profiles() {
        let cfg: ConfigFile = serde_json::from_str(
            r#"{
                "host": "build",
                "user": "alice",
                "remote_path": "/srv/app",
                "type": "rsync",
                "profiles": { "docs": { "host": "docs-box", "debug": true } }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.defaults.host.as_deref(), Some("build"));
        assert_eq!(cfg.defaults.user.as_deref(), Some("alice"));
        let docs = cfg.profile("docs").unwrap();
        assert_eq!(docs.host.as_deref(), Some("docs-box"));
        assert_eq!(docs.debug, Some(true));
    }

    #[test]
    fn test_or_prefers_self() {
        let own = ProfileSettings {
            host: Some("a".into()),
            debug: Some(false),
            ..Default::default()
        };
        let fallback = ProfileSettings {
            host: Some("b".into()),
            user: Some("bob".into()),
            debug: Some(true),
            ..Default::default()
        };
        let merged = own.or(&fallback);
        assert_eq!(merged.host.as_deref(), Some("a"));
        assert_eq!(merged.user.as_deref(), Some("bob"));
        // false is a real value, not "unset"
        assert_eq!(merged.debug, Some(false));
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".watchme.json");
        assert!(ConfigFile::load(&path).unwrap().is_none());

        fs::write(&path, "{ not json").unwrap();
        match ConfigFile::load(&path) {
            Err(SyncError::Json { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Json error, got {:?}", other),
        }
    }
}
