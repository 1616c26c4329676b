//! Profile resolution.
//!
//! Two optional JSON files feed one explicit [`Profile`] per requested name:
//! `./.watchme.json` (local) and `~/.watchme.json` (global). For every key the
//! first value found wins, in this order: local profile, local top level,
//! global profile, global top level. Required keys are checked and ignore
//! patterns compiled here, once; nothing downstream re-validates.

pub mod file;
pub mod init;

pub use file::{ConfigFile, ProfileSettings};

use crate::error::{Result, SyncError};
use crate::filter::IgnoreRules;
use crate::path::{expand_tilde, with_trailing_slash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = ".watchme.json";
pub const MAIN_PROFILE: &str = "main";

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONTROL_PATH: &str = "~/.ssh/cs-%h-%r";
pub const DEFAULT_CONTROL_PERSIST_SECS: u64 = 300;
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 8;

/// Which change-notification service feeds a profile's watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherKind {
    #[default]
    Watchman,
    Notify,
}

/// Connection settings for the multiplexed ssh channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub port: u16,
    /// ControlPath template, `%h`/`%r` left for ssh to expand.
    pub control_path: String,
    /// Idle time after which the master connection closes itself.
    pub control_persist: Duration,
    pub ssh_command: String,
    pub rsync_command: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            control_path: DEFAULT_CONTROL_PATH.to_string(),
            control_persist: Duration::from_secs(DEFAULT_CONTROL_PERSIST_SECS),
            ssh_command: "ssh".to_string(),
            rsync_command: "rsync".to_string(),
        }
    }
}

/// A fully resolved sync target. Immutable once built.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub host: String,
    pub user: String,
    pub local_path: PathBuf,
    /// Always ends with `/`.
    pub remote_path: String,
    pub ignore: IgnoreRules,
    pub debug: bool,
    pub watcher: WatcherKind,
    pub watchman_command: String,
    pub max_concurrent_transfers: usize,
    pub ssh: SshOptions,
}

impl Profile {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host:/remote/path/`
    pub fn remote_spec(&self) -> String {
        format!("{}:{}", self.destination(), self.remote_path)
    }

    /// Local root rendered with a trailing `/`, as rsync expects.
    pub fn local_root_arg(&self) -> String {
        with_trailing_slash(&self.local_path.to_string_lossy())
    }

    /// Build a profile from already-merged settings.
    pub fn from_settings(name: &str, settings: ProfileSettings, cwd: &Path) -> Result<Profile> {
        let missing: Vec<&str> = [
            ("host", settings.host.is_none()),
            ("user", settings.user.is_none()),
            ("remote_path", settings.remote_path.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(key, _)| *key)
        .collect();
        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "profile '{}' is missing required keys: {}",
                name,
                missing.join(", ")
            )));
        }

        let host = non_empty(name, "host", settings.host)?;
        let user = non_empty(name, "user", settings.user)?;
        let remote_path = with_trailing_slash(&non_empty(name, "remote_path", settings.remote_path)?);

        let local_path = match settings.local_path {
            Some(p) if !p.is_empty() => cwd.join(expand_tilde(&p)),
            _ => cwd.to_path_buf(),
        };

        let ignore = match settings.ignore_regexes {
            Some(patterns) => IgnoreRules::compile(patterns)?,
            None => IgnoreRules::defaults(),
        };

        let max_concurrent_transfers = settings
            .max_concurrent_transfers
            .unwrap_or(DEFAULT_MAX_CONCURRENT_TRANSFERS);
        if max_concurrent_transfers == 0 {
            return Err(SyncError::Config(format!(
                "profile '{}': max_concurrent_transfers must be at least 1",
                name
            )));
        }

        let persist = settings
            .control_persist_secs
            .unwrap_or(DEFAULT_CONTROL_PERSIST_SECS);
        if persist < 5 {
            return Err(SyncError::Config(format!(
                "profile '{}': control_persist_secs must be at least 5",
                name
            )));
        }

        let defaults = SshOptions::default();
        Ok(Profile {
            name: name.to_string(),
            host,
            user,
            local_path,
            remote_path,
            ignore,
            debug: settings.debug.unwrap_or(false),
            watcher: settings.watcher.unwrap_or_default(),
            watchman_command: settings
                .watchman_command
                .unwrap_or_else(|| "watchman".to_string()),
            max_concurrent_transfers,
            ssh: SshOptions {
                port: settings.ssh_port.unwrap_or(defaults.port),
                control_path: settings.control_path.unwrap_or(defaults.control_path),
                control_persist: Duration::from_secs(persist),
                ssh_command: settings.ssh_command.unwrap_or(defaults.ssh_command),
                rsync_command: settings.rsync_command.unwrap_or(defaults.rsync_command),
            },
        })
    }
}

fn non_empty(profile: &str, key: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SyncError::Config(format!(
            "profile '{}': '{}' must not be empty",
            profile, key
        ))),
    }
}

/// The local and global config files plus the directory relative paths
/// resolve against.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub local: ConfigFile,
    pub global: ConfigFile,
    pub cwd: PathBuf,
}

impl ConfigSources {
    /// Load `<cwd>/.watchme.json` and `~/.watchme.json`.
    pub fn load(cwd: &Path) -> Result<Self> {
        let global = dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME));
        Self::from_paths(&cwd.join(CONFIG_FILE_NAME), global.as_deref(), cwd)
    }

    pub fn from_paths(local: &Path, global: Option<&Path>, cwd: &Path) -> Result<Self> {
        let local = ConfigFile::load(local)?.unwrap_or_default();
        let global = match global {
            Some(path) => ConfigFile::load(path)?.unwrap_or_default(),
            None => ConfigFile::default(),
        };
        Ok(Self {
            local,
            global,
            cwd: cwd.to_path_buf(),
        })
    }

    /// Every profile name either file defines, plus `main`.
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.insert(MAIN_PROFILE.to_string());
        names.extend(self.local.profiles.keys().cloned());
        names.extend(self.global.profiles.keys().cloned());
        names.into_iter().collect()
    }

    /// Merge the four layers for one profile name.
    pub fn merged(&self, name: &str) -> Option<ProfileSettings> {
        let local = self.local.profile(name);
        let global = self.global.profile(name);
        if local.is_none() && global.is_none() && name != MAIN_PROFILE {
            return None;
        }
        let empty = ProfileSettings::default();
        Some(
            local
                .cloned()
                .unwrap_or_default()
                .or(&self.local.defaults)
                .or(global.unwrap_or(&empty))
                .or(&self.global.defaults),
        )
    }

    /// Resolve the requested profile names (`main` if none).
    pub fn resolve(&self, requested: &[String]) -> Result<Vec<Profile>> {
        let mut names: Vec<&str> = requested
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            names.push(MAIN_PROFILE);
        }

        let mut seen = BTreeSet::new();
        let mut profiles = Vec::with_capacity(names.len());
        for name in names {
            if !seen.insert(name) {
                continue;
            }
            let settings = self.merged(name).ok_or_else(|| {
                SyncError::Config(format!(
                    "profile '{}' is not defined in {}",
                    name, CONFIG_FILE_NAME
                ))
            })?;
            profiles.push(Profile::from_settings(name, settings, &self.cwd)?);
        }
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sources(local: &str, global: &str) -> (TempDir, ConfigSources) {
        let tmp = TempDir::new().unwrap();
        let local_path = tmp.path().join("local.json");
        let global_path = tmp.path().join("global.json");
        fs::write(&local_path, local).unwrap();
        fs::write(&global_path, global).unwrap();
        let src = ConfigSources::from_paths(&local_path, Some(&global_path), tmp.path()).unwrap();
        (tmp, src)
    }

    #[test]
    fn test_main_profile_from_top_level() {
        let (tmp, src) = sources(
            r#"{"host": "build", "user": "alice", "remote_path": "/srv/app"}"#,
            "{}",
        );
        let profiles = src.resolve(&[]).unwrap();
        assert_eq!(profiles.len(), 1);
        let p = &profiles[0];
        assert_eq!(p.name, "main");
        assert_eq!(p.remote_path, "/srv/app/");
        assert_eq!(p.local_path, tmp.path());
        assert_eq!(p.remote_spec(), "alice@build:/srv/app/");
        assert!(!p.debug);
        assert_eq!(p.watcher, WatcherKind::Watchman);
        assert_eq!(p.ssh.port, 22);
        assert_eq!(p.ssh.control_persist, Duration::from_secs(300));
        // default ignore set applies when none is given
        assert!(p.ignore.should_ignore("node_modules/x.js"));
    }

    #[test]
    fn test_layer_precedence() {
        let (_tmp, src) = sources(
            r#"{
                "user": "local-user",
                "profiles": { "api": { "remote_path": "/srv/api" } }
            }"#,
            r#"{
                "host": "global-host",
                "user": "global-user",
                "remote_path": "/global",
                "debug": true,
                "profiles": { "api": { "host": "api-host", "user": "api-global-user" } }
            }"#,
        );
        let p = src.resolve(&["api".to_string()]).unwrap().remove(0);
        assert_eq!(p.remote_path, "/srv/api/");
        // local top level beats the global profile
        assert_eq!(p.user, "local-user");
        assert_eq!(p.host, "api-host");
        assert!(p.debug);
    }

    #[test]
    fn test_unknown_profile_is_error() {
        let (_tmp, src) = sources(
            r#"{"host": "h", "user": "u", "remote_path": "/r"}"#,
            "{}",
        );
        let err = src.resolve(&["nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("'nope' is not defined"));
    }

    #[test]
    fn test_missing_required_keys_listed() {
        let (_tmp, src) = sources(r#"{"host": "h"}"#, "{}");
        let err = src.resolve(&[]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("user"));
        assert!(msg.contains("remote_path"));
    }

    #[test]
    fn test_bad_pattern_fails_at_resolution() {
        let (_tmp, src) = sources(
            r#"{"host": "h", "user": "u", "remote_path": "/r", "ignore_regexes": ["[z-a]"]}"#,
            "{}",
        );
        assert!(matches!(src.resolve(&[]), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_multiple_profiles_and_duplicates() {
        let (_tmp, src) = sources(
            r#"{
                "host": "h", "user": "u", "remote_path": "/r",
                "profiles": { "a": {}, "b": { "local_path": "sub" } }
            }"#,
            "{}",
        );
        let profiles = src
            .resolve(&["a".into(), "b".into(), "a".into(), " ".into()])
            .unwrap();
        assert_eq!(profiles.len(), 2);
        assert!(profiles[1].local_path.ends_with("sub"));
        assert_eq!(src.profile_names(), vec!["a", "b", "main"]);
    }
}
