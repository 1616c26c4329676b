//! `--init`: write a starter `.watchme.json`.

use super::{ConfigFile, ProfileSettings, CONFIG_FILE_NAME};
use crate::error::{Result, SyncError};
use crate::filter::DEFAULT_IGNORE_PATTERNS;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Starter config for `user`.
pub fn scaffold(user: &str) -> ConfigFile {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "profileA".to_string(),
        ProfileSettings {
            host: Some("hostA".to_string()),
            local_path: Some(format!("/home/{}/projectA", user)),
            remote_path: Some(format!("/home/{}/projectA", user)),
            ..Default::default()
        },
    );

    ConfigFile {
        defaults: ProfileSettings {
            user: Some(user.to_string()),
            host: Some("host".to_string()),
            remote_path: Some(format!("/home/{}", user)),
            debug: Some(true),
            ignore_regexes: Some(DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        },
        profiles,
    }
}

/// Write the starter config into `dir`. Never overwrites an existing file.
pub fn write_initial_config(dir: &Path, user: &str) -> Result<PathBuf> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(SyncError::Config(format!(
            "{} already exists, refusing to overwrite",
            path.display()
        )));
    }
    let body = serde_json::to_string_pretty(&scaffold(user)).map_err(|source| SyncError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, body + "\n")?;
    tracing::info!(path = %path.display(), "config initialized");
    Ok(path)
}
