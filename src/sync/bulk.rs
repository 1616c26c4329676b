//! One-shot full-tree upload and download.
//!
//! Enumerate, filter, write a manifest, hand the manifest to a single batched
//! transfer, remove the manifest. Nothing is compared against the other side;
//! rsync's own quick check keeps a repeated run from changing anything.

use super::manifest::{Manifest, DOWNLOAD_MANIFEST, UPLOAD_MANIFEST};
use crate::config::Profile;
use crate::error::{Result, SyncError};
use crate::path::relative_to;
use crate::ssh::{CredentialRelay, RemoteSession};
use crate::transport::{RsyncTransport, Transport};
use ignore::WalkBuilder;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn manifest_name(self) -> &'static str {
        match self {
            Direction::Upload => UPLOAD_MANIFEST,
            Direction::Download => DOWNLOAD_MANIFEST,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// Summary of a completed bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReport {
    pub direction: Direction,
    /// Files found on the source side.
    pub enumerated: usize,
    /// Files named in the manifest.
    pub transferred: usize,
    pub duration: Duration,
}

/// Push every non-ignored local file to the remote root.
pub async fn upload_all(profiles: &[Profile], relay: &mut CredentialRelay) -> Result<BulkReport> {
    let profile = single_profile(profiles, Direction::Upload)?;
    let transport = connect(profile, relay).await?;
    upload_with(profile, &transport).await
}

/// Pull every non-ignored remote file into the local root.
pub async fn download_all(
    profiles: &[Profile],
    relay: &mut CredentialRelay,
) -> Result<BulkReport> {
    let profile = single_profile(profiles, Direction::Download)?;
    let transport = connect(profile, relay).await?;
    download_with(profile, &transport).await
}

/// Bulk operations take exactly one profile; anything else is rejected
/// before a connection is attempted.
fn single_profile(profiles: &[Profile], direction: Direction) -> Result<&Profile> {
    match profiles {
        [profile] => Ok(profile),
        [] => Err(SyncError::Config(format!("{} needs a profile", direction))),
        _ => Err(SyncError::Config(format!(
            "{} supports a single profile, got {}",
            direction,
            profiles.len()
        ))),
    }
}

async fn connect(profile: &Profile, relay: &mut CredentialRelay) -> Result<RsyncTransport> {
    let session = RemoteSession::new(profile);
    let channel = session.authenticate(relay).await?;
    Ok(RsyncTransport::new(profile, channel))
}

pub async fn upload_with<T: Transport + ?Sized>(
    profile: &Profile,
    transport: &T,
) -> Result<BulkReport> {
    let started = Instant::now();
    let files = list_local_files(&profile.local_path).await?;
    run_bulk(profile, transport, Direction::Upload, files, started).await
}

pub async fn download_with<T: Transport + ?Sized>(
    profile: &Profile,
    transport: &T,
) -> Result<BulkReport> {
    let started = Instant::now();
    let files = transport.list_remote_files().await?;
    tokio::fs::create_dir_all(&profile.local_path).await?;
    run_bulk(profile, transport, Direction::Download, files, started).await
}

async fn run_bulk<T: Transport + ?Sized>(
    profile: &Profile,
    transport: &T,
    direction: Direction,
    files: Vec<String>,
    started: Instant,
) -> Result<BulkReport> {
    let enumerated = files.len();
    let selected: Vec<String> = files
        .into_iter()
        .filter(|path| !profile.ignore.should_ignore(path))
        .collect();
    tracing::debug!(
        profile = %profile.name,
        enumerated,
        selected = selected.len(),
        "{} file list filtered",
        direction
    );

    let mut report = BulkReport {
        direction,
        enumerated,
        transferred: selected.len(),
        duration: Duration::ZERO,
    };
    if selected.is_empty() {
        tracing::info!(profile = %profile.name, "nothing to {}", direction);
        report.duration = started.elapsed();
        return Ok(report);
    }

    let manifest = Manifest::write(&profile.local_path, direction.manifest_name(), selected)?;
    report.transferred = manifest.len();
    tracing::info!(
        profile = %profile.name,
        files = manifest.len(),
        manifest = %manifest.path().display(),
        "{} started",
        direction
    );

    let result = match direction {
        Direction::Upload => transport.push_manifest(manifest.path()).await,
        Direction::Download => transport.pull_manifest(manifest.path()).await,
    };
    drop(manifest);
    result?;

    report.duration = started.elapsed();
    tracing::info!(
        profile = %profile.name,
        files = report.transferred,
        elapsed = ?report.duration,
        "{} complete",
        direction
    );
    Ok(report)
}

/// Every regular file under `root`, relative to it. Hidden files and
/// `.gitignore`d files are included; ignore rules are applied by the caller.
pub async fn list_local_files(root: &Path) -> Result<Vec<String>> {
    let owned = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_local(&owned))
        .await
        .map_err(|e| SyncError::Enumeration {
            root: root.display().to_string(),
            reason: e.to_string(),
        })?
}

fn walk_local(root: &Path) -> Result<Vec<String>> {
    let enumeration = |reason: String| SyncError::Enumeration {
        root: root.display().to_string(),
        reason,
    };
    if !root.is_dir() {
        return Err(enumeration("not a directory".into()));
    }

    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .build();
    for entry in walker {
        let entry = entry.map_err(|e| enumeration(e.to_string()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Some(rel) = relative_to(root, entry.path()) {
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileSettings;
    use crate::error::TransferFailure;
    use async_trait::async_trait;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Captures manifest contents at transfer time.
    #[derive(Default)]
    struct ManifestRecorder {
        seen: Mutex<Vec<(PathBuf, String)>>,
        remote: Vec<String>,
        fail: bool,
    }

    impl ManifestRecorder {
        fn capture(&self, manifest: &Path) -> Result<()> {
            let body = fs::read_to_string(manifest)?;
            self.seen
                .lock()
                .unwrap()
                .push((manifest.to_path_buf(), body));
            if self.fail {
                Err(SyncError::Transfer {
                    path: manifest.display().to_string(),
                    reason: "rsync error: some files could not be transferred".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Transport for ManifestRecorder {
        async fn push_file(&self, _relative: &str) -> std::result::Result<(), TransferFailure> {
            unreachable!("bulk sync never copies single files")
        }

        async fn push_manifest(&self, manifest: &Path) -> Result<()> {
            self.capture(manifest)
        }

        async fn pull_manifest(&self, manifest: &Path) -> Result<()> {
            self.capture(manifest)
        }

        async fn list_remote_files(&self) -> Result<Vec<String>> {
            Ok(self.remote.clone())
        }
    }

    fn profile(root: &Path) -> Profile {
        let settings = ProfileSettings {
            host: Some("build".into()),
            user: Some("alice".into()),
            remote_path: Some("/srv".into()),
            local_path: Some(root.to_string_lossy().into_owned()),
            ..Default::default()
        };
        Profile::from_settings("main", settings, Path::new("/")).unwrap()
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    #[tokio::test]
    async fn test_upload_manifest_uses_default_ignores() {
        let tmp = TempDir::new().unwrap();
        for rel in ["a.txt", "node_modules/x.js", ".watchme.json"] {
            touch(tmp.path(), rel);
        }
        let recorder = ManifestRecorder::default();

        let report = upload_with(&profile(tmp.path()), &recorder).await.unwrap();

        assert_eq!(report.enumerated, 3);
        assert_eq!(report.transferred, 1);
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, tmp.path().join(UPLOAD_MANIFEST));
        assert_eq!(seen[0].1, "a.txt\n");
        assert!(!tmp.path().join(UPLOAD_MANIFEST).exists());
    }

    #[tokio::test]
    async fn test_manifest_removed_after_failed_transfer() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/main.rs");
        let recorder = ManifestRecorder {
            fail: true,
            ..Default::default()
        };

        let err = upload_with(&profile(tmp.path()), &recorder).await.unwrap_err();
        assert!(matches!(err, SyncError::Transfer { .. }));
        assert!(!tmp.path().join(UPLOAD_MANIFEST).exists());
    }

    #[tokio::test]
    async fn test_download_filters_remote_listing() {
        let tmp = TempDir::new().unwrap();
        let recorder = ManifestRecorder {
            remote: vec![
                "docs/readme.md".into(),
                ".git/HEAD".into(),
                "app/__pycache__/m.pyc".into(),
            ],
            ..Default::default()
        };

        let report = download_with(&profile(tmp.path()), &recorder).await.unwrap();
        assert_eq!(report.direction, Direction::Download);
        assert_eq!(report.transferred, 1);
        assert_eq!(recorder.seen.lock().unwrap()[0].1, "docs/readme.md\n");
        assert!(!tmp.path().join(DOWNLOAD_MANIFEST).exists());
    }

    #[tokio::test]
    async fn test_repeated_upload_sends_same_manifest() {
        let tmp = TempDir::new().unwrap();
        for rel in ["b.txt", "a/c.txt"] {
            touch(tmp.path(), rel);
        }
        let recorder = ManifestRecorder::default();
        let p = profile(tmp.path());

        upload_with(&p, &recorder).await.unwrap();
        upload_with(&p, &recorder).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].1, seen[1].1);
    }

    #[tokio::test]
    async fn test_two_profiles_rejected_before_connecting() {
        let tmp = TempDir::new().unwrap();
        let profiles = vec![profile(tmp.path()), profile(tmp.path())];
        let mut relay = CredentialRelay::closed();

        let err = upload_all(&profiles, &mut relay).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        let err = download_all(&profiles, &mut relay).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_local_root_is_enumeration_error() {
        let tmp = TempDir::new().unwrap();
        let err = list_local_files(&tmp.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, SyncError::Enumeration { .. }));
    }
}
