//! Temporary `--files-from` lists for bulk transfers.

use crate::error::Result;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const UPLOAD_MANIFEST: &str = ".watchme_upload_list";
pub const DOWNLOAD_MANIFEST: &str = ".watchme_download_list";

/// A manifest file on disk. Removed when dropped, whether the transfer that
/// used it succeeded or not.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    entries: usize,
}

impl Manifest {
    /// Write `paths` to `<root>/<name>`, sorted and de-duplicated, one per line.
    pub fn write<I, S>(root: &Path, name: &str, paths: I) -> Result<Manifest>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries: Vec<String> = paths.into_iter().map(Into::into).collect();
        entries.sort();
        entries.dedup();

        let path = root.join(name);
        let temp = path.with_extension("tmp");
        let written = write_lines(&temp, &entries).and_then(|()| fs::rename(&temp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        // From here on Drop owns the cleanup.
        Ok(Manifest {
            path,
            entries: entries.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

fn write_lines(path: &Path, entries: &[String]) -> std::io::Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for entry in entries {
        writeln!(out, "{}", entry)?;
    }
    out.flush()
}

impl Drop for Manifest {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "failed to remove manifest: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_sorted_unique() {
        let tmp = TempDir::new().unwrap();
        let manifest =
            Manifest::write(tmp.path(), UPLOAD_MANIFEST, ["b.txt", "a/c.txt", "b.txt"]).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.path(), tmp.path().join(UPLOAD_MANIFEST));
        let body = fs::read_to_string(manifest.path()).unwrap();
        assert_eq!(body, "a/c.txt\nb.txt\n");
    }

    #[test]
    fn test_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = {
            let manifest =
                Manifest::write(tmp.path(), DOWNLOAD_MANIFEST, Vec::<String>::new()).unwrap();
            assert!(manifest.is_empty());
            assert!(manifest.path().exists());
            manifest.path().to_path_buf()
        };
        assert!(!path.exists());
        assert!(!tmp.path().join(".watchme_download_list.tmp").exists());
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        // A non-empty directory in the way makes the final rename fail.
        fs::create_dir_all(tmp.path().join(UPLOAD_MANIFEST).join("keep")).unwrap();

        assert!(Manifest::write(tmp.path(), UPLOAD_MANIFEST, ["a.txt"]).is_err());
        assert!(!tmp.path().join(".watchme_upload_list.tmp").exists());
        assert!(tmp.path().join(UPLOAD_MANIFEST).join("keep").is_dir());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::write(tmp.path(), UPLOAD_MANIFEST, ["x"]).unwrap();
        fs::remove_file(manifest.path()).unwrap();
        drop(manifest);
    }
}
