//! File transfer over an authenticated control channel.
//!
//! The dispatcher and bulk sync only see [`Transport`]; [`RsyncTransport`] is
//! the implementation that shells out to rsync through the shared ssh socket.

pub mod rsync;

pub use rsync::RsyncTransport;

use crate::error::{Result, TransferFailure};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Copy one file, given relative to the local root, to the same relative
    /// path under the remote root.
    async fn push_file(&self, relative: &str) -> std::result::Result<(), TransferFailure>;

    /// Copy every path listed in `manifest` from the local root to the remote
    /// root in one batch.
    async fn push_manifest(&self, manifest: &Path) -> Result<()>;

    /// Copy every path listed in `manifest` from the remote root to the local
    /// root in one batch.
    async fn pull_manifest(&self, manifest: &Path) -> Result<()>;

    /// Every regular file under the remote root, relative to it.
    async fn list_remote_files(&self) -> Result<Vec<String>>;
}
