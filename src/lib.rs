//! Watch a local tree and mirror every file change to a remote host.
//!
//! Each profile authenticates one multiplexed ssh connection, subscribes to a
//! change-notification service for its local root and copies every changed,
//! non-ignored file with rsync over that connection. Bulk upload and download
//! move a whole tree in one manifest-driven rsync call.
//!
//! ```text
//! config ──> Profile ──> RemoteSession ──> ControlChannel
//!                │                              │
//!                └─> ChangeService ──> Dispatcher ──> Transport (rsync)
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod path;
pub mod ssh;
pub mod sync;
pub mod transport;
pub mod watch;

pub use config::{ConfigSources, Profile};
pub use error::{Result, SyncError, TransferFailure};
