//! Everything that moves files: the live watch loop and the bulk operations.

pub mod bulk;
pub mod dispatcher;
pub mod manifest;
pub mod runner;

pub use bulk::{download_all, upload_all, BulkReport, Direction};
pub use dispatcher::{Dispatcher, TransferOutcome};
pub use manifest::Manifest;
pub use runner::{run_profiles, ProfileExit, ProfileRunner, RestartPolicy, SharedRelay};
