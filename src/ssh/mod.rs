//! Multiplexed ssh connection handling.

pub mod control;
pub mod relay;
pub mod session;

pub use control::{ControlChannel, SSH_CONNECTION_FAILURE};
pub use relay::CredentialRelay;
pub use session::{KeepAlive, RemoteSession, SessionState};
