//! Session management module.
//!
//! This module owns the remote shells: opening them over SSH, relaying their
//! output to an attached client, tracking them in a registry and reaping the
//! ones that have gone idle.

pub mod reaper;
pub mod registry;
pub mod relay;
pub mod remote;
pub mod shell;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use reaper::Reaper;
pub use registry::SessionRegistry;
pub use relay::{OutputDecoder, READ_CHUNK_SIZE};
pub use remote::{PtyRequest, RemoteConnector, RemoteError, RemoteOutput, RemoteShell, RemoteTarget};
pub use shell::{AttachmentId, Session, SessionError, SessionId, SessionSettings};
pub use ssh::{SshConnector, SshOutput, SshShell};
