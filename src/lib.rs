//! Preview cache for file-manager previewers.
//!
//! A recipe (shell command template) turns a file into preview text. The
//! output is cached on disk once per (file, width, height), with concurrent
//! producers for the same key serialized through a lock directory, and then
//! paged through statelessly by the host.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod header;
pub mod identity;
pub mod key;
pub mod lock;
pub mod paginate;
pub mod recipe;
pub mod watch;

pub use coordinator::{Coordinator, Ensured, Request, Timing};
pub use error::{Error, Result};
pub use identity::FileIdentity;
pub use paginate::{Pager, PeekOutcome, PeekRequest, Window};
