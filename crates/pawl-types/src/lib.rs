//! Value types shared across the workspace, plus the two capability traits
//! ([`ContentStore`], [`ProcessRunner`]) that stand in for the surrounding
//! execution engine.

pub use crate::context::{ConstraintsFile, ResolveContext};
pub use crate::process::{CacheScope, Process, ProcessError, ProcessResult};
pub use crate::snapshot::{Digest, FileEntry, Snapshot};
pub use crate::traits::{ContentStore, ProcessRunner, StoreError};

mod context;
mod process;
mod snapshot;
mod traits;
