use std::future::Future;

use thiserror::Error;

use crate::process::{Process, ProcessError, ProcessResult};
use crate::snapshot::{Digest, FileEntry, Snapshot};

/// Errors from [`ContentStore`] operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Cannot merge snapshots: `{path}` appears more than once with conflicting contents")]
    Conflict { path: String },
    #[error("Cannot strip prefix `{prefix}`: the snapshot contains `{path}` outside it")]
    PrefixViolation { prefix: String, path: String },
    #[error("The store has no content for digest {0}")]
    MissingDigest(Digest),
}

/// Content-addressed storage for immutable file snapshots.
///
/// Together with [`ProcessRunner`], this is the seam to the surrounding
/// execution engine. The orchestration crates never talk to a scheduler or a
/// real filesystem; they assemble snapshots here and hand processes to a
/// runner:
///
/// ```text
/// ┌──────────────┐  ┌─────────────────────┐
/// │ pawl-resolve │  │ pawl-build-frontend │
/// └──────▲───────┘  └──────────▲──────────┘
///        │                     │
///        └─────────┐  ┌────────┘
///              ┌───┴──┴─────┐
///              │ pawl-types │
///              └───▲────▲───┘
///                  │    │
///       ┌──────────┘    └─────────┐
/// ┌─────┴──────┐            ┌─────┴─────┐
/// │ pawl-store │            │ pawl-exec │
/// └────────────┘            └───────────┘
/// ```
///
/// An engine-backed implementation can substitute for `pawl-store` and
/// `pawl-exec` without the orchestration crates noticing.
pub trait ContentStore {
    /// Capture the given files into the store and return their snapshot.
    fn create(
        &self,
        files: Vec<FileEntry>,
    ) -> impl Future<Output = Result<Snapshot, StoreError>> + '_;

    /// Merge snapshots into one. The same path may appear in several
    /// snapshots only with identical contents.
    fn merge<'a>(
        &'a self,
        snapshots: &'a [Snapshot],
    ) -> impl Future<Output = Result<Snapshot, StoreError>> + 'a;

    /// The subset of a snapshot containing exactly the named paths that
    /// exist in it.
    fn subset<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        paths: &'a [String],
    ) -> impl Future<Output = Result<Snapshot, StoreError>> + 'a;

    /// Remove a leading directory from every path in the snapshot. Fails if
    /// any file lies outside the prefix.
    fn strip_prefix<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        prefix: &'a str,
    ) -> impl Future<Output = Result<Snapshot, StoreError>> + 'a;

    /// The content of a single file, or `None` if the snapshot has no file
    /// at the path.
    fn read<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        path: &'a str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + 'a;

    /// Every file in the snapshot with its content, ordered by path.
    fn contents<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> impl Future<Output = Result<Vec<FileEntry>, StoreError>> + 'a;
}

/// Executes a [`Process`] and captures its declared outputs.
///
/// Cancellation and timeouts belong to the implementation; they surface as
/// [`ProcessError::Cancelled`] and [`ProcessError::TimedOut`] and are fatal
/// for the request that awaited them.
pub trait ProcessRunner {
    fn run(
        &self,
        process: Process,
    ) -> impl Future<Output = Result<ProcessResult, ProcessError>> + '_;
}
