use std::collections::BTreeMap;

use thiserror::Error;

use crate::snapshot::Snapshot;
use crate::traits::StoreError;

/// How a process result may be treated by an engine-backed runner's result
/// cache.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub enum CacheScope {
    /// Cacheable across sessions when the process succeeds.
    #[default]
    Default,
    /// Never served from a generic result cache; reused within a single
    /// session at most. Lockfile generation runs under this scope: the
    /// resolver's answer legitimately drifts as index contents change, so
    /// staleness is decided by metadata comparison, not by a cache key.
    PerSession,
}

/// A process to execute against an input snapshot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Process {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub input: Snapshot,
    /// Directory within the input snapshot to run in, if not its root.
    pub working_directory: Option<String>,
    /// Files to capture into the output snapshot, relative to the working
    /// directory. Missing files are omitted, not an execution error.
    pub output_files: Vec<String>,
    /// Directories to capture recursively into the output snapshot.
    pub output_directories: Vec<String>,
    /// Human-readable description, used in logs and error messages.
    pub description: String,
    pub cache_scope: CacheScope,
}

impl Process {
    pub fn new(
        argv: impl IntoIterator<Item = impl Into<String>>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            input: Snapshot::empty(),
            working_directory: None,
            output_files: Vec::new(),
            output_directories: Vec::new(),
            description: description.into(),
            cache_scope: CacheScope::Default,
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: Snapshot) -> Self {
        self.input = input;
        self
    }

    #[must_use]
    pub fn with_working_directory(mut self, working_directory: impl Into<String>) -> Self {
        self.working_directory = Some(working_directory.into());
        self
    }

    #[must_use]
    pub fn with_output_files(
        mut self,
        output_files: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.output_files = output_files.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_output_directories(
        mut self,
        output_directories: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.output_directories = output_directories.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_cache_scope(mut self, cache_scope: CacheScope) -> Self {
        self.cache_scope = cache_scope;
        self
    }
}

/// The captured result of an executed process. A non-zero exit code is a
/// result, not a [`ProcessError`]; callers decide what failure means.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    /// The declared outputs that the process actually produced.
    pub output: Snapshot,
}

/// Failure to execute a process at all.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Process cancelled: {description}")]
    Cancelled { description: String },
    #[error("Process timed out after {seconds}s: {description}")]
    TimedOut { seconds: u64, description: String },
    #[error("Failed to materialize process I/O: {description}")]
    Io {
        description: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
