use std::fmt::{Display, Formatter};

/// The digest of the empty snapshot: the hash of an empty manifest.
const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// A content hash in hexadecimal form, as computed by a
/// [`ContentStore`](crate::ContentStore).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Digest(String);

impl Digest {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single file to be captured into a store.
///
/// Paths are relative, `/`-separated, and never contain `.` or `..` segments.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub content: Vec<u8>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// An immutable, content-addressed view of a file tree: a digest plus the
/// sorted list of file paths it contains. The file contents live in the store
/// the snapshot was created by.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Snapshot {
    digest: Digest,
    files: Vec<String>,
}

impl Snapshot {
    pub fn new(digest: Digest, mut files: Vec<String>) -> Self {
        files.sort_unstable();
        Self { digest, files }
    }

    pub fn empty() -> Self {
        Self {
            digest: Digest::new(EMPTY_DIGEST),
            files: Vec::new(),
        }
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The file paths in the snapshot, sorted.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.binary_search_by(|file| file.as_str().cmp(path)).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}
