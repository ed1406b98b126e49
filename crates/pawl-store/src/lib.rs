//! An in-memory [`ContentStore`]: file contents are addressed by their
//! SHA-256, and a snapshot is addressed by the hash of its sorted
//! path-to-digest manifest, so equal trees get equal digests no matter how
//! they were assembled.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest as _, Sha256};

use pawl_types::{ContentStore, Digest, FileEntry, Snapshot, StoreError};

type Manifest = BTreeMap<String, Digest>;

/// Cheap to clone; clones share the same underlying maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    blobs: Arc<DashMap<Digest, Arc<[u8]>>>,
    trees: Arc<DashMap<Digest, Arc<Manifest>>>,
}

fn blob_digest(content: &[u8]) -> Digest {
    Digest::new(hex::encode(Sha256::digest(content)))
}

/// An empty manifest hashes to the digest of empty input, which is what
/// [`Snapshot::empty`] carries; empty snapshots therefore resolve without
/// ever being registered.
fn tree_digest(manifest: &Manifest) -> Digest {
    let mut hasher = Sha256::new();
    for (path, digest) in manifest {
        hasher.update(digest.as_str().as_bytes());
        hasher.update(b"  ");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
    }
    Digest::new(hex::encode(hasher.finalize()))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_tree(&self, manifest: Manifest) -> Snapshot {
        let digest = tree_digest(&manifest);
        let files = manifest.keys().cloned().collect();
        self.trees.insert(digest.clone(), Arc::new(manifest));
        Snapshot::new(digest, files)
    }

    fn manifest(&self, snapshot: &Snapshot) -> Result<Arc<Manifest>, StoreError> {
        if let Some(manifest) = self.trees.get(snapshot.digest()) {
            return Ok(Arc::clone(&manifest));
        }
        if snapshot.is_empty() {
            return Ok(Arc::new(Manifest::new()));
        }
        Err(StoreError::MissingDigest(snapshot.digest().clone()))
    }

    fn blob(&self, digest: &Digest) -> Result<Arc<[u8]>, StoreError> {
        self.blobs
            .get(digest)
            .map(|blob| Arc::clone(&blob))
            .ok_or_else(|| StoreError::MissingDigest(digest.clone()))
    }
}

impl ContentStore for InMemoryStore {
    async fn create(&self, files: Vec<FileEntry>) -> Result<Snapshot, StoreError> {
        let mut manifest = Manifest::new();
        for file in files {
            let digest = blob_digest(&file.content);
            if let Some(existing) = manifest.get(&file.path) {
                if *existing != digest {
                    return Err(StoreError::Conflict { path: file.path });
                }
            }
            self.blobs
                .entry(digest.clone())
                .or_insert_with(|| Arc::from(file.content));
            manifest.insert(file.path, digest);
        }
        Ok(self.insert_tree(manifest))
    }

    async fn merge(&self, snapshots: &[Snapshot]) -> Result<Snapshot, StoreError> {
        let mut merged = Manifest::new();
        for snapshot in snapshots {
            for (path, digest) in self.manifest(snapshot)?.iter() {
                if let Some(existing) = merged.get(path) {
                    if existing != digest {
                        return Err(StoreError::Conflict { path: path.clone() });
                    }
                }
                merged.insert(path.clone(), digest.clone());
            }
        }
        Ok(self.insert_tree(merged))
    }

    async fn subset(&self, snapshot: &Snapshot, paths: &[String]) -> Result<Snapshot, StoreError> {
        let manifest = self.manifest(snapshot)?;
        let subset = paths
            .iter()
            .filter_map(|path| {
                manifest
                    .get(path)
                    .map(|digest| (path.clone(), digest.clone()))
            })
            .collect();
        Ok(self.insert_tree(subset))
    }

    async fn strip_prefix(&self, snapshot: &Snapshot, prefix: &str) -> Result<Snapshot, StoreError> {
        let manifest = self.manifest(snapshot)?;
        let mut stripped = Manifest::new();
        for (path, digest) in manifest.iter() {
            let Some(rest) = path
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                return Err(StoreError::PrefixViolation {
                    prefix: prefix.to_string(),
                    path: path.clone(),
                });
            };
            stripped.insert(rest.to_string(), digest.clone());
        }
        Ok(self.insert_tree(stripped))
    }

    async fn read(&self, snapshot: &Snapshot, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let manifest = self.manifest(snapshot)?;
        let Some(digest) = manifest.get(path) else {
            return Ok(None);
        };
        Ok(Some(self.blob(digest)?.to_vec()))
    }

    async fn contents(&self, snapshot: &Snapshot) -> Result<Vec<FileEntry>, StoreError> {
        let manifest = self.manifest(snapshot)?;
        manifest
            .iter()
            .map(|(path, digest)| {
                Ok(FileEntry {
                    path: path.clone(),
                    content: self.blob(digest)?.to_vec(),
                })
            })
            .collect()
    }
}
