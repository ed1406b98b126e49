//! Provenance for generated lockfiles.
//!
//! A lockfile on disk is only trustworthy if we can tell which inputs produced
//! it. This crate owns that bookkeeping: a digest over raw requirement strings
//! (`invalidation_digest`), a structured metadata header embedded in the
//! lockfile as comment lines ([`LockfileMetadata`]), staleness classification
//! against the current configuration ([`validate`]), and a best-effort diff
//! between two lockfile documents ([`LockfileDiff`]).

pub use diff::LockfileDiff;
pub use invalidation::invalidation_digest;
pub use metadata::{
    DecodedMetadata, LockfileMetadata, LockfileState, MetadataError, decode_header, validate,
};

mod diff;
mod invalidation;
mod metadata;
