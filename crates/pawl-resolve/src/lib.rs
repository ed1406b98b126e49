//! Lockfile generation for named resolves.
//!
//! A resolve is a logical dependency set that maps to exactly one lockfile.
//! This crate assembles the resolver invocation for a resolve (argv, input
//! snapshot, cache scope), classifies the outcome, stamps the resulting
//! document with a provenance header, and models the registry that decides
//! which resolve names exist at all: user-declared resolves shadow the
//! resolves that bundled tools would otherwise own.

pub use config::ResolveConfig;
pub use generate::{
    GenerateLockfile, GenerateLockfileError, GenerateLockfileResult, generate_lockfile,
};
pub use registry::{
    DEFAULT_TOOL_LOCKFILE, RegistryError, RequirementSource, ToolResolveDescriptor,
    known_resolve_names, requests_for,
};
pub use targets::{
    LOCKFILE_MANIFEST_FILENAME, SyntheticLockfileTarget, synthetic_lockfile_target_name,
    synthetic_lockfile_targets,
};

mod config;
mod generate;
mod registry;
mod targets;
