use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Where a [`Requirement`](crate::Requirement) was declared, for error messages.
#[derive(Hash, Debug, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum RequirementOrigin {
    /// Declared in a standalone file, such as a constraints file.
    File(PathBuf),
    /// Declared by the requirement list of a named resolve.
    Resolve(String),
    /// Recorded in the metadata header of a lockfile.
    Lockfile {
        /// The lockfile destination path.
        dest: String,
        /// The resolve the lockfile belongs to.
        resolve: String,
    },
}

impl Display for RequirementOrigin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "the file {}", path.display()),
            Self::Resolve(name) => write!(f, "the resolve {name}"),
            Self::Lockfile { dest, resolve } => {
                write!(f, "the lockfile {dest} for the resolve {resolve}")
            }
        }
    }
}
