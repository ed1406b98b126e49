use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// Invalid package or extra name.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error(
    "Not a valid package or extra name: \"{0}\". Names must start and end with a letter or digit and may only contain -, _, ., and alphanumeric characters."
)]
pub struct InvalidNameError(String);

impl InvalidNameError {
    /// The name that failed to normalize.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Normalize to the canonical form: lowercase, with runs of `-`, `_` and `.`
/// collapsed to a single `-`.
///
/// See <https://packaging.python.org/en/latest/specifications/name-normalization/>.
fn normalize(name: &str) -> Result<String, InvalidNameError> {
    let mut normalized = String::with_capacity(name.len());
    let mut last = None;
    for char in name.bytes() {
        match char {
            b'A'..=b'Z' => normalized.push(char.to_ascii_lowercase() as char),
            b'a'..=b'z' | b'0'..=b'9' => normalized.push(char as char),
            b'-' | b'_' | b'.' => {
                match last {
                    // Names can't start with a separator.
                    None => return Err(InvalidNameError(name.to_string())),
                    Some(b'-' | b'_' | b'.') => {}
                    Some(_) => normalized.push('-'),
                }
            }
            _ => return Err(InvalidNameError(name.to_string())),
        }
        last = Some(char);
    }
    match last {
        None | Some(b'-' | b'_' | b'.') => Err(InvalidNameError(name.to_string())),
        Some(_) => Ok(normalized),
    }
}

/// The normalized name of a package.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PackageName(String);

impl PackageName {
    /// Create a validated, normalized package name.
    pub fn new(name: impl AsRef<str>) -> Result<Self, InvalidNameError> {
        Ok(Self(normalize(name.as_ref())?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = InvalidNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::new(name)
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The normalized name of an extra dependency group.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ExtraName(String);

impl ExtraName {
    /// Create a validated, normalized extra name.
    pub fn new(name: impl AsRef<str>) -> Result<Self, InvalidNameError> {
        Ok(Self(normalize(name.as_ref())?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ExtraName {
    type Err = InvalidNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::new(name)
    }
}

impl Display for ExtraName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for ExtraName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
