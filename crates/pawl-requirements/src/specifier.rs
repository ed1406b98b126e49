use std::fmt::{Display, Formatter};

use thiserror::Error;

/// A version comparison operator, per the
/// [version specifiers](https://packaging.python.org/en/latest/specifications/version-specifiers/)
/// specification.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Operator {
    /// `==`
    Equal,
    /// `===`
    ExactEqual,
    /// `!=`
    NotEqual,
    /// `~=`
    TildeEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanEqual,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::ExactEqual => "===",
            Self::NotEqual => "!=",
            Self::TildeEqual => "~=",
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid version specifier.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{message}")]
pub struct InvalidSpecifierError {
    pub(crate) message: String,
}

/// A single version clause, such as `>=2.8.1` or `==2.8.*`.
///
/// The version text is kept as written rather than decomposed into release
/// segments. Resolution happens in an external tool, so the clause only needs
/// to survive a round trip through argv and lockfile headers unchanged.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VersionSpecifier {
    operator: Operator,
    version: String,
}

impl VersionSpecifier {
    /// Parse a single clause, e.g. `>= 2.8.1`.
    pub fn parse(text: &str) -> Result<Self, InvalidSpecifierError> {
        let text = text.trim();
        let (operator, rest) = if let Some(rest) = text.strip_prefix("===") {
            (Operator::ExactEqual, rest)
        } else if let Some(rest) = text.strip_prefix("==") {
            (Operator::Equal, rest)
        } else if let Some(rest) = text.strip_prefix("!=") {
            (Operator::NotEqual, rest)
        } else if let Some(rest) = text.strip_prefix("~=") {
            (Operator::TildeEqual, rest)
        } else if let Some(rest) = text.strip_prefix("<=") {
            (Operator::LessThanEqual, rest)
        } else if let Some(rest) = text.strip_prefix(">=") {
            (Operator::GreaterThanEqual, rest)
        } else if let Some(rest) = text.strip_prefix('<') {
            (Operator::LessThan, rest)
        } else if let Some(rest) = text.strip_prefix('>') {
            (Operator::GreaterThan, rest)
        } else {
            return Err(InvalidSpecifierError {
                message: format!(
                    "Expected a version comparison operator such as `==` or `>=`, found `{text}`"
                ),
            });
        };
        let version = rest.trim();
        if version.is_empty() {
            return Err(InvalidSpecifierError {
                message: format!("Expected a version after `{operator}`"),
            });
        }
        if let Some(char) = version
            .chars()
            .find(|char| !matches!(char, 'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '+' | '!' | '*'))
        {
            return Err(InvalidSpecifierError {
                message: format!("Invalid character in version: '{char}'"),
            });
        }
        Ok(Self {
            operator,
            version: version.to_string(),
        })
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The version text, as written.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Display for VersionSpecifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.operator, self.version)
    }
}
