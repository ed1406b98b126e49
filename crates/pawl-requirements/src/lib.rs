//! Parsing for python [dependency specifiers](https://packaging.python.org/en/latest/specifications/dependency-specifiers/)
//! (PEP 508), tuned for orchestration rather than resolution: version clauses,
//! direct URLs and environment markers are kept string-stable so they survive a
//! round trip through resolver argv and lockfile headers byte for byte.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::{Chars, FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use unicode_width::UnicodeWidthChar;

pub use crate::interpreter::InterpreterConstraints;
pub use crate::name::{ExtraName, InvalidNameError, PackageName};
pub use crate::origin::RequirementOrigin;
pub use crate::specifier::{InvalidSpecifierError, Operator, VersionSpecifier};

mod interpreter;
mod name;
mod origin;
mod specifier;

/// A parse error with a span attached, displayed with the offending input
/// underlined.
#[derive(Debug, Clone)]
pub struct ParseError {
    /// What went wrong.
    pub message: String,
    /// Span start, as a byte index into `input`.
    pub start: usize,
    /// Span length in bytes.
    pub len: usize,
    /// The input string, so it can be printed underlined.
    pub input: String,
    /// Where the input was declared, if known.
    pub origin: Option<RequirementOrigin>,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let start_offset = self.input[..self.start]
            .chars()
            .flat_map(|c| c.width())
            .sum::<usize>();
        let underline_len = if self.start >= self.input.len() {
            1
        } else {
            self.input[self.start..self.start + self.len]
                .chars()
                .flat_map(|c| c.width())
                .sum::<usize>()
        };
        write!(
            f,
            "{}\n{}\n{}{}",
            self.message,
            self.input,
            " ".repeat(start_offset),
            "^".repeat(underline_len)
        )?;
        if let Some(origin) = &self.origin {
            write!(f, "\nin {origin}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// A python dependency specifier, such as
/// `requests[security,tests]>=2.8.1,==2.8.* ; python_version < "2.7"`.
///
/// Comparison ignores formatting and declaration order: extras and version
/// clauses compare as sets, and the origin is ignored entirely.
#[derive(Debug, Clone)]
pub struct Requirement {
    /// The normalized distribution name.
    pub name: PackageName,
    /// The requested extras, normalized.
    pub extras: BTreeSet<ExtraName>,
    /// The version clauses, or the direct URL, if any.
    pub version_or_url: Option<VersionOrUrl>,
    /// The environment marker text, verbatim. Markers are forwarded to the
    /// resolver, never evaluated here.
    pub marker: Option<String>,
    /// Where the requirement was declared. Carried for error messages only.
    pub origin: Option<RequirementOrigin>,
}

/// The version clauses or direct URL of a requirement.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum VersionOrUrl {
    /// A set of version clauses, such as `>=2.8.1, ==2.8.*`.
    Specifiers(BTreeSet<VersionSpecifier>),
    /// A direct URL, kept exactly as written.
    Url(String),
}

impl Requirement {
    /// Parse a dependency specifier, attaching the origin to the requirement
    /// and to any parse error.
    pub fn parse(input: &str, origin: RequirementOrigin) -> Result<Self, ParseError> {
        match parse(&mut Cursor::new(input)) {
            Ok(requirement) => Ok(requirement.with_origin(origin)),
            Err(err) => Err(ParseError {
                origin: Some(origin),
                ..err
            }),
        }
    }

    #[must_use]
    pub fn with_origin(self, origin: RequirementOrigin) -> Self {
        Self {
            origin: Some(origin),
            ..self
        }
    }

    fn key(&self) -> RequirementKey<'_> {
        (
            &self.name,
            &self.extras,
            self.version_or_url.as_ref(),
            self.marker.as_deref(),
        )
    }
}

type RequirementKey<'a> = (
    &'a PackageName,
    &'a BTreeSet<ExtraName>,
    Option<&'a VersionOrUrl>,
    Option<&'a str>,
);

impl PartialEq for Requirement {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Requirement {}

impl Hash for Requirement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Requirement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Requirement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl Display for Requirement {
    /// Reconstructs the canonical form: normalized name, sorted extras,
    /// sorted version clauses, ` @ url`, ` ; marker`.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(
                f,
                "[{}]",
                self.extras
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            )?;
        }
        match &self.version_or_url {
            Some(VersionOrUrl::Specifiers(specifiers)) => {
                write!(
                    f,
                    "{}",
                    specifiers
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                )?;
            }
            Some(VersionOrUrl::Url(url)) => {
                write!(f, " @ {url}")?;
            }
            None => {}
        }
        if let Some(marker) = &self.marker {
            write!(f, " ; {marker}")?;
        }
        Ok(())
    }
}

impl FromStr for Requirement {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse(&mut Cursor::new(input))
    }
}

impl<'de> Deserialize<'de> for Requirement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for Requirement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A [`Cursor`] over a string.
#[derive(Debug, Clone)]
struct Cursor<'a> {
    input: &'a str,
    chars: Chars<'a>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars(),
            pos: 0,
        }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn slice(&self, start: usize, len: usize) -> &str {
        &self.input[start..start + len]
    }

    /// Peeks the next character and position without consuming it.
    fn peek(&self) -> Option<(usize, char)> {
        self.chars.clone().next().map(|char| (self.pos, char))
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.clone().next()
    }

    /// Eats the next character from the input stream if it matches the given
    /// token.
    fn eat_char(&mut self, token: char) -> Option<usize> {
        let (start_pos, peek_char) = self.peek()?;
        if peek_char == token {
            self.next();
            Some(start_pos)
        } else {
            None
        }
    }

    fn eat_whitespace(&mut self) {
        while let Some(char) = self.peek_char() {
            if char.is_whitespace() {
                self.next();
            } else {
                return;
            }
        }
    }

    fn next(&mut self) -> Option<(usize, char)> {
        let pos = self.pos;
        let char = self.chars.next()?;
        self.pos += char.len_utf8();
        Some((pos, char))
    }

    fn take_while(&mut self, condition: impl Fn(char) -> bool) -> (usize, usize) {
        let start = self.pos();
        let mut len = 0;
        while let Some(char) = self.peek_char() {
            if !condition(char) {
                break;
            }
            self.next();
            len += char.len_utf8();
        }
        (start, len)
    }
}

impl Display for Cursor<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.input)
    }
}

fn parse_name(cursor: &mut Cursor) -> Result<PackageName, ParseError> {
    // https://peps.python.org/pep-0508/#names
    // ^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$ with re.IGNORECASE
    let mut name = String::new();
    if let Some((index, char)) = cursor.next() {
        if matches!(char, 'A'..='Z' | 'a'..='z' | '0'..='9') {
            name.push(char);
        } else {
            return Err(ParseError {
                message: format!(
                    "Expected package name starting with an alphanumeric character, found '{char}'"
                ),
                start: index,
                len: char.len_utf8(),
                input: cursor.to_string(),
                origin: None,
            });
        }
    } else {
        return Err(ParseError {
            message: "Empty field is not allowed for a dependency specifier".to_string(),
            start: 0,
            len: 1,
            input: cursor.to_string(),
            origin: None,
        });
    }

    loop {
        match cursor.peek() {
            Some((index, char @ ('A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '-' | '_'))) => {
                name.push(char);
                cursor.next();
                // [.-_] can't be the final character
                if cursor.peek().is_none() && matches!(char, '.' | '-' | '_') {
                    return Err(ParseError {
                        message: format!(
                            "Package name must end with an alphanumeric character, not '{char}'"
                        ),
                        start: index,
                        len: char.len_utf8(),
                        input: cursor.to_string(),
                        origin: None,
                    });
                }
            }
            Some(_) | None => {
                return Ok(PackageName::new(&name)
                    .expect("name validation matches the grammar accepted above"));
            }
        }
    }
}

/// Parses extras in the `[extra1,extra2]` format.
fn parse_extras(cursor: &mut Cursor) -> Result<BTreeSet<ExtraName>, ParseError> {
    let mut extras = BTreeSet::new();
    let Some(bracket_pos) = cursor.eat_char('[') else {
        return Ok(extras);
    };

    loop {
        // wsp* before the identifier
        cursor.eat_whitespace();
        let mut buffer = String::new();
        let early_eof_error = ParseError {
            message: "Missing closing bracket (expected ']', found end of dependency specification)"
                .to_string(),
            start: bracket_pos,
            len: 1,
            input: cursor.to_string(),
            origin: None,
        };

        // First char of the identifier
        match cursor.next() {
            Some((_, alphanumeric @ ('a'..='z' | 'A'..='Z' | '0'..='9'))) => {
                buffer.push(alphanumeric);
            }
            Some((pos, other)) => {
                return Err(ParseError {
                    message: format!(
                        "Expected an alphanumeric character starting the extra name, found '{other}'"
                    ),
                    start: pos,
                    len: other.len_utf8(),
                    input: cursor.to_string(),
                    origin: None,
                });
            }
            None => return Err(early_eof_error),
        }
        // Remaining chars of the identifier
        let (start, len) = cursor
            .take_while(|char| matches!(char, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.'));
        buffer.push_str(cursor.slice(start, len));
        if let Some((pos, char)) = cursor.peek() {
            if char != ',' && char != ']' && !char.is_whitespace() {
                return Err(ParseError {
                    message: format!(
                        "Invalid character in extras name, expected an alphanumeric character, '-', '_', '.', ',' or ']', found '{char}'"
                    ),
                    start: pos,
                    len: char.len_utf8(),
                    input: cursor.to_string(),
                    origin: None,
                });
            }
        }
        // wsp* after the identifier
        cursor.eat_whitespace();
        // end or next identifier?
        match cursor.next() {
            Some((_, ',')) => {
                extras.insert(
                    ExtraName::new(&buffer).expect("name validation matches the grammar above"),
                );
            }
            Some((_, ']')) => {
                extras.insert(
                    ExtraName::new(&buffer).expect("name validation matches the grammar above"),
                );
                break;
            }
            Some((pos, other)) => {
                return Err(ParseError {
                    message: format!(
                        "Expected either ',' (separating extras) or ']' (ending the extras section), found '{other}'"
                    ),
                    start: pos,
                    len: other.len_utf8(),
                    input: cursor.to_string(),
                    origin: None,
                });
            }
            None => return Err(early_eof_error),
        }
    }

    Ok(extras)
}

/// Parses the URL of a `name @ url` requirement: everything up to the next
/// whitespace, kept verbatim.
fn parse_url(cursor: &mut Cursor) -> Result<String, ParseError> {
    // wsp*
    cursor.eat_whitespace();
    // <URI_reference>
    let (start, len) = cursor.take_while(|char| !char.is_whitespace());
    let url = cursor.slice(start, len);
    if url.is_empty() {
        return Err(ParseError {
            message: "Expected URL".to_string(),
            start,
            len: 1,
            input: cursor.to_string(),
            origin: None,
        });
    }
    Ok(url.to_string())
}

fn parse_clause(
    cursor: &Cursor,
    buffer: &str,
    start: usize,
    end: usize,
) -> Result<VersionSpecifier, ParseError> {
    if buffer.trim().is_empty() {
        return Err(ParseError {
            message: "Expected a version specifier after the comma".to_string(),
            start,
            len: (end - start).max(1),
            input: cursor.to_string(),
            origin: None,
        });
    }
    VersionSpecifier::parse(buffer).map_err(|err| ParseError {
        message: err.to_string(),
        start,
        len: (end - start).max(1),
        input: cursor.to_string(),
        origin: None,
    })
}

/// Parses a comma-separated run of version clauses, ending at `;` or the end
/// of input.
fn parse_version_specifier(cursor: &mut Cursor) -> Result<VersionOrUrl, ParseError> {
    let mut specifiers = BTreeSet::new();
    let mut buffer = String::new();
    let mut start = cursor.pos();
    loop {
        match cursor.peek() {
            Some((end, ',')) => {
                cursor.next();
                specifiers.insert(parse_clause(cursor, &buffer, start, end)?);
                buffer.clear();
                start = end + 1;
            }
            Some((_, ';')) | None => {
                let end = cursor.pos();
                specifiers.insert(parse_clause(cursor, &buffer, start, end)?);
                break;
            }
            Some((_, char)) => {
                buffer.push(char);
                cursor.next();
            }
        }
    }
    Ok(VersionOrUrl::Specifiers(specifiers))
}

/// Parses a parenthesized version specifier, e.g. `(>=2.8.1, ==2.8.*)`.
fn parse_version_specifier_parentheses(cursor: &mut Cursor) -> Result<VersionOrUrl, ParseError> {
    let brace_pos = cursor.pos();
    cursor.next();
    let mut specifiers = BTreeSet::new();
    let mut buffer = String::new();
    let mut start = cursor.pos();
    loop {
        match cursor.next() {
            Some((end, ',')) => {
                specifiers.insert(parse_clause(cursor, &buffer, start, end)?);
                buffer.clear();
                start = end + 1;
            }
            Some((end, ')')) => {
                specifiers.insert(parse_clause(cursor, &buffer, start, end)?);
                break;
            }
            Some((_, char)) => buffer.push(char),
            None => {
                return Err(ParseError {
                    message:
                        "Missing closing parenthesis (expected ')', found end of dependency specification)"
                            .to_string(),
                    start: brace_pos,
                    len: 1,
                    input: cursor.to_string(),
                    origin: None,
                });
            }
        }
    }
    Ok(VersionOrUrl::Specifiers(specifiers))
}

/// Parses a [dependency specifier](https://packaging.python.org/en/latest/specifications/dependency-specifiers).
fn parse(cursor: &mut Cursor) -> Result<Requirement, ParseError> {
    // wsp*
    cursor.eat_whitespace();
    // name
    let name = parse_name(cursor)?;
    // wsp*
    cursor.eat_whitespace();
    // extras?
    let extras = parse_extras(cursor)?;
    // wsp*
    cursor.eat_whitespace();

    // ( url_req | name_req )?
    let version_or_url = match cursor.peek_char() {
        Some('@') => {
            cursor.next();
            Some(VersionOrUrl::Url(parse_url(cursor)?))
        }
        Some('(') => Some(parse_version_specifier_parentheses(cursor)?),
        Some('<' | '=' | '>' | '~' | '!') => Some(parse_version_specifier(cursor)?),
        Some(';') | None => None,
        Some(other) => {
            return Err(ParseError {
                message: format!(
                    "Expected one of `@`, `(`, `<`, `=`, `>`, `~`, `!`, `;`, found `{other}`"
                ),
                start: cursor.pos(),
                len: other.len_utf8(),
                input: cursor.to_string(),
                origin: None,
            });
        }
    };

    // wsp*
    cursor.eat_whitespace();
    // quoted_marker?
    let marker = if cursor.peek_char() == Some(';') {
        // Skip past the semicolon
        cursor.next();
        let (start, len) = cursor.take_while(|_| true);
        let marker = cursor.slice(start, len).trim();
        if marker.is_empty() {
            return Err(ParseError {
                message: "Expected an environment marker after `;`".to_string(),
                start,
                len: 1,
                input: cursor.to_string(),
                origin: None,
            });
        }
        Some(marker.to_string())
    } else {
        None
    };
    // Anything left over is an error (there is nothing after a marker, since
    // the marker consumes the rest of the input).
    if let Some((pos, char)) = cursor.next() {
        return Err(ParseError {
            message: format!("Expected end of input or ';', found '{char}'"),
            start: pos,
            len: char.len_utf8(),
            input: cursor.to_string(),
            origin: None,
        });
    }

    Ok(Requirement {
        name,
        extras,
        version_or_url,
        marker,
        origin: None,
    })
}
