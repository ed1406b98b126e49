use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pawl_requirements::{InterpreterConstraints, ParseError, Requirement};

use crate::invalidation_digest;

const BEGIN_HEADER: &str = "--- BEGIN LOCKFILE METADATA: DO NOT EDIT OR REMOVE ---";
const END_HEADER: &str = "--- END LOCKFILE METADATA ---";

const METADATA_VERSION: u64 = 2;

/// The inputs a lockfile was generated from, embedded in the file itself as a
/// comment header so later runs can decide whether the file is still valid
/// without consulting anything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockfileMetadata {
    pub valid_for_interpreter_constraints: InterpreterConstraints,
    pub generated_with_requirements: BTreeSet<Requirement>,
    pub requirement_constraints: BTreeSet<Requirement>,
    pub manylinux: Option<String>,
    pub only_binary: BTreeSet<String>,
    pub no_binary: BTreeSet<String>,
}

/// A metadata header read back out of a lockfile. Version 1 headers carry only
/// a digest over the raw requirement strings; version 2 headers carry the full
/// structured metadata and are compared field by field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMetadata {
    V1 { requirements_invalidation_digest: String },
    V2(LockfileMetadata),
}

impl DecodedMetadata {
    /// Whether a lockfile carrying this header can be reused for the current
    /// inputs. `requirement_strings` are the raw, unparsed input strings; they
    /// only matter for version 1 headers, which are validated by recomputing
    /// the digest they store. Version 2 headers compare structurally against
    /// `expected`, so pure formatting changes do not invalidate the file.
    pub fn is_valid_for<'a>(
        &self,
        expected: &LockfileMetadata,
        requirement_strings: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        match self {
            Self::V1 {
                requirements_invalidation_digest,
            } => *requirements_invalidation_digest == invalidation_digest(requirement_strings),
            Self::V2(decoded) => decoded == expected,
        }
    }
}

/// Classification of an existing lockfile against the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockfileState {
    /// The header matches the current inputs.
    Valid,
    /// The header decodes but no longer matches the current inputs.
    Stale,
    /// The file carries no metadata header at all.
    NoHeader,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("The lockfile metadata block was interrupted by a non-comment line")]
    Interrupted,
    #[error("The lockfile metadata block is missing its end marker")]
    Unterminated,
    #[error("The lockfile metadata payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Unrecognized lockfile metadata version {0}")]
    UnknownVersion(u64),
    #[error("Invalid requirement in lockfile metadata: {0}")]
    InvalidRequirement(#[from] ParseError),
}

/// The wire form of a version 2 header. Everything is stored as canonical
/// strings so the payload survives tools that know nothing about our types.
#[derive(Debug, Serialize, Deserialize)]
struct PayloadV2 {
    version: u64,
    valid_for_interpreter_constraints: Vec<String>,
    generated_with_requirements: Vec<String>,
    requirement_constraints: Vec<String>,
    manylinux: Option<String>,
    only_binary: Vec<String>,
    no_binary: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadV1 {
    requirements_invalidation_digest: String,
}

#[derive(Debug, Deserialize)]
struct VersionTag {
    version: u64,
}

impl LockfileMetadata {
    fn to_payload(&self) -> PayloadV2 {
        PayloadV2 {
            version: METADATA_VERSION,
            valid_for_interpreter_constraints: self
                .valid_for_interpreter_constraints
                .iter()
                .map(ToString::to_string)
                .collect(),
            generated_with_requirements: self
                .generated_with_requirements
                .iter()
                .map(ToString::to_string)
                .collect(),
            requirement_constraints: self
                .requirement_constraints
                .iter()
                .map(ToString::to_string)
                .collect(),
            manylinux: self.manylinux.clone(),
            only_binary: self.only_binary.iter().cloned().collect(),
            no_binary: self.no_binary.iter().cloned().collect(),
        }
    }

    fn from_payload(payload: PayloadV2) -> Result<Self, MetadataError> {
        Ok(Self {
            valid_for_interpreter_constraints: InterpreterConstraints::parse(
                payload
                    .valid_for_interpreter_constraints
                    .iter()
                    .map(String::as_str),
                None,
            )?,
            generated_with_requirements: payload
                .generated_with_requirements
                .iter()
                .map(|requirement| requirement.parse::<Requirement>())
                .collect::<Result<_, _>>()?,
            requirement_constraints: payload
                .requirement_constraints
                .iter()
                .map(|requirement| requirement.parse::<Requirement>())
                .collect::<Result<_, _>>()?,
            manylinux: payload.manylinux,
            only_binary: payload.only_binary.into_iter().collect(),
            no_binary: payload.no_binary.into_iter().collect(),
        })
    }

    /// Render the comment header: a regeneration hint followed by the
    /// marker-delimited JSON payload, every line prefixed with `delimiter`.
    pub fn encode_header(&self, regenerate_command: &str, delimiter: &str) -> String {
        let payload = serde_json::to_string_pretty(&self.to_payload())
            .expect("Failed to serialize lockfile metadata");
        let mut lines = vec![
            format!("{delimiter} This lockfile was autogenerated. To regenerate, run:"),
            delimiter.to_string(),
            format!("{delimiter}    {regenerate_command}"),
            delimiter.to_string(),
            format!("{delimiter} {BEGIN_HEADER}"),
        ];
        lines.extend(payload.lines().map(|line| format!("{delimiter} {line}")));
        lines.push(format!("{delimiter} {END_HEADER}"));
        let mut header = lines.join("\n");
        header.push('\n');
        header
    }

    /// Prepend the rendered header, a blank separator line, and then the
    /// lockfile document unchanged.
    pub fn add_header_to_lockfile(
        &self,
        lockfile: &[u8],
        regenerate_command: &str,
        delimiter: &str,
    ) -> Vec<u8> {
        let mut out = self.encode_header(regenerate_command, delimiter).into_bytes();
        out.push(b'\n');
        out.extend_from_slice(lockfile);
        out
    }
}

/// Extract and parse the metadata header from lockfile text.
///
/// The comment delimiter is not assumed: it is inferred from whatever prefixes
/// the `BEGIN LOCKFILE METADATA` marker, so headers written with `//`, `#`, or
/// anything else all decode. A file without the marker is `Ok(None)`; a file
/// with a marker but a block we cannot make sense of is an error, since
/// regenerating on top of it would silently discard provenance.
pub fn decode_header(lockfile: &str) -> Result<Option<DecodedMetadata>, MetadataError> {
    let mut lines = lockfile.lines();
    let mut delimiter = None;
    for line in lines.by_ref() {
        if let Some(prefix) = line.trim_end().strip_suffix(BEGIN_HEADER) {
            delimiter = Some(prefix.trim_end().to_string());
            break;
        }
    }
    let Some(delimiter) = delimiter else {
        return Ok(None);
    };

    let mut payload = String::new();
    let mut terminated = false;
    for line in lines {
        let Some(rest) = line.strip_prefix(&delimiter) else {
            return Err(MetadataError::Interrupted);
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        if rest.trim_end() == END_HEADER {
            terminated = true;
            break;
        }
        payload.push_str(rest);
        payload.push('\n');
    }
    if !terminated {
        return Err(MetadataError::Unterminated);
    }

    let version = serde_json::from_str::<VersionTag>(&payload)?.version;
    match version {
        1 => {
            let payload: PayloadV1 = serde_json::from_str(&payload)?;
            Ok(Some(DecodedMetadata::V1 {
                requirements_invalidation_digest: payload.requirements_invalidation_digest,
            }))
        }
        2 => {
            let payload: PayloadV2 = serde_json::from_str(&payload)?;
            Ok(Some(DecodedMetadata::V2(LockfileMetadata::from_payload(
                payload,
            )?)))
        }
        other => Err(MetadataError::UnknownVersion(other)),
    }
}

/// Classify an existing lockfile against the metadata the current
/// configuration would produce.
pub fn validate<'a>(
    lockfile: &str,
    expected: &LockfileMetadata,
    requirement_strings: impl IntoIterator<Item = &'a str>,
) -> Result<LockfileState, MetadataError> {
    match decode_header(lockfile)? {
        None => Ok(LockfileState::NoHeader),
        Some(decoded) => {
            if decoded.is_valid_for(expected, requirement_strings) {
                Ok(LockfileState::Valid)
            } else {
                Ok(LockfileState::Stale)
            }
        }
    }
}
