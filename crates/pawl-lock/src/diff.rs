use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use itertools::{EitherOrBoth, Itertools};
use serde::Deserialize;

/// The slice of a lock document we care about for diffing: pinned project
/// versions, possibly repeated across per-platform resolves. Everything else
/// in the document is ignored.
#[derive(Debug, Deserialize)]
struct LockDocument {
    #[serde(default)]
    locked_resolves: Vec<LockedResolve>,
}

#[derive(Debug, Deserialize)]
struct LockedResolve {
    #[serde(default)]
    locked_requirements: Vec<LockedRequirement>,
}

#[derive(Debug, Deserialize)]
struct LockedRequirement {
    project_name: String,
    version: String,
}

/// Changes between two versions of a lockfile, keyed by project name.
///
/// Diffing is a courtesy for log output. It never fails generation: anything
/// unreadable on either side simply produces no diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockfileDiff {
    pub path: String,
    pub resolve_name: String,
    pub added: BTreeMap<String, String>,
    pub removed: BTreeMap<String, String>,
    pub upgraded: BTreeMap<String, (String, String)>,
    pub downgraded: BTreeMap<String, (String, String)>,
    pub changed: BTreeMap<String, (String, String)>,
}

impl LockfileDiff {
    /// Compare two lock documents. Returns `None` when there is no previous
    /// lockfile or either side cannot be read as a lock document.
    pub fn compute(
        path: &str,
        resolve_name: &str,
        old: Option<&[u8]>,
        new: &[u8],
    ) -> Option<Self> {
        let old = parse_pins(old?)?;
        let new = parse_pins(new)?;

        let mut diff = Self {
            path: path.to_string(),
            resolve_name: resolve_name.to_string(),
            ..Self::default()
        };
        for (name, old_version) in &old {
            match new.get(name) {
                None => {
                    diff.removed.insert(name.clone(), old_version.clone());
                }
                Some(new_version) if new_version == old_version => {}
                Some(new_version) => {
                    let bucket = match loose_version_cmp(old_version, new_version) {
                        Ordering::Less => &mut diff.upgraded,
                        Ordering::Greater => &mut diff.downgraded,
                        Ordering::Equal => &mut diff.changed,
                    };
                    bucket.insert(name.clone(), (old_version.clone(), new_version.clone()));
                }
            }
        }
        for (name, new_version) in &new {
            if !old.contains_key(name) {
                diff.added.insert(name.clone(), new_version.clone());
            }
        }
        Some(diff)
    }

    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty()
            && self.removed.is_empty()
            && self.upgraded.is_empty()
            && self.downgraded.is_empty()
            && self.changed.is_empty())
    }
}

impl Display for LockfileDiff {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lockfile diff: {} [{}]", self.path, self.resolve_name)?;
        write_version_changes(f, "Upgraded dependencies", &self.upgraded)?;
        write_version_changes(f, "Downgraded dependencies", &self.downgraded)?;
        write_version_changes(f, "Changed dependencies", &self.changed)?;
        write_pins(f, "Added dependencies", &self.added)?;
        write_pins(f, "Removed dependencies", &self.removed)?;
        Ok(())
    }
}

fn write_version_changes(
    f: &mut Formatter<'_>,
    title: &str,
    entries: &BTreeMap<String, (String, String)>,
) -> std::fmt::Result {
    if entries.is_empty() {
        return Ok(());
    }
    write!(f, "\n\n== {title} ==")?;
    for (name, (old, new)) in entries {
        write!(f, "\n  {name:<30} {old} --> {new}")?;
    }
    Ok(())
}

fn write_pins(
    f: &mut Formatter<'_>,
    title: &str,
    entries: &BTreeMap<String, String>,
) -> std::fmt::Result {
    if entries.is_empty() {
        return Ok(());
    }
    write!(f, "\n\n== {title} ==")?;
    for (name, version) in entries {
        write!(f, "\n  {name:<30} {version}")?;
    }
    Ok(())
}

/// Extract `project -> version` pins. Where per-platform resolves disagree,
/// the first occurrence wins.
fn parse_pins(lockfile: &[u8]) -> Option<BTreeMap<String, String>> {
    let text = std::str::from_utf8(lockfile).ok()?;
    let document: LockDocument = serde_json::from_str(lock_document(text)?).ok()?;
    let mut pins = BTreeMap::new();
    for resolve in document.locked_resolves {
        for requirement in resolve.locked_requirements {
            pins.entry(requirement.project_name)
                .or_insert(requirement.version);
        }
    }
    Some(pins)
}

/// Skip past the comment header, if any: the document starts at the first line
/// whose first column is `{`.
fn lock_document(text: &str) -> Option<&str> {
    let mut offset = 0;
    for line in text.lines() {
        if line.starts_with('{') {
            return Some(&text[offset..]);
        }
        offset += line.len() + 1;
    }
    None
}

/// Approximate ordering, good enough to label a change as an upgrade or a
/// downgrade. The version is split into numeric and alphabetic runs. Runs are
/// compared pairwise; when one version is a prefix of the other, a trailing
/// alphabetic run sorts before the bare prefix (`1.2rc1` < `1.2`) and a
/// trailing numeric run after it (`1.2.1` > `1.2`).
fn loose_version_cmp(old: &str, new: &str) -> Ordering {
    for pair in segments(old).iter().zip_longest(segments(new).iter()) {
        match pair {
            EitherOrBoth::Both(old, new) => match old.cmp(new) {
                Ordering::Equal => {}
                decided => return decided,
            },
            EitherOrBoth::Left(extra) => {
                return if matches!(extra, Segment::Text(_)) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
            }
            EitherOrBoth::Right(extra) => {
                return if matches!(extra, Segment::Text(_)) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            }
        }
    }
    Ordering::Equal
}

// Text before Number so that pre-release tags sort below numeric segments.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Text(String),
    Number(u64),
}

fn segments(version: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut numeric = false;
    for char in version.chars() {
        if matches!(char, '.' | '-' | '_' | '+') {
            flush(&mut segments, &mut buffer, numeric);
            continue;
        }
        let char_numeric = char.is_ascii_digit();
        if !buffer.is_empty() && char_numeric != numeric {
            flush(&mut segments, &mut buffer, numeric);
        }
        numeric = char_numeric;
        buffer.push(char);
    }
    flush(&mut segments, &mut buffer, numeric);
    segments
}

fn flush(segments: &mut Vec<Segment>, buffer: &mut String, numeric: bool) {
    if buffer.is_empty() {
        return;
    }
    let segment = if numeric {
        buffer
            .parse::<u64>()
            .map_or_else(|_| Segment::Text(buffer.clone()), Segment::Number)
    } else {
        Segment::Text(buffer.to_ascii_lowercase())
    };
    segments.push(segment);
    buffer.clear();
}
