use std::collections::BTreeMap;

use itertools::Itertools;

use pawl_types::ResolveContext;

/// Filename of the virtual manifest that synthetic lockfile targets are
/// declared in, one per directory that holds lockfiles.
pub const LOCKFILE_MANIFEST_FILENAME: &str = "BUILD.lockfiles";

/// A virtual build-graph node exposing a lockfile as an addressable source,
/// so targets can depend on "the lockfile of resolve X" without the user
/// declaring anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticLockfileTarget {
    /// Target name within its manifest, `_<resolve>_lockfile`.
    pub name: String,
    /// The lockfile filename, relative to the manifest's directory.
    pub source: String,
    /// Where this target came from, for error messages.
    pub description_of_origin: String,
}

pub fn synthetic_lockfile_target_name(resolve: &str) -> String {
    format!("_{resolve}_lockfile")
}

/// One synthetic target per user resolve, grouped by the manifest path that
/// declares it. Deterministic: resolves are ordered by directory, then
/// lockfile filename.
pub fn synthetic_lockfile_targets(
    ctx: &ResolveContext,
) -> BTreeMap<String, Vec<SyntheticLockfileTarget>> {
    let mut targets: BTreeMap<String, Vec<SyntheticLockfileTarget>> = BTreeMap::new();
    let resolves = ctx
        .resolves
        .iter()
        .map(|(name, lockfile)| {
            let (directory, filename) = match lockfile.rsplit_once('/') {
                Some((directory, filename)) => (directory, filename),
                None => ("", lockfile.as_str()),
            };
            (directory, filename, name)
        })
        .sorted();
    for (directory, filename, name) in resolves {
        let manifest = if directory.is_empty() {
            LOCKFILE_MANIFEST_FILENAME.to_string()
        } else {
            format!("{directory}/{LOCKFILE_MANIFEST_FILENAME}")
        };
        targets
            .entry(manifest)
            .or_default()
            .push(SyntheticLockfileTarget {
                name: synthetic_lockfile_target_name(name),
                source: filename.to_string(),
                description_of_origin: format!("the resolves option `{name}`"),
            });
    }
    targets
}

#[cfg(test)]
mod tests {
    use pawl_types::ResolveContext;

    use super::{SyntheticLockfileTarget, synthetic_lockfile_targets};

    #[test]
    fn grouped_by_directory() {
        let ctx = ResolveContext {
            resolves: [
                ("b", "3rdparty/python/b.lock"),
                ("a", "3rdparty/python/a.lock"),
                ("tools", "tools/tools.lock"),
                ("root", "root.lock"),
            ]
            .into_iter()
            .map(|(name, dest)| (name.to_string(), dest.to_string()))
            .collect(),
            ..ResolveContext::default()
        };

        let targets = synthetic_lockfile_targets(&ctx);
        assert_eq!(
            targets.keys().collect::<Vec<_>>(),
            [
                "3rdparty/python/BUILD.lockfiles",
                "BUILD.lockfiles",
                "tools/BUILD.lockfiles",
            ]
        );
        assert_eq!(
            targets["3rdparty/python/BUILD.lockfiles"],
            [
                SyntheticLockfileTarget {
                    name: "_a_lockfile".to_string(),
                    source: "a.lock".to_string(),
                    description_of_origin: "the resolves option `a`".to_string(),
                },
                SyntheticLockfileTarget {
                    name: "_b_lockfile".to_string(),
                    source: "b.lock".to_string(),
                    description_of_origin: "the resolves option `b`".to_string(),
                },
            ]
        );
        assert_eq!(targets["BUILD.lockfiles"][0].source, "root.lock");
    }

    #[test]
    fn empty_context_has_no_targets() {
        assert!(synthetic_lockfile_targets(&ResolveContext::default()).is_empty());
    }
}
