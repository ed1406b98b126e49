use serde::Deserialize;

use pawl_types::{ContentStore, Snapshot};

use crate::Error;

/// The well-known manifest filename, per PEP 518.
const PYPROJECT_FILENAME: &str = "pyproject.toml";

/// The backend selected for source trees that predate PEP 517.
pub const LEGACY_BUILD_BACKEND: &str = "setuptools.build_meta:__legacy__";

/// Build-time requirements accompanying [`LEGACY_BUILD_BACKEND`].
const LEGACY_REQUIRES: &[&str] = &["setuptools>=63.1.0,<64.0", "wheel>=0.35.1,<0.38"];

/// A PEP 517/518 build system configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSystem {
    /// Build-time requirement strings, verbatim in manifest order.
    pub requires: Vec<String>,
    /// The build backend string such as `setuptools.build_meta:__legacy__` or
    /// `maturin`, in `module[:object]` form.
    pub build_backend: String,
}

impl BuildSystem {
    /// Per PEP 517: "If the pyproject.toml file is absent, or the
    /// build-backend key is missing, the source tree is not using this
    /// specification, and tools should revert to the legacy behaviour of
    /// running setup.py."
    pub fn legacy() -> Self {
        Self {
            requires: LEGACY_REQUIRES.iter().map(ToString::to_string).collect(),
            build_backend: LEGACY_BUILD_BACKEND.to_string(),
        }
    }
}

/// A `pyproject.toml` as specified in PEP 517. Keys the frontend does not
/// consume are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PyProjectToml {
    build_system: Option<BuildSystemTable>,
}

/// The `[build-system]` table. Both keys are optional here so that their
/// absence stays distinguishable from an absent table.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BuildSystemTable {
    requires: Option<Vec<String>>,
    build_backend: Option<String>,
}

/// Locate and parse the `[build-system]` table governing `working_directory`.
///
/// The manifest is parsed fresh on every call. A missing manifest or a missing
/// table selects the legacy setuptools backend; a table missing one of its two
/// keys is a configuration error naming the offending file.
pub async fn find_build_system(
    store: &impl ContentStore,
    snapshot: &Snapshot,
    working_directory: &str,
) -> Result<BuildSystem, Error> {
    let manifest_path = if working_directory.is_empty() {
        PYPROJECT_FILENAME.to_string()
    } else {
        format!("{working_directory}/{PYPROJECT_FILENAME}")
    };
    let Some(content) = store.read(snapshot, &manifest_path).await? else {
        return Ok(BuildSystem::legacy());
    };
    let manifest: PyProjectToml = toml::from_str(&String::from_utf8_lossy(&content)).map_err(
        |source| Error::InvalidManifest {
            path: manifest_path.clone(),
            source,
        },
    )?;
    let Some(table) = manifest.build_system else {
        return Ok(BuildSystem::legacy());
    };
    let Some(build_backend) = table.build_backend else {
        return Err(Error::MissingBuildBackend {
            path: manifest_path,
        });
    };
    let Some(requires) = table.requires else {
        return Err(Error::MissingRequires {
            path: manifest_path,
        });
    };
    Ok(BuildSystem {
        requires,
        build_backend,
    })
}
