use std::collections::{BTreeMap, BTreeSet};

use pawl_requirements::{
    InterpreterConstraints, ParseError, Requirement, RequirementOrigin,
};

/// A constraints file, parsed once and carried with its raw bytes so it can
/// be materialized into the resolver's input snapshot unchanged.
#[derive(Debug, Clone)]
pub struct ConstraintsFile {
    pub path: String,
    pub content: Vec<u8>,
    pub requirements: BTreeSet<Requirement>,
}

impl ConstraintsFile {
    /// Parse constraints-file text. Blank lines and `#` comment lines are
    /// skipped; everything else must be a dependency specifier.
    pub fn parse(path: impl Into<String>, text: &str) -> Result<Self, ParseError> {
        let path = path.into();
        let origin = RequirementOrigin::File(path.clone().into());
        let mut requirements = BTreeSet::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            requirements.insert(Requirement::parse(line, origin.clone())?);
        }
        Ok(Self {
            path,
            content: text.as_bytes().to_vec(),
            requirements,
        })
    }
}

/// The assembled configuration an operation runs against.
///
/// This replaces layered option subsystems with one explicit struct built
/// once per request; nothing here is consulted lazily or globally. Field
/// names follow the option names they are assembled from.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    /// The external resolver executable.
    pub resolver_exe: String,
    /// The interpreter the resolver should lock (and build) against.
    pub interpreter_path: String,
    /// Pip version the resolver is told to emulate.
    pub pip_version: String,
    /// Resolution strategy identifier passed to the resolver.
    pub resolver_version: String,
    /// The resolve a requirement declaration belongs to when it names none.
    pub default_resolve: String,
    /// User-declared resolves: name to lockfile destination path.
    pub resolves: BTreeMap<String, String>,
    /// Per-resolve interpreter-constraint overrides.
    pub resolves_to_interpreter_constraints: BTreeMap<String, InterpreterConstraints>,
    /// The interpreter constraints used when a resolve has no override.
    pub interpreter_constraints: InterpreterConstraints,
    /// Manylinux platform tag to resolve wheels for, or `None` to forbid
    /// manylinux wheels.
    pub manylinux: Option<String>,
    /// Packages that must only be resolved as wheels.
    pub only_binary: BTreeSet<String>,
    /// Packages that must only be resolved as sdists.
    pub no_binary: BTreeSet<String>,
    /// Extra package index URLs.
    pub indexes: Vec<String>,
    /// A constraints file applied to every resolve without an override.
    pub constraints_file: Option<ConstraintsFile>,
    /// Per-resolve constraints-file overrides.
    pub resolves_to_constraints_file: BTreeMap<String, ConstraintsFile>,
    /// Per-resolve only-binary overrides.
    pub resolves_to_only_binary: BTreeMap<String, BTreeSet<String>>,
    /// Per-resolve no-binary overrides.
    pub resolves_to_no_binary: BTreeMap<String, BTreeSet<String>>,
    /// Extra arguments appended verbatim to every resolver invocation.
    pub extra_resolver_args: Vec<String>,
    /// Overrides the regenerate hint recorded in lockfile headers.
    pub lockfile_custom_regenerate_command: Option<String>,
    /// Pin `MACOSX_DEPLOYMENT_TARGET` for Big Sur compatible artifact tags
    /// when building on macOS.
    pub macos_big_sur_compatibility: bool,
}

impl Default for ResolveContext {
    fn default() -> Self {
        Self {
            resolver_exe: "pex".to_string(),
            interpreter_path: "python3".to_string(),
            pip_version: "24.2".to_string(),
            resolver_version: "pip-2020-resolver".to_string(),
            default_resolve: "python-default".to_string(),
            resolves: BTreeMap::new(),
            resolves_to_interpreter_constraints: BTreeMap::new(),
            interpreter_constraints: InterpreterConstraints::default(),
            manylinux: Some("manylinux2014".to_string()),
            only_binary: BTreeSet::new(),
            no_binary: BTreeSet::new(),
            indexes: Vec::new(),
            constraints_file: None,
            resolves_to_constraints_file: BTreeMap::new(),
            resolves_to_only_binary: BTreeMap::new(),
            resolves_to_no_binary: BTreeMap::new(),
            extra_resolver_args: Vec::new(),
            lockfile_custom_regenerate_command: None,
            macos_big_sur_compatibility: false,
        }
    }
}

impl ResolveContext {
    /// The interpreter constraints for a named resolve.
    pub fn interpreter_constraints_for(&self, resolve: &str) -> &InterpreterConstraints {
        self.resolves_to_interpreter_constraints
            .get(resolve)
            .unwrap_or(&self.interpreter_constraints)
    }
}
