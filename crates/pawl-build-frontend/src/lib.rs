//! PEP 517 build frontend: discover a source tree's build backend, provision
//! it in an isolated environment, and drive its `build_wheel` / `build_sdist`
//! hooks through a generated shim.
//!
//! The backend never talks to this frontend directly. The shim reports
//! produced artifacts as `wheel: <filename>` / `sdist: <filename>` stdout
//! lines, and every claim is verified against the captured output snapshot
//! before it is believed.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, instrument};

use pawl_requirements::InterpreterConstraints;
use pawl_types::{
    ContentStore, FileEntry, Process, ProcessError, ProcessResult, ProcessRunner, ResolveContext,
    Snapshot, StoreError,
};

mod config_settings;
mod manifest;
mod shim;

pub use config_settings::{ConfigSettingEntry, ConfigSettings};
pub use manifest::{BuildSystem, LEGACY_BUILD_BACKEND, find_build_system};

use shim::{BACKEND_SHIM_FILENAME, render_backend_shim};

/// Where backends drop artifacts, relative to the working directory. This is
/// the backend tooling's conventional dist directory, not a path of ours.
const DIST_DIR: &str = "dist";

const BACKEND_PEX_FILENAME: &str = "build_backend.pex";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid pyproject.toml in {path}")]
    InvalidManifest {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("No build-backend found in the [build-system] table in {path}")]
    MissingBuildBackend { path: String },
    #[error("No requires found in the [build-system] table in {path}")]
    MissingRequires { path: String },
    #[error("The environment tool reported success but produced no `build_backend.pex`")]
    MissingBackendEnvironment,
    #[error("{message}:\n--- stdout:\n{stdout}\n--- stderr:\n{stderr}\n---")]
    BackendFailed {
        message: String,
        stdout: String,
        stderr: String,
    },
    #[error("Build backend {build_backend} did not create expected {kind} file {path}")]
    MissingArtifact {
        build_backend: String,
        kind: &'static str,
        path: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl Error {
    fn from_command_output(message: String, result: &ProcessResult) -> Self {
        Self::BackendFailed {
            message,
            stdout: String::from_utf8_lossy(&result.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        }
    }
}

/// A request to build dists via a PEP 517 build backend.
#[derive(Debug, Clone)]
pub struct DistBuildRequest {
    pub build_system: BuildSystem,
    pub interpreter_constraints: InterpreterConstraints,
    pub build_wheel: bool,
    pub build_sdist: bool,
    pub input: Snapshot,
    /// Relpath within the input snapshot; the backend runs here.
    pub working_directory: String,
    /// Subdirectory of the dist dir the artifacts land in.
    pub output_path: String,
    /// Source roots the backend imports from at build time.
    pub build_time_source_roots: Vec<String>,
    pub wheel_config_settings: Option<ConfigSettings>,
    pub sdist_config_settings: Option<ConfigSettings>,
    pub extra_build_env: BTreeMap<String, String>,
    /// Only used in process descriptions and error messages.
    pub target_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DistBuildResult {
    pub output: Snapshot,
    /// Relpaths in the output snapshot.
    pub wheel_path: Option<String>,
    pub sdist_path: Option<String>,
}

/// Build the requested dists by driving the PEP 517 backend.
///
/// Two processes: one provisions the backend environment, one executes the
/// shim inside the source tree. Both run under the default cache scope; unlike
/// lockfile generation, a backend invocation is a pure function of its inputs
/// and may be served from a result cache.
#[instrument(skip_all, fields(backend = %request.build_system.build_backend))]
pub async fn run_backend_build(
    request: &DistBuildRequest,
    ctx: &ResolveContext,
    store: &impl ContentStore,
    runner: &impl ProcessRunner,
) -> Result<DistBuildResult, Error> {
    let backend_pex = provision_backend_environment(request, ctx, store, runner).await?;

    let dist_dir = if request.output_path.is_empty() {
        DIST_DIR.to_string()
    } else {
        format!("{DIST_DIR}/{}", request.output_path)
    };
    let scaffolding = store
        .create(vec![
            FileEntry::new(
                in_working_directory(request, BACKEND_SHIM_FILENAME),
                render_backend_shim(request, &dist_dir).into_bytes(),
            ),
            FileEntry::new(in_working_directory(request, BACKEND_PEX_FILENAME), backend_pex),
        ])
        .await?;
    let input = store.merge(&[request.input.clone(), scaffolding]).await?;

    let mut env = request.extra_build_env.clone();
    // The pex runtime splits this on the path separator and prepends the
    // entries to sys.path.
    env.insert(
        "PEX_EXTRA_SYS_PATH".to_string(),
        request.build_time_source_roots.join(":"),
    );
    if ctx.macos_big_sur_compatibility && cfg!(target_os = "macos") {
        env.insert("MACOSX_DEPLOYMENT_TARGET".to_string(), "10.16".to_string());
    }

    let description = match &request.target_description {
        Some(target) => format!("Run {} for {}", request.build_system.build_backend, target),
        None => format!("Run {}", request.build_system.build_backend),
    };
    let mut process = Process::new(
        [
            format!("./{BACKEND_PEX_FILENAME}"),
            BACKEND_SHIM_FILENAME.to_string(),
        ],
        description,
    )
    .with_env(env)
    .with_input(input)
    .with_output_directories([DIST_DIR]);
    if !request.working_directory.is_empty() {
        process = process.with_working_directory(request.working_directory.clone());
    }
    debug!("Running `{}`", process.argv.join(" "));
    let result = runner.run(process).await?;
    if result.exit_code != 0 {
        let message = match &request.target_description {
            Some(target) => format!(
                "Build backend {} failed for {}",
                request.build_system.build_backend, target
            ),
            None => format!("Build backend {} failed", request.build_system.build_backend),
        };
        return Err(Error::from_command_output(message, &result));
    }

    let stdout = String::from_utf8_lossy(&result.stdout);
    let mut wheel_path = None;
    let mut sdist_path = None;
    for line in stdout.lines() {
        if let Some(filename) = line.strip_prefix("wheel: ") {
            wheel_path = Some(in_output_path(request, filename.trim()));
        } else if let Some(filename) = line.strip_prefix("sdist: ") {
            sdist_path = Some(in_output_path(request, filename.trim()));
        }
    }

    // Captured paths are relative to the working directory; peeling off the
    // dist dir lines the snapshot up with the `output_path`-relative claims.
    let output = store.strip_prefix(&result.output, DIST_DIR).await?;
    for (kind, path) in [("wheel", wheel_path.as_ref()), ("sdist", sdist_path.as_ref())] {
        if let Some(path) = path {
            if !output.contains(path) {
                return Err(Error::MissingArtifact {
                    build_backend: request.build_system.build_backend.clone(),
                    kind,
                    path: path.clone(),
                });
            }
        }
    }

    Ok(DistBuildResult {
        output,
        wheel_path,
        sdist_path,
    })
}

/// Install the backend's build-time requirements into a self-contained
/// environment for the shim to execute against.
async fn provision_backend_environment(
    request: &DistBuildRequest,
    ctx: &ResolveContext,
    store: &impl ContentStore,
    runner: &impl ProcessRunner,
) -> Result<Vec<u8>, Error> {
    let mut argv = vec![ctx.resolver_exe.clone()];
    argv.extend(request.build_system.requires.iter().cloned());
    argv.push(format!("--output-file={BACKEND_PEX_FILENAME}"));
    argv.push("--venv".to_string());
    argv.extend(request.interpreter_constraints.to_arg_list());

    let process = Process::new(
        argv,
        format!(
            "Building {BACKEND_PEX_FILENAME} for {}",
            request.build_system.build_backend
        ),
    )
    .with_output_files([BACKEND_PEX_FILENAME]);
    debug!("Running `{}`", process.argv.join(" "));
    let result = runner.run(process).await?;
    if result.exit_code != 0 {
        return Err(Error::from_command_output(
            format!(
                "Failed to install build requirements for {}",
                request.build_system.build_backend
            ),
            &result,
        ));
    }
    store
        .read(&result.output, BACKEND_PEX_FILENAME)
        .await?
        .ok_or(Error::MissingBackendEnvironment)
}

fn in_working_directory(request: &DistBuildRequest, filename: &str) -> String {
    if request.working_directory.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{filename}", request.working_directory)
    }
}

fn in_output_path(request: &DistBuildRequest, filename: &str) -> String {
    if request.output_path.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{filename}", request.output_path)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use indoc::indoc;

    use pawl_requirements::InterpreterConstraints;
    use pawl_store::InMemoryStore;
    use pawl_types::{
        CacheScope, ContentStore, FileEntry, Process, ProcessError, ProcessResult, ProcessRunner,
        ResolveContext, Snapshot,
    };

    use super::{BuildSystem, DistBuildRequest, Error, find_build_system, run_backend_build};

    const BUILD_STDOUT: &str = "wheel: helloworld-1.0-py3-none-any.whl\nsdist: helloworld-1.0.tar.gz\n";
    const WHEEL_FILE: &str = "helloworld/helloworld-1.0-py3-none-any.whl";
    const SDIST_FILE: &str = "helloworld/helloworld-1.0.tar.gz";

    struct FakeBackend {
        store: InMemoryStore,
        exit_code: i32,
        stdout: &'static str,
        stderr: &'static str,
        /// Paths under the dist dir the build process leaves behind.
        artifacts: Vec<&'static str>,
        provision_exit_code: i32,
        provides_pex: bool,
        seen: Mutex<Vec<Process>>,
    }

    impl FakeBackend {
        fn succeeding(
            store: InMemoryStore,
            stdout: &'static str,
            artifacts: Vec<&'static str>,
        ) -> Self {
            Self {
                store,
                exit_code: 0,
                stdout,
                stderr: "",
                artifacts,
                provision_exit_code: 0,
                provides_pex: true,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Process> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for FakeBackend {
        async fn run(&self, process: Process) -> Result<ProcessResult, ProcessError> {
            let provisioning = process
                .output_files
                .iter()
                .any(|file| file == "build_backend.pex");
            self.seen.lock().unwrap().push(process);
            if provisioning {
                if self.provision_exit_code != 0 {
                    return Ok(ProcessResult {
                        stdout: Vec::new(),
                        stderr: b"No matching distribution found for setuptools>=99".to_vec(),
                        exit_code: self.provision_exit_code,
                        output: Snapshot::empty(),
                    });
                }
                let output = if self.provides_pex {
                    self.store
                        .create(vec![FileEntry::new("build_backend.pex", b"pex".to_vec())])
                        .await?
                } else {
                    Snapshot::empty()
                };
                return Ok(ProcessResult {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    exit_code: 0,
                    output,
                });
            }
            let files = self
                .artifacts
                .iter()
                .map(|path| FileEntry::new(format!("dist/{path}"), b"artifact".to_vec()))
                .collect();
            let output = self.store.create(files).await?;
            Ok(ProcessResult {
                stdout: self.stdout.as_bytes().to_vec(),
                stderr: self.stderr.as_bytes().to_vec(),
                exit_code: self.exit_code,
                output,
            })
        }
    }

    fn example_request() -> DistBuildRequest {
        DistBuildRequest {
            build_system: BuildSystem {
                requires: vec!["setuptools>=68".to_string(), "wheel".to_string()],
                build_backend: "setuptools.build_meta".to_string(),
            },
            interpreter_constraints: InterpreterConstraints::parse(["CPython>=3.8"], None)
                .unwrap(),
            build_wheel: true,
            build_sdist: true,
            input: Snapshot::empty(),
            working_directory: "src/python/helloworld".to_string(),
            output_path: "helloworld".to_string(),
            build_time_source_roots: vec![
                "src/python".to_string(),
                "3rdparty/python".to_string(),
            ],
            wheel_config_settings: None,
            sdist_config_settings: None,
            extra_build_env: BTreeMap::new(),
            target_description: Some("src/python/helloworld:dist".to_string()),
        }
    }

    #[tokio::test]
    async fn backend_environment_invocation() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner =
            FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE, SDIST_FILE]);
        run_backend_build(&example_request(), &ResolveContext::default(), &store, &runner)
            .await?;

        let seen = runner.seen();
        assert_eq!(seen.len(), 2);
        let provision = &seen[0];
        insta::assert_snapshot!(provision.argv.join("\n"), @r"
        pex
        setuptools>=68
        wheel
        --output-file=build_backend.pex
        --venv
        --interpreter-constraint
        cpython>=3.8
        ");
        assert_eq!(provision.cache_scope, CacheScope::Default);
        assert_eq!(provision.output_files, ["build_backend.pex"]);
        assert_eq!(
            provision.description,
            "Building build_backend.pex for setuptools.build_meta"
        );
        Ok(())
    }

    #[tokio::test]
    async fn shim_process_invocation() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner =
            FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE, SDIST_FILE]);
        let source = store
            .create(vec![FileEntry::new(
                "src/python/helloworld/helloworld/__init__.py",
                b"".to_vec(),
            )])
            .await?;
        let request = DistBuildRequest {
            input: source,
            extra_build_env: BTreeMap::from([(
                "SOURCE_DATE_EPOCH".to_string(),
                "1600000000".to_string(),
            )]),
            ..example_request()
        };
        run_backend_build(&request, &ResolveContext::default(), &store, &runner).await?;

        let build = &runner.seen()[1];
        assert_eq!(build.argv, ["./build_backend.pex", "backend_shim.py"]);
        assert_eq!(
            build.working_directory.as_deref(),
            Some("src/python/helloworld")
        );
        assert_eq!(build.output_directories, ["dist"]);
        assert_eq!(build.cache_scope, CacheScope::Default);
        assert_eq!(
            build.description,
            "Run setuptools.build_meta for src/python/helloworld:dist"
        );
        assert_eq!(
            build.env.get("PEX_EXTRA_SYS_PATH").map(String::as_str),
            Some("src/python:3rdparty/python")
        );
        assert_eq!(
            build.env.get("SOURCE_DATE_EPOCH").map(String::as_str),
            Some("1600000000")
        );

        // The input merges the source tree with the provisioned environment
        // and the rendered shim, side by side in the working directory.
        assert!(build.input.contains("src/python/helloworld/helloworld/__init__.py"));
        assert!(build.input.contains("src/python/helloworld/build_backend.pex"));
        let shim = store
            .read(&build.input, "src/python/helloworld/backend_shim.py")
            .await?
            .unwrap();
        let shim = String::from_utf8(shim)?;
        assert!(shim.contains("import setuptools.build_meta"));
        assert!(shim.contains(r#"dist_dir = "dist/helloworld""#));
        Ok(())
    }

    #[tokio::test]
    async fn produced_artifacts_are_reported() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner =
            FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE, SDIST_FILE]);
        let result =
            run_backend_build(&example_request(), &ResolveContext::default(), &store, &runner)
                .await?;
        assert_eq!(result.wheel_path.as_deref(), Some(WHEEL_FILE));
        assert_eq!(result.sdist_path.as_deref(), Some(SDIST_FILE));
        assert_eq!(result.output.files(), [WHEEL_FILE, SDIST_FILE]);
        Ok(())
    }

    #[tokio::test]
    async fn tool_chatter_is_ignored() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let stdout = "* Building wheel...\nwarning: no files found matching 'LICENSE'\nwheel: helloworld-1.0-py3-none-any.whl\nwheelhouse: not-a-report\n";
        let runner = FakeBackend::succeeding(store.clone(), stdout, vec![WHEEL_FILE]);
        let request = DistBuildRequest {
            build_sdist: false,
            ..example_request()
        };
        let result =
            run_backend_build(&request, &ResolveContext::default(), &store, &runner).await?;
        assert_eq!(result.wheel_path.as_deref(), Some(WHEEL_FILE));
        assert_eq!(result.sdist_path, None);
        Ok(())
    }

    #[tokio::test]
    async fn backend_failure_surfaces_output() {
        let store = InMemoryStore::default();
        let runner = FakeBackend {
            exit_code: 1,
            stdout: "running bdist_wheel",
            stderr: "error: invalid command 'bdist_wheel'",
            ..FakeBackend::succeeding(store.clone(), "", Vec::new())
        };
        let err =
            run_backend_build(&example_request(), &ResolveContext::default(), &store, &runner)
                .await
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            indoc! {"
                Build backend setuptools.build_meta failed for src/python/helloworld:dist:
                --- stdout:
                running bdist_wheel
                --- stderr:
                error: invalid command 'bdist_wheel'
                ---"}
        );
    }

    #[tokio::test]
    async fn requirement_install_failure_surfaces_output() {
        let store = InMemoryStore::default();
        let runner = FakeBackend {
            provision_exit_code: 1,
            ..FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE, SDIST_FILE])
        };
        let err =
            run_backend_build(&example_request(), &ResolveContext::default(), &store, &runner)
                .await
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            indoc! {"
                Failed to install build requirements for setuptools.build_meta:
                --- stdout:

                --- stderr:
                No matching distribution found for setuptools>=99
                ---"}
        );
        assert_eq!(runner.seen().len(), 1);
    }

    #[tokio::test]
    async fn missing_backend_pex_is_a_contract_violation() {
        let store = InMemoryStore::default();
        let runner = FakeBackend {
            provides_pex: false,
            ..FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE, SDIST_FILE])
        };
        let err =
            run_backend_build(&example_request(), &ResolveContext::default(), &store, &runner)
                .await
                .unwrap_err();
        assert!(matches!(err, Error::MissingBackendEnvironment));
    }

    #[tokio::test]
    async fn claimed_artifact_must_exist() {
        let store = InMemoryStore::default();
        // The backend claims a wheel and an sdist but only writes the wheel.
        let runner = FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE]);
        let err =
            run_backend_build(&example_request(), &ResolveContext::default(), &store, &runner)
                .await
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Build backend setuptools.build_meta did not create expected sdist file helloworld/helloworld-1.0.tar.gz"
        );
    }

    #[tokio::test]
    async fn big_sur_compatibility_sets_the_deployment_target() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner =
            FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE, SDIST_FILE]);
        let ctx = ResolveContext {
            macos_big_sur_compatibility: true,
            ..ResolveContext::default()
        };
        run_backend_build(&example_request(), &ctx, &store, &runner).await?;
        let build = &runner.seen()[1];
        if cfg!(target_os = "macos") {
            assert_eq!(
                build.env.get("MACOSX_DEPLOYMENT_TARGET").map(String::as_str),
                Some("10.16")
            );
        } else {
            assert!(!build.env.contains_key("MACOSX_DEPLOYMENT_TARGET"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn legacy_build_system_end_to_end() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let input = store
            .create(vec![FileEntry::new(
                "src/python/helloworld/setup.py",
                b"from setuptools import setup\nsetup()\n".to_vec(),
            )])
            .await?;
        let build_system = find_build_system(&store, &input, "src/python/helloworld").await?;
        let runner =
            FakeBackend::succeeding(store.clone(), BUILD_STDOUT, vec![WHEEL_FILE, SDIST_FILE]);
        let request = DistBuildRequest {
            build_system,
            input,
            ..example_request()
        };
        run_backend_build(&request, &ResolveContext::default(), &store, &runner).await?;

        let provision = &runner.seen()[0];
        assert!(provision.argv.contains(&"setuptools>=63.1.0,<64.0".to_string()));
        assert!(provision.argv.contains(&"wheel>=0.35.1,<0.38".to_string()));
        let shim = store
            .read(&runner.seen()[1].input, "src/python/helloworld/backend_shim.py")
            .await?
            .unwrap();
        assert!(String::from_utf8(shim)?.contains("backend = setuptools.build_meta.__legacy__"));
        Ok(())
    }
}
