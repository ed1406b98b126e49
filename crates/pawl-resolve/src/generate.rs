use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use pawl_lock::{LockfileDiff, LockfileMetadata};
use pawl_requirements::{InterpreterConstraints, ParseError, Requirement, RequirementOrigin};
use pawl_types::{
    CacheScope, ContentStore, FileEntry, Process, ProcessError, ProcessRunner, ResolveContext,
    Snapshot, StoreError,
};

use crate::config::ResolveConfig;

/// The filename the resolver is told to write inside its sandbox. The real
/// destination is the request's `lockfile_dest`; renaming happens at persist
/// time.
const OUTPUT_FILENAME: &str = "lock.json";

const HEADER_DELIMITER: &str = "//";

/// A single lockfile to generate.
#[derive(Debug, Clone)]
pub struct GenerateLockfile {
    pub resolve_name: String,
    /// Raw requirement strings. Deduplicated and sorted by construction.
    pub requirements: BTreeSet<String>,
    pub find_links: BTreeSet<String>,
    pub interpreter_constraints: InterpreterConstraints,
    /// Workspace-relative destination path, or the tool sentinel.
    pub lockfile_dest: String,
    /// Compute a best-effort diff against `previous_lockfile`.
    pub diff: bool,
    /// Bytes of the current on-disk lockfile, if any. Only read for the diff.
    pub previous_lockfile: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum GenerateLockfileError {
    #[error(
        "Cannot generate lockfile with no requirements. Please add some requirements to {resolve_name}."
    )]
    NoRequirements { resolve_name: String },
    #[error("Failed to generate lockfile for the resolve `{resolve_name}`:\n{stderr}")]
    ResolverFailed {
        resolve_name: String,
        exit_code: i32,
        stderr: String,
    },
    #[error(
        "The resolver reported success for the resolve `{resolve_name}` but produced no `lock.json`"
    )]
    MissingLockfile { resolve_name: String },
    #[error(transparent)]
    Requirement(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// A generated lockfile, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct GenerateLockfileResult {
    pub resolve_name: String,
    pub lockfile_dest: String,
    /// Final file contents: metadata header plus the resolver's document.
    pub contents: Vec<u8>,
    pub diff: Option<LockfileDiff>,
}

impl GenerateLockfileResult {
    /// Write the lockfile to `workspace_root`/`lockfile_dest`, creating parent
    /// directories. The bytes are staged in a temporary file next to the
    /// destination and renamed into place, so a crash cannot leave a partial
    /// lockfile behind.
    pub fn persist(&self, workspace_root: &Path) -> std::io::Result<()> {
        let dest = workspace_root.join(&self.lockfile_dest);
        let parent = dest.parent().expect("Write path must have a parent");
        fs_err::create_dir_all(parent)?;
        let temp_file = tempfile::NamedTempFile::new_in(parent)?;
        fs_err::write(&temp_file, &self.contents)?;
        temp_file.persist(&dest).map_err(|err| {
            std::io::Error::other(format!(
                "Failed to persist temporary file to {}: {}",
                dest.display(),
                err.error
            ))
        })?;
        Ok(())
    }
}

/// Generate one lockfile by driving the external resolver.
///
/// The process runs under [`CacheScope::PerSession`]: the resolver's answer
/// for identical inputs legitimately drifts as package indexes change, so
/// whether an existing lockfile is reusable is decided by comparing its
/// embedded metadata, never by a result cache.
#[instrument(skip_all, fields(resolve = %request.resolve_name))]
pub async fn generate_lockfile(
    request: &GenerateLockfile,
    ctx: &ResolveContext,
    store: &impl ContentStore,
    runner: &impl ProcessRunner,
) -> Result<GenerateLockfileResult, GenerateLockfileError> {
    if request.requirements.is_empty() {
        return Err(GenerateLockfileError::NoRequirements {
            resolve_name: request.resolve_name.clone(),
        });
    }

    let config = ResolveConfig::for_resolve(ctx, &request.resolve_name);

    let input = match &config.constraints_file {
        Some(constraints) => {
            store
                .create(vec![FileEntry::new(
                    constraints.path.clone(),
                    constraints.content.clone(),
                )])
                .await?
        }
        None => Snapshot::empty(),
    };

    let process = Process::new(
        resolver_argv(request, ctx, &config),
        format!("Generate lockfile for {}", request.resolve_name),
    )
    .with_input(input)
    .with_output_files([OUTPUT_FILENAME])
    .with_cache_scope(CacheScope::PerSession);
    debug!("Running `{}`", process.argv.join(" "));
    let result = runner.run(process).await?;

    if result.exit_code != 0 {
        return Err(GenerateLockfileError::ResolverFailed {
            resolve_name: request.resolve_name.clone(),
            exit_code: result.exit_code,
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        });
    }
    let Some(document) = store.read(&result.output, OUTPUT_FILENAME).await? else {
        return Err(GenerateLockfileError::MissingLockfile {
            resolve_name: request.resolve_name.clone(),
        });
    };

    let origin = RequirementOrigin::Lockfile {
        dest: request.lockfile_dest.clone(),
        resolve: request.resolve_name.clone(),
    };
    let metadata = LockfileMetadata {
        valid_for_interpreter_constraints: request.interpreter_constraints.clone(),
        generated_with_requirements: request
            .requirements
            .iter()
            .map(|requirement| Requirement::parse(requirement, origin.clone()))
            .collect::<Result<_, _>>()?,
        requirement_constraints: config
            .constraints_file
            .as_ref()
            .map(|file| file.requirements.clone())
            .unwrap_or_default(),
        manylinux: config.manylinux.clone(),
        only_binary: config.only_binary.clone(),
        no_binary: config.no_binary.clone(),
    };
    let regenerate_command = ctx.lockfile_custom_regenerate_command.clone().unwrap_or_else(|| {
        format!("pawl generate-lockfiles --resolve={}", request.resolve_name)
    });
    let contents =
        metadata.add_header_to_lockfile(&document, &regenerate_command, HEADER_DELIMITER);

    let diff = if request.diff {
        compute_diff(request, &contents)
    } else {
        None
    };

    Ok(GenerateLockfileResult {
        resolve_name: request.resolve_name.clone(),
        lockfile_dest: request.lockfile_dest.clone(),
        contents,
        diff,
    })
}

/// Best effort by contract: a diff is log output, never a reason to fail
/// generation.
fn compute_diff(request: &GenerateLockfile, new_contents: &[u8]) -> Option<LockfileDiff> {
    let diff = LockfileDiff::compute(
        &request.lockfile_dest,
        &request.resolve_name,
        request.previous_lockfile.as_deref(),
        new_contents,
    );
    match &diff {
        Some(diff) if diff.has_changes() => debug!("{diff}"),
        Some(_) => {}
        None if request.previous_lockfile.is_some() => {
            warn!(
                "Failed to read the previous contents of `{}` for diffing; skipping the diff",
                request.lockfile_dest
            );
        }
        None => {}
    }
    diff
}

fn resolver_argv(
    request: &GenerateLockfile,
    ctx: &ResolveContext,
    config: &ResolveConfig,
) -> Vec<String> {
    let mut argv = vec![
        ctx.resolver_exe.clone(),
        "lock".to_string(),
        "create".to_string(),
        format!("--output={OUTPUT_FILENAME}"),
        "--style=universal".to_string(),
        "--pip-version".to_string(),
        ctx.pip_version.clone(),
        "--resolver-version".to_string(),
        ctx.resolver_version.clone(),
        "--target-system".to_string(),
        "linux".to_string(),
        "--target-system".to_string(),
        "mac".to_string(),
        "--indent=2".to_string(),
        format!("--python-path={}", ctx.interpreter_path),
    ];
    argv.extend(
        request
            .find_links
            .iter()
            .map(|url| format!("--find-links={url}")),
    );
    argv.extend(config.args());
    argv.extend(request.interpreter_constraints.to_arg_list());
    argv.extend(request.requirements.iter().cloned());
    argv
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use indoc::indoc;

    use pawl_lock::{LockfileMetadata, LockfileState, validate};
    use pawl_requirements::InterpreterConstraints;
    use pawl_store::InMemoryStore;
    use pawl_types::{
        CacheScope, ConstraintsFile, ContentStore, FileEntry, Process, ProcessError,
        ProcessResult, ProcessRunner, ResolveContext, Snapshot,
    };

    use super::{GenerateLockfile, GenerateLockfileError, generate_lockfile};

    const DOCUMENT: &str = indoc! {r#"
        {
          "locked_resolves": [
            {
              "locked_requirements": [
                {"project_name": "certifi", "version": "2023.7.22"},
                {"project_name": "flask", "version": "2.3.3"}
              ]
            }
          ]
        }
    "#};

    struct FakeResolver {
        store: InMemoryStore,
        exit_code: i32,
        stderr: &'static str,
        document: Option<&'static str>,
        seen: Mutex<Vec<Process>>,
    }

    impl FakeResolver {
        fn succeeding(store: InMemoryStore, document: &'static str) -> Self {
            Self {
                store,
                exit_code: 0,
                stderr: "",
                document: Some(document),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(store: InMemoryStore, exit_code: i32, stderr: &'static str) -> Self {
            Self {
                store,
                exit_code,
                stderr,
                document: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Process> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for FakeResolver {
        async fn run(&self, process: Process) -> Result<ProcessResult, ProcessError> {
            self.seen.lock().unwrap().push(process);
            let output = match self.document {
                Some(document) => {
                    self.store
                        .create(vec![FileEntry::new("lock.json", document.as_bytes().to_vec())])
                        .await?
                }
                None => Snapshot::empty(),
            };
            Ok(ProcessResult {
                stdout: Vec::new(),
                stderr: self.stderr.as_bytes().to_vec(),
                exit_code: self.exit_code,
                output,
            })
        }
    }

    fn example_ctx() -> ResolveContext {
        ResolveContext {
            only_binary: BTreeSet::from(["psycopg2".to_string()]),
            indexes: vec!["https://pypi.example.com/simple".to_string()],
            extra_resolver_args: vec!["--prefer-binary".to_string()],
            constraints_file: Some(
                ConstraintsFile::parse("3rdparty/constraints.txt", "certifi==2023.7.22\n")
                    .unwrap(),
            ),
            ..ResolveContext::default()
        }
    }

    fn example_request() -> GenerateLockfile {
        GenerateLockfile {
            resolve_name: "data-science".to_string(),
            requirements: BTreeSet::from([
                "flask==2.3.2".to_string(),
                "requests>=2.28".to_string(),
            ]),
            find_links: BTreeSet::from(["https://wheels.example.com/".to_string()]),
            interpreter_constraints: InterpreterConstraints::parse(["CPython<4,>=3.8"], None)
                .unwrap(),
            lockfile_dest: "3rdparty/python/data_science.lock".to_string(),
            diff: false,
            previous_lockfile: None,
        }
    }

    #[tokio::test]
    async fn empty_requirements_fail_before_any_process() {
        let store = InMemoryStore::default();
        let runner = FakeResolver::succeeding(store.clone(), DOCUMENT);
        let request = GenerateLockfile {
            requirements: BTreeSet::new(),
            ..example_request()
        };
        let err = generate_lockfile(&request, &example_ctx(), &store, &runner)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot generate lockfile with no requirements. Please add some requirements to data-science."
        );
        assert!(runner.seen().is_empty());
    }

    #[tokio::test]
    async fn resolver_invocation() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner = FakeResolver::succeeding(store.clone(), DOCUMENT);
        generate_lockfile(&example_request(), &example_ctx(), &store, &runner).await?;

        let seen = runner.seen();
        assert_eq!(seen.len(), 1);
        let process = &seen[0];
        insta::assert_snapshot!(process.argv.join("\n"), @r"
        pex
        lock
        create
        --output=lock.json
        --style=universal
        --pip-version
        24.2
        --resolver-version
        pip-2020-resolver
        --target-system
        linux
        --target-system
        mac
        --indent=2
        --python-path=python3
        --find-links=https://wheels.example.com/
        --manylinux=manylinux2014
        --only-binary=psycopg2
        --index=https://pypi.example.com/simple
        --prefer-binary
        --constraints=3rdparty/constraints.txt
        --interpreter-constraint
        cpython<4,>=3.8
        flask==2.3.2
        requests>=2.28
        ");
        assert_eq!(process.cache_scope, CacheScope::PerSession);
        assert_eq!(process.output_files, ["lock.json"]);
        assert_eq!(process.description, "Generate lockfile for data-science");
        assert!(process.input.contains("3rdparty/constraints.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn no_constraints_file_means_empty_input() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner = FakeResolver::succeeding(store.clone(), DOCUMENT);
        let ctx = ResolveContext::default();
        generate_lockfile(&example_request(), &ctx, &store, &runner).await?;
        assert!(runner.seen()[0].input.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn resolver_failure_surfaces_stderr() {
        let store = InMemoryStore::default();
        let runner = FakeResolver::failing(
            store.clone(),
            1,
            "ERROR: No matching distribution found for flask==99\n",
        );
        let err = generate_lockfile(&example_request(), &example_ctx(), &store, &runner)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            GenerateLockfileError::ResolverFailed { exit_code: 1, .. }
        ));
        assert_eq!(
            err.to_string(),
            "Failed to generate lockfile for the resolve `data-science`:\nERROR: No matching distribution found for flask==99\n"
        );
    }

    #[tokio::test]
    async fn missing_output_is_a_contract_violation() {
        let store = InMemoryStore::default();
        // Exit zero but no lock.json in the output.
        let runner = FakeResolver {
            document: None,
            ..FakeResolver::succeeding(store.clone(), DOCUMENT)
        };
        let err = generate_lockfile(&example_request(), &example_ctx(), &store, &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateLockfileError::MissingLockfile { .. }));
    }

    #[tokio::test]
    async fn header_attached_and_valid() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner = FakeResolver::succeeding(store.clone(), DOCUMENT);
        let ctx = example_ctx();
        let request = example_request();
        let result = generate_lockfile(&request, &ctx, &store, &runner).await?;

        let text = String::from_utf8(result.contents.clone())?;
        assert!(text.starts_with("// This lockfile was autogenerated. To regenerate, run:"));
        assert!(text.contains("//    pawl generate-lockfiles --resolve=data-science"));
        assert!(text.ends_with(DOCUMENT));

        let expected = LockfileMetadata {
            valid_for_interpreter_constraints: request.interpreter_constraints.clone(),
            generated_with_requirements: request
                .requirements
                .iter()
                .map(|requirement| requirement.parse())
                .collect::<Result<_, _>>()?,
            requirement_constraints: ["certifi==2023.7.22".parse()?].into_iter().collect(),
            manylinux: Some("manylinux2014".to_string()),
            only_binary: BTreeSet::from(["psycopg2".to_string()]),
            no_binary: BTreeSet::new(),
        };
        assert_eq!(validate(&text, &expected, [])?, LockfileState::Valid);
        Ok(())
    }

    #[tokio::test]
    async fn custom_regenerate_command() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner = FakeResolver::succeeding(store.clone(), DOCUMENT);
        let ctx = ResolveContext {
            lockfile_custom_regenerate_command: Some("make relock".to_string()),
            ..example_ctx()
        };
        let result = generate_lockfile(&example_request(), &ctx, &store, &runner).await?;
        let text = String::from_utf8(result.contents)?;
        assert!(text.contains("//    make relock\n"));
        assert!(!text.contains("generate-lockfiles"));
        Ok(())
    }

    #[tokio::test]
    async fn diff_against_previous_lockfile() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner = FakeResolver::succeeding(store.clone(), DOCUMENT);
        let previous = indoc! {r#"
            {
              "locked_resolves": [
                {
                  "locked_requirements": [
                    {"project_name": "flask", "version": "2.3.2"}
                  ]
                }
              ]
            }
        "#};
        let request = GenerateLockfile {
            diff: true,
            previous_lockfile: Some(previous.as_bytes().to_vec()),
            ..example_request()
        };
        let result = generate_lockfile(&request, &example_ctx(), &store, &runner).await?;
        let diff = result.diff.unwrap();
        assert_eq!(
            diff.upgraded.get("flask"),
            Some(&("2.3.2".to_string(), "2.3.3".to_string()))
        );
        assert_eq!(diff.added.get("certifi"), Some(&"2023.7.22".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_previous_lockfile_is_swallowed() -> anyhow::Result<()> {
        let store = InMemoryStore::default();
        let runner = FakeResolver::succeeding(store.clone(), DOCUMENT);
        let request = GenerateLockfile {
            diff: true,
            previous_lockfile: Some(b"garbage".to_vec()),
            ..example_request()
        };
        let result = generate_lockfile(&request, &example_ctx(), &store, &runner).await?;
        assert_eq!(result.diff, None);
        Ok(())
    }

    #[test]
    fn persist_creates_parents_and_writes_atomically() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        let result = super::GenerateLockfileResult {
            resolve_name: "data-science".to_string(),
            lockfile_dest: "3rdparty/python/data_science.lock".to_string(),
            contents: b"// header\n{}\n".to_vec(),
            diff: None,
        };
        result.persist(workspace.path())?;
        let written =
            fs_err::read(workspace.path().join("3rdparty/python/data_science.lock"))?;
        assert_eq!(written, result.contents);
        Ok(())
    }
}
