//! A [`ProcessRunner`] that executes processes on the local machine.
//!
//! Each run materializes the input snapshot into a scratch directory, spawns
//! the command with exactly the declared environment, and captures the
//! declared outputs back into the store. There is no result caching here: a
//! local run always executes fresh, whatever the process's cache scope says.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use pawl_types::{
    ContentStore, FileEntry, Process, ProcessError, ProcessResult, ProcessRunner,
};

pub struct LocalRunner<S> {
    store: S,
}

impl<S: ContentStore> LocalRunner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn materialize(&self, process: &Process, root: &Path) -> Result<(), ProcessError> {
        let io_error = |source| ProcessError::Io {
            description: process.description.clone(),
            source,
        };
        for entry in self.store.contents(&process.input).await? {
            let path = root.join(&entry.path);
            if let Some(parent) = path.parent() {
                fs_err::tokio::create_dir_all(parent).await.map_err(io_error)?;
            }
            fs_err::tokio::write(&path, &entry.content).await.map_err(io_error)?;
        }
        Ok(())
    }
}

/// Collect every file under `root` into `files`, with paths rooted at
/// `prefix`. A missing `root` captures nothing.
fn collect_dir(root: PathBuf, prefix: &str, files: &mut Vec<FileEntry>) -> io::Result<()> {
    let mut stack = vec![(root, prefix.to_string())];
    while let Some((dir, rel)) = stack.pop() {
        let entries = match fs_err::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = format!("{rel}/{name}");
            if entry.file_type()?.is_dir() {
                stack.push((entry.path(), child_rel));
            } else {
                files.push(FileEntry::new(child_rel, fs_err::read(entry.path())?));
            }
        }
    }
    Ok(())
}

impl<S: ContentStore> ProcessRunner for LocalRunner<S> {
    async fn run(&self, process: Process) -> Result<ProcessResult, ProcessError> {
        let io_error = |source| ProcessError::Io {
            description: process.description.clone(),
            source,
        };

        let scratch = tempfile::Builder::new()
            .prefix("pawl-exec-")
            .tempdir()
            .map_err(io_error)?;
        self.materialize(&process, scratch.path()).await?;

        let cwd = match &process.working_directory {
            Some(working_directory) => scratch.path().join(working_directory),
            None => scratch.path().to_path_buf(),
        };
        fs_err::tokio::create_dir_all(&cwd).await.map_err(io_error)?;

        let Some((program, args)) = process.argv.split_first() else {
            return Err(ProcessError::Spawn {
                command: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty argv"),
            });
        };

        debug!("Running {}: `{}`", process.description, process.argv.join(" "));
        let captured = Command::new(program)
            .args(args)
            .env_clear()
            .envs(&process.env)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: program.clone(),
                source,
            })?;
        let exit_code = captured.status.code().unwrap_or(-1);

        let mut files = Vec::new();
        for output_file in &process.output_files {
            match fs_err::tokio::read(cwd.join(output_file)).await {
                Ok(content) => files.push(FileEntry::new(output_file.clone(), content)),
                // Declared outputs the process never wrote are simply absent
                // from the output snapshot; callers detect what that means.
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_error(err)),
            }
        }
        for output_directory in &process.output_directories {
            collect_dir(cwd.join(output_directory), output_directory, &mut files)
                .map_err(io_error)?;
        }
        let output = self.store.create(files).await?;

        Ok(ProcessResult {
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code,
            output,
        })
    }
}
