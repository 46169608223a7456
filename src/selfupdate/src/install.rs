//! Temporary workspace and atomic replacement of the running executable.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{UpdateError, UpdateResult};

/// Temporary directory scoped to a single update attempt.
///
/// The directory and everything in it is removed when the workspace is
/// dropped, whether the attempt succeeded or not.
#[derive(Debug)]
pub struct UpdateWorkspace {
    dir: TempDir,
    executable_name: String,
}

impl UpdateWorkspace {
    /// Create a workspace named after the project and the version being installed.
    pub fn create(name: &str, version: &str) -> UpdateResult<Self> {
        let executable_name = sanitize_name(name);
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}_autoupdate_{}", executable_name, version))
            .tempdir()
            .map_err(UpdateError::TempDir)?;

        Ok(Self {
            dir,
            executable_name,
        })
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path the new executable is extracted to.
    pub fn executable_path(&self) -> PathBuf {
        self.dir.path().join(&self.executable_name)
    }

    /// Remove the workspace now, reporting errors instead of ignoring them.
    pub fn close(self) -> UpdateResult<()> {
        self.dir.close().map_err(UpdateError::Io)
    }
}

/// Keep only the final path component so a manifest name cannot escape the workspace.
fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("update")
        .to_string()
}

/// Get the path of the running executable.
pub fn current_executable() -> UpdateResult<PathBuf> {
    std::env::current_exe().map_err(UpdateError::Io)
}

/// Move the extracted executable onto `target`.
///
/// The replacement is a rename, so `target` either keeps the old binary or
/// holds the complete new one. When `new_executable` lives on another
/// filesystem it is first copied next to `target` and that copy is renamed.
pub fn install(new_executable: &Path, target: &Path) -> UpdateResult<()> {
    match std::fs::rename(new_executable, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                target = %target.display(),
                "Update is on another filesystem, staging it next to the executable"
            );
            stage_and_rename(new_executable, target)
        }
        Err(source) => Err(UpdateError::Install {
            path: target.to_path_buf(),
            source,
        }),
    }
}

fn stage_and_rename(new_executable: &Path, target: &Path) -> UpdateResult<()> {
    let install_error = |source: io::Error| UpdateError::Install {
        path: target.to_path_buf(),
        source,
    };

    let parent = target
        .parent()
        .ok_or_else(|| install_error(io::Error::other("executable path has no parent directory")))?;

    let staged = tempfile::Builder::new()
        .prefix(".selfupdate-")
        .tempfile_in(parent)
        .map_err(install_error)?;

    std::fs::copy(new_executable, staged.path()).map_err(install_error)?;
    staged.as_file().sync_all().map_err(install_error)?;

    // A failed persist drops the staged file, which removes it.
    staged
        .into_temp_path()
        .persist(target)
        .map_err(|e| install_error(e.error))?;

    Ok(())
}

/// Check if we have permission to write to the executable's directory.
pub fn check_write_permission(executable: &Path) -> UpdateResult<()> {
    let parent = executable.parent().ok_or_else(|| UpdateError::Install {
        path: executable.to_path_buf(),
        source: io::Error::other("executable path has no parent directory"),
    })?;

    tempfile::Builder::new()
        .prefix(".selfupdate-check-")
        .tempfile_in(parent)
        .map(drop)
        .map_err(|source| UpdateError::Install {
            path: parent.to_path_buf(),
            source,
        })
}
