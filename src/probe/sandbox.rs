//! Throwaway home directories for probe invocations.
//!
//! Each request gets its own uniquely named directory, used as `$HOME` for
//! the verifier. The directory is removed when the [`Sandbox`] is destroyed
//! or dropped, so every exit path (including timeouts, errors and panics)
//! cleans up after itself.

use super::error::{ProbeError, ProbeResult};
use crate::metrics;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Directory under the sandbox home where the verifier looks for credentials
pub const CREDENTIAL_HOME_DIR: &str = ".codex";

const SANDBOX_PREFIX: &str = "authprobe-";

/// Allocates sandboxes, optionally under a configured root
#[derive(Debug, Clone, Default)]
pub struct SandboxFactory {
    root: Option<PathBuf>,
}

impl SandboxFactory {
    /// Factory that allocates under the system temp directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that allocates under `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Allocate an empty, uniquely named sandbox with its credential home
    /// already created.
    pub fn create(&self) -> ProbeResult<Sandbox> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SANDBOX_PREFIX);

        let dir = match &self.root {
            Some(root) => {
                fs::create_dir_all(root).map_err(|source| ProbeError::WriteError {
                    path: root.clone(),
                    source,
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|source| ProbeError::WriteError {
            path: self.root.clone().unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        let credential_home = dir.path().join(CREDENTIAL_HOME_DIR);
        // Dropping `dir` on this error path removes the half-built sandbox
        create_private_dir(&credential_home).map_err(|source| ProbeError::WriteError {
            path: credential_home.clone(),
            source,
        })?;

        debug!("Created sandbox {:?}", dir.path());
        metrics::ACTIVE_SANDBOXES.inc();

        Ok(Sandbox {
            path: dir.path().to_path_buf(),
            credential_home,
            dir: Some(dir),
        })
    }
}

/// A throwaway home directory owned by exactly one request
#[derive(Debug)]
pub struct Sandbox {
    path: PathBuf,
    credential_home: PathBuf,
    dir: Option<TempDir>,
}

impl Sandbox {
    /// Root of the sandbox, used as `$HOME`
    pub fn home(&self) -> &Path {
        &self.path
    }

    /// The pre-created credential directory inside the sandbox
    pub fn credential_home(&self) -> &Path {
        &self.credential_home
    }

    /// Remove the sandbox tree. Failures are logged, never returned.
    pub fn destroy(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!("Removed sandbox {:?}", self.path),
            Err(e) => warn!("Failed to remove sandbox {:?}: {}", self.path, e),
        }
        metrics::ACTIVE_SANDBOXES.dec();
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir(path)
}
