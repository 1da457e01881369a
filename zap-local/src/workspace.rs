//! Ephemeral directories owned by one scanner instance.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ZapError;

#[derive(Debug)]
pub struct TempWorkspace {
    prefix: String,
    dirs: Vec<PathBuf>,
}

impl TempWorkspace {
    pub fn new(ident: &str) -> Self {
        Self {
            prefix: format!("zaplocal_{ident}_"),
            dirs: Vec::new(),
        }
    }

    /// Creates a new directory under the system temp dir. It survives until
    /// [`TempWorkspace::remove_all`] runs.
    pub fn create(&mut self, name: &str) -> Result<PathBuf, ZapError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}_", self.prefix, name))
            .disable_cleanup(true)
            .tempdir()?;
        let path = dir.path().to_path_buf();
        debug!("Created temporary directory {}", path.display());
        self.dirs.push(path.clone());
        Ok(path)
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Removes every directory created so far. All removals are attempted; the
    /// first failure is returned.
    pub fn remove_all(&mut self) -> Result<(), ZapError> {
        let mut first_err = None;
        for dir in self.dirs.drain(..) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!("Removed temporary directory {}", dir.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("Temporary directory {} was already gone", dir.display())
                }
                Err(err) => {
                    warn!("Unable to remove {}: {}", dir.display(), err);
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// Whether a file can be created inside the existing directory `path`.
pub fn dir_writable(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let probe = path.join(format!(".zap_local_write_test.{}", std::process::id()));
    fs::write(&probe, b"ok")
        .and_then(|_| fs::remove_file(&probe))
        .is_ok()
}

/// Some tools (the Ajax spider's browser in particular) need a writable HOME.
/// Returns a freshly created replacement when `home` is unset or read-only.
pub fn writable_home(
    home: Option<&Path>,
    workspace: &mut TempWorkspace,
) -> Result<Option<PathBuf>, ZapError> {
    if home.is_some_and(dir_writable) {
        return Ok(None);
    }
    let replacement = workspace.create("home")?;
    debug!("Replacing HOME directory with {}", replacement.display());
    Ok(Some(replacement))
}
