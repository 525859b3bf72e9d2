//! Secret File Lifecycle
//!
//! RAII guard for credential documents that have to touch disk (the GCP
//! key file handed to `gcloud`, parameter values handed to `aws ssm`).
//! The file is overwritten and deleted when the guard is dropped, even on
//! an early return.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    /// Write `content` to `path` (owner-only permissions on unix)
    pub fn new(path: PathBuf, content: &str) -> io::Result<Self> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        debug!(path = ?path, "Created temporary secret file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Already-removed files are not an error.
    pub fn remove(self) {
        // Drop does the work
    }

    fn wipe(&self) -> io::Result<()> {
        let size = fs::metadata(&self.path)?.len() as usize;
        fs::write(&self.path, vec![0u8; size])
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }

        if let Err(e) = self.wipe() {
            warn!(path = ?self.path, error = %e, "Failed to overwrite temporary secret file");
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Deleted temporary secret file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to delete temporary secret file"),
        }
    }
}
