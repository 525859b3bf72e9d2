//! Scan Session
//!
//! One session is one (client, provider, account) run. Its identifier and
//! working directory are fixed at start and scope every name that could
//! collide with a concurrent session: role-session name, CLI config
//! directories, key files and the report directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info_span, Span};
use uuid::Uuid;

use crate::error::ScanError;
use crate::providers::CloudProvider;

const OUTPUT_DIR: &str = "output";
const IDENTITY_DIR: &str = "identity";

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub client: String,
    pub provider: CloudProvider,
    pub account: String,
    /// Session root, `<work root>/compliance-scan-<id>`
    pub work_dir: PathBuf,
    /// Report directory handed to the scanner and uploaded afterwards
    pub output_dir: PathBuf,
}

impl Session {
    /// Start a session and create its working directories.
    ///
    /// The session root is created with `create_dir`, so an existing
    /// directory is an error rather than being reused. Client and account
    /// end up in parameter paths, file names and object keys, so each must
    /// be a single path segment.
    pub fn start(
        client: impl Into<String>,
        provider: CloudProvider,
        account: impl Into<String>,
        work_root: &Path,
    ) -> Result<Self, ScanError> {
        let client = path_segment("client", client.into())?;
        let account = path_segment("account", account.into())?;
        let id = Uuid::new_v4();
        let work_dir = work_root.join(format!("compliance-scan-{}", id.simple()));

        fs::create_dir_all(work_root)?;
        fs::create_dir(&work_dir)?;
        let output_dir = work_dir.join(OUTPUT_DIR);
        fs::create_dir(&output_dir)?;
        fs::create_dir(work_dir.join(IDENTITY_DIR))?;

        debug!(work_dir = ?work_dir, "Created session directories");

        Ok(Self {
            id,
            started_at: Utc::now(),
            client,
            provider,
            account,
            work_dir,
            output_dir,
        })
    }

    /// Directory for per-session identity material (CLI profiles, key files).
    /// Never uploaded.
    pub fn identity_dir(&self) -> PathBuf {
        self.work_dir.join(IDENTITY_DIR)
    }

    /// Create (if needed) and return a named directory under the identity dir
    pub fn identity_subdir(&self, name: &str) -> Result<PathBuf, ScanError> {
        let dir = self.identity_dir().join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// STS role-session name; unique per session
    pub fn role_session_name(&self) -> String {
        format!("compliance-scan-{}", self.id.simple())
    }

    /// Base name for report files
    pub fn filename_base(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.client,
            self.provider,
            self.account,
            self.started_at.format("%Y%m%d%H%M%S")
        )
    }

    /// Span carrying the session context on every log line
    pub fn span(&self) -> Span {
        info_span!(
            "session",
            id = %self.id,
            client = %self.client,
            provider = %self.provider,
            account = %self.account
        )
    }
}

fn path_segment(field: &'static str, value: String) -> Result<String, ScanError> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control() || c.is_whitespace());

    if valid {
        Ok(value)
    } else {
        Err(ScanError::InvalidTarget { field, value })
    }
}
