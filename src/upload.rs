//! Report Upload
//!
//! Reports are copied to `s3://{bucket}/{client}/{provider}/{account}/{timestamp}/`
//! under the operator's own identity. The upload command never carries
//! scanned-account credentials; callers discard them before building it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::providers::CloudProvider;
use crate::runner::{CommandRunner, CommandSpec};
use crate::session::Session;

const AWS_CLI: &str = "aws";
const OWNERSHIP_ACL: &str = "bucket-owner-full-control";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Destination prefix for one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifactPath {
    pub bucket: String,
    pub client: String,
    pub provider: CloudProvider,
    pub account: String,
    pub timestamp: String,
}

impl RemoteArtifactPath {
    /// `now` is the upload time, not the session start
    pub fn at(session: &Session, bucket: &str, now: DateTime<Utc>) -> Self {
        let bucket = bucket.trim();
        let bucket = bucket.strip_prefix("s3://").unwrap_or(bucket).trim_end_matches('/');

        Self {
            bucket: bucket.to_string(),
            client: session.client.clone(),
            provider: session.provider,
            account: session.account.clone(),
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn uri(&self) -> String {
        format!(
            "s3://{}/{}/{}/{}/{}/",
            self.bucket, self.client, self.provider, self.account, self.timestamp
        )
    }
}

impl fmt::Display for RemoteArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded { remote: String },
    Failed { remote: String, reason: String },
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }
}

pub struct ArtifactUploader {
    runner: Arc<dyn CommandRunner>,
    region: String,
}

impl ArtifactUploader {
    pub fn new(runner: Arc<dyn CommandRunner>, region: &str) -> Self {
        Self {
            runner,
            region: region.to_string(),
        }
    }

    fn copy_command(&self, output_dir: &Path, remote: &RemoteArtifactPath) -> CommandSpec {
        CommandSpec::new(AWS_CLI)
            .args(["s3", "cp"])
            .arg(output_dir.display().to_string())
            .arg(remote.uri())
            .args([
                "--recursive",
                "--acl",
                OWNERSHIP_ACL,
                "--region",
                self.region.as_str(),
                "--only-show-errors",
            ])
    }

    /// Recursive copy of `output_dir`. Failure is a warning only.
    pub async fn upload(&self, output_dir: &Path, remote: &RemoteArtifactPath) -> UploadOutcome {
        let command = self.copy_command(output_dir, remote);
        info!(remote = %remote, command = %command, "Uploading reports");

        let failure = match self.runner.run(&command).await {
            Ok(output) if output.success() => {
                info!(remote = %remote, "Reports uploaded");
                return UploadOutcome::Uploaded {
                    remote: remote.uri(),
                };
            }
            Ok(output) => format!("exit {:?}: {}", output.code, output.stderr_tail()),
            Err(e) => e.to_string(),
        };

        warn!(remote = %remote, reason = %failure, "Report upload failed");
        UploadOutcome::Failed {
            remote: remote.uri(),
            reason: failure,
        }
    }
}
