//! Client Secret Store
//!
//! Long-lived client secrets live in AWS SSM Parameter Store under
//! `/clients/{client}/{provider}/{account}/...`, encrypted at rest as
//! `SecureString`. Reads and writes go through the `aws` CLI under the
//! operator's own identity.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ScanError;
use crate::lifecycle::TempFileGuard;
use crate::providers::CloudProvider;
use crate::runner::{CommandRunner, CommandSpec};

/// Leaf holding the AWS role ARN
pub const ROLE_LEAF: &str = "role";
/// Leaf holding a credential blob (or cached rotated credentials)
pub const CREDENTIALS_LEAF: &str = "credentials/access";

const AWS_CLI: &str = "aws";
const NOT_FOUND_MARKER: &str = "ParameterNotFound";

/// `/clients/{client}/{provider}/{account}/{leaf}`
pub fn parameter_path(client: &str, provider: CloudProvider, account: &str, leaf: &str) -> String {
    format!("/clients/{}/{}/{}/{}", client, provider, account, leaf)
}

/// A decrypted parameter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// Encrypted hierarchical key-value store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Decrypted value at `path`; [`ScanError::MissingSecret`] when absent
    async fn get(&self, path: &str) -> Result<String, ScanError>;

    /// Every parameter below `path`, recursively
    async fn list(&self, path: &str) -> Result<Vec<Parameter>, ScanError>;

    /// Create or overwrite an encrypted parameter
    async fn put_encrypted(&self, path: &str, value: &str) -> Result<(), ScanError>;
}

#[derive(Deserialize)]
struct GetParameterResponse {
    #[serde(rename = "Parameter")]
    parameter: Parameter,
}

#[derive(Deserialize)]
struct GetParametersByPathResponse {
    #[serde(rename = "Parameters", default)]
    parameters: Vec<Parameter>,
}

/// SSM Parameter Store through the `aws` CLI
pub struct ParameterStore {
    runner: Arc<dyn CommandRunner>,
    region: String,
    /// Where values are staged for `put-parameter --value file://...`
    scratch_dir: PathBuf,
}

impl ParameterStore {
    pub fn new(runner: Arc<dyn CommandRunner>, region: &str, scratch_dir: PathBuf) -> Self {
        Self {
            runner,
            region: region.to_string(),
            scratch_dir,
        }
    }

    fn ssm(&self, operation: &str) -> CommandSpec {
        CommandSpec::new(AWS_CLI).args([
            "ssm",
            operation,
            "--region",
            self.region.as_str(),
            "--output",
            "json",
        ])
    }
}

#[async_trait]
impl SecretStore for ParameterStore {
    async fn get(&self, path: &str) -> Result<String, ScanError> {
        debug!(path = %path, "Fetching parameter");

        let command = self
            .ssm("get-parameter")
            .args(["--name", path, "--with-decryption"]);
        let output = self.runner.run(&command).await?;

        if !output.success() {
            if output.stderr.contains(NOT_FOUND_MARKER) {
                return Err(ScanError::MissingSecret {
                    path: path.to_string(),
                });
            }
            return Err(ScanError::SecretStore(format!(
                "get-parameter {} failed: {}",
                path,
                output.stderr_tail()
            )));
        }

        let response: GetParameterResponse = serde_json::from_str(&output.stdout)
            .map_err(|e| ScanError::SecretStore(format!("Unexpected get-parameter response: {}", e)))?;

        info!(
            path = %path,
            length = response.parameter.value.len(),
            "Parameter retrieved"
        );
        Ok(response.parameter.value)
    }

    async fn list(&self, path: &str) -> Result<Vec<Parameter>, ScanError> {
        debug!(path = %path, "Listing parameters");

        let command = self
            .ssm("get-parameters-by-path")
            .args(["--path", path, "--recursive", "--with-decryption"]);
        let output = self.runner.run(&command).await?;

        if !output.success() {
            return Err(ScanError::SecretStore(format!(
                "get-parameters-by-path {} failed: {}",
                path,
                output.stderr_tail()
            )));
        }

        let response: GetParametersByPathResponse = serde_json::from_str(&output.stdout)
            .map_err(|e| {
                ScanError::SecretStore(format!("Unexpected get-parameters-by-path response: {}", e))
            })?;

        Ok(response.parameters)
    }

    async fn put_encrypted(&self, path: &str, value: &str) -> Result<(), ScanError> {
        // Staged in a file so the value never shows up in the process table
        let staged = TempFileGuard::new(
            self.scratch_dir
                .join(format!("parameter-{}.json", path.replace('/', "_"))),
            value,
        )?;

        let command = self.ssm("put-parameter").args([
            "--name".to_string(),
            path.to_string(),
            "--type".to_string(),
            "SecureString".to_string(),
            "--overwrite".to_string(),
            "--value".to_string(),
            format!("file://{}", staged.path().display()),
        ]);
        let output = self.runner.run(&command).await?;
        staged.remove();

        if !output.success() {
            return Err(ScanError::SecretStore(format!(
                "put-parameter {} failed: {}",
                path,
                output.stderr_tail()
            )));
        }

        info!(path = %path, "Parameter written");
        Ok(())
    }
}
