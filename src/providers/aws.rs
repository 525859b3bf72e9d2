//! AWS: role assumption via STS
//!
//! The client account trusts an audit role whose ARN is stored at
//! `/clients/{client}/aws/{account}/role`. The operator identity assumes it
//! for a bounded duration; the resulting keys are cached back to the store
//! on a best-effort basis.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{compliance_args, BrokerContext, CloudProvider, ProviderAdapter, ProviderCredentials};
use crate::error::ScanError;
use crate::runner::CommandSpec;
use crate::secrets::{parameter_path, CREDENTIALS_LEAF, ROLE_LEAF};
use crate::session::Session;

const AWS_CLI: &str = "aws";

/// Variables that carry an AWS identity
pub const AWS_CREDENTIAL_VARS: [&str; 3] = ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_SESSION_TOKEN"];

const DEFAULT_FRAMEWORKS: &[&str] = &[
    "cis_3.0_aws",
    "aws_foundational_security_best_practices_aws",
    "soc2_aws",
];

/// Temporary keys from `sts assume-role`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[serde(default)]
    pub expiration: String,
    #[serde(skip)]
    pub region: String,
}

impl AwsCredentials {
    pub(super) fn env(&self) -> Vec<(String, String)> {
        let [key_id, secret, token] = AWS_CREDENTIAL_VARS;
        vec![
            (key_id.to_string(), self.access_key_id.clone()),
            (secret.to_string(), self.secret_access_key.clone()),
            (token.to_string(), self.session_token.clone()),
            ("AWS_DEFAULT_REGION".to_string(), self.region.clone()),
        ]
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[derive(Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "Credentials")]
    credentials: AwsCredentials,
}

/// `arn:<partition>:iam::<12-digit account>:role/<name>`
fn is_role_arn(value: &str) -> bool {
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    match parts.as_slice() {
        ["arn", partition, "iam", "", account, resource] => {
            partition.starts_with("aws")
                && account.len() == 12
                && account.bytes().all(|b| b.is_ascii_digit())
                && resource.len() > "role/".len()
                && resource.starts_with("role/")
                && !resource.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

pub struct AwsAdapter;

impl AwsAdapter {
    async fn role_arn(&self, ctx: &BrokerContext<'_>) -> Result<String, ScanError> {
        let session = ctx.session;
        let path = parameter_path(&session.client, CloudProvider::Aws, &session.account, ROLE_LEAF);

        let arn = match ctx.secrets.get(&path).await {
            Ok(value) => value.trim().to_string(),
            Err(ScanError::MissingSecret { path }) => return Err(ScanError::MissingRole { path }),
            Err(e) => return Err(e),
        };

        if arn.is_empty() {
            return Err(ScanError::MissingRole { path });
        }
        if !is_role_arn(&arn) {
            return Err(ScanError::InvalidCredentialFormat(format!(
                "value at {} is not an IAM role ARN",
                path
            )));
        }
        Ok(arn)
    }

    /// Cache rotated keys; failure is a warning only
    async fn persist_rotated(&self, ctx: &BrokerContext<'_>, credentials: &AwsCredentials) {
        let session = ctx.session;
        let path = parameter_path(
            &session.client,
            CloudProvider::Aws,
            &session.account,
            CREDENTIALS_LEAF,
        );

        let document = match serde_json::to_string(credentials) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "Could not serialise rotated credentials");
                return;
            }
        };

        if let Err(e) = ctx.secrets.put_encrypted(&path, &document).await {
            warn!(path = %path, error = %e, "Failed to cache rotated credentials");
        }
    }
}

#[async_trait]
impl ProviderAdapter for AwsAdapter {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    fn default_frameworks(&self) -> &'static [&'static str] {
        DEFAULT_FRAMEWORKS
    }

    fn extra_args(&self, _session: &Session, frameworks: &[String]) -> Vec<String> {
        compliance_args(frameworks)
    }

    async fn acquire_credentials(
        &self,
        ctx: &BrokerContext<'_>,
    ) -> Result<ProviderCredentials, ScanError> {
        let role_arn = self.role_arn(ctx).await?;

        let command = CommandSpec::new(AWS_CLI).args([
            "sts".to_string(),
            "assume-role".to_string(),
            "--role-arn".to_string(),
            role_arn.clone(),
            "--role-session-name".to_string(),
            ctx.session.role_session_name(),
            "--duration-seconds".to_string(),
            ctx.role_session_seconds.to_string(),
            "--region".to_string(),
            ctx.region.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ]);

        let output = ctx
            .runner
            .run(&command)
            .await
            .map_err(|e| ScanError::auth(CloudProvider::Aws, e.to_string()))?;

        if !output.success() {
            return Err(ScanError::auth(
                CloudProvider::Aws,
                format!("assume-role {} failed: {}", role_arn, output.stderr_tail()),
            ));
        }

        let response: AssumeRoleResponse = serde_json::from_str(&output.stdout).map_err(|e| {
            ScanError::auth(CloudProvider::Aws, format!("unexpected assume-role response: {}", e))
        })?;

        let mut credentials = response.credentials;
        credentials.region = ctx.region.to_string();

        info!(
            role = %role_arn,
            expiration = %credentials.expiration,
            "Assumed audit role"
        );

        self.persist_rotated(ctx, &credentials).await;

        Ok(ProviderCredentials::Aws(credentials))
    }
}
