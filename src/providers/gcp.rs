//! GCP: service account key activation
//!
//! The key document is stored under `/clients/{client}/gcp/{account}...`
//! with a `.../credentials/access` leaf, but the exact parameter name is
//! only known by that prefix and suffix. The document is written to a
//! per-account key file for `gcloud auth activate-service-account`, which
//! runs against a session-scoped `CLOUDSDK_CONFIG`; the key file is removed
//! as soon as activation succeeds.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use super::normalize::normalize_key_document;
use super::{compliance_args, BrokerContext, CloudProvider, ProviderAdapter, ProviderCredentials};
use crate::error::ScanError;
use crate::lifecycle::TempFileGuard;
use crate::runner::CommandSpec;
use crate::secrets::{Parameter, CREDENTIALS_LEAF};
use crate::session::Session;

const GCLOUD_CLI: &str = "gcloud";
const CONFIG_DIR_VAR: &str = "CLOUDSDK_CONFIG";

const DEFAULT_FRAMEWORKS: &[&str] = &["cis_2.0_gcp", "mitre_attack_gcp"];

/// An activated service account
pub struct GcpCredentials {
    pub client_email: Option<String>,
    pub project: String,
    /// Session-scoped `gcloud` profile holding the activation
    pub config_dir: PathBuf,
}

impl GcpCredentials {
    pub(super) fn env(&self) -> Vec<(String, String)> {
        vec![
            (CONFIG_DIR_VAR.to_string(), self.config_dir.display().to_string()),
            ("CLOUDSDK_CORE_PROJECT".to_string(), self.project.clone()),
            ("GOOGLE_CLOUD_PROJECT".to_string(), self.project.clone()),
        ]
    }
}

impl fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("client_email", &self.client_email)
            .field("project", &self.project)
            .finish()
    }
}

/// Pick the credential parameter for `client`/`account`.
///
/// Candidates live below the `/clients/{client}/gcp/{account}/` segment and
/// end with the credentials leaf; the lexicographically first name wins.
/// Sibling accounts sharing a name prefix (`proj-1-a` for `proj-1`) never match.
fn select_parameter(mut candidates: Vec<Parameter>, prefix: &str) -> Option<Parameter> {
    let segment = format!("{}/", prefix.trim_end_matches('/'));
    let suffix = format!("/{}", CREDENTIALS_LEAF);
    candidates.retain(|p| p.name.starts_with(&segment) && p.name.ends_with(&suffix));
    candidates.sort_by(|a, b| a.name.cmp(&b.name));

    if candidates.len() > 1 {
        debug!(
            count = candidates.len(),
            chosen = %candidates[0].name,
            "Several credential parameters match, using the first"
        );
    }
    candidates.into_iter().next()
}

pub struct GcpAdapter;

#[async_trait]
impl ProviderAdapter for GcpAdapter {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    fn default_frameworks(&self) -> &'static [&'static str] {
        DEFAULT_FRAMEWORKS
    }

    fn extra_args(&self, session: &Session, frameworks: &[String]) -> Vec<String> {
        let mut args = vec!["--project-ids".to_string(), session.account.clone()];
        args.extend(compliance_args(frameworks));
        args
    }

    async fn acquire_credentials(
        &self,
        ctx: &BrokerContext<'_>,
    ) -> Result<ProviderCredentials, ScanError> {
        let session = ctx.session;
        let root = format!("/clients/{}/gcp", session.client);
        let prefix = format!("{}/{}", root, session.account);

        let parameter = select_parameter(ctx.secrets.list(&root).await?, &prefix).ok_or_else(|| {
            ScanError::MissingSecret {
                path: format!("{}/{}", prefix, CREDENTIALS_LEAF),
            }
        })?;

        let document = normalize_key_document(&parameter.value)?;
        let client_email = document
            .get("client_email")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let key_json = serde_json::Value::Object(document).to_string();

        let config_dir = session.identity_subdir("gcloud")?;
        let config_dir_value = config_dir.display().to_string();

        let key_file = TempFileGuard::new(
            session
                .identity_dir()
                .join(format!("{}-credentials.json", session.account)),
            &key_json,
        )?;

        let activate = CommandSpec::new(GCLOUD_CLI)
            .args([
                "auth".to_string(),
                "activate-service-account".to_string(),
                format!("--key-file={}", key_file.path().display()),
                "--quiet".to_string(),
            ])
            .env(CONFIG_DIR_VAR, config_dir_value.as_str());

        let output = ctx
            .runner
            .run(&activate)
            .await
            .map_err(|e| ScanError::auth(CloudProvider::Gcp, e.to_string()))?;
        if !output.success() {
            return Err(ScanError::auth(
                CloudProvider::Gcp,
                format!("service account activation failed: {}", output.stderr_tail()),
            ));
        }

        key_file.remove();

        let select = CommandSpec::new(GCLOUD_CLI)
            .args(["config", "set", "project", session.account.as_str(), "--quiet"])
            .env(CONFIG_DIR_VAR, config_dir_value.as_str());

        let output = ctx
            .runner
            .run(&select)
            .await
            .map_err(|e| ScanError::auth(CloudProvider::Gcp, e.to_string()))?;
        if !output.success() {
            return Err(ScanError::auth(
                CloudProvider::Gcp,
                format!("project {} not selectable: {}", session.account, output.stderr_tail()),
            ));
        }

        info!(
            parameter = %parameter.name,
            service_account = client_email.as_deref().unwrap_or("unknown"),
            "Service account activated"
        );

        Ok(ProviderCredentials::Gcp(GcpCredentials {
            client_email,
            project: session.account.clone(),
            config_dir,
        }))
    }
}
