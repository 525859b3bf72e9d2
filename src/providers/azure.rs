//! Azure: service principal login
//!
//! The service principal document lives at
//! `/clients/{client}/azure/{account}/credentials/access`. `az` runs with a
//! session-scoped `AZURE_CONFIG_DIR`, so the login never lands in the
//! operator's own profile.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::normalize::decode_json_layers;
use super::{compliance_args, BrokerContext, CloudProvider, ProviderAdapter, ProviderCredentials};
use crate::error::ScanError;
use crate::runner::CommandSpec;
use crate::secrets::{parameter_path, CREDENTIALS_LEAF};
use crate::session::Session;

const AZ_CLI: &str = "az";
const CONFIG_DIR_VAR: &str = "AZURE_CONFIG_DIR";

const DEFAULT_FRAMEWORKS: &[&str] = &["cis_2.1_azure", "mitre_attack_azure"];

#[derive(Deserialize)]
struct ServicePrincipal {
    #[serde(alias = "tenantId", alias = "tenant")]
    tenant_id: String,
    #[serde(alias = "clientId", alias = "appId")]
    client_id: String,
    #[serde(alias = "clientSecret", alias = "password")]
    client_secret: String,
    #[serde(alias = "subscriptionId")]
    subscription_id: String,
}

fn parse_service_principal(raw: &str) -> Result<ServicePrincipal, ScanError> {
    serde_json::from_value(decode_json_layers(raw)).map_err(|e| {
        ScanError::InvalidCredentialFormat(format!("service principal document: {}", e))
    })
}

/// A logged-in service principal
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    client_secret: String,
    pub subscription_id: String,
    /// Session-scoped `az` profile holding the login
    pub config_dir: PathBuf,
}

impl AzureCredentials {
    pub(super) fn env(&self) -> Vec<(String, String)> {
        vec![
            (CONFIG_DIR_VAR.to_string(), self.config_dir.display().to_string()),
            ("AZURE_TENANT_ID".to_string(), self.tenant_id.clone()),
            ("AZURE_CLIENT_ID".to_string(), self.client_id.clone()),
            ("AZURE_CLIENT_SECRET".to_string(), self.client_secret.clone()),
            ("AZURE_SUBSCRIPTION_ID".to_string(), self.subscription_id.clone()),
        ]
    }
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

pub struct AzureAdapter;

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    fn default_frameworks(&self) -> &'static [&'static str] {
        DEFAULT_FRAMEWORKS
    }

    fn extra_args(&self, session: &Session, frameworks: &[String]) -> Vec<String> {
        let mut args = vec![
            "--az-cli-auth".to_string(),
            "--subscription-ids".to_string(),
            session.account.clone(),
        ];
        args.extend(compliance_args(frameworks));
        args
    }

    async fn acquire_credentials(
        &self,
        ctx: &BrokerContext<'_>,
    ) -> Result<ProviderCredentials, ScanError> {
        let session = ctx.session;
        let path = parameter_path(
            &session.client,
            CloudProvider::Azure,
            &session.account,
            CREDENTIALS_LEAF,
        );

        let raw = ctx.secrets.get(&path).await?;
        let sp = parse_service_principal(&raw)?;

        if sp.subscription_id != session.account {
            warn!(
                subscription = %sp.subscription_id,
                "Stored subscription differs from the requested account"
            );
        }

        let config_dir = session.identity_subdir("azure")?;
        let config_dir_value = config_dir.display().to_string();

        let login = CommandSpec::new(AZ_CLI)
            .args([
                "login",
                "--service-principal",
                "--username",
                sp.client_id.as_str(),
                "--password",
            ])
            .secret_arg(sp.client_secret.as_str())
            .args(["--tenant", sp.tenant_id.as_str(), "--output", "none"])
            .env(CONFIG_DIR_VAR, config_dir_value.as_str());

        let output = ctx
            .runner
            .run(&login)
            .await
            .map_err(|e| ScanError::auth(CloudProvider::Azure, e.to_string()))?;
        if !output.success() {
            return Err(ScanError::auth(
                CloudProvider::Azure,
                format!("service principal login failed: {}", output.stderr_tail()),
            ));
        }

        let select = CommandSpec::new(AZ_CLI)
            .args(["account", "set", "--subscription", sp.subscription_id.as_str()])
            .env(CONFIG_DIR_VAR, config_dir_value.as_str());

        let output = ctx
            .runner
            .run(&select)
            .await
            .map_err(|e| ScanError::auth(CloudProvider::Azure, e.to_string()))?;
        if !output.success() {
            return Err(ScanError::auth(
                CloudProvider::Azure,
                format!(
                    "subscription {} not selectable: {}",
                    sp.subscription_id,
                    output.stderr_tail()
                ),
            ));
        }

        info!(
            tenant = %sp.tenant_id,
            client_id = %sp.client_id,
            subscription = %sp.subscription_id,
            "Service principal logged in"
        );

        Ok(ProviderCredentials::Azure(AzureCredentials {
            tenant_id: sp.tenant_id,
            client_id: sp.client_id,
            client_secret: sp.client_secret,
            subscription_id: sp.subscription_id,
            config_dir,
        }))
    }
}
