//! Cloud Provider Credential Brokers
//!
//! Each provider exchanges a secret from the parameter store for
//! short-lived credentials and contributes its scanner arguments.
//!
//! ## Identity handling
//!
//! Credentials are never exported into this process's environment. They
//! are returned as a [`ProviderCredentials`] value whose
//! [`scanner_env`](ProviderCredentials::scanner_env) is attached to the scan
//! command only. Once the scan is done the value is consumed by
//! [`discard`](ProviderCredentials::discard), and every later command
//! (upload included) runs under the operator's baseline identity.

mod aws;
mod azure;
mod gcp;
pub mod normalize;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use aws::{AwsAdapter, AwsCredentials, AWS_CREDENTIAL_VARS};
pub use azure::{AzureAdapter, AzureCredentials};
pub use gcp::{GcpAdapter, GcpCredentials};

use crate::error::ScanError;
use crate::runner::CommandRunner;
use crate::secrets::SecretStore;
use crate::session::Session;

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 3] = [CloudProvider::Aws, CloudProvider::Azure, CloudProvider::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            "gcp" => Ok(CloudProvider::Gcp),
            other => Err(ScanError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Short-lived credentials for the scanned account
pub enum ProviderCredentials {
    Aws(AwsCredentials),
    Azure(AzureCredentials),
    Gcp(GcpCredentials),
}

impl ProviderCredentials {
    pub fn provider(&self) -> CloudProvider {
        match self {
            ProviderCredentials::Aws(_) => CloudProvider::Aws,
            ProviderCredentials::Azure(_) => CloudProvider::Azure,
            ProviderCredentials::Gcp(_) => CloudProvider::Gcp,
        }
    }

    /// Variables the scan process needs to act as the scanned identity
    pub fn scanner_env(&self) -> Vec<(String, String)> {
        match self {
            ProviderCredentials::Aws(c) => c.env(),
            ProviderCredentials::Azure(c) => c.env(),
            ProviderCredentials::Gcp(c) => c.env(),
        }
    }

    /// Drop the scanned identity before any operator-identity call
    pub fn discard(self) {
        let provider = self.provider();
        drop(self);
        info!(provider = %provider, "Scanned-account credentials discarded");
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCredentials::Aws(c) => f.debug_tuple("Aws").field(c).finish(),
            ProviderCredentials::Azure(c) => f.debug_tuple("Azure").field(c).finish(),
            ProviderCredentials::Gcp(c) => f.debug_tuple("Gcp").field(c).finish(),
        }
    }
}

/// What a credential exchange needs from the session
pub struct BrokerContext<'a> {
    pub session: &'a Session,
    pub secrets: &'a dyn SecretStore,
    pub runner: &'a dyn CommandRunner,
    pub region: &'a str,
    pub role_session_seconds: u32,
}

/// Per-provider capability: credential exchange and scanner arguments
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> CloudProvider;

    /// Compliance framework identifiers scanned when none are configured
    fn default_frameworks(&self) -> &'static [&'static str];

    /// Provider-specific scanner arguments (frameworks included)
    fn extra_args(&self, session: &Session, frameworks: &[String]) -> Vec<String>;

    /// Exchange the stored secret for short-lived credentials
    async fn acquire_credentials(
        &self,
        ctx: &BrokerContext<'_>,
    ) -> Result<ProviderCredentials, ScanError>;
}

pub fn adapter_for(provider: CloudProvider) -> Box<dyn ProviderAdapter> {
    match provider {
        CloudProvider::Aws => Box::new(AwsAdapter),
        CloudProvider::Azure => Box::new(AzureAdapter),
        CloudProvider::Gcp => Box::new(GcpAdapter),
    }
}

/// `--compliance id...`, or nothing for an empty list
pub(crate) fn compliance_args(frameworks: &[String]) -> Vec<String> {
    if frameworks.is_empty() {
        return Vec::new();
    }
    std::iter::once("--compliance".to_string())
        .chain(frameworks.iter().cloned())
        .collect()
}

/// Obtains credentials for a session's provider
pub struct CredentialBroker {
    secrets: Arc<dyn SecretStore>,
    runner: Arc<dyn CommandRunner>,
    region: String,
    role_session_seconds: u32,
}

impl CredentialBroker {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        runner: Arc<dyn CommandRunner>,
        region: &str,
        role_session_seconds: u32,
    ) -> Self {
        Self {
            secrets,
            runner,
            region: region.to_string(),
            role_session_seconds,
        }
    }

    /// Any error here is terminal for the session
    pub async fn acquire(&self, session: &Session) -> Result<ProviderCredentials, ScanError> {
        info!("Acquiring credentials");

        let ctx = BrokerContext {
            session,
            secrets: self.secrets.as_ref(),
            runner: self.runner.as_ref(),
            region: &self.region,
            role_session_seconds: self.role_session_seconds,
        };

        let credentials = adapter_for(session.provider).acquire_credentials(&ctx).await?;

        info!("Credentials acquired");
        Ok(credentials)
    }
}
