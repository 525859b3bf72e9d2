//! Command line and environment configuration

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};

use crate::providers::ProviderAdapter;

/// First positional selecting inspection mode
pub const INSPECT_COMMAND: &str = "inspect";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BUCKET: &str = "compliance-scan-reports";
pub const DEFAULT_SCANNER: &str = "prowler";
pub const DEFAULT_ROLE_SESSION_SECONDS: u32 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Compliance scan for one client account
#[derive(Parser, Debug)]
#[command(name = "compliance-scan", version, about)]
pub struct Args {
    /// Client name, or `inspect` to report scanner capabilities for PROVIDER
    #[arg(default_value = "unknown")]
    pub client: String,

    /// Cloud provider (aws, azure, gcp)
    #[arg(default_value = "undefined")]
    pub provider: String,

    /// Account, subscription or project identifier
    #[arg(default_value = "unknown")]
    pub account: String,

    /// Region for the parameter store, STS and the report bucket
    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Report bucket
    #[arg(long, env = "REPORT_BUCKET", default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    /// Log verbosity (DEBUG, INFO, WARNING, ERROR), also passed to the scanner
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Print the scan command and exit without authenticating.
    /// Accepts true/false, 1/0, yes/no, on/off.
    #[arg(
        long,
        env = "DRY_RUN",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub dry_run: bool,

    /// Scanner executable
    #[arg(long, env = "SCANNER_BIN", default_value = DEFAULT_SCANNER)]
    pub scanner: String,

    /// Parent of the session working directory (defaults to the system temp dir)
    #[arg(long, env = "SCAN_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Comma-separated compliance frameworks, replacing the provider defaults
    #[arg(long, env = "COMPLIANCE_FRAMEWORKS", value_delimiter = ',')]
    pub frameworks: Vec<String>,

    /// Assumed-role session duration in seconds
    #[arg(
        long = "session-duration",
        env = "ROLE_SESSION_SECONDS",
        default_value_t = DEFAULT_ROLE_SESSION_SECONDS,
        value_parser = clap::value_parser!(u32).range(900..=43200)
    )]
    pub role_session_seconds: u32,

    /// Summary format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl Args {
    /// Provider named after `inspect`, when in inspection mode
    pub fn inspect_target(&self) -> Option<&str> {
        (self.client == INSPECT_COMMAND).then_some(self.provider.as_str())
    }
}

/// Resolved settings for a session
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub region: String,
    pub bucket: String,
    pub log_level: String,
    pub dry_run: bool,
    pub scanner: String,
    pub work_root: PathBuf,
    /// Overrides provider defaults when set
    pub frameworks: Option<Vec<String>>,
    pub role_session_seconds: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            log_level: "INFO".to_string(),
            dry_run: false,
            scanner: DEFAULT_SCANNER.to_string(),
            work_root: std::env::temp_dir(),
            frameworks: None,
            role_session_seconds: DEFAULT_ROLE_SESSION_SECONDS,
        }
    }
}

impl ScanConfig {
    /// Frameworks to scan with `adapter`
    pub fn frameworks_for(&self, adapter: &dyn ProviderAdapter) -> Vec<String> {
        match &self.frameworks {
            Some(list) => list.clone(),
            None => adapter
                .default_frameworks()
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}

impl From<&Args> for ScanConfig {
    fn from(args: &Args) -> Self {
        let frameworks: Vec<String> = args
            .frameworks
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        Self {
            region: args.region.clone(),
            bucket: args.bucket.clone(),
            log_level: args.log_level.clone(),
            dry_run: args.dry_run,
            scanner: args.scanner.clone(),
            work_root: args.work_dir.clone().unwrap_or_else(std::env::temp_dir),
            frameworks: (!frameworks.is_empty()).then_some(frameworks),
            role_session_seconds: args.role_session_seconds,
        }
    }
}
