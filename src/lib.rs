//! Compliance Scan Orchestrator
//!
//! Runs a compliance scanner against one client cloud account: exchanges a
//! stored secret for short-lived credentials, runs the scanner with an
//! output syntax matching its installed version, and uploads the reports
//! under the operator's own identity.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod runner;
pub mod scanner;
pub mod secrets;
pub mod session;
pub mod upload;

pub use config::{Args, ScanConfig};
pub use error::ScanError;
pub use orchestrator::{inspect, ExecutionSummary, InspectionReport, Orchestrator, SessionResult};
pub use providers::{CloudProvider, ProviderCredentials};
pub use runner::{CommandRunner, SystemRunner};
pub use secrets::{ParameterStore, SecretStore};
pub use session::Session;
