//! Compliance Scan - Standalone Binary
//!
//! # Usage
//! ```bash
//! # Scan one account
//! compliance-scan acme aws 123456789012
//!
//! # Show the command that would run
//! DRY_RUN=true compliance-scan acme gcp my-project
//!
//! # Report scanner syntax and frameworks for a provider
//! compliance-scan inspect azure
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use compliance_scan::config::OutputFormat;
use compliance_scan::scanner::locate_scanner;
use compliance_scan::{
    inspect, Args, CloudProvider, CommandRunner, Orchestrator, ParameterStore, ScanConfig,
    ScanError, Session, SessionResult, SystemRunner,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
            let _ = e.print();
            return code;
        }
    };

    if let Err(e) = compliance_scan::logging::init(&args.log_level, args.log_format) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Compliance scan aborted");
            let code = e.downcast_ref::<ScanError>().map_or(1, ScanError::exit_code);
            ExitCode::from(code)
        }
    }
}

/// Errors returned here happen outside a session; session aborts are
/// logged inside the session span and come back as an exit code.
async fn run(args: Args) -> Result<ExitCode> {
    let config = ScanConfig::from(&args);
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    if let Some(target) = args.inspect_target() {
        let provider: CloudProvider = target.parse()?;
        let report = inspect(runner, &config, provider).await;
        match args.output {
            OutputFormat::Text => println!("{}", report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let provider: CloudProvider = args.provider.parse()?;

    if !config.dry_run {
        let scanner = locate_scanner(&config.scanner)?;
        info!(scanner = ?scanner, "Scanner located");
    }

    let session = Session::start(&args.client, provider, &args.account, &config.work_root)?;

    let secrets = Arc::new(ParameterStore::new(
        runner.clone(),
        &config.region,
        session.identity_dir(),
    ));
    let orchestrator = Orchestrator::new(config, runner, secrets);

    let result = match orchestrator.execute(&session).await {
        Ok(result) => result,
        Err(e) => return Ok(ExitCode::from(e.exit_code())),
    };

    match result {
        SessionResult::DryRun { command } => println!("{}", command),
        SessionResult::Completed(summary) => match args.output {
            OutputFormat::Text => println!("{}", summary),
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
            ),
        },
    }

    Ok(ExitCode::SUCCESS)
}
