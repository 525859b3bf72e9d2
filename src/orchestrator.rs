//! Session orchestration
//!
//! Sequence for one session:
//!
//! 1. dry run: print the planned command and stop
//! 2. credential exchange (any error aborts the session)
//! 3. scan, with one syntax fallback
//! 4. discard the scanned identity
//! 5. upload under the operator identity
//! 6. summary
//!
//! Only step 2 can fail the session. Scan and upload problems end up in the
//! [`ExecutionSummary`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::providers::{adapter_for, CloudProvider, CredentialBroker};
use crate::runner::CommandRunner;
use crate::scanner::{OutputSyntax, ScanInvoker, ScanOutcome, ScanReport, ScanRequest};
use crate::secrets::SecretStore;
use crate::session::Session;
use crate::upload::{ArtifactUploader, RemoteArtifactPath, UploadOutcome};

/// What a session produced
#[derive(Debug)]
pub enum SessionResult {
    /// Planned command, nothing executed
    DryRun { command: String },
    Completed(ExecutionSummary),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub session_id: Uuid,
    pub client: String,
    pub provider: CloudProvider,
    pub account: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    pub scan: ScanReport,
    pub remote_path: String,
    pub upload: UploadOutcome,
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session:   {}", self.session_id)?;
        writeln!(f, "Target:    {}/{}/{}", self.client, self.provider, self.account)?;
        writeln!(
            f,
            "Duration:  {}s",
            (self.finished_at - self.started_at).num_seconds()
        )?;
        write!(f, "Scan:      {}", self.scan.outcome)?;
        match self.scan.final_syntax() {
            Some(syntax) => writeln!(
                f,
                " ({} syntax, {} retr{})",
                syntax,
                self.scan.retries(),
                if self.scan.retries() == 1 { "y" } else { "ies" }
            )?,
            None => writeln!(f)?,
        }
        writeln!(f, "Reports:   {}", self.output_dir.display())?;
        match &self.upload {
            UploadOutcome::Uploaded { remote } => write!(f, "Upload:    {}", remote),
            UploadOutcome::Failed { remote, reason } => {
                write!(f, "Upload:    FAILED to {} ({})", remote, reason)
            }
        }
    }
}

pub struct Orchestrator {
    config: ScanConfig,
    broker: CredentialBroker,
    invoker: ScanInvoker,
    uploader: ArtifactUploader,
}

impl Orchestrator {
    pub fn new(
        config: ScanConfig,
        runner: Arc<dyn CommandRunner>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            broker: CredentialBroker::new(
                secrets,
                runner.clone(),
                &config.region,
                config.role_session_seconds,
            ),
            invoker: ScanInvoker::new(runner.clone(), &config.scanner, &config.log_level),
            uploader: ArtifactUploader::new(runner, &config.region),
            config,
        }
    }

    /// [`run`](Self::run) inside the session span. An abort is logged
    /// there, so the failure line carries the session context.
    pub async fn execute(&self, session: &Session) -> Result<SessionResult, ScanError> {
        async {
            let result = self.run(session).await;
            if let Err(e) = &result {
                error!(error = %e, exit_code = e.exit_code(), "Compliance scan aborted");
            }
            result
        }
        .instrument(session.span())
        .await
    }

    /// Run one session to completion.
    ///
    /// Errors are credential failures only; they happen before anything is
    /// scanned or uploaded.
    pub async fn run(&self, session: &Session) -> Result<SessionResult, ScanError> {
        let adapter = adapter_for(session.provider);
        let frameworks = self.config.frameworks_for(adapter.as_ref());
        let request = ScanRequest {
            provider: session.provider,
            output_dir: session.output_dir.clone(),
            filename_base: session.filename_base(),
            extra_args: adapter.extra_args(session, &frameworks),
        };

        if self.config.dry_run {
            let command = self.invoker.plan(&request).await;
            info!(command = %command, "Dry run, nothing executed");
            return Ok(SessionResult::DryRun {
                command: command.to_string(),
            });
        }

        info!(frameworks = ?frameworks, "Starting compliance scan session");

        let credentials = self.broker.acquire(session).await?;
        let scan = self.invoker.run(&request, &credentials).await;

        // Unconditional, whatever the scan outcome
        credentials.discard();

        if scan.outcome != ScanOutcome::Success {
            warn!(outcome = %scan.outcome, "Uploading whatever reports exist");
        }

        let remote = RemoteArtifactPath::at(session, &self.config.bucket, Utc::now());
        let upload = self.uploader.upload(&session.output_dir, &remote).await;

        let summary = ExecutionSummary {
            session_id: session.id,
            client: session.client.clone(),
            provider: session.provider,
            account: session.account.clone(),
            started_at: session.started_at,
            finished_at: Utc::now(),
            output_dir: session.output_dir.clone(),
            scan,
            remote_path: remote.uri(),
            upload,
        };

        info!(
            outcome = %summary.scan.outcome,
            uploaded = summary.upload.is_uploaded(),
            "Session complete"
        );
        Ok(SessionResult::Completed(summary))
    }
}

/// Scanner capabilities for one provider
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub provider: CloudProvider,
    pub scanner: String,
    pub syntax: OutputSyntax,
    pub frameworks: Vec<String>,
    /// Frameworks a scan would use without an override
    pub defaults: Vec<String>,
}

impl fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Provider:   {}", self.provider)?;
        writeln!(f, "Scanner:    {}", self.scanner)?;
        writeln!(f, "Syntax:     {}", self.syntax)?;
        writeln!(f, "Defaults:   {}", self.defaults.join(", "))?;
        write!(f, "Frameworks:")?;
        if self.frameworks.is_empty() {
            write!(f, " (scanner did not list any)")?;
        }
        for framework in &self.frameworks {
            write!(f, "\n  {}", framework)?;
        }
        Ok(())
    }
}

/// Probe the scanner for `provider` without authenticating
pub async fn inspect(
    runner: Arc<dyn CommandRunner>,
    config: &ScanConfig,
    provider: CloudProvider,
) -> InspectionReport {
    let invoker = ScanInvoker::new(runner, &config.scanner, &config.log_level);
    let probe = invoker.probe();

    InspectionReport {
        provider,
        scanner: config.scanner.clone(),
        syntax: probe.detect(provider).await,
        frameworks: probe.list_frameworks(provider).await,
        defaults: config.frameworks_for(adapter_for(provider).as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::providers::AWS_CREDENTIAL_VARS;
    use crate::runner::scripted::{fail, ok, ScriptedRunner};
    use crate::runner::CommandSpec;
    use crate::scanner::{LEGACY_MARKER, MODERN_MARKER};
    use crate::secrets::memory::MemoryStore;

    const BUCKET: &str = "audit-reports";

    const STS_RESPONSE: &str = r#"{"Credentials":{"AccessKeyId":"ASIASCANNED","SecretAccessKey":"s","SessionToken":"t","Expiration":"2026-10-16T13:00:00Z"}}"#;

    /// Cloud CLIs succeed; the scanner only understands the legacy syntax
    fn legacy_world(spec: &CommandSpec) -> crate::runner::CommandOutput {
        match spec.program.as_str() {
            "aws" if spec.has_arg("assume-role") => ok(STS_RESPONSE),
            "prowler" if spec.has_arg("--help") => ok("  -M, --output-modes {csv,json,html}"),
            "prowler" if spec.has_arg(MODERN_MARKER) => fail(2, "unrecognized arguments"),
            _ => ok(""),
        }
    }

    fn setup(
        store: MemoryStore,
        respond: impl Fn(&CommandSpec) -> crate::runner::CommandOutput + Send + Sync + 'static,
        config: ScanConfig,
        provider: CloudProvider,
        account: &str,
    ) -> (Orchestrator, Arc<ScriptedRunner>, Arc<MemoryStore>, Session, TempDir) {
        let root = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(respond));
        let store = Arc::new(store);
        let session = Session::start("acme", provider, account, root.path()).unwrap();
        let orchestrator = Orchestrator::new(config, runner.clone(), store.clone());
        (orchestrator, runner, store, session, root)
    }

    fn config() -> ScanConfig {
        ScanConfig {
            bucket: BUCKET.to_string(),
            ..ScanConfig::default()
        }
    }

    #[tokio::test]
    async fn test_aws_session_with_legacy_scanner() {
        let store = MemoryStore::with(&[(
            "/clients/acme/aws/123456789012/role",
            "arn:aws:iam::123456789012:role/Audit",
        )]);
        let (orchestrator, runner, _store, session, _root) =
            setup(store, legacy_world, config(), CloudProvider::Aws, "123456789012");

        let result = orchestrator.run(&session).await.unwrap();
        let SessionResult::Completed(summary) = result else {
            panic!("expected a completed session");
        };

        assert_eq!(summary.scan.outcome, ScanOutcome::Success);
        assert_eq!(summary.scan.retries(), 0);
        assert_eq!(summary.scan.attempts[0].syntax, OutputSyntax::Legacy);
        assert!(summary.scan.attempts[0].command.contains(LEGACY_MARKER));
        assert!(summary
            .remote_path
            .starts_with("s3://audit-reports/acme/aws/123456789012/"));
        assert!(summary.upload.is_uploaded());

        // Scan ran as the scanned identity, upload as the operator
        let scans: Vec<_> = runner
            .calls()
            .into_iter()
            .filter(|c| c.program == "prowler" && !c.has_arg("--help"))
            .collect();
        assert_eq!(scans.len(), 1);
        assert!(scans[0].has_env("AWS_ACCESS_KEY_ID"));

        let uploads = runner.calls_to("aws", "s3");
        assert_eq!(uploads.len(), 1);
        for var in AWS_CREDENTIAL_VARS {
            assert!(!uploads[0].has_env(var), "{var}");
        }

        // Upload is the last command
        assert_eq!(runner.calls().last(), uploads.last());
    }

    #[tokio::test]
    async fn test_missing_secret_aborts_before_scan_and_upload() {
        for (provider, account) in [
            (CloudProvider::Aws, "123456789012"),
            (CloudProvider::Azure, "sub-1"),
            (CloudProvider::Gcp, "proj-1"),
        ] {
            let (orchestrator, runner, _store, session, _root) =
                setup(MemoryStore::default(), legacy_world, config(), provider, account);

            let err = orchestrator.run(&session).await.unwrap_err();
            assert!(
                matches!(err, ScanError::MissingSecret { .. } | ScanError::MissingRole { .. }),
                "{provider}: {err}"
            );
            assert_eq!(err.exit_code(), 1);

            assert!(runner.calls().iter().all(|c| c.program != "prowler"), "{provider}");
            assert!(runner.calls_to("aws", "s3").is_empty(), "{provider}");
        }
    }

    #[tokio::test]
    async fn test_malformed_secret_aborts_before_scan_and_upload() {
        for (provider, account, path) in [
            (CloudProvider::Aws, "123456789012", "/clients/acme/aws/123456789012/role"),
            (CloudProvider::Azure, "sub-1", "/clients/acme/azure/sub-1/credentials/access"),
            (CloudProvider::Gcp, "proj-1", "/clients/acme/gcp/proj-1/credentials/access"),
        ] {
            let store = MemoryStore::with(&[(path, "%%% not a credential %%%")]);
            let (orchestrator, runner, _store, session, _root) =
                setup(store, legacy_world, config(), provider, account);

            let err = orchestrator.run(&session).await.unwrap_err();
            assert!(
                matches!(err, ScanError::InvalidCredentialFormat(_)),
                "{provider}: {err}"
            );
            assert_eq!(err.exit_code(), 1);

            // Rejected before any external command, credential exchange included
            assert!(runner.calls().is_empty(), "{provider}");
            assert!(runner.calls_to("aws", "s3").is_empty(), "{provider}");
        }
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing_remote() {
        let dry = ScanConfig {
            dry_run: true,
            ..config()
        };
        let (orchestrator, runner, store, session, _root) =
            setup(MemoryStore::default(), legacy_world, dry, CloudProvider::Azure, "sub-1");

        let result = orchestrator.run(&session).await.unwrap();
        let SessionResult::DryRun { command } = result else {
            panic!("expected a dry run");
        };

        assert!(command.starts_with("prowler azure --output-modes"));
        assert!(command.contains("--subscription-ids sub-1"));
        assert!(store.reads().is_empty());
        // Only the local help probe ran
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].has_arg("--help"));
    }

    #[tokio::test]
    async fn test_partial_scan_and_failed_upload_still_complete() {
        let store = MemoryStore::with(&[(
            "/clients/acme/aws/123456789012/role",
            "arn:aws:iam::123456789012:role/Audit",
        )]);
        let respond = |spec: &CommandSpec| match spec.program.as_str() {
            "aws" if spec.has_arg("assume-role") => ok(STS_RESPONSE),
            "aws" => fail(1, "AccessDenied"),
            "prowler" if spec.has_arg("--help") => ok("--output-formats"),
            _ => fail(3, "checks failed"),
        };
        let (orchestrator, runner, _store, session, _root) =
            setup(store, respond, config(), CloudProvider::Aws, "123456789012");

        let SessionResult::Completed(summary) = orchestrator.run(&session).await.unwrap() else {
            panic!("expected a completed session");
        };

        assert_eq!(summary.scan.outcome, ScanOutcome::PartialFailure);
        assert_eq!(summary.scan.attempts.len(), 2);
        assert!(!summary.upload.is_uploaded());
        assert_eq!(runner.calls_to("aws", "s3").len(), 1);

        let text = summary.to_string();
        assert!(text.contains("partial failure"));
        assert!(text.contains("FAILED"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["provider"], "aws");
        assert_eq!(json["upload"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_auth_failure_skips_scan() {
        let store = MemoryStore::with(&[(
            "/clients/acme/aws/123456789012/role",
            "arn:aws:iam::123456789012:role/Audit",
        )]);
        let respond = |spec: &CommandSpec| {
            if spec.has_arg("assume-role") {
                fail(254, "AccessDenied")
            } else {
                ok("")
            }
        };
        let (orchestrator, runner, _store, session, _root) =
            setup(store, respond, config(), CloudProvider::Aws, "123456789012");

        let err = orchestrator.run(&session).await.unwrap_err();
        assert!(matches!(err, ScanError::AuthError { .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    /// Shared buffer the fmt layer writes into
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_abort_is_logged_with_session_context() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_target(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (orchestrator, _runner, _store, session, _root) = setup(
            MemoryStore::default(),
            legacy_world,
            config(),
            CloudProvider::Aws,
            "123456789012",
        );

        let err = orchestrator.execute(&session).await.unwrap_err();
        assert!(matches!(err, ScanError::MissingRole { .. }));

        let text = logs.text();
        let line = text
            .lines()
            .find(|l| l.contains("Compliance scan aborted"))
            .expect("abort line logged");
        assert!(line.contains(&session.id.to_string()), "{line}");
        assert!(line.contains("client=acme"), "{line}");
        assert!(line.contains("provider=aws"), "{line}");
        assert!(line.contains("account=123456789012"), "{line}");
    }

    #[test]
    fn test_inspect_reports_syntax_and_frameworks() {
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.has_arg("--list-compliance") {
                ok("- cis_2.1_azure\n- mitre_attack_azure\n- iso27001_2022_azure\n")
            } else {
                ok("--output-formats")
            }
        }));

        let report = tokio_test::block_on(inspect(
            runner.clone(),
            &ScanConfig::default(),
            CloudProvider::Azure,
        ));

        assert_eq!(report.syntax, OutputSyntax::Modern);
        assert_eq!(report.frameworks.len(), 3);
        assert!(report.defaults.contains(&"cis_2.1_azure".to_string()));
        assert!(report.to_string().contains("iso27001_2022_azure"));
        // No credential or upload commands
        assert!(runner.calls().iter().all(|c| c.program == "prowler"));
    }
}
