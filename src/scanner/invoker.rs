//! Scanner execution with syntax fallback

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::probe::CompatibilityProbe;
use super::{OutputSyntax, ScanAttempt, ScanOutcome, ScanReport};
use crate::providers::{CloudProvider, ProviderCredentials};
use crate::runner::{CommandRunner, CommandSpec};

/// Everything needed to assemble one scan command
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub provider: CloudProvider,
    pub output_dir: PathBuf,
    pub filename_base: String,
    /// Provider flags and compliance frameworks
    pub extra_args: Vec<String>,
}

/// How a single execution ended
#[derive(Clone, Copy)]
enum Exit {
    Code(Option<i32>),
    NotStarted,
}

pub struct ScanInvoker {
    runner: Arc<dyn CommandRunner>,
    scanner: String,
    log_level: String,
    probe: CompatibilityProbe,
}

impl ScanInvoker {
    pub fn new(runner: Arc<dyn CommandRunner>, scanner: &str, log_level: &str) -> Self {
        Self {
            probe: CompatibilityProbe::new(runner.clone(), scanner),
            runner,
            scanner: scanner.to_string(),
            log_level: scanner_log_level(log_level),
        }
    }

    pub fn probe(&self) -> &CompatibilityProbe {
        &self.probe
    }

    /// `<scanner> <provider> [syntax] [extra] --output-filename .. --output-directory .. --no-banner --log-level ..`
    pub fn build_command(&self, request: &ScanRequest, syntax: OutputSyntax) -> CommandSpec {
        CommandSpec::new(self.scanner.as_str())
            .arg(request.provider.as_str())
            .args(syntax.tokens().iter().copied())
            .args(request.extra_args.iter().cloned())
            .args(["--output-filename", request.filename_base.as_str()])
            .arg("--output-directory")
            .arg(request.output_dir.display().to_string())
            .args(["--no-banner", "--log-level", self.log_level.as_str()])
    }

    /// The command a real run would start first. Only the local help
    /// probe is executed.
    pub async fn plan(&self, request: &ScanRequest) -> CommandSpec {
        let syntax = self.probe.detect(request.provider).await;
        self.build_command(request, syntax)
    }

    /// Run the scan as the scanned identity.
    ///
    /// A non-zero exit is retried exactly once with the alternate syntax.
    /// Failures never propagate; they are reported in the [`ScanReport`].
    pub async fn run(&self, request: &ScanRequest, credentials: &ProviderCredentials) -> ScanReport {
        let first = self.probe.detect(request.provider).await;
        let mut attempts = Vec::with_capacity(2);

        match self.attempt(request, first, credentials, &mut attempts).await {
            Exit::Code(Some(0)) => {
                info!("Scan completed");
                return ScanReport {
                    outcome: ScanOutcome::Success,
                    attempts,
                };
            }
            Exit::NotStarted => {
                return ScanReport {
                    outcome: ScanOutcome::HardFailure,
                    attempts,
                };
            }
            Exit::Code(code) => {
                warn!(
                    code = ?code,
                    from = %first,
                    to = %first.alternate(),
                    "Scan failed, retrying once with the alternate output syntax"
                );
            }
        }

        let outcome = match self
            .attempt(request, first.alternate(), credentials, &mut attempts)
            .await
        {
            Exit::Code(Some(0)) => {
                info!("Scan completed on retry");
                ScanOutcome::Success
            }
            Exit::NotStarted => ScanOutcome::HardFailure,
            Exit::Code(code) => {
                warn!(
                    code = ?code,
                    output_dir = ?request.output_dir,
                    "Scan failed after retry, continuing with partial results"
                );
                ScanOutcome::PartialFailure
            }
        };

        ScanReport { outcome, attempts }
    }

    async fn attempt(
        &self,
        request: &ScanRequest,
        syntax: OutputSyntax,
        credentials: &ProviderCredentials,
        attempts: &mut Vec<ScanAttempt>,
    ) -> Exit {
        let command = self
            .build_command(request, syntax)
            .envs(credentials.scanner_env());
        let rendered = command.to_string();

        info!(syntax = %syntax, command = %rendered, "Running scanner");

        let exit = match self.runner.run(&command).await {
            Ok(output) => Exit::Code(output.code),
            Err(e) => {
                warn!(error = %e, "Scanner could not be started");
                Exit::NotStarted
            }
        };

        attempts.push(ScanAttempt {
            syntax,
            exit_code: match exit {
                Exit::Code(code) => code,
                Exit::NotStarted => None,
            },
            command: rendered,
        });
        exit
    }
}

/// Scanner log levels are upper-case and spell out WARNING
fn scanner_log_level(level: &str) -> String {
    match level.trim().to_ascii_uppercase().as_str() {
        "WARN" => "WARNING".to_string(),
        "FATAL" => "CRITICAL".to_string(),
        "TRACE" => "DEBUG".to_string(),
        "" => "INFO".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::providers::{AwsCredentials, AWS_CREDENTIAL_VARS};
    use crate::runner::scripted::{fail, ok, ScriptedRunner};
    use crate::runner::CommandOutput;
    use crate::scanner::{LEGACY_MARKER, MODERN_MARKER};

    fn request() -> ScanRequest {
        ScanRequest {
            provider: CloudProvider::Aws,
            output_dir: Path::new("/tmp/scan/output").to_path_buf(),
            filename_base: "acme-aws-123456789012-20261016120000".to_string(),
            extra_args: vec!["--compliance".to_string(), "cis_3.0_aws".to_string()],
        }
    }

    fn credentials() -> ProviderCredentials {
        ProviderCredentials::Aws(AwsCredentials {
            access_key_id: "ASIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: String::new(),
            region: "us-east-1".to_string(),
        })
    }

    fn is_help(spec: &CommandSpec) -> bool {
        spec.has_arg("--help")
    }

    /// Scanner whose help shows `help` and whose scans exit with `code(syntax marker present)`
    fn scanner(help: &'static str, code: fn(&CommandSpec) -> i32) -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(move |spec| {
            if is_help(spec) {
                return ok(help);
            }
            match code(spec) {
                0 => ok(""),
                c => fail(c, "scan error"),
            }
        }))
    }

    fn scans(runner: &ScriptedRunner) -> Vec<CommandSpec> {
        runner.calls().into_iter().filter(|c| !is_help(c)).collect()
    }

    #[test]
    fn test_build_command_layout() {
        let runner = scanner("", |_| 0);
        let invoker = ScanInvoker::new(runner, "prowler", "info");

        let command = invoker.build_command(&request(), OutputSyntax::Legacy);
        assert_eq!(
            command.args,
            vec![
                "aws",
                "--output-modes",
                "csv",
                "html",
                "json",
                "--compliance",
                "cis_3.0_aws",
                "--output-filename",
                "acme-aws-123456789012-20261016120000",
                "--output-directory",
                "/tmp/scan/output",
                "--no-banner",
                "--log-level",
                "INFO",
            ]
        );

        let bare = invoker.build_command(&request(), OutputSyntax::None);
        assert!(!bare.has_arg(MODERN_MARKER) && !bare.has_arg(LEGACY_MARKER));
    }

    #[test]
    fn test_scanner_log_level() {
        assert_eq!(scanner_log_level("warning"), "WARNING");
        assert_eq!(scanner_log_level("warn"), "WARNING");
        assert_eq!(scanner_log_level("debug"), "DEBUG");
    }

    #[tokio::test]
    async fn test_success_first_try_no_retry() {
        let runner = scanner("--output-modes", |_| 0);
        let invoker = ScanInvoker::new(runner.clone(), "prowler", "INFO");

        let report = invoker.run(&request(), &credentials()).await;

        assert_eq!(report.outcome, ScanOutcome::Success);
        assert_eq!(report.retries(), 0);
        assert_eq!(report.final_syntax(), Some(OutputSyntax::Legacy));

        let scans = scans(&runner);
        assert_eq!(scans.len(), 1);
        for var in AWS_CREDENTIAL_VARS {
            assert!(scans[0].has_env(var), "{var}");
        }
        assert!(!report.attempts[0].command.contains("secret"));
    }

    #[tokio::test]
    async fn test_retry_uses_alternate_syntax_once() {
        // Help advertises modern, but only legacy actually works
        let runner = scanner("--output-formats", |spec| {
            if spec.has_arg(LEGACY_MARKER) {
                0
            } else {
                1
            }
        });
        let invoker = ScanInvoker::new(runner.clone(), "prowler", "INFO");

        let report = invoker.run(&request(), &credentials()).await;

        assert_eq!(report.outcome, ScanOutcome::Success);
        let syntaxes: Vec<_> = report.attempts.iter().map(|a| a.syntax).collect();
        assert_eq!(syntaxes, vec![OutputSyntax::Modern, OutputSyntax::Legacy]);
        assert_eq!(scans(&runner).len(), 2);
    }

    #[tokio::test]
    async fn test_second_failure_is_partial_and_final() {
        for help in ["--output-formats", "--output-modes", "nothing useful"] {
            let runner = scanner(help, |_| 3);
            let invoker = ScanInvoker::new(runner.clone(), "prowler", "INFO");

            let report = invoker.run(&request(), &credentials()).await;

            assert_eq!(report.outcome, ScanOutcome::PartialFailure, "{help}");
            assert_eq!(report.attempts.len(), 2, "{help}");
            assert_eq!(scans(&runner).len(), 2, "{help}");
            assert_eq!(report.attempts[1].syntax, report.attempts[0].syntax.alternate());
            assert_eq!(report.attempts[1].exit_code, Some(3));
        }
    }

    #[tokio::test]
    async fn test_no_syntax_retries_with_modern() {
        let runner = scanner("usage: prowler", |spec| if spec.has_arg(MODERN_MARKER) { 0 } else { 1 });
        let invoker = ScanInvoker::new(runner.clone(), "prowler", "INFO");

        let report = invoker.run(&request(), &credentials()).await;

        assert_eq!(report.outcome, ScanOutcome::Success);
        assert_eq!(report.attempts[0].syntax, OutputSyntax::None);
        assert_eq!(report.attempts[1].syntax, OutputSyntax::Modern);
    }

    #[tokio::test]
    async fn test_signal_termination_counts_as_failure() {
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if is_help(spec) {
                ok("--output-formats")
            } else {
                CommandOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
        }));
        let invoker = ScanInvoker::new(runner, "prowler", "INFO");

        let report = invoker.run(&request(), &credentials()).await;
        assert_eq!(report.outcome, ScanOutcome::PartialFailure);
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_unstartable_scanner_is_hard_failure_without_retry() {
        let invoker = ScanInvoker::new(
            Arc::new(crate::runner::SystemRunner),
            "definitely-not-a-scanner-9b2e",
            "INFO",
        );

        let report = invoker.run(&request(), &credentials()).await;
        assert_eq!(report.outcome, ScanOutcome::HardFailure);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].exit_code, None);
    }

    #[tokio::test]
    async fn test_plan_probes_without_scanning() {
        let runner = scanner("--output-formats", |_| 0);
        let invoker = ScanInvoker::new(runner.clone(), "prowler", "INFO");

        let command = invoker.plan(&request()).await;

        assert!(command.has_arg(MODERN_MARKER));
        assert!(command.env.is_empty());
        assert!(scans(&runner).is_empty());
    }
}
