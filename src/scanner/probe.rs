//! Scanner capability probing

use std::sync::Arc;

use tracing::{debug, warn};

use super::{OutputSyntax, LEGACY_MARKER, MODERN_MARKER};
use crate::providers::CloudProvider;
use crate::runner::{CommandRunner, CommandSpec};

/// Reads the installed scanner's help output.
///
/// Nothing here fails the caller: a scanner that errors or cannot be
/// started yields [`OutputSyntax::None`] or an empty list.
pub struct CompatibilityProbe {
    runner: Arc<dyn CommandRunner>,
    scanner: String,
}

impl CompatibilityProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, scanner: &str) -> Self {
        Self {
            runner,
            scanner: scanner.to_string(),
        }
    }

    /// Pick the output syntax for `provider`. Not cached; every call probes.
    pub async fn detect(&self, provider: CloudProvider) -> OutputSyntax {
        let text = self.capture(&[provider.as_str(), "--help"]).await;
        let syntax = syntax_from_help(&text);

        match syntax {
            OutputSyntax::None => warn!(
                scanner = %self.scanner,
                "No known output-format flag in scanner help, invoking without explicit output formats"
            ),
            _ => debug!(syntax = %syntax, "Detected scanner output syntax"),
        }
        syntax
    }

    /// Compliance framework identifiers the scanner reports for `provider`
    pub async fn list_frameworks(&self, provider: CloudProvider) -> Vec<String> {
        let text = self.capture(&[provider.as_str(), "--list-compliance"]).await;
        frameworks_from_listing(&text, provider)
    }

    /// Combined stdout and stderr, whatever the exit status
    async fn capture(&self, args: &[&str]) -> String {
        let command = CommandSpec::new(self.scanner.as_str()).args(args.iter().copied());

        match self.runner.run(&command).await {
            Ok(output) => {
                if !output.success() {
                    debug!(code = ?output.code, "Scanner probe exited non-zero");
                }
                format!("{}\n{}", output.stdout, output.stderr)
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Scanner probe failed");
                String::new()
            }
        }
    }
}

/// Modern marker wins over legacy when both appear
pub fn syntax_from_help(help: &str) -> OutputSyntax {
    if help.contains(MODERN_MARKER) {
        OutputSyntax::Modern
    } else if help.contains(LEGACY_MARKER) {
        OutputSyntax::Legacy
    } else {
        OutputSyntax::None
    }
}

/// Identifiers are single tokens suffixed with the provider, e.g. `cis_2.0_gcp`.
/// Bullets and surrounding text are ignored; duplicates are dropped.
fn frameworks_from_listing(text: &str, provider: CloudProvider) -> Vec<String> {
    let suffix = format!("_{}", provider.as_str());
    let mut found: Vec<String> = Vec::new();

    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| matches!(c, '-' | '*' | ',' | ':' | '\'' | '"'));
        let valid = token.ends_with(&suffix)
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if valid && !found.iter().any(|f| f == token) {
            found.push(token.to_string());
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::scripted::{fail, ok, ScriptedRunner};

    #[test]
    fn test_syntax_from_help() {
        assert_eq!(
            syntax_from_help("  --output-formats {csv,json-ocsf,html}\n  --output-modes"),
            OutputSyntax::Modern
        );
        assert_eq!(
            syntax_from_help("  -M {csv,json,html}, --output-modes {csv,json,html}"),
            OutputSyntax::Legacy
        );
        assert_eq!(syntax_from_help("usage: scanner [-h]"), OutputSyntax::None);
        assert_eq!(syntax_from_help(""), OutputSyntax::None);
    }

    #[tokio::test]
    async fn test_detect_reads_stderr_of_failing_help() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            fail(2, "error: unrecognized arguments\n  --output-modes {csv,json}")
        }));
        let probe = CompatibilityProbe::new(runner.clone(), "prowler");

        assert_eq!(probe.detect(CloudProvider::Azure).await, OutputSyntax::Legacy);

        let call = &runner.calls()[0];
        assert_eq!(call.program, "prowler");
        assert_eq!(call.args, vec!["azure", "--help"]);
    }

    #[tokio::test]
    async fn test_detect_probes_every_time() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("--output-formats")));
        let probe = CompatibilityProbe::new(runner.clone(), "prowler");

        probe.detect(CloudProvider::Aws).await;
        probe.detect(CloudProvider::Aws).await;
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_detect_tolerates_missing_scanner() {
        let probe = CompatibilityProbe::new(
            Arc::new(crate::runner::SystemRunner),
            "definitely-not-a-scanner-9b2e",
        );
        assert_eq!(probe.detect(CloudProvider::Gcp).await, OutputSyntax::None);
    }

    #[test]
    fn test_frameworks_from_listing() {
        let listing = "\nThere are 3 available Compliance Frameworks:\n\
                       - cis_2.0_gcp\n\
                       - mitre_attack_gcp\n\
                       - cis_2.0_gcp\n\
                       - cis_3.0_aws\n";
        assert_eq!(
            frameworks_from_listing(listing, CloudProvider::Gcp),
            vec!["cis_2.0_gcp", "mitre_attack_gcp"]
        );
        assert!(frameworks_from_listing("usage: prowler", CloudProvider::Aws).is_empty());
    }
}
