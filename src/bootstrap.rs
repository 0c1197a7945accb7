//! Post-provisioning bootstrap over SSH.
//!
//! Files are copied first, then commands run strictly in order. A file that
//! fails to copy is downgraded to a warning; the first failing command stops
//! the run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock};
use crate::ssh::{RemoteSession, SshConnector, SshError, SshTarget};

/// Name of the commands attribute.
pub const COMMANDS_FIELD: &str = "commands";
/// Name of the file block.
pub const FILE_FIELD: &str = "file";

/// A file to place on the host.
///
/// Exactly one of `source` (a local path) and `content` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionFile {
    pub source: String,
    pub content: String,
    pub destination: String,
}

/// Schema of the `file` block shared by resources that bootstrap hosts.
pub fn file_block() -> NestedBlock {
    NestedBlock::set(
        Block::new()
            .with_attribute(
                "source",
                Attribute::optional_string().with_description("Local path of the file to copy"),
            )
            .with_attribute(
                "content",
                Attribute::optional_string().with_description("Literal content of the file"),
            )
            .with_attribute(
                "destination",
                Attribute::required_string().with_description("Remote path to write"),
            ),
    )
}

/// Check file entries before anything touches the network.
///
/// Returns the entries that passed together with an error diagnostic for
/// every entry that did not.
pub async fn collect_files(entries: &[ProvisionFile]) -> (Vec<ProvisionFile>, Vec<Diagnostic>) {
    let mut files = Vec::with_capacity(entries.len());
    let mut diags = Vec::new();

    for file in entries {
        match (file.source.is_empty(), file.content.is_empty()) {
            (true, true) => {
                diags.push(
                    Diagnostic::error("conflict in file block").with_detail(format!(
                        "file {} has neither 'source' or 'content', set one",
                        file.destination
                    )),
                );
                continue;
            }
            (false, false) => {
                diags.push(
                    Diagnostic::error("conflict in file block").with_detail(format!(
                        "file {} has conflicting 'source' and 'content', choose only one",
                        file.destination
                    )),
                );
                continue;
            }
            _ => {}
        }

        if !file.source.is_empty() {
            let src = match tokio::fs::File::open(&file.source).await {
                Ok(src) => src,
                Err(e) => {
                    diags.push(
                        Diagnostic::error("issue with source")
                            .with_detail(format!("file {}: {}", file.source, e)),
                    );
                    continue;
                }
            };
            if let Err(e) = src.metadata().await {
                diags.push(
                    Diagnostic::error("issue with source stat")
                        .with_detail(format!("file {}: {}", file.source, e)),
                );
                continue;
            }
        }
        files.push(file.clone());
    }

    (files, diags)
}

/// Commands need someone to run them as.
pub fn validate_credentials(
    commands: &[String],
    user: &str,
    private_key: &str,
) -> Result<(), ProviderError> {
    if commands.is_empty() {
        return Ok(());
    }
    if user.is_empty() {
        return Err(ProviderError::Validation(format!(
            "user must be set when '{}' is specified",
            COMMANDS_FIELD
        )));
    }
    if private_key.is_empty() {
        return Err(ProviderError::Validation(format!(
            "private_key must be set when '{}' is specified",
            COMMANDS_FIELD
        )));
    }
    Ok(())
}

/// Everything needed to bootstrap one host.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub target: SshTarget,
    pub files: Vec<ProvisionFile>,
    pub commands: Vec<String>,
    pub command_timeout: Duration,
}

impl BootstrapPlan {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.commands.is_empty()
    }
}

/// Copy files and run commands on the target host.
///
/// Returns the diagnostics of the run: warnings for files that could not be
/// copied and, if the run failed, a trailing error. Without commands the run
/// cannot fail; even a connection failure is only a warning.
pub async fn run_bootstrap(connector: &dyn SshConnector, plan: &BootstrapPlan) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    if plan.is_empty() {
        return diags;
    }

    let mut session = match connector.connect(&plan.target).await {
        Ok(session) => session,
        Err(e) if plan.commands.is_empty() => {
            warn!(host = %plan.target.host, error = %e, "SSH connection failed, no files copied");
            diags.push(copy_warning(&format!("{}", e)));
            return diags;
        }
        Err(e) => {
            warn!(host = %plan.target.host, error = %e, "SSH connection failed");
            diags.extend(ProviderError::from(e).into_diagnostics());
            return diags;
        }
    };

    let failed = copy_files(session.as_mut(), &plan.files).await;
    if !failed.is_empty() {
        diags.push(copy_warning(&failed.join("; ")));
    }

    if let Err(e) = run_commands(session.as_mut(), &plan.commands, plan.command_timeout).await {
        diags.extend(e.into_diagnostics());
    }

    session.close().await;
    diags
}

fn copy_warning(reason: &str) -> Diagnostic {
    Diagnostic::warning("failed to copy all files")
        .with_detail(format!("One or more files failed to copy: {}", reason))
}

async fn copy_files(session: &mut dyn RemoteSession, files: &[ProvisionFile]) -> Vec<String> {
    let mut failed = Vec::new();
    for file in files {
        if let Err(e) = copy_file(session, file).await {
            warn!(destination = %file.destination, error = %e, "File copy failed");
            failed.push(format!("{}: {}", file.destination, e));
        }
    }
    failed
}

async fn copy_file(session: &mut dyn RemoteSession, file: &ProvisionFile) -> Result<(), SshError> {
    if file.source.is_empty() {
        let mut content = file.content.as_bytes();
        let written = session.upload(&mut content, &file.destination).await?;
        debug!(destination = %file.destination, bytes = written, "Created remote file");
    } else {
        let mut src = tokio::fs::File::open(&file.source).await?;
        let size = src.metadata().await?.len();
        let written = session.upload(&mut src, &file.destination).await?;
        debug!(
            source = %file.source,
            destination = %file.destination,
            size,
            bytes = written,
            "Copied file"
        );
    }
    Ok(())
}

async fn run_commands(
    session: &mut dyn RemoteSession,
    commands: &[String],
    timeout: Duration,
) -> Result<(), ProviderError> {
    for command in commands {
        let output = match session.run(command, timeout).await {
            Ok(output) => output,
            Err(e @ SshError::Timeout { .. }) => return Err(e.into()),
            Err(e) => {
                return Err(ProviderError::Bootstrap(format!(
                    "command [{}]: {}",
                    command, e
                )))
            }
        };
        if !output.success() {
            let status = output
                .exit_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(ProviderError::Bootstrap(format!(
                "command [{}]: exited with status {}: {}",
                command,
                status,
                output.stderr.trim()
            )));
        }
        info!(command = %command, "Command completed");
        debug!(command = %command, stdout = %output.stdout, stderr = %output.stderr, "Command output");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{has_errors, DiagnosticSeverity};
    use crate::testing::MockSsh;
    use std::path::PathBuf;

    fn content(destination: &str, content: &str) -> ProvisionFile {
        ProvisionFile {
            content: content.into(),
            destination: destination.into(),
            ..Default::default()
        }
    }

    fn temp_source(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "hsdp-provider-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, body).unwrap();
        path
    }

    fn plan(files: Vec<ProvisionFile>, commands: &[&str]) -> BootstrapPlan {
        BootstrapPlan {
            target: SshTarget {
                host: "10.0.0.4".into(),
                port: 22,
                user: "core".into(),
                private_key: "key".into(),
                bastion: Some("gw.example.com".into()),
            },
            files,
            commands: commands.iter().map(|c| c.to_string()).collect(),
            command_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_collect_files_exactly_one_of_source_and_content() {
        let source = temp_source("collect", "data");
        let entries = vec![
            content("/etc/a", "hello"),
            ProvisionFile {
                destination: "/etc/b".into(),
                ..Default::default()
            },
            ProvisionFile {
                source: source.display().to_string(),
                content: "both".into(),
                destination: "/etc/c".into(),
            },
            ProvisionFile {
                source: source.display().to_string(),
                destination: "/etc/d".into(),
                ..Default::default()
            },
        ];

        let (files, diags) = collect_files(&entries).await;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].destination, "/etc/a");
        assert_eq!(files[1].destination, "/etc/d");

        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.summary == "conflict in file block"));
        assert!(diags[0].detail.as_deref().unwrap().contains("neither"));
        assert!(diags[1].detail.as_deref().unwrap().contains("conflicting"));

        let _ = std::fs::remove_file(source);
    }

    #[tokio::test]
    async fn test_collect_files_missing_source() {
        let entries = vec![ProvisionFile {
            source: "/nonexistent/hsdp-provider/file".into(),
            destination: "/etc/x".into(),
            ..Default::default()
        }];
        let (files, diags) = collect_files(&entries).await;
        assert!(files.is_empty());
        assert_eq!(diags[0].summary, "issue with source");
        assert_eq!(diags[0].severity, DiagnosticSeverity::Error);
    }

    #[test]
    fn test_validate_credentials() {
        let commands = vec!["uptime".to_string()];
        let err = validate_credentials(&commands, "", "key").unwrap_err();
        assert_eq!(err.message(), "user must be set when 'commands' is specified");

        let err = validate_credentials(&commands, "core", "").unwrap_err();
        assert_eq!(
            err.message(),
            "private_key must be set when 'commands' is specified"
        );

        assert!(validate_credentials(&[], "", "").is_ok());
        assert!(validate_credentials(&commands, "core", "key").is_ok());
    }

    #[tokio::test]
    async fn test_files_then_commands_in_order() {
        let ssh = MockSsh::new();
        let source = temp_source("ordered", "from disk");
        let files = vec![
            content("/etc/motd", "welcome"),
            ProvisionFile {
                source: source.display().to_string(),
                destination: "/opt/app.conf".into(),
                ..Default::default()
            },
        ];

        let diags = run_bootstrap(&ssh, &plan(files, &["first", "second"])).await;
        assert!(diags.is_empty(), "{:?}", diags);

        assert_eq!(
            ssh.uploads(),
            vec![
                ("/etc/motd".to_string(), b"welcome".to_vec()),
                ("/opt/app.conf".to_string(), b"from disk".to_vec()),
            ]
        );
        assert_eq!(ssh.commands(), vec!["first", "second"]);
        assert_eq!(ssh.connections()[0].bastion.as_deref(), Some("gw.example.com"));
        assert_eq!(ssh.closed(), 1);

        let _ = std::fs::remove_file(source);
    }

    #[tokio::test]
    async fn test_copy_failure_is_warning() {
        let ssh = MockSsh::new().fail_upload("/etc/broken");
        let files = vec![content("/etc/broken", "x"), content("/etc/ok", "y")];

        let diags = run_bootstrap(&ssh, &plan(files, &["uptime"])).await;
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(diags[0].summary, "failed to copy all files");
        assert_eq!(ssh.uploads().len(), 1);
        assert_eq!(ssh.commands(), vec!["uptime"]);
    }

    #[tokio::test]
    async fn test_first_failing_command_aborts() {
        let ssh = MockSsh::new().fail_command("second", 3);

        let diags = run_bootstrap(&ssh, &plan(vec![], &["first", "second", "third"])).await;
        assert!(has_errors(&diags));
        assert!(diags[0].summary.contains("command [second]"));
        assert_eq!(ssh.commands(), vec!["first", "second"]);
        assert_eq!(ssh.closed(), 1);
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let ssh = MockSsh::new().timeout_command("sleep 600");

        let diags = run_bootstrap(&ssh, &plan(vec![], &["sleep 600", "never"])).await;
        assert!(has_errors(&diags));
        assert!(diags[0].summary.starts_with("Deadline exceeded"));
        assert_eq!(ssh.commands(), vec!["sleep 600"]);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let ssh = MockSsh::new().fail_connect("no route to host");
        let diags = run_bootstrap(&ssh, &plan(vec![], &["uptime"])).await;
        assert!(has_errors(&diags));
        assert!(ssh.commands().is_empty());
        assert_eq!(ssh.closed(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_without_commands_is_a_warning() {
        let ssh = MockSsh::new().fail_connect("no route to host");
        let diags = run_bootstrap(&ssh, &plan(vec![content("/tmp/x", "x")], &[])).await;
        assert!(!has_errors(&diags));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(diags[0].summary, "failed to copy all files");
        assert!(diags[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("no route to host"));
    }

    #[tokio::test]
    async fn test_nothing_to_do_skips_connection() {
        let ssh = MockSsh::new();
        let diags = run_bootstrap(&ssh, &plan(vec![], &[])).await;
        assert!(diags.is_empty());
        assert!(ssh.connections().is_empty());
    }
}
