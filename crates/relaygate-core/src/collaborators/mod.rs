//! External collaborators: reverse proxy, ACME client, service supervisor
//! and scheduler
//!
//! Each collaborator is a trait so the lifecycle manager and the command
//! flows can run against the real system tools in production and against
//! in-memory mocks in tests.

mod certbot;
mod cron;
mod nginx;
mod systemd;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

pub use certbot::Certbot;
pub use cron::CronScheduler;
pub use nginx::Nginx;
pub use systemd::Systemd;

/// Errors from invoking an external tool
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("'{program}' not found on PATH")]
    NotFound { program: String },

    #[error("'{program}' failed (exit {status:?}): {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    pub fn failed(program: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Failed {
            program: program.into(),
            status: None,
            stderr: stderr.into(),
        }
    }
}

/// Reverse proxy that serves the routing rules (nginx in production)
#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Check the syntax of the currently written rules
    async fn validate(&self) -> Result<(), CollaboratorError>;

    /// Apply rules without dropping established connections
    async fn reload(&self) -> Result<(), CollaboratorError>;

    async fn start(&self) -> Result<(), CollaboratorError>;

    async fn stop(&self) -> Result<(), CollaboratorError>;
}

/// Certificate request handed to the ACME client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub domain: String,
    pub email: Option<String>,
    /// Answer the challenge from the ACME client's own listener
    pub standalone: bool,
    /// Reissue even when a valid certificate exists
    pub force: bool,
}

impl IssueRequest {
    /// Standalone, forced issuance as used by bootstrap
    pub fn standalone_forced(domain: &str, email: Option<String>) -> Self {
        Self {
            domain: domain.to_string(),
            email,
            standalone: true,
            force: true,
        }
    }
}

/// On-disk layout of a domain's certificate material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub live_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub renewal_conf: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CertificatePaths {
    pub fn for_domain(acme_dir: &Path, domain: &str) -> Self {
        let live_dir = acme_dir.join("live").join(domain);
        Self {
            cert: live_dir.join("fullchain.pem"),
            key: live_dir.join("privkey.pem"),
            archive_dir: acme_dir.join("archive").join(domain),
            renewal_conf: acme_dir.join("renewal").join(format!("{}.conf", domain)),
            live_dir,
        }
    }

    /// Whether any piece of the material is still on disk
    pub fn any_exists(&self) -> bool {
        self.live_dir.exists() || self.archive_dir.exists() || self.renewal_conf.exists()
    }
}

/// ACME certificate client (certbot in production)
#[async_trait]
pub trait AcmeClient: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<(), CollaboratorError>;

    /// Names of certificates the client currently manages
    async fn list_certificates(&self) -> Result<Vec<String>, CollaboratorError>;

    async fn delete(&self, domain: &str) -> Result<(), CollaboratorError>;

    /// Where the material for `domain` lives
    fn material(&self, domain: &str) -> CertificatePaths;

    /// Shell command the scheduler runs to renew `domain`
    fn renew_command(&self, domain: &str) -> String;
}

/// Service unit description for the supervisor process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub description: String,
    pub exec_start: Vec<String>,
    /// Fixed delay before the init system restarts an exited process
    pub restart_sec: u64,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

/// Init system managing the supervisor process (systemd in production)
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn install_unit(&self, unit: &UnitSpec) -> Result<(), CollaboratorError>;

    /// Returns whether a unit file was removed
    async fn remove_unit(&self) -> Result<bool, CollaboratorError>;

    async fn enable(&self) -> Result<(), CollaboratorError>;

    async fn disable(&self) -> Result<(), CollaboratorError>;

    async fn start(&self) -> Result<(), CollaboratorError>;

    async fn stop(&self) -> Result<(), CollaboratorError>;

    async fn restart(&self) -> Result<(), CollaboratorError>;

    async fn reload(&self) -> Result<(), CollaboratorError>;

    /// Human-readable activity state ("active", "inactive", "failed", ...)
    async fn status(&self) -> Result<String, CollaboratorError>;
}

/// One periodic job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub name: String,
    /// Five-field cron expression
    pub expression: String,
    pub command: String,
}

/// Periodic job scheduler (cron in production)
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Install or replace the entry with the same name
    async fn install(&self, entry: &ScheduleEntry) -> Result<(), CollaboratorError>;

    /// Returns whether an entry was removed
    async fn remove(&self, name: &str) -> Result<bool, CollaboratorError>;

    async fn get(&self, name: &str) -> Result<Option<ScheduleEntry>, CollaboratorError>;
}

/// Locate a program on PATH
pub fn find_program(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Run a command to completion, returning stdout on success
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String, CollaboratorError> {
    tracing::debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CollaboratorError::NotFound {
                    program: program.to_string(),
                }
            } else {
                CollaboratorError::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(CollaboratorError::Failed {
            program: program.to_string(),
            status: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_layout() {
        let paths = CertificatePaths::for_domain(Path::new("/etc/letsencrypt"), "t.example.com");
        assert_eq!(
            paths.cert,
            PathBuf::from("/etc/letsencrypt/live/t.example.com/fullchain.pem")
        );
        assert_eq!(
            paths.key,
            PathBuf::from("/etc/letsencrypt/live/t.example.com/privkey.pem")
        );
        assert_eq!(
            paths.renewal_conf,
            PathBuf::from("/etc/letsencrypt/renewal/t.example.com.conf")
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let result = run_command("relaygate-no-such-program", &[]).await;
        assert!(matches!(result, Err(CollaboratorError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_failing_program_reports_status() {
        let result = run_command("sh", &["-c", "echo boom >&2; exit 3"]).await;
        match result {
            Err(CollaboratorError::Failed { status, stderr, .. }) => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
