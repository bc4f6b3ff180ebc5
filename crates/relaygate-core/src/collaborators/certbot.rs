use std::path::PathBuf;

use async_trait::async_trait;

use super::{run_command, AcmeClient, CertificatePaths, CollaboratorError, IssueRequest};

/// certbot CLI rooted at a configuration directory
pub struct Certbot {
    config_dir: PathBuf,
}

impl Certbot {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    fn config_dir_arg(&self) -> String {
        self.config_dir.to_string_lossy().into_owned()
    }
}

/// Build the `certbot certonly` argument list for a request
fn issue_args(request: &IssueRequest, config_dir: &str) -> Vec<String> {
    let mut args = vec![
        "certonly".to_string(),
        "--non-interactive".to_string(),
        "--agree-tos".to_string(),
        "--config-dir".to_string(),
        config_dir.to_string(),
        "-d".to_string(),
        request.domain.clone(),
    ];
    if request.standalone {
        args.push("--standalone".to_string());
    }
    if request.force {
        args.push("--force-renewal".to_string());
    }
    match &request.email {
        Some(email) => {
            args.push("--email".to_string());
            args.push(email.clone());
        }
        None => args.push("--register-unsafely-without-email".to_string()),
    }
    args
}

/// Pull certificate names out of `certbot certificates` output
fn parse_certificate_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Certificate Name:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[async_trait]
impl AcmeClient for Certbot {
    async fn issue(&self, request: &IssueRequest) -> Result<(), CollaboratorError> {
        tracing::info!(
            "Requesting certificate for {} (standalone: {}, force: {})",
            request.domain,
            request.standalone,
            request.force
        );
        let args = issue_args(request, &self.config_dir_arg());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_command("certbot", &args).await?;
        Ok(())
    }

    async fn list_certificates(&self) -> Result<Vec<String>, CollaboratorError> {
        let config_dir = self.config_dir_arg();
        let output = run_command("certbot", &["certificates", "--config-dir", &config_dir]).await?;
        Ok(parse_certificate_names(&output))
    }

    async fn delete(&self, domain: &str) -> Result<(), CollaboratorError> {
        let config_dir = self.config_dir_arg();
        run_command(
            "certbot",
            &[
                "delete",
                "--non-interactive",
                "--config-dir",
                &config_dir,
                "--cert-name",
                domain,
            ],
        )
        .await?;
        Ok(())
    }

    fn material(&self, domain: &str) -> CertificatePaths {
        CertificatePaths::for_domain(&self.config_dir, domain)
    }

    fn renew_command(&self, domain: &str) -> String {
        // Standalone renewal needs port 80, so the proxy steps aside meanwhile
        format!(
            "certbot renew --quiet --config-dir {} --cert-name {} --pre-hook \"systemctl stop nginx\" --post-hook \"systemctl start nginx\"",
            self.config_dir.display(),
            domain
        )
    }
}
