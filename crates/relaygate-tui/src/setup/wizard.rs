//! Styled install wizard collecting a tunnel config

use std::io::Stdout;

use relaygate_common::RelayError;
use relaygate_core::{normalize_domain, parse_port, parse_ports, Role, TunnelConfig};

use crate::prompt::Prompter;
use crate::style::Printer;

/// Default panel port suggested by the wizard
const DEFAULT_PANEL_PORT: &str = "2053";

/// Raw answers as typed by the operator
#[derive(Debug, Clone, Default)]
pub struct InstallAnswers {
    pub role: String,
    pub domain: String,
    pub upstream_address: String,
    pub ports: String,
    pub panel_port: String,
    pub email: String,
}

/// Turn raw answers into a validated config
pub fn build_config(answers: &InstallAnswers) -> Result<TunnelConfig, RelayError> {
    let role: Role = answers.role.parse()?;
    let ports = parse_ports(&answers.ports)?;
    let excluded = parse_port(&answers.panel_port)?;

    let mut config = TunnelConfig::new(role, ports, excluded);
    if role == Role::Edge {
        config.domain = Some(normalize_domain(&answers.domain));
        config.upstream_address = Some(answers.upstream_address.trim().to_string());
        let email = answers.email.trim();
        if !email.is_empty() {
            config.acme_email = Some(email.to_string());
        }
    }
    config.validate()?;
    Ok(config)
}

/// Asks for every install parameter, one step at a time
pub struct InstallWizard {
    answers: InstallAnswers,
}

impl InstallWizard {
    pub fn new() -> Self {
        Self {
            answers: InstallAnswers::default(),
        }
    }

    /// Run the wizard; `None` when the operator aborted or input was invalid
    pub fn run(
        &mut self,
        printer: &mut Printer<Stdout>,
        prompter: &mut Prompter,
    ) -> anyhow::Result<Option<TunnelConfig>> {
        printer.blank()?;
        printer.header("relaygate install")?;
        printer.dim("iran: this server faces clients, terminates TLS and forwards.")?;
        printer.dim("foreign: this server receives the forwarded ports.")?;
        printer.blank()?;

        printer.step(1, 4, "Server role")?;
        let Some(role) = prompter.text(printer, "Role", "iran / foreign")? else {
            return Ok(None);
        };
        let parsed_role = match role.parse::<Role>() {
            Ok(r) => r,
            Err(e) => {
                printer.error(&e.to_string())?;
                return Ok(None);
            }
        };
        self.answers.role = role;
        printer.clear_lines(2)?;
        printer.success(&format!("Role: {}", parsed_role))?;
        printer.blank()?;

        printer.step(2, 4, "Edge settings")?;
        if parsed_role == Role::Edge {
            let Some(domain) = prompter.text(printer, "Domain", "tunnel.example.com")? else {
                return Ok(None);
            };
            self.answers.domain = domain;
            let Some(upstream) = prompter.text(printer, "Foreign server IP", "203.0.113.9")? else {
                return Ok(None);
            };
            self.answers.upstream_address = upstream;
            let Some(email) =
                prompter.text(printer, "Certificate email", "optional, Enter to skip")?
            else {
                return Ok(None);
            };
            self.answers.email = email;
            printer.clear_lines(6)?;
            printer.success(&format!(
                "Domain: {}  Foreign server: {}",
                self.answers.domain, self.answers.upstream_address
            ))?;
        } else {
            printer.dim("Not needed on the foreign server.")?;
        }
        printer.blank()?;

        printer.step(3, 4, "Ports")?;
        let Some(ports) = prompter.text(printer, "Ports to forward", "8443,8080")? else {
            return Ok(None);
        };
        self.answers.ports = ports;
        printer.clear_lines(2)?;
        printer.success(&format!("Ports: {}", self.answers.ports))?;
        printer.blank()?;

        printer.step(4, 4, "Panel port")?;
        let Some(panel) = prompter.text_or(printer, "Panel port (never forwarded)", DEFAULT_PANEL_PORT)?
        else {
            return Ok(None);
        };
        self.answers.panel_port = panel;
        printer.clear_lines(2)?;
        printer.success(&format!("Panel port: {}", self.answers.panel_port))?;
        printer.blank()?;

        match build_config(&self.answers) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                printer.error(&e.to_string())?;
                Ok(None)
            }
        }
    }
}

impl Default for InstallWizard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_answers() -> InstallAnswers {
        InstallAnswers {
            role: "iran".to_string(),
            domain: "T.Example.com ".to_string(),
            upstream_address: "203.0.113.9".to_string(),
            ports: "8443".to_string(),
            panel_port: "2053".to_string(),
            email: String::new(),
        }
    }

    #[test]
    fn test_build_edge_config() {
        let config = build_config(&edge_answers()).unwrap();
        assert_eq!(config.role, Role::Edge);
        assert_eq!(config.domain.as_deref(), Some("t.example.com"));
        assert_eq!(config.upstream_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(config.ports, vec![8443]);
        assert_eq!(config.excluded_port, 2053);
        assert_eq!(config.acme_email, None);
    }

    #[test]
    fn test_build_upstream_ignores_edge_fields() {
        let answers = InstallAnswers {
            role: "foreign".to_string(),
            domain: "ignored.example.com".to_string(),
            ports: "8443, 8080".to_string(),
            panel_port: "54321".to_string(),
            ..Default::default()
        };
        let config = build_config(&answers).unwrap();
        assert_eq!(config.role, Role::Upstream);
        assert_eq!(config.domain, None);
        assert_eq!(config.ports, vec![8443, 8080]);
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let mut answers = edge_answers();
        answers.domain = String::new();
        assert!(build_config(&answers).is_err());

        let mut answers = edge_answers();
        answers.ports = "8443,8443".to_string();
        assert!(build_config(&answers).is_err());

        let mut answers = edge_answers();
        answers.role = "moon".to_string();
        assert!(build_config(&answers).is_err());
    }
}
