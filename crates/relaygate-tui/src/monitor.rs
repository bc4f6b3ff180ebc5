//! Status screen

use std::io::{self, Write};

use chrono::{DateTime, Local};
use relaygate_core::StatusReport;

use crate::style::Printer;

pub fn render<W: Write>(
    printer: &mut Printer<W>,
    report: &StatusReport,
    now: DateTime<Local>,
) -> io::Result<()> {
    printer.header(&format!("relaygate status ({})", now.format("%Y-%m-%d %H:%M:%S")))?;

    let Some(config) = &report.config else {
        printer.warning("Not installed. Run `relaygate install` or the menu.")?;
        return Ok(());
    };

    printer.field("Role", config.role.as_str())?;
    if let Some(domain) = &config.domain {
        let state = report
            .domain_state
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());
        printer.field("Domain", &format!("{} ({})", domain, state))?;
    }
    if let Some(upstream) = &config.upstream_address {
        printer.field("Foreign server", upstream)?;
    }
    let ports: Vec<String> = config.ports.iter().map(u16::to_string).collect();
    printer.field("Ports", &ports.join(", "))?;
    printer.field("Panel port", &config.excluded_port.to_string())?;
    printer.field("Service", &report.service)?;
    printer.field(
        "Scheduled restart",
        report.restart_interval.as_deref().unwrap_or("off"),
    )?;
    printer.blank()?;

    printer.line("  Forwarders")?;
    if let Some(plan) = &report.plan {
        for forward in &plan.forwards {
            let listening = report.listening.iter().any(|l| l.port == forward.port);
            let message = format!("{} -> {}", forward.port, forward.target);
            if listening {
                printer.success(&message)?;
            } else {
                printer.error(&format!("{} (not listening)", message))?;
            }
        }
        if let Some(excluded) = plan.excluded {
            printer.dim(&format!("{} skipped (panel port)", excluded))?;
        }
    }

    if !report.recent_log.is_empty() {
        printer.blank()?;
        printer.line("  Recent service log")?;
        for line in &report.recent_log {
            printer.dim(line)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::status::Listener;
    use relaygate_core::supervisor::plan;
    use relaygate_core::{Role, TunnelConfig};

    fn render_to_string(report: &StatusReport) -> String {
        let mut printer = Printer::new(Vec::new());
        render(&mut printer, report, Local::now()).unwrap();
        String::from_utf8(printer.into_inner()).unwrap()
    }

    #[test]
    fn test_render_not_installed() {
        let report = StatusReport {
            installed: false,
            config: None,
            plan: None,
            service: "inactive".to_string(),
            listening: Vec::new(),
            restart_interval: None,
            domain_state: None,
            recent_log: Vec::new(),
        };
        assert!(render_to_string(&report).contains("Not installed"));
    }

    #[test]
    fn test_render_forwarders() {
        let config = TunnelConfig::new(Role::Upstream, vec![8443, 8080, 54321], 54321);
        let report = StatusReport {
            installed: true,
            plan: Some(plan(&config)),
            config: Some(config),
            service: "active".to_string(),
            listening: vec![Listener {
                local: "0.0.0.0:8443".to_string(),
                port: 8443,
            }],
            restart_interval: Some("6h".to_string()),
            domain_state: None,
            recent_log: vec!["Forwarder listening on 0.0.0.0:8443".to_string()],
        };

        let text = render_to_string(&report);
        assert!(text.contains("8443 -> 127.0.0.1:8443"));
        assert!(text.contains("8080 -> 127.0.0.1:8080 (not listening)"));
        assert!(text.contains("54321 skipped (panel port)"));
        assert!(text.contains("6h"));
        assert!(text.contains("Forwarder listening"));
    }
}
