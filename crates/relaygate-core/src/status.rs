//! Read-only views for monitor, status and log search

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use relaygate_common::RelayError;
use serde::Serialize;

use crate::collaborators::{run_command, CollaboratorError};
use crate::config::TunnelConfig;
use crate::lifecycle::DomainState;
use crate::ops::Context;
use crate::supervisor::{plan, Plan};

/// How much of a log's end is read when tailing
const TAIL_WINDOW: u64 = 64 * 1024;

/// A listening TCP socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listener {
    pub local: String,
    pub port: u16,
}

/// Parse `ss -Htln` output
///
/// Each line is `State Recv-Q Send-Q Local:Port Peer:Port [Process]`; the
/// local address may be `*`, a bracketed IPv6 literal or carry a `%iface`.
pub fn parse_listeners(output: &str) -> Vec<Listener> {
    output
        .lines()
        .filter_map(|line| {
            let local = line.split_whitespace().nth(3)?;
            let (_, port) = local.rsplit_once(':')?;
            Some(Listener {
                local: local.to_string(),
                port: port.parse().ok()?,
            })
        })
        .collect()
}

/// Listening TCP sockets on this host
pub async fn listening_sockets() -> Result<Vec<Listener>, CollaboratorError> {
    let output = run_command("ss", &["-Htln"]).await?;
    Ok(parse_listeners(&output))
}

/// Last `count` lines of a log; a missing file has none
pub fn tail_lines(path: &Path, count: usize) -> std::io::Result<Vec<String>> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut lines: Vec<&str> = text.lines().collect();
    // The first line is probably cut in half when reading from mid-file
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(count);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// A log line containing the searched keyword
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMatch {
    pub label: String,
    pub path: PathBuf,
    pub line: usize,
    pub text: String,
}

/// Case-insensitive keyword search across logs; missing logs are skipped
pub fn search_logs(logs: &[(&str, PathBuf)], keyword: &str) -> std::io::Result<Vec<LogMatch>> {
    let needle = keyword.to_lowercase();
    let mut matches = Vec::new();
    if needle.is_empty() {
        return Ok(matches);
    }
    for (label, path) in logs {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let text = String::from_utf8_lossy(&bytes);
        for (i, line) in text.lines().enumerate() {
            if line.to_lowercase().contains(&needle) {
                matches.push(LogMatch {
                    label: label.to_string(),
                    path: path.clone(),
                    line: i + 1,
                    text: line.to_string(),
                });
            }
        }
    }
    Ok(matches)
}

/// Snapshot shown by `monitor` and `status --json`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub installed: bool,
    pub config: Option<TunnelConfig>,
    pub plan: Option<Plan>,
    pub service: String,
    /// Listening sockets on configured ports
    pub listening: Vec<Listener>,
    pub restart_interval: Option<String>,
    pub domain_state: Option<DomainState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_log: Vec<String>,
}

/// Gather a [`StatusReport`]; collaborator failures degrade to "unknown"
pub async fn collect(ctx: &Context, log_lines: usize) -> Result<StatusReport, RelayError> {
    let config = ctx.store.try_load()?;

    let service = ctx.service.status().await.unwrap_or_else(|e| {
        tracing::debug!("Service status unavailable: {}", e);
        "unknown".to_string()
    });

    let listening = match (&config, listening_sockets().await) {
        (Some(config), Ok(sockets)) => sockets
            .into_iter()
            .filter(|l| config.contains_port(l.port))
            .collect(),
        (_, Err(e)) => {
            tracing::debug!("Listening sockets unavailable: {}", e);
            Vec::new()
        }
        (None, Ok(_)) => Vec::new(),
    };

    let restart_interval = match ctx.schedule().current().await {
        Ok(interval) => interval.map(|i| i.to_string()),
        Err(e) => {
            tracing::debug!("Restart schedule unavailable: {}", e);
            None
        }
    };

    let domain_state = match config.as_ref().and_then(|c| c.domain.as_deref()) {
        Some(domain) => ctx.lifecycle().state_of(domain).ok(),
        None => None,
    };

    let recent_log = if log_lines > 0 {
        tail_lines(&ctx.paths.service_log(), log_lines)?
    } else {
        Vec::new()
    };

    Ok(StatusReport {
        installed: config.is_some(),
        plan: config.as_ref().map(plan),
        config,
        service,
        listening,
        restart_interval,
        domain_state,
        recent_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_listeners() {
        let output = "\
LISTEN 0      4096         0.0.0.0:8443      0.0.0.0:*
LISTEN 0      511             [::]:80           [::]:*
LISTEN 0      4096   127.0.0.53%lo:53        0.0.0.0:*
LISTEN 0      128                *:8080            *:*
garbage
";
        let listeners = parse_listeners(output);
        let ports: Vec<u16> = listeners.iter().map(|l| l.port).collect();
        assert_eq!(ports, vec![8443, 80, 53, 8080]);
        assert_eq!(listeners[1].local, "[::]:80");
    }

    #[test]
    fn test_tail_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.log");
        assert!(tail_lines(&path, 20).unwrap().is_empty());

        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..50 {
            writeln!(file, "line {}", i).unwrap();
        }
        let tail = tail_lines(&path, 20).unwrap();
        assert_eq!(tail.len(), 20);
        assert_eq!(tail[0], "line 30");
        assert_eq!(tail[19], "line 49");
    }

    #[test]
    fn test_search_logs_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let service = dir.path().join("service.log");
        let error = dir.path().join("error.log");
        std::fs::write(&service, "started\nForwarder 8443 LISTENING\n").unwrap();
        std::fs::write(&error, "bind 8080 failed\n").unwrap();

        let logs = vec![
            ("service", service.clone()),
            ("error", error),
            ("missing", dir.path().join("nope.log")),
        ];
        let matches = search_logs(&logs, "listening").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[0].path, service);

        assert_eq!(search_logs(&logs, "8").unwrap().len(), 2);
        assert!(search_logs(&logs, "").unwrap().is_empty());
    }
}
