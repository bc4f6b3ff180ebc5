use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{run_command, CollaboratorError, ServiceManager, UnitSpec};

/// systemd unit for the supervisor process
pub struct Systemd {
    unit_dir: PathBuf,
    name: String,
}

impl Systemd {
    pub fn new(unit_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            name: name.into(),
        }
    }

    fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.name))
    }

    async fn systemctl(&self, action: &str) -> Result<(), CollaboratorError> {
        run_command("systemctl", &[action, &self.name]).await?;
        Ok(())
    }
}

/// Quote an ExecStart argument when it contains whitespace
fn quote_arg(arg: &str) -> String {
    if arg.contains(char::is_whitespace) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Render the unit file; restart-on-exit with a fixed delay
pub fn render_unit(unit: &UnitSpec) -> String {
    let exec_start = unit
        .exec_start
        .iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={exec_start}
ExecReload=/bin/kill -HUP $MAINPID
Restart=always
RestartSec={restart_sec}
LimitNOFILE=1048576
StandardOutput=append:{stdout}
StandardError=append:{stderr}

[Install]
WantedBy=multi-user.target
",
        description = unit.description,
        exec_start = exec_start,
        restart_sec = unit.restart_sec,
        stdout = unit.stdout_log.display(),
        stderr = unit.stderr_log.display(),
    )
}

#[async_trait]
impl ServiceManager for Systemd {
    async fn install_unit(&self, unit: &UnitSpec) -> Result<(), CollaboratorError> {
        tokio::fs::create_dir_all(&self.unit_dir).await?;
        for log in [&unit.stdout_log, &unit.stderr_log] {
            if let Some(parent) = log.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let path = self.unit_path();
        tokio::fs::write(&path, render_unit(unit)).await?;
        tracing::info!("Wrote service unit {:?}", path);
        run_command("systemctl", &["daemon-reload"]).await?;
        Ok(())
    }

    async fn remove_unit(&self) -> Result<bool, CollaboratorError> {
        let removed = match tokio::fs::remove_file(self.unit_path()).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if removed {
            run_command("systemctl", &["daemon-reload"]).await?;
        }
        Ok(removed)
    }

    async fn enable(&self) -> Result<(), CollaboratorError> {
        self.systemctl("enable").await
    }

    async fn disable(&self) -> Result<(), CollaboratorError> {
        self.systemctl("disable").await
    }

    async fn start(&self) -> Result<(), CollaboratorError> {
        self.systemctl("start").await
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        self.systemctl("stop").await
    }

    async fn restart(&self) -> Result<(), CollaboratorError> {
        self.systemctl("restart").await
    }

    async fn reload(&self) -> Result<(), CollaboratorError> {
        self.systemctl("reload").await
    }

    async fn status(&self) -> Result<String, CollaboratorError> {
        // is-active exits non-zero for anything but "active"; only its output matters
        let output = tokio::process::Command::new("systemctl")
            .args(["is-active", &self.name])
            .output()
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    CollaboratorError::NotFound {
                        program: "systemctl".to_string(),
                    }
                } else {
                    CollaboratorError::Io(e)
                }
            })?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if state.is_empty() {
            "unknown".to_string()
        } else {
            state
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_unit() {
        let unit = UnitSpec {
            description: "relaygate port forwarding supervisor".to_string(),
            exec_start: vec![
                "/usr/local/bin/relaygate".to_string(),
                "run".to_string(),
                "--config".to_string(),
                "/etc/relaygate/tunnel.conf".to_string(),
            ],
            restart_sec: 5,
            stdout_log: PathBuf::from("/var/log/relaygate/service.log"),
            stderr_log: PathBuf::from("/var/log/relaygate/error.log"),
        };
        let text = render_unit(&unit);
        assert!(text.contains(
            "ExecStart=/usr/local/bin/relaygate run --config /etc/relaygate/tunnel.conf"
        ));
        assert!(text.contains("Restart=always"));
        assert!(text.contains("RestartSec=5"));
        assert!(text.contains("ExecReload=/bin/kill -HUP $MAINPID"));
        assert!(text.contains("StandardError=append:/var/log/relaygate/error.log"));
    }

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("plain"), "plain");
        assert_eq!(quote_arg("/opt/my dir/x"), "\"/opt/my dir/x\"");
    }
}
