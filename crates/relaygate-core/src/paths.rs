//! Filesystem locations used by relaygate
//!
//! Every location has a system default and can be overridden through a
//! `RELAYGATE_*` environment variable, which is how tests and non-standard
//! hosts point the tool somewhere else.

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable prefix
const ENV_PREFIX: &str = "RELAYGATE";

/// Name of the systemd unit that runs the supervisor
pub const SERVICE_NAME: &str = "relaygate";

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

fn path_or(name: &str, default: &str) -> PathBuf {
    get_env(name)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Where relaygate and its collaborators keep their files
#[derive(Debug, Clone)]
pub struct SystemPaths {
    /// Persisted tunnel record
    pub config_file: PathBuf,
    /// Directory holding relaygate state (routing index)
    pub state_dir: PathBuf,
    /// Install log, service log and error log live here
    pub log_dir: PathBuf,
    /// Reverse proxy rule files
    pub sites_dir: PathBuf,
    /// Reverse proxy enabled-rule links
    pub enabled_dir: PathBuf,
    /// ACME client configuration root (live/, archive/, renewal/)
    pub acme_dir: PathBuf,
    /// Scheduler entry directory
    pub cron_dir: PathBuf,
    /// Service unit directory
    pub unit_dir: PathBuf,
    /// Reverse proxy log directory
    pub proxy_log_dir: PathBuf,
}

impl SystemPaths {
    /// Resolve locations from the environment, falling back to system defaults
    pub fn from_env() -> Self {
        Self {
            config_file: path_or("CONFIG", "/etc/relaygate/tunnel.conf"),
            state_dir: path_or("STATE_DIR", "/etc/relaygate"),
            log_dir: path_or("LOG_DIR", "/var/log/relaygate"),
            sites_dir: path_or("SITES_DIR", "/etc/nginx/sites-available"),
            enabled_dir: path_or("ENABLED_DIR", "/etc/nginx/sites-enabled"),
            acme_dir: path_or("ACME_DIR", "/etc/letsencrypt"),
            cron_dir: path_or("CRON_DIR", "/etc/cron.d"),
            unit_dir: path_or("UNIT_DIR", "/etc/systemd/system"),
            proxy_log_dir: path_or("PROXY_LOG_DIR", "/var/log/nginx"),
        }
    }

    /// Lay every location out under one root directory
    pub fn under(root: &Path) -> Self {
        Self {
            config_file: root.join("etc/relaygate/tunnel.conf"),
            state_dir: root.join("etc/relaygate"),
            log_dir: root.join("var/log/relaygate"),
            sites_dir: root.join("etc/nginx/sites-available"),
            enabled_dir: root.join("etc/nginx/sites-enabled"),
            acme_dir: root.join("etc/letsencrypt"),
            cron_dir: root.join("etc/cron.d"),
            unit_dir: root.join("etc/systemd/system"),
            proxy_log_dir: root.join("var/log/nginx"),
        }
    }

    /// Override the config file location (CLI `--config`)
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    pub fn install_log(&self) -> PathBuf {
        self.log_dir.join("install.log")
    }

    pub fn service_log(&self) -> PathBuf {
        self.log_dir.join("service.log")
    }

    pub fn error_log(&self) -> PathBuf {
        self.log_dir.join("error.log")
    }

    pub fn proxy_access_log(&self) -> PathBuf {
        self.proxy_log_dir.join("access.log")
    }

    pub fn proxy_error_log(&self) -> PathBuf {
        self.proxy_log_dir.join("error.log")
    }

    /// JSON index mapping domains to their routing rule files
    pub fn routing_index(&self) -> PathBuf {
        self.state_dir.join("routes.json")
    }

    pub fn unit_file(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", SERVICE_NAME))
    }

    /// Every log the log viewer knows about, with a display label
    pub fn all_logs(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("install", self.install_log()),
            ("service", self.service_log()),
            ("error", self.error_log()),
            ("proxy-access", self.proxy_access_log()),
            ("proxy-error", self.proxy_error_log()),
        ]
    }
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "RELAYGATE");
    }

    #[test]
    fn test_under_root() {
        let paths = SystemPaths::under(Path::new("/tmp/x"));
        assert_eq!(
            paths.config_file,
            PathBuf::from("/tmp/x/etc/relaygate/tunnel.conf")
        );
        assert_eq!(
            paths.unit_file(),
            PathBuf::from("/tmp/x/etc/systemd/system/relaygate.service")
        );
        assert_eq!(paths.all_logs().len(), 5);
    }
}
