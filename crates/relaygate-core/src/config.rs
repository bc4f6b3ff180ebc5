//! Tunnel configuration record and its store
//!
//! The record is a flat `key = value` TOML file and is the single source of
//! truth for both the supervisor and the edge lifecycle manager. It is only
//! ever rewritten whole (install) or extended by one port (add-port), and
//! every write lands through a temp file + rename so a concurrently
//! restarting supervisor never reads a torn record.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use relaygate_common::RelayError;
use serde::{Deserialize, Serialize};

/// Which side of the tunnel this node is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Terminates public TLS and forwards to the upstream node
    #[serde(rename = "iran")]
    Edge,
    /// Receives forwarded traffic and hands it to local services
    #[serde(rename = "foreign")]
    Upstream,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Edge => "iran",
            Role::Upstream => "foreign",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iran" | "edge" => Ok(Role::Edge),
            "foreign" | "upstream" => Ok(Role::Upstream),
            other => Err(RelayError::validation(format!(
                "Invalid role '{}'. Use 'iran' (edge) or 'foreign' (upstream)",
                other
            ))),
        }
    }
}

fn default_control_path() -> String {
    "/".to_string()
}

/// Persisted tunnel parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub role: Role,

    /// Public name and certificate subject (edge only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Host the edge forwards to; upstream nodes always target loopback
    #[serde(
        rename = "foreign_ip",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub upstream_address: Option<String>,

    /// Ports to forward, in configured order, no duplicates
    #[serde(rename = "v2ray_ports", with = "port_list")]
    pub ports: Vec<u16>,

    /// Panel port: never forwarded, denied at the routing layer
    #[serde(rename = "xui_port")]
    pub excluded_port: u16,

    /// Path prefix the edge proxies to the local tunnel service
    #[serde(default = "default_control_path")]
    pub control_path: String,

    /// Local port behind `control_path` (defaults to the first forwarded port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_port: Option<u16>,

    /// Close relayed connections idle for this long (0 = never)
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// Registration email handed to the ACME client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme_email: Option<String>,
}

impl TunnelConfig {
    /// Build a config for the given role with defaults for optional fields
    pub fn new(role: Role, ports: Vec<u16>, excluded_port: u16) -> Self {
        Self {
            role,
            domain: None,
            upstream_address: None,
            ports,
            excluded_port,
            control_path: default_control_path(),
            control_port: None,
            idle_timeout_secs: 0,
            acme_email: None,
        }
    }

    /// Ports that get a forwarder: `ports` without the excluded port
    pub fn forwarded_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports
            .iter()
            .copied()
            .filter(move |p| *p != self.excluded_port)
    }

    pub fn contains_port(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    /// Port the edge proxies its control path to
    pub fn effective_control_port(&self) -> Option<u16> {
        self.control_port.or_else(|| self.forwarded_ports().next())
    }

    /// Copy with the domain in its canonical form
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.domain = config.domain.as_deref().map(normalize_domain);
        config
    }

    /// Check the record before anything is written or started
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.ports.is_empty() {
            return Err(RelayError::validation("At least one port is required"));
        }
        check_distinct(&self.ports)?;
        if self.excluded_port == 0 {
            return Err(RelayError::validation("Panel port must be between 1 and 65535"));
        }
        if !self.control_path.starts_with('/') {
            return Err(RelayError::validation(format!(
                "Control path must start with '/': {}",
                self.control_path
            )));
        }
        if self.control_port == Some(0) {
            return Err(RelayError::validation("Control port must be between 1 and 65535"));
        }

        if self.role == Role::Edge {
            let domain = self.domain.as_deref().ok_or_else(|| {
                RelayError::validation("A domain is required for the iran (edge) role")
            })?;
            validate_domain(&normalize_domain(domain))?;

            let upstream = self.upstream_address.as_deref().unwrap_or("").trim();
            if upstream.is_empty() || upstream.contains(char::is_whitespace) {
                return Err(RelayError::validation(
                    "A foreign server address is required for the iran (edge) role",
                ));
            }

            if self.forwarded_ports().next().is_none() && self.control_port.is_none() {
                return Err(RelayError::validation(
                    "Every port equals the panel port; nothing would be forwarded",
                ));
            }
        }

        Ok(())
    }
}

/// Parse a comma (or whitespace) separated port list, rejecting duplicates
pub fn parse_ports(input: &str) -> Result<Vec<u16>, RelayError> {
    let mut ports = Vec::new();
    for token in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        ports.push(parse_port(token)?);
    }
    if ports.is_empty() {
        return Err(RelayError::validation("Port list is empty"));
    }
    check_distinct(&ports)?;
    Ok(ports)
}

/// Parse a single port number in 1..=65535
pub fn parse_port(input: &str) -> Result<u16, RelayError> {
    match input.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(RelayError::validation(format!(
            "Invalid port '{}': expected a number between 1 and 65535",
            input.trim()
        ))),
        Ok(port) => Ok(port),
    }
}

fn check_distinct(ports: &[u16]) -> Result<(), RelayError> {
    for (i, port) in ports.iter().enumerate() {
        if *port == 0 {
            return Err(RelayError::validation("Port 0 is not a valid port"));
        }
        if ports[..i].contains(port) {
            return Err(RelayError::validation(format!(
                "Port {} is listed more than once",
                port
            )));
        }
    }
    Ok(())
}

/// Canonical form of a domain name: trimmed and lowercased
///
/// Every artifact on the edge is keyed by this form.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

fn validate_domain(domain: &str) -> Result<(), RelayError> {
    let valid = !domain.is_empty()
        && domain.len() <= 253
        && domain.contains('.')
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(RelayError::validation(format!("Invalid domain name: {}", domain)))
    }
}

/// `v2ray_ports` is persisted as a comma-separated string
mod port_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ports: &[u16], serializer: S) -> Result<S::Ok, S::Error> {
        let joined = ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        serializer.serialize_str(&joined)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Joined(String),
        List(Vec<u16>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u16>, D::Error> {
        let joined = match Raw::deserialize(deserializer)? {
            Raw::Joined(s) => s,
            Raw::List(list) => list
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(","),
        };
        super::parse_ports(&joined).map_err(serde::de::Error::custom)
    }
}

/// Result of appending a port to the stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddPortOutcome {
    /// Port appended; carries the record as written
    Added(TunnelConfig),
    /// Port was already configured; nothing written
    AlreadyExists,
}

/// Owner of the persisted [`TunnelConfig`]
///
/// Mutations are serialized in-process by a mutex and across processes by an
/// exclusive lock file next to the record.
pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    version: AtomicU64,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            version: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the record; fails with `NotInstalled` when absent
    pub fn load(&self) -> Result<TunnelConfig, RelayError> {
        self.try_load()?.ok_or(RelayError::NotInstalled)
    }

    /// Read the record if it exists
    pub fn try_load(&self) -> Result<Option<TunnelConfig>, RelayError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RelayError::config(&self.path, e.to_string())),
        };
        let config: TunnelConfig = toml::from_str(&content)
            .map_err(|e| RelayError::config(&self.path, e.to_string()))?;
        Ok(Some(config))
    }

    /// Rewrite the whole record (install flow)
    pub fn replace(&self, config: &TunnelConfig) -> Result<u64, RelayError> {
        config.validate()?;
        let _guard = self.write_lock.lock();
        let _lock = LockFile::acquire(&self.lock_path())?;
        self.write_atomic(config)?;
        Ok(self.version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Append one port (add-port flow)
    pub fn add_port(&self, port: u16) -> Result<AddPortOutcome, RelayError> {
        if port == 0 {
            return Err(RelayError::validation("Port 0 is not a valid port"));
        }
        let _guard = self.write_lock.lock();
        let _lock = LockFile::acquire(&self.lock_path())?;

        let mut config = self.load()?;
        if config.contains_port(port) {
            return Ok(AddPortOutcome::AlreadyExists);
        }
        config.ports.push(port);
        self.write_atomic(&config)?;
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(AddPortOutcome::Added(config))
    }

    /// Delete the record (uninstall flow); returns whether it existed
    pub fn remove(&self) -> Result<bool, RelayError> {
        let _guard = self.write_lock.lock();
        let _lock = LockFile::acquire(&self.lock_path())?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                self.version.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn write_atomic(&self, config: &TunnelConfig) -> Result<(), RelayError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let content = toml::to_string(config)
            .map_err(|e| RelayError::config(&self.path, e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        tracing::info!("Configuration written to {:?}", self.path);
        Ok(())
    }
}

/// Exclusive lock file; removed on drop
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path) -> Result<Self, RelayError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    // Check-then-delete: two processes reclaiming the same stale
                    // lock at once can both succeed. Mutations come from one
                    // operator at a time, so this is left unguarded.
                    if attempt == 0 && Self::is_stale(path) {
                        tracing::warn!("Removing stale lock {:?}", path);
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    return Err(RelayError::ConfigLocked(path.to_path_buf()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RelayError::ConfigLocked(path.to_path_buf()))
    }

    /// A lock whose owner pid no longer exists was left by a crashed process
    fn is_stale(path: &Path) -> bool {
        let Ok(content) = std::fs::read_to_string(path) else {
            return false;
        };
        match content.trim().parse::<u32>() {
            Ok(pid) => !Path::new(&format!("/proc/{}", pid)).exists(),
            Err(_) => false,
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_config() -> TunnelConfig {
        let mut config = TunnelConfig::new(Role::Edge, vec![8443], 2053);
        config.domain = Some("t.example.com".to_string());
        config.upstream_address = Some("203.0.113.9".to_string());
        config
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("iran".parse::<Role>().unwrap(), Role::Edge);
        assert_eq!("Foreign".parse::<Role>().unwrap(), Role::Upstream);
        assert!("moon".parse::<Role>().is_err());
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports("8443,8080").unwrap(), vec![8443, 8080]);
        assert_eq!(parse_ports(" 443 , 80 ").unwrap(), vec![443, 80]);
        assert!(parse_ports("").is_err());
        assert!(parse_ports("80,abc").is_err());
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("70000").is_err());
        assert!(parse_ports("80,80").is_err());
    }

    #[test]
    fn test_record_format() {
        let text = toml::to_string(&edge_config()).unwrap();
        assert!(text.contains("role = \"iran\""));
        assert!(text.contains("foreign_ip = \"203.0.113.9\""));
        assert!(text.contains("v2ray_ports = \"8443\""));
        assert!(text.contains("xui_port = 2053"));
    }

    #[test]
    fn test_record_accepts_minimal_upstream() {
        let config: TunnelConfig = toml::from_str(
            "role = \"foreign\"\nv2ray_ports = \"8443,8080\"\nxui_port = 54321\n",
        )
        .unwrap();
        assert_eq!(config.role, Role::Upstream);
        assert_eq!(config.ports, vec![8443, 8080]);
        assert_eq!(config.control_path, "/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(edge_config().validate().is_ok());

        let mut missing_domain = edge_config();
        missing_domain.domain = None;
        assert!(missing_domain.validate().is_err());

        let mut bad_domain = edge_config();
        bad_domain.domain = Some("-bad..example".to_string());
        assert!(bad_domain.validate().is_err());

        let mut no_upstream = edge_config();
        no_upstream.upstream_address = Some("  ".to_string());
        assert!(no_upstream.validate().is_err());

        let empty = TunnelConfig::new(Role::Upstream, vec![], 2053);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_forwarded_ports_skip_excluded() {
        let config = TunnelConfig::new(Role::Upstream, vec![8443, 2053, 8080], 2053);
        assert_eq!(config.forwarded_ports().collect::<Vec<_>>(), vec![8443, 8080]);
        assert_eq!(config.effective_control_port(), Some(8443));
    }

    #[test]
    fn test_store_replace_and_add_port() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("etc/tunnel.conf"));
        assert!(matches!(store.load(), Err(RelayError::NotInstalled)));

        assert_eq!(store.replace(&edge_config()).unwrap(), 1);
        assert_eq!(store.load().unwrap(), edge_config());

        match store.add_port(8080).unwrap() {
            AddPortOutcome::Added(config) => assert_eq!(config.ports, vec![8443, 8080]),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.add_port(8080).unwrap(), AddPortOutcome::AlreadyExists);
        assert_eq!(store.load().unwrap().ports, vec![8443, 8080]);
        // add_port bumped the counter once; the duplicate did not
        assert_eq!(store.replace(&store.load().unwrap()).unwrap(), 3);

        // Lock file is released after each mutation
        assert!(!dir.path().join("etc/tunnel.conf.lock").exists());
    }

    #[test]
    fn test_add_port_requires_install() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("tunnel.conf"));
        assert!(matches!(store.add_port(80), Err(RelayError::NotInstalled)));
    }

    #[test]
    fn test_held_lock_blocks_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("tunnel.conf"));
        std::fs::write(
            dir.path().join("tunnel.conf.lock"),
            std::process::id().to_string(),
        )
        .unwrap();

        let result = store.replace(&edge_config());
        assert!(matches!(result, Err(RelayError::ConfigLocked(_))));
        assert!(!store.exists());
    }

    #[test]
    fn test_stale_lock_is_reclaimed_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("tunnel.conf"));
        let lock = dir.path().join("tunnel.conf.lock");
        // No such process
        std::fs::write(&lock, u32::MAX.to_string()).unwrap();

        store.replace(&edge_config()).unwrap();
        assert!(store.exists());
        assert!(!lock.exists());
    }

    #[test]
    fn test_domain_is_normalized_and_any_case_validates() {
        let mut config = edge_config();
        config.domain = Some(" T.Example.COM ".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.normalized().domain.as_deref(), Some("t.example.com"));
        assert_eq!(normalize_domain("T.Example.com"), "t.example.com");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("tunnel.conf"));
        store.replace(&edge_config()).unwrap();
        assert!(store.remove().unwrap());
        assert!(!store.remove().unwrap());
    }
}
