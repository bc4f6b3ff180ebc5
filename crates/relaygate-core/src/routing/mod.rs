//! Routing rule files and the domain index
//!
//! Rule files live in the proxy's sites directory with a link in the enabled
//! directory. Which files belong to which domain is recorded in a JSON index,
//! so removing a domain is a lookup. A content scan of both directories runs
//! afterwards as a consistency check and catches files the index never knew
//! about (hand edits, files left by older installs).

pub mod rules;

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use rules::{EdgeSite, RuleKind};

/// Index key used for the fallback rule, which has no domain
const FALLBACK_KEY: &str = "_default";

/// File name used for the fallback rule
pub const FALLBACK_FILE: &str = "relaygate-default.conf";

/// File name for a domain's rule
pub fn rule_file_name(domain: &str) -> String {
    format!("relaygate-{}.conf", domain)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedRule {
    pub file: String,
    pub kind: RuleKind,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RoutingIndex {
    #[serde(default)]
    domains: BTreeMap<String, IndexedRule>,
}

/// Owner of the proxy's rule files
pub struct RoutingStore {
    sites_dir: PathBuf,
    enabled_dir: PathBuf,
    index_path: PathBuf,
}

impl RoutingStore {
    pub fn new(
        sites_dir: impl Into<PathBuf>,
        enabled_dir: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sites_dir: sites_dir.into(),
            enabled_dir: enabled_dir.into(),
            index_path: index_path.into(),
        }
    }

    fn load_index(&self) -> std::io::Result<RoutingIndex> {
        match std::fs::read_to_string(&self.index_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(index) => Ok(index),
                Err(e) => {
                    // The content scan still finds every file, so start over
                    tracing::warn!("Ignoring unreadable routing index {:?}: {}", self.index_path, e);
                    Ok(RoutingIndex::default())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RoutingIndex::default()),
            Err(e) => Err(e),
        }
    }

    fn save_index(&self, index: &RoutingIndex) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(index).map_err(std::io::Error::other)?;
        write_atomic(&self.index_path, content.as_bytes())
    }

    /// Write the fallback rule, replacing any previous one
    pub fn write_fallback(&self, content: &str) -> std::io::Result<PathBuf> {
        self.write_indexed(FALLBACK_KEY, FALLBACK_FILE, content, RuleKind::Fallback)
    }

    /// Write (or overwrite) the rule for `domain`
    pub fn write_domain_rule(
        &self,
        domain: &str,
        content: &str,
        kind: RuleKind,
    ) -> std::io::Result<PathBuf> {
        self.write_indexed(domain, &rule_file_name(domain), content, kind)
    }

    fn write_indexed(
        &self,
        key: &str,
        file: &str,
        content: &str,
        kind: RuleKind,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.sites_dir)?;
        std::fs::create_dir_all(&self.enabled_dir)?;

        let path = self.sites_dir.join(file);
        write_atomic(&path, content.as_bytes())?;
        self.enable(file)?;

        let mut index = self.load_index()?;
        index.domains.insert(
            key.to_string(),
            IndexedRule {
                file: file.to_string(),
                kind,
            },
        );
        self.save_index(&index)?;

        tracing::debug!("Wrote {:?} routing rule {:?}", kind, path);
        Ok(path)
    }

    fn enable(&self, file: &str) -> std::io::Result<()> {
        let link = self.enabled_dir.join(file);
        remove_if_exists(&link)?;
        let target = self.sites_dir.join(file);
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &link)
        }
        #[cfg(not(unix))]
        {
            std::fs::copy(&target, &link).map(|_| ())
        }
    }

    /// Rule the index holds for `domain`
    pub fn indexed(&self, domain: &str) -> std::io::Result<Option<IndexedRule>> {
        Ok(self.load_index()?.domains.get(domain).cloned())
    }

    /// Every domain the index knows about (fallback excluded)
    pub fn domains(&self) -> std::io::Result<Vec<String>> {
        Ok(self
            .load_index()?
            .domains
            .into_keys()
            .filter(|k| k != FALLBACK_KEY)
            .collect())
    }

    /// Remove every rule file belonging to `domain`
    ///
    /// Indexed files go first; then both directories are scanned for any
    /// remaining file whose name or content references the domain.
    pub fn remove_domain(&self, domain: &str) -> std::io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        let mut index = self.load_index()?;
        if let Some(rule) = index.domains.remove(domain) {
            for dir in [&self.enabled_dir, &self.sites_dir] {
                let path = dir.join(&rule.file);
                if remove_if_exists(&path)? {
                    removed.push(path);
                }
            }
            self.save_index(&index)?;
        }

        let stray = self.references(domain)?;
        if !stray.is_empty() {
            tracing::warn!(
                "Found {} unindexed routing file(s) referencing {}",
                stray.len(),
                domain
            );
        }
        for path in stray {
            if remove_if_exists(&path)? {
                removed.push(path);
            }
        }

        Ok(removed)
    }

    /// Remove every file in both rule directories and clear the index
    pub fn remove_all(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for dir in [&self.enabled_dir, &self.sites_dir] {
            for path in list_files(dir)? {
                if remove_if_exists(&path)? {
                    removed.push(path);
                }
            }
        }
        self.save_index(&RoutingIndex::default())?;
        Ok(removed)
    }

    /// Files in either directory whose name or content references `domain`
    pub fn references(&self, domain: &str) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for dir in [&self.enabled_dir, &self.sites_dir] {
            for path in list_files(dir)? {
                let name_match = path
                    .file_name()
                    .map(|n| {
                        let name = n.to_string_lossy();
                        name == rule_file_name(domain) || rules::references_domain(&name, domain)
                    })
                    .unwrap_or(false);
                // Dangling links have no content; match on name only
                let content_match = std::fs::read_to_string(&path)
                    .map(|content| rules::references_domain(&content, domain))
                    .unwrap_or(false);
                if name_match || content_match {
                    found.push(path);
                }
            }
        }
        Ok(found)
    }

    /// Every file currently in the sites directory
    pub fn list(&self) -> std::io::Result<Vec<PathBuf>> {
        list_files(&self.sites_dir)
    }
}

/// Regular files and links directly inside `dir` (missing dir = empty)
fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() || file_type.is_symlink() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Remove a file or link; a missing path is not an error
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
