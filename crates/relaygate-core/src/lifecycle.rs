//! Domain & edge lifecycle
//!
//! Owns the three artifacts that make a domain reachable on the edge: the
//! routing rule, the certificate material and the renewal schedule entry.
//! [`EdgeLifecycle::remove`] tears all of them down and never fails;
//! [`EdgeLifecycle::bootstrap`] rebuilds them from scratch in a fixed order
//! and refuses to activate a TLS rule whose certificate did not verify.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use relaygate_common::{verify_certificate_pair, CertificateSummary, RelayError};
use serde::Serialize;
use thiserror::Error;

use crate::collaborators::{
    AcmeClient, CollaboratorError, IssueRequest, ReverseProxy, ScheduleEntry, Scheduler,
};
use crate::config::{normalize_domain, Role, TunnelConfig};
use crate::routing::rules::{self, EdgeSite, RuleKind};
use crate::routing::RoutingStore;

/// Prefix of the per-domain renewal schedule entry
pub const RENEWAL_PREFIX: &str = "relaygate-renew-";

/// Daily renewal check; certbot only renews when expiry is near
pub const RENEWAL_EXPRESSION: &str = "17 3 * * *";

pub fn renewal_entry_name(domain: &str) -> String {
    format!("{}{}", RENEWAL_PREFIX, domain)
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("{stage} routing rule rejected by the proxy: {source}")]
    InvalidRule {
        stage: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("Certificate issuance for {domain} failed: {source}")]
    Issuance {
        domain: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("Certificate for {domain} unusable: {source}")]
    MissingMaterial {
        domain: String,
        #[source]
        source: RelayError,
    },

    #[error("Scheduling renewal for {domain} failed: {source}")]
    Renewal {
        domain: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("Proxy did not pick up the {stage} rule: {source}")]
    Activation {
        stage: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("Routing files: {0}")]
    Routing(#[from] std::io::Error),
}

/// Where a domain stands on this edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    Absent,
    Bootstrapping,
    Active,
}

/// Parameters of the final rule that do not come from the domain itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    pub excluded_port: u16,
    pub control_path: String,
    pub control_port: u16,
    pub email: Option<String>,
}

impl BootstrapPlan {
    /// Derive the plan from an edge config
    pub fn from_config(config: &TunnelConfig) -> Result<Self, RelayError> {
        if config.role != Role::Edge {
            return Err(RelayError::validation(
                "Domain bootstrap only applies to the iran (edge) role",
            ));
        }
        let control_port = config.effective_control_port().ok_or_else(|| {
            RelayError::validation("No port left to proxy the control path to")
        })?;
        Ok(Self {
            excluded_port: config.excluded_port,
            control_path: config.control_path.clone(),
            control_port,
            email: config.acme_email.clone(),
        })
    }
}

/// What a removal touched
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveReport {
    pub routing_files: Vec<PathBuf>,
    pub certificate_paths: Vec<PathBuf>,
    pub schedule_removed: bool,
    /// Failures that were logged and skipped
    pub warnings: Vec<String>,
}

impl RemoveReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Outcome of a successful bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub site: EdgeSite,
    pub rule_file: PathBuf,
    pub certificate: CertificateSummary,
    pub removed: RemoveReport,
}

/// Clears the in-progress mark when a bootstrap ends, however it ends
struct InProgress<'a> {
    set: &'a Mutex<HashSet<String>>,
    domain: String,
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.domain);
    }
}

pub struct EdgeLifecycle {
    proxy: Arc<dyn ReverseProxy>,
    acme: Arc<dyn AcmeClient>,
    scheduler: Arc<dyn Scheduler>,
    routing: RoutingStore,
    in_progress: Mutex<HashSet<String>>,
}

impl EdgeLifecycle {
    pub fn new(
        proxy: Arc<dyn ReverseProxy>,
        acme: Arc<dyn AcmeClient>,
        scheduler: Arc<dyn Scheduler>,
        routing: RoutingStore,
    ) -> Self {
        Self {
            proxy,
            acme,
            scheduler,
            routing,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn routing(&self) -> &RoutingStore {
        &self.routing
    }

    /// Tear down everything belonging to `domain`
    ///
    /// Every step is attempted even when an earlier one failed; failures end
    /// up in [`RemoveReport::warnings`]. Running it twice is harmless.
    pub async fn remove(&self, domain: &str) -> RemoveReport {
        let domain = normalize_domain(domain);
        let domain = domain.as_str();
        tracing::info!("Removing domain {}", domain);
        let mut report = RemoveReport::default();

        if let Err(e) = self.proxy.stop().await {
            report.warn(format!("Stopping proxy failed: {}", e));
        }

        match self.routing.remove_domain(domain) {
            Ok(files) => report.routing_files = files,
            Err(e) => report.warn(format!("Removing routing files for {} failed: {}", domain, e)),
        }

        let known = match self.acme.list_certificates().await {
            Ok(names) => names.iter().any(|name| name == domain),
            Err(e) => {
                tracing::debug!("Listing certificates failed ({}), deleting blindly", e);
                true
            }
        };
        if known {
            if let Err(e) = self.acme.delete(domain).await {
                // The directories go regardless
                tracing::debug!("ACME client could not delete {}: {}", domain, e);
            }
        } else {
            tracing::debug!("ACME client holds no certificate for {}", domain);
        }
        let material = self.acme.material(domain);
        for dir in [&material.live_dir, &material.archive_dir] {
            match remove_dir(dir) {
                Ok(true) => report.certificate_paths.push(dir.clone()),
                Ok(false) => {}
                Err(e) => report.warn(format!("Removing {:?} failed: {}", dir, e)),
            }
        }
        match crate::routing::remove_if_exists(&material.renewal_conf) {
            Ok(true) => report.certificate_paths.push(material.renewal_conf.clone()),
            Ok(false) => {}
            Err(e) => report.warn(format!("Removing {:?} failed: {}", material.renewal_conf, e)),
        }
        if material.any_exists() {
            report.warn(format!("Certificate material for {} is still on disk", domain));
        }

        match self.scheduler.remove(&renewal_entry_name(domain)).await {
            Ok(removed) => report.schedule_removed = removed,
            Err(e) => report.warn(format!("Removing renewal entry for {} failed: {}", domain, e)),
        }

        if let Err(e) = self.proxy.start().await {
            report.warn(format!("Starting proxy failed: {}", e));
        }

        tracing::info!(
            "Removed {} routing file(s) and {} certificate path(s) for {}",
            report.routing_files.len(),
            report.certificate_paths.len(),
            domain
        );
        report
    }

    /// Wipe every managed routing rule and leave only the fallback
    pub async fn reset_all(&self) -> Result<Vec<PathBuf>, LifecycleError> {
        let removed = self.routing.remove_all()?;
        tracing::info!("Reset removed {} routing file(s)", removed.len());

        self.routing.write_fallback(&rules::render_fallback())?;
        self.proxy
            .validate()
            .await
            .map_err(|source| LifecycleError::InvalidRule {
                stage: "fallback",
                source,
            })?;

        // The proxy may be down at this point; bootstrap restarts it anyway
        if let Err(e) = self.activate().await {
            tracing::warn!("Proxy did not pick up the fallback rule: {}", e);
        }
        Ok(removed)
    }

    /// Build the edge for `domain` from a clean slate
    pub async fn bootstrap(
        &self,
        domain: &str,
        plan: &BootstrapPlan,
    ) -> Result<BootstrapReport, LifecycleError> {
        let domain = normalize_domain(domain);
        if domain.is_empty() || domain.contains(char::is_whitespace) || domain.contains('/') {
            return Err(LifecycleError::InvalidDomain(domain));
        }

        self.in_progress.lock().insert(domain.clone());
        let _mark = InProgress {
            set: &self.in_progress,
            domain: domain.clone(),
        };

        tracing::info!("Bootstrapping edge for {}", domain);
        self.reset_all().await?;
        let removed = self.remove(&domain).await;

        // Plain redirect first: port 80 keeps answering while the
        // certificate is pending
        self.routing
            .write_domain_rule(&domain, &rules::render_redirect(&domain), RuleKind::Redirect)?;
        if let Err(source) = self.proxy.validate().await {
            self.discard_rule(&domain);
            return Err(LifecycleError::InvalidRule {
                stage: "redirect",
                source,
            });
        }
        if let Err(e) = self.activate().await {
            tracing::warn!("Proxy did not pick up the redirect rule: {}", e);
        }

        self.issue(&domain, plan.email.clone()).await?;

        let material = self.acme.material(&domain);
        let certificate = verify_certificate_pair(&material.cert, &material.key).map_err(
            |source| LifecycleError::MissingMaterial {
                domain: domain.clone(),
                source,
            },
        )?;
        tracing::info!(
            "Certificate for {} verified ({} certificate(s) in chain)",
            domain,
            certificate.chain_len
        );

        let entry = ScheduleEntry {
            name: renewal_entry_name(&domain),
            expression: RENEWAL_EXPRESSION.to_string(),
            command: self.acme.renew_command(&domain),
        };
        self.scheduler
            .install(&entry)
            .await
            .map_err(|source| LifecycleError::Renewal {
                domain: domain.clone(),
                source,
            })?;

        let site = EdgeSite {
            domain: domain.clone(),
            cert: material.cert.clone(),
            key: material.key.clone(),
            excluded_port: plan.excluded_port,
            control_path: plan.control_path.clone(),
            control_port: plan.control_port,
        };
        let rule_file =
            self.routing
                .write_domain_rule(&domain, &rules::render_final(&site), RuleKind::Final)?;
        if let Err(source) = self.proxy.validate().await {
            // Put the redirect back so the proxy config stays loadable
            self.routing.write_domain_rule(
                &domain,
                &rules::render_redirect(&domain),
                RuleKind::Redirect,
            )?;
            return Err(LifecycleError::InvalidRule {
                stage: "final",
                source,
            });
        }
        self.activate()
            .await
            .map_err(|source| LifecycleError::Activation {
                stage: "final",
                source,
            })?;

        tracing::info!("Edge for {} is active", domain);
        Ok(BootstrapReport {
            site,
            rule_file,
            certificate,
            removed,
        })
    }

    /// Standalone issuance with the proxy out of the way
    async fn issue(&self, domain: &str, email: Option<String>) -> Result<(), LifecycleError> {
        if let Err(e) = self.proxy.stop().await {
            tracing::warn!("Stopping proxy before issuance failed: {}", e);
        }

        let result = self
            .acme
            .issue(&IssueRequest::standalone_forced(domain, email))
            .await;

        if let Err(e) = self.proxy.start().await {
            tracing::warn!("Starting proxy after issuance failed: {}", e);
        }

        result.map_err(|source| {
            tracing::error!("Certificate issuance for {} failed: {}", domain, source);
            LifecycleError::Issuance {
                domain: domain.to_string(),
                source,
            }
        })
    }

    /// Reload the proxy, starting it if it is not running
    async fn activate(&self) -> Result<(), CollaboratorError> {
        match self.proxy.reload().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!("Proxy reload failed ({}), trying start", e);
                self.proxy.start().await
            }
        }
    }

    fn discard_rule(&self, domain: &str) {
        if let Err(e) = self.routing.remove_domain(domain) {
            tracing::warn!("Discarding rejected rule for {} failed: {}", domain, e);
        }
    }

    pub fn state_of(&self, domain: &str) -> Result<DomainState, LifecycleError> {
        let domain = normalize_domain(domain);
        let domain = domain.as_str();
        if self.in_progress.lock().contains(domain) {
            return Ok(DomainState::Bootstrapping);
        }
        let final_rule = self
            .routing
            .indexed(domain)?
            .is_some_and(|rule| rule.kind == RuleKind::Final);
        let material = self.acme.material(domain);
        if final_rule && material.cert.exists() && material.key.exists() {
            Ok(DomainState::Active)
        } else {
            Ok(DomainState::Absent)
        }
    }
}

/// Remove a directory tree; a missing one is not an error
fn remove_dir(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
