//! Install, uninstall and add-port flows
//!
//! These compose the config store, the lifecycle manager and the service
//! manager. The binary and the interactive menu both go through here so the
//! two surfaces cannot drift apart.

use std::path::PathBuf;
use std::sync::Arc;

use relaygate_common::RelayError;
use thiserror::Error;

use crate::collaborators::{
    find_program, AcmeClient, Certbot, CollaboratorError, CronScheduler, Nginx, ReverseProxy,
    Scheduler, ServiceManager, Systemd, UnitSpec,
};
use crate::config::{normalize_domain, AddPortOutcome, ConfigStore, Role, TunnelConfig};
use crate::lifecycle::{BootstrapPlan, BootstrapReport, EdgeLifecycle, LifecycleError, RemoveReport};
use crate::paths::{SystemPaths, SERVICE_NAME};
use crate::routing::RoutingStore;
use crate::schedule::ScheduleManager;

/// Delay before the init system restarts an exited supervisor
pub const RESTART_SEC: u64 = 5;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error(transparent)]
    Config(#[from] RelayError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Service manager: {0}")]
    Service(#[source] CollaboratorError),

    #[error("Missing required program(s): {}", .0.join(", "))]
    MissingPrograms(Vec<String>),
}

/// Paths plus the external collaborators every flow needs
pub struct Context {
    pub paths: SystemPaths,
    pub store: ConfigStore,
    pub proxy: Arc<dyn ReverseProxy>,
    pub acme: Arc<dyn AcmeClient>,
    pub service: Arc<dyn ServiceManager>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl Context {
    pub fn new(
        paths: SystemPaths,
        proxy: Arc<dyn ReverseProxy>,
        acme: Arc<dyn AcmeClient>,
        service: Arc<dyn ServiceManager>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            store: ConfigStore::new(&paths.config_file),
            paths,
            proxy,
            acme,
            service,
            scheduler,
        }
    }

    /// Context backed by nginx, certbot, systemd and cron
    pub fn system(paths: SystemPaths) -> Self {
        let proxy = Arc::new(Nginx::new());
        let acme = Arc::new(Certbot::new(&paths.acme_dir));
        let service = Arc::new(Systemd::new(&paths.unit_dir, SERVICE_NAME));
        let scheduler = Arc::new(CronScheduler::new(&paths.cron_dir));
        Self::new(paths, proxy, acme, service, scheduler)
    }

    pub fn lifecycle(&self) -> EdgeLifecycle {
        EdgeLifecycle::new(
            self.proxy.clone(),
            self.acme.clone(),
            self.scheduler.clone(),
            RoutingStore::new(
                &self.paths.sites_dir,
                &self.paths.enabled_dir,
                self.paths.routing_index(),
            ),
        )
    }

    pub fn schedule(&self) -> ScheduleManager {
        ScheduleManager::new(self.scheduler.clone())
    }
}

/// External programs a role relies on
pub fn required_programs(role: Role) -> &'static [&'static str] {
    match role {
        Role::Edge => &["systemctl", "ss", "nginx", "certbot"],
        Role::Upstream => &["systemctl", "ss"],
    }
}

/// Fail early when a required program is missing
pub fn preflight(role: Role) -> Result<(), OpsError> {
    let missing: Vec<String> = required_programs(role)
        .iter()
        .filter(|program| find_program(program).is_none())
        .map(|program| program.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OpsError::MissingPrograms(missing))
    }
}

/// Unit running `<exe> run --config <file>`
pub fn unit_spec(paths: &SystemPaths, exe: PathBuf) -> UnitSpec {
    UnitSpec {
        description: "relaygate TCP port forwarder".to_string(),
        exec_start: vec![
            exe.display().to_string(),
            "run".to_string(),
            "--config".to_string(),
            paths.config_file.display().to_string(),
        ],
        restart_sec: RESTART_SEC,
        stdout_log: paths.service_log(),
        stderr_log: paths.error_log(),
    }
}

#[derive(Debug)]
pub struct InstallReport {
    pub config_version: u64,
    pub bootstrap: Option<BootstrapReport>,
}

/// Write the config, bootstrap the edge (edge role) and start the service
///
/// Validation happens before anything is written. Re-running after a
/// failure converges, since every step replaces what it owns.
pub async fn install(
    ctx: &Context,
    config: &TunnelConfig,
    exe: PathBuf,
) -> Result<InstallReport, OpsError> {
    let config = &config.normalized();
    config.validate()?;
    let bootstrap_plan = match config.role {
        Role::Edge => Some(BootstrapPlan::from_config(config)?),
        Role::Upstream => None,
    };

    if let Some(previous) = previous_domain(ctx) {
        if config.domain.as_deref() != Some(previous.as_str()) {
            tracing::info!("Domain changed from {}, removing its edge artifacts", previous);
            ctx.lifecycle().remove(&previous).await;
        }
    }

    let config_version = ctx.store.replace(config)?;
    tracing::info!(
        "Saved {} config to {:?} (version {})",
        config.role,
        ctx.store.path(),
        config_version
    );

    let bootstrap = match (&bootstrap_plan, config.domain.as_deref()) {
        (Some(plan), Some(domain)) => Some(ctx.lifecycle().bootstrap(domain, plan).await?),
        _ => None,
    };

    ctx.service
        .install_unit(&unit_spec(&ctx.paths, exe))
        .await
        .map_err(OpsError::Service)?;
    ctx.service.enable().await.map_err(OpsError::Service)?;
    ctx.service.restart().await.map_err(OpsError::Service)?;
    tracing::info!("Service {} installed and started", SERVICE_NAME);

    Ok(InstallReport {
        config_version,
        bootstrap,
    })
}

/// Domain of the currently installed edge record, if any
fn previous_domain(ctx: &Context) -> Option<String> {
    match ctx.store.try_load() {
        Ok(Some(previous)) if previous.role == Role::Edge => {
            previous.domain.as_deref().map(normalize_domain)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Could not read the previous config: {}", e);
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct UninstallReport {
    pub unit_removed: bool,
    pub domain: Option<RemoveReport>,
    pub schedule_removed: bool,
    pub config_removed: bool,
    pub warnings: Vec<String>,
}

impl UninstallReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Undo [`install`]; every step runs even if an earlier one failed
pub async fn uninstall(ctx: &Context) -> UninstallReport {
    let mut report = UninstallReport::default();

    let config = match ctx.store.try_load() {
        Ok(config) => config,
        Err(e) => {
            report.warn(format!("Could not read config: {}", e));
            None
        }
    };

    if let Err(e) = ctx.service.stop().await {
        report.warn(format!("Stopping service failed: {}", e));
    }
    if let Err(e) = ctx.service.disable().await {
        report.warn(format!("Disabling service failed: {}", e));
    }
    match ctx.service.remove_unit().await {
        Ok(removed) => report.unit_removed = removed,
        Err(e) => report.warn(format!("Removing unit failed: {}", e)),
    }

    if let Some(domain) = config.as_ref().and_then(|c| c.domain.as_deref()) {
        report.domain = Some(ctx.lifecycle().remove(domain).await);
    }

    match ctx.schedule().disable().await {
        Ok(removed) => report.schedule_removed = removed,
        Err(e) => report.warn(format!("Removing restart schedule failed: {}", e)),
    }

    match ctx.store.remove() {
        Ok(removed) => report.config_removed = removed,
        Err(e) => report.warn(format!("Removing config failed: {}", e)),
    }

    tracing::info!("Uninstall finished with {} warning(s)", report.warnings.len());
    report
}

/// Append `port` and restart the service so the forwarder comes up
///
/// A duplicate port is reported without restarting anything.
pub async fn add_port(ctx: &Context, port: u16) -> Result<AddPortOutcome, OpsError> {
    let outcome = ctx.store.add_port(port)?;
    match &outcome {
        AddPortOutcome::Added(config) => {
            tracing::info!(
                "Port {} added ({} port(s) configured), restarting service",
                port,
                config.ports.len()
            );
            ctx.service.restart().await.map_err(OpsError::Service)?;
        }
        AddPortOutcome::AlreadyExists => {
            tracing::info!("Port {} already configured", port);
        }
    }
    Ok(outcome)
}

/// Ask the running service to reread the record (SIGHUP through the unit)
///
/// The record is checked first so a broken edit is reported here instead of
/// in the service log.
pub async fn reload(ctx: &Context) -> Result<TunnelConfig, OpsError> {
    let config = ctx.store.load()?;
    config.validate()?;
    ctx.service.reload().await.map_err(OpsError::Service)?;
    tracing::info!("Service {} asked to reload {:?}", SERVICE_NAME, ctx.store.path());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_spec_runs_config() {
        let paths = SystemPaths::under(std::path::Path::new("/tmp/rg"));
        let unit = unit_spec(&paths, PathBuf::from("/usr/local/bin/relaygate"));
        assert_eq!(unit.exec_start[0], "/usr/local/bin/relaygate");
        assert_eq!(unit.exec_start[1], "run");
        assert_eq!(unit.exec_start[3], paths.config_file.display().to_string());
        assert_eq!(unit.restart_sec, 5);
    }

    #[test]
    fn test_required_programs() {
        assert!(required_programs(Role::Edge).contains(&"certbot"));
        assert!(!required_programs(Role::Upstream).contains(&"nginx"));
    }
}
