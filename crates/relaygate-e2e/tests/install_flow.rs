//! Install, uninstall, schedule and status flows against mock collaborators

use std::path::PathBuf;

use relaygate_core::collaborators::CertificatePaths;
use relaygate_core::lifecycle::renewal_entry_name;
use relaygate_core::ops::{self, OpsError};
use relaygate_core::schedule::RESTART_ENTRY;
use relaygate_core::{status, DomainState, RestartInterval, Role, TunnelConfig};
use relaygate_e2e::{edge_config, TestEnv};

const DOMAIN: &str = "t.example.com";

/// Initialize tracing for tests
fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("relaygate_core=debug,relaygate_e2e=debug")
        .with_test_writer()
        .try_init();
}

fn exe() -> PathBuf {
    PathBuf::from("/usr/local/bin/relaygate")
}

fn edge() -> TunnelConfig {
    edge_config(DOMAIN, "203.0.113.9", vec![8443, 8080], 2053)
}

#[tokio::test]
async fn test_install_edge() {
    init_test();
    let env = TestEnv::new();

    let report = ops::install(&env.ctx, &edge(), exe()).await.unwrap();
    assert_eq!(report.config_version, 1);
    let bootstrap = report.bootstrap.expect("edge install bootstraps");
    assert_eq!(bootstrap.site.domain, DOMAIN);

    // Config written as given
    assert_eq!(env.ctx.store.load().unwrap(), edge());

    // Unit runs the supervisor against the config file
    let unit = env.service.unit().expect("unit installed");
    assert_eq!(
        unit.exec_start,
        vec![
            "/usr/local/bin/relaygate".to_string(),
            "run".to_string(),
            "--config".to_string(),
            env.paths().config_file.display().to_string(),
        ]
    );
    assert_eq!(unit.stdout_log, env.paths().service_log());
    assert_eq!(unit.stderr_log, env.paths().error_log());
    assert!(env.service.is_enabled());
    assert_eq!(env.service.restart_count(), 1);

    assert!(env.scheduler.entry(&renewal_entry_name(DOMAIN)).is_some());
    assert_eq!(env.lifecycle().state_of(DOMAIN).unwrap(), DomainState::Active);
}

#[tokio::test]
async fn test_install_upstream_skips_edge() {
    init_test();
    let env = TestEnv::new();
    let config = TunnelConfig::new(Role::Upstream, vec![8443, 8080, 54321], 54321);

    let report = ops::install(&env.ctx, &config, exe()).await.unwrap();
    assert!(report.bootstrap.is_none());
    assert!(env.proxy.calls().is_empty());
    assert!(env.acme.requests().is_empty());
    assert!(env.routing_files().is_empty());

    assert_eq!(env.ctx.store.load().unwrap().ports, vec![8443, 8080, 54321]);
    assert!(env.service.is_active());
}

#[tokio::test]
async fn test_invalid_config_writes_nothing() {
    init_test();
    let env = TestEnv::new();

    let mut missing_domain = edge();
    missing_domain.domain = None;
    let err = ops::install(&env.ctx, &missing_domain, exe()).await.unwrap_err();
    assert!(matches!(err, OpsError::Config(_)), "got {:?}", err);

    let duplicate_ports = TunnelConfig::new(Role::Upstream, vec![8443, 8443], 2053);
    assert!(ops::install(&env.ctx, &duplicate_ports, exe()).await.is_err());

    assert!(!env.paths().config_file.exists());
    assert!(env.service.unit().is_none());
    assert!(env.proxy.calls().is_empty());
}

#[tokio::test]
async fn test_failed_bootstrap_then_rerun_converges() {
    init_test();
    let env = TestEnv::new();

    env.acme.set_fail_issue(true);
    let err = ops::install(&env.ctx, &edge(), exe()).await.unwrap_err();
    assert!(matches!(err, OpsError::Lifecycle(_)), "got {:?}", err);
    // The record is kept so the operator can rerun; the service is not touched
    assert!(env.paths().config_file.exists());
    assert!(env.service.unit().is_none());

    env.acme.set_fail_issue(false);
    let report = ops::install(&env.ctx, &edge(), exe()).await.unwrap();
    assert_eq!(report.config_version, 2);
    assert_eq!(env.service.restart_count(), 1);
    assert_eq!(env.lifecycle().state_of(DOMAIN).unwrap(), DomainState::Active);
}

#[tokio::test]
async fn test_service_failure_is_reported() {
    init_test();
    let env = TestEnv::new();
    env.service.set_fail_restart(true);

    let config = TunnelConfig::new(Role::Upstream, vec![8443], 2053);
    let err = ops::install(&env.ctx, &config, exe()).await.unwrap_err();
    assert!(matches!(err, OpsError::Service(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_uninstall_removes_everything() {
    init_test();
    let env = TestEnv::new();
    ops::install(&env.ctx, &edge(), exe()).await.unwrap();
    env.ctx
        .schedule()
        .install(RestartInterval::Every6Hours)
        .await
        .unwrap();

    let report = ops::uninstall(&env.ctx).await;
    assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    assert!(report.unit_removed);
    assert!(report.schedule_removed);
    assert!(report.config_removed);
    let domain = report.domain.expect("edge uninstall removes the domain");
    assert!(domain.schedule_removed);

    assert!(env.service.unit().is_none());
    assert!(!env.service.is_enabled());
    assert!(!env.service.is_active());
    assert!(!env.paths().config_file.exists());
    assert!(env.scheduler.names().is_empty());
    assert!(!env.acme.has_certificate(DOMAIN));
    assert!(env.lifecycle().routing().references(DOMAIN).unwrap().is_empty());
}

#[tokio::test]
async fn test_uninstall_without_install() {
    init_test();
    let env = TestEnv::new();

    let report = ops::uninstall(&env.ctx).await;
    assert!(report.warnings.is_empty());
    assert!(!report.unit_removed);
    assert!(report.domain.is_none());
    assert!(!report.config_removed);
}

#[tokio::test]
async fn test_schedule_manager_replaces_entry() {
    init_test();
    let env = TestEnv::new();
    let manager = env.ctx.schedule();

    manager.install(RestartInterval::Hourly).await.unwrap();
    manager.install(RestartInterval::Daily).await.unwrap();
    assert_eq!(env.scheduler.names(), vec![RESTART_ENTRY.to_string()]);

    let entry = env.scheduler.entry(RESTART_ENTRY).unwrap();
    assert_eq!(entry.expression, "0 0 * * *");
    assert_eq!(entry.command, "systemctl restart relaygate");
    assert_eq!(manager.current().await.unwrap(), Some(RestartInterval::Daily));

    assert!(manager.disable().await.unwrap());
    assert_eq!(manager.current().await.unwrap(), None);
}

#[tokio::test]
async fn test_schedule_install_failure_surfaces() {
    init_test();
    let env = TestEnv::new();
    env.scheduler.set_fail_install(true);
    assert!(env
        .ctx
        .schedule()
        .install(RestartInterval::Every3Hours)
        .await
        .is_err());
    assert!(env.scheduler.names().is_empty());
}

#[tokio::test]
async fn test_status_before_and_after_install() {
    init_test();
    let env = TestEnv::new();

    let before = status::collect(&env.ctx, 5).await.unwrap();
    assert!(!before.installed);
    assert!(before.plan.is_none());
    assert_eq!(before.service, "inactive");
    assert!(before.recent_log.is_empty());

    ops::install(&env.ctx, &edge(), exe()).await.unwrap();
    env.ctx
        .schedule()
        .install(RestartInterval::Every12Hours)
        .await
        .unwrap();
    std::fs::create_dir_all(&env.paths().log_dir).unwrap();
    std::fs::write(env.paths().service_log(), "one\ntwo\nthree\n").unwrap();

    let after = status::collect(&env.ctx, 2).await.unwrap();
    assert!(after.installed);
    assert_eq!(after.service, "active");
    assert_eq!(after.restart_interval.as_deref(), Some("12h"));
    assert_eq!(after.domain_state, Some(DomainState::Active));
    assert_eq!(after.recent_log, vec!["two".to_string(), "three".to_string()]);

    let plan = after.plan.as_ref().unwrap();
    let targets: Vec<&str> = plan.forwards.iter().map(|f| f.target.as_str()).collect();
    assert_eq!(targets, vec!["203.0.113.9:8443", "203.0.113.9:8080"]);

    // Serializes for `status --json`
    let json = serde_json::to_value(&after).unwrap();
    assert_eq!(json["config"]["role"], "iran");
}

#[tokio::test]
async fn test_reinstall_with_new_domain_removes_old_domain() {
    init_test();
    let env = TestEnv::new();
    let old = edge_config("old.example.com", "203.0.113.9", vec![8443, 8080], 2053);
    ops::install(&env.ctx, &old, exe()).await.unwrap();
    let old_material = CertificatePaths::for_domain(&env.paths().acme_dir, "old.example.com");
    assert!(old_material.any_exists());

    ops::install(&env.ctx, &edge(), exe()).await.unwrap();

    // Only the new domain has a renewal entry, certificate and rule
    assert_eq!(env.scheduler.names(), vec![renewal_entry_name(DOMAIN)]);
    assert!(!old_material.any_exists());
    assert!(!env.acme.has_certificate("old.example.com"));
    assert!(env
        .lifecycle()
        .routing()
        .references("old.example.com")
        .unwrap()
        .is_empty());
    assert_eq!(env.lifecycle().state_of(DOMAIN).unwrap(), DomainState::Active);
}

#[tokio::test]
async fn test_reinstall_as_upstream_removes_edge_domain() {
    init_test();
    let env = TestEnv::new();
    ops::install(&env.ctx, &edge(), exe()).await.unwrap();

    let upstream = TunnelConfig::new(Role::Upstream, vec![8443, 8080], 2053);
    ops::install(&env.ctx, &upstream, exe()).await.unwrap();

    assert!(env.scheduler.names().is_empty());
    assert!(!CertificatePaths::for_domain(&env.paths().acme_dir, DOMAIN).any_exists());
    assert!(env.lifecycle().routing().references(DOMAIN).unwrap().is_empty());
}

#[tokio::test]
async fn test_mixed_case_domain_installs_and_uninstalls_cleanly() {
    init_test();
    let env = TestEnv::new();
    let mixed = edge_config("T.Example.com", "203.0.113.9", vec![8443, 8080], 2053);

    ops::install(&env.ctx, &mixed, exe()).await.unwrap();
    assert_eq!(env.ctx.store.load().unwrap().domain.as_deref(), Some(DOMAIN));
    assert_eq!(
        env.lifecycle().state_of("T.Example.com").unwrap(),
        DomainState::Active
    );

    // A hand-edited record may carry any case
    env.ctx.store.replace(&mixed).unwrap();
    let report = ops::uninstall(&env.ctx).await;
    assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    let domain = report.domain.expect("edge uninstall removes the domain");
    assert!(domain.schedule_removed);
    assert!(!domain.routing_files.is_empty());

    assert!(env.scheduler.names().is_empty());
    assert!(!CertificatePaths::for_domain(&env.paths().acme_dir, DOMAIN).any_exists());
    assert!(env.lifecycle().routing().references(DOMAIN).unwrap().is_empty());
}

#[tokio::test]
async fn test_reload_checks_record_first() {
    init_test();
    let env = TestEnv::new();
    assert!(ops::reload(&env.ctx).await.is_err());
    assert_eq!(env.service.reload_count(), 0);

    let config = TunnelConfig::new(Role::Upstream, vec![8443, 8080], 2053);
    ops::install(&env.ctx, &config, exe()).await.unwrap();

    let reloaded = ops::reload(&env.ctx).await.unwrap();
    assert_eq!(reloaded, config);
    assert_eq!(env.service.reload_count(), 1);
    // Reload never restarts
    assert_eq!(env.service.restart_count(), 1);
}
