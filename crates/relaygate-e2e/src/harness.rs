//! Test environment harness for E2E tests
//!
//! Lays out every system location under a temporary root and wires the mock
//! collaborators into a [`Context`], so the real command flows and the real
//! lifecycle manager run without touching the host.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use relaygate_core::ops::Context;
use relaygate_core::{EdgeLifecycle, Role, SupervisorOptions, SystemPaths, TunnelConfig};

use crate::mock_acme::MockAcme;
use crate::mock_proxy::MockProxy;
use crate::mock_scheduler::MockScheduler;
use crate::mock_service::MockService;

/// Host forwarders bind in tests
///
/// Loopback services sit on 127.0.0.1 with the same port number, so the
/// forwarder needs a different loopback address to avoid colliding with them.
pub const TEST_LISTEN_HOST: &str = "127.0.0.2";

/// A temporary root with mock collaborators
pub struct TestEnv {
    pub proxy: Arc<MockProxy>,
    pub acme: Arc<MockAcme>,
    pub service: Arc<MockService>,
    pub scheduler: Arc<MockScheduler>,
    pub ctx: Context,
    root: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp root");
        let paths = SystemPaths::under(root.path());

        let proxy = MockProxy::new();
        let acme = MockAcme::new(&paths.acme_dir);
        let service = MockService::new();
        let scheduler = MockScheduler::new();

        let ctx = Context::new(
            paths,
            proxy.clone(),
            acme.clone(),
            service.clone(),
            scheduler.clone(),
        );

        Self {
            proxy,
            acme,
            service,
            scheduler,
            ctx,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn paths(&self) -> &SystemPaths {
        &self.ctx.paths
    }

    pub fn lifecycle(&self) -> EdgeLifecycle {
        self.ctx.lifecycle()
    }

    /// Every file in the proxy's sites and enabled directories
    pub fn routing_files(&self) -> Vec<std::path::PathBuf> {
        let mut files = Vec::new();
        for dir in [&self.ctx.paths.sites_dir, &self.ctx.paths.enabled_dir] {
            if let Ok(entries) = std::fs::read_dir(dir) {
                files.extend(entries.flatten().map(|e| e.path()));
            }
        }
        files.sort();
        files
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Edge config in the usual shape
pub fn edge_config(domain: &str, upstream: &str, ports: Vec<u16>, panel: u16) -> TunnelConfig {
    let mut config = TunnelConfig::new(Role::Edge, ports, panel);
    config.domain = Some(domain.to_string());
    config.upstream_address = Some(upstream.to_string());
    config
}

/// Supervisor options binding the test listen host
pub fn test_supervisor_options() -> SupervisorOptions {
    SupervisorOptions {
        listen_host: TEST_LISTEN_HOST.to_string(),
        ..SupervisorOptions::default()
    }
}
