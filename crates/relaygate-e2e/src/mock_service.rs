//! Mock service manager for E2E tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use relaygate_core::collaborators::{CollaboratorError, ServiceManager, UnitSpec};

/// Tracks the unit and its state instead of talking to systemd
pub struct MockService {
    unit: Mutex<Option<UnitSpec>>,
    enabled: AtomicBool,
    active: AtomicBool,
    restarts: AtomicU64,
    reloads: AtomicU64,
    /// Whether to simulate a failed restart
    fail_restart: AtomicBool,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            unit: Mutex::new(None),
            enabled: AtomicBool::new(false),
            active: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            fail_restart: AtomicBool::new(false),
        })
    }

    pub fn unit(&self) -> Option<UnitSpec> {
        self.unit.lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn set_fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceManager for MockService {
    async fn install_unit(&self, unit: &UnitSpec) -> Result<(), CollaboratorError> {
        *self.unit.lock() = Some(unit.clone());
        Ok(())
    }

    async fn remove_unit(&self) -> Result<bool, CollaboratorError> {
        Ok(self.unit.lock().take().is_some())
    }

    async fn enable(&self) -> Result<(), CollaboratorError> {
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disable(&self) -> Result<(), CollaboratorError> {
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<(), CollaboratorError> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self) -> Result<(), CollaboratorError> {
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("systemctl", "Simulated restart failure"));
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reload(&self) -> Result<(), CollaboratorError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> Result<String, CollaboratorError> {
        Ok(if self.is_active() { "active" } else { "inactive" }.to_string())
    }
}
