//! Mock reverse proxy for E2E tests
//!
//! Records every call in order and can be told to reject validation or
//! reloads, standing in for nginx.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use relaygate_core::collaborators::{CollaboratorError, ReverseProxy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyCall {
    Validate,
    Reload,
    Start,
    Stop,
}

/// Mock proxy that tracks calls and running state
pub struct MockProxy {
    calls: Mutex<Vec<ProxyCall>>,
    running: AtomicBool,
    validations: AtomicUsize,
    /// Validate calls from this index on report a syntax error
    fail_validate_from: AtomicUsize,
    /// Whether to simulate a failed reload
    fail_reload: AtomicBool,
}

impl MockProxy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls seen so far, oldest first
    pub fn calls(&self) -> Vec<ProxyCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_fail_validate(&self, fail: bool) {
        let from = if fail { 0 } else { usize::MAX };
        self.fail_validate_from.store(from, Ordering::SeqCst);
    }

    /// Let the next `n` validations pass, then fail every later one
    pub fn set_fail_validate_after(&self, n: usize) {
        let from = self.validations.load(Ordering::SeqCst) + n;
        self.fail_validate_from.store(from, Ordering::SeqCst);
    }

    pub fn set_fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: ProxyCall) {
        self.calls.lock().push(call);
    }
}

impl Default for MockProxy {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            validations: AtomicUsize::new(0),
            fail_validate_from: AtomicUsize::new(usize::MAX),
            fail_reload: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ReverseProxy for MockProxy {
    async fn validate(&self) -> Result<(), CollaboratorError> {
        self.record(ProxyCall::Validate);
        let index = self.validations.fetch_add(1, Ordering::SeqCst);
        if index >= self.fail_validate_from.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("nginx", "Simulated syntax error"));
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), CollaboratorError> {
        self.record(ProxyCall::Reload);
        if self.fail_reload.load(Ordering::SeqCst) || !self.is_running() {
            return Err(CollaboratorError::failed("systemctl", "nginx is not active"));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), CollaboratorError> {
        self.record(ProxyCall::Start);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        self.record(ProxyCall::Stop);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_validate_after() {
        let proxy = MockProxy::new();
        proxy.set_fail_validate_after(1);
        assert!(proxy.validate().await.is_ok());
        assert!(proxy.validate().await.is_err());
        proxy.set_fail_validate(false);
        assert!(proxy.validate().await.is_ok());
    }

    #[tokio::test]
    async fn test_reload_requires_running() {
        let proxy = MockProxy::new();
        proxy.stop().await.unwrap();
        assert!(proxy.reload().await.is_err());
        proxy.start().await.unwrap();
        assert!(proxy.reload().await.is_ok());
        assert_eq!(
            proxy.calls(),
            vec![ProxyCall::Stop, ProxyCall::Reload, ProxyCall::Start, ProxyCall::Reload]
        );
    }
}
