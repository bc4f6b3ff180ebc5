//! Mock scheduler for E2E tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use relaygate_core::collaborators::{CollaboratorError, ScheduleEntry, Scheduler};

/// In-memory schedule entries keyed by name
pub struct MockScheduler {
    entries: DashMap<String, ScheduleEntry>,
    /// Whether to simulate a failed install
    fail_install: AtomicBool,
}

impl MockScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            fail_install: AtomicBool::new(false),
        })
    }

    pub fn entry(&self, name: &str) -> Option<ScheduleEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn set_fail_install(&self, fail: bool) {
        self.fail_install.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn install(&self, entry: &ScheduleEntry) -> Result<(), CollaboratorError> {
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("cron", "Simulated install failure"));
        }
        self.entries.insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool, CollaboratorError> {
        Ok(self.entries.remove(name).is_some())
    }

    async fn get(&self, name: &str) -> Result<Option<ScheduleEntry>, CollaboratorError> {
        Ok(self.entry(name))
    }
}
