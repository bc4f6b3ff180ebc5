//! Periodic service restarts

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use relaygate_common::RelayError;

use crate::collaborators::{CollaboratorError, ScheduleEntry, Scheduler};
use crate::paths::SERVICE_NAME;

/// Name of the single restart entry
pub const RESTART_ENTRY: &str = "relaygate-restart";

/// Restart intervals offered to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartInterval {
    Hourly,
    Every3Hours,
    Every6Hours,
    Every12Hours,
    Daily,
}

impl RestartInterval {
    pub const ALL: [RestartInterval; 5] = [
        RestartInterval::Hourly,
        RestartInterval::Every3Hours,
        RestartInterval::Every6Hours,
        RestartInterval::Every12Hours,
        RestartInterval::Daily,
    ];

    pub fn hours(&self) -> u32 {
        match self {
            RestartInterval::Hourly => 1,
            RestartInterval::Every3Hours => 3,
            RestartInterval::Every6Hours => 6,
            RestartInterval::Every12Hours => 12,
            RestartInterval::Daily => 24,
        }
    }

    pub fn cron_expression(&self) -> &'static str {
        match self {
            RestartInterval::Hourly => "0 * * * *",
            RestartInterval::Every3Hours => "0 */3 * * *",
            RestartInterval::Every6Hours => "0 */6 * * *",
            RestartInterval::Every12Hours => "0 */12 * * *",
            RestartInterval::Daily => "0 0 * * *",
        }
    }

    /// Interval a cron expression was installed for
    pub fn from_cron(expression: &str) -> Option<Self> {
        let normalized = expression.split_whitespace().collect::<Vec<_>>().join(" ");
        Self::ALL
            .into_iter()
            .find(|interval| interval.cron_expression() == normalized)
    }
}

impl fmt::Display for RestartInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours())
    }
}

impl FromStr for RestartInterval {
    type Err = RelayError;

    /// Accepts `1h`, `3h`, `6h`, `12h`, `24h` (or the bare number)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let hours = trimmed.strip_suffix('h').unwrap_or(&trimmed);
        Self::ALL
            .into_iter()
            .find(|interval| hours.parse::<u32>().ok() == Some(interval.hours()))
            .ok_or_else(|| {
                RelayError::validation(format!(
                    "Unsupported interval '{}'; choose one of 1h, 3h, 6h, 12h, 24h",
                    s.trim()
                ))
            })
    }
}

/// Installs and removes the restart entry
pub struct ScheduleManager {
    scheduler: Arc<dyn Scheduler>,
    command: String,
}

impl ScheduleManager {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            command: format!("systemctl restart {}", SERVICE_NAME),
        }
    }

    pub fn entry(&self, interval: RestartInterval) -> ScheduleEntry {
        ScheduleEntry {
            name: RESTART_ENTRY.to_string(),
            expression: interval.cron_expression().to_string(),
            command: self.command.clone(),
        }
    }

    /// Replace any existing restart entry
    pub async fn install(&self, interval: RestartInterval) -> Result<(), CollaboratorError> {
        self.scheduler.install(&self.entry(interval)).await?;
        tracing::info!("Service restart scheduled every {}", interval);
        Ok(())
    }

    /// Returns whether an entry was installed
    pub async fn disable(&self) -> Result<bool, CollaboratorError> {
        let removed = self.scheduler.remove(RESTART_ENTRY).await?;
        if removed {
            tracing::info!("Scheduled service restart disabled");
        }
        Ok(removed)
    }

    /// Installed interval; `None` when disabled or hand-edited
    pub async fn current(&self) -> Result<Option<RestartInterval>, CollaboratorError> {
        Ok(self
            .scheduler
            .get(RESTART_ENTRY)
            .await?
            .and_then(|entry| RestartInterval::from_cron(&entry.expression)))
    }
}
