use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{CollaboratorError, ScheduleEntry, Scheduler};

const HEADER: &str = "# Managed by relaygate. Changes will be overwritten.";

/// One `/etc/cron.d` file per schedule entry
pub struct CronScheduler {
    dir: PathBuf,
}

impl CronScheduler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// cron ignores files in cron.d whose names contain dots
    fn entry_path(&self, name: &str) -> PathBuf {
        let file_name: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.dir.join(file_name)
    }
}

fn render_entry(entry: &ScheduleEntry) -> String {
    format!(
        "{header}\n# name: {name}\nSHELL=/bin/sh\nPATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n{expr} root {command}\n",
        header = HEADER,
        name = entry.name,
        expr = entry.expression,
        command = entry.command,
    )
}

fn parse_entry(name: &str, content: &str) -> Option<ScheduleEntry> {
    let line = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.contains('='))
        .last()?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 7 {
        return None;
    }
    Some(ScheduleEntry {
        name: name.to_string(),
        expression: fields[..5].join(" "),
        command: fields[6..].join(" "),
    })
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn install(&self, entry: &ScheduleEntry) -> Result<(), CollaboratorError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.entry_path(&entry.name);
        tokio::fs::write(&path, render_entry(entry)).await?;
        tracing::info!(
            "Installed schedule '{}' ({}) at {:?}",
            entry.name,
            entry.expression,
            path
        );
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool, CollaboratorError> {
        match tokio::fs::remove_file(self.entry_path(name)).await {
            Ok(()) => {
                tracing::info!("Removed schedule '{}'", name);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, name: &str) -> Result<Option<ScheduleEntry>, CollaboratorError> {
        match tokio::fs::read_to_string(self.entry_path(name)).await {
            Ok(content) => Ok(parse_entry(name, &content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_install_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cron = CronScheduler::new(dir.path());
        let entry = ScheduleEntry {
            name: "relaygate-renew-t.example.com".to_string(),
            expression: "0 3 * * *".to_string(),
            command: "certbot renew --cert-name t.example.com --quiet".to_string(),
        };

        cron.install(&entry).await.unwrap();
        assert!(dir.path().join("relaygate-renew-t-example-com").is_file());
        assert_eq!(cron.get(&entry.name).await.unwrap(), Some(entry.clone()));

        assert!(cron.remove(&entry.name).await.unwrap());
        assert!(!cron.remove(&entry.name).await.unwrap());
        assert_eq!(cron.get(&entry.name).await.unwrap(), None);
    }
}
