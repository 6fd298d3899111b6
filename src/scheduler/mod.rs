//! Cron-driven backup runs for server mode.
//!
//! Expressions use the `cron` crate syntax with a leading seconds field
//! (`sec min hour day-of-month month day-of-week [year]`).

use crate::app::App;
use crate::backup::run_backup;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Runs backups on a cron schedule until shut down
#[derive(Debug, Clone)]
pub struct BackupScheduler {
    expression: String,
    schedule: Schedule,
}

impl BackupScheduler {
    pub fn new(expression: &str) -> Result<Self> {
        let schedule = parse(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Start the scheduler task for `expression`
    pub fn spawn(
        app: Arc<App>,
        expression: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let scheduler = Self::new(expression)?;
        info!("Backup job scheduled with \"{}\"", scheduler.expression);
        Ok(tokio::spawn(scheduler.run(app, shutdown)))
    }

    async fn run(self, app: Arc<App>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            // Computed from the current time, so ticks missed during a long run are skipped
            let now = Utc::now();
            let Some(next) = self.next_after(now) else {
                info!("Backup schedule has no upcoming runs");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!("Next scheduled backup at {}", next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match run_backup(&app).await {
                Ok(ids) => info!("Scheduled backup created {} backup(s): {:?}", ids.len(), ids),
                Err(e) => error!("Scheduled backup failed: {}", e),
            }
        }
        info!("Backup scheduler stopped");
    }
}

fn parse(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).map_err(|e| Error::Scheduling {
        reason: format!("invalid cron expression \"{}\": {}", expression, e),
    })
}

/// The next `count` fire times of `expression` after `after`
pub fn next_runs(
    expression: &str,
    after: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    Ok(parse(expression)?.after(&after).take(count).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_app, MockDumper};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_next_runs() {
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();
        let runs = next_runs("0 0 2 * * *", after, 3).unwrap();
        assert_eq!(
            runs,
            vec![
                Utc.with_ymd_and_hms(2025, 1, 2, 2, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 3, 2, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 4, 2, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_invalid_expression() {
        let err = BackupScheduler::new("every day").unwrap_err();
        assert!(matches!(err, Error::Scheduling { .. }));
        // five-field crontab syntax lacks the seconds field
        assert!(next_runs("0 2 * * *", Utc::now(), 1).is_err());
    }

    #[tokio::test]
    async fn test_spawned_scheduler_runs_and_stops() {
        let dir = TempDir::new().unwrap();
        let app = Arc::new(mock_app().with_dumper(Arc::new(MockDumper::new("app", dir.path()))));
        let (tx, rx) = watch::channel(false);

        let handle = BackupScheduler::spawn(app.clone(), "* * * * * *", rx).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let backups = app.store.list_backups_with_files().await.unwrap();
        assert!(!backups.is_empty());
    }
}
