use crate::dispatch::{DispatchOutcome, DispatchStatus};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub mod records;
pub mod schema;
pub mod sink;

pub use records::*;
pub use sink::AnalyticsSink;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("analytics connection poisoned by a panicked writer")]
    Poisoned,
}

/// Local send history and per-day counters.
#[derive(Clone)]
pub struct AnalyticsStore {
    conn: Arc<Mutex<Connection>>,
}

impl AnalyticsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AnalyticsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AnalyticsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AnalyticsError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, AnalyticsError> {
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<F, R>(&self, f: F) -> Result<R, AnalyticsError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R>,
    {
        let mut conn = self.conn.lock().map_err(|_| AnalyticsError::Poisoned)?;
        Ok(f(&mut *conn)?)
    }

    pub fn save_bot_account(&self, account: &BotAccount) -> Result<i64, AnalyticsError> {
        self.with_connection(|conn| {
            let id = records::save_bot_account(conn, account, Utc::now())?;
            records::log_bot_activity(
                conn,
                &ActivityRecord {
                    bot_id: account.account_id.clone(),
                    activity_type: ACTIVITY_LOGIN.to_string(),
                    status: STATUS_SUCCESS.to_string(),
                    timestamp: Utc::now(),
                    details: json!({ "username": account.username }),
                },
            )?;
            Ok(id)
        })
    }

    pub fn save_group(&self, group_name: &str) -> Result<i64, AnalyticsError> {
        self.with_connection(|conn| records::save_group(conn, group_name, Utc::now()))
    }

    pub fn log_message(&self, message: &MessageRecord) -> Result<(), AnalyticsError> {
        self.with_connection(|conn| records::log_message(conn, message))
    }

    pub fn update_analytics(&self, bot_id: &str, status: &str) -> Result<(), AnalyticsError> {
        self.with_connection(|conn| records::update_analytics(conn, bot_id, status, Utc::now()))
    }

    /// Today's counters for `bot_id`, if it has sent anything today.
    pub fn get_bot_stats(&self, bot_id: &str) -> Result<Option<DailyStats>, AnalyticsError> {
        let today = Utc::now().date_naive();
        self.with_connection(|conn| records::get_bot_stats(conn, bot_id, today))
    }

    pub fn get_group_performance(&self, days: u32) -> Result<Vec<GroupPerformance>, AnalyticsError> {
        self.with_connection(|conn| records::get_group_performance(conn, days, Utc::now()))
    }

    pub fn log_bot_activity(&self, activity: &ActivityRecord) -> Result<(), AnalyticsError> {
        self.with_connection(|conn| records::log_bot_activity(conn, activity))
    }

    pub fn get_bot_activity_stats(&self, bot_id: &str, days: u32) -> Result<Vec<ActivityStats>, AnalyticsError> {
        self.with_connection(|conn| records::get_bot_activity_stats(conn, bot_id, days, Utc::now()))
    }

    pub fn get_recent_errors(&self, bot_id: &str, limit: usize) -> Result<Vec<ErrorRecord>, AnalyticsError> {
        self.with_connection(|conn| records::get_recent_errors(conn, bot_id, limit))
    }

    /// Store one dispatch outcome: message row, daily counters, activity
    /// entry and (for failures) an error log entry are written together or
    /// not at all.
    pub fn record_outcome(&self, bot_id: &str, outcome: &DispatchOutcome) -> Result<(), AnalyticsError> {
        let (status, details) = match &outcome.status {
            DispatchStatus::Sent => (STATUS_SUCCESS, json!({ "group_name": outcome.destination })),
            DispatchStatus::RateLimited { retry_after_secs } => (
                STATUS_RATE_LIMITED,
                json!({ "group_name": outcome.destination, "retry_after_secs": retry_after_secs }),
            ),
            DispatchStatus::Failed { detail } => (
                STATUS_FAILED,
                json!({ "group_name": outcome.destination, "error": detail }),
            ),
        };

        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            records::save_group(&tx, &outcome.destination, outcome.recorded_at)?;
            records::log_message(
                &tx,
                &MessageRecord {
                    bot_id: bot_id.to_string(),
                    group_name: outcome.destination.clone(),
                    run_id: Some(outcome.run_id.clone()),
                    text: outcome.message_text.clone(),
                    status: status.to_string(),
                    timestamp: outcome.recorded_at,
                },
            )?;
            records::update_analytics(&tx, bot_id, status, outcome.recorded_at)?;
            records::log_bot_activity(
                &tx,
                &ActivityRecord {
                    bot_id: bot_id.to_string(),
                    activity_type: ACTIVITY_SEND_MESSAGE.to_string(),
                    status: status.to_string(),
                    timestamp: outcome.recorded_at,
                    details,
                },
            )?;
            if let DispatchStatus::Failed { detail } = &outcome.status {
                records::log_error(
                    &tx,
                    &ErrorRecord {
                        bot_id: bot_id.to_string(),
                        error_type: ERROR_SEND_FAILED.to_string(),
                        group_name: Some(outcome.destination.clone()),
                        message: detail.clone(),
                        timestamp: outcome.recorded_at,
                    },
                )?;
            }
            tx.commit()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn outcome(destination: &str, status: DispatchStatus) -> DispatchOutcome {
        DispatchOutcome::new("run-1", destination, status, Some("hello".to_string()))
    }

    #[test]
    fn test_record_outcome_updates_daily_counters() {
        let store = AnalyticsStore::open_in_memory().unwrap();

        store.record_outcome("bot-1", &outcome("grp1", DispatchStatus::Sent)).unwrap();
        store.record_outcome("bot-1", &outcome("grp2", DispatchStatus::Sent)).unwrap();
        store
            .record_outcome("bot-1", &outcome("grp3", DispatchStatus::RateLimited { retry_after_secs: 30 }))
            .unwrap();
        store
            .record_outcome(
                "bot-1",
                &outcome("grp4", DispatchStatus::Failed { detail: "kicked".to_string() }),
            )
            .unwrap();

        let stats = store.get_bot_stats("bot-1").unwrap().unwrap();
        assert_eq!(stats.messages_sent, 4);
        assert_eq!(stats.successful_sends, 2);
        assert_eq!(stats.failed_sends, 1);
        assert_eq!(stats.rate_limited_sends, 1);

        assert!(store.get_bot_stats("bot-2").unwrap().is_none());
    }

    #[test]
    fn test_group_performance_window() {
        let store = AnalyticsStore::open_in_memory().unwrap();

        store.record_outcome("bot-1", &outcome("grp1", DispatchStatus::Sent)).unwrap();
        store
            .record_outcome(
                "bot-1",
                &outcome("grp1", DispatchStatus::Failed { detail: "x".to_string() }),
            )
            .unwrap();

        let mut old = outcome("grp2", DispatchStatus::Sent);
        old.recorded_at = Utc::now() - Duration::days(30);
        store.record_outcome("bot-1", &old).unwrap();

        let performance = store.get_group_performance(7).unwrap();
        assert_eq!(performance.len(), 1);
        assert_eq!(performance[0].group_name, "grp1");
        assert_eq!(performance[0].message_count, 2);
        assert!((performance[0].success_rate - 0.5).abs() < f64::EPSILON);

        assert_eq!(store.get_group_performance(60).unwrap().len(), 2);
    }

    #[test]
    fn test_save_bot_account_is_upsert() {
        let store = AnalyticsStore::open_in_memory().unwrap();
        let mut account = BotAccount {
            account_id: "42".to_string(),
            username: Some("old_name".to_string()),
            display_name: "Shill".to_string(),
        };

        let first = store.save_bot_account(&account).unwrap();
        account.username = Some("new_name".to_string());
        let second = store.save_bot_account(&account).unwrap();
        assert_eq!(first, second);

        let username: Option<String> = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT username FROM bot_accounts WHERE account_id = '42'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(username.as_deref(), Some("new_name"));

        let activity = store.get_bot_activity_stats("42", 7).unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].activity_type, ACTIVITY_LOGIN);
        assert_eq!(activity[0].total, 2);
    }

    #[test]
    fn test_failures_land_in_error_log() {
        let store = AnalyticsStore::open_in_memory().unwrap();
        store
            .record_outcome(
                "bot-1",
                &outcome("grp1", DispatchStatus::Failed { detail: "chat not found".to_string() }),
            )
            .unwrap();
        store.record_outcome("bot-1", &outcome("grp2", DispatchStatus::Sent)).unwrap();
        store
            .record_outcome("bot-1", &outcome("grp3", DispatchStatus::RateLimited { retry_after_secs: 5 }))
            .unwrap();
        store
            .record_outcome(
                "bot-1",
                &outcome("grp4", DispatchStatus::Failed { detail: "kicked".to_string() }),
            )
            .unwrap();

        let errors = store.get_recent_errors("bot-1", 10).unwrap();
        let groups: Vec<_> = errors.iter().filter_map(|e| e.group_name.as_deref()).collect();
        assert_eq!(groups, vec!["grp4", "grp1"]);
        assert_eq!(errors[0].message, "kicked");
        assert_eq!(errors[0].error_type, ERROR_SEND_FAILED);

        assert_eq!(store.get_recent_errors("bot-1", 1).unwrap().len(), 1);
        assert!(store.get_recent_errors("bot-2", 10).unwrap().is_empty());
    }

    #[test]
    fn test_save_group_ignores_duplicates() {
        let store = AnalyticsStore::open_in_memory().unwrap();
        let first = store.save_group("@grp").unwrap();
        let second = store.save_group("@grp").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_activity_stats_by_type() {
        let store = AnalyticsStore::open_in_memory().unwrap();
        store.record_outcome("bot-1", &outcome("grp1", DispatchStatus::Sent)).unwrap();
        store
            .record_outcome(
                "bot-1",
                &outcome("grp2", DispatchStatus::Failed { detail: "x".to_string() }),
            )
            .unwrap();
        store
            .record_outcome("bot-1", &outcome("grp3", DispatchStatus::RateLimited { retry_after_secs: 5 }))
            .unwrap();

        let stats = store.get_bot_activity_stats("bot-1", 7).unwrap();
        assert_eq!(
            stats,
            vec![ActivityStats {
                activity_type: ACTIVITY_SEND_MESSAGE.to_string(),
                total: 3,
                success_count: 1,
                fail_count: 1,
            }]
        );
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("analytics.db");

        let store = AnalyticsStore::open(&path).unwrap();
        store.record_outcome("bot-1", &outcome("grp1", DispatchStatus::Sent)).unwrap();
        drop(store);

        let reopened = AnalyticsStore::open(&path).unwrap();
        assert_eq!(reopened.get_bot_stats("bot-1").unwrap().unwrap().messages_sent, 1);
    }
}
