use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::{Deserialize, Serialize};

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_RATE_LIMITED: &str = "rate_limited";

pub const ACTIVITY_SEND_MESSAGE: &str = "send_message";
pub const ACTIVITY_LOGIN: &str = "login";

pub const ERROR_SEND_FAILED: &str = "send_failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotAccount {
    pub account_id: String,
    pub username: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub bot_id: String,
    pub group_name: String,
    pub run_id: Option<String>,
    pub text: Option<String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub bot_id: String,
    pub activity_type: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub bot_id: String,
    pub error_type: String,
    pub group_name: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub bot_id: String,
    pub messages_sent: i64,
    pub successful_sends: i64,
    pub failed_sends: i64,
    pub rate_limited_sends: i64,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPerformance {
    pub group_name: String,
    pub message_count: i64,
    /// Fraction of attempts in the window that were delivered, 0.0..=1.0
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub activity_type: String,
    pub total: i64,
    pub success_count: i64,
    pub fail_count: i64,
}

/// Fixed-width UTC form, so stored timestamps compare correctly as text.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn window_start(now: DateTime<Utc>, days: u32) -> String {
    timestamp(now - Duration::days(i64::from(days)))
}

/// Insert or refresh an account; returns its row id.
pub fn save_bot_account(conn: &Connection, account: &BotAccount, now: DateTime<Utc>) -> Result<i64> {
    let now = timestamp(now);
    conn.execute(
        "INSERT INTO bot_accounts (account_id, username, display_name, status, created_at, last_active)
         VALUES (?1, ?2, ?3, 'active', ?4, ?4)
         ON CONFLICT(account_id) DO UPDATE SET
             username = excluded.username,
             display_name = excluded.display_name,
             status = 'active',
             last_active = excluded.last_active",
        params![account.account_id, account.username, account.display_name, now],
    )?;

    conn.query_row(
        "SELECT id FROM bot_accounts WHERE account_id = ?1",
        [&account.account_id],
        |row| row.get(0),
    )
}

/// Register a group if it is not known yet; returns its row id.
pub fn save_group(conn: &Connection, group_name: &str, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO groups (group_name, created_at) VALUES (?1, ?2)",
        params![group_name, timestamp(now)],
    )?;

    conn.query_row(
        "SELECT id FROM groups WHERE group_name = ?1",
        [group_name],
        |row| row.get(0),
    )
}

pub fn log_message(conn: &Connection, message: &MessageRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (bot_id, group_name, run_id, message_text, status, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.bot_id,
            message.group_name,
            message.run_id,
            message.text,
            message.status,
            timestamp(message.timestamp),
        ],
    )?;

    if message.status == STATUS_SUCCESS {
        conn.execute(
            "UPDATE groups SET last_message_time = ?2 WHERE group_name = ?1",
            params![message.group_name, timestamp(message.timestamp)],
        )?;
    }
    Ok(())
}

/// Bump the per-day counters for one send attempt.
pub fn update_analytics(conn: &Connection, bot_id: &str, status: &str, at: DateTime<Utc>) -> Result<()> {
    let success = i64::from(status == STATUS_SUCCESS);
    let failed = i64::from(status == STATUS_FAILED);
    let rate_limited = i64::from(status == STATUS_RATE_LIMITED);

    conn.execute(
        "INSERT INTO daily_analytics
             (date, bot_id, messages_sent, successful_sends, failed_sends, rate_limited_sends, last_updated)
         VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
         ON CONFLICT(date, bot_id) DO UPDATE SET
             messages_sent = messages_sent + 1,
             successful_sends = successful_sends + excluded.successful_sends,
             failed_sends = failed_sends + excluded.failed_sends,
             rate_limited_sends = rate_limited_sends + excluded.rate_limited_sends,
             last_updated = excluded.last_updated",
        params![at.date_naive(), bot_id, success, failed, rate_limited, timestamp(at)],
    )?;

    if success == 1 {
        conn.execute(
            "UPDATE bot_accounts SET daily_message_count = daily_message_count + 1 WHERE account_id = ?1",
            [bot_id],
        )?;
    }
    Ok(())
}

pub fn get_bot_stats(conn: &Connection, bot_id: &str, date: NaiveDate) -> Result<Option<DailyStats>> {
    conn.query_row(
        "SELECT date, bot_id, messages_sent, successful_sends, failed_sends, rate_limited_sends, last_updated
         FROM daily_analytics
         WHERE bot_id = ?1 AND date = ?2",
        params![bot_id, date],
        |row| {
            Ok(DailyStats {
                date: row.get(0)?,
                bot_id: row.get(1)?,
                messages_sent: row.get(2)?,
                successful_sends: row.get(3)?,
                failed_sends: row.get(4)?,
                rate_limited_sends: row.get(5)?,
                last_updated: row.get(6)?,
            })
        },
    )
    .optional()
}

/// Attempts and delivery rate per group over the last `days` days.
pub fn get_group_performance(conn: &Connection, days: u32, now: DateTime<Utc>) -> Result<Vec<GroupPerformance>> {
    let mut stmt = conn.prepare(
        "SELECT group_name,
                COUNT(*),
                AVG(CASE WHEN status = 'success' THEN 1.0 ELSE 0.0 END)
         FROM messages
         WHERE timestamp >= ?1
         GROUP BY group_name
         ORDER BY group_name ASC",
    )?;

    let rows = stmt
        .query_map([window_start(now, days)], |row| {
            Ok(GroupPerformance {
                group_name: row.get(0)?,
                message_count: row.get(1)?,
                success_rate: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn log_bot_activity(conn: &Connection, activity: &ActivityRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO bot_activities (bot_id, activity_type, status, timestamp, details)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            activity.bot_id,
            activity.activity_type,
            activity.status,
            timestamp(activity.timestamp),
            activity.details,
        ],
    )?;
    Ok(())
}

pub fn get_bot_activity_stats(
    conn: &Connection,
    bot_id: &str,
    days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<ActivityStats>> {
    let mut stmt = conn.prepare(
        "SELECT activity_type,
                COUNT(*),
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END)
         FROM bot_activities
         WHERE bot_id = ?1 AND timestamp >= ?2
         GROUP BY activity_type
         ORDER BY activity_type ASC",
    )?;

    let rows = stmt
        .query_map(params![bot_id, window_start(now, days)], |row| {
            Ok(ActivityStats {
                activity_type: row.get(0)?,
                total: row.get(1)?,
                success_count: row.get(2)?,
                fail_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn log_error(conn: &Connection, error: &ErrorRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO error_logs (bot_id, error_type, group_name, message, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            error.bot_id,
            error.error_type,
            error.group_name,
            error.message,
            timestamp(error.timestamp),
        ],
    )?;
    Ok(())
}

/// Newest first.
pub fn get_recent_errors(conn: &Connection, bot_id: &str, limit: usize) -> Result<Vec<ErrorRecord>> {
    let mut stmt = conn.prepare(
        "SELECT bot_id, error_type, group_name, message, timestamp
         FROM error_logs
         WHERE bot_id = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(params![bot_id, limit], |row| {
            let raw: String = row.get(4)?;
            let timestamp = DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
            Ok(ErrorRecord {
                bot_id: row.get(0)?,
                error_type: row.get(1)?,
                group_name: row.get(2)?,
                message: row.get(3)?,
                timestamp,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(rows)
}
