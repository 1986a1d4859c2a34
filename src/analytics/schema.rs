use rusqlite::{Connection, Result};

pub fn initialize(conn: &Connection) -> Result<()> {
    // Accounts that have logged in at least once
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bot_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL UNIQUE,
            username TEXT,
            display_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            daily_message_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_active TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_name TEXT NOT NULL UNIQUE,
            member_count INTEGER NOT NULL DEFAULT 0,
            performance_score REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            last_message_time TEXT
        )",
        [],
    )?;

    // One row per send attempt
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_id TEXT NOT NULL,
            group_name TEXT NOT NULL,
            run_id TEXT,
            message_text TEXT,
            status TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            media_attached BOOLEAN NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_bot_group
         ON messages(bot_id, group_name, timestamp DESC)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_analytics (
            date TEXT NOT NULL,
            bot_id TEXT NOT NULL,
            messages_sent INTEGER NOT NULL DEFAULT 0,
            successful_sends INTEGER NOT NULL DEFAULT 0,
            failed_sends INTEGER NOT NULL DEFAULT 0,
            rate_limited_sends INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (date, bot_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bot_activities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_id TEXT NOT NULL,
            activity_type TEXT NOT NULL,
            status TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            details TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bot_activities_lookup
         ON bot_activities(bot_id, activity_type, timestamp DESC)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS error_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_id TEXT NOT NULL,
            error_type TEXT NOT NULL,
            group_name TEXT,
            message TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_error_logs_lookup
         ON error_logs(bot_id, error_type, timestamp DESC)",
        [],
    )?;

    Ok(())
}
