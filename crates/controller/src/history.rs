//! Watering session history in SQLite.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

#[derive(Clone)]
pub struct History {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WateringSession {
    /// Local time, `YYYY-MM-DDTHH:MM:SS`.
    pub started_at: String,
    pub ended_at: String,
    pub zone: String,
    pub valve: i64,
    pub policy: String,
    pub reason: String,
    pub result: String,
}

impl History {
    /// db_url examples:
    /// - "sqlite:/home/pi/irrigation/history.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to an in-memory database is a separate database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    pub async fn record(&self, s: &WateringSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watering_sessions (started_at, ended_at, zone, valve, policy, reason, result)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.started_at)
        .bind(&s.ended_at)
        .bind(&s.zone)
        .bind(s.valve)
        .bind(&s.policy)
        .bind(&s.reason)
        .bind(&s.result)
        .execute(&self.pool)
        .await
        .context("record watering session failed")?;
        Ok(())
    }

    /// Most recent sessions first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<WateringSession>> {
        let rows = sqlx::query_as::<_, WateringSession>(
            r#"
            SELECT started_at, ended_at, zone, valve, policy, reason, result
            FROM watering_sessions
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent watering sessions failed")?;
        Ok(rows)
    }
}
