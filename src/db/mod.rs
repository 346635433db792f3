pub mod migrations;
pub mod seed;

use std::str::FromStr;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Bet, Game, ScoreRun};

/// Rows per upsert batch. Bounds transaction size and keeps a full-width
/// feature row comfortably under the SQLite bind-parameter ceiling.
pub const UPSERT_CHUNK: usize = 500;

/// Connection wrapper. The embedded engine is SQLite; every query in the
/// codebase goes through helpers that use the `?` placeholder convention, so
/// a server-backed dialect can slot in behind this type without touching
/// call sites.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(config: &Config) -> Result<Self> {
        // Phase 2 workers each hold a connection, plus one for the caller.
        let pool_size = (config.backfill_workers as u32 + 1).max(5);
        Self::connect_sized(&config.database_url, pool_size).await
    }

    pub async fn connect_sized(database_url: &str, max_connections: u32) -> Result<Self> {
        // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
        let file_path = database_url
            .strip_prefix("sqlite:///")
            .or_else(|| database_url.strip_prefix("sqlite://"))
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if file_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.ok();
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory store with migrations applied; test and demo use. One
    /// connection only: each connection to `:memory:` is its own database.
    pub async fn in_memory() -> Result<Self> {
        let store = Self::connect_sized("sqlite::memory:", 1).await?;
        migrations::run(&store).await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }
}

// ── Game queries ──────────────────────────────────────────────────────────────

pub async fn games_for_date(store: &Store, date: NaiveDate) -> Result<Vec<Game>> {
    let games = sqlx::query_as::<_, Game>(
        "SELECT * FROM games WHERE game_date = ? ORDER BY game_id",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(games)
}

pub async fn get_game(store: &Store, game_id: i64) -> Result<Option<Game>> {
    let game = sqlx::query_as::<_, Game>("SELECT * FROM games WHERE game_id = ?")
        .bind(game_id)
        .fetch_optional(store.pool())
        .await?;
    Ok(game)
}

// ── Score run audit ───────────────────────────────────────────────────────────

pub async fn start_run(
    store: &Store,
    run_type: &str,
    market: Option<&str>,
    date: NaiveDate,
    trigger: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO score_runs (id, run_type, market, game_date, trigger_source, status, started_at)
           VALUES (?, ?, ?, ?, ?, 'started', ?)"#,
    )
    .bind(&id)
    .bind(run_type)
    .bind(market)
    .bind(date)
    .bind(trigger)
    .bind(Utc::now())
    .execute(store.pool())
    .await?;
    Ok(id)
}

pub async fn finish_run(
    store: &Store,
    run_id: &str,
    rows_written: i64,
    metadata_json: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE score_runs SET status = 'finished', rows_written = ?, finished_at = ?, metadata_json = ?
           WHERE id = ?"#,
    )
    .bind(rows_written)
    .bind(Utc::now())
    .bind(metadata_json)
    .bind(run_id)
    .execute(store.pool())
    .await?;
    Ok(())
}

pub async fn fail_run(store: &Store, run_id: &str, error: &str) -> Result<()> {
    let metadata = serde_json::json!({ "error": error }).to_string();
    sqlx::query(
        r#"UPDATE score_runs SET status = 'failed', finished_at = ?, metadata_json = ?
           WHERE id = ?"#,
    )
    .bind(Utc::now())
    .bind(metadata)
    .bind(run_id)
    .execute(store.pool())
    .await?;
    Ok(())
}

pub async fn last_runs_by_type(store: &Store) -> Result<Vec<ScoreRun>> {
    let runs = sqlx::query_as::<_, ScoreRun>(
        r#"SELECT sr.* FROM score_runs sr
           JOIN (SELECT run_type, MAX(started_at) AS latest FROM score_runs GROUP BY run_type) m
             ON sr.run_type = m.run_type AND sr.started_at = m.latest
           ORDER BY sr.run_type"#,
    )
    .fetch_all(store.pool())
    .await?;
    Ok(runs)
}

// ── Bets ──────────────────────────────────────────────────────────────────────

pub async fn log_bet(
    store: &Store,
    date: NaiveDate,
    market: &str,
    game_id: i64,
    entity: &str,
    bet_type: &str,
    line: Option<f64>,
    selection_key: &str,
    sportsbook: &str,
    price_american: i64,
) -> Result<i64> {
    let decimal = crate::odds::american_to_decimal(price_american);
    let implied = crate::odds::american_to_implied(price_american);
    let res = sqlx::query(
        r#"INSERT INTO bets
           (game_date, market, game_id, entity, bet_type, line, selection_key, sportsbook,
            price_american, price_decimal, implied_prob_open, stake_units, status, placed_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1.0, 'pending', ?)"#,
    )
    .bind(date)
    .bind(market)
    .bind(game_id)
    .bind(entity)
    .bind(bet_type)
    .bind(line)
    .bind(selection_key)
    .bind(sportsbook)
    .bind(price_american)
    .bind(decimal)
    .bind(implied)
    .bind(Utc::now())
    .execute(store.pool())
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn pending_bets_for_date(store: &Store, date: NaiveDate) -> Result<Vec<Bet>> {
    let bets = sqlx::query_as::<_, Bet>(
        "SELECT * FROM bets WHERE game_date = ? AND status = 'pending'",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(bets)
}

// ── Freshness (status command) ───────────────────────────────────────────────

pub struct TableCount {
    pub table: &'static str,
    pub rows: i64,
    pub latest_date: Option<String>,
}

pub async fn table_counts(store: &Store) -> Result<Vec<TableCount>> {
    let mut out = Vec::new();
    for (table, date_col) in [
        ("games", "game_date"),
        ("pitch_events", "game_date"),
        ("batter_stats", "stat_date"),
        ("pitcher_stats", "stat_date"),
        ("batter_daily_features", "game_date"),
        ("pitcher_daily_features", "game_date"),
        ("team_daily_features", "game_date"),
        ("game_context_features", "game_date"),
        ("market_odds", "game_date"),
        ("model_scores", "game_date"),
        ("market_outcomes", "game_date"),
        ("bets", "game_date"),
    ] {
        let sql = format!("SELECT COUNT(*), MAX({date_col}) FROM {table}");
        let (rows, latest_date): (i64, Option<String>) =
            sqlx::query_as(&sql).fetch_one(store.pool()).await?;
        out.push(TableCount { table, rows, latest_date });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_migrates_and_audits_runs() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();

        let run_id = start_run(&store, "score", Some("HR"), date, "test").await.unwrap();
        finish_run(&store, &run_id, 12, None).await.unwrap();

        let runs = last_runs_by_type(&store).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "finished");
        assert_eq!(runs[0].rows_written, 12);
        assert_eq!(runs[0].market.as_deref(), Some("HR"));
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = Store::in_memory().await.unwrap();
        // Second application is a no-op, not an error.
        migrations::run(&store).await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(applied as usize, migrations::MIGRATIONS.len());
    }
}
