use anyhow::Result;

use crate::db::Store;
use crate::error::PipelineError;

/// Additive SQL migrations, embedded at compile time. Order is lexical by
/// filename; applied names are recorded in `schema_migrations` and
/// re-application is a no-op.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_core.sql", include_str!("../../migrations/0001_core.sql")),
    ("0002_feature_store.sql", include_str!("../../migrations/0002_feature_store.sql")),
    ("0003_markets.sql", include_str!("../../migrations/0003_markets.sql")),
];

pub async fn run(store: &Store) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS schema_migrations (
               name       TEXT PRIMARY KEY,
               applied_at TEXT NOT NULL
           )"#,
    )
    .execute(store.pool())
    .await?;

    for window in MIGRATIONS.windows(2) {
        debug_assert!(window[0].0 < window[1].0, "migrations must be lexically sorted");
    }

    let mut applied = 0usize;
    for (name, sql) in MIGRATIONS {
        let seen: Option<String> =
            sqlx::query_scalar("SELECT name FROM schema_migrations WHERE name = ?")
                .bind(name)
                .fetch_optional(store.pool())
                .await?;
        if seen.is_some() {
            continue;
        }

        let mut tx = store.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::schema(format!("migration {name} failed: {e}")))?;
        sqlx::query("INSERT INTO schema_migrations (name, applied_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Applied migration {}", name);
        applied += 1;
    }

    if applied > 0 {
        tracing::info!("{} migration(s) applied", applied);
    }
    Ok(())
}
