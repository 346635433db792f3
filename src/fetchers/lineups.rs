use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::db::Store;
use crate::fetchers::{with_retry, Http};

// ── Lineup feed response ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LineupFeed {
    #[serde(default)]
    pub games: Vec<LineupGame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineupGame {
    pub game_pk: i64,
    pub teams: LineupTeams,
}

#[derive(Debug, Deserialize)]
pub struct LineupTeams {
    pub home: LineupSide,
    pub away: LineupSide,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineupSide {
    pub abbreviation: String,
    #[serde(default)]
    pub confirmed: bool,
    /// Batting-order player ids, slots 1..=9.
    #[serde(default)]
    pub lineup: Vec<i64>,
}

/// One side's snapshot ready to version into the store.
#[derive(Debug, Clone)]
pub struct LineupSnapshot {
    pub game_id: i64,
    pub team: String,
    pub is_confirmed: bool,
    pub players: Vec<i64>,
}

pub fn parse_lineups(feed: &LineupFeed) -> Vec<LineupSnapshot> {
    let mut out = Vec::new();
    for g in &feed.games {
        for side in [&g.teams.home, &g.teams.away] {
            if side.lineup.is_empty() {
                continue;
            }
            out.push(LineupSnapshot {
                game_id: g.game_pk,
                team: side.abbreviation.clone(),
                is_confirmed: side.confirmed,
                players: side.lineup.clone(),
            });
        }
    }
    out
}

pub async fn fetch_lineups(http: &Http, base: &str, date: NaiveDate) -> Result<Vec<LineupSnapshot>> {
    let url = format!("{base}/schedule?sportId=1&date={date}&hydrate=lineups,team");
    let feed: LineupFeed = with_retry("lineup fetch", || http.get_json(&url)).await?;
    Ok(parse_lineups(&feed))
}

/// Store snapshots with versioning. An unchanged snapshot (same players, same
/// confirmation state) is a no-op; otherwise the new version supersedes the
/// active one by clearing `active_version` on everything older.
pub async fn upsert_lineups(
    store: &Store,
    date: NaiveDate,
    snapshots: &[LineupSnapshot],
) -> Result<usize> {
    let mut changed = 0usize;
    for snap in snapshots {
        let current: Vec<(i64, i64)> = sqlx::query_as(
            r#"SELECT slot, player_id FROM lineups
               WHERE game_id = ? AND team = ? AND active_version = 1
               ORDER BY slot"#,
        )
        .bind(snap.game_id)
        .bind(&snap.team)
        .fetch_all(store.pool())
        .await?;

        let current_confirmed: Option<bool> = sqlx::query_scalar(
            r#"SELECT is_confirmed FROM lineups
               WHERE game_id = ? AND team = ? AND active_version = 1
               LIMIT 1"#,
        )
        .bind(snap.game_id)
        .bind(&snap.team)
        .fetch_optional(store.pool())
        .await?;

        let incoming: Vec<(i64, i64)> = snap
            .players
            .iter()
            .enumerate()
            .map(|(i, &p)| (i as i64 + 1, p))
            .collect();
        if current == incoming && current_confirmed == Some(snap.is_confirmed) {
            continue;
        }

        let next_version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM lineups WHERE game_id = ? AND team = ?",
        )
        .bind(snap.game_id)
        .bind(&snap.team)
        .fetch_one(store.pool())
        .await?;

        let mut tx = store.begin().await?;
        sqlx::query(
            "UPDATE lineups SET active_version = 0 WHERE game_id = ? AND team = ?",
        )
        .bind(snap.game_id)
        .bind(&snap.team)
        .execute(&mut *tx)
        .await?;
        for (slot, player_id) in &incoming {
            sqlx::query(
                r#"INSERT INTO lineups
                   (game_id, game_date, team, version, slot, player_id, is_confirmed, active_version, fetched_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
            )
            .bind(snap.game_id)
            .bind(date)
            .bind(&snap.team)
            .bind(next_version)
            .bind(slot)
            .bind(player_id)
            .bind(snap.is_confirmed)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        changed += 1;
        tracing::debug!(
            "Lineup v{} stored for game {} {} (confirmed={})",
            next_version, snap.game_id, snap.team, snap.is_confirmed
        );
    }
    if changed > 0 {
        tracing::info!("Lineups: {} snapshot(s) superseded", changed);
    }
    Ok(changed)
}

/// Active lineup player ids for one side of a game, with confirmation state.
pub async fn active_lineup(
    store: &Store,
    game_id: i64,
    team: &str,
) -> Result<Option<(Vec<i64>, bool)>> {
    let rows: Vec<(i64, bool)> = sqlx::query_as(
        r#"SELECT player_id, is_confirmed FROM lineups
           WHERE game_id = ? AND team = ? AND active_version = 1
           ORDER BY slot"#,
    )
    .bind(game_id)
    .bind(team)
    .fetch_all(store.pool())
    .await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let confirmed = rows[0].1;
    Ok(Some((rows.into_iter().map(|(p, _)| p).collect(), confirmed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(players: Vec<i64>, confirmed: bool) -> LineupSnapshot {
        LineupSnapshot {
            game_id: 776123,
            team: "NYY".into(),
            is_confirmed: confirmed,
            players,
        }
    }

    #[tokio::test]
    async fn new_snapshot_supersedes_previous_version() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();

        upsert_lineups(&store, date, &[snap(vec![1, 2, 3], false)]).await.unwrap();
        upsert_lineups(&store, date, &[snap(vec![1, 3, 2], true)]).await.unwrap();

        let (players, confirmed) = active_lineup(&store, 776123, "NYY").await.unwrap().unwrap();
        assert_eq!(players, vec![1, 3, 2]);
        assert!(confirmed);

        let inactive: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM lineups WHERE active_version = 0",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(inactive, 3);
    }

    #[tokio::test]
    async fn unchanged_snapshot_is_a_noop() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        upsert_lineups(&store, date, &[snap(vec![1, 2, 3], true)]).await.unwrap();
        let changed = upsert_lineups(&store, date, &[snap(vec![1, 2, 3], true)]).await.unwrap();
        assert_eq!(changed, 0);

        let versions: i64 = sqlx::query_scalar(
            "SELECT MAX(version) FROM lineups WHERE game_id = 776123",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(versions, 1);
    }
}
