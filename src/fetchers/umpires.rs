use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::db::Store;
use crate::fetchers::{with_retry, Http};
use crate::models::UmpireStats;

// ── Assignment + profile feed responses ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssignmentFeed {
    #[serde(default)]
    pub games: Vec<AssignmentGame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentGame {
    pub game_pk: i64,
    #[serde(default)]
    pub officials: Vec<Official>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Official {
    pub official: OfficialName,
    pub official_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficialName {
    pub full_name: String,
}

/// Per-umpire tendencies from the profile feed; the provider computes the
/// boosts, this side only stores them.
#[derive(Debug, Deserialize)]
pub struct UmpireProfile {
    pub name: String,
    pub k_boost: f64,
    pub runs_env: f64,
    pub sample_games: i64,
}

pub fn parse_assignments(feed: &AssignmentFeed) -> Vec<(i64, String)> {
    feed.games
        .iter()
        .filter_map(|g| {
            g.officials
                .iter()
                .find(|o| o.official_type.eq_ignore_ascii_case("Home Plate"))
                .map(|o| (g.game_pk, o.official.full_name.clone()))
        })
        .collect()
}

pub async fn fetch_assignments(
    http: &Http,
    base: &str,
    date: NaiveDate,
) -> Result<Vec<(i64, String)>> {
    let url = format!("{base}/schedule?sportId=1&date={date}&hydrate=officials");
    let feed: AssignmentFeed = with_retry("umpire assignments fetch", || http.get_json(&url)).await?;
    Ok(parse_assignments(&feed))
}

pub async fn fetch_profiles(http: &Http, base: &str) -> Result<Vec<UmpireStats>> {
    let url = format!("{base}/umpires/profiles");
    let profiles: Vec<UmpireProfile> =
        with_retry("umpire profiles fetch", || http.get_json(&url)).await?;
    Ok(profiles
        .into_iter()
        .map(|p| UmpireStats {
            umpire_name: p.name,
            k_boost: p.k_boost,
            runs_env: p.runs_env,
            sample_games: p.sample_games,
            updated_at: Utc::now(),
        })
        .collect())
}

pub async fn apply_assignments(store: &Store, assignments: &[(i64, String)]) -> Result<usize> {
    let mut tx = store.begin().await?;
    for (game_id, name) in assignments {
        sqlx::query("UPDATE games SET umpire_name = ? WHERE game_id = ?")
            .bind(name)
            .bind(game_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(assignments.len())
}

pub async fn upsert_profiles(store: &Store, profiles: &[UmpireStats]) -> Result<usize> {
    let mut tx = store.begin().await?;
    for p in profiles {
        sqlx::query(
            r#"INSERT INTO umpire_stats (umpire_name, k_boost, runs_env, sample_games, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (umpire_name) DO UPDATE SET
                   k_boost = excluded.k_boost,
                   runs_env = excluded.runs_env,
                   sample_games = excluded.sample_games,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&p.umpire_name)
        .bind(p.k_boost)
        .bind(p.runs_env)
        .bind(p.sample_games)
        .bind(p.updated_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(profiles.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_parse_picks_home_plate_only() {
        let feed: AssignmentFeed = serde_json::from_str(
            r#"{"games": [{"gamePk": 776123, "officials": [
                {"official": {"fullName": "Pat Hoberg"}, "officialType": "Home Plate"},
                {"official": {"fullName": "Dan Bellino"}, "officialType": "First Base"}
            ]}]}"#,
        )
        .unwrap();
        let parsed = parse_assignments(&feed);
        assert_eq!(parsed, vec![(776123, "Pat Hoberg".to_string())]);
    }
}
