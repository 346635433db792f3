use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::{Store, UPSERT_CHUNK};
use crate::fetchers::{with_retry, Http};
use crate::models::RosterEntry;

/// League team ids for the roster feed, keyed to the internal abbreviations.
pub const TEAM_IDS: &[(i64, &str)] = &[
    (108, "LAA"), (109, "ARI"), (110, "BAL"), (111, "BOS"), (112, "CHC"),
    (113, "CIN"), (114, "CLE"), (115, "COL"), (116, "DET"), (117, "HOU"),
    (118, "KC"), (119, "LAD"), (120, "WSH"), (121, "NYM"), (133, "OAK"),
    (134, "PIT"), (135, "SD"), (136, "SEA"), (137, "SF"), (138, "STL"),
    (139, "TB"), (140, "TEX"), (141, "TOR"), (142, "MIN"), (143, "PHI"),
    (144, "ATL"), (145, "CWS"), (146, "MIA"), (147, "NYY"), (158, "MIL"),
];

// ── Roster feed response ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RosterResponse {
    #[serde(default)]
    pub roster: Vec<RosterPerson>,
}

#[derive(Debug, Deserialize)]
pub struct RosterPerson {
    pub person: Person,
    pub position: Position,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: i64,
    pub full_name: String,
    pub bat_side: Option<SideCode>,
    pub pitch_hand: Option<SideCode>,
}

#[derive(Debug, Deserialize)]
pub struct SideCode {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct Position {
    pub abbreviation: String,
}

pub fn parse_roster(resp: &RosterResponse, team: &str, as_of: NaiveDate) -> Vec<RosterEntry> {
    resp.roster
        .iter()
        .map(|p| RosterEntry {
            player_id: p.person.id,
            team: team.to_string(),
            full_name: p.person.full_name.clone(),
            position: p.position.abbreviation.clone(),
            bats: p.person.bat_side.as_ref().map(|s| s.code.clone()).unwrap_or_else(|| "R".into()),
            throws: p.person.pitch_hand.as_ref().map(|s| s.code.clone()).unwrap_or_else(|| "R".into()),
            as_of_date: as_of,
        })
        .collect()
}

/// Active roster splits for every team. A team whose roster call fails is
/// skipped with a warning; the rest proceed.
pub async fn fetch_all_rosters(
    http: &Http,
    base: &str,
    as_of: NaiveDate,
) -> Result<Vec<RosterEntry>> {
    let mut entries = Vec::new();
    for (team_id, abbrev) in TEAM_IDS {
        let url = format!("{base}/teams/{team_id}/roster?rosterType=active&hydrate=person");
        match with_retry("roster fetch", || http.get_json::<RosterResponse>(&url)).await {
            Ok(resp) => entries.extend(parse_roster(&resp, abbrev, as_of)),
            Err(e) => tracing::warn!("Roster unavailable for {}: {}", abbrev, e),
        }
    }
    Ok(entries)
}

pub async fn upsert_rosters(store: &Store, entries: &[RosterEntry]) -> Result<usize> {
    for chunk in entries.chunks(UPSERT_CHUNK) {
        let mut tx = store.begin().await?;
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "INSERT INTO rosters (player_id, team, full_name, position, bats, throws, as_of_date) ",
        );
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.player_id)
                .push_bind(&r.team)
                .push_bind(&r.full_name)
                .push_bind(&r.position)
                .push_bind(&r.bats)
                .push_bind(&r.throws)
                .push_bind(r.as_of_date);
        });
        qb.push(
            " ON CONFLICT (player_id, as_of_date) DO UPDATE SET \
              team = excluded.team, full_name = excluded.full_name, \
              position = excluded.position, bats = excluded.bats, throws = excluded.throws",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
    }
    Ok(entries.len())
}

/// Latest roster row at or before the date for each player, as a lookup map.
pub async fn roster_as_of(store: &Store, date: NaiveDate) -> Result<Vec<RosterEntry>> {
    let rows = sqlx::query_as::<_, RosterEntry>(
        r#"SELECT r.* FROM rosters r
           JOIN (SELECT player_id, MAX(as_of_date) AS latest
                 FROM rosters WHERE as_of_date <= ? GROUP BY player_id) m
             ON r.player_id = m.player_id AND r.as_of_date = m.latest"#,
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_parse_defaults_missing_handedness() {
        let resp: RosterResponse = serde_json::from_str(
            r#"{"roster": [
                {"person": {"id": 592450, "fullName": "Aaron Judge", "batSide": {"code": "R"}, "pitchHand": {"code": "R"}},
                 "position": {"abbreviation": "RF"}},
                {"person": {"id": 999001, "fullName": "New Callup"},
                 "position": {"abbreviation": "2B"}}
            ]}"#,
        )
        .unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let entries = parse_roster(&resp, "NYY", date);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].bats, "R");
        assert_eq!(entries[1].bats, "R");
        assert_eq!(entries[1].team, "NYY");
    }
}
