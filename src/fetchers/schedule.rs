use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::db::Store;
use crate::fetchers::{with_retry, Http};
use crate::models::Game;

// ── League schedule feed response types ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScheduleResponse {
    #[serde(default)]
    pub dates: Vec<ScheduleDate>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleDate {
    pub date: NaiveDate,
    #[serde(default)]
    pub games: Vec<ScheduleGame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleGame {
    pub game_pk: i64,
    pub game_date: DateTime<Utc>,
    pub status: GameStatus,
    pub teams: GameTeams,
    pub venue: Option<Venue>,
    pub day_night: Option<String>,
    pub linescore: Option<Linescore>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub detailed_state: String,
}

#[derive(Debug, Deserialize)]
pub struct GameTeams {
    pub home: GameSide,
    pub away: GameSide,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSide {
    pub team: TeamRef,
    pub probable_pitcher: Option<PlayerRef>,
    pub score: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TeamRef {
    pub abbreviation: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayerRef {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Venue {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Linescore {
    #[serde(default)]
    pub innings: Vec<Inning>,
}

#[derive(Debug, Deserialize)]
pub struct Inning {
    pub num: i64,
    pub home: InningSide,
    pub away: InningSide,
}

#[derive(Debug, Deserialize)]
pub struct InningSide {
    pub runs: Option<i64>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Map the feed's detailed state onto the internal status set. Transitions
/// only move forward; the upsert enforces that.
fn map_status(detailed: &str) -> String {
    let s = detailed.to_lowercase();
    if s.contains("cancel") {
        "cancelled".to_string()
    } else if s.contains("completed early") {
        "completed_early".to_string()
    } else if s.contains("final") || s.contains("game over") {
        "final".to_string()
    } else if s.contains("progress") {
        "live".to_string()
    } else {
        "scheduled".to_string()
    }
}

fn first_five_runs(linescore: &Linescore) -> (Option<i64>, Option<i64>) {
    let first_five: Vec<&Inning> = linescore.innings.iter().filter(|i| i.num <= 5).collect();
    if first_five.len() < 5 {
        return (None, None);
    }
    let home = first_five.iter().map(|i| i.home.runs.unwrap_or(0)).sum();
    let away = first_five.iter().map(|i| i.away.runs.unwrap_or(0)).sum();
    (Some(home), Some(away))
}

pub fn parse_schedule(resp: &ScheduleResponse) -> Vec<Game> {
    let mut games = Vec::new();
    for date in &resp.dates {
        for g in &date.games {
            let status = map_status(&g.status.detailed_state);
            let (home_score_f5, away_score_f5) = match (&g.linescore, status.as_str()) {
                (Some(ls), "final" | "completed_early") => first_five_runs(ls),
                _ => (None, None),
            };
            games.push(Game {
                game_id: g.game_pk,
                game_date: date.date,
                home_team: g.teams.home.team.abbreviation.clone(),
                away_team: g.teams.away.team.abbreviation.clone(),
                stadium_id: g.venue.as_ref().map(|v| v.id),
                home_pitcher_id: g.teams.home.probable_pitcher.as_ref().map(|p| p.id),
                away_pitcher_id: g.teams.away.probable_pitcher.as_ref().map(|p| p.id),
                umpire_name: None,
                game_time_utc: Some(g.game_date),
                day_night: g.day_night.clone(),
                status,
                home_score: g.teams.home.score,
                away_score: g.teams.away.score,
                home_score_f5,
                away_score_f5,
            });
        }
    }
    games
}

// ── Fetch + persist ───────────────────────────────────────────────────────────

pub async fn fetch_schedule(http: &Http, base: &str, date: NaiveDate) -> Result<Vec<Game>> {
    let url = format!(
        "{base}/schedule?sportId=1&date={date}&hydrate=probablePitcher,linescore,team"
    );
    let resp: ScheduleResponse = with_retry("schedule fetch", || http.get_json(&url)).await?;
    Ok(parse_schedule(&resp))
}

/// Upsert schedule rows. Status only moves forward: once a game is final,
/// cancelled, or completed early, a re-fetch never downgrades it.
pub async fn upsert_games(store: &Store, games: &[Game]) -> Result<usize> {
    let mut tx = store.begin().await?;
    for g in games {
        sqlx::query(
            r#"INSERT INTO games
               (game_id, game_date, home_team, away_team, stadium_id, home_pitcher_id,
                away_pitcher_id, umpire_name, game_time_utc, day_night, status,
                home_score, away_score, home_score_f5, away_score_f5)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (game_id) DO UPDATE SET
                   stadium_id      = excluded.stadium_id,
                   home_pitcher_id = COALESCE(excluded.home_pitcher_id, games.home_pitcher_id),
                   away_pitcher_id = COALESCE(excluded.away_pitcher_id, games.away_pitcher_id),
                   game_time_utc   = excluded.game_time_utc,
                   day_night       = excluded.day_night,
                   status          = excluded.status,
                   home_score      = excluded.home_score,
                   away_score      = excluded.away_score,
                   home_score_f5   = excluded.home_score_f5,
                   away_score_f5   = excluded.away_score_f5
               WHERE games.status NOT IN ('final', 'cancelled', 'completed_early')"#,
        )
        .bind(g.game_id)
        .bind(g.game_date)
        .bind(&g.home_team)
        .bind(&g.away_team)
        .bind(g.stadium_id)
        .bind(g.home_pitcher_id)
        .bind(g.away_pitcher_id)
        .bind(&g.umpire_name)
        .bind(g.game_time_utc)
        .bind(&g.day_night)
        .bind(&g.status)
        .bind(g.home_score)
        .bind(g.away_score)
        .bind(g.home_score_f5)
        .bind(g.away_score_f5)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    tracing::info!("Schedule: {} game(s) upserted", games.len());
    Ok(games.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "dates": [{
            "date": "2024-07-04",
            "games": [{
                "gamePk": 776123,
                "gameDate": "2024-07-04T18:05:00Z",
                "status": {"detailedState": "Final"},
                "dayNight": "day",
                "venue": {"id": 3309},
                "teams": {
                    "home": {"team": {"abbreviation": "NYY"}, "probablePitcher": {"id": 543037}, "score": 6},
                    "away": {"team": {"abbreviation": "BOS"}, "probablePitcher": null, "score": 2}
                },
                "linescore": {"innings": [
                    {"num": 1, "home": {"runs": 2}, "away": {"runs": 0}},
                    {"num": 2, "home": {"runs": 0}, "away": {"runs": 1}},
                    {"num": 3, "home": {"runs": 1}, "away": {"runs": 0}},
                    {"num": 4, "home": {"runs": 0}, "away": {"runs": 0}},
                    {"num": 5, "home": {"runs": 0}, "away": {"runs": 1}},
                    {"num": 6, "home": {"runs": 3}, "away": {"runs": 0}}
                ]}
            }]
        }]
    }"#;

    #[test]
    fn parses_final_game_with_f5_split() {
        let resp: ScheduleResponse = serde_json::from_str(SAMPLE).unwrap();
        let games = parse_schedule(&resp);
        assert_eq!(games.len(), 1);
        let g = &games[0];
        assert_eq!(g.game_id, 776123);
        assert_eq!(g.status, "final");
        assert_eq!(g.home_team, "NYY");
        assert_eq!(g.home_pitcher_id, Some(543037));
        assert_eq!(g.away_pitcher_id, None);
        assert_eq!((g.home_score, g.away_score), (Some(6), Some(2)));
        assert_eq!((g.home_score_f5, g.away_score_f5), (Some(3), Some(2)));
    }

    #[test]
    fn status_mapping_moves_through_known_states() {
        assert_eq!(map_status("Scheduled"), "scheduled");
        assert_eq!(map_status("Pre-Game"), "scheduled");
        assert_eq!(map_status("In Progress"), "live");
        assert_eq!(map_status("Final"), "final");
        assert_eq!(map_status("Cancelled"), "cancelled");
        assert_eq!(map_status("Completed Early: Rain"), "completed_early");
    }

    #[tokio::test]
    async fn refetch_never_downgrades_a_final_game() {
        let store = Store::in_memory().await.unwrap();
        let resp: ScheduleResponse = serde_json::from_str(SAMPLE).unwrap();
        let mut games = parse_schedule(&resp);
        upsert_games(&store, &games).await.unwrap();

        // A stale re-fetch claiming the game is back to scheduled must lose.
        games[0].status = "scheduled".to_string();
        games[0].home_score = None;
        upsert_games(&store, &games).await.unwrap();

        let status: String = sqlx::query_scalar("SELECT status FROM games WHERE game_id = 776123")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(status, "final");
    }
}
