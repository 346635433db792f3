use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::db::{games_for_date, Store};
use crate::fetchers::rosters::roster_as_of;
use crate::fetchers::{with_retry, Http};
use crate::models::{Game, OddsRow, RosterEntry};
use crate::odds::{american_to_decimal, american_to_implied, map_market_key, selection_key, store_odds};

// ── Odds API response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OddsEvent {
    #[allow(dead_code)]
    pub id: String,
    pub commence_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize)]
pub struct Bookmaker {
    pub key: String,
    #[serde(default)]
    pub markets: Vec<BookMarket>,
}

#[derive(Debug, Deserialize)]
pub struct BookMarket {
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<BookOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct BookOutcome {
    pub name: String,
    /// Player or team qualifier on prop markets.
    pub description: Option<String>,
    pub price: f64,
    pub point: Option<f64>,
}

// ── Name resolution ───────────────────────────────────────────────────────────

/// Book full names for the internal team abbreviations.
const TEAM_NAMES: &[(&str, &str)] = &[
    ("Arizona Diamondbacks", "ARI"), ("Atlanta Braves", "ATL"), ("Baltimore Orioles", "BAL"),
    ("Boston Red Sox", "BOS"), ("Chicago Cubs", "CHC"), ("Chicago White Sox", "CWS"),
    ("Cincinnati Reds", "CIN"), ("Cleveland Guardians", "CLE"), ("Colorado Rockies", "COL"),
    ("Detroit Tigers", "DET"), ("Houston Astros", "HOU"), ("Kansas City Royals", "KC"),
    ("Los Angeles Angels", "LAA"), ("Los Angeles Dodgers", "LAD"), ("Miami Marlins", "MIA"),
    ("Milwaukee Brewers", "MIL"), ("Minnesota Twins", "MIN"), ("New York Mets", "NYM"),
    ("New York Yankees", "NYY"), ("Oakland Athletics", "OAK"), ("Philadelphia Phillies", "PHI"),
    ("Pittsburgh Pirates", "PIT"), ("San Diego Padres", "SD"), ("San Francisco Giants", "SF"),
    ("Seattle Mariners", "SEA"), ("St. Louis Cardinals", "STL"), ("Tampa Bay Rays", "TB"),
    ("Texas Rangers", "TEX"), ("Toronto Blue Jays", "TOR"), ("Washington Nationals", "WSH"),
];

/// Resolve a book team name to the internal abbreviation: exact first, then
/// the best fuzzy match above a similarity floor.
pub fn resolve_team(name: &str) -> Option<&'static str> {
    let lowered = name.to_lowercase();
    if let Some((_, abbrev)) = TEAM_NAMES.iter().find(|(n, _)| n.to_lowercase() == lowered) {
        return Some(abbrev);
    }
    TEAM_NAMES
        .iter()
        .map(|(n, a)| (strsim::jaro_winkler(&n.to_lowercase(), &lowered), *a))
        .filter(|(sim, _)| *sim >= 0.85)
        .max_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, a)| a)
}

fn resolve_player(name: &str, roster: &HashMap<String, i64>) -> Option<i64> {
    let lowered = name.to_lowercase();
    if let Some(id) = roster.get(&lowered) {
        return Some(*id);
    }
    roster
        .iter()
        .map(|(n, id)| (strsim::jaro_winkler(n, &lowered), *id))
        .filter(|(sim, _)| *sim >= 0.88)
        .max_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, id)| id)
}

// ── Normalization ─────────────────────────────────────────────────────────────

fn side_for_team(outcome_team: &str, game: &Game) -> Option<&'static str> {
    let abbrev = resolve_team(outcome_team)?;
    if abbrev == game.home_team {
        Some("HOME")
    } else if abbrev == game.away_team {
        Some("AWAY")
    } else {
        None
    }
}

/// Map one book event onto normalized rows. Unknown market keys and
/// unresolvable entities are logged and skipped; nothing here fails the batch.
pub fn normalize_event(
    event: &OddsEvent,
    game: &Game,
    roster: &HashMap<String, i64>,
    fetched_at: DateTime<Utc>,
) -> Vec<OddsRow> {
    let mut rows = Vec::new();
    for book in &event.bookmakers {
        for market in &book.markets {
            let Some(code) = map_market_key(&market.key) else {
                tracing::warn!("Odds: unknown market key '{}' skipped", market.key);
                continue;
            };
            for outcome in &market.outcomes {
                let price = outcome.price.round() as i64;
                let parsed = match code {
                    "ML" | "F5_ML" => side_for_team(&outcome.name, game)
                        .map(|side| (format!("game:{}", game.game_id), side.to_string(), None)),
                    "TOTAL" | "F5_TOTAL" => outcome.point.map(|line| {
                        (
                            format!("game:{}", game.game_id),
                            outcome.name.to_uppercase(),
                            Some(line),
                        )
                    }),
                    "TEAM_TOTAL" => match (&outcome.description, outcome.point) {
                        (Some(team_name), Some(line)) => resolve_team(team_name).map(|abbrev| {
                            (format!("team:{abbrev}"), outcome.name.to_uppercase(), Some(line))
                        }),
                        _ => None,
                    },
                    "HR" | "HITS_1P" => {
                        // Yes/no props: track the YES side only; books quote it
                        // either as "Yes" or as Over a 0.5 line.
                        let is_yes = outcome.name.eq_ignore_ascii_case("yes")
                            || (outcome.name.eq_ignore_ascii_case("over")
                                && outcome.point.map(|p| p < 1.0).unwrap_or(false));
                        if !is_yes {
                            None
                        } else {
                            outcome
                                .description
                                .as_deref()
                                .and_then(|n| resolve_player(n, roster))
                                .map(|id| (format!("player:{id}"), "YES".to_string(), None))
                        }
                    }
                    _ => match (&outcome.description, outcome.point) {
                        (Some(player_name), Some(line)) => resolve_player(player_name, roster)
                            .map(|id| {
                                (format!("player:{id}"), outcome.name.to_uppercase(), Some(line))
                            }),
                        _ => None,
                    },
                };
                let Some((entity, bet_type, line)) = parsed else {
                    tracing::debug!(
                        "Odds: unresolvable outcome '{}'/'{:?}' in {} skipped",
                        outcome.name, outcome.description, market.key
                    );
                    continue;
                };
                rows.push(OddsRow {
                    game_date: game.game_date,
                    market: code.to_string(),
                    game_id: game.game_id,
                    selection_key: selection_key(code, &entity, &bet_type, line),
                    entity,
                    bet_type,
                    line,
                    sportsbook: book.key.clone(),
                    price_american: price,
                    price_decimal: american_to_decimal(price),
                    implied_prob: american_to_implied(price),
                    fetched_at,
                });
            }
        }
    }
    rows
}

/// Match a book event to a scheduled game by team pair within the date.
fn find_game<'a>(event: &OddsEvent, games: &'a [Game]) -> Option<&'a Game> {
    let home = resolve_team(&event.home_team)?;
    let away = resolve_team(&event.away_team)?;
    games.iter().find(|g| g.home_team == home && g.away_team == away)
}

// ── Entry point ───────────────────────────────────────────────────────────────

pub async fn refresh_odds(
    http: &Http,
    store: &Store,
    base: &str,
    api_key: &str,
    date: NaiveDate,
) -> Result<usize> {
    let games = games_for_date(store, date).await?;
    if games.is_empty() {
        tracing::info!("Odds: no games on {}; nothing to fetch", date);
        return Ok(0);
    }

    let roster: HashMap<String, i64> = roster_as_of(store, date)
        .await?
        .into_iter()
        .map(|r: RosterEntry| (r.full_name.to_lowercase(), r.player_id))
        .collect();

    let markets = "h2h,totals,team_totals,h2h_1st_5_innings,totals_1st_5_innings,\
                   batter_home_runs,batter_hits,batter_record_a_hit,batter_total_bases,\
                   pitcher_strikeouts,pitcher_outs";
    let url = format!(
        "{base}/sports/baseball_mlb/odds?apiKey={api_key}&regions=us&oddsFormat=american&markets={markets}"
    );
    let events: Vec<OddsEvent> = with_retry("odds fetch", || http.get_json(&url)).await?;

    let fetched_at = Utc::now();
    let mut rows = Vec::new();
    for event in &events {
        let Some(game) = find_game(event, &games) else {
            tracing::debug!(
                "Odds: no scheduled game for {} vs {} at {}",
                event.home_team, event.away_team, event.commence_time
            );
            continue;
        };
        rows.extend(normalize_event(event, game, &roster, fetched_at));
    }

    let stored = store_odds(store, date, &rows).await?;
    tracing::info!("Odds: {} row(s) stored across {} event(s)", stored, events.len());
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> Game {
        Game {
            game_id: 776123,
            game_date: NaiveDate::from_ymd_opt(2024, 7, 4).unwrap(),
            home_team: "NYY".into(),
            away_team: "BOS".into(),
            stadium_id: Some(3309),
            home_pitcher_id: Some(543037),
            away_pitcher_id: Some(477132),
            umpire_name: None,
            game_time_utc: None,
            day_night: Some("day".into()),
            status: "scheduled".into(),
            home_score: None,
            away_score: None,
            home_score_f5: None,
            away_score_f5: None,
        }
    }

    #[test]
    fn team_resolution_tolerates_book_spelling() {
        assert_eq!(resolve_team("New York Yankees"), Some("NYY"));
        assert_eq!(resolve_team("St Louis Cardinals"), Some("STL"));
        assert_eq!(resolve_team("Rugby Union Warriors"), None);
    }

    #[test]
    fn normalizes_moneyline_totals_and_props() {
        let event: OddsEvent = serde_json::from_str(
            r#"{
                "id": "abc", "commence_time": "2024-07-04T18:05:00Z",
                "home_team": "New York Yankees", "away_team": "Boston Red Sox",
                "bookmakers": [{
                    "key": "draftkings",
                    "markets": [
                        {"key": "h2h", "outcomes": [
                            {"name": "New York Yankees", "price": -150},
                            {"name": "Boston Red Sox", "price": 130}
                        ]},
                        {"key": "totals", "outcomes": [
                            {"name": "Over", "price": -110, "point": 8.5},
                            {"name": "Under", "price": -110, "point": 8.5}
                        ]},
                        {"key": "batter_home_runs", "outcomes": [
                            {"name": "Yes", "description": "Aaron Judge", "price": 320}
                        ]},
                        {"key": "alternate_spreads", "outcomes": [
                            {"name": "New York Yankees", "price": 100, "point": -2.5}
                        ]}
                    ]
                }]
            }"#,
        )
        .unwrap();
        let roster = HashMap::from([("aaron judge".to_string(), 592450i64)]);
        let rows = normalize_event(&event, &game(), &roster, Utc::now());

        assert_eq!(rows.len(), 5); // unknown market skipped
        let ml_home = rows.iter().find(|r| r.selection_key == "ML|game:776123|HOME").unwrap();
        assert_eq!(ml_home.price_american, -150);
        let total_over = rows
            .iter()
            .find(|r| r.selection_key == "TOTAL|game:776123|line:8.5|OVER")
            .unwrap();
        assert!((total_over.implied_prob - 0.5238).abs() < 1e-3);
        let hr = rows.iter().find(|r| r.market == "HR").unwrap();
        assert_eq!(hr.selection_key, "HR|player:592450|YES");
        assert_eq!(hr.bet_type, "YES");
    }

    #[test]
    fn hr_quoted_as_over_half_line_is_the_yes_side() {
        let event: OddsEvent = serde_json::from_str(
            r#"{
                "id": "abc", "commence_time": "2024-07-04T18:05:00Z",
                "home_team": "New York Yankees", "away_team": "Boston Red Sox",
                "bookmakers": [{
                    "key": "fanduel",
                    "markets": [{"key": "batter_home_runs", "outcomes": [
                        {"name": "Over", "description": "Aaron Judge", "price": 340, "point": 0.5},
                        {"name": "Under", "description": "Aaron Judge", "price": -450, "point": 0.5}
                    ]}]
                }]
            }"#,
        )
        .unwrap();
        let roster = HashMap::from([("aaron judge".to_string(), 592450i64)]);
        let rows = normalize_event(&event, &game(), &roster, Utc::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].selection_key, "HR|player:592450|YES");
        assert_eq!(rows[0].line, None);
    }
}
