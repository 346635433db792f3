use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::{Store, UPSERT_CHUNK};
use crate::fetchers::{with_retry, Http};
use crate::models::PitchEvent;

// ── Event provider CSV row ────────────────────────────────────────────────────

/// Raw pitch row from the event provider's CSV export. Empty fields
/// deserialize to None.
#[derive(Debug, Deserialize)]
pub struct RawPitchRow {
    pub game_pk: i64,
    pub game_date: NaiveDate,
    pub at_bat_number: i64,
    pub pitch_number: i64,
    pub batter: i64,
    pub pitcher: i64,
    pub stand: String,
    pub p_throws: String,
    pub home_team: String,
    pub away_team: String,
    pub inning: i64,
    pub inning_topbot: String,
    pub outs_when_up: i64,
    pub balls: i64,
    pub strikes: i64,
    pub events: Option<String>,
    pub description: String,
    pub pitch_type: Option<String>,
    pub release_speed: Option<f64>,
    pub launch_speed: Option<f64>,
    pub launch_angle: Option<f64>,
    pub bb_type: Option<String>,
    pub spray_angle: Option<f64>,
    pub zone: Option<i64>,
    pub bat_score: i64,
    pub post_bat_score: i64,
    pub rbi: Option<i64>,
    pub batter_scored: Option<i64>,
}

const SWING_DESCRIPTIONS: &[&str] = &[
    "swinging_strike",
    "swinging_strike_blocked",
    "foul",
    "foul_tip",
    "foul_bunt",
    "missed_bunt",
    "hit_into_play",
];

const WHIFF_DESCRIPTIONS: &[&str] = &[
    "swinging_strike",
    "swinging_strike_blocked",
    "missed_bunt",
];

fn is_barrel(launch_speed: f64, launch_angle: f64) -> bool {
    // Simplified barrel zone: 98+ mph with the qualifying angle band widening
    // one degree low / two degrees high per extra mph.
    if launch_speed < 98.0 {
        return false;
    }
    let extra = launch_speed - 98.0;
    let lo = (26.0 - extra).max(8.0);
    let hi = (30.0 + 2.0 * extra).min(50.0);
    (lo..=hi).contains(&launch_angle)
}

fn is_pull(stand: &str, spray_angle: f64) -> bool {
    // Negative spray angles are toward third base. A right-handed batter
    // pulls toward third, a lefty toward first.
    match stand {
        "R" => spray_angle <= -12.5,
        _ => spray_angle >= 12.5,
    }
}

/// Normalize raw CSV rows into pitch events. Besides the flag derivations,
/// this assigns `pa_of_game`: the 1-based index of each plate appearance
/// among the pitcher's batters faced in the game (times-through-order).
pub fn normalize(rows: Vec<RawPitchRow>) -> Vec<PitchEvent> {
    // Rank distinct at-bats per (game, pitcher) by at_bat_number.
    let mut at_bats: HashMap<(i64, i64), Vec<i64>> = HashMap::new();
    for r in &rows {
        let entry = at_bats.entry((r.game_pk, r.pitcher)).or_default();
        if !entry.contains(&r.at_bat_number) {
            entry.push(r.at_bat_number);
        }
    }
    for list in at_bats.values_mut() {
        list.sort_unstable();
    }

    rows.into_iter()
        .map(|r| {
            let pa_of_game = at_bats[&(r.game_pk, r.pitcher)]
                .iter()
                .position(|&ab| ab == r.at_bat_number)
                .map(|i| i as i64 + 1)
                .unwrap_or(1);
            let (bat_team, fld_team) = if r.inning_topbot.eq_ignore_ascii_case("top") {
                (r.away_team.clone(), r.home_team.clone())
            } else {
                (r.home_team.clone(), r.away_team.clone())
            };
            let desc = r.description.as_str();
            let is_swing = SWING_DESCRIPTIONS.contains(&desc);
            let is_whiff = WHIFF_DESCRIPTIONS.contains(&desc);
            let contact = match (r.launch_speed, r.launch_angle) {
                (Some(ls), Some(la)) => Some((ls, la)),
                _ => None,
            };
            let pull = r.spray_angle.map(|sa| is_pull(&r.stand, sa));
            PitchEvent {
                game_id: r.game_pk,
                game_date: r.game_date,
                at_bat_number: r.at_bat_number,
                pitch_number: r.pitch_number,
                batter_id: r.batter,
                pitcher_id: r.pitcher,
                bat_team,
                fld_team,
                stand: r.stand,
                p_throws: r.p_throws,
                inning: r.inning,
                outs_when_up: r.outs_when_up,
                balls: r.balls,
                strikes: r.strikes,
                events: r.events,
                description: r.description,
                pitch_type: r.pitch_type,
                release_speed: r.release_speed,
                launch_speed: r.launch_speed,
                launch_angle: r.launch_angle,
                bb_type: r.bb_type,
                is_barrel: contact.map(|(ls, la)| is_barrel(ls, la)).unwrap_or(false),
                is_hard_hit: r.launch_speed.map(|ls| ls >= 95.0).unwrap_or(false),
                is_pull: pull,
                is_swing,
                is_whiff,
                is_in_zone: r.zone.map(|z| (1..=9).contains(&z)),
                pa_of_game,
                bat_score: r.bat_score,
                post_bat_score: r.post_bat_score,
                rbi: r.rbi.unwrap_or(0),
                batter_scored: r.batter_scored.unwrap_or(0) != 0,
            }
        })
        .collect()
}

pub fn parse_csv(body: &str) -> Result<Vec<RawPitchRow>> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let mut rows = Vec::new();
    for record in reader.deserialize::<RawPitchRow>() {
        rows.push(record?);
    }
    Ok(rows)
}

// ── Fetch modes ───────────────────────────────────────────────────────────────

async fn fetch_range(
    http: &Http,
    base: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PitchEvent>> {
    let url = format!(
        "{base}?all=true&type=details&game_date_gt={start}&game_date_lt={end}&min_pitches=0"
    );
    let body = with_retry("pitch events fetch", || http.get_text(&url)).await?;
    let raw = parse_csv(&body)?;
    Ok(normalize(raw))
}

/// Live path: events for one date.
pub async fn per_day(http: &Http, base: &str, date: NaiveDate) -> Result<Vec<PitchEvent>> {
    fetch_range(http, base, date, date).await
}

/// Backfill path: one bulk pull for a date span. Callers chunk spans at 60
/// days so the buffer stays bounded.
pub async fn bulk(
    http: &Http,
    base: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PitchEvent>> {
    fetch_range(http, base, start, end).await
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// Chunked insert; events are immutable so key conflicts are ignored.
pub async fn upsert_events(store: &Store, events: &[PitchEvent]) -> Result<usize> {
    for chunk in events.chunks(UPSERT_CHUNK) {
        let mut tx = store.begin().await?;
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "INSERT INTO pitch_events \
             (game_id, game_date, at_bat_number, pitch_number, batter_id, pitcher_id, \
              bat_team, fld_team, stand, p_throws, inning, outs_when_up, balls, strikes, \
              events, description, pitch_type, release_speed, launch_speed, launch_angle, \
              bb_type, is_barrel, is_hard_hit, is_pull, is_swing, is_whiff, is_in_zone, \
              pa_of_game, bat_score, post_bat_score, rbi, batter_scored) ",
        );
        qb.push_values(chunk, |mut b, e| {
            b.push_bind(e.game_id)
                .push_bind(e.game_date)
                .push_bind(e.at_bat_number)
                .push_bind(e.pitch_number)
                .push_bind(e.batter_id)
                .push_bind(e.pitcher_id)
                .push_bind(&e.bat_team)
                .push_bind(&e.fld_team)
                .push_bind(&e.stand)
                .push_bind(&e.p_throws)
                .push_bind(e.inning)
                .push_bind(e.outs_when_up)
                .push_bind(e.balls)
                .push_bind(e.strikes)
                .push_bind(&e.events)
                .push_bind(&e.description)
                .push_bind(&e.pitch_type)
                .push_bind(e.release_speed)
                .push_bind(e.launch_speed)
                .push_bind(e.launch_angle)
                .push_bind(&e.bb_type)
                .push_bind(e.is_barrel)
                .push_bind(e.is_hard_hit)
                .push_bind(e.is_pull)
                .push_bind(e.is_swing)
                .push_bind(e.is_whiff)
                .push_bind(e.is_in_zone)
                .push_bind(e.pa_of_game)
                .push_bind(e.bat_score)
                .push_bind(e.post_bat_score)
                .push_bind(e.rbi)
                .push_bind(e.batter_scored);
        });
        qb.push(" ON CONFLICT (game_id, at_bat_number, pitch_number) DO NOTHING");
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
    }
    Ok(events.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
game_pk,game_date,at_bat_number,pitch_number,batter,pitcher,stand,p_throws,home_team,away_team,inning,inning_topbot,outs_when_up,balls,strikes,events,description,pitch_type,release_speed,launch_speed,launch_angle,bb_type,spray_angle,zone,bat_score,post_bat_score,rbi,batter_scored
776123,2024-07-03,12,1,592450,477132,R,L,NYY,BOS,2,Bot,1,0,0,,swinging_strike,FF,95.2,,,,,5,1,1,0,0
776123,2024-07-03,12,2,592450,477132,R,L,NYY,BOS,2,Bot,1,0,1,home_run,hit_into_play,SL,84.1,104.3,28.0,fly_ball,-20.5,5,1,2,1,1
776123,2024-07-03,20,1,592450,477132,R,L,NYY,BOS,4,Bot,0,0,0,strikeout,swinging_strike,FF,95.8,,,,,8,2,2,0,0
";

    #[test]
    fn csv_parses_and_normalizes_flags() {
        let raw = parse_csv(SAMPLE_CSV).unwrap();
        assert_eq!(raw.len(), 3);
        let events = normalize(raw);

        let hr = &events[1];
        assert_eq!(hr.events.as_deref(), Some("home_run"));
        assert!(hr.is_barrel);
        assert!(hr.is_hard_hit);
        assert_eq!(hr.is_pull, Some(true));
        assert!(hr.is_swing);
        assert!(!hr.is_whiff);
        assert_eq!(hr.bat_team, "NYY");
        assert_eq!(hr.fld_team, "BOS");
        assert_eq!(hr.rbi, 1);
        assert!(hr.batter_scored);

        let whiff = &events[0];
        assert!(whiff.is_whiff);
        assert!(!whiff.is_barrel);
        assert_eq!(whiff.is_in_zone, Some(true));
    }

    #[test]
    fn pa_of_game_buckets_times_through_order() {
        let raw = parse_csv(SAMPLE_CSV).unwrap();
        let events = normalize(raw);
        // At-bat 12 is the pitcher's first batter faced, at-bat 20 the second.
        assert_eq!(events[0].pa_of_game, 1);
        assert_eq!(events[1].pa_of_game, 1);
        assert_eq!(events[2].pa_of_game, 2);
    }

    #[test]
    fn barrel_band_widens_with_exit_velocity() {
        assert!(is_barrel(98.0, 27.0));
        assert!(!is_barrel(98.0, 33.0));
        assert!(is_barrel(104.0, 40.0));
        assert!(!is_barrel(90.0, 28.0));
    }

    #[tokio::test]
    async fn upsert_ignores_duplicate_natural_keys() {
        let store = Store::in_memory().await.unwrap();
        let events = normalize(parse_csv(SAMPLE_CSV).unwrap());
        upsert_events(&store, &events).await.unwrap();
        upsert_events(&store, &events).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pitch_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 3);
    }
}
