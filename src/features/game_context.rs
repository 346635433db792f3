use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;

use crate::db::{games_for_date, Store};
use crate::features::BuildReport;
use crate::models::{Game, GameContextFeatures, Stadium, UmpireStats, WeatherRow};

/// Weather multipliers. Carry improves with heat; wind blowing out inflates
/// home runs and, more weakly, total run scoring.
///
/// temp_factor = 1 + 0.008 * (temp_f - 70), clamped to [0.85, 1.15]
/// wind_factor = 1 + 0.015 * wind_mph * dir (out = +1, in = -1, cross = 0),
///               clamped to [0.80, 1.20]
/// hr_mult     = temp_factor * wind_factor
/// runs_mult   = 1 + 0.6 * (hr_mult - 1)
pub fn weather_multipliers(temp_f: f64, wind_mph: f64, wind_dir: &str) -> (f64, f64) {
    let temp_factor = (1.0 + 0.008 * (temp_f - 70.0)).clamp(0.85, 1.15);
    let dir = match wind_dir {
        "out" => 1.0,
        "in" => -1.0,
        _ => 0.0,
    };
    let wind_factor = (1.0 + 0.015 * wind_mph * dir).clamp(0.80, 1.20);
    let hr_mult = temp_factor * wind_factor;
    let runs_mult = 1.0 + 0.6 * (hr_mult - 1.0);
    (hr_mult, runs_mult)
}

async fn lineup_presence(store: &Store, game: &Game) -> Result<(bool, bool, bool, bool)> {
    // (home_present, home_confirmed, away_present, away_confirmed)
    let mut out = (false, false, false, false);
    for (i, team) in [&game.home_team, &game.away_team].into_iter().enumerate() {
        let confirmed: Option<bool> = sqlx::query_scalar(
            r#"SELECT is_confirmed FROM lineups
               WHERE game_id = ? AND team = ? AND active_version = 1
               LIMIT 1"#,
        )
        .bind(game.game_id)
        .bind(team)
        .fetch_optional(store.pool())
        .await?;
        match (i, confirmed) {
            (0, Some(c)) => {
                out.0 = true;
                out.1 = c;
            }
            (1, Some(c)) => {
                out.2 = true;
                out.3 = c;
            }
            _ => {}
        }
    }
    Ok(out)
}

pub async fn build(store: &Store, date: NaiveDate) -> Result<BuildReport> {
    let games = games_for_date(store, date).await?;
    let mut report = BuildReport::default();
    if games.is_empty() {
        report.missing_inputs.push("games".to_string());
        return Ok(report);
    }

    let stadiums: HashMap<i64, Stadium> =
        sqlx::query_as::<_, Stadium>("SELECT * FROM stadiums")
            .fetch_all(store.pool())
            .await?
            .into_iter()
            .map(|s| (s.stadium_id, s))
            .collect();

    let weather: HashMap<i64, WeatherRow> = sqlx::query_as::<_, WeatherRow>(
        "SELECT * FROM weather WHERE game_date = ?",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?
    .into_iter()
    .map(|w| (w.game_id, w))
    .collect();

    let umpires: HashMap<String, UmpireStats> =
        sqlx::query_as::<_, UmpireStats>("SELECT * FROM umpire_stats")
            .fetch_all(store.pool())
            .await?
            .into_iter()
            .map(|u| (u.umpire_name.clone(), u))
            .collect();

    let mut rows = Vec::with_capacity(games.len());
    for game in &games {
        let stadium = game.stadium_id.and_then(|id| stadiums.get(&id));
        if stadium.is_none() {
            report.missing_inputs.push(format!("stadium:game:{}", game.game_id));
        }
        let w = weather.get(&game.game_id);
        if w.is_none() {
            report.missing_inputs.push(format!("weather:game:{}", game.game_id));
        }
        let ump = game.umpire_name.as_deref().and_then(|n| umpires.get(n));

        let (weather_hr_mult, weather_runs_mult) = match w {
            Some(w) => {
                let (hr, runs) = weather_multipliers(w.temp_f, w.wind_mph, &w.wind_dir);
                (Some(hr), Some(runs))
            }
            None => (None, None),
        };

        let (home_present, home_confirmed, away_present, away_confirmed) =
            lineup_presence(store, game).await?;
        if !home_present {
            report.missing_inputs.push(format!("lineup:game:{}:home", game.game_id));
        }
        if !away_present {
            report.missing_inputs.push(format!("lineup:game:{}:away", game.game_id));
        }

        let probables_present =
            game.home_pitcher_id.is_some() && game.away_pitcher_id.is_some();
        let weather_final = w.map(|w| !w.is_forecast).unwrap_or(false);

        rows.push(GameContextFeatures {
            game_date: date,
            game_id: game.game_id,
            park_hr_factor: stadium.map(|s| s.hr_factor),
            park_runs_factor: stadium.map(|s| s.runs_factor),
            park_hits_factor: stadium.map(|s| s.hits_factor),
            temp_f: w.map(|w| w.temp_f),
            wind_mph: w.map(|w| w.wind_mph),
            wind_dir: w.map(|w| w.wind_dir.clone()),
            weather_hr_mult,
            weather_runs_mult,
            weather_final,
            umpire_name: game.umpire_name.clone(),
            ump_k_boost: ump.map(|u| u.k_boost),
            ump_runs_env: ump.map(|u| u.runs_env),
            home_lineup_confirmed: home_confirmed,
            away_lineup_confirmed: away_confirmed,
            day_night: game.day_night.clone(),
            home_probable_id: game.home_pitcher_id,
            away_probable_id: game.away_pitcher_id,
            is_final_context: home_present && away_present && w.is_some() && probables_present,
        });
    }

    let mut tx = store.begin().await?;
    for f in &rows {
        sqlx::query(
            r#"INSERT INTO game_context_features
               (game_date, game_id, park_hr_factor, park_runs_factor, park_hits_factor,
                temp_f, wind_mph, wind_dir, weather_hr_mult, weather_runs_mult, weather_final,
                umpire_name, ump_k_boost, ump_runs_env, home_lineup_confirmed,
                away_lineup_confirmed, day_night, home_probable_id, away_probable_id,
                is_final_context)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (game_date, game_id) DO UPDATE SET
                   park_hr_factor = excluded.park_hr_factor,
                   park_runs_factor = excluded.park_runs_factor,
                   park_hits_factor = excluded.park_hits_factor,
                   temp_f = excluded.temp_f,
                   wind_mph = excluded.wind_mph,
                   wind_dir = excluded.wind_dir,
                   weather_hr_mult = excluded.weather_hr_mult,
                   weather_runs_mult = excluded.weather_runs_mult,
                   weather_final = excluded.weather_final,
                   umpire_name = excluded.umpire_name,
                   ump_k_boost = excluded.ump_k_boost,
                   ump_runs_env = excluded.ump_runs_env,
                   home_lineup_confirmed = excluded.home_lineup_confirmed,
                   away_lineup_confirmed = excluded.away_lineup_confirmed,
                   day_night = excluded.day_night,
                   home_probable_id = excluded.home_probable_id,
                   away_probable_id = excluded.away_probable_id,
                   is_final_context = excluded.is_final_context"#,
        )
        .bind(f.game_date)
        .bind(f.game_id)
        .bind(f.park_hr_factor)
        .bind(f.park_runs_factor)
        .bind(f.park_hits_factor)
        .bind(f.temp_f)
        .bind(f.wind_mph)
        .bind(&f.wind_dir)
        .bind(f.weather_hr_mult)
        .bind(f.weather_runs_mult)
        .bind(f.weather_final)
        .bind(&f.umpire_name)
        .bind(f.ump_k_boost)
        .bind(f.ump_runs_env)
        .bind(f.home_lineup_confirmed)
        .bind(f.away_lineup_confirmed)
        .bind(&f.day_night)
        .bind(f.home_probable_id)
        .bind(f.away_probable_id)
        .bind(f.is_final_context)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    report.rows_written = rows.len();
    tracing::info!(
        "Game context: {} row(s) for {} ({} missing input(s))",
        report.rows_written, date, report.missing_inputs.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weather_multipliers_follow_documented_formulas() {
        // Neutral day.
        let (hr, runs) = weather_multipliers(70.0, 0.0, "cross");
        assert!((hr - 1.0).abs() < 1e-9);
        assert!((runs - 1.0).abs() < 1e-9);

        // Hot with wind blowing out; the temp factor caps at 1.15.
        let (hr, runs) = weather_multipliers(90.0, 10.0, "out");
        assert!((hr - 1.15 * 1.15).abs() < 1e-9);
        assert!(runs > 1.0 && runs < hr);

        // Cold with wind blowing in: suppressed but clamped.
        let (hr, _) = weather_multipliers(40.0, 20.0, "in");
        assert!((hr - 0.85 * 0.80).abs() < 1e-9);
    }
}
