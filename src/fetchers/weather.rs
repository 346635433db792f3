use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;

use crate::db::Store;
use crate::fetchers::{with_retry, Http};
use crate::models::{Game, WeatherRow};

// ── Point-forecast feed response ──────────────────────────────────────────────

/// Stadium point forecast. The provider resolves wind into a ballpark-relative
/// direction, so no park-orientation math happens here.
#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    pub temp_f: f64,
    pub wind_mph: f64,
    pub wind_dir: String, // "out" | "in" | "cross"
    pub condition: Option<String>,
    #[serde(default = "default_is_forecast")]
    pub is_forecast: bool,
}

fn default_is_forecast() -> bool {
    true
}

pub fn parse_forecast(resp: ForecastResponse, game: &Game) -> WeatherRow {
    WeatherRow {
        game_id: game.game_id,
        game_date: game.game_date,
        temp_f: resp.temp_f,
        wind_mph: resp.wind_mph,
        wind_dir: resp.wind_dir,
        condition: resp.condition,
        is_forecast: resp.is_forecast,
        fetched_at: Utc::now(),
    }
}

/// Fetch weather for every game on the date. A venue the provider cannot
/// serve yields no row; historical backfill treats that as a risk flag, not
/// an error.
pub async fn fetch_weather_for_games(
    http: &Http,
    base: &str,
    api_key: Option<&str>,
    games: &[Game],
) -> Result<Vec<WeatherRow>> {
    let Some(key) = api_key else {
        tracing::warn!("WEATHER_API_KEY not set; skipping weather fetch");
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for game in games {
        let Some(stadium_id) = game.stadium_id else { continue };
        let url = format!(
            "{base}/forecast?stadium_id={stadium_id}&date={}&apiKey={key}",
            game.game_date
        );
        match with_retry("weather fetch", || http.get_json::<ForecastResponse>(&url)).await {
            Ok(resp) => rows.push(parse_forecast(resp, game)),
            Err(e) => {
                tracing::warn!("Weather unavailable for game {}: {}", game.game_id, e);
            }
        }
    }
    Ok(rows)
}

pub async fn upsert_weather(store: &Store, rows: &[WeatherRow]) -> Result<usize> {
    let mut tx = store.begin().await?;
    for w in rows {
        sqlx::query(
            r#"INSERT INTO weather
               (game_id, game_date, temp_f, wind_mph, wind_dir, condition, is_forecast, fetched_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (game_id) DO UPDATE SET
                   temp_f = excluded.temp_f,
                   wind_mph = excluded.wind_mph,
                   wind_dir = excluded.wind_dir,
                   condition = excluded.condition,
                   is_forecast = excluded.is_forecast,
                   fetched_at = excluded.fetched_at"#,
        )
        .bind(w.game_id)
        .bind(w.game_date)
        .bind(w.temp_f)
        .bind(w.wind_mph)
        .bind(&w.wind_dir)
        .bind(&w.condition)
        .bind(w.is_forecast)
        .bind(w.fetched_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}
