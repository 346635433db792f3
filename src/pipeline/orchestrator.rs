use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

use crate::alerts;
use crate::config::Config;
use crate::db::{fail_run, finish_run, games_for_date, start_run, Store};
use crate::fetchers::{lineups, odds, pitch_events, rosters, schedule, umpires, weather, Http};
use crate::features;
use crate::grading;
use crate::markets::{self, spec};
use crate::pipeline::RunReport;

/// Fetch stage: schedule first (fatal when it fails, there is nothing to key
/// on), then the ancillary feeds, each of which degrades to a warning.
pub async fn run_fetch_stage(
    store: &Store,
    config: &Config,
    http: &Http,
    date: NaiveDate,
) -> Result<bool> {
    let run_id = start_run(store, "fetch", None, date, "daily").await?;
    let mut partial = false;

    let games = match schedule::fetch_schedule(http, &config.stats_api_base, date).await {
        Ok(games) => games,
        Err(e) => {
            fail_run(store, &run_id, &e.to_string()).await?;
            return Err(e);
        }
    };
    schedule::upsert_games(store, &games).await?;

    match rosters::fetch_all_rosters(http, &config.stats_api_base, date).await {
        Ok(entries) => {
            rosters::upsert_rosters(store, &entries).await?;
        }
        Err(e) => {
            tracing::warn!("Roster fetch degraded: {}", e);
            partial = true;
        }
    }

    match lineups::fetch_lineups(http, &config.stats_api_base, date).await {
        Ok(snapshots) => {
            lineups::upsert_lineups(store, date, &snapshots).await?;
        }
        Err(e) => {
            tracing::warn!("Lineup fetch degraded: {}", e);
            partial = true;
        }
    }

    match umpires::fetch_assignments(http, &config.stats_api_base, date).await {
        Ok(assignments) => {
            umpires::apply_assignments(store, &assignments).await?;
        }
        Err(e) => {
            tracing::warn!("Umpire assignment fetch degraded: {}", e);
            partial = true;
        }
    }
    match umpires::fetch_profiles(http, &config.stats_api_base).await {
        Ok(profiles) => {
            umpires::upsert_profiles(store, &profiles).await?;
        }
        Err(e) => {
            tracing::warn!("Umpire profile fetch degraded: {}", e);
            partial = true;
        }
    }

    let db_games = games_for_date(store, date).await?;
    let weather_rows = weather::fetch_weather_for_games(
        http,
        &config.weather_api_base,
        config.weather_api_key.as_deref(),
        &db_games,
    )
    .await?;
    if weather_rows.len() < db_games.len() {
        partial = true;
    }
    weather::upsert_weather(store, &weather_rows).await?;

    match pitch_events::per_day(http, &config.events_api_base, date).await {
        Ok(events) => {
            pitch_events::upsert_events(store, &events).await?;
        }
        Err(e) => {
            tracing::warn!("Pitch event fetch degraded: {}", e);
            partial = true;
        }
    }

    if let Some(key) = &config.odds_api_key {
        if let Err(e) = odds::refresh_odds(http, store, &config.odds_api_base, key, date).await {
            tracing::warn!("Odds fetch degraded: {}", e);
            partial = true;
        }
    } else {
        tracing::warn!("ODDS_API_KEY not set; scoring will run in score-only mode");
        partial = true;
    }

    finish_run(store, &run_id, games.len() as i64, None).await?;
    Ok(partial)
}

pub async fn run_feature_stage(store: &Store, date: NaiveDate) -> Result<bool> {
    let run_id = start_run(store, "features", None, date, "daily").await?;
    match features::build_all(store, date).await {
        Ok(report) => {
            let metadata = serde_json::json!({ "missing": report.missing_inputs }).to_string();
            finish_run(store, &run_id, report.rows_written as i64, Some(&metadata)).await?;
            Ok(!report.missing_inputs.is_empty())
        }
        Err(e) => {
            fail_run(store, &run_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

pub async fn run_score_stage(
    store: &Store,
    config: &Config,
    date: NaiveDate,
    send_alerts: bool,
) -> Result<bool> {
    let summaries = markets::score_all(store, date, "daily").await?;
    let mut partial = false;
    for summary in &summaries {
        partial = partial || summary.risk_flagged || summary.skipped;
        if send_alerts && summary.rows_written > 0 {
            let rows = markets::active_scores(store, date, &summary.market).await?;
            alerts::maybe_send(config, date, &summary.market, &rows).await?;
        }
    }
    Ok(partial)
}

pub async fn run_grade_stage(store: &Store, config: &Config, date: NaiveDate) -> Result<bool> {
    let run_id = start_run(store, "grade", None, date, "daily").await?;
    match grading::grade_date(store, config, date).await {
        Ok(summary) => {
            finish_run(store, &run_id, summary.outcomes_written as i64, None).await?;
            Ok(summary.games_skipped > 0)
        }
        Err(e) => {
            fail_run(store, &run_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

/// The daily pipeline: fetchers -> features -> scoring -> grading.
pub async fn run_daily(
    store: &Store,
    config: &Config,
    http: &Http,
    date: NaiveDate,
    send_alerts: bool,
) -> Result<RunReport> {
    let mut report = RunReport::default();
    report.absorb(run_fetch_stage(store, config, http, date).await?);
    report.absorb(run_feature_stage(store, date).await?);
    report.absorb(run_score_stage(store, config, date, send_alerts).await?);
    report.absorb(run_grade_stage(store, config, date).await?);
    Ok(report)
}

/// Re-score lineup-sensitive markets for games whose active lineup arrived
/// after the market's last finished scoring pass.
pub async fn rescore_on_lineup(
    store: &Store,
    config: &Config,
    date: NaiveDate,
    send_alerts: bool,
) -> Result<RunReport> {
    let mut report = RunReport::default();
    for market_spec in spec::lineup_sensitive() {
        let last_scored: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"SELECT MAX(started_at) FROM score_runs
               WHERE run_type = 'score' AND market = ? AND game_date = ? AND status = 'finished'"#,
        )
        .bind(market_spec.code)
        .bind(date)
        .fetch_one(store.pool())
        .await?;

        let affected: Vec<i64> = match last_scored {
            Some(since) => sqlx::query_scalar(
                r#"SELECT DISTINCT game_id FROM lineups
                   WHERE game_date = ? AND active_version = 1 AND fetched_at > ?"#,
            )
            .bind(date)
            .bind(since)
            .fetch_all(store.pool())
            .await?,
            None => sqlx::query_scalar(
                "SELECT DISTINCT game_id FROM lineups WHERE game_date = ? AND active_version = 1",
            )
            .bind(date)
            .fetch_all(store.pool())
            .await?,
        };
        if affected.is_empty() {
            continue;
        }

        tracing::info!(
            "{}: lineup change on {} game(s); re-scoring",
            market_spec.code, affected.len()
        );
        let summary =
            markets::score_market(store, date, market_spec.code, "lineup", Some(&affected)).await?;
        report.absorb(summary.risk_flagged);
        if send_alerts && summary.rows_written > 0 {
            let rows = markets::active_scores(store, date, market_spec.code).await?;
            alerts::maybe_send(config, date, market_spec.code, &rows).await?;
        }
    }
    Ok(report)
}
