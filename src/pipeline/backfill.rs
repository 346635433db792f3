//! Historical backfill. Phase 1 walks the span sequentially in 60-day bulk
//! chunks, persisting raw events, schedules, and window stats; Phase 2 fans
//! dates out to a bounded worker pool for features, scoring, and grading.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::db::Store;
use crate::features;
use crate::fetchers::{pitch_events, schedule, Http};
use crate::grading;
use crate::markets;

/// Bulk event buffers are chunked so the full span is never materialized.
const BULK_CHUNK_DAYS: i64 = 60;

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub build_features: bool,
    pub markets: Vec<String>,
    pub grade: bool,
    pub no_bulk: bool,
    pub workers: usize,
}

fn dates(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut d = start;
    while d <= end {
        out.push(d);
        d += Duration::days(1);
    }
    out
}

/// Exit-code severity order: hard failure beats partial beats clean.
fn worst(a: i32, b: i32) -> i32 {
    let rank = |c: i32| match c {
        1 => 2,
        2 => 1,
        _ => 0,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

async fn phase_one(
    store: &Store,
    config: &Config,
    http: &Http,
    opts: &BackfillOptions,
) -> Result<()> {
    let mut chunk_start = opts.start;
    while chunk_start <= opts.end {
        let chunk_end = (chunk_start + Duration::days(BULK_CHUNK_DAYS - 1)).min(opts.end);
        tracing::info!("Backfill phase 1: chunk {} .. {}", chunk_start, chunk_end);

        if !opts.no_bulk {
            // One bulk pull per chunk; the buffer is dropped before the next
            // chunk loads.
            let events =
                pitch_events::bulk(http, &config.events_api_base, chunk_start, chunk_end).await?;
            tracing::info!("Backfill: {} event(s) in chunk", events.len());
            pitch_events::upsert_events(store, &events).await?;
        }

        for date in dates(chunk_start, chunk_end) {
            if opts.no_bulk {
                match pitch_events::per_day(http, &config.events_api_base, date).await {
                    Ok(events) => {
                        pitch_events::upsert_events(store, &events).await?;
                    }
                    Err(e) => tracing::warn!("Backfill: events for {} degraded: {}", date, e),
                }
            }
            match schedule::fetch_schedule(http, &config.stats_api_base, date).await {
                Ok(games) => {
                    schedule::upsert_games(store, &games).await?;
                }
                Err(e) => tracing::warn!("Backfill: schedule for {} degraded: {}", date, e),
            }
            features::batter::build_window_stats(store, date).await?;
            features::pitcher::build_window_stats(store, date).await?;
        }

        chunk_start = chunk_end + Duration::days(1);
    }
    Ok(())
}

async fn process_date(
    store: Store,
    config: Config,
    date: NaiveDate,
    build_features: bool,
    market_codes: Vec<String>,
    grade: bool,
) -> Result<bool> {
    let mut partial = false;
    if build_features {
        let report = features::build_all(&store, date).await?;
        partial = partial || !report.missing_inputs.is_empty();
    }
    for code in &market_codes {
        let summary = markets::score_market(&store, date, code, "backfill", None).await?;
        partial = partial || summary.risk_flagged || summary.skipped;
    }
    if grade {
        let summary = grading::grade_date(&store, &config, date).await?;
        partial = partial || summary.games_skipped > 0;
    }
    Ok(partial)
}

/// Returns the process exit code: the worst of any worker's outcome.
pub async fn run_backfill(
    store: &Store,
    config: &Config,
    http: &Http,
    opts: BackfillOptions,
) -> Result<i32> {
    anyhow::ensure!(opts.start <= opts.end, "start date must not be after end date");

    phase_one(store, config, http, &opts).await?;

    if !opts.build_features && opts.markets.is_empty() && !opts.grade {
        return Ok(0);
    }

    tracing::info!("Backfill phase 2: {} worker(s)", opts.workers);
    let semaphore = Arc::new(Semaphore::new(opts.workers));
    let mut set = JoinSet::new();
    for date in dates(opts.start, opts.end) {
        let semaphore = semaphore.clone();
        let store = store.clone();
        let config = config.clone();
        let markets = opts.markets.clone();
        let build_features = opts.build_features;
        let grade = opts.grade;
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore open");
            (date, process_date(store, config, date, build_features, markets, grade).await)
        });
    }

    let mut code = 0i32;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((date, Ok(partial))) => {
                if partial {
                    code = worst(code, 2);
                }
                tracing::debug!("Backfill: {} done (partial={})", date, partial);
            }
            Ok((date, Err(e))) => {
                // One bad date does not poison the pool.
                tracing::error!("Backfill: {} failed: {}", date, e);
                code = worst(code, 1);
            }
            Err(join_err) => {
                tracing::error!("Backfill worker panicked: {}", join_err);
                code = worst(code, 1);
            }
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_orders_hard_failure_over_partial_over_clean() {
        assert_eq!(worst(0, 2), 2);
        assert_eq!(worst(2, 1), 1);
        assert_eq!(worst(1, 2), 1);
        assert_eq!(worst(0, 0), 0);
    }

    #[test]
    fn date_spans_are_inclusive() {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 3).unwrap();
        assert_eq!(dates(start, end).len(), 3);
        assert_eq!(dates(start, start).len(), 1);
    }
}
