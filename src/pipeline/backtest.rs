//! No-lookahead backtester. For each date it reconstructs the as-of view
//! (features keyed to the date, window stats strictly before it), runs the
//! scorer exactly as in live, joins realized outcomes, and emits a CSV plus
//! aggregate metrics.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::db::Store;
use crate::error::PipelineError;
use crate::grading::{profit_units, settle, Settlement};
use crate::markets;
use crate::models::MarketOutcome;
use crate::odds::american_to_decimal;

#[derive(Debug, Clone)]
pub struct BacktestOptions {
    pub market: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub signals: Option<Vec<String>>,
}

/// CSV row, columns in the documented order.
#[derive(Debug, Serialize)]
struct BacktestRow {
    game_date: NaiveDate,
    market: String,
    game_id: i64,
    selection_key: String,
    signal: String,
    model_score: f64,
    model_prob: Option<f64>,
    edge: Option<f64>,
    side: String,
    line: Option<f64>,
    open_odds: Option<i64>,
    open_implied_prob: Option<f64>,
    close_implied_prob: Option<f64>,
    clv: Option<f64>,
    outcome_value: f64,
    settlement: String,
    profit_units: f64,
    score_bucket: &'static str,
    prob_bucket: String,
}

fn score_bucket(score: f64) -> &'static str {
    if score < 50.0 {
        "<50"
    } else if score < 60.0 {
        "50-59"
    } else if score < 70.0 {
        "60-69"
    } else if score < 80.0 {
        "70-79"
    } else {
        "80+"
    }
}

fn prob_bucket(prob: Option<f64>) -> String {
    match prob {
        Some(p) => {
            let lo = (p.clamp(0.0, 0.999) * 10.0).floor() / 10.0;
            format!("{:.1}-{:.1}", lo, lo + 0.1)
        }
        None => "n/a".to_string(),
    }
}

/// Hard no-lookahead assertion: an outcome for this date or later that
/// claims settlement at or before the start of the date can only exist
/// through contamination; legitimately graded rows settle after game end.
pub async fn guard_no_lookahead(store: &Store, date: NaiveDate) -> Result<()> {
    let start_of_day = date.and_hms_opt(0, 0, 0).expect("valid midnight").and_utc();
    let poisoned: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM market_outcomes WHERE game_date >= ? AND settled_at <= ?",
    )
    .bind(date)
    .bind(start_of_day)
    .fetch_one(store.pool())
    .await?;
    if poisoned > 0 {
        return Err(PipelineError::invariant(format!(
            "{poisoned} outcome row(s) for game_date >= {date} settled before the scoring instant"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct BacktestSummary {
    pub rows: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub win_rate: Option<f64>,
    pub roi: Option<f64>,
    pub total_profit: f64,
    pub calibration: Vec<(String, usize, f64, f64)>,
    pub factor_correlation: Vec<(String, f64)>,
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 3 {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

pub async fn run_backtest(
    store: &Store,
    opts: &BacktestOptions,
    csv_path: &str,
) -> Result<BacktestSummary> {
    anyhow::ensure!(opts.start <= opts.end, "start date must not be after end date");

    let mut rows: Vec<BacktestRow> = Vec::new();
    let mut factor_samples: HashMap<String, Vec<(f64, f64)>> = HashMap::new();

    let mut date = opts.start;
    while date <= opts.end {
        guard_no_lookahead(store, date).await?;
        markets::score_market(store, date, &opts.market, "backtest", None).await?;

        let scored = markets::active_scores(store, date, &opts.market).await?;
        let outcomes: HashMap<String, f64> = sqlx::query_as::<_, MarketOutcome>(
            "SELECT * FROM market_outcomes WHERE game_date = ? AND market = ?",
        )
        .bind(date)
        .bind(&opts.market)
        .fetch_all(store.pool())
        .await?
        .into_iter()
        .map(|o| (o.selection_key, o.outcome_value))
        .collect();
        let closes: HashMap<String, f64> = sqlx::query_as::<_, (String, f64)>(
            r#"SELECT selection_key, implied_prob FROM closing_lines WHERE game_date = ?"#,
        )
        .bind(date)
        .fetch_all(store.pool())
        .await?
        .into_iter()
        .collect();

        for row in scored {
            if let Some(filter) = &opts.signals {
                if !filter.iter().any(|s| s == &row.signal) {
                    continue;
                }
            }
            // A selection without an outcome remains ungraded; it simply
            // does not enter the report.
            let Some(&outcome_value) = outcomes.get(&row.selection_key) else { continue };

            let settlement = settle(&row.bet_type, row.line, outcome_value, false);
            let decimal = row.price_american.map(american_to_decimal).unwrap_or(1.91);
            let profit = profit_units(settlement, decimal, 1.0);

            let close_implied = closes.get(&row.selection_key).copied();
            let clv = match (row.book_implied_prob, close_implied) {
                (Some(open), Some(close)) => Some(open - close),
                _ => None,
            };

            if settlement != Settlement::Push {
                let factors: HashMap<String, f64> =
                    serde_json::from_str(&row.factors_json).unwrap_or_default();
                for (name, score) in factors {
                    factor_samples.entry(name).or_default().push((score, profit));
                }
            }

            rows.push(BacktestRow {
                game_date: date,
                market: row.market.clone(),
                game_id: row.game_id,
                selection_key: row.selection_key.clone(),
                signal: row.signal.clone(),
                model_score: row.model_score,
                model_prob: row.model_prob,
                edge: row.edge,
                side: row.bet_type.clone(),
                line: row.line,
                open_odds: row.price_american,
                open_implied_prob: row.book_implied_prob,
                close_implied_prob: close_implied,
                clv,
                outcome_value,
                settlement: settlement.as_str().to_string(),
                profit_units: profit,
                score_bucket: score_bucket(row.model_score),
                prob_bucket: prob_bucket(row.model_prob),
            });
        }
        date += Duration::days(1);
    }

    let mut writer = csv::Writer::from_path(csv_path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let summary = summarize(&rows, &factor_samples);
    tracing::info!(
        "Backtest {}: {} row(s), win rate {:?}, ROI {:?}, CSV at {}",
        opts.market, summary.rows, summary.win_rate, summary.roi, csv_path
    );
    Ok(summary)
}

fn summarize(
    rows: &[BacktestRow],
    factor_samples: &HashMap<String, Vec<(f64, f64)>>,
) -> BacktestSummary {
    let mut summary = BacktestSummary { rows: rows.len(), ..Default::default() };
    let mut prob_buckets: HashMap<String, (usize, f64, usize)> = HashMap::new();

    for row in rows {
        match row.settlement.as_str() {
            "win" => summary.wins += 1,
            "loss" => summary.losses += 1,
            "push" => summary.pushes += 1,
            _ => {}
        }
        summary.total_profit += row.profit_units;

        if let Some(p) = row.model_prob {
            if row.settlement == "win" || row.settlement == "loss" {
                let entry = prob_buckets.entry(row.prob_bucket.clone()).or_default();
                entry.0 += 1;
                entry.1 += p;
                if row.settlement == "win" {
                    entry.2 += 1;
                }
            }
        }
    }

    // Pushes are excluded from the win rate; ROI is per unit staked on
    // decided bets.
    let decided = summary.wins + summary.losses;
    if decided > 0 {
        summary.win_rate = Some(summary.wins as f64 / decided as f64);
        summary.roi = Some(summary.total_profit / decided as f64);
    }

    let mut calibration: Vec<(String, usize, f64, f64)> = prob_buckets
        .into_iter()
        .map(|(bucket, (n, prob_sum, wins))| {
            (bucket, n, prob_sum / n as f64, wins as f64 / n as f64)
        })
        .collect();
    calibration.sort_by(|a, b| a.0.cmp(&b.0));
    summary.calibration = calibration;

    let mut correlation: Vec<(String, f64)> = factor_samples
        .iter()
        .filter_map(|(name, samples)| {
            let (xs, ys): (Vec<f64>, Vec<f64>) = samples.iter().copied().unzip();
            pearson(&xs, &ys).map(|r| (name.clone(), r))
        })
        .collect();
    correlation.sort_by(|a, b| {
        b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(std::cmp::Ordering::Equal)
    });
    summary.factor_correlation = correlation;

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn buckets_match_documented_edges() {
        assert_eq!(score_bucket(49.9), "<50");
        assert_eq!(score_bucket(50.0), "50-59");
        assert_eq!(score_bucket(69.9), "60-69");
        assert_eq!(score_bucket(79.9), "70-79");
        assert_eq!(score_bucket(80.0), "80+");
        assert_eq!(prob_bucket(Some(0.24)), "0.2-0.3");
        assert_eq!(prob_bucket(Some(1.0)), "0.9-1.0");
        assert_eq!(prob_bucket(None), "n/a");
    }

    #[test]
    fn pearson_detects_signal_and_rejects_degenerate_input() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&xs, &ys).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
    }

    #[tokio::test]
    async fn injected_same_day_outcome_aborts_the_run() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();

        // Clean store passes.
        guard_no_lookahead(&store, date).await.unwrap();

        // Outcome dated D, settled at the start of D: lookahead poison.
        sqlx::query(
            r#"INSERT INTO market_outcomes
               (market, game_id, game_date, entity, bet_type, line, selection_key, outcome_value, settled_at)
               VALUES ('K', 776123, ?, 'player:477132', 'OVER', 6.5, 'K|player:477132|line:6.5|OVER', 7.0, ?)"#,
        )
        .bind(date)
        .bind(Utc.with_ymd_and_hms(2024, 7, 4, 0, 0, 0).unwrap())
        .execute(store.pool())
        .await
        .unwrap();

        let err = guard_no_lookahead(&store, date).await.unwrap_err();
        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(pipeline_err, PipelineError::Invariant(_)));

        // A legitimately graded outcome (settled after game end) passes.
        sqlx::query("DELETE FROM market_outcomes").execute(store.pool()).await.unwrap();
        sqlx::query(
            r#"INSERT INTO market_outcomes
               (market, game_id, game_date, entity, bet_type, line, selection_key, outcome_value, settled_at)
               VALUES ('K', 776123, ?, 'player:477132', 'OVER', 6.5, 'K|player:477132|line:6.5|OVER', 7.0, ?)"#,
        )
        .bind(date)
        .bind(Utc.with_ymd_and_hms(2024, 7, 4, 22, 30, 0).unwrap())
        .execute(store.pool())
        .await
        .unwrap();
        guard_no_lookahead(&store, date).await.unwrap();
    }
}
