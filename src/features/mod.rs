//! Feature store builders. All four share the no-lookahead invariant: for a
//! target `game_date` D, inputs are restricted to events strictly before D,
//! and a window of W days covers `[D - W, D)`, inclusive left, open right.

pub mod batter;
pub mod game_context;
pub mod pitcher;
pub mod team;

use anyhow::Result;
use chrono::{Datelike, NaiveDate};

use crate::db::Store;

pub const BATTER_WINDOWS: [i64; 3] = [7, 14, 30];
pub const PITCHER_WINDOWS: [i64; 2] = [14, 30];

/// Minimum sample below which windowed rates are stored as NULL, not zero.
pub const MIN_BATTER_PA: i64 = 10;
pub const MIN_PITCHER_BF: i64 = 20;
pub const MIN_SPLIT_PA: i64 = 10;

/// What a builder wrote and which inputs it could not find; the missing list
/// feeds risk-flag construction downstream.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub rows_written: usize,
    pub missing_inputs: Vec<String>,
}

impl BuildReport {
    pub fn merge(&mut self, other: BuildReport) {
        self.rows_written += other.rows_written;
        self.missing_inputs.extend(other.missing_inputs);
    }
}

/// NULL-aware rate: `None` unless the denominator clears the minimum sample.
pub fn rate(numerator: i64, denominator: i64, min_denominator: i64) -> Option<f64> {
    if denominator >= min_denominator && denominator > 0 {
        Some(numerator as f64 / denominator as f64)
    } else {
        None
    }
}

/// Mean over a summed quantity with the same minimum-sample contract.
pub fn mean(sum: f64, count: i64, min_count: i64) -> Option<f64> {
    if count >= min_count && count > 0 {
        Some(sum / count as f64)
    } else {
        None
    }
}

/// Opening day proxy: the season's events start no earlier than March 1.
pub fn season_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 3, 1).expect("valid season start")
}

/// Run all four builders for a date, in dependency-free order.
pub async fn build_all(store: &Store, date: NaiveDate) -> Result<BuildReport> {
    let mut report = BuildReport::default();
    report.merge(batter::build(store, date).await?);
    report.merge(pitcher::build(store, date).await?);
    report.merge(team::build(store, date).await?);
    report.merge(game_context::build(store, date).await?);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_nulls_below_minimum_sample() {
        assert_eq!(rate(3, 9, 10), None);
        assert_eq!(rate(3, 10, 10), Some(0.3));
        assert_eq!(rate(0, 0, 0), None);
    }

    #[test]
    fn season_start_is_march_first() {
        let d = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        assert_eq!(season_start(d), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
