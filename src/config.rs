use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use anyhow::Result;
use serde::Deserialize;

/// Which odds row counts as "the close" when computing CLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClvPolicy {
    /// Latest pregame snapshot from the bet's own sportsbook.
    LatestPregame,
    /// The row flagged best-available across books at close.
    BestAvailable,
}

impl FromStr for ClvPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "latest_pregame" => Ok(ClvPolicy::LatestPregame),
            "best_available" => Ok(ClvPolicy::BestAvailable),
            other => anyhow::bail!("unknown CLV_POLICY '{other}' (expected latest_pregame or best_available)"),
        }
    }
}

/// Per-market alert filter, parsed from `ALERT_THRESHOLDS_JSON`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertThreshold {
    #[serde(default = "default_alert_signals")]
    pub signals: Vec<String>,
    #[serde(default = "default_alert_min_score")]
    pub min_score: f64,
    #[serde(default = "default_alert_max_rows")]
    pub max_rows: usize,
}

fn default_alert_signals() -> Vec<String> {
    vec!["BET".to_string()]
}

fn default_alert_min_score() -> f64 {
    70.0
}

fn default_alert_max_rows() -> usize {
    10
}

impl Default for AlertThreshold {
    fn default() -> Self {
        Self {
            signals: default_alert_signals(),
            min_score: default_alert_min_score(),
            max_rows: default_alert_max_rows(),
        }
    }
}

/// Immutable process configuration, read once from the environment and
/// passed down. No global mutable state anywhere else.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub stats_api_base: String,
    pub events_api_base: String,
    pub weather_api_base: String,
    pub odds_api_base: String,
    pub odds_api_key: Option<String>,
    pub weather_api_key: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub alert_thresholds: HashMap<String, AlertThreshold>,
    pub clv_policy: ClvPolicy,
    pub backfill_workers: usize,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("DUGOUT_DATABASE_URL"))
            .unwrap_or_else(|_| "sqlite:data/dugout.db".to_string());

        let alert_thresholds = match env::var("ALERT_THRESHOLDS_JSON") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("ALERT_THRESHOLDS_JSON is not valid JSON: {e}"))?,
            Err(_) => HashMap::new(),
        };

        let clv_policy = match env::var("CLV_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => ClvPolicy::LatestPregame,
        };

        let backfill_workers = match env::var("BACKFILL_WORKERS") {
            Ok(raw) => raw.parse::<usize>()
                .map_err(|_| anyhow::anyhow!("BACKFILL_WORKERS must be a positive integer"))?,
            Err(_) => 4,
        };

        let cfg = Self {
            database_url,
            stats_api_base: env::var("STATS_API_BASE")
                .unwrap_or_else(|_| "https://statsapi.mlb.com/api/v1".to_string()),
            events_api_base: env::var("EVENTS_API_BASE")
                .unwrap_or_else(|_| "https://baseballsavant.mlb.com/statcast_search/csv".to_string()),
            weather_api_base: env::var("WEATHER_API_BASE")
                .unwrap_or_else(|_| "https://api.ballparkweather.io/v1".to_string()),
            odds_api_base: env::var("ODDS_API_BASE")
                .unwrap_or_else(|_| "https://api.the-odds-api.com/v4".to_string()),
            odds_api_key: env::var("ODDS_API_KEY").ok(),
            weather_api_key: env::var("WEATHER_API_KEY").ok(),
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
            alert_thresholds,
            clv_policy,
            backfill_workers,
            http_timeout_secs: 30,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.backfill_workers == 0 || self.backfill_workers > 64 {
            anyhow::bail!("BACKFILL_WORKERS must be between 1 and 64");
        }
        for (market, t) in &self.alert_thresholds {
            if !(0.0..=100.0).contains(&t.min_score) {
                anyhow::bail!("alert threshold for {market}: min_score must be in [0, 100]");
            }
            if t.max_rows == 0 {
                anyhow::bail!("alert threshold for {market}: max_rows must be positive");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clv_policy_parses_both_variants() {
        assert_eq!("latest_pregame".parse::<ClvPolicy>().unwrap(), ClvPolicy::LatestPregame);
        assert_eq!("BEST_AVAILABLE".parse::<ClvPolicy>().unwrap(), ClvPolicy::BestAvailable);
        assert!("median".parse::<ClvPolicy>().is_err());
    }

    #[test]
    fn alert_thresholds_fill_defaults() {
        let parsed: HashMap<String, AlertThreshold> =
            serde_json::from_str(r#"{"HR": {"min_score": 80.0}}"#).unwrap();
        let hr = &parsed["HR"];
        assert_eq!(hr.signals, vec!["BET"]);
        assert_eq!(hr.min_score, 80.0);
        assert_eq!(hr.max_rows, 10);
    }
}
