use anyhow::Result;
use chrono::NaiveDate;

use crate::config::Config;
use crate::models::ModelScoreRow;

/// Post top scored rows to the configured webhook. Absence of the webhook
/// variable suppresses alerts silently; delivery failures are logged, never
/// fatal.
pub async fn maybe_send(
    config: &Config,
    date: NaiveDate,
    market: &str,
    rows: &[ModelScoreRow],
) -> Result<bool> {
    let Some(url) = &config.alert_webhook_url else {
        return Ok(false);
    };

    let threshold = config.alert_thresholds.get(market).cloned().unwrap_or_default();
    let selected: Vec<&ModelScoreRow> = rows
        .iter()
        .filter(|r| threshold.signals.iter().any(|s| s == &r.signal))
        .filter(|r| r.model_score >= threshold.min_score)
        .take(threshold.max_rows)
        .collect();
    if selected.is_empty() {
        return Ok(false);
    }

    let payload = serde_json::json!({
        "date": date,
        "market": market,
        "selections": selected.iter().map(|r| serde_json::json!({
            "selection_key": r.selection_key,
            "signal": r.signal,
            "model_score": r.model_score,
            "edge": r.edge,
            "price_american": r.price_american,
            "confidence_band": r.confidence_band,
        })).collect::<Vec<_>>(),
        "dashboard_url": format!("https://dashboard.example.com/slate/{date}"),
    });

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;
    match client.post(url).json(&payload).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("Alert: {} row(s) sent for {} {}", selected.len(), market, date);
            Ok(true)
        }
        Ok(resp) => {
            tracing::warn!("Alert webhook returned HTTP {}", resp.status());
            Ok(false)
        }
        Err(e) => {
            tracing::warn!("Alert webhook delivery failed: {}", e);
            Ok(false)
        }
    }
}
