//! Shared scoring utilities. Every factor lands on a common 0-100 scale with
//! 50 as neutral; composites are clamped weighted sums over that scale.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::markets::spec::{EdgeMethod, SignalThresholds};

// ── Factor scoring ────────────────────────────────────────────────────────────

/// Linear map of `x` from `[lo, hi]` onto `[0, 100]`, clamped. Reversed
/// bounds (`lo > hi`) invert the sense, for inputs where smaller is better.
pub fn factor_score_linear(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0)
}

/// Hot/cold scoring against the player's own baseline, so a high-baseline
/// player is not penalized for stable production.
pub fn factor_score_relative_slope(
    delta: f64,
    baseline: f64,
    floor: f64,
    scale: f64,
    lo_cap: f64,
    hi_cap: f64,
) -> f64 {
    (50.0 + delta / baseline.max(floor) * scale).clamp(lo_cap, hi_cap)
}

/// Platoon split centered on the average of the two splits.
pub fn platoon_advantage(split_rate: f64, other_rate: f64) -> f64 {
    let avg = (split_rate + other_rate) / 2.0;
    if avg <= 0.0 {
        return 50.0;
    }
    (50.0 + (split_rate - avg) / avg * 150.0).clamp(20.0, 80.0)
}

/// Percentile rank of `x` within a same-date reference population.
pub fn percentile_score(values: &[f64], x: f64) -> f64 {
    if values.is_empty() {
        return 50.0;
    }
    let below = values.iter().filter(|&&v| v < x).count();
    let equal = values.iter().filter(|&&v| (v - x).abs() < f64::EPSILON).count();
    (below as f64 + equal as f64 / 2.0) / values.len() as f64 * 100.0
}

/// P(realized > line) for a projection, under a normal around the projection.
pub fn over_probability(projection: f64, line: f64, sigma: f64) -> f64 {
    let dist = Normal::new(projection, sigma.max(1e-6)).expect("valid normal");
    1.0 - dist.cdf(line)
}

// ── Composite ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Factor {
    pub name: &'static str,
    pub score: f64,
    pub weight: f64,
}

impl Factor {
    pub fn new(name: &'static str, score: f64, weight: f64) -> Self {
        Self { name, score, weight }
    }
}

/// Clamped weighted sum over the neutral-50 scale. Weights are renormalized
/// so a model may drop a factor without rebalancing the rest.
pub fn composite(factors: &[Factor]) -> f64 {
    let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
    if total_weight <= 0.0 {
        return 50.0;
    }
    let sum: f64 = factors.iter().map(|f| f.score * f.weight).sum();
    (sum / total_weight).clamp(0.0, 100.0)
}

/// Top-K factor contributions phrased as short tags, strongest departure
/// from neutral first: `barrel_rate:+24`, `opp_k_suppression:-18`.
pub fn build_reasons(factors: &[Factor], k: usize) -> Vec<String> {
    let mut ranked: Vec<&Factor> = factors.iter().collect();
    ranked.sort_by(|a, b| {
        let da = (a.score - 50.0).abs() * a.weight;
        let db = (b.score - 50.0).abs() * b.weight;
        db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
        .into_iter()
        .take(k)
        .map(|f| format!("{}:{:+.0}", f.name, f.score - 50.0))
        .collect()
}

// ── Edge ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeResult {
    pub edge_pct: Option<f64>,
    pub line_zero: bool,
}

/// Signed percent edge. Probability markets: (model - implied) * 100.
/// Projection markets: (projection - line) / |line| * 100, undefined at
/// line = 0. Hybrid prefers the probability form when both are available.
pub fn compute_edge(
    method: EdgeMethod,
    model_prob: Option<f64>,
    projection: Option<f64>,
    implied_prob: Option<f64>,
    line: Option<f64>,
) -> EdgeResult {
    let prob_edge = match (model_prob, implied_prob) {
        (Some(p), Some(i)) => Some((p - i) * 100.0),
        _ => None,
    };
    let (proj_edge, line_zero) = match (projection, line) {
        (Some(proj), Some(l)) => {
            if l == 0.0 {
                (None, true)
            } else {
                (Some((proj - l) / l.abs() * 100.0), false)
            }
        }
        _ => (None, false),
    };
    let edge_pct = match method {
        EdgeMethod::ProbVsImplied => prob_edge,
        EdgeMethod::ProjectionVsLine => proj_edge,
        EdgeMethod::Hybrid => prob_edge.or(proj_edge),
    };
    EdgeResult { edge_pct, line_zero }
}

// ── Signal / confidence / tier ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Bet,
    Lean,
    Fade,
    Skip,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Bet => "BET",
            Signal::Lean => "LEAN",
            Signal::Fade => "FADE",
            Signal::Skip => "SKIP",
        }
    }
}

/// Two modes: score-only when no edge is available (thresholds applied to the
/// score alone), full mode requiring both score and edge to clear.
pub fn assign_signal(t: &SignalThresholds, model_score: f64, edge_pct: Option<f64>) -> Signal {
    match edge_pct {
        None => {
            if model_score >= t.bet_min_score {
                Signal::Bet
            } else if model_score >= t.lean_min_score {
                Signal::Lean
            } else if model_score <= t.fade_max_score {
                Signal::Fade
            } else {
                Signal::Skip
            }
        }
        Some(edge) => {
            if model_score >= t.bet_min_score && edge >= t.bet_min_edge {
                Signal::Bet
            } else if model_score >= t.lean_min_score && edge >= t.lean_min_edge {
                Signal::Lean
            } else if model_score <= t.fade_max_score && edge <= t.fade_max_edge {
                Signal::Fade
            } else {
                Signal::Skip
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "HIGH",
            ConfidenceBand::Medium => "MEDIUM",
            ConfidenceBand::Low => "LOW",
        }
    }

    pub fn degrade(self) -> Self {
        match self {
            ConfidenceBand::High => ConfidenceBand::Medium,
            _ => ConfidenceBand::Low,
        }
    }
}

/// Base band from the score, degraded by risk-flag count: two flags knock
/// HIGH down a step, three knock MEDIUM down as well.
pub fn confidence_band(model_score: f64, risk_flag_count: usize) -> ConfidenceBand {
    let mut band = if model_score >= 78.0 {
        ConfidenceBand::High
    } else if model_score >= 60.0 {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    };
    if risk_flag_count >= 2 && band == ConfidenceBand::High {
        band = ConfidenceBand::Medium;
    }
    if risk_flag_count >= 3 && band == ConfidenceBand::Medium {
        band = ConfidenceBand::Low;
    }
    band
}

pub fn visibility_tier(signal: Signal, band: ConfidenceBand) -> &'static str {
    if signal == Signal::Bet && band == ConfidenceBand::High {
        "FREE"
    } else {
        "PRO"
    }
}

// ── Risk flags ────────────────────────────────────────────────────────────────

pub mod flags {
    pub const LINEUP_PENDING: &str = "lineup_pending";
    pub const WEATHER_PENDING: &str = "weather_pending";
    pub const LINE_ZERO: &str = "logic:line_zero";

    pub fn missing(input: &str) -> String {
        format!("missing:{input}")
    }

    pub fn stale(input: &str) -> String {
        format!("stale:{input}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::spec::DEFAULT_THRESHOLDS;

    #[test]
    fn linear_factor_clamps_and_inverts() {
        assert_eq!(factor_score_linear(0.10, 0.04, 0.16), 50.0);
        assert_eq!(factor_score_linear(0.20, 0.04, 0.16), 100.0);
        assert_eq!(factor_score_linear(0.0, 0.04, 0.16), 0.0);
        // Reversed bounds: smaller input scores higher.
        assert!(factor_score_linear(0.16, 0.30, 0.15) > 90.0);
    }

    #[test]
    fn relative_slope_ignores_stable_high_baselines() {
        // Zero delta is neutral no matter the baseline.
        assert_eq!(factor_score_relative_slope(0.0, 0.300, 0.08, 120.0, 25.0, 75.0), 50.0);
        // A hot streak on a small baseline is capped.
        assert_eq!(factor_score_relative_slope(0.2, 0.05, 0.08, 120.0, 25.0, 75.0), 75.0);
    }

    #[test]
    fn platoon_advantage_centers_and_clamps() {
        assert_eq!(platoon_advantage(0.2, 0.2), 50.0);
        assert!(platoon_advantage(0.3, 0.2) > 50.0);
        assert_eq!(platoon_advantage(1.0, 0.0), 80.0);
        assert_eq!(platoon_advantage(0.0, 0.0), 50.0);
    }

    #[test]
    fn percentile_handles_edges() {
        let pop = [1.0, 2.0, 3.0, 4.0];
        assert!(percentile_score(&pop, 5.0) > 99.0);
        assert!(percentile_score(&pop, 0.5) < 1.0);
        assert_eq!(percentile_score(&[], 1.0), 50.0);
    }

    #[test]
    fn over_probability_is_half_at_the_line() {
        assert!((over_probability(6.5, 6.5, 1.9) - 0.5).abs() < 1e-9);
        assert!(over_probability(8.0, 6.5, 1.9) > 0.5);
        assert!(over_probability(5.0, 6.5, 1.9) < 0.5);
    }

    #[test]
    fn composite_renormalizes_weights() {
        let factors = vec![Factor::new("a", 80.0, 0.5), Factor::new("b", 40.0, 0.5)];
        assert_eq!(composite(&factors), 60.0);
        let unbalanced = vec![Factor::new("a", 80.0, 0.2)];
        assert_eq!(composite(&unbalanced), 80.0);
        assert_eq!(composite(&[]), 50.0);
    }

    #[test]
    fn reasons_rank_by_weighted_departure_from_neutral() {
        let factors = vec![
            Factor::new("small", 55.0, 0.5),
            Factor::new("big", 80.0, 0.3),
            Factor::new("cold", 20.0, 0.2),
        ];
        let reasons = build_reasons(&factors, 2);
        assert_eq!(reasons, vec!["big:+30", "cold:-30"]);
    }

    #[test]
    fn edge_forms_follow_the_market_shape() {
        let prob = compute_edge(EdgeMethod::ProbVsImplied, Some(0.24), None, Some(0.238), None);
        assert!((prob.edge_pct.unwrap() - 0.2).abs() < 0.01);

        let proj = compute_edge(EdgeMethod::ProjectionVsLine, None, Some(5.4), None, Some(6.5));
        assert!((proj.edge_pct.unwrap() + 16.92).abs() < 0.01);

        let zero = compute_edge(EdgeMethod::ProjectionVsLine, None, Some(5.4), None, Some(0.0));
        assert_eq!(zero.edge_pct, None);
        assert!(zero.line_zero);

        let hybrid = compute_edge(EdgeMethod::Hybrid, Some(0.38), Some(5.4), Some(0.52), Some(6.5));
        assert!((hybrid.edge_pct.unwrap() + 14.0).abs() < 1e-9);
    }

    #[test]
    fn signal_full_mode_needs_both_score_and_edge() {
        let t = &DEFAULT_THRESHOLDS;
        // Strong score but hairline edge: SKIP in full mode, BET in
        // score-only mode.
        assert_eq!(assign_signal(t, 82.0, Some(0.2)), Signal::Skip);
        assert_eq!(assign_signal(t, 82.0, None), Signal::Bet);
        assert_eq!(assign_signal(t, 82.0, Some(6.0)), Signal::Bet);
        assert_eq!(assign_signal(t, 65.0, Some(3.0)), Signal::Lean);
        // Weak score with a deeply negative edge fades.
        assert_eq!(assign_signal(t, 34.0, Some(-14.0)), Signal::Fade);
        assert_eq!(assign_signal(t, 50.0, Some(1.0)), Signal::Skip);
    }

    #[test]
    fn confidence_band_degrades_with_risk_flags() {
        assert_eq!(confidence_band(85.0, 0), ConfidenceBand::High);
        assert_eq!(confidence_band(85.0, 2), ConfidenceBand::Medium);
        assert_eq!(confidence_band(85.0, 3), ConfidenceBand::Low);
        assert_eq!(confidence_band(65.0, 2), ConfidenceBand::Medium);
        assert_eq!(confidence_band(65.0, 3), ConfidenceBand::Low);
        // A base-LOW row with two flags has nowhere left to fall.
        assert_eq!(confidence_band(34.0, 2), ConfidenceBand::Low);
    }

    #[test]
    fn free_tier_needs_bet_and_high() {
        assert_eq!(visibility_tier(Signal::Bet, ConfidenceBand::High), "FREE");
        assert_eq!(visibility_tier(Signal::Bet, ConfidenceBand::Medium), "PRO");
        assert_eq!(visibility_tier(Signal::Lean, ConfidenceBand::High), "PRO");
    }
}
