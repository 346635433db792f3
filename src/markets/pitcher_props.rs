//! Pitcher prop models: K and OUTS_RECORDED. The population is the probable
//! starters on both sides of every game.

use anyhow::Result;
use async_trait::async_trait;

use crate::markets::batter_props::opt_factor;
use crate::markets::engine::{flags, over_probability};
use crate::markets::spec::{spec_for, MarketSpec};
use crate::markets::{composite_and_finalize_sides, MarketModel, ScoredSelection, Slate};
use crate::models::{Game, GameContextFeatures, PitcherDailyFeatures, TeamDailyFeatures};

struct PitcherSlot<'a> {
    game: &'a Game,
    ctx: Option<&'a GameContextFeatures>,
    pitcher_id: i64,
    features: Option<&'a PitcherDailyFeatures>,
    opp_team: Option<&'a TeamDailyFeatures>,
    opp_lineup_confirmed: bool,
}

fn pitcher_slots<'a>(slate: &'a Slate) -> Vec<PitcherSlot<'a>> {
    let mut out = Vec::new();
    for game in &slate.games {
        if game.status == "cancelled" {
            continue;
        }
        let ctx = slate.context.get(&game.game_id);
        let sides = [
            (game.home_pitcher_id, &game.away_team, ctx.map(|c| c.away_lineup_confirmed)),
            (game.away_pitcher_id, &game.home_team, ctx.map(|c| c.home_lineup_confirmed)),
        ];
        for (pitcher_id, opp_team, opp_confirmed) in sides {
            let Some(pitcher_id) = pitcher_id else { continue };
            out.push(PitcherSlot {
                game,
                ctx,
                pitcher_id,
                features: slate.pitcher_features.get(&pitcher_id),
                opp_team: slate.team_features.get(opp_team.as_str()),
                opp_lineup_confirmed: opp_confirmed.unwrap_or(false),
            });
        }
    }
    out
}

/// Expected batters faced, from recent workload and role confidence. The
/// 1.38 factor is league BF per out for starters.
fn expected_bf(f: &PitcherDailyFeatures) -> Option<f64> {
    let outs = f.outs_recorded_avg_last_5?;
    Some(outs * 1.38 * (0.6 + 0.4 * f.starter_role_confidence))
}

// ── K ─────────────────────────────────────────────────────────────────────────

pub struct StrikeoutModel;

#[async_trait]
impl MarketModel for StrikeoutModel {
    fn spec(&self) -> &'static MarketSpec {
        spec_for("K").expect("K spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let mut out = Vec::new();
        for slot in pitcher_slots(slate) {
            let mut risk_flags = Vec::new();
            if !slot.opp_lineup_confirmed {
                risk_flags.push(flags::LINEUP_PENDING.to_string());
            }
            let f = slot.features;
            let entity = format!("player:{}", slot.pitcher_id);
            let line = slate
                .quote_for("K", &entity, "OVER")
                .and_then(|q| q.line)
                .unwrap_or(5.5);

            let blended_k = f.and_then(|f| match (f.k_pct_30, f.k_pct_14) {
                (Some(k30), Some(k14)) => Some(0.6 * k30 + 0.4 * k14),
                (Some(k30), None) => Some(k30),
                (None, Some(k14)) => Some(k14),
                _ => None,
            });
            let ump_boost = slot.ctx.and_then(|c| c.ump_k_boost).unwrap_or(1.0);
            let projection = match (blended_k, f.and_then(expected_bf)) {
                (Some(k), Some(bf)) => Some(k * bf * ump_boost),
                _ => None,
            };

            let factors = vec![
                opt_factor("k_rate", blended_k, 0.15, 0.35, 0.25, &mut risk_flags),
                opt_factor(
                    "whiff_rate",
                    f.and_then(|f| f.whiff_rate_14.or(f.whiff_rate_30)),
                    0.18,
                    0.38,
                    0.15,
                    &mut risk_flags,
                ),
                // A strikeout-prone opposing offense raises the ceiling.
                opt_factor(
                    "opp_k_rate",
                    slot.opp_team.and_then(|t| t.off_k_rate_30),
                    0.17,
                    0.28,
                    0.20,
                    &mut risk_flags,
                ),
                opt_factor(
                    "role_confidence",
                    f.map(|f| f.starter_role_confidence),
                    0.30,
                    1.0,
                    0.12,
                    &mut risk_flags,
                ),
                opt_factor(
                    "ump_k_env",
                    slot.ctx.and_then(|c| c.ump_k_boost),
                    0.94,
                    1.06,
                    0.05,
                    &mut risk_flags,
                ),
                opt_factor(
                    "proj_vs_line",
                    projection.map(|p| over_probability(p, line, 1.9)),
                    0.0,
                    1.0,
                    0.23,
                    &mut risk_flags,
                ),
            ];

            out.extend(composite_and_finalize_sides(
                spec,
                slate,
                slot.game.game_id,
                entity,
                Some(line),
                projection,
                factors,
                risk_flags,
                slot.opp_lineup_confirmed,
                slot.ctx.map(|c| c.weather_final).unwrap_or(false),
            ));
        }
        Ok(out)
    }
}

// ── OUTS_RECORDED ─────────────────────────────────────────────────────────────

pub struct OutsRecordedModel;

#[async_trait]
impl MarketModel for OutsRecordedModel {
    fn spec(&self) -> &'static MarketSpec {
        spec_for("OUTS_RECORDED").expect("OUTS_RECORDED spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let mut out = Vec::new();
        for slot in pitcher_slots(slate) {
            let mut risk_flags = Vec::new();
            let f = slot.features;
            let entity = format!("player:{}", slot.pitcher_id);
            let line = slate
                .quote_for("OUTS_RECORDED", &entity, "OVER")
                .and_then(|q| q.line)
                .unwrap_or(16.5);

            // A walk-prone start ends early; each point of BB% above 8 costs
            // about half a percent of expected length.
            let projection = f.and_then(|f| {
                let outs = f.outs_recorded_avg_last_5?;
                let bb_penalty = f.bb_pct_30.map(|bb| 1.0 - (bb - 0.08).max(0.0) * 0.5).unwrap_or(1.0);
                Some(outs * (0.75 + 0.25 * f.starter_role_confidence) * bb_penalty)
            });

            let factors = vec![
                opt_factor(
                    "role_confidence",
                    f.map(|f| f.starter_role_confidence),
                    0.30,
                    1.0,
                    0.28,
                    &mut risk_flags,
                ),
                opt_factor(
                    "recent_pitch_count",
                    f.and_then(|f| f.pitches_avg_last_5),
                    70.0,
                    100.0,
                    0.18,
                    &mut risk_flags,
                ),
                // Reversed bounds: fewer walks means deeper starts.
                opt_factor(
                    "bb_suppression",
                    f.and_then(|f| f.bb_pct_30),
                    0.12,
                    0.04,
                    0.18,
                    &mut risk_flags,
                ),
                opt_factor(
                    "opp_obp_pressure",
                    slot.opp_team.and_then(|t| t.off_obp_30),
                    0.36,
                    0.28,
                    0.12,
                    &mut risk_flags,
                ),
                opt_factor(
                    "tto_endurance",
                    f.and_then(|f| f.tto_endurance_score).map(|s| s / 100.0),
                    0.0,
                    1.0,
                    0.06,
                    &mut risk_flags,
                ),
                opt_factor(
                    "proj_vs_line",
                    projection.map(|p| over_probability(p, line, 3.2)),
                    0.0,
                    1.0,
                    0.18,
                    &mut risk_flags,
                ),
            ];

            out.extend(composite_and_finalize_sides(
                spec,
                slate,
                slot.game.game_id,
                entity,
                Some(line),
                projection,
                factors,
                risk_flags,
                slot.opp_lineup_confirmed,
                slot.ctx.map(|c| c.weather_final).unwrap_or(false),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_bf_scales_with_role_confidence() {
        let mut f = PitcherDailyFeatures {
            outs_recorded_avg_last_5: Some(18.0),
            starter_role_confidence: 1.0,
            ..Default::default()
        };
        assert!((expected_bf(&f).unwrap() - 18.0 * 1.38).abs() < 1e-9);

        f.starter_role_confidence = 0.0;
        assert!((expected_bf(&f).unwrap() - 18.0 * 1.38 * 0.6).abs() < 1e-9);

        f.outs_recorded_avg_last_5 = None;
        assert_eq!(expected_bf(&f), None);
    }
}
