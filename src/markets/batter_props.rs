//! Batter prop models: HR, HITS_1P, HITS_LINE, TB_LINE. All four weight
//! contact quality, recent form, pitcher vulnerability on the relevant axis,
//! platoon fit, park/weather, and batting-order position.

use anyhow::Result;
use async_trait::async_trait;

use crate::markets::engine::{
    factor_score_linear, factor_score_relative_slope, flags, over_probability,
    platoon_advantage, Factor,
};
use crate::markets::spec::{spec_for, MarketSpec};
use crate::markets::{composite_and_finalize_sides, finalize, Draft, MarketModel, ScoredSelection, Slate};
use crate::models::{BatterDailyFeatures, Game, GameContextFeatures, PitcherDailyFeatures};

/// One batter's scoring context for a game.
pub(crate) struct BatterSlot<'a> {
    pub game: &'a Game,
    pub ctx: Option<&'a GameContextFeatures>,
    pub batter_id: i64,
    pub slot: i64,
    pub lineup_confirmed: bool,
    pub features: Option<&'a BatterDailyFeatures>,
    pub opp_pitcher: Option<&'a PitcherDailyFeatures>,
    pub opp_pitcher_throws: Option<&'a str>,
}

impl BatterSlot<'_> {
    /// Expected plate appearances from the batting-order slot.
    pub fn expected_pa(&self) -> f64 {
        4.7 - 0.13 * (self.slot - 1) as f64
    }
}

pub(crate) fn batter_slots<'a>(slate: &'a Slate) -> Vec<BatterSlot<'a>> {
    let mut out = Vec::new();
    for game in &slate.games {
        if game.status == "cancelled" {
            continue;
        }
        let ctx = slate.context.get(&game.game_id);
        let sides = [
            (&game.home_team, game.away_pitcher_id),
            (&game.away_team, game.home_pitcher_id),
        ];
        for (team, opp_pitcher_id) in sides {
            let (population, confirmed) = slate.batting_population(game.game_id, team);
            for (batter_id, slot) in population {
                out.push(BatterSlot {
                    game,
                    ctx,
                    batter_id,
                    slot,
                    lineup_confirmed: confirmed,
                    features: slate.batter_features.get(&batter_id),
                    opp_pitcher: opp_pitcher_id
                        .and_then(|id| slate.pitcher_features.get(&id)),
                    opp_pitcher_throws: opp_pitcher_id
                        .and_then(|id| slate.pitcher_hand.get(&id))
                        .map(|s| s.as_str()),
                });
            }
        }
    }
    out
}

/// Factor from an optional input: neutral 50 plus a missing flag when absent.
pub(crate) fn opt_factor(
    name: &'static str,
    value: Option<f64>,
    lo: f64,
    hi: f64,
    weight: f64,
    risk_flags: &mut Vec<String>,
) -> Factor {
    match value {
        Some(v) => Factor::new(name, factor_score_linear(v, lo, hi), weight),
        None => {
            risk_flags.push(flags::missing(name));
            Factor::new(name, 50.0, weight)
        }
    }
}

/// Platoon factor for the split facing the opposing pitcher's hand.
fn platoon_factor(
    name: &'static str,
    vs_l: Option<f64>,
    vs_r: Option<f64>,
    pitcher_throws: Option<&str>,
    weight: f64,
    risk_flags: &mut Vec<String>,
) -> Factor {
    match (pitcher_throws, vs_l, vs_r) {
        (Some("L"), Some(l), Some(r)) => Factor::new(name, platoon_advantage(l, r), weight),
        (Some(_), Some(l), Some(r)) => Factor::new(name, platoon_advantage(r, l), weight),
        _ => {
            risk_flags.push(flags::missing(name));
            Factor::new(name, 50.0, weight)
        }
    }
}

fn base_flags(spec: &MarketSpec, slot: &BatterSlot<'_>) -> (Vec<String>, bool) {
    let mut risk_flags = Vec::new();
    if !slot.lineup_confirmed {
        risk_flags.push(flags::LINEUP_PENDING.to_string());
    }
    let weather_final = slot.ctx.map(|c| c.weather_final).unwrap_or(false);
    if spec.weather_recommended && !weather_final {
        risk_flags.push(flags::WEATHER_PENDING.to_string());
    }
    (risk_flags, weather_final)
}

// ── HR ────────────────────────────────────────────────────────────────────────

pub struct HrModel;

#[async_trait]
impl MarketModel for HrModel {
    fn spec(&self) -> &'static MarketSpec {
        spec_for("HR").expect("HR spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let mut out = Vec::new();
        for slot in batter_slots(slate) {
            let (mut risk_flags, weather_final) = base_flags(spec, &slot);
            let f = slot.features;
            let park_weather = match slot.ctx {
                Some(c) => match (c.park_hr_factor, c.weather_hr_mult) {
                    (Some(p), Some(w)) => Some(p * w),
                    (Some(p), None) => Some(p),
                    _ => None,
                },
                None => None,
            };

            let mut factors = vec![
                opt_factor(
                    "barrel_rate",
                    f.and_then(|f| f.barrel_rate_14),
                    0.04,
                    0.16,
                    0.25,
                    &mut risk_flags,
                ),
                hot_cold_factor(
                    "iso_heat",
                    f.and_then(|f| f.iso_delta_7_30),
                    f.and_then(|f| f.iso_30),
                    0.15,
                    &mut risk_flags,
                ),
                opt_factor(
                    "pitcher_hr_vuln",
                    slot.opp_pitcher.and_then(|p| p.hr_per_9_30),
                    0.7,
                    2.0,
                    0.20,
                    &mut risk_flags,
                ),
                platoon_factor(
                    "platoon_iso",
                    f.and_then(|f| f.iso_vs_l),
                    f.and_then(|f| f.iso_vs_r),
                    slot.opp_pitcher_throws,
                    0.12,
                    &mut risk_flags,
                ),
                opt_factor("park_weather", park_weather, 0.85, 1.25, 0.18, &mut risk_flags),
            ];
            factors.push(Factor::new(
                "lineup_slot",
                factor_score_linear(slot.expected_pa(), 3.5, 4.7),
                0.10,
            ));

            out.push(finalize(
                spec,
                slate,
                Draft {
                    game_id: slot.game.game_id,
                    entity: format!("player:{}", slot.batter_id),
                    bet_type: "YES".to_string(),
                    line: None,
                    model_score: crate::markets::engine::composite(&factors),
                    model_projection: None,
                    factors,
                    risk_flags,
                    lineup_confirmed: slot.lineup_confirmed,
                    weather_final,
                    under_side: false,
                },
            ));
        }
        Ok(out)
    }
}

fn hot_cold_factor(
    name: &'static str,
    delta: Option<f64>,
    baseline: Option<f64>,
    weight: f64,
    risk_flags: &mut Vec<String>,
) -> Factor {
    match (delta, baseline) {
        (Some(d), Some(b)) => Factor::new(
            name,
            factor_score_relative_slope(d, b, 0.08, 120.0, 25.0, 75.0),
            weight,
        ),
        _ => {
            risk_flags.push(flags::missing(name));
            Factor::new(name, 50.0, weight)
        }
    }
}

// ── HITS_1P ───────────────────────────────────────────────────────────────────

pub struct HitsFirstPitchModel;

#[async_trait]
impl MarketModel for HitsFirstPitchModel {
    fn spec(&self) -> &'static MarketSpec {
        spec_for("HITS_1P").expect("HITS_1P spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let mut out = Vec::new();
        for slot in batter_slots(slate) {
            let (mut risk_flags, weather_final) = base_flags(spec, &slot);
            let f = slot.features;

            let mut factors = vec![
                opt_factor(
                    "hit_rate",
                    f.and_then(|f| f.hit_rate_14),
                    0.18,
                    0.34,
                    0.30,
                    &mut risk_flags,
                ),
                hot_cold_factor(
                    "hit_heat",
                    f.and_then(|f| f.hit_rate_delta_7_30),
                    f.and_then(|f| f.hit_rate_30),
                    0.12,
                    &mut risk_flags,
                ),
                // Reversed bounds: a high-strikeout opponent suppresses hits.
                opt_factor(
                    "opp_k_suppression",
                    slot.opp_pitcher.and_then(|p| p.k_pct_30),
                    0.32,
                    0.14,
                    0.20,
                    &mut risk_flags,
                ),
                platoon_factor(
                    "platoon_hit_rate",
                    f.and_then(|f| f.hit_rate_vs_l),
                    f.and_then(|f| f.hit_rate_vs_r),
                    slot.opp_pitcher_throws,
                    0.13,
                    &mut risk_flags,
                ),
                opt_factor(
                    "park_hits",
                    slot.ctx.and_then(|c| c.park_hits_factor),
                    0.92,
                    1.10,
                    0.10,
                    &mut risk_flags,
                ),
            ];
            factors.push(Factor::new(
                "lineup_slot",
                factor_score_linear(slot.expected_pa(), 3.5, 4.7),
                0.15,
            ));

            out.push(finalize(
                spec,
                slate,
                Draft {
                    game_id: slot.game.game_id,
                    entity: format!("player:{}", slot.batter_id),
                    bet_type: "YES".to_string(),
                    line: None,
                    model_score: crate::markets::engine::composite(&factors),
                    model_projection: None,
                    factors,
                    risk_flags,
                    lineup_confirmed: slot.lineup_confirmed,
                    weather_final,
                    under_side: false,
                },
            ));
        }
        Ok(out)
    }
}

// ── HITS_LINE ─────────────────────────────────────────────────────────────────

pub struct HitsLineModel;

#[async_trait]
impl MarketModel for HitsLineModel {
    fn spec(&self) -> &'static MarketSpec {
        spec_for("HITS_LINE").expect("HITS_LINE spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let mut out = Vec::new();
        for slot in batter_slots(slate) {
            let (mut risk_flags, weather_final) = base_flags(spec, &slot);
            let f = slot.features;
            let entity = format!("player:{}", slot.batter_id);
            let line = slate
                .quote_for("HITS_LINE", &entity, "OVER")
                .and_then(|q| q.line)
                .unwrap_or(1.5);

            let projection = f
                .and_then(|f| f.hit_rate_14.or(f.hit_rate_30))
                .map(|hr| hr * slot.expected_pa());

            let mut factors = vec![
                opt_factor(
                    "hit_rate",
                    f.and_then(|f| f.hit_rate_14),
                    0.18,
                    0.34,
                    0.25,
                    &mut risk_flags,
                ),
                opt_factor(
                    "opp_k_suppression",
                    slot.opp_pitcher.and_then(|p| p.k_pct_30),
                    0.32,
                    0.14,
                    0.18,
                    &mut risk_flags,
                ),
                platoon_factor(
                    "platoon_hit_rate",
                    f.and_then(|f| f.hit_rate_vs_l),
                    f.and_then(|f| f.hit_rate_vs_r),
                    slot.opp_pitcher_throws,
                    0.12,
                    &mut risk_flags,
                ),
                opt_factor(
                    "park_hits",
                    slot.ctx.and_then(|c| c.park_hits_factor),
                    0.92,
                    1.10,
                    0.10,
                    &mut risk_flags,
                ),
                opt_factor(
                    "proj_vs_line",
                    projection.map(|p| over_probability(p, line, 0.9)),
                    0.0,
                    1.0,
                    0.35,
                    &mut risk_flags,
                ),
            ];
            factors.push(Factor::new(
                "lineup_slot",
                factor_score_linear(slot.expected_pa(), 3.5, 4.7),
                0.08,
            ));

            out.extend(composite_and_finalize_sides(
                spec,
                slate,
                slot.game.game_id,
                entity,
                Some(line),
                projection,
                factors,
                risk_flags,
                slot.lineup_confirmed,
                weather_final,
            ));
        }
        Ok(out)
    }
}

// ── TB_LINE ───────────────────────────────────────────────────────────────────

pub struct TotalBasesModel;

#[async_trait]
impl MarketModel for TotalBasesModel {
    fn spec(&self) -> &'static MarketSpec {
        spec_for("TB_LINE").expect("TB_LINE spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let mut out = Vec::new();
        for slot in batter_slots(slate) {
            let (mut risk_flags, weather_final) = base_flags(spec, &slot);
            let f = slot.features;
            let entity = format!("player:{}", slot.batter_id);
            let line = slate
                .quote_for("TB_LINE", &entity, "OVER")
                .and_then(|q| q.line)
                .unwrap_or(1.5);

            let projection = f
                .and_then(|f| f.tb_per_pa_14.or(f.tb_per_pa_30))
                .map(|tb| tb * slot.expected_pa());
            let park_weather = slot.ctx.and_then(|c| {
                match (c.park_hr_factor, c.weather_hr_mult) {
                    (Some(p), Some(w)) => Some(p * w),
                    (Some(p), None) => Some(p),
                    _ => None,
                }
            });

            let mut factors = vec![
                opt_factor(
                    "power_rate",
                    f.and_then(|f| f.tb_per_pa_14),
                    0.30,
                    0.75,
                    0.22,
                    &mut risk_flags,
                ),
                hot_cold_factor(
                    "iso_heat",
                    f.and_then(|f| f.iso_delta_7_30),
                    f.and_then(|f| f.iso_30),
                    0.12,
                    &mut risk_flags,
                ),
                // Contact-quality axis of the opposing starter.
                opt_factor(
                    "pitcher_hard_hit_vuln",
                    slot.opp_pitcher.and_then(|p| p.hard_hit_rate_30),
                    0.30,
                    0.48,
                    0.16,
                    &mut risk_flags,
                ),
                platoon_factor(
                    "platoon_iso",
                    f.and_then(|f| f.iso_vs_l),
                    f.and_then(|f| f.iso_vs_r),
                    slot.opp_pitcher_throws,
                    0.10,
                    &mut risk_flags,
                ),
                opt_factor("park_weather", park_weather, 0.85, 1.25, 0.12, &mut risk_flags),
                opt_factor(
                    "proj_vs_line",
                    projection.map(|p| over_probability(p, line, 1.1)),
                    0.0,
                    1.0,
                    0.28,
                    &mut risk_flags,
                ),
            ];
            factors.push(Factor::new(
                "lineup_slot",
                factor_score_linear(slot.expected_pa(), 3.5, 4.7),
                0.08,
            ));

            out.extend(composite_and_finalize_sides(
                spec,
                slate,
                slot.game.game_id,
                entity,
                Some(line),
                projection,
                factors,
                risk_flags,
                slot.lineup_confirmed,
                weather_final,
            ));
        }
        Ok(out)
    }
}
