//! Game markets: ML, TOTAL, F5_ML, F5_TOTAL, TEAM_TOTAL. The F5 variants
//! share the full-game models with starter weight pushed up and bullpen
//! proxies nearly out.

use anyhow::Result;
use async_trait::async_trait;

use crate::markets::batter_props::opt_factor;
use crate::markets::engine::{composite, factor_score_linear, flags, over_probability, Factor};
use crate::markets::spec::{spec_for, MarketSpec};
use crate::markets::{
    composite_and_finalize_sides, finalize, Draft, MarketModel, ScoredSelection, Slate,
};
use crate::models::{Game, GameContextFeatures, PitcherDailyFeatures, TeamDailyFeatures};

const LEAGUE_RPG: f64 = 4.5;

struct GameSlot<'a> {
    game: &'a Game,
    ctx: Option<&'a GameContextFeatures>,
    home: Option<&'a TeamDailyFeatures>,
    away: Option<&'a TeamDailyFeatures>,
    home_sp: Option<&'a PitcherDailyFeatures>,
    away_sp: Option<&'a PitcherDailyFeatures>,
}

fn game_slots<'a>(slate: &'a Slate) -> Vec<GameSlot<'a>> {
    slate
        .games
        .iter()
        .filter(|g| g.status != "cancelled")
        .map(|game| GameSlot {
            game,
            ctx: slate.context.get(&game.game_id),
            home: slate.team_features.get(game.home_team.as_str()),
            away: slate.team_features.get(game.away_team.as_str()),
            home_sp: game.home_pitcher_id.and_then(|id| slate.pitcher_features.get(&id)),
            away_sp: game.away_pitcher_id.and_then(|id| slate.pitcher_features.get(&id)),
        })
        .collect()
}

fn diff(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    }
}

fn sum(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        _ => None,
    }
}

/// Expected runs for one side against the opposing pitching blend. `sp_share`
/// is the starter's share of the opposing innings (0.9 for F5 markets).
fn expected_team_runs(
    team: Option<&TeamDailyFeatures>,
    opp_sp: Option<&PitcherDailyFeatures>,
    opp_pen: Option<&TeamDailyFeatures>,
    sp_share: f64,
) -> f64 {
    let base = team.and_then(|t| t.runs_per_game_30).unwrap_or(LEAGUE_RPG);
    let sp_ra9 = opp_sp.and_then(|p| p.ra9_30).unwrap_or(LEAGUE_RPG);
    let pen_ra9 = opp_pen.and_then(|t| t.bullpen_ra9_14).unwrap_or(LEAGUE_RPG);
    let opp_pitch = sp_share * sp_ra9 + (1.0 - sp_share) * pen_ra9;
    0.55 * base + 0.45 * opp_pitch
}

fn env_mult(ctx: Option<&GameContextFeatures>) -> f64 {
    let park = ctx.and_then(|c| c.park_runs_factor).unwrap_or(1.0);
    let weather = ctx.and_then(|c| c.weather_runs_mult).unwrap_or(1.0);
    let ump = ctx.and_then(|c| c.ump_runs_env).unwrap_or(1.0);
    park * weather * ump
}

fn recent_form_swing(home: Option<&TeamDailyFeatures>, away: Option<&TeamDailyFeatures>) -> Option<f64> {
    let h = diff(home.and_then(|t| t.runs_per_game_14), home.and_then(|t| t.runs_per_game_30))?;
    let a = diff(away.and_then(|t| t.runs_per_game_14), away.and_then(|t| t.runs_per_game_30))?;
    Some(h - a)
}

// ── Moneyline (ML / F5_ML) ────────────────────────────────────────────────────

pub struct MoneylineModel {
    first_five: bool,
}

impl MoneylineModel {
    pub fn full_game() -> Self {
        Self { first_five: false }
    }

    pub fn first_five() -> Self {
        Self { first_five: true }
    }
}

#[async_trait]
impl MarketModel for MoneylineModel {
    fn spec(&self) -> &'static MarketSpec {
        let code = if self.first_five { "F5_ML" } else { "ML" };
        spec_for(code).expect("moneyline spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let (w_sp, w_off, w_pen, w_form, w_home) = if self.first_five {
            (0.40, 0.25, 0.03, 0.10, 0.22)
        } else {
            (0.30, 0.25, 0.15, 0.10, 0.20)
        };

        let mut out = Vec::new();
        for slot in game_slots(slate) {
            let mut risk_flags = Vec::new();
            let weather_final = slot.ctx.map(|c| c.weather_final).unwrap_or(false);
            let lineup_confirmed = slot
                .ctx
                .map(|c| c.home_lineup_confirmed && c.away_lineup_confirmed)
                .unwrap_or(false);

            let factors = vec![
                // Positive when the away starter is the leakier one.
                opt_factor(
                    "sp_edge",
                    diff(
                        slot.away_sp.and_then(|p| p.ra9_30),
                        slot.home_sp.and_then(|p| p.ra9_30),
                    ),
                    -2.0,
                    2.0,
                    w_sp,
                    &mut risk_flags,
                ),
                opt_factor(
                    "offense_edge",
                    diff(
                        slot.home.and_then(|t| t.runs_per_game_30),
                        slot.away.and_then(|t| t.runs_per_game_30),
                    ),
                    -2.0,
                    2.0,
                    w_off,
                    &mut risk_flags,
                ),
                opt_factor(
                    "bullpen_edge",
                    diff(
                        slot.away.and_then(|t| t.bullpen_ra9_14),
                        slot.home.and_then(|t| t.bullpen_ra9_14),
                    ),
                    -2.0,
                    2.0,
                    w_pen,
                    &mut risk_flags,
                ),
                opt_factor(
                    "recent_form",
                    recent_form_swing(slot.home, slot.away),
                    -1.5,
                    1.5,
                    w_form,
                    &mut risk_flags,
                ),
                Factor::new("home_field", 58.0, w_home),
            ];

            let home_score = composite(&factors);
            let entity = format!("game:{}", slot.game.game_id);
            for (bet_type, score) in [("HOME", home_score), ("AWAY", 100.0 - home_score)] {
                out.push(finalize(
                    spec,
                    slate,
                    Draft {
                        game_id: slot.game.game_id,
                        entity: entity.clone(),
                        bet_type: bet_type.to_string(),
                        line: None,
                        model_score: score,
                        model_projection: None,
                        factors: factors.clone(),
                        risk_flags: risk_flags.clone(),
                        lineup_confirmed,
                        weather_final,
                        under_side: false,
                    },
                ));
            }
        }
        Ok(out)
    }
}

// ── Totals (TOTAL / F5_TOTAL) ─────────────────────────────────────────────────

pub struct TotalModel {
    first_five: bool,
}

impl TotalModel {
    pub fn full_game() -> Self {
        Self { first_five: false }
    }

    pub fn first_five() -> Self {
        Self { first_five: true }
    }
}

#[async_trait]
impl MarketModel for TotalModel {
    fn spec(&self) -> &'static MarketSpec {
        let code = if self.first_five { "F5_TOTAL" } else { "TOTAL" };
        spec_for(code).expect("total spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let (sp_share, fallback_line, sigma, w_pen) =
            if self.first_five { (0.9, 4.5, 1.8, 0.02) } else { (0.6, 8.5, 2.6, 0.10) };

        let mut out = Vec::new();
        for slot in game_slots(slate) {
            let mut risk_flags = Vec::new();
            let weather_final = slot.ctx.map(|c| c.weather_final).unwrap_or(false);
            if spec.weather_recommended && !weather_final {
                risk_flags.push(flags::WEATHER_PENDING.to_string());
            }
            let entity = format!("game:{}", slot.game.game_id);
            let line = slate
                .quote_for(spec.code, &entity, "OVER")
                .and_then(|q| q.line)
                .unwrap_or(fallback_line);

            let home_exp = expected_team_runs(slot.home, slot.away_sp, slot.away, sp_share);
            let away_exp = expected_team_runs(slot.away, slot.home_sp, slot.home, sp_share);
            let scale = if self.first_five { 5.0 / 9.0 } else { 1.0 };
            let projection = (home_exp + away_exp) * env_mult(slot.ctx) * scale;

            let factors = vec![
                opt_factor(
                    "offense_heat",
                    sum(
                        slot.home.and_then(|t| t.runs_per_game_30),
                        slot.away.and_then(|t| t.runs_per_game_30),
                    ),
                    7.0,
                    11.0,
                    0.22,
                    &mut risk_flags,
                ),
                opt_factor(
                    "sp_leakiness",
                    sum(
                        slot.home_sp.and_then(|p| p.ra9_30),
                        slot.away_sp.and_then(|p| p.ra9_30),
                    ),
                    6.0,
                    11.0,
                    0.20,
                    &mut risk_flags,
                ),
                opt_factor(
                    "bullpen_leakiness",
                    sum(
                        slot.home.and_then(|t| t.bullpen_ra9_14),
                        slot.away.and_then(|t| t.bullpen_ra9_14),
                    ),
                    6.0,
                    11.0,
                    w_pen,
                    &mut risk_flags,
                ),
                opt_factor(
                    "park_weather",
                    slot.ctx.map(|c| env_mult(Some(c))),
                    0.85,
                    1.18,
                    0.18,
                    &mut risk_flags,
                ),
                opt_factor(
                    "ump_runs_env",
                    slot.ctx.and_then(|c| c.ump_runs_env),
                    0.94,
                    1.06,
                    0.05,
                    &mut risk_flags,
                ),
                Factor::new(
                    "proj_vs_line",
                    factor_score_linear(over_probability(projection, line, sigma), 0.0, 1.0),
                    0.25,
                ),
            ];

            out.extend(composite_and_finalize_sides(
                spec,
                slate,
                slot.game.game_id,
                entity,
                Some(line),
                Some(projection),
                factors,
                risk_flags,
                slot.ctx
                    .map(|c| c.home_lineup_confirmed && c.away_lineup_confirmed)
                    .unwrap_or(false),
                weather_final,
            ));
        }
        Ok(out)
    }
}

// ── Team totals ───────────────────────────────────────────────────────────────

pub struct TeamTotalModel;

#[async_trait]
impl MarketModel for TeamTotalModel {
    fn spec(&self) -> &'static MarketSpec {
        spec_for("TEAM_TOTAL").expect("TEAM_TOTAL spec registered")
    }

    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>> {
        let spec = self.spec();
        let mut out = Vec::new();
        for slot in game_slots(slate) {
            let weather_final = slot.ctx.map(|c| c.weather_final).unwrap_or(false);
            let sides = [
                (&slot.game.home_team, slot.home, slot.away, slot.away_sp, true),
                (&slot.game.away_team, slot.away, slot.home, slot.home_sp, false),
            ];
            for (team, own, opp, opp_sp, is_home) in sides {
                let mut risk_flags = Vec::new();
                if spec.weather_recommended && !weather_final {
                    risk_flags.push(flags::WEATHER_PENDING.to_string());
                }
                let entity = format!("team:{team}");
                let line = slate
                    .quote_for("TEAM_TOTAL", &entity, "OVER")
                    .and_then(|q| q.line)
                    .unwrap_or(4.5);

                let projection =
                    expected_team_runs(own, opp_sp, opp, 0.6) * env_mult(slot.ctx);

                let factors = vec![
                    opt_factor(
                        "offense_rpg",
                        own.and_then(|t| t.runs_per_game_30),
                        3.2,
                        5.8,
                        0.28,
                        &mut risk_flags,
                    ),
                    opt_factor(
                        "opp_sp_leakiness",
                        opp_sp.and_then(|p| p.ra9_30),
                        2.8,
                        6.2,
                        0.22,
                        &mut risk_flags,
                    ),
                    opt_factor(
                        "opp_bullpen_leakiness",
                        opp.and_then(|t| t.bullpen_ra9_14),
                        2.8,
                        6.2,
                        0.10,
                        &mut risk_flags,
                    ),
                    opt_factor(
                        "park_weather",
                        slot.ctx.map(|c| env_mult(Some(c))),
                        0.85,
                        1.18,
                        0.15,
                        &mut risk_flags,
                    ),
                    Factor::new(
                        "proj_vs_line",
                        factor_score_linear(over_probability(projection, line, 1.9), 0.0, 1.0),
                        0.25,
                    ),
                ];

                let lineup_confirmed = slot
                    .ctx
                    .map(|c| if is_home { c.home_lineup_confirmed } else { c.away_lineup_confirmed })
                    .unwrap_or(false);

                out.extend(composite_and_finalize_sides(
                    spec,
                    slate,
                    slot.game.game_id,
                    entity,
                    Some(line),
                    Some(projection),
                    factors,
                    risk_flags,
                    lineup_confirmed,
                    weather_final,
                ));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_runs_blend_starter_and_bullpen() {
        let team = TeamDailyFeatures {
            runs_per_game_30: Some(5.0),
            bullpen_ra9_14: Some(5.0),
            ..Default::default()
        };
        let sp = PitcherDailyFeatures { ra9_30: Some(3.0), ..Default::default() };

        let full = expected_team_runs(Some(&team), Some(&sp), Some(&team), 0.6);
        // 0.55*5.0 + 0.45*(0.6*3.0 + 0.4*5.0) = 2.75 + 1.71
        assert!((full - 4.46).abs() < 1e-9);

        // Pushing the starter share up drops the expectation further against
        // a strong starter.
        let f5 = expected_team_runs(Some(&team), Some(&sp), Some(&team), 0.9);
        assert!(f5 < full);

        // Missing inputs fall back to league average.
        let neutral = expected_team_runs(None, None, None, 0.6);
        assert!((neutral - LEAGUE_RPG).abs() < 1e-9);
    }
}
