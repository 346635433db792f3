use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One scheduled MLB game. Created by the schedule fetch; mutated only to
/// attach final status/scores. `(game_date, home_team, away_team)` identifies
/// one game per date; `game_id` is the stable MLB game_pk.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Game {
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub stadium_id: Option<i64>,
    pub home_pitcher_id: Option<i64>,
    pub away_pitcher_id: Option<i64>,
    pub umpire_name: Option<String>,
    pub game_time_utc: Option<DateTime<Utc>>,
    pub day_night: Option<String>,
    pub status: String, // "scheduled", "final", "cancelled", "completed_early"
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub home_score_f5: Option<i64>,
    pub away_score_f5: Option<i64>,
}

impl Game {
    pub fn is_settleable(&self) -> bool {
        matches!(self.status.as_str(), "final" | "cancelled" | "completed_early")
    }
}

/// One pitch from the event provider, normalized. Retained after feature
/// derivation for backtest reproducibility. Natural key
/// `(game_id, at_bat_number, pitch_number)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PitchEvent {
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub at_bat_number: i64,
    pub pitch_number: i64,
    pub batter_id: i64,
    pub pitcher_id: i64,
    pub bat_team: String,
    pub fld_team: String,
    pub stand: String,    // batter side: "L" | "R"
    pub p_throws: String, // pitcher hand: "L" | "R"
    pub inning: i64,
    pub outs_when_up: i64,
    pub balls: i64,
    pub strikes: i64,
    /// Plate-appearance terminal event ("single", "strikeout", ...); set only
    /// on the last pitch of the PA.
    pub events: Option<String>,
    pub description: String,
    pub pitch_type: Option<String>,
    pub release_speed: Option<f64>,
    pub launch_speed: Option<f64>,
    pub launch_angle: Option<f64>,
    pub bb_type: Option<String>, // "fly_ball" | "line_drive" | "ground_ball" | "popup"
    pub is_barrel: bool,
    pub is_hard_hit: bool,
    pub is_pull: Option<bool>,
    pub is_swing: bool,
    pub is_whiff: bool,
    pub is_in_zone: Option<bool>,
    /// 1-based index of this plate appearance among the pitcher's batters
    /// faced within the game; buckets times-through-order.
    pub pa_of_game: i64,
    pub bat_score: i64,
    pub post_bat_score: i64,
    pub rbi: i64,
    pub batter_scored: bool,
}

/// Counting aggregates for one batter over `[stat_date - window_days, stat_date)`.
/// The right endpoint is open: events from `stat_date` itself never enter.
#[derive(Debug, Clone, Default, FromRow)]
pub struct BatterWindowStats {
    pub player_id: i64,
    pub stat_date: NaiveDate,
    pub window_days: i64,
    pub pa: i64,
    pub ab: i64,
    pub hits: i64,
    pub singles: i64,
    pub doubles: i64,
    pub triples: i64,
    pub home_runs: i64,
    pub walks: i64,
    pub strikeouts: i64,
    pub rbi: i64,
    pub runs_scored: i64,
    pub total_bases: i64,
    pub batted_balls: i64,
    pub barrels: i64,
    pub hard_hits: i64,
    pub sweet_spots: i64,
    pub fly_balls: i64,
    pub line_drives: i64,
    pub ground_balls: i64,
    pub pulled: i64,
    pub exit_velo_sum: f64,
    pub launch_angle_sum: f64,
    pub vs_l_pa: i64,
    pub vs_l_ab: i64,
    pub vs_l_hits: i64,
    pub vs_l_tb: i64,
    pub vs_l_strikeouts: i64,
    pub vs_r_pa: i64,
    pub vs_r_ab: i64,
    pub vs_r_hits: i64,
    pub vs_r_tb: i64,
    pub vs_r_strikeouts: i64,
}

/// Counting aggregates for one pitcher over the window; same no-lookahead
/// contract as `BatterWindowStats`.
#[derive(Debug, Clone, Default, FromRow)]
pub struct PitcherWindowStats {
    pub player_id: i64,
    pub stat_date: NaiveDate,
    pub window_days: i64,
    pub bf: i64,
    pub strikeouts: i64,
    pub walks: i64,
    pub hits_allowed: i64,
    pub home_runs_allowed: i64,
    pub runs_allowed: i64,
    pub outs_recorded: i64,
    pub pitches: i64,
    pub appearances: i64,
    pub starts: i64,
    pub batted_balls: i64,
    pub fly_balls: i64,
    pub hard_hits: i64,
    pub barrels: i64,
    pub exit_velo_sum: f64,
    pub swings: i64,
    pub whiffs: i64,
    pub chases: i64,
    pub out_of_zone_pitches: i64,
    pub fastballs: i64,
    pub fastball_velo_sum: f64,
    pub vs_l_bf: i64,
    pub vs_l_strikeouts: i64,
    pub vs_l_hits: i64,
    pub vs_l_home_runs: i64,
    pub vs_r_bf: i64,
    pub vs_r_strikeouts: i64,
    pub vs_r_hits: i64,
    pub vs_r_home_runs: i64,
    pub tto1_bf: i64,
    pub tto1_strikeouts: i64,
    pub tto1_home_runs: i64,
    pub tto2_bf: i64,
    pub tto2_strikeouts: i64,
    pub tto2_home_runs: i64,
    pub tto3_bf: i64,
    pub tto3_strikeouts: i64,
    pub tto3_home_runs: i64,
}

/// Wide per-batter feature row for `game_date`. Rates are NULL when the
/// window has fewer plate appearances than the minimum sample.
#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct BatterDailyFeatures {
    pub game_date: NaiveDate,
    pub player_id: i64,
    pub team: Option<String>,
    pub pa_7: i64,
    pub pa_14: i64,
    pub pa_30: i64,
    pub k_rate_7: Option<f64>,
    pub k_rate_14: Option<f64>,
    pub k_rate_30: Option<f64>,
    pub bb_rate_14: Option<f64>,
    pub bb_rate_30: Option<f64>,
    pub ba_14: Option<f64>,
    pub ba_30: Option<f64>,
    pub hit_rate_7: Option<f64>,
    pub hit_rate_14: Option<f64>,
    pub hit_rate_30: Option<f64>,
    pub hr_rate_14: Option<f64>,
    pub hr_rate_30: Option<f64>,
    pub iso_7: Option<f64>,
    pub iso_14: Option<f64>,
    pub iso_30: Option<f64>,
    pub slg_14: Option<f64>,
    pub slg_30: Option<f64>,
    pub tb_per_pa_14: Option<f64>,
    pub tb_per_pa_30: Option<f64>,
    pub barrel_rate_14: Option<f64>,
    pub barrel_rate_30: Option<f64>,
    pub hard_hit_rate_14: Option<f64>,
    pub hard_hit_rate_30: Option<f64>,
    pub avg_exit_velo_14: Option<f64>,
    pub avg_exit_velo_30: Option<f64>,
    pub avg_launch_angle_30: Option<f64>,
    pub sweet_spot_rate_30: Option<f64>,
    pub fb_rate_30: Option<f64>,
    pub ld_rate_30: Option<f64>,
    pub gb_rate_30: Option<f64>,
    pub pull_rate_30: Option<f64>,
    pub single_rate_30: Option<f64>,
    pub double_rate_30: Option<f64>,
    pub triple_rate_30: Option<f64>,
    pub rbi_rate_30: Option<f64>,
    pub run_rate_30: Option<f64>,
    pub iso_vs_l: Option<f64>,
    pub iso_vs_r: Option<f64>,
    pub hit_rate_vs_l: Option<f64>,
    pub hit_rate_vs_r: Option<f64>,
    pub k_rate_vs_l: Option<f64>,
    pub k_rate_vs_r: Option<f64>,
    pub iso_delta_7_30: Option<f64>,
    pub hit_rate_delta_7_30: Option<f64>,
    pub recent_lineup_slot: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct PitcherDailyFeatures {
    pub game_date: NaiveDate,
    pub player_id: i64,
    pub team: Option<String>,
    pub bf_14: i64,
    pub bf_30: i64,
    pub k_pct_14: Option<f64>,
    pub k_pct_30: Option<f64>,
    pub bb_pct_14: Option<f64>,
    pub bb_pct_30: Option<f64>,
    pub hr_per_9_30: Option<f64>,
    pub hr_per_fb_30: Option<f64>,
    pub ra9_30: Option<f64>,
    pub whip_30: Option<f64>,
    pub hard_hit_rate_30: Option<f64>,
    pub barrel_rate_30: Option<f64>,
    pub avg_exit_velo_30: Option<f64>,
    pub fb_rate_30: Option<f64>,
    pub whiff_rate_14: Option<f64>,
    pub whiff_rate_30: Option<f64>,
    pub chase_rate_30: Option<f64>,
    pub fastball_velo_14: Option<f64>,
    pub velo_trend_delta: Option<f64>,
    pub outs_recorded_avg_last_5: Option<f64>,
    pub pitches_avg_last_5: Option<f64>,
    pub starter_role_confidence: f64,
    pub k_pct_vs_l: Option<f64>,
    pub k_pct_vs_r: Option<f64>,
    pub hr_rate_vs_l: Option<f64>,
    pub hr_rate_vs_r: Option<f64>,
    pub hit_rate_vs_l: Option<f64>,
    pub hit_rate_vs_r: Option<f64>,
    pub tto_k_decay_pct: Option<f64>,
    pub tto_hr_increase_pct: Option<f64>,
    pub tto_endurance_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct TeamDailyFeatures {
    pub game_date: NaiveDate,
    pub team: String,
    pub off_pa_14: i64,
    pub off_pa_30: i64,
    pub off_k_rate_14: Option<f64>,
    pub off_k_rate_30: Option<f64>,
    pub off_bb_rate_30: Option<f64>,
    pub off_ba_30: Option<f64>,
    pub off_obp_30: Option<f64>,
    pub off_slg_30: Option<f64>,
    pub off_iso_14: Option<f64>,
    pub off_iso_30: Option<f64>,
    pub off_hit_rate_30: Option<f64>,
    pub off_tb_per_pa_30: Option<f64>,
    pub off_hr_rate_14: Option<f64>,
    pub off_hr_rate_30: Option<f64>,
    pub runs_per_game_14: Option<f64>,
    pub runs_per_game_30: Option<f64>,
    pub bullpen_ra9_14: Option<f64>,
    pub bullpen_whip_14: Option<f64>,
    pub bullpen_k_rate_14: Option<f64>,
    pub bullpen_hr9_14: Option<f64>,
    /// 1 = elite high-leverage arms, 2 = average, 3 = taxed/thin; NULL when
    /// the bullpen sample is too small to tier.
    pub bullpen_tier: Option<i64>,
}

/// One row per game folding park, weather, umpire, and lineup context.
#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct GameContextFeatures {
    pub game_date: NaiveDate,
    pub game_id: i64,
    pub park_hr_factor: Option<f64>,
    pub park_runs_factor: Option<f64>,
    pub park_hits_factor: Option<f64>,
    pub temp_f: Option<f64>,
    pub wind_mph: Option<f64>,
    pub wind_dir: Option<String>, // "out" | "in" | "cross"
    pub weather_hr_mult: Option<f64>,
    pub weather_runs_mult: Option<f64>,
    pub weather_final: bool,
    pub umpire_name: Option<String>,
    pub ump_k_boost: Option<f64>,
    pub ump_runs_env: Option<f64>,
    pub home_lineup_confirmed: bool,
    pub away_lineup_confirmed: bool,
    pub day_night: Option<String>,
    pub home_probable_id: Option<i64>,
    pub away_probable_id: Option<i64>,
    /// Set only when both lineups, weather, and both probable pitchers are
    /// present.
    pub is_final_context: bool,
}

/// Normalized sportsbook price row ready for `market_odds`.
#[derive(Debug, Clone, Serialize)]
pub struct OddsRow {
    pub game_date: NaiveDate,
    pub market: String,
    pub game_id: i64,
    pub entity: String,   // "player:592450" | "team:NYY" | "game:776123"
    pub bet_type: String, // "YES" | "OVER" | "UNDER" | "HOME" | "AWAY"
    pub line: Option<f64>,
    pub selection_key: String,
    pub sportsbook: String,
    pub price_american: i64,
    pub price_decimal: f64,
    pub implied_prob: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Best-available quote for a selection, as read back for scoring.
#[derive(Debug, Clone, FromRow)]
pub struct OddsQuote {
    pub selection_key: String,
    pub sportsbook: String,
    pub line: Option<f64>,
    pub price_american: i64,
    pub price_decimal: f64,
    pub implied_prob: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Audit row, one per pipeline stage invocation.
#[derive(Debug, Clone, FromRow)]
pub struct ScoreRun {
    pub id: String,
    pub run_type: String, // "fetch" | "features" | "score" | "grade" | "backfill" | "backtest"
    pub market: Option<String>,
    pub game_date: NaiveDate,
    pub trigger_source: String,
    pub status: String, // "started" | "finished" | "failed"
    pub rows_written: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metadata_json: Option<String>,
}

/// A persisted scored selection. JSON columns stay serialized text at this
/// boundary for forward compatibility.
#[derive(Debug, Clone, FromRow)]
pub struct ModelScoreRow {
    pub id: i64,
    pub score_run_id: String,
    pub market: String,
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub entity: String,
    pub bet_type: String,
    pub line: Option<f64>,
    pub selection_key: String,
    pub model_score: f64,
    pub model_prob: Option<f64>,
    pub model_projection: Option<f64>,
    pub book_implied_prob: Option<f64>,
    pub price_american: Option<i64>,
    pub edge: Option<f64>,
    pub signal: String,
    pub confidence_band: String,
    pub visibility_tier: String,
    pub factors_json: String,
    pub reasons_json: String,
    pub risk_flags_json: String,
    pub lineup_confirmed: bool,
    pub weather_final: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Realized result for one selection key. Written once per selection after
/// the game is final.
#[derive(Debug, Clone, FromRow)]
pub struct MarketOutcome {
    pub market: String,
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub entity: String,
    pub bet_type: String,
    pub line: Option<f64>,
    pub selection_key: String,
    pub outcome_value: f64,
    pub settled_at: DateTime<Utc>,
}

/// A logged wager. Settles `pending -> win | loss | push | void`; re-settling
/// is allowed only to correct errors.
#[derive(Debug, Clone, FromRow)]
pub struct Bet {
    pub id: i64,
    pub game_date: NaiveDate,
    pub market: String,
    pub game_id: i64,
    pub entity: String,
    pub bet_type: String,
    pub line: Option<f64>,
    pub selection_key: String,
    pub sportsbook: String,
    pub price_american: i64,
    pub price_decimal: f64,
    pub implied_prob_open: f64,
    pub stake_units: f64,
    pub status: String,
    pub profit_units: Option<f64>,
    pub implied_prob_close: Option<f64>,
    pub clv_open_to_close: Option<f64>,
    pub line_delta: Option<f64>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RosterEntry {
    pub player_id: i64,
    pub team: String,
    pub full_name: String,
    pub position: String,
    pub bats: String,   // "L" | "R" | "S"
    pub throws: String, // "L" | "R"
    pub as_of_date: NaiveDate,
}

#[derive(Debug, Clone, FromRow)]
pub struct WeatherRow {
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub temp_f: f64,
    pub wind_mph: f64,
    pub wind_dir: String, // "out" | "in" | "cross"
    pub condition: Option<String>,
    pub is_forecast: bool,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UmpireStats {
    pub umpire_name: String,
    pub k_boost: f64,  // multiplier on strikeout rate, 1.0 = neutral
    pub runs_env: f64, // multiplier on run scoring, 1.0 = neutral
    pub sample_games: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Stadium {
    pub stadium_id: i64,
    pub name: String,
    pub team: String,
    pub hr_factor: f64,
    pub runs_factor: f64,
    pub hits_factor: f64,
    pub roof: String, // "open" | "retractable" | "dome"
}
