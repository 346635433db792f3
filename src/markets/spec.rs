//! The market registry: one immutable `MarketSpec` per market code, built
//! into the binary and never mutated at runtime.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityType {
    Batter,
    Pitcher,
    Team,
    Game,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputType {
    Probability,
    Projection,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EdgeMethod {
    ProbVsImplied,
    ProjectionVsLine,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineupRequirement {
    Required,
    Recommended,
    NotRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MissingDataPolicy {
    DegradeConfidence,
    Skip,
    StoreWithRiskFlags,
}

/// Signal cut lines. BET/LEAN require both score and edge in full mode;
/// FADE mirrors BET on the negative side.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignalThresholds {
    pub bet_min_score: f64,
    pub bet_min_edge: f64,
    pub lean_min_score: f64,
    pub lean_min_edge: f64,
    pub fade_max_score: f64,
    pub fade_max_edge: f64,
}

pub const DEFAULT_THRESHOLDS: SignalThresholds = SignalThresholds {
    bet_min_score: 75.0,
    bet_min_edge: 5.0,
    lean_min_score: 60.0,
    lean_min_edge: 2.0,
    fade_max_score: 35.0,
    fade_max_edge: -3.0,
};

pub const CONSERVATIVE_THRESHOLDS: SignalThresholds = SignalThresholds {
    bet_min_score: 80.0,
    bet_min_edge: 7.0,
    lean_min_score: 68.0,
    lean_min_edge: 3.5,
    fade_max_score: 30.0,
    fade_max_edge: -5.0,
};

pub const AGGRESSIVE_THRESHOLDS: SignalThresholds = SignalThresholds {
    bet_min_score: 70.0,
    bet_min_edge: 3.5,
    lean_min_score: 55.0,
    lean_min_edge: 1.5,
    fade_max_score: 40.0,
    fade_max_edge: -2.0,
};

/// Monotone score-to-probability map, affine in `score / 100`. Parameters
/// ride along in the score run metadata so a backtest can re-fit them.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Calibration {
    pub intercept: f64,
    pub slope: f64,
}

impl Calibration {
    pub fn prob(&self, score: f64) -> f64 {
        (self.intercept + self.slope * score.clamp(0.0, 100.0) / 100.0).clamp(0.001, 0.999)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MarketSpec {
    pub code: &'static str,
    pub entity_type: EntityType,
    pub required_feature_tables: &'static [&'static str],
    pub output_type: OutputType,
    pub edge_method: EdgeMethod,
    pub thresholds: SignalThresholds,
    pub lineup_requirement: LineupRequirement,
    pub missing_data_policy: MissingDataPolicy,
    pub weather_recommended: bool,
    pub calibration: Calibration,
}

const BATTER_TABLES: &[&str] =
    &["batter_daily_features", "pitcher_daily_features", "game_context_features"];
const PITCHER_TABLES: &[&str] =
    &["pitcher_daily_features", "team_daily_features", "game_context_features"];
const GAME_TABLES: &[&str] =
    &["team_daily_features", "pitcher_daily_features", "game_context_features"];

pub const ALL_SPECS: &[MarketSpec] = &[
    MarketSpec {
        code: "HR",
        entity_type: EntityType::Batter,
        required_feature_tables: BATTER_TABLES,
        output_type: OutputType::Probability,
        edge_method: EdgeMethod::ProbVsImplied,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::Recommended,
        missing_data_policy: MissingDataPolicy::StoreWithRiskFlags,
        weather_recommended: true,
        calibration: Calibration { intercept: 0.035, slope: 0.25 },
    },
    MarketSpec {
        code: "K",
        entity_type: EntityType::Pitcher,
        required_feature_tables: PITCHER_TABLES,
        output_type: OutputType::Hybrid,
        edge_method: EdgeMethod::Hybrid,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::Recommended,
        missing_data_policy: MissingDataPolicy::Skip,
        weather_recommended: false,
        calibration: Calibration { intercept: 0.21, slope: 0.50 },
    },
    MarketSpec {
        code: "HITS_1P",
        entity_type: EntityType::Batter,
        required_feature_tables: BATTER_TABLES,
        output_type: OutputType::Probability,
        edge_method: EdgeMethod::ProbVsImplied,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::Recommended,
        missing_data_policy: MissingDataPolicy::StoreWithRiskFlags,
        weather_recommended: false,
        calibration: Calibration { intercept: 0.30, slope: 0.55 },
    },
    MarketSpec {
        code: "HITS_LINE",
        entity_type: EntityType::Batter,
        required_feature_tables: BATTER_TABLES,
        output_type: OutputType::Hybrid,
        edge_method: EdgeMethod::Hybrid,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::Required,
        missing_data_policy: MissingDataPolicy::StoreWithRiskFlags,
        weather_recommended: false,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
    MarketSpec {
        code: "TB_LINE",
        entity_type: EntityType::Batter,
        required_feature_tables: BATTER_TABLES,
        output_type: OutputType::Hybrid,
        edge_method: EdgeMethod::Hybrid,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::Required,
        missing_data_policy: MissingDataPolicy::StoreWithRiskFlags,
        weather_recommended: true,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
    MarketSpec {
        code: "OUTS_RECORDED",
        entity_type: EntityType::Pitcher,
        required_feature_tables: PITCHER_TABLES,
        output_type: OutputType::Projection,
        edge_method: EdgeMethod::ProjectionVsLine,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::NotRequired,
        missing_data_policy: MissingDataPolicy::Skip,
        weather_recommended: false,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
    MarketSpec {
        code: "ML",
        entity_type: EntityType::Game,
        required_feature_tables: GAME_TABLES,
        output_type: OutputType::Probability,
        edge_method: EdgeMethod::ProbVsImplied,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::NotRequired,
        missing_data_policy: MissingDataPolicy::DegradeConfidence,
        weather_recommended: false,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
    MarketSpec {
        code: "TOTAL",
        entity_type: EntityType::Game,
        required_feature_tables: GAME_TABLES,
        output_type: OutputType::Hybrid,
        edge_method: EdgeMethod::Hybrid,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::NotRequired,
        missing_data_policy: MissingDataPolicy::DegradeConfidence,
        weather_recommended: true,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
    MarketSpec {
        code: "F5_ML",
        entity_type: EntityType::Game,
        required_feature_tables: GAME_TABLES,
        output_type: OutputType::Probability,
        edge_method: EdgeMethod::ProbVsImplied,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::NotRequired,
        missing_data_policy: MissingDataPolicy::DegradeConfidence,
        weather_recommended: false,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
    MarketSpec {
        code: "F5_TOTAL",
        entity_type: EntityType::Game,
        required_feature_tables: GAME_TABLES,
        output_type: OutputType::Hybrid,
        edge_method: EdgeMethod::Hybrid,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::NotRequired,
        missing_data_policy: MissingDataPolicy::DegradeConfidence,
        weather_recommended: true,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
    MarketSpec {
        code: "TEAM_TOTAL",
        entity_type: EntityType::Team,
        required_feature_tables: GAME_TABLES,
        output_type: OutputType::Hybrid,
        edge_method: EdgeMethod::Hybrid,
        thresholds: DEFAULT_THRESHOLDS,
        lineup_requirement: LineupRequirement::NotRequired,
        missing_data_policy: MissingDataPolicy::DegradeConfidence,
        weather_recommended: true,
        calibration: Calibration { intercept: 0.25, slope: 0.50 },
    },
];

pub fn spec_for(code: &str) -> Option<&'static MarketSpec> {
    ALL_SPECS.iter().find(|s| s.code == code)
}

/// Markets whose scores move when a lineup snapshot changes.
pub fn lineup_sensitive() -> impl Iterator<Item = &'static MarketSpec> {
    ALL_SPECS.iter().filter(|s| s.lineup_requirement != LineupRequirement::NotRequired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_eleven_markets_once() {
        assert_eq!(ALL_SPECS.len(), 11);
        for code in crate::odds::MARKET_CODES {
            assert!(spec_for(code).is_some(), "missing spec for {code}");
        }
        let mut codes: Vec<_> = ALL_SPECS.iter().map(|s| s.code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 11);
    }

    #[test]
    fn calibration_matches_reference_points() {
        let hr = spec_for("HR").unwrap();
        assert!((hr.calibration.prob(82.0) - 0.24).abs() < 1e-9);
        let k = spec_for("K").unwrap();
        assert!((k.calibration.prob(34.0) - 0.38).abs() < 1e-9);
    }
}
