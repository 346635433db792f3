//! Market model dispatch: the registry of eleven models behind one trait,
//! the shared slate-loading helpers, and supersede-aware persistence.

pub mod batter_props;
pub mod engine;
pub mod game_markets;
pub mod pitcher_props;
pub mod spec;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::db::{fail_run, finish_run, games_for_date, start_run, Store};
use crate::fetchers::rosters::roster_as_of;
use crate::models::{
    BatterDailyFeatures, Game, GameContextFeatures, ModelScoreRow, OddsQuote,
    PitcherDailyFeatures, TeamDailyFeatures,
};
use crate::odds::selection_key;
use engine::{assign_signal, compute_edge, confidence_band, flags, visibility_tier, Factor};
use spec::{MarketSpec, MissingDataPolicy, OutputType};

/// A scored selection drafted in memory, before persistence.
#[derive(Debug, Clone)]
pub struct ScoredSelection {
    pub game_id: i64,
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
    pub signal: &'static str,
    pub confidence_band: &'static str,
    pub visibility_tier: &'static str,
    pub factors: Vec<Factor>,
    pub reasons: Vec<String>,
    pub risk_flags: Vec<String>,
    pub lineup_confirmed: bool,
    pub weather_final: bool,
}

/// Everything a model needs for one date, loaded once per scoring pass.
pub struct Slate {
    pub date: NaiveDate,
    pub games: Vec<Game>,
    pub context: HashMap<i64, GameContextFeatures>,
    pub team_features: HashMap<String, TeamDailyFeatures>,
    pub pitcher_features: HashMap<i64, PitcherDailyFeatures>,
    pub batter_features: HashMap<i64, BatterDailyFeatures>,
    pub batter_hand: HashMap<i64, String>,
    pub pitcher_hand: HashMap<i64, String>,
    /// (game_id, team) -> (batting-order player ids, confirmed).
    pub lineups: HashMap<(i64, String), (Vec<i64>, bool)>,
    pub best_odds: HashMap<String, OddsQuote>,
    /// Feature tables the dispatcher found empty for this date.
    pub missing_tables: Vec<String>,
}

impl Slate {
    pub fn quote(&self, key: &str) -> Option<&OddsQuote> {
        self.best_odds.get(key)
    }

    /// Best-available quote for a market/entity/side regardless of line, so
    /// line markets can discover which line the books are offering.
    pub fn quote_for(&self, market: &str, entity: &str, side: &str) -> Option<&OddsQuote> {
        let prefix = format!("{market}|{entity}|");
        let suffix = format!("|{side}");
        self.best_odds
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix) && k.ends_with(&suffix))
            .map(|(_, q)| q)
            .next()
    }

    /// The batting population for one side of a game: the active lineup when
    /// posted, otherwise a probable lineup from recent batting-order slots.
    pub fn batting_population(&self, game_id: i64, team: &str) -> (Vec<(i64, i64)>, bool) {
        if let Some((players, confirmed)) = self.lineups.get(&(game_id, team.to_string())) {
            let slots = players
                .iter()
                .enumerate()
                .map(|(i, &p)| (p, i as i64 + 1))
                .collect();
            return (slots, *confirmed);
        }
        let mut probables: Vec<(i64, i64)> = self
            .batter_features
            .values()
            .filter(|f| f.team.as_deref() == Some(team) && f.recent_lineup_slot.is_some())
            .map(|f| (f.player_id, f.recent_lineup_slot.unwrap_or(9)))
            .collect();
        probables.sort_by_key(|&(_, slot)| slot);
        probables.truncate(9);
        (probables, false)
    }
}

pub async fn load_slate(
    store: &Store,
    date: NaiveDate,
    game_filter: Option<&[i64]>,
    missing_tables: Vec<String>,
) -> Result<Slate> {
    let mut games = games_for_date(store, date).await?;
    if let Some(filter) = game_filter {
        games.retain(|g| filter.contains(&g.game_id));
    }

    let context = sqlx::query_as::<_, GameContextFeatures>(
        "SELECT * FROM game_context_features WHERE game_date = ?",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?
    .into_iter()
    .map(|c| (c.game_id, c))
    .collect();

    let team_features = sqlx::query_as::<_, TeamDailyFeatures>(
        "SELECT * FROM team_daily_features WHERE game_date = ?",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?
    .into_iter()
    .map(|t| (t.team.clone(), t))
    .collect();

    let pitcher_features = sqlx::query_as::<_, PitcherDailyFeatures>(
        "SELECT * FROM pitcher_daily_features WHERE game_date = ?",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?
    .into_iter()
    .map(|p| (p.player_id, p))
    .collect();

    let batter_features = sqlx::query_as::<_, BatterDailyFeatures>(
        "SELECT * FROM batter_daily_features WHERE game_date = ?",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?
    .into_iter()
    .map(|b: BatterDailyFeatures| (b.player_id, b))
    .collect();

    let mut batter_hand = HashMap::new();
    let mut pitcher_hand = HashMap::new();
    for entry in roster_as_of(store, date).await? {
        batter_hand.insert(entry.player_id, entry.bats.clone());
        pitcher_hand.insert(entry.player_id, entry.throws.clone());
    }

    let mut lineups: HashMap<(i64, String), (Vec<i64>, bool)> = HashMap::new();
    let lineup_rows: Vec<(i64, String, i64, bool)> = sqlx::query_as(
        r#"SELECT game_id, team, player_id, is_confirmed FROM lineups
           WHERE game_date = ? AND active_version = 1
           ORDER BY game_id, team, slot"#,
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    for (game_id, team, player_id, confirmed) in lineup_rows {
        let entry = lineups.entry((game_id, team)).or_insert_with(|| (Vec::new(), confirmed));
        entry.0.push(player_id);
        entry.1 = confirmed;
    }

    let best_odds = sqlx::query_as::<_, OddsQuote>(
        r#"SELECT selection_key, sportsbook, line, price_american, price_decimal, implied_prob, fetched_at
           FROM market_odds WHERE game_date = ? AND is_best_available = 1"#,
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?
    .into_iter()
    .map(|q| (q.selection_key.clone(), q))
    .collect();

    Ok(Slate {
        date,
        games,
        context,
        team_features,
        pitcher_features,
        batter_features,
        batter_hand,
        pitcher_hand,
        lineups,
        best_odds,
        missing_tables,
    })
}

// ── Selection assembly ────────────────────────────────────────────────────────

/// Inputs a model hands to `finalize` for one selection.
pub struct Draft {
    pub game_id: i64,
    pub entity: String,
    pub bet_type: String,
    pub line: Option<f64>,
    pub model_score: f64,
    pub model_projection: Option<f64>,
    pub factors: Vec<Factor>,
    pub risk_flags: Vec<String>,
    pub lineup_confirmed: bool,
    pub weather_final: bool,
    /// True for the mirrored side of an over/under pair; flips the sign of a
    /// projection-derived edge (the probability form is already per-side).
    pub under_side: bool,
}

/// Apply the uniform policy tail: odds lookup, edge, signal, confidence,
/// reasons, tier. Per-market variation lives entirely in the factors.
pub fn finalize(spec: &'static MarketSpec, slate: &Slate, mut draft: Draft) -> ScoredSelection {
    let key = selection_key(spec.code, &draft.entity, &draft.bet_type, draft.line);
    let quote = slate.quote(&key);

    let mut line = draft.line;
    if let Some(q) = quote {
        if line.is_none() {
            line = q.line;
        }
    }

    let model_prob = match spec.output_type {
        OutputType::Projection => None,
        _ => Some(spec.calibration.prob(draft.model_score)),
    };
    let book_implied_prob = quote.map(|q| q.implied_prob);
    if quote.is_none() {
        draft.risk_flags.push(flags::missing("odds"));
    }

    let edge_result = compute_edge(
        spec.edge_method,
        model_prob,
        draft.model_projection,
        book_implied_prob,
        line,
    );
    if edge_result.line_zero {
        draft.risk_flags.push(flags::LINE_ZERO.to_string());
    }
    let mut edge_pct = edge_result.edge_pct;
    if draft.under_side {
        let projection_based = match spec.edge_method {
            spec::EdgeMethod::ProjectionVsLine => true,
            spec::EdgeMethod::Hybrid => !(model_prob.is_some() && book_implied_prob.is_some()),
            spec::EdgeMethod::ProbVsImplied => false,
        };
        if projection_based {
            edge_pct = edge_pct.map(|e| -e);
        }
    }

    for table in &slate.missing_tables {
        draft.risk_flags.push(flags::missing(table));
    }
    draft.risk_flags.sort();
    draft.risk_flags.dedup();

    let signal = assign_signal(&spec.thresholds, draft.model_score, edge_pct);
    let mut band = confidence_band(draft.model_score, draft.risk_flags.len());
    if spec.missing_data_policy == MissingDataPolicy::DegradeConfidence
        && !slate.missing_tables.is_empty()
    {
        band = band.degrade();
    }
    let tier = visibility_tier(signal, band);
    let reasons = engine::build_reasons(&draft.factors, 3);

    ScoredSelection {
        game_id: draft.game_id,
        entity: draft.entity,
        bet_type: draft.bet_type,
        line,
        selection_key: key,
        model_score: draft.model_score,
        model_prob,
        model_projection: draft.model_projection,
        book_implied_prob,
        price_american: quote.map(|q| q.price_american),
        edge: edge_pct,
        signal: signal.as_str(),
        confidence_band: band.as_str(),
        visibility_tier: tier,
        factors: draft.factors,
        reasons,
        risk_flags: draft.risk_flags,
        lineup_confirmed: draft.lineup_confirmed,
        weather_final: draft.weather_final,
    }
}

/// Build both sides of an over/under market from the over-side factor set:
/// the UNDER row mirrors the score around neutral and reads its own quote,
/// while the factor story stays the over side's.
#[allow(clippy::too_many_arguments)]
pub fn composite_and_finalize_sides(
    spec: &'static MarketSpec,
    slate: &Slate,
    game_id: i64,
    entity: String,
    line: Option<f64>,
    projection: Option<f64>,
    factors: Vec<Factor>,
    risk_flags: Vec<String>,
    lineup_confirmed: bool,
    weather_final: bool,
) -> Vec<ScoredSelection> {
    let over_score = engine::composite(&factors);
    let over = finalize(
        spec,
        slate,
        Draft {
            game_id,
            entity: entity.clone(),
            bet_type: "OVER".to_string(),
            line,
            model_score: over_score,
            model_projection: projection,
            factors: factors.clone(),
            risk_flags: risk_flags.clone(),
            lineup_confirmed,
            weather_final,
            under_side: false,
        },
    );
    let under = finalize(
        spec,
        slate,
        Draft {
            game_id,
            entity,
            bet_type: "UNDER".to_string(),
            line,
            model_score: (100.0 - over_score).clamp(0.0, 100.0),
            model_projection: projection,
            factors,
            risk_flags,
            lineup_confirmed,
            weather_final,
            under_side: true,
        },
    );
    vec![over, under]
}

// ── Model trait + registry ────────────────────────────────────────────────────

#[async_trait]
pub trait MarketModel: Send + Sync {
    fn spec(&self) -> &'static MarketSpec;
    async fn score(&self, slate: &Slate) -> Result<Vec<ScoredSelection>>;
}

/// Process-local constant registry, built at startup.
pub fn registry() -> Vec<Box<dyn MarketModel>> {
    vec![
        Box::new(batter_props::HrModel),
        Box::new(pitcher_props::StrikeoutModel),
        Box::new(batter_props::HitsFirstPitchModel),
        Box::new(batter_props::HitsLineModel),
        Box::new(batter_props::TotalBasesModel),
        Box::new(pitcher_props::OutsRecordedModel),
        Box::new(game_markets::MoneylineModel::full_game()),
        Box::new(game_markets::TotalModel::full_game()),
        Box::new(game_markets::MoneylineModel::first_five()),
        Box::new(game_markets::TotalModel::first_five()),
        Box::new(game_markets::TeamTotalModel),
    ]
}

// ── Dispatch + persistence ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MarketRunSummary {
    pub market: String,
    pub run_id: String,
    pub rows_written: usize,
    pub skipped: bool,
    pub risk_flagged: bool,
}

async fn empty_required_tables(
    store: &Store,
    date: NaiveDate,
    spec: &MarketSpec,
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for table in spec.required_feature_tables {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE game_date = ?");
        let count: i64 = sqlx::query_scalar(&sql).bind(date).fetch_one(store.pool()).await?;
        if count == 0 {
            missing.push((*table).to_string());
        }
    }
    Ok(missing)
}

/// Two-statement supersede inside one transaction: insert the new run's rows
/// active, then deactivate prior rows sharing the natural key.
async fn persist_scores(
    store: &Store,
    run_id: &str,
    date: NaiveDate,
    market: &str,
    rows: &[ScoredSelection],
) -> Result<usize> {
    let mut tx = store.begin().await?;
    let now = Utc::now();
    for row in rows {
        sqlx::query(
            r#"INSERT INTO model_scores
               (score_run_id, market, game_id, game_date, entity, bet_type, line, selection_key,
                model_score, model_prob, model_projection, book_implied_prob, price_american,
                edge, signal, confidence_band, visibility_tier, factors_json, reasons_json,
                risk_flags_json, lineup_confirmed, weather_final, is_active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(run_id)
        .bind(market)
        .bind(row.game_id)
        .bind(date)
        .bind(&row.entity)
        .bind(&row.bet_type)
        .bind(row.line)
        .bind(&row.selection_key)
        .bind(row.model_score)
        .bind(row.model_prob)
        .bind(row.model_projection)
        .bind(row.book_implied_prob)
        .bind(row.price_american)
        .bind(row.edge)
        .bind(row.signal)
        .bind(row.confidence_band)
        .bind(row.visibility_tier)
        .bind(serde_json::to_string(&factor_map(&row.factors))?)
        .bind(serde_json::to_string(&row.reasons)?)
        .bind(serde_json::to_string(&row.risk_flags)?)
        .bind(row.lineup_confirmed)
        .bind(row.weather_final)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE model_scores SET is_active = 0
               WHERE market = ? AND game_id = ? AND entity = ? AND bet_type = ?
                 AND line IS ? AND score_run_id != ?"#,
        )
        .bind(market)
        .bind(row.game_id)
        .bind(&row.entity)
        .bind(&row.bet_type)
        .bind(row.line)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}

fn factor_map(factors: &[Factor]) -> HashMap<&'static str, f64> {
    factors.iter().map(|f| (f.name, (f.score * 10.0).round() / 10.0)).collect()
}

pub async fn score_market(
    store: &Store,
    date: NaiveDate,
    market: &str,
    trigger: &str,
    game_filter: Option<&[i64]>,
) -> Result<MarketRunSummary> {
    let models = registry();
    let model = models
        .iter()
        .find(|m| m.spec().code == market)
        .ok_or_else(|| anyhow::anyhow!("unknown market '{market}'"))?;
    let spec = model.spec();

    let run_id = start_run(store, "score", Some(market), date, trigger).await?;

    let missing = empty_required_tables(store, date, spec).await?;
    if !missing.is_empty() && spec.missing_data_policy == MissingDataPolicy::Skip {
        tracing::warn!(
            "{}: required tables {:?} empty for {}; market skipped per policy",
            market, missing, date
        );
        finish_run(store, &run_id, 0, Some(&serde_json::json!({"skipped": missing}).to_string()))
            .await?;
        return Ok(MarketRunSummary {
            market: market.to_string(),
            run_id,
            rows_written: 0,
            skipped: true,
            risk_flagged: false,
        });
    }

    let slate = match load_slate(store, date, game_filter, missing).await {
        Ok(s) => s,
        Err(e) => {
            fail_run(store, &run_id, &e.to_string()).await?;
            return Err(e);
        }
    };

    let rows = match model.score(&slate).await {
        Ok(rows) => rows,
        Err(e) => {
            fail_run(store, &run_id, &e.to_string()).await?;
            return Err(e);
        }
    };

    let written = persist_scores(store, &run_id, date, market, &rows).await?;
    let risk_flagged = rows.iter().any(|r| !r.risk_flags.is_empty());
    let metadata = serde_json::json!({
        "calibration": spec.calibration,
        "thresholds": spec.thresholds,
        "games": slate.games.len(),
    });
    finish_run(store, &run_id, written as i64, Some(&metadata.to_string())).await?;
    tracing::info!("{}: {} selection(s) scored for {}", market, written, date);

    Ok(MarketRunSummary {
        market: market.to_string(),
        run_id,
        rows_written: written,
        skipped: false,
        risk_flagged,
    })
}

pub async fn score_all(
    store: &Store,
    date: NaiveDate,
    trigger: &str,
) -> Result<Vec<MarketRunSummary>> {
    let mut summaries = Vec::new();
    for s in spec::ALL_SPECS {
        summaries.push(score_market(store, date, s.code, trigger, None).await?);
    }
    Ok(summaries)
}

/// Current active rows for a market and date.
pub async fn active_scores(
    store: &Store,
    date: NaiveDate,
    market: &str,
) -> Result<Vec<ModelScoreRow>> {
    let rows = sqlx::query_as::<_, ModelScoreRow>(
        r#"SELECT * FROM model_scores
           WHERE game_date = ? AND market = ? AND is_active = 1
           ORDER BY model_score DESC"#,
    )
    .bind(date)
    .bind(market)
    .fetch_all(store.pool())
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use super::engine::Factor;
    use super::spec::spec_for;

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()
    }

    fn test_game(date: NaiveDate) -> Game {
        Game {
            game_id: 776123,
            game_date: date,
            home_team: "NYY".into(),
            away_team: "BOS".into(),
            stadium_id: Some(3309),
            home_pitcher_id: Some(543037),
            away_pitcher_id: Some(477132),
            umpire_name: None,
            game_time_utc: None,
            day_night: Some("day".into()),
            status: "scheduled".into(),
            home_score: None,
            away_score: None,
            home_score_f5: None,
            away_score_f5: None,
        }
    }

    fn test_slate(date: NaiveDate) -> Slate {
        let mut batter_features = HashMap::new();
        batter_features.insert(
            592450,
            BatterDailyFeatures {
                game_date: date,
                player_id: 592450,
                team: Some("NYY".into()),
                barrel_rate_14: Some(0.14),
                iso_delta_7_30: Some(0.04),
                iso_30: Some(0.28),
                iso_vs_l: Some(0.31),
                iso_vs_r: Some(0.25),
                hit_rate_14: Some(0.28),
                hit_rate_30: Some(0.26),
                hit_rate_delta_7_30: Some(0.02),
                hit_rate_vs_l: Some(0.30),
                hit_rate_vs_r: Some(0.25),
                tb_per_pa_14: Some(0.62),
                recent_lineup_slot: Some(2),
                ..Default::default()
            },
        );
        let mut pitcher_features = HashMap::new();
        pitcher_features.insert(
            477132,
            PitcherDailyFeatures {
                game_date: date,
                player_id: 477132,
                team: Some("BOS".into()),
                hr_per_9_30: Some(1.45),
                k_pct_30: Some(0.22),
                hard_hit_rate_30: Some(0.41),
                starter_role_confidence: 0.9,
                outs_recorded_avg_last_5: Some(17.0),
                ..Default::default()
            },
        );
        let mut ctx = HashMap::new();
        ctx.insert(
            776123,
            GameContextFeatures {
                game_date: date,
                game_id: 776123,
                park_hr_factor: Some(1.10),
                park_runs_factor: Some(1.02),
                park_hits_factor: Some(0.98),
                weather_hr_mult: Some(1.05),
                weather_runs_mult: Some(1.03),
                weather_final: true,
                home_lineup_confirmed: true,
                away_lineup_confirmed: false,
                home_probable_id: Some(543037),
                away_probable_id: Some(477132),
                is_final_context: false,
                ..Default::default()
            },
        );
        let mut lineups = HashMap::new();
        lineups.insert((776123, "NYY".to_string()), (vec![111, 222, 592450], true));
        let mut pitcher_hand = HashMap::new();
        pitcher_hand.insert(477132i64, "L".to_string());
        pitcher_hand.insert(543037i64, "R".to_string());

        Slate {
            date,
            games: vec![test_game(date)],
            context: ctx,
            team_features: HashMap::new(),
            pitcher_features,
            batter_features,
            batter_hand: HashMap::new(),
            pitcher_hand,
            lineups,
            best_odds: HashMap::new(),
            missing_tables: Vec::new(),
        }
    }

    #[tokio::test]
    async fn scoring_the_same_slate_twice_is_deterministic() {
        let slate = test_slate(test_date());
        let model = batter_props::HrModel;
        let first = model.score(&slate).await.unwrap();
        let second = model.score(&slate).await.unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.selection_key, b.selection_key);
            assert_eq!(a.model_score, b.model_score);
            assert_eq!(a.signal, b.signal);
        }
        // Confirmed lineup with a known opposing starter: bounded rows with
        // scores inside the scale.
        let judge = first.iter().find(|r| r.entity == "player:592450").unwrap();
        assert!((0.0..=100.0).contains(&judge.model_score));
        assert!(judge.model_prob.unwrap() > 0.0 && judge.model_prob.unwrap() < 1.0);
        assert_eq!(judge.bet_type, "YES");
        assert!(judge.lineup_confirmed);
    }

    #[tokio::test]
    async fn later_run_supersedes_prior_active_rows() {
        let store = Store::in_memory().await.unwrap();
        let date = test_date();
        let row = ScoredSelection {
            game_id: 776123,
            entity: "player:592450".into(),
            bet_type: "YES".into(),
            line: None,
            selection_key: "HR|player:592450|YES".into(),
            model_score: 82.0,
            model_prob: Some(0.24),
            model_projection: None,
            book_implied_prob: None,
            price_american: None,
            edge: None,
            signal: "BET",
            confidence_band: "HIGH",
            visibility_tier: "FREE",
            factors: vec![Factor::new("barrel_rate", 74.0, 0.25)],
            reasons: vec!["barrel_rate:+24".into()],
            risk_flags: vec![],
            lineup_confirmed: true,
            weather_final: true,
        };

        let run1 = start_run(&store, "score", Some("HR"), date, "test").await.unwrap();
        persist_scores(&store, &run1, date, "HR", std::slice::from_ref(&row)).await.unwrap();
        let run2 = start_run(&store, "score", Some("HR"), date, "test").await.unwrap();
        persist_scores(&store, &run2, date, "HR", std::slice::from_ref(&row)).await.unwrap();

        let active = active_scores(&store, date, "HR").await.unwrap();
        assert_eq!(active.len(), 1, "exactly one active row per natural key");
        assert_eq!(active[0].score_run_id, run2);

        let inactive: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM model_scores WHERE is_active = 0",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(inactive, 1);
    }

    #[tokio::test]
    async fn skip_policy_markets_sit_out_when_required_tables_are_empty() {
        let store = Store::in_memory().await.unwrap();
        let date = test_date();
        // K requires pitcher_daily_features; an empty store must skip, not
        // emit garbage rows.
        let summary = score_market(&store, date, "K", "test", None).await.unwrap();
        assert!(summary.skipped);
        assert_eq!(summary.rows_written, 0);

        let runs: Vec<(String, String)> = sqlx::query_as(
            "SELECT status, COALESCE(metadata_json, '') FROM score_runs WHERE market = 'K'",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "finished");
        assert!(runs[0].1.contains("skipped"));
    }

    #[tokio::test]
    async fn full_mode_uses_best_available_odds() {
        let mut slate = test_slate(test_date());
        let key = "HR|player:592450|YES".to_string();
        slate.best_odds.insert(
            key.clone(),
            crate::models::OddsQuote {
                selection_key: key.clone(),
                sportsbook: "fanduel".into(),
                line: None,
                price_american: 320,
                price_decimal: crate::odds::american_to_decimal(320),
                implied_prob: crate::odds::american_to_implied(320),
                fetched_at: chrono::Utc.with_ymd_and_hms(2024, 7, 4, 14, 0, 0).unwrap(),
            },
        );

        let spec = spec_for("HR").unwrap();
        let draft = Draft {
            game_id: 776123,
            entity: "player:592450".into(),
            bet_type: "YES".into(),
            line: None,
            model_score: 82.0,
            model_projection: None,
            factors: vec![Factor::new("barrel_rate", 74.0, 0.25)],
            risk_flags: vec![],
            lineup_confirmed: true,
            weather_final: true,
            under_side: false,
        };
        let sel = finalize(spec, &slate, draft);

        // Prob 0.24 against implied 0.238 is a ~0.2% edge, below every
        // threshold, so full mode lands on SKIP.
        assert!((sel.model_prob.unwrap() - 0.24).abs() < 1e-9);
        assert!((sel.book_implied_prob.unwrap() - 0.2381).abs() < 1e-3);
        assert!((sel.edge.unwrap() - 0.19).abs() < 0.05);
        assert_eq!(sel.signal, "SKIP");
        assert_eq!(sel.price_american, Some(320));

        // Without odds the same draft scores BET on score alone.
        slate.best_odds.clear();
        let draft = Draft {
            game_id: 776123,
            entity: "player:592450".into(),
            bet_type: "YES".into(),
            line: None,
            model_score: 82.0,
            model_projection: None,
            factors: vec![],
            risk_flags: vec![],
            lineup_confirmed: true,
            weather_final: true,
            under_side: false,
        };
        let sel = finalize(spec, &slate, draft);
        assert_eq!(sel.signal, "BET");
        assert!(sel.risk_flags.iter().any(|f| f == "missing:odds"));
    }
}
