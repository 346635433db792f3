//! Market-agnostic grading: extract realized outcomes per selection, write
//! `market_outcomes`, settle logged bets, and capture closing-line value.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

use crate::config::{ClvPolicy, Config};
use crate::db::{games_for_date, pending_bets_for_date, Store};
use crate::models::{Bet, Game};

// ── Settlement ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Win,
    Loss,
    Push,
    Void,
}

impl Settlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Settlement::Win => "win",
            Settlement::Loss => "loss",
            Settlement::Push => "push",
            Settlement::Void => "void",
        }
    }
}

/// Resolve a selection against its realized value. Integer lines push on an
/// exact match; half-lines cannot. Moneyline sides carry the margin from the
/// selection's perspective, so zero is a push (possible only for F5).
pub fn settle(bet_type: &str, line: Option<f64>, outcome_value: f64, cancelled: bool) -> Settlement {
    if cancelled {
        return Settlement::Void;
    }
    match bet_type {
        "YES" => {
            if outcome_value >= 1.0 {
                Settlement::Win
            } else {
                Settlement::Loss
            }
        }
        "OVER" | "UNDER" => {
            let Some(line) = line else { return Settlement::Void };
            if (outcome_value - line).abs() < f64::EPSILON {
                return Settlement::Push;
            }
            let over_won = outcome_value > line;
            if (bet_type == "OVER") == over_won {
                Settlement::Win
            } else {
                Settlement::Loss
            }
        }
        "HOME" | "AWAY" => {
            if outcome_value > 0.0 {
                Settlement::Win
            } else if outcome_value < 0.0 {
                Settlement::Loss
            } else {
                Settlement::Push
            }
        }
        _ => Settlement::Void,
    }
}

/// One-unit stake convention: decimal odds minus one on a win, minus the
/// stake on a loss, flat on push/void.
pub fn profit_units(settlement: Settlement, price_decimal: f64, stake: f64) -> f64 {
    match settlement {
        Settlement::Win => stake * (price_decimal - 1.0),
        Settlement::Loss => -stake,
        Settlement::Push | Settlement::Void => 0.0,
    }
}

// ── Realized stats ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Realized {
    pub batter_hr: HashMap<i64, i64>,
    pub batter_hits: HashMap<i64, i64>,
    pub batter_tb: HashMap<i64, i64>,
    pub pitcher_k: HashMap<i64, i64>,
    pub pitcher_outs: HashMap<i64, i64>,
}

async fn realized_stats(store: &Store, date: NaiveDate) -> Result<Realized> {
    let batter_rows: Vec<(i64, i64, i64, i64)> = sqlx::query_as(
        r#"SELECT batter_id,
               SUM(CASE WHEN events = 'home_run' THEN 1 ELSE 0 END),
               SUM(CASE WHEN events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END),
               SUM(CASE events WHEN 'single' THEN 1 WHEN 'double' THEN 2
                               WHEN 'triple' THEN 3 WHEN 'home_run' THEN 4 ELSE 0 END)
           FROM pitch_events WHERE game_date = ?
           GROUP BY batter_id"#,
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;

    let pitcher_rows: Vec<(i64, i64, i64)> = sqlx::query_as(
        r#"SELECT pitcher_id,
               SUM(CASE WHEN events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
               SUM(CASE events
                   WHEN 'strikeout' THEN 1 WHEN 'strikeout_double_play' THEN 2
                   WHEN 'field_out' THEN 1 WHEN 'force_out' THEN 1 WHEN 'fielders_choice_out' THEN 1
                   WHEN 'grounded_into_double_play' THEN 2 WHEN 'double_play' THEN 2 WHEN 'triple_play' THEN 3
                   WHEN 'sac_fly' THEN 1 WHEN 'sac_bunt' THEN 1 WHEN 'other_out' THEN 1
                   ELSE 0 END)
           FROM pitch_events WHERE game_date = ?
           GROUP BY pitcher_id"#,
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;

    let mut realized = Realized::default();
    for (batter, hr, hits, tb) in batter_rows {
        realized.batter_hr.insert(batter, hr);
        realized.batter_hits.insert(batter, hits);
        realized.batter_tb.insert(batter, tb);
    }
    for (pitcher, k, outs) in pitcher_rows {
        realized.pitcher_k.insert(pitcher, k);
        realized.pitcher_outs.insert(pitcher, outs);
    }
    Ok(realized)
}

fn entity_id(entity: &str, prefix: &str) -> Option<i64> {
    entity.strip_prefix(prefix)?.parse().ok()
}

/// Realized value for one selection, or None when it cannot be graded yet
/// (player never appeared, F5 split missing). Ungraded is not an error.
pub fn outcome_value_for(
    market: &str,
    entity: &str,
    bet_type: &str,
    game: &Game,
    realized: &Realized,
) -> Option<f64> {
    match market {
        "HR" => realized.batter_hr.get(&entity_id(entity, "player:")?).map(|&v| v as f64),
        "HITS_1P" | "HITS_LINE" => {
            realized.batter_hits.get(&entity_id(entity, "player:")?).map(|&v| v as f64)
        }
        "TB_LINE" => realized.batter_tb.get(&entity_id(entity, "player:")?).map(|&v| v as f64),
        "K" => realized.pitcher_k.get(&entity_id(entity, "player:")?).map(|&v| v as f64),
        "OUTS_RECORDED" => {
            realized.pitcher_outs.get(&entity_id(entity, "player:")?).map(|&v| v as f64)
        }
        "ML" => {
            let margin = (game.home_score? - game.away_score?) as f64;
            match bet_type {
                "HOME" => Some(margin),
                "AWAY" => Some(-margin),
                _ => None,
            }
        }
        "TOTAL" => Some((game.home_score? + game.away_score?) as f64),
        "F5_ML" => {
            let margin = (game.home_score_f5? - game.away_score_f5?) as f64;
            match bet_type {
                "HOME" => Some(margin),
                "AWAY" => Some(-margin),
                _ => None,
            }
        }
        "F5_TOTAL" => Some((game.home_score_f5? + game.away_score_f5?) as f64),
        "TEAM_TOTAL" => {
            let team = entity.strip_prefix("team:")?;
            if team == game.home_team {
                game.home_score.map(|v| v as f64)
            } else if team == game.away_team {
                game.away_score.map(|v| v as f64)
            } else {
                None
            }
        }
        _ => None,
    }
}

// ── Closing lines ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
struct CloseRow {
    sportsbook: String,
    line: Option<f64>,
    price_american: i64,
    implied_prob: f64,
    fetched_at: DateTime<Utc>,
}

/// Pick the closing snapshot per the configured policy: the latest pregame
/// row (the bet's own book when it has one) or the best-available row.
async fn closing_quote(
    store: &Store,
    date: NaiveDate,
    selection_key: &str,
    policy: ClvPolicy,
    sportsbook: Option<&str>,
    game_time: Option<DateTime<Utc>>,
) -> Result<Option<CloseRow>> {
    match policy {
        ClvPolicy::BestAvailable => {
            let row = sqlx::query_as::<_, CloseRow>(
                r#"SELECT sportsbook, line, price_american, implied_prob, fetched_at
                   FROM market_odds
                   WHERE game_date = ? AND selection_key = ? AND is_best_available = 1"#,
            )
            .bind(date)
            .bind(selection_key)
            .fetch_optional(store.pool())
            .await?;
            Ok(row)
        }
        ClvPolicy::LatestPregame => {
            let cutoff = game_time.unwrap_or_else(|| {
                date.and_hms_opt(23, 59, 59).expect("valid time").and_utc()
            });
            if let Some(book) = sportsbook {
                let own = sqlx::query_as::<_, CloseRow>(
                    r#"SELECT sportsbook, line, price_american, implied_prob, fetched_at
                       FROM market_odds
                       WHERE game_date = ? AND selection_key = ? AND sportsbook = ? AND fetched_at < ?
                       ORDER BY fetched_at DESC LIMIT 1"#,
                )
                .bind(date)
                .bind(selection_key)
                .bind(book)
                .bind(cutoff)
                .fetch_optional(store.pool())
                .await?;
                if own.is_some() {
                    return Ok(own);
                }
            }
            let any = sqlx::query_as::<_, CloseRow>(
                r#"SELECT sportsbook, line, price_american, implied_prob, fetched_at
                   FROM market_odds
                   WHERE game_date = ? AND selection_key = ? AND fetched_at < ?
                   ORDER BY fetched_at DESC LIMIT 1"#,
            )
            .bind(date)
            .bind(selection_key)
            .bind(cutoff)
            .fetch_optional(store.pool())
            .await?;
            Ok(any)
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct GradeSummary {
    pub outcomes_written: usize,
    pub bets_settled: usize,
    pub games_skipped: usize,
    pub clv_captured: usize,
}

/// A selection pending grading, from either an active score row or a bet.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PendingSelection {
    market: String,
    game_id: i64,
    entity: String,
    bet_type: String,
    line: Option<f64>,
    selection_key: String,
}

pub async fn grade_date(store: &Store, config: &Config, date: NaiveDate) -> Result<GradeSummary> {
    let games = games_for_date(store, date).await?;
    let mut summary = GradeSummary::default();

    let mut settleable: HashMap<i64, Game> = HashMap::new();
    for game in games {
        if game.is_settleable() {
            settleable.insert(game.game_id, game);
        } else {
            // The grader refuses to write outcomes for games that are not
            // final or cancelled.
            summary.games_skipped += 1;
            tracing::debug!("Grade: game {} status '{}' skipped", game.game_id, game.status);
        }
    }
    if settleable.is_empty() {
        tracing::info!("Grade: no settleable games on {}", date);
        return Ok(summary);
    }

    let realized = realized_stats(store, date).await?;

    let mut selections: Vec<PendingSelection> = sqlx::query_as(
        r#"SELECT market, game_id, entity, bet_type, line, selection_key
           FROM model_scores WHERE game_date = ? AND is_active = 1"#,
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    let bets = pending_bets_for_date(store, date).await?;
    for bet in &bets {
        if !selections.iter().any(|s| s.selection_key == bet.selection_key) {
            selections.push(PendingSelection {
                market: bet.market.clone(),
                game_id: bet.game_id,
                entity: bet.entity.clone(),
                bet_type: bet.bet_type.clone(),
                line: bet.line,
                selection_key: bet.selection_key.clone(),
            });
        }
    }

    let now = Utc::now();
    let mut outcomes: HashMap<String, f64> = HashMap::new();
    let mut tx = store.begin().await?;
    for sel in &selections {
        let Some(game) = settleable.get(&sel.game_id) else { continue };
        if game.status == "cancelled" {
            continue;
        }
        let Some(value) = outcome_value_for(&sel.market, &sel.entity, &sel.bet_type, game, &realized)
        else {
            continue;
        };
        // Outcomes are written once per selection; a re-grade is a no-op.
        let res = sqlx::query(
            r#"INSERT INTO market_outcomes
               (market, game_id, game_date, entity, bet_type, line, selection_key, outcome_value, settled_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (selection_key) DO NOTHING"#,
        )
        .bind(&sel.market)
        .bind(sel.game_id)
        .bind(date)
        .bind(&sel.entity)
        .bind(&sel.bet_type)
        .bind(sel.line)
        .bind(&sel.selection_key)
        .bind(value)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        summary.outcomes_written += res.rows_affected() as usize;
        outcomes.insert(sel.selection_key.clone(), value);
    }
    tx.commit().await?;

    summary.bets_settled = settle_bets(store, config, date, &bets, &settleable, &outcomes).await?;

    tracing::info!(
        "Grade {}: {} outcome(s), {} bet(s) settled, {} game(s) skipped",
        date, summary.outcomes_written, summary.bets_settled, summary.games_skipped
    );
    Ok(summary)
}

async fn settle_bets(
    store: &Store,
    config: &Config,
    date: NaiveDate,
    bets: &[Bet],
    settleable: &HashMap<i64, Game>,
    outcomes: &HashMap<String, f64>,
) -> Result<usize> {
    // Resolve settlements and closing quotes first; the write pass below is
    // a single transaction.
    let mut resolved = Vec::new();
    for bet in bets {
        let Some(game) = settleable.get(&bet.game_id) else { continue };
        let cancelled = game.status == "cancelled";
        let outcome_value = outcomes.get(&bet.selection_key).copied();
        let settlement = if cancelled {
            Settlement::Void
        } else {
            match outcome_value {
                Some(value) => settle(&bet.bet_type, bet.line, value, false),
                None => continue, // stays pending; not an error
            }
        };
        let close = closing_quote(
            store,
            date,
            &bet.selection_key,
            config.clv_policy,
            Some(&bet.sportsbook),
            game.game_time_utc,
        )
        .await?;
        resolved.push((bet, settlement, close));
    }

    let mut settled = 0usize;
    let mut tx = store.begin().await?;
    for (bet, settlement, close) in resolved {
        let profit = profit_units(settlement, bet.price_decimal, bet.stake_units);
        let (implied_close, clv, line_delta) = match &close {
            Some(c) => {
                let clv = bet.implied_prob_open - c.implied_prob;
                let line_delta = match (bet.line, c.line) {
                    (Some(open), Some(close)) => Some(close - open),
                    _ => None,
                };
                (Some(c.implied_prob), Some(clv), line_delta)
            }
            None => (None, None, None),
        };

        if let Some(c) = &close {
            sqlx::query(
                r#"INSERT INTO closing_lines
                   (game_date, selection_key, sportsbook, line, price_american, implied_prob, captured_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (game_date, selection_key, sportsbook) DO UPDATE SET
                       line = excluded.line,
                       price_american = excluded.price_american,
                       implied_prob = excluded.implied_prob,
                       captured_at = excluded.captured_at"#,
            )
            .bind(date)
            .bind(&bet.selection_key)
            .bind(&c.sportsbook)
            .bind(c.line)
            .bind(c.price_american)
            .bind(c.implied_prob)
            .bind(c.fetched_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"UPDATE bets
               SET status = ?, profit_units = ?, implied_prob_close = ?, clv_open_to_close = ?,
                   line_delta = ?, settled_at = ?
               WHERE id = ?"#,
        )
        .bind(settlement.as_str())
        .bind(profit)
        .bind(implied_close)
        .bind(clv)
        .bind(line_delta)
        .bind(Utc::now())
        .bind(bet.id)
        .execute(&mut *tx)
        .await?;
        settled += 1;
    }
    tx.commit().await?;
    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::american_to_decimal;

    #[test]
    fn integer_lines_push_half_lines_cannot() {
        assert_eq!(settle("OVER", Some(8.0), 8.0, false), Settlement::Push);
        assert_eq!(settle("UNDER", Some(8.0), 8.0, false), Settlement::Push);
        assert_eq!(settle("OVER", Some(8.5), 8.0, false), Settlement::Loss);
        assert_eq!(settle("UNDER", Some(8.5), 8.0, false), Settlement::Win);
        assert_eq!(settle("OVER", Some(6.5), 7.0, false), Settlement::Win);
    }

    #[test]
    fn yes_needs_at_least_one() {
        assert_eq!(settle("YES", None, 0.0, false), Settlement::Loss);
        assert_eq!(settle("YES", None, 1.0, false), Settlement::Win);
        assert_eq!(settle("YES", None, 2.0, false), Settlement::Win);
    }

    #[test]
    fn moneyline_margin_settles_sides() {
        assert_eq!(settle("HOME", None, 3.0, false), Settlement::Win);
        assert_eq!(settle("AWAY", None, -3.0, false), Settlement::Loss);
        assert_eq!(settle("HOME", None, 0.0, false), Settlement::Push);
        assert_eq!(settle("HOME", None, 3.0, true), Settlement::Void);
    }

    #[test]
    fn clv_and_profit_match_reference_numbers() {
        // Bet at +150 (open implied 0.400), close at -110 (implied 0.524).
        let open_implied = crate::odds::american_to_implied(150);
        let close_implied = crate::odds::american_to_implied(-110);
        let clv = open_implied - close_implied;
        assert!((clv + 0.124).abs() < 0.001);

        let profit = profit_units(Settlement::Win, american_to_decimal(150), 1.0);
        assert!((profit - 1.5).abs() < 1e-9);
        assert_eq!(profit_units(Settlement::Push, 2.5, 1.0), 0.0);
        assert_eq!(profit_units(Settlement::Loss, 2.5, 1.0), -1.0);
    }

    fn final_game() -> Game {
        Game {
            game_id: 776123,
            game_date: NaiveDate::from_ymd_opt(2024, 7, 4).unwrap(),
            home_team: "NYY".into(),
            away_team: "BOS".into(),
            stadium_id: None,
            home_pitcher_id: None,
            away_pitcher_id: None,
            umpire_name: None,
            game_time_utc: None,
            day_night: None,
            status: "final".into(),
            home_score: Some(6),
            away_score: Some(2),
            home_score_f5: Some(3),
            away_score_f5: Some(3),
        }
    }

    #[test]
    fn outcome_extraction_covers_game_markets() {
        let game = final_game();
        let realized = Realized::default();
        assert_eq!(outcome_value_for("ML", "game:776123", "HOME", &game, &realized), Some(4.0));
        assert_eq!(outcome_value_for("ML", "game:776123", "AWAY", &game, &realized), Some(-4.0));
        assert_eq!(outcome_value_for("TOTAL", "game:776123", "OVER", &game, &realized), Some(8.0));
        assert_eq!(outcome_value_for("F5_ML", "game:776123", "HOME", &game, &realized), Some(0.0));
        assert_eq!(
            outcome_value_for("F5_TOTAL", "game:776123", "OVER", &game, &realized),
            Some(6.0)
        );
        assert_eq!(
            outcome_value_for("TEAM_TOTAL", "team:NYY", "OVER", &game, &realized),
            Some(6.0)
        );
        assert_eq!(
            outcome_value_for("TEAM_TOTAL", "team:SEA", "OVER", &game, &realized),
            None
        );
    }

    #[test]
    fn player_props_stay_ungraded_without_appearances() {
        let game = final_game();
        let mut realized = Realized::default();
        assert_eq!(outcome_value_for("HR", "player:592450", "YES", &game, &realized), None);

        realized.batter_hr.insert(592450, 2);
        assert_eq!(outcome_value_for("HR", "player:592450", "YES", &game, &realized), Some(2.0));
    }
}
