//! Odds math and the normalizer that maps heterogeneous book rows onto the
//! internal `(market, entity, bet_type, line, selection_key)` shape. The
//! selection key is the join axis across `market_odds`, `model_scores`,
//! `market_outcomes`, `bets`, and `closing_lines`.

use anyhow::Result;
use chrono::NaiveDate;

use crate::db::{Store, UPSERT_CHUNK};
use crate::models::{OddsQuote, OddsRow};

// ── Price conversions ─────────────────────────────────────────────────────────

/// American price to decimal odds: `1 + p/100` for positive prices,
/// `1 + 100/|p|` for negative.
pub fn american_to_decimal(price: i64) -> f64 {
    if price > 0 {
        1.0 + price as f64 / 100.0
    } else {
        1.0 + 100.0 / price.abs() as f64
    }
}

/// American price to implied probability, always in (0, 1).
pub fn american_to_implied(price: i64) -> f64 {
    if price > 0 {
        100.0 / (price as f64 + 100.0)
    } else {
        let p = price.abs() as f64;
        p / (p + 100.0)
    }
}

/// Decimal odds back to the American convention. Identity with
/// `american_to_decimal` on integer prices.
pub fn decimal_to_american(decimal: f64) -> i64 {
    if decimal >= 2.0 {
        ((decimal - 1.0) * 100.0).round() as i64
    } else {
        (-100.0 / (decimal - 1.0)).round() as i64
    }
}

// ── Selection keys ────────────────────────────────────────────────────────────

/// Stable key for one bettable side: `HR|player:12345|YES`,
/// `K|player:678|line:6.5|OVER`, `ML|game:9|HOME`.
pub fn selection_key(market: &str, entity: &str, side: &str, line: Option<f64>) -> String {
    match line {
        Some(l) => format!("{market}|{entity}|line:{l}|{side}"),
        None => format!("{market}|{entity}|{side}"),
    }
}

// ── Market key mapping ────────────────────────────────────────────────────────

/// Internal market codes, in registry order.
pub const MARKET_CODES: &[&str] = &[
    "HR", "K", "HITS_1P", "HITS_LINE", "TB_LINE", "OUTS_RECORDED",
    "ML", "TOTAL", "F5_ML", "F5_TOTAL", "TEAM_TOTAL",
];

/// Maps a source-book market key to the internal code. Unknown keys are the
/// caller's cue to log and skip the row.
pub fn map_market_key(source_key: &str) -> Option<&'static str> {
    match source_key {
        "batter_home_runs" | "batter_home_run" => Some("HR"),
        "pitcher_strikeouts" => Some("K"),
        "batter_hits_recorded" | "batter_record_a_hit" => Some("HITS_1P"),
        "batter_hits" => Some("HITS_LINE"),
        "batter_total_bases" => Some("TB_LINE"),
        "pitcher_outs" | "pitcher_outs_recorded" => Some("OUTS_RECORDED"),
        "h2h" => Some("ML"),
        "totals" => Some("TOTAL"),
        "h2h_1st_5_innings" => Some("F5_ML"),
        "totals_1st_5_innings" => Some("F5_TOTAL"),
        "team_totals" => Some("TEAM_TOTAL"),
        _ => None,
    }
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// Upsert normalized rows in chunks, then recompute `is_best_available` for
/// every selection key the batch touched.
pub async fn store_odds(store: &Store, date: NaiveDate, rows: &[OddsRow]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    for chunk in rows.chunks(UPSERT_CHUNK) {
        let mut tx = store.begin().await?;
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "INSERT INTO market_odds \
             (game_date, market, game_id, entity, bet_type, line, selection_key, sportsbook, \
              price_american, price_decimal, implied_prob, fetched_at) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.game_date)
                .push_bind(&row.market)
                .push_bind(row.game_id)
                .push_bind(&row.entity)
                .push_bind(&row.bet_type)
                .push_bind(row.line)
                .push_bind(&row.selection_key)
                .push_bind(&row.sportsbook)
                .push_bind(row.price_american)
                .push_bind(row.price_decimal)
                .push_bind(row.implied_prob)
                .push_bind(row.fetched_at);
        });
        qb.push(
            " ON CONFLICT (market, game_id, entity, bet_type, line, selection_key, sportsbook, fetched_at) \
              DO UPDATE SET price_american = excluded.price_american, \
                            price_decimal = excluded.price_decimal, \
                            implied_prob = excluded.implied_prob",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
    }

    let mut keys: Vec<&str> = rows.iter().map(|r| r.selection_key.as_str()).collect();
    keys.sort_unstable();
    keys.dedup();
    for key in &keys {
        mark_best_available(store, date, key).await?;
    }

    Ok(rows.len())
}

/// Recompute the best-available flag for one selection key in a single
/// statement: among each book's latest snapshot, the row with the lowest
/// implied probability (largest payoff) carries the flag.
pub async fn mark_best_available(store: &Store, date: NaiveDate, selection_key: &str) -> Result<()> {
    sqlx::query(
        r#"WITH latest AS (
               SELECT id, implied_prob,
                      ROW_NUMBER() OVER (PARTITION BY sportsbook ORDER BY fetched_at DESC) AS rn
               FROM market_odds
               WHERE game_date = ?1 AND selection_key = ?2
           ),
           best AS (
               SELECT id FROM latest WHERE rn = 1
               ORDER BY implied_prob ASC, id ASC
               LIMIT 1
           )
           UPDATE market_odds
           SET is_best_available = (id IN (SELECT id FROM best))
           WHERE game_date = ?1 AND selection_key = ?2"#,
    )
    .bind(date)
    .bind(selection_key)
    .execute(store.pool())
    .await?;
    Ok(())
}

/// The flagged best-available quote for a selection, if any book prices it.
pub async fn best_quote(
    store: &Store,
    date: NaiveDate,
    selection_key: &str,
) -> Result<Option<OddsQuote>> {
    let quote = sqlx::query_as::<_, OddsQuote>(
        r#"SELECT selection_key, sportsbook, line, price_american, price_decimal, implied_prob, fetched_at
           FROM market_odds
           WHERE game_date = ? AND selection_key = ? AND is_best_available = 1"#,
    )
    .bind(date)
    .bind(selection_key)
    .fetch_optional(store.pool())
    .await?;
    Ok(quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn american_decimal_round_trip_is_identity() {
        for price in [-250, -110, -105, 100, 150, 320, 1200] {
            let decimal = american_to_decimal(price);
            assert_eq!(decimal_to_american(decimal), price, "price {price}");
        }
    }

    #[test]
    fn implied_probability_is_in_open_unit_interval() {
        for price in [-100000, -110, 100, 320, 100000] {
            let p = american_to_implied(price);
            assert!(p > 0.0 && p < 1.0, "price {price} gave {p}");
        }
        assert!((american_to_implied(320) - 0.2381).abs() < 1e-3);
        assert!((american_to_implied(-110) - 0.5238).abs() < 1e-3);
        assert!((american_to_implied(150) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn selection_keys_match_documented_shapes() {
        assert_eq!(selection_key("HR", "player:12345", "YES", None), "HR|player:12345|YES");
        assert_eq!(
            selection_key("K", "player:678", "OVER", Some(6.5)),
            "K|player:678|line:6.5|OVER"
        );
        assert_eq!(selection_key("ML", "game:9", "HOME", None), "ML|game:9|HOME");
    }

    #[test]
    fn unknown_market_keys_map_to_none() {
        assert_eq!(map_market_key("h2h"), Some("ML"));
        assert_eq!(map_market_key("batter_total_bases"), Some("TB_LINE"));
        assert_eq!(map_market_key("alternate_spreads"), None);
    }

    fn odds_row(book: &str, price: i64, fetched_minute: u32) -> OddsRow {
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        OddsRow {
            game_date: date,
            market: "HR".into(),
            game_id: 776123,
            entity: "player:592450".into(),
            bet_type: "YES".into(),
            line: None,
            selection_key: selection_key("HR", "player:592450", "YES", None),
            sportsbook: book.into(),
            price_american: price,
            price_decimal: american_to_decimal(price),
            implied_prob: american_to_implied(price),
            fetched_at: Utc.with_ymd_and_hms(2024, 7, 4, 14, fetched_minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn best_available_marks_exactly_one_row() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let rows = vec![
            odds_row("draftkings", 320, 0),
            odds_row("fanduel", 340, 0),
            odds_row("betmgm", 300, 0),
        ];
        store_odds(&store, date, &rows).await.unwrap();

        let flagged: Vec<(String, i64)> = sqlx::query_as(
            "SELECT sportsbook, price_american FROM market_odds WHERE is_best_available = 1",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();
        assert_eq!(flagged, vec![("fanduel".to_string(), 340)]);

        let total_flagged: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM market_odds WHERE is_best_available = 1",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(total_flagged, 1);
    }

    #[tokio::test]
    async fn best_available_uses_latest_snapshot_per_book() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        // fanduel had +360 earlier but moved to +290; draftkings holds +320,
        // so draftkings is now best even though the stale +360 is on file.
        let rows = vec![
            odds_row("fanduel", 360, 0),
            odds_row("fanduel", 290, 30),
            odds_row("draftkings", 320, 30),
        ];
        store_odds(&store, date, &rows).await.unwrap();

        let quote = best_quote(&store, date, &rows[0].selection_key).await.unwrap().unwrap();
        assert_eq!(quote.sportsbook, "draftkings");
        assert_eq!(quote.price_american, 320);
    }
}
