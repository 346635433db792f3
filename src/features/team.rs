use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};

use crate::db::{Store, UPSERT_CHUNK};
use crate::features::{rate, BuildReport};
use crate::models::TeamDailyFeatures;

/// Offense counting aggregates per batting team over one window.
#[derive(Debug, Default, Clone, sqlx::FromRow)]
struct OffenseAgg {
    team: String,
    pa: i64,
    ab: i64,
    hits: i64,
    walks: i64,
    hbp: i64,
    strikeouts: i64,
    home_runs: i64,
    total_bases: i64,
}

async fn offense_window(
    store: &Store,
    date: NaiveDate,
    window: i64,
) -> Result<HashMap<String, OffenseAgg>> {
    let start = date - Duration::days(window);
    let rows = sqlx::query_as::<_, OffenseAgg>(
        r#"SELECT
               bat_team AS team,
               SUM(CASE WHEN events IS NOT NULL THEN 1 ELSE 0 END) AS pa,
               SUM(CASE WHEN events IS NOT NULL
                         AND events NOT IN ('walk','intent_walk','hit_by_pitch','sac_fly','sac_bunt','catcher_interf')
                        THEN 1 ELSE 0 END) AS ab,
               SUM(CASE WHEN events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END) AS hits,
               SUM(CASE WHEN events IN ('walk','intent_walk') THEN 1 ELSE 0 END) AS walks,
               SUM(CASE WHEN events = 'hit_by_pitch' THEN 1 ELSE 0 END) AS hbp,
               SUM(CASE WHEN events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END) AS strikeouts,
               SUM(CASE WHEN events = 'home_run' THEN 1 ELSE 0 END) AS home_runs,
               SUM(CASE events WHEN 'single' THEN 1 WHEN 'double' THEN 2
                               WHEN 'triple' THEN 3 WHEN 'home_run' THEN 4 ELSE 0 END) AS total_bases
           FROM pitch_events
           WHERE game_date >= ? AND game_date < ?
           GROUP BY bat_team"#,
    )
    .bind(start)
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(rows.into_iter().map(|r| (r.team.clone(), r)).collect())
}

/// Runs scored per finished game per team over the window, from game finals.
async fn runs_per_game(
    store: &Store,
    date: NaiveDate,
    window: i64,
) -> Result<HashMap<String, f64>> {
    let start = date - Duration::days(window);
    let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
        r#"SELECT home_team, away_team, home_score, away_score
           FROM games
           WHERE game_date >= ? AND game_date < ?
             AND status IN ('final', 'completed_early')
             AND home_score IS NOT NULL AND away_score IS NOT NULL"#,
    )
    .bind(start)
    .bind(date)
    .fetch_all(store.pool())
    .await?;

    let mut totals: HashMap<String, (i64, i64)> = HashMap::new();
    for (home, away, home_score, away_score) in rows {
        let h = totals.entry(home).or_default();
        h.0 += home_score;
        h.1 += 1;
        let a = totals.entry(away).or_default();
        a.0 += away_score;
        a.1 += 1;
    }
    Ok(totals
        .into_iter()
        .filter(|(_, (_, games))| *games >= 5)
        .map(|(team, (runs, games))| (team, runs as f64 / games as f64))
        .collect())
}

#[derive(Debug, Default, Clone, sqlx::FromRow)]
struct BullpenAgg {
    team: String,
    bf: i64,
    strikeouts: i64,
    walks: i64,
    hits: i64,
    home_runs: i64,
    outs: i64,
    runs: i64,
}

/// Bullpen proxies from appearances by pitchers who did not start that game
/// (a starter faces the game's first batter in inning 1).
async fn bullpen_window(
    store: &Store,
    date: NaiveDate,
    window: i64,
) -> Result<HashMap<String, BullpenAgg>> {
    let start = date - Duration::days(window);
    let rows = sqlx::query_as::<_, BullpenAgg>(
        r#"SELECT
               e.fld_team AS team,
               SUM(CASE WHEN e.events IS NOT NULL THEN 1 ELSE 0 END) AS bf,
               SUM(CASE WHEN e.events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END) AS strikeouts,
               SUM(CASE WHEN e.events IN ('walk','intent_walk') THEN 1 ELSE 0 END) AS walks,
               SUM(CASE WHEN e.events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END) AS hits,
               SUM(CASE WHEN e.events = 'home_run' THEN 1 ELSE 0 END) AS home_runs,
               SUM(CASE e.events
                   WHEN 'strikeout' THEN 1 WHEN 'strikeout_double_play' THEN 2
                   WHEN 'field_out' THEN 1 WHEN 'force_out' THEN 1 WHEN 'fielders_choice_out' THEN 1
                   WHEN 'grounded_into_double_play' THEN 2 WHEN 'double_play' THEN 2 WHEN 'triple_play' THEN 3
                   WHEN 'sac_fly' THEN 1 WHEN 'sac_bunt' THEN 1 WHEN 'other_out' THEN 1
                   ELSE 0 END) AS outs,
               SUM(e.post_bat_score - e.bat_score) AS runs
           FROM pitch_events e
           WHERE e.game_date >= ? AND e.game_date < ?
             AND NOT EXISTS (
                 SELECT 1 FROM pitch_events s
                 WHERE s.game_id = e.game_id AND s.pitcher_id = e.pitcher_id
                   AND s.inning = 1 AND s.pa_of_game = 1
             )
           GROUP BY e.fld_team"#,
    )
    .bind(start)
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(rows.into_iter().map(|r| (r.team.clone(), r)).collect())
}

/// Bullpen outs thrown in the last three days, the workload half of the
/// high-leverage tier.
async fn bullpen_recent_workload(store: &Store, date: NaiveDate) -> Result<HashMap<String, i64>> {
    let start = date - Duration::days(3);
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"SELECT e.fld_team,
               SUM(CASE e.events
                   WHEN 'strikeout' THEN 1 WHEN 'strikeout_double_play' THEN 2
                   WHEN 'field_out' THEN 1 WHEN 'force_out' THEN 1 WHEN 'fielders_choice_out' THEN 1
                   WHEN 'grounded_into_double_play' THEN 2 WHEN 'double_play' THEN 2 WHEN 'triple_play' THEN 3
                   WHEN 'sac_fly' THEN 1 WHEN 'sac_bunt' THEN 1 WHEN 'other_out' THEN 1
                   ELSE 0 END)
           FROM pitch_events e
           WHERE e.game_date >= ? AND e.game_date < ?
             AND NOT EXISTS (
                 SELECT 1 FROM pitch_events s
                 WHERE s.game_id = e.game_id AND s.pitcher_id = e.pitcher_id
                   AND s.inning = 1 AND s.pa_of_game = 1
             )
           GROUP BY e.fld_team"#,
    )
    .bind(start)
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(rows.into_iter().collect())
}

fn bullpen_tier(k_rate: Option<f64>, recent_outs: i64) -> Option<i64> {
    let k = k_rate?;
    // Tier 1: strikeout bullpen that is rested. Tier 3: low-K or heavily
    // taxed (more than ~12 innings of relief in three days).
    if k >= 0.26 && recent_outs <= 24 {
        Some(1)
    } else if k < 0.20 || recent_outs > 36 {
        Some(3)
    } else {
        Some(2)
    }
}

const MIN_TEAM_PA: i64 = 50;
const MIN_BULLPEN_BF: i64 = 30;

pub async fn build(store: &Store, date: NaiveDate) -> Result<BuildReport> {
    let off_14 = offense_window(store, date, 14).await?;
    let off_30 = offense_window(store, date, 30).await?;
    let rpg_14 = runs_per_game(store, date, 14).await?;
    let rpg_30 = runs_per_game(store, date, 30).await?;
    let pen_14 = bullpen_window(store, date, 14).await?;
    let workload = bullpen_recent_workload(store, date).await?;

    let mut report = BuildReport::default();
    if off_30.is_empty() {
        report.missing_inputs.push("pitch_events".to_string());
        return Ok(report);
    }

    let empty_off = OffenseAgg::default();
    let empty_pen = BullpenAgg::default();
    let mut rows: Vec<TeamDailyFeatures> = off_30
        .keys()
        .map(|team| {
            let o14 = off_14.get(team).unwrap_or(&empty_off);
            let o30 = off_30.get(team).unwrap_or(&empty_off);
            let pen = pen_14.get(team).unwrap_or(&empty_pen);
            let pen_ip = pen.outs as f64 / 3.0;
            let pen_k_rate = rate(pen.strikeouts, pen.bf, MIN_BULLPEN_BF);
            TeamDailyFeatures {
                game_date: date,
                team: team.clone(),
                off_pa_14: o14.pa,
                off_pa_30: o30.pa,
                off_k_rate_14: rate(o14.strikeouts, o14.pa, MIN_TEAM_PA),
                off_k_rate_30: rate(o30.strikeouts, o30.pa, MIN_TEAM_PA),
                off_bb_rate_30: rate(o30.walks, o30.pa, MIN_TEAM_PA),
                off_ba_30: rate(o30.hits, o30.ab, MIN_TEAM_PA),
                off_obp_30: rate(o30.hits + o30.walks + o30.hbp, o30.pa, MIN_TEAM_PA),
                off_slg_30: rate(o30.total_bases, o30.ab, MIN_TEAM_PA),
                off_iso_14: iso(o14),
                off_iso_30: iso(o30),
                off_hit_rate_30: rate(o30.hits, o30.pa, MIN_TEAM_PA),
                off_tb_per_pa_30: rate(o30.total_bases, o30.pa, MIN_TEAM_PA),
                off_hr_rate_14: rate(o14.home_runs, o14.pa, MIN_TEAM_PA),
                off_hr_rate_30: rate(o30.home_runs, o30.pa, MIN_TEAM_PA),
                runs_per_game_14: rpg_14.get(team).copied(),
                runs_per_game_30: rpg_30.get(team).copied(),
                bullpen_ra9_14: if pen.outs >= 30 {
                    Some(pen.runs as f64 * 27.0 / pen.outs as f64)
                } else {
                    None
                },
                bullpen_whip_14: if pen_ip >= 10.0 {
                    Some((pen.walks + pen.hits) as f64 / pen_ip)
                } else {
                    None
                },
                bullpen_k_rate_14: pen_k_rate,
                bullpen_hr9_14: if pen.outs >= 30 {
                    Some(pen.home_runs as f64 * 27.0 / pen.outs as f64)
                } else {
                    None
                },
                bullpen_tier: bullpen_tier(pen_k_rate, workload.get(team).copied().unwrap_or(0)),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.team.cmp(&b.team));

    for chunk in rows.chunks(UPSERT_CHUNK) {
        let mut tx = store.begin().await?;
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "INSERT INTO team_daily_features \
             (game_date, team, off_pa_14, off_pa_30, off_k_rate_14, off_k_rate_30, off_bb_rate_30, \
              off_ba_30, off_obp_30, off_slg_30, off_iso_14, off_iso_30, off_hit_rate_30, \
              off_tb_per_pa_30, off_hr_rate_14, off_hr_rate_30, runs_per_game_14, runs_per_game_30, \
              bullpen_ra9_14, bullpen_whip_14, bullpen_k_rate_14, bullpen_hr9_14, bullpen_tier) ",
        );
        qb.push_values(chunk, |mut b, f| {
            b.push_bind(f.game_date)
                .push_bind(&f.team)
                .push_bind(f.off_pa_14)
                .push_bind(f.off_pa_30)
                .push_bind(f.off_k_rate_14)
                .push_bind(f.off_k_rate_30)
                .push_bind(f.off_bb_rate_30)
                .push_bind(f.off_ba_30)
                .push_bind(f.off_obp_30)
                .push_bind(f.off_slg_30)
                .push_bind(f.off_iso_14)
                .push_bind(f.off_iso_30)
                .push_bind(f.off_hit_rate_30)
                .push_bind(f.off_tb_per_pa_30)
                .push_bind(f.off_hr_rate_14)
                .push_bind(f.off_hr_rate_30)
                .push_bind(f.runs_per_game_14)
                .push_bind(f.runs_per_game_30)
                .push_bind(f.bullpen_ra9_14)
                .push_bind(f.bullpen_whip_14)
                .push_bind(f.bullpen_k_rate_14)
                .push_bind(f.bullpen_hr9_14)
                .push_bind(f.bullpen_tier);
        });
        qb.push(
            " ON CONFLICT (game_date, team) DO UPDATE SET \
              off_pa_14 = excluded.off_pa_14, off_pa_30 = excluded.off_pa_30, \
              off_k_rate_14 = excluded.off_k_rate_14, off_k_rate_30 = excluded.off_k_rate_30, \
              off_bb_rate_30 = excluded.off_bb_rate_30, off_ba_30 = excluded.off_ba_30, \
              off_obp_30 = excluded.off_obp_30, off_slg_30 = excluded.off_slg_30, \
              off_iso_14 = excluded.off_iso_14, off_iso_30 = excluded.off_iso_30, \
              off_hit_rate_30 = excluded.off_hit_rate_30, off_tb_per_pa_30 = excluded.off_tb_per_pa_30, \
              off_hr_rate_14 = excluded.off_hr_rate_14, off_hr_rate_30 = excluded.off_hr_rate_30, \
              runs_per_game_14 = excluded.runs_per_game_14, runs_per_game_30 = excluded.runs_per_game_30, \
              bullpen_ra9_14 = excluded.bullpen_ra9_14, bullpen_whip_14 = excluded.bullpen_whip_14, \
              bullpen_k_rate_14 = excluded.bullpen_k_rate_14, bullpen_hr9_14 = excluded.bullpen_hr9_14, \
              bullpen_tier = excluded.bullpen_tier",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
    }

    report.rows_written = rows.len();
    tracing::info!("Team features: {} row(s) for {}", report.rows_written, date);
    Ok(report)
}

fn iso(o: &OffenseAgg) -> Option<f64> {
    if o.pa < MIN_TEAM_PA || o.ab == 0 {
        return None;
    }
    Some((o.total_bases - o.hits) as f64 / o.ab as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_reflects_strikeout_rate_and_workload() {
        assert_eq!(bullpen_tier(Some(0.28), 12), Some(1));
        assert_eq!(bullpen_tier(Some(0.28), 30), Some(2));
        assert_eq!(bullpen_tier(Some(0.17), 12), Some(3));
        assert_eq!(bullpen_tier(Some(0.23), 40), Some(3));
        assert_eq!(bullpen_tier(None, 0), None);
    }
}
