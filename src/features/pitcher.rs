use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};

use crate::db::{Store, UPSERT_CHUNK};
use crate::fetchers::rosters::roster_as_of;
use crate::features::{mean, rate, season_start, BuildReport, MIN_PITCHER_BF, PITCHER_WINDOWS};
use crate::models::{PitcherDailyFeatures, PitcherWindowStats};

/// Outs credited to the pitcher for a PA-terminal event, as a CASE fragment.
/// Baserunning outs away from the plate are not visible in the pitch feed;
/// this is the documented proxy.
const OUTS_CASE: &str = "CASE events \
    WHEN 'strikeout' THEN 1 WHEN 'strikeout_double_play' THEN 2 \
    WHEN 'field_out' THEN 1 WHEN 'force_out' THEN 1 WHEN 'fielders_choice_out' THEN 1 \
    WHEN 'grounded_into_double_play' THEN 2 WHEN 'double_play' THEN 2 WHEN 'triple_play' THEN 3 \
    WHEN 'sac_fly' THEN 1 WHEN 'sac_bunt' THEN 1 WHEN 'other_out' THEN 1 \
    ELSE 0 END";

pub async fn build_window_stats(store: &Store, date: NaiveDate) -> Result<usize> {
    let mut total = 0usize;
    for window in PITCHER_WINDOWS {
        let window_start = date - Duration::days(window);
        let sql = format!(
            r#"INSERT INTO pitcher_stats
               (player_id, stat_date, window_days, bf, strikeouts, walks, hits_allowed,
                home_runs_allowed, runs_allowed, outs_recorded, pitches, appearances, starts,
                batted_balls, fly_balls, hard_hits, barrels, exit_velo_sum, swings, whiffs,
                chases, out_of_zone_pitches, fastballs, fastball_velo_sum,
                vs_l_bf, vs_l_strikeouts, vs_l_hits, vs_l_home_runs,
                vs_r_bf, vs_r_strikeouts, vs_r_hits, vs_r_home_runs,
                tto1_bf, tto1_strikeouts, tto1_home_runs,
                tto2_bf, tto2_strikeouts, tto2_home_runs,
                tto3_bf, tto3_strikeouts, tto3_home_runs)
               SELECT
                   pitcher_id, ?1, ?2,
                   SUM(CASE WHEN events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events IN ('walk','intent_walk') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events = 'home_run' THEN 1 ELSE 0 END),
                   SUM(post_bat_score - bat_score),
                   SUM({outs}),
                   COUNT(*),
                   COUNT(DISTINCT game_id),
                   COUNT(DISTINCT CASE WHEN inning = 1 AND pa_of_game = 1 THEN game_id END),
                   SUM(CASE WHEN bb_type IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN bb_type = 'fly_ball' THEN 1 ELSE 0 END),
                   SUM(is_hard_hit),
                   SUM(is_barrel),
                   SUM(CASE WHEN bb_type IS NOT NULL THEN COALESCE(launch_speed, 0) ELSE 0 END),
                   SUM(is_swing),
                   SUM(is_whiff),
                   SUM(CASE WHEN is_swing = 1 AND is_in_zone = 0 THEN 1 ELSE 0 END),
                   SUM(CASE WHEN is_in_zone = 0 THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pitch_type = 'FF' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pitch_type = 'FF' THEN COALESCE(release_speed, 0) ELSE 0 END),
                   SUM(CASE WHEN stand = 'L' AND events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN stand = 'L' AND events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN stand = 'L' AND events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN stand = 'L' AND events = 'home_run' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN stand = 'R' AND events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN stand = 'R' AND events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN stand = 'R' AND events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN stand = 'R' AND events = 'home_run' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game <= 9 AND events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game <= 9 AND events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game <= 9 AND events = 'home_run' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game BETWEEN 10 AND 18 AND events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game BETWEEN 10 AND 18 AND events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game BETWEEN 10 AND 18 AND events = 'home_run' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game >= 19 AND events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game >= 19 AND events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN pa_of_game >= 19 AND events = 'home_run' THEN 1 ELSE 0 END)
               FROM pitch_events
               WHERE game_date >= ?3 AND game_date < ?1
               GROUP BY pitcher_id
               ON CONFLICT (player_id, stat_date, window_days) DO UPDATE SET
                   bf = excluded.bf, strikeouts = excluded.strikeouts, walks = excluded.walks,
                   hits_allowed = excluded.hits_allowed, home_runs_allowed = excluded.home_runs_allowed,
                   runs_allowed = excluded.runs_allowed, outs_recorded = excluded.outs_recorded,
                   pitches = excluded.pitches, appearances = excluded.appearances, starts = excluded.starts,
                   batted_balls = excluded.batted_balls, fly_balls = excluded.fly_balls,
                   hard_hits = excluded.hard_hits, barrels = excluded.barrels,
                   exit_velo_sum = excluded.exit_velo_sum, swings = excluded.swings,
                   whiffs = excluded.whiffs, chases = excluded.chases,
                   out_of_zone_pitches = excluded.out_of_zone_pitches,
                   fastballs = excluded.fastballs, fastball_velo_sum = excluded.fastball_velo_sum,
                   vs_l_bf = excluded.vs_l_bf, vs_l_strikeouts = excluded.vs_l_strikeouts,
                   vs_l_hits = excluded.vs_l_hits, vs_l_home_runs = excluded.vs_l_home_runs,
                   vs_r_bf = excluded.vs_r_bf, vs_r_strikeouts = excluded.vs_r_strikeouts,
                   vs_r_hits = excluded.vs_r_hits, vs_r_home_runs = excluded.vs_r_home_runs,
                   tto1_bf = excluded.tto1_bf, tto1_strikeouts = excluded.tto1_strikeouts,
                   tto1_home_runs = excluded.tto1_home_runs, tto2_bf = excluded.tto2_bf,
                   tto2_strikeouts = excluded.tto2_strikeouts, tto2_home_runs = excluded.tto2_home_runs,
                   tto3_bf = excluded.tto3_bf, tto3_strikeouts = excluded.tto3_strikeouts,
                   tto3_home_runs = excluded.tto3_home_runs"#,
            outs = OUTS_CASE,
        );
        let result = sqlx::query(&sql)
            .bind(date)
            .bind(window)
            .bind(window_start)
            .execute(store.pool())
            .await?;
        total += result.rows_affected() as usize;
    }
    Ok(total)
}

/// Per-appearance outs/pitches in the recent past, newest first per pitcher.
async fn recent_appearances(
    store: &Store,
    date: NaiveDate,
) -> Result<HashMap<i64, Vec<(NaiveDate, i64, i64)>>> {
    let lookback = date - Duration::days(45);
    let sql = format!(
        r#"SELECT pitcher_id, game_date, SUM({OUTS_CASE}) AS outs, COUNT(*) AS pitches
           FROM pitch_events
           WHERE game_date >= ? AND game_date < ?
           GROUP BY pitcher_id, game_id
           ORDER BY pitcher_id, game_date DESC"#,
    );
    let rows: Vec<(i64, NaiveDate, i64, i64)> = sqlx::query_as(&sql)
        .bind(lookback)
        .bind(date)
        .fetch_all(store.pool())
        .await?;

    let mut map: HashMap<i64, Vec<(NaiveDate, i64, i64)>> = HashMap::new();
    for (pitcher_id, game_date, outs, pitches) in rows {
        map.entry(pitcher_id).or_default().push((game_date, outs, pitches));
    }
    Ok(map)
}

/// Season-to-date fastball velocity baseline (strictly before the date).
async fn season_fastball_velo(store: &Store, date: NaiveDate) -> Result<HashMap<i64, f64>> {
    let rows: Vec<(i64, f64)> = sqlx::query_as(
        r#"SELECT pitcher_id, AVG(release_speed)
           FROM pitch_events
           WHERE pitch_type = 'FF' AND release_speed IS NOT NULL
             AND game_date >= ? AND game_date < ?
           GROUP BY pitcher_id
           HAVING COUNT(*) >= 30"#,
    )
    .bind(season_start(date))
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(rows.into_iter().collect())
}

fn tto_metrics(w30: &PitcherWindowStats) -> (Option<f64>, Option<f64>, Option<f64>) {
    let min_bucket_bf = 15;
    if w30.tto1_bf < min_bucket_bf || w30.tto3_bf < min_bucket_bf {
        return (None, None, None);
    }
    let k1 = w30.tto1_strikeouts as f64 / w30.tto1_bf as f64;
    let k3 = w30.tto3_strikeouts as f64 / w30.tto3_bf as f64;
    let hr1 = w30.tto1_home_runs as f64 / w30.tto1_bf as f64;
    let hr3 = w30.tto3_home_runs as f64 / w30.tto3_bf as f64;

    let k_decay = if k1 > 0.0 { Some((k1 - k3) / k1 * 100.0) } else { None };
    let hr_increase = Some((hr3 - hr1.max(0.005)) / hr1.max(0.005) * 100.0);
    // Share of possible third-time-through batters the pitcher actually
    // faced, scaled to 0-100.
    let endurance = if w30.starts > 0 {
        Some((w30.tto3_bf as f64 / (w30.starts as f64 * 9.0) * 100.0).clamp(0.0, 100.0))
    } else {
        None
    };
    (k_decay, hr_increase, endurance)
}

fn compose(
    date: NaiveDate,
    player_id: i64,
    w14: &PitcherWindowStats,
    w30: &PitcherWindowStats,
    team: Option<&str>,
    appearances: Option<&Vec<(NaiveDate, i64, i64)>>,
    season_velo: Option<f64>,
) -> PitcherDailyFeatures {
    let last5: Vec<&(NaiveDate, i64, i64)> =
        appearances.map(|a| a.iter().take(5).collect()).unwrap_or_default();
    let outs_avg_last_5 = if last5.is_empty() {
        None
    } else {
        Some(last5.iter().map(|(_, o, _)| *o as f64).sum::<f64>() / last5.len() as f64)
    };
    let pitches_avg_last_5 = if last5.is_empty() {
        None
    } else {
        Some(last5.iter().map(|(_, _, p)| *p as f64).sum::<f64>() / last5.len() as f64)
    };

    // Role confidence: average batters faced per appearance against a
    // starter's typical 18, zeroed when the pitcher has not appeared in 15
    // days.
    let idle = last5
        .first()
        .map(|(d, _, _)| (date - *d).num_days() > 15)
        .unwrap_or(true);
    let starter_role_confidence = if idle || w30.appearances == 0 {
        0.0
    } else {
        ((w30.bf as f64 / w30.appearances as f64) / 18.0).clamp(0.0, 1.0)
    };

    let fastball_velo_14 = mean(w14.fastball_velo_sum, w14.fastballs, 10);
    let velo_trend_delta = match (fastball_velo_14, season_velo) {
        (Some(recent), Some(season)) => Some(recent - season),
        _ => None,
    };

    let ip_30 = w30.outs_recorded as f64 / 3.0;
    let (tto_k_decay_pct, tto_hr_increase_pct, tto_endurance_score) = tto_metrics(w30);

    PitcherDailyFeatures {
        game_date: date,
        player_id,
        team: team.map(|t| t.to_string()),
        bf_14: w14.bf,
        bf_30: w30.bf,
        k_pct_14: rate(w14.strikeouts, w14.bf, MIN_PITCHER_BF),
        k_pct_30: rate(w30.strikeouts, w30.bf, MIN_PITCHER_BF),
        bb_pct_14: rate(w14.walks, w14.bf, MIN_PITCHER_BF),
        bb_pct_30: rate(w30.walks, w30.bf, MIN_PITCHER_BF),
        hr_per_9_30: if w30.outs_recorded >= 30 {
            Some(w30.home_runs_allowed as f64 * 27.0 / w30.outs_recorded as f64)
        } else {
            None
        },
        hr_per_fb_30: rate(w30.home_runs_allowed, w30.fly_balls, 10),
        ra9_30: if w30.outs_recorded >= 30 {
            Some(w30.runs_allowed as f64 * 27.0 / w30.outs_recorded as f64)
        } else {
            None
        },
        whip_30: if ip_30 >= 10.0 {
            Some((w30.walks + w30.hits_allowed) as f64 / ip_30)
        } else {
            None
        },
        hard_hit_rate_30: rate(w30.hard_hits, w30.batted_balls, 15),
        barrel_rate_30: rate(w30.barrels, w30.batted_balls, 15),
        avg_exit_velo_30: mean(w30.exit_velo_sum, w30.batted_balls, 15),
        fb_rate_30: rate(w30.fly_balls, w30.batted_balls, 15),
        whiff_rate_14: rate(w14.whiffs, w14.swings, 15),
        whiff_rate_30: rate(w30.whiffs, w30.swings, 25),
        chase_rate_30: rate(w30.chases, w30.out_of_zone_pitches, 25),
        fastball_velo_14,
        velo_trend_delta,
        outs_recorded_avg_last_5: outs_avg_last_5,
        pitches_avg_last_5,
        starter_role_confidence,
        k_pct_vs_l: rate(w30.vs_l_strikeouts, w30.vs_l_bf, 15),
        k_pct_vs_r: rate(w30.vs_r_strikeouts, w30.vs_r_bf, 15),
        hr_rate_vs_l: rate(w30.vs_l_home_runs, w30.vs_l_bf, 15),
        hr_rate_vs_r: rate(w30.vs_r_home_runs, w30.vs_r_bf, 15),
        hit_rate_vs_l: rate(w30.vs_l_hits, w30.vs_l_bf, 15),
        hit_rate_vs_r: rate(w30.vs_r_hits, w30.vs_r_bf, 15),
        tto_k_decay_pct,
        tto_hr_increase_pct,
        tto_endurance_score,
    }
}

async fn upsert_daily(store: &Store, rows: &[PitcherDailyFeatures]) -> Result<usize> {
    for chunk in rows.chunks(UPSERT_CHUNK) {
        let mut tx = store.begin().await?;
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "INSERT INTO pitcher_daily_features \
             (game_date, player_id, team, bf_14, bf_30, k_pct_14, k_pct_30, bb_pct_14, bb_pct_30, \
              hr_per_9_30, hr_per_fb_30, ra9_30, whip_30, hard_hit_rate_30, barrel_rate_30, \
              avg_exit_velo_30, fb_rate_30, whiff_rate_14, whiff_rate_30, chase_rate_30, \
              fastball_velo_14, velo_trend_delta, outs_recorded_avg_last_5, pitches_avg_last_5, \
              starter_role_confidence, k_pct_vs_l, k_pct_vs_r, hr_rate_vs_l, hr_rate_vs_r, \
              hit_rate_vs_l, hit_rate_vs_r, tto_k_decay_pct, tto_hr_increase_pct, tto_endurance_score) ",
        );
        qb.push_values(chunk, |mut b, f| {
            b.push_bind(f.game_date)
                .push_bind(f.player_id)
                .push_bind(&f.team)
                .push_bind(f.bf_14)
                .push_bind(f.bf_30)
                .push_bind(f.k_pct_14)
                .push_bind(f.k_pct_30)
                .push_bind(f.bb_pct_14)
                .push_bind(f.bb_pct_30)
                .push_bind(f.hr_per_9_30)
                .push_bind(f.hr_per_fb_30)
                .push_bind(f.ra9_30)
                .push_bind(f.whip_30)
                .push_bind(f.hard_hit_rate_30)
                .push_bind(f.barrel_rate_30)
                .push_bind(f.avg_exit_velo_30)
                .push_bind(f.fb_rate_30)
                .push_bind(f.whiff_rate_14)
                .push_bind(f.whiff_rate_30)
                .push_bind(f.chase_rate_30)
                .push_bind(f.fastball_velo_14)
                .push_bind(f.velo_trend_delta)
                .push_bind(f.outs_recorded_avg_last_5)
                .push_bind(f.pitches_avg_last_5)
                .push_bind(f.starter_role_confidence)
                .push_bind(f.k_pct_vs_l)
                .push_bind(f.k_pct_vs_r)
                .push_bind(f.hr_rate_vs_l)
                .push_bind(f.hr_rate_vs_r)
                .push_bind(f.hit_rate_vs_l)
                .push_bind(f.hit_rate_vs_r)
                .push_bind(f.tto_k_decay_pct)
                .push_bind(f.tto_hr_increase_pct)
                .push_bind(f.tto_endurance_score);
        });
        qb.push(
            " ON CONFLICT (game_date, player_id) DO UPDATE SET \
              team = excluded.team, bf_14 = excluded.bf_14, bf_30 = excluded.bf_30, \
              k_pct_14 = excluded.k_pct_14, k_pct_30 = excluded.k_pct_30, \
              bb_pct_14 = excluded.bb_pct_14, bb_pct_30 = excluded.bb_pct_30, \
              hr_per_9_30 = excluded.hr_per_9_30, hr_per_fb_30 = excluded.hr_per_fb_30, \
              ra9_30 = excluded.ra9_30, whip_30 = excluded.whip_30, \
              hard_hit_rate_30 = excluded.hard_hit_rate_30, barrel_rate_30 = excluded.barrel_rate_30, \
              avg_exit_velo_30 = excluded.avg_exit_velo_30, fb_rate_30 = excluded.fb_rate_30, \
              whiff_rate_14 = excluded.whiff_rate_14, whiff_rate_30 = excluded.whiff_rate_30, \
              chase_rate_30 = excluded.chase_rate_30, fastball_velo_14 = excluded.fastball_velo_14, \
              velo_trend_delta = excluded.velo_trend_delta, \
              outs_recorded_avg_last_5 = excluded.outs_recorded_avg_last_5, \
              pitches_avg_last_5 = excluded.pitches_avg_last_5, \
              starter_role_confidence = excluded.starter_role_confidence, \
              k_pct_vs_l = excluded.k_pct_vs_l, k_pct_vs_r = excluded.k_pct_vs_r, \
              hr_rate_vs_l = excluded.hr_rate_vs_l, hr_rate_vs_r = excluded.hr_rate_vs_r, \
              hit_rate_vs_l = excluded.hit_rate_vs_l, hit_rate_vs_r = excluded.hit_rate_vs_r, \
              tto_k_decay_pct = excluded.tto_k_decay_pct, \
              tto_hr_increase_pct = excluded.tto_hr_increase_pct, \
              tto_endurance_score = excluded.tto_endurance_score",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
    }
    Ok(rows.len())
}

pub async fn build_daily_features(store: &Store, date: NaiveDate) -> Result<BuildReport> {
    let window_rows = sqlx::query_as::<_, PitcherWindowStats>(
        "SELECT * FROM pitcher_stats WHERE stat_date = ?",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;

    let mut report = BuildReport::default();
    if window_rows.is_empty() {
        report.missing_inputs.push("pitcher_stats".to_string());
        return Ok(report);
    }

    let teams: HashMap<i64, String> = roster_as_of(store, date)
        .await?
        .into_iter()
        .map(|r| (r.player_id, r.team))
        .collect();
    let appearances = recent_appearances(store, date).await?;
    let season_velo = season_fastball_velo(store, date).await?;

    let mut by_player: HashMap<i64, HashMap<i64, PitcherWindowStats>> = HashMap::new();
    for row in window_rows {
        by_player.entry(row.player_id).or_default().insert(row.window_days, row);
    }

    let empty = PitcherWindowStats::default();
    let mut rows: Vec<PitcherDailyFeatures> = by_player
        .iter()
        .map(|(&player_id, windows)| {
            compose(
                date,
                player_id,
                windows.get(&14).unwrap_or(&empty),
                windows.get(&30).unwrap_or(&empty),
                teams.get(&player_id).map(|s| s.as_str()),
                appearances.get(&player_id),
                season_velo.get(&player_id).copied(),
            )
        })
        .collect();
    rows.sort_by_key(|r| r.player_id);

    report.rows_written = upsert_daily(store, &rows).await?;
    tracing::info!("Pitcher features: {} row(s) for {}", report.rows_written, date);
    Ok(report)
}

pub async fn build(store: &Store, date: NaiveDate) -> Result<BuildReport> {
    build_window_stats(store, date).await?;
    build_daily_features(store, date).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tto_metrics_need_both_bucket_samples() {
        let mut w = PitcherWindowStats {
            tto1_bf: 40,
            tto1_strikeouts: 12,
            tto1_home_runs: 1,
            tto3_bf: 20,
            tto3_strikeouts: 4,
            tto3_home_runs: 2,
            starts: 5,
            ..Default::default()
        };
        let (decay, hr_inc, endurance) = tto_metrics(&w);
        // K% drops from .30 to .20: a third of the strikeout rate decays.
        assert!((decay.unwrap() - 33.333).abs() < 0.1);
        assert!(hr_inc.unwrap() > 0.0);
        assert!((endurance.unwrap() - 44.444).abs() < 0.1);

        w.tto3_bf = 5;
        assert_eq!(tto_metrics(&w), (None, None, None));
    }

    #[test]
    fn role_confidence_zeroes_for_idle_arms() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let w30 = PitcherWindowStats { bf: 90, appearances: 4, ..Default::default() };
        let w14 = PitcherWindowStats::default();

        let stale = vec![(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 15, 80)];
        let f = compose(date, 1, &w14, &w30, None, Some(&stale), None);
        assert_eq!(f.starter_role_confidence, 0.0);

        let fresh = vec![(NaiveDate::from_ymd_opt(2024, 6, 29).unwrap(), 18, 95)];
        let f = compose(date, 1, &w14, &w30, None, Some(&fresh), None);
        // 90 BF over 4 appearances = 22.5 per start, capped at 1.0.
        assert_eq!(f.starter_role_confidence, 1.0);
        assert_eq!(f.outs_recorded_avg_last_5, Some(18.0));
    }
}
