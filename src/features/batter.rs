use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};

use crate::db::{Store, UPSERT_CHUNK};
use crate::fetchers::rosters::roster_as_of;
use crate::features::{rate, mean, BuildReport, BATTER_WINDOWS, MIN_BATTER_PA, MIN_SPLIT_PA};
use crate::models::{BatterDailyFeatures, BatterWindowStats};

/// Set-based window aggregation. One statement per window upserts every
/// batter with at least one event in `[date - window, date)`.
pub async fn build_window_stats(store: &Store, date: NaiveDate) -> Result<usize> {
    let mut total = 0usize;
    for window in BATTER_WINDOWS {
        let window_start = date - Duration::days(window);
        let result = sqlx::query(
            r#"INSERT INTO batter_stats
               (player_id, stat_date, window_days, pa, ab, hits, singles, doubles, triples,
                home_runs, walks, strikeouts, rbi, runs_scored, total_bases, batted_balls,
                barrels, hard_hits, sweet_spots, fly_balls, line_drives, ground_balls, pulled,
                exit_velo_sum, launch_angle_sum,
                vs_l_pa, vs_l_ab, vs_l_hits, vs_l_tb, vs_l_strikeouts,
                vs_r_pa, vs_r_ab, vs_r_hits, vs_r_tb, vs_r_strikeouts)
               SELECT
                   batter_id, ?1, ?2,
                   SUM(CASE WHEN events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events IS NOT NULL
                             AND events NOT IN ('walk','intent_walk','hit_by_pitch','sac_fly','sac_bunt','catcher_interf')
                            THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events = 'single' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events = 'double' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events = 'triple' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events = 'home_run' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events IN ('walk','intent_walk') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(rbi),
                   SUM(CASE WHEN events IS NOT NULL AND batter_scored = 1 THEN 1 ELSE 0 END),
                   SUM(CASE events WHEN 'single' THEN 1 WHEN 'double' THEN 2
                                   WHEN 'triple' THEN 3 WHEN 'home_run' THEN 4 ELSE 0 END),
                   SUM(CASE WHEN bb_type IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(is_barrel),
                   SUM(is_hard_hit),
                   SUM(CASE WHEN bb_type IS NOT NULL AND launch_angle BETWEEN 8 AND 32 THEN 1 ELSE 0 END),
                   SUM(CASE WHEN bb_type = 'fly_ball' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN bb_type = 'line_drive' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN bb_type = 'ground_ball' THEN 1 ELSE 0 END),
                   SUM(COALESCE(is_pull, 0)),
                   SUM(CASE WHEN bb_type IS NOT NULL THEN COALESCE(launch_speed, 0) ELSE 0 END),
                   SUM(CASE WHEN bb_type IS NOT NULL THEN COALESCE(launch_angle, 0) ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'L' AND events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'L' AND events IS NOT NULL
                             AND events NOT IN ('walk','intent_walk','hit_by_pitch','sac_fly','sac_bunt','catcher_interf')
                            THEN 1 ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'L' AND events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'L' THEN
                        CASE events WHEN 'single' THEN 1 WHEN 'double' THEN 2
                                    WHEN 'triple' THEN 3 WHEN 'home_run' THEN 4 ELSE 0 END
                       ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'L' AND events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'R' AND events IS NOT NULL THEN 1 ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'R' AND events IS NOT NULL
                             AND events NOT IN ('walk','intent_walk','hit_by_pitch','sac_fly','sac_bunt','catcher_interf')
                            THEN 1 ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'R' AND events IN ('single','double','triple','home_run') THEN 1 ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'R' THEN
                        CASE events WHEN 'single' THEN 1 WHEN 'double' THEN 2
                                    WHEN 'triple' THEN 3 WHEN 'home_run' THEN 4 ELSE 0 END
                       ELSE 0 END),
                   SUM(CASE WHEN p_throws = 'R' AND events IN ('strikeout','strikeout_double_play') THEN 1 ELSE 0 END)
               FROM pitch_events
               WHERE game_date >= ?3 AND game_date < ?1
               GROUP BY batter_id
               ON CONFLICT (player_id, stat_date, window_days) DO UPDATE SET
                   pa = excluded.pa, ab = excluded.ab, hits = excluded.hits,
                   singles = excluded.singles, doubles = excluded.doubles, triples = excluded.triples,
                   home_runs = excluded.home_runs, walks = excluded.walks, strikeouts = excluded.strikeouts,
                   rbi = excluded.rbi, runs_scored = excluded.runs_scored, total_bases = excluded.total_bases,
                   batted_balls = excluded.batted_balls, barrels = excluded.barrels,
                   hard_hits = excluded.hard_hits, sweet_spots = excluded.sweet_spots,
                   fly_balls = excluded.fly_balls, line_drives = excluded.line_drives,
                   ground_balls = excluded.ground_balls, pulled = excluded.pulled,
                   exit_velo_sum = excluded.exit_velo_sum, launch_angle_sum = excluded.launch_angle_sum,
                   vs_l_pa = excluded.vs_l_pa, vs_l_ab = excluded.vs_l_ab, vs_l_hits = excluded.vs_l_hits,
                   vs_l_tb = excluded.vs_l_tb, vs_l_strikeouts = excluded.vs_l_strikeouts,
                   vs_r_pa = excluded.vs_r_pa, vs_r_ab = excluded.vs_r_ab, vs_r_hits = excluded.vs_r_hits,
                   vs_r_tb = excluded.vs_r_tb, vs_r_strikeouts = excluded.vs_r_strikeouts"#,
        )
        .bind(date)
        .bind(window)
        .bind(window_start)
        .execute(store.pool())
        .await?;
        total += result.rows_affected() as usize;
    }
    Ok(total)
}

fn window_map(
    rows: Vec<BatterWindowStats>,
) -> HashMap<i64, HashMap<i64, BatterWindowStats>> {
    let mut by_player: HashMap<i64, HashMap<i64, BatterWindowStats>> = HashMap::new();
    for row in rows {
        by_player.entry(row.player_id).or_default().insert(row.window_days, row);
    }
    by_player
}

/// Most recent pre-date lineup slot per player, for expected-PA adjustments.
async fn recent_lineup_slots(store: &Store, date: NaiveDate) -> Result<HashMap<i64, i64>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"SELECT player_id, slot FROM (
               SELECT player_id, slot,
                      ROW_NUMBER() OVER (PARTITION BY player_id ORDER BY game_date DESC, version DESC) AS rn
               FROM lineups
               WHERE game_date < ?
           ) WHERE rn = 1"#,
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;
    Ok(rows.into_iter().collect())
}

fn compose(
    date: NaiveDate,
    player_id: i64,
    windows: &HashMap<i64, BatterWindowStats>,
    team: Option<&str>,
    lineup_slot: Option<i64>,
) -> BatterDailyFeatures {
    let empty = BatterWindowStats::default();
    let w7 = windows.get(&7).unwrap_or(&empty);
    let w14 = windows.get(&14).unwrap_or(&empty);
    let w30 = windows.get(&30).unwrap_or(&empty);

    let iso = |w: &BatterWindowStats| -> Option<f64> {
        let slg = rate(w.total_bases, w.ab, MIN_BATTER_PA)?;
        let ba = rate(w.hits, w.ab, MIN_BATTER_PA)?;
        Some(slg - ba)
    };
    let iso_7 = iso(w7);
    let iso_14 = iso(w14);
    let iso_30 = iso(w30);
    let hit_rate_7 = rate(w7.hits, w7.pa, MIN_BATTER_PA);
    let hit_rate_30 = rate(w30.hits, w30.pa, MIN_BATTER_PA);

    BatterDailyFeatures {
        game_date: date,
        player_id,
        team: team.map(|t| t.to_string()),
        pa_7: w7.pa,
        pa_14: w14.pa,
        pa_30: w30.pa,
        k_rate_7: rate(w7.strikeouts, w7.pa, MIN_BATTER_PA),
        k_rate_14: rate(w14.strikeouts, w14.pa, MIN_BATTER_PA),
        k_rate_30: rate(w30.strikeouts, w30.pa, MIN_BATTER_PA),
        bb_rate_14: rate(w14.walks, w14.pa, MIN_BATTER_PA),
        bb_rate_30: rate(w30.walks, w30.pa, MIN_BATTER_PA),
        ba_14: rate(w14.hits, w14.ab, MIN_BATTER_PA),
        ba_30: rate(w30.hits, w30.ab, MIN_BATTER_PA),
        hit_rate_7,
        hit_rate_14: rate(w14.hits, w14.pa, MIN_BATTER_PA),
        hit_rate_30,
        hr_rate_14: rate(w14.home_runs, w14.pa, MIN_BATTER_PA),
        hr_rate_30: rate(w30.home_runs, w30.pa, MIN_BATTER_PA),
        iso_7,
        iso_14,
        iso_30,
        slg_14: rate(w14.total_bases, w14.ab, MIN_BATTER_PA),
        slg_30: rate(w30.total_bases, w30.ab, MIN_BATTER_PA),
        tb_per_pa_14: rate(w14.total_bases, w14.pa, MIN_BATTER_PA),
        tb_per_pa_30: rate(w30.total_bases, w30.pa, MIN_BATTER_PA),
        barrel_rate_14: rate(w14.barrels, w14.batted_balls, MIN_BATTER_PA / 2),
        barrel_rate_30: rate(w30.barrels, w30.batted_balls, MIN_BATTER_PA),
        hard_hit_rate_14: rate(w14.hard_hits, w14.batted_balls, MIN_BATTER_PA / 2),
        hard_hit_rate_30: rate(w30.hard_hits, w30.batted_balls, MIN_BATTER_PA),
        avg_exit_velo_14: mean(w14.exit_velo_sum, w14.batted_balls, MIN_BATTER_PA / 2),
        avg_exit_velo_30: mean(w30.exit_velo_sum, w30.batted_balls, MIN_BATTER_PA),
        avg_launch_angle_30: mean(w30.launch_angle_sum, w30.batted_balls, MIN_BATTER_PA),
        sweet_spot_rate_30: rate(w30.sweet_spots, w30.batted_balls, MIN_BATTER_PA),
        fb_rate_30: rate(w30.fly_balls, w30.batted_balls, MIN_BATTER_PA),
        ld_rate_30: rate(w30.line_drives, w30.batted_balls, MIN_BATTER_PA),
        gb_rate_30: rate(w30.ground_balls, w30.batted_balls, MIN_BATTER_PA),
        pull_rate_30: rate(w30.pulled, w30.batted_balls, MIN_BATTER_PA),
        single_rate_30: rate(w30.singles, w30.pa, MIN_BATTER_PA),
        double_rate_30: rate(w30.doubles, w30.pa, MIN_BATTER_PA),
        triple_rate_30: rate(w30.triples, w30.pa, MIN_BATTER_PA),
        rbi_rate_30: rate(w30.rbi, w30.pa, MIN_BATTER_PA),
        run_rate_30: rate(w30.runs_scored, w30.pa, MIN_BATTER_PA),
        iso_vs_l: split_iso(w30.vs_l_tb, w30.vs_l_hits, w30.vs_l_ab, w30.vs_l_pa),
        iso_vs_r: split_iso(w30.vs_r_tb, w30.vs_r_hits, w30.vs_r_ab, w30.vs_r_pa),
        hit_rate_vs_l: rate(w30.vs_l_hits, w30.vs_l_pa, MIN_SPLIT_PA),
        hit_rate_vs_r: rate(w30.vs_r_hits, w30.vs_r_pa, MIN_SPLIT_PA),
        k_rate_vs_l: rate(w30.vs_l_strikeouts, w30.vs_l_pa, MIN_SPLIT_PA),
        k_rate_vs_r: rate(w30.vs_r_strikeouts, w30.vs_r_pa, MIN_SPLIT_PA),
        iso_delta_7_30: match (iso_7, iso_30) {
            (Some(a), Some(b)) => Some(a - b),
            _ => None,
        },
        hit_rate_delta_7_30: match (hit_rate_7, hit_rate_30) {
            (Some(a), Some(b)) => Some(a - b),
            _ => None,
        },
        recent_lineup_slot: lineup_slot,
    }
}

fn split_iso(tb: i64, hits: i64, ab: i64, pa: i64) -> Option<f64> {
    if pa < MIN_SPLIT_PA || ab == 0 {
        return None;
    }
    Some((tb - hits) as f64 / ab as f64)
}

async fn upsert_daily(store: &Store, rows: &[BatterDailyFeatures]) -> Result<usize> {
    for chunk in rows.chunks(UPSERT_CHUNK) {
        let mut tx = store.begin().await?;
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "INSERT INTO batter_daily_features \
             (game_date, player_id, team, pa_7, pa_14, pa_30, k_rate_7, k_rate_14, k_rate_30, \
              bb_rate_14, bb_rate_30, ba_14, ba_30, hit_rate_7, hit_rate_14, hit_rate_30, \
              hr_rate_14, hr_rate_30, iso_7, iso_14, iso_30, slg_14, slg_30, tb_per_pa_14, \
              tb_per_pa_30, barrel_rate_14, barrel_rate_30, hard_hit_rate_14, hard_hit_rate_30, \
              avg_exit_velo_14, avg_exit_velo_30, avg_launch_angle_30, sweet_spot_rate_30, \
              fb_rate_30, ld_rate_30, gb_rate_30, pull_rate_30, single_rate_30, double_rate_30, \
              triple_rate_30, rbi_rate_30, run_rate_30, iso_vs_l, iso_vs_r, hit_rate_vs_l, \
              hit_rate_vs_r, k_rate_vs_l, k_rate_vs_r, iso_delta_7_30, hit_rate_delta_7_30, \
              recent_lineup_slot) ",
        );
        qb.push_values(chunk, |mut b, f| {
            b.push_bind(f.game_date)
                .push_bind(f.player_id)
                .push_bind(&f.team)
                .push_bind(f.pa_7)
                .push_bind(f.pa_14)
                .push_bind(f.pa_30)
                .push_bind(f.k_rate_7)
                .push_bind(f.k_rate_14)
                .push_bind(f.k_rate_30)
                .push_bind(f.bb_rate_14)
                .push_bind(f.bb_rate_30)
                .push_bind(f.ba_14)
                .push_bind(f.ba_30)
                .push_bind(f.hit_rate_7)
                .push_bind(f.hit_rate_14)
                .push_bind(f.hit_rate_30)
                .push_bind(f.hr_rate_14)
                .push_bind(f.hr_rate_30)
                .push_bind(f.iso_7)
                .push_bind(f.iso_14)
                .push_bind(f.iso_30)
                .push_bind(f.slg_14)
                .push_bind(f.slg_30)
                .push_bind(f.tb_per_pa_14)
                .push_bind(f.tb_per_pa_30)
                .push_bind(f.barrel_rate_14)
                .push_bind(f.barrel_rate_30)
                .push_bind(f.hard_hit_rate_14)
                .push_bind(f.hard_hit_rate_30)
                .push_bind(f.avg_exit_velo_14)
                .push_bind(f.avg_exit_velo_30)
                .push_bind(f.avg_launch_angle_30)
                .push_bind(f.sweet_spot_rate_30)
                .push_bind(f.fb_rate_30)
                .push_bind(f.ld_rate_30)
                .push_bind(f.gb_rate_30)
                .push_bind(f.pull_rate_30)
                .push_bind(f.single_rate_30)
                .push_bind(f.double_rate_30)
                .push_bind(f.triple_rate_30)
                .push_bind(f.rbi_rate_30)
                .push_bind(f.run_rate_30)
                .push_bind(f.iso_vs_l)
                .push_bind(f.iso_vs_r)
                .push_bind(f.hit_rate_vs_l)
                .push_bind(f.hit_rate_vs_r)
                .push_bind(f.k_rate_vs_l)
                .push_bind(f.k_rate_vs_r)
                .push_bind(f.iso_delta_7_30)
                .push_bind(f.hit_rate_delta_7_30)
                .push_bind(f.recent_lineup_slot);
        });
        qb.push(
            " ON CONFLICT (game_date, player_id) DO UPDATE SET \
              team = excluded.team, pa_7 = excluded.pa_7, pa_14 = excluded.pa_14, pa_30 = excluded.pa_30, \
              k_rate_7 = excluded.k_rate_7, k_rate_14 = excluded.k_rate_14, k_rate_30 = excluded.k_rate_30, \
              bb_rate_14 = excluded.bb_rate_14, bb_rate_30 = excluded.bb_rate_30, \
              ba_14 = excluded.ba_14, ba_30 = excluded.ba_30, hit_rate_7 = excluded.hit_rate_7, \
              hit_rate_14 = excluded.hit_rate_14, hit_rate_30 = excluded.hit_rate_30, \
              hr_rate_14 = excluded.hr_rate_14, hr_rate_30 = excluded.hr_rate_30, \
              iso_7 = excluded.iso_7, iso_14 = excluded.iso_14, iso_30 = excluded.iso_30, \
              slg_14 = excluded.slg_14, slg_30 = excluded.slg_30, \
              tb_per_pa_14 = excluded.tb_per_pa_14, tb_per_pa_30 = excluded.tb_per_pa_30, \
              barrel_rate_14 = excluded.barrel_rate_14, barrel_rate_30 = excluded.barrel_rate_30, \
              hard_hit_rate_14 = excluded.hard_hit_rate_14, hard_hit_rate_30 = excluded.hard_hit_rate_30, \
              avg_exit_velo_14 = excluded.avg_exit_velo_14, avg_exit_velo_30 = excluded.avg_exit_velo_30, \
              avg_launch_angle_30 = excluded.avg_launch_angle_30, sweet_spot_rate_30 = excluded.sweet_spot_rate_30, \
              fb_rate_30 = excluded.fb_rate_30, ld_rate_30 = excluded.ld_rate_30, \
              gb_rate_30 = excluded.gb_rate_30, pull_rate_30 = excluded.pull_rate_30, \
              single_rate_30 = excluded.single_rate_30, double_rate_30 = excluded.double_rate_30, \
              triple_rate_30 = excluded.triple_rate_30, rbi_rate_30 = excluded.rbi_rate_30, \
              run_rate_30 = excluded.run_rate_30, iso_vs_l = excluded.iso_vs_l, iso_vs_r = excluded.iso_vs_r, \
              hit_rate_vs_l = excluded.hit_rate_vs_l, hit_rate_vs_r = excluded.hit_rate_vs_r, \
              k_rate_vs_l = excluded.k_rate_vs_l, k_rate_vs_r = excluded.k_rate_vs_r, \
              iso_delta_7_30 = excluded.iso_delta_7_30, hit_rate_delta_7_30 = excluded.hit_rate_delta_7_30, \
              recent_lineup_slot = excluded.recent_lineup_slot",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
    }
    Ok(rows.len())
}

/// Compose daily feature rows from the window stats persisted for this date.
pub async fn build_daily_features(store: &Store, date: NaiveDate) -> Result<BuildReport> {
    let window_rows = sqlx::query_as::<_, BatterWindowStats>(
        "SELECT * FROM batter_stats WHERE stat_date = ?",
    )
    .bind(date)
    .fetch_all(store.pool())
    .await?;

    let mut report = BuildReport::default();
    if window_rows.is_empty() {
        report.missing_inputs.push("batter_stats".to_string());
        return Ok(report);
    }

    let teams: HashMap<i64, String> = roster_as_of(store, date)
        .await?
        .into_iter()
        .map(|r| (r.player_id, r.team))
        .collect();
    if teams.is_empty() {
        report.missing_inputs.push("rosters".to_string());
    }
    let slots = recent_lineup_slots(store, date).await?;

    let by_player = window_map(window_rows);
    let mut rows: Vec<BatterDailyFeatures> = by_player
        .iter()
        .map(|(&player_id, windows)| {
            compose(
                date,
                player_id,
                windows,
                teams.get(&player_id).map(|s| s.as_str()),
                slots.get(&player_id).copied(),
            )
        })
        .collect();
    rows.sort_by_key(|r| r.player_id);

    report.rows_written = upsert_daily(store, &rows).await?;
    tracing::info!("Batter features: {} row(s) for {}", report.rows_written, date);
    Ok(report)
}

pub async fn build(store: &Store, date: NaiveDate) -> Result<BuildReport> {
    build_window_stats(store, date).await?;
    build_daily_features(store, date).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::pitch_events::{normalize, parse_csv, upsert_events};

    fn csv_day(game_pk: i64, date: &str, batter: i64, rows: &[(&str, &str, f64, f64)]) -> String {
        // (events, description, launch_speed, launch_angle)
        let mut out = String::from(
            "game_pk,game_date,at_bat_number,pitch_number,batter,pitcher,stand,p_throws,home_team,away_team,inning,inning_topbot,outs_when_up,balls,strikes,events,description,pitch_type,release_speed,launch_speed,launch_angle,bb_type,spray_angle,zone,bat_score,post_bat_score,rbi,batter_scored\n",
        );
        for (i, (events, desc, ls, la)) in rows.iter().enumerate() {
            let bb_type = if *events == "home_run" || *events == "single" { "fly_ball" } else { "" };
            out.push_str(&format!(
                "{game_pk},{date},{ab},1,{batter},700001,R,R,NYY,BOS,1,Bot,0,0,0,{events},{desc},FF,94.0,{ls},{la},{bb},0.0,5,0,0,0,0\n",
                game_pk = game_pk,
                date = date,
                ab = i + 1,
                batter = batter,
                events = events,
                desc = desc,
                ls = ls,
                la = la,
                bb = bb_type,
            ));
        }
        out
    }

    #[tokio::test]
    async fn windows_are_right_open_and_exclude_the_target_date() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();

        // One HR the day before (inside every window), one HR on the target
        // date itself (must never be counted).
        let before = csv_day(900001, "2024-07-03", 592450, &[("home_run", "hit_into_play", 105.0, 28.0)]);
        let on_date = csv_day(900002, "2024-07-04", 592450, &[("home_run", "hit_into_play", 105.0, 28.0)]);
        upsert_events(&store, &normalize(parse_csv(&before).unwrap())).await.unwrap();
        upsert_events(&store, &normalize(parse_csv(&on_date).unwrap())).await.unwrap();

        build_window_stats(&store, date).await.unwrap();

        let hr: i64 = sqlx::query_scalar(
            "SELECT home_runs FROM batter_stats WHERE player_id = 592450 AND stat_date = ? AND window_days = 14",
        )
        .bind(date)
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(hr, 1, "event on the target date leaked into the window");
    }

    #[tokio::test]
    async fn small_samples_store_null_rates_not_zeros() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let csv = csv_day(900001, "2024-07-02", 592450, &[("single", "hit_into_play", 98.0, 12.0)]);
        upsert_events(&store, &normalize(parse_csv(&csv).unwrap())).await.unwrap();

        build(&store, date).await.unwrap();

        let (pa_30, k_rate_30): (i64, Option<f64>) = sqlx::query_as(
            "SELECT pa_30, k_rate_30 FROM batter_daily_features WHERE player_id = 592450 AND game_date = ?",
        )
        .bind(date)
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(pa_30, 1);
        assert_eq!(k_rate_30, None, "below-minimum window must be NULL, not zero");
    }

    #[tokio::test]
    async fn rebuilding_features_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let mut rows = Vec::new();
        for _ in 0..12 {
            rows.push(("single", "hit_into_play", 98.0, 12.0));
        }
        let csv = csv_day(900001, "2024-07-01", 592450, &rows);
        upsert_events(&store, &normalize(parse_csv(&csv).unwrap())).await.unwrap();

        build(&store, date).await.unwrap();
        let first: Vec<(i64, Option<f64>, Option<f64>)> = sqlx::query_as(
            "SELECT pa_30, hit_rate_30, iso_30 FROM batter_daily_features WHERE game_date = ?",
        )
        .bind(date)
        .fetch_all(store.pool())
        .await
        .unwrap();

        build(&store, date).await.unwrap();
        let second: Vec<(i64, Option<f64>, Option<f64>)> = sqlx::query_as(
            "SELECT pa_30, hit_rate_30, iso_30 FROM batter_daily_features WHERE game_date = ?",
        )
        .bind(date)
        .fetch_all(store.pool())
        .await
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, 12);
        assert_eq!(first[0].1, Some(1.0));
    }
}
