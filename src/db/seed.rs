use anyhow::Result;

use crate::db::Store;

/// Seasonal park factors, 1.0 = league average. Values are the static
/// three-year blended factors shipped with the pipeline; `init` loads them
/// once and re-running is a no-op.
///
/// (stadium_id, name, team, hr_factor, runs_factor, hits_factor, roof)
const STADIUMS: &[(i64, &str, &str, f64, f64, f64, &str)] = &[
    (1, "Angel Stadium", "LAA", 1.02, 0.98, 0.99, "open"),
    (2, "Oriole Park at Camden Yards", "BAL", 1.08, 1.01, 0.99, "open"),
    (3, "Fenway Park", "BOS", 0.95, 1.06, 1.06, "open"),
    (4, "Guaranteed Rate Field", "CWS", 1.12, 1.01, 0.99, "open"),
    (5, "Progressive Field", "CLE", 0.97, 0.99, 1.00, "open"),
    (7, "Kauffman Stadium", "KC", 0.87, 1.01, 1.03, "open"),
    (10, "Comerica Park", "DET", 0.92, 0.97, 1.00, "open"),
    (12, "Tropicana Field", "TB", 0.94, 0.96, 0.97, "dome"),
    (14, "Rogers Centre", "TOR", 1.06, 1.01, 1.00, "retractable"),
    (15, "Chase Field", "ARI", 1.03, 1.04, 1.02, "retractable"),
    (16, "Great American Ball Park", "CIN", 1.18, 1.04, 1.00, "open"),
    (17, "Wrigley Field", "CHC", 1.01, 0.99, 0.99, "open"),
    (19, "Coors Field", "COL", 1.11, 1.15, 1.11, "open"),
    (22, "Dodger Stadium", "LAD", 1.10, 0.98, 0.96, "open"),
    (31, "PNC Park", "PIT", 0.88, 0.97, 1.00, "open"),
    (32, "American Family Field", "MIL", 1.09, 1.00, 0.98, "retractable"),
    (680, "T-Mobile Park", "SEA", 0.96, 0.92, 0.94, "retractable"),
    (2392, "Minute Maid Park", "HOU", 1.06, 1.00, 0.98, "retractable"),
    (2395, "Oracle Park", "SF", 0.82, 0.94, 0.97, "open"),
    (2602, "Busch Stadium", "STL", 0.92, 0.97, 0.99, "open"),
    (2680, "Petco Park", "SD", 0.95, 0.95, 0.97, "open"),
    (2681, "Citizens Bank Park", "PHI", 1.13, 1.02, 0.99, "open"),
    (2889, "Nationals Park", "WSH", 1.02, 1.00, 1.00, "open"),
    (3289, "Citi Field", "NYM", 1.01, 0.96, 0.96, "open"),
    (3309, "Yankee Stadium", "NYY", 1.14, 1.02, 0.98, "open"),
    (3312, "Target Field", "MIN", 0.99, 0.99, 0.99, "open"),
    (3313, "Oakland Coliseum", "OAK", 0.89, 0.95, 0.97, "open"),
    (4169, "loanDepot park", "MIA", 0.93, 0.96, 0.99, "retractable"),
    (4705, "Truist Park", "ATL", 1.04, 1.01, 1.00, "open"),
    (5325, "Globe Life Field", "TEX", 1.00, 0.99, 0.98, "retractable"),
];

pub async fn seed_stadiums(store: &Store) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stadiums")
        .fetch_one(store.pool())
        .await?;
    if count > 0 {
        tracing::debug!("Stadium table already seeded ({} rows)", count);
        return Ok(());
    }

    let mut tx = store.begin().await?;
    for (id, name, team, hr, runs, hits, roof) in STADIUMS {
        sqlx::query(
            r#"INSERT OR REPLACE INTO stadiums
               (stadium_id, name, team, hr_factor, runs_factor, hits_factor, roof)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(name)
        .bind(team)
        .bind(hr)
        .bind(runs)
        .bind(hits)
        .bind(roof)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!("Seeded {} stadiums", STADIUMS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    #[tokio::test]
    async fn seed_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        seed_stadiums(&store).await.unwrap();
        seed_stadiums(&store).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stadiums")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count as usize, STADIUMS.len());
    }
}
