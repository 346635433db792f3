mod alerts;
mod config;
mod db;
mod error;
mod features;
mod fetchers;
mod grading;
mod markets;
mod models;
mod odds;
mod pipeline;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::db::Store;
use crate::fetchers::Http;
use crate::pipeline::{backfill, backtest, orchestrator, RunReport};

#[derive(Parser)]
#[command(name = "dugout")]
#[command(about = "MLB betting-market scoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and load stadium static data
    Init,
    /// Apply additive SQL migrations
    Migrate,
    /// Run the daily orchestrator for a date
    Daily {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        send_alerts: bool,
    },
    /// Fetch and normalize sportsbook odds
    RefreshOdds {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Fetch lineup snapshots
    FetchLineups {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Run the four feature store builders
    BuildFeatures {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Score one market or all of them
    Score {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        market: Option<String>,
        #[arg(long)]
        all_markets: bool,
        #[arg(long)]
        send_alerts: bool,
    },
    /// Re-score lineup-sensitive markets for games whose lineups changed
    RescoreOnLineup {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        send_alerts: bool,
    },
    /// Grade outcomes, settle bets, capture CLV
    Grade {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Historical backfill across a date range
    Backfill {
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
        #[arg(long)]
        build_features: bool,
        #[arg(long)]
        score: bool,
        #[arg(long)]
        all_markets: bool,
        #[arg(long)]
        market: Vec<String>,
        #[arg(long)]
        grade: bool,
        #[arg(long)]
        no_bulk: bool,
        #[arg(long, env = "BACKFILL_WORKERS")]
        workers: Option<usize>,
    },
    /// No-lookahead backtest over a date range; writes a CSV
    Backtest {
        #[arg(long)]
        market: String,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
        /// Comma-separated signal filter, e.g. BET,LEAN
        #[arg(long)]
        signals: Option<String>,
        #[arg(long, default_value = "backtest.csv")]
        output: String,
    },
    /// Print last run timestamps per run type, row counts, freshness
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    dotenv::dotenv().ok();

    let code = match run().await {
        Ok(report) => {
            if report.partial {
                tracing::warn!("Completed with risk flags (exit 2)");
                2
            } else {
                0
            }
        }
        Err(e) => {
            tracing::error!("Fatal: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<RunReport> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = Store::connect(&config).await?;
    let http = Http::new(config.http_timeout_secs)?;
    let mut report = RunReport::default();

    match cli.command {
        Commands::Init => {
            db::migrations::run(&store).await?;
            db::seed::seed_stadiums(&store).await?;
            println!("Schema ready; stadium static data loaded.");
        }
        Commands::Migrate => {
            db::migrations::run(&store).await?;
        }
        Commands::Daily { date, send_alerts } => {
            db::migrations::run(&store).await?;
            report = orchestrator::run_daily(&store, &config, &http, date, send_alerts).await?;
        }
        Commands::RefreshOdds { date } => {
            let key = config
                .odds_api_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("ODDS_API_KEY is required for refresh-odds"))?;
            let stored =
                fetchers::odds::refresh_odds(&http, &store, &config.odds_api_base, key, date)
                    .await?;
            println!("{stored} odds row(s) stored for {date}.");
        }
        Commands::FetchLineups { date } => {
            let snapshots =
                fetchers::lineups::fetch_lineups(&http, &config.stats_api_base, date).await?;
            let changed = fetchers::lineups::upsert_lineups(&store, date, &snapshots).await?;
            println!("{changed} lineup snapshot(s) superseded for {date}.");
        }
        Commands::BuildFeatures { date } => {
            report.absorb(orchestrator::run_feature_stage(&store, date).await?);
        }
        Commands::Score { date, market, all_markets, send_alerts } => {
            if !all_markets && market.is_none() {
                anyhow::bail!("score requires --market <CODE> or --all-markets");
            }
            if all_markets {
                report.absorb(
                    orchestrator::run_score_stage(&store, &config, date, send_alerts).await?,
                );
            } else if let Some(code) = market {
                let summary = markets::score_market(&store, date, &code, "cli", None).await?;
                report.absorb(summary.risk_flagged || summary.skipped);
                if send_alerts && summary.rows_written > 0 {
                    let rows = markets::active_scores(&store, date, &code).await?;
                    alerts::maybe_send(&config, date, &code, &rows).await?;
                }
                println!("{}: {} selection(s) scored.", code, summary.rows_written);
            }
        }
        Commands::RescoreOnLineup { date, send_alerts } => {
            report = orchestrator::rescore_on_lineup(&store, &config, date, send_alerts).await?;
        }
        Commands::Grade { date } => {
            report.absorb(orchestrator::run_grade_stage(&store, &config, date).await?);
        }
        Commands::Backfill {
            start_date,
            end_date,
            build_features,
            score,
            all_markets,
            market,
            grade,
            no_bulk,
            workers,
        } => {
            db::migrations::run(&store).await?;
            let market_codes = if score {
                if all_markets || market.is_empty() {
                    odds::MARKET_CODES.iter().map(|c| c.to_string()).collect()
                } else {
                    market
                }
            } else {
                Vec::new()
            };
            let opts = backfill::BackfillOptions {
                start: start_date,
                end: end_date,
                build_features,
                markets: market_codes,
                grade,
                no_bulk,
                workers: workers.unwrap_or(config.backfill_workers),
            };
            let code = backfill::run_backfill(&store, &config, &http, opts).await?;
            match code {
                0 => {}
                2 => report.partial = true,
                _ => anyhow::bail!("backfill finished with worker failures"),
            }
        }
        Commands::Backtest { market, start_date, end_date, signals, output } => {
            let opts = backtest::BacktestOptions {
                market,
                start: start_date,
                end: end_date,
                signals: signals
                    .map(|s| s.split(',').map(|x| x.trim().to_uppercase()).collect()),
            };
            let summary = backtest::run_backtest(&store, &opts, &output).await?;
            println!(
                "Backtest {}: {} rows | {}W-{}L-{}P | win rate {} | ROI {} | profit {:+.2}u",
                opts.market,
                summary.rows,
                summary.wins,
                summary.losses,
                summary.pushes,
                summary
                    .win_rate
                    .map(|w| format!("{:.1}%", w * 100.0))
                    .unwrap_or_else(|| "n/a".into()),
                summary
                    .roi
                    .map(|r| format!("{:+.1}%", r * 100.0))
                    .unwrap_or_else(|| "n/a".into()),
                summary.total_profit,
            );
            if !summary.calibration.is_empty() {
                println!("Calibration (bucket, n, avg prob, win rate):");
                for (bucket, n, avg_prob, win_rate) in &summary.calibration {
                    println!("   {bucket}: n={n} prob={avg_prob:.3} realized={win_rate:.3}");
                }
            }
            if !summary.factor_correlation.is_empty() {
                println!("Factor correlation with profit:");
                for (name, r) in summary.factor_correlation.iter().take(8) {
                    println!("   {name}: {r:+.3}");
                }
            }
            println!("CSV written to {output}.");
        }
        Commands::Status => {
            let runs = db::last_runs_by_type(&store).await?;
            if runs.is_empty() {
                println!("No runs recorded yet.");
            } else {
                println!("Last run per type:");
                for run in runs {
                    println!(
                        "   {:<9} {} {} {} rows={} {}",
                        run.run_type,
                        run.game_date,
                        run.market.as_deref().unwrap_or("-"),
                        run.status,
                        run.rows_written,
                        run.started_at.format("%Y-%m-%d %H:%M:%SZ"),
                    );
                }
            }
            println!("\nTable freshness:");
            for count in db::table_counts(&store).await? {
                println!(
                    "   {:<24} {:>9} rows  latest={}",
                    count.table,
                    count.rows,
                    count.latest_date.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(report)
}
