//! gym-kpi — KPI reports for a gym's member, payment and locker records.
//!
//! Reads raw records from a data directory, computes the enabled KPI cards for
//! one calendar period, and prints the snapshot as JSON on stdout.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use gym_analytics::{anchor_range, baseline_range, relative_range};
use gym_core::clock::{Clock, FixedClock, SystemClock};
use gym_core::config::AppConfig;
use gym_core::types::{Direction, Granularity, StatusFilter};
use gym_reporting::{
    DataSources, FileConfigStore, JsonFileSources, KpiCardRegistry, KpiDashboard,
    MemoryConfigStore, RefreshOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "gym-kpi")]
#[command(about = "KPI reports over gym membership, payment and locker records")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still override it)
    #[arg(long, env = "GYM_KPI_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding members.json, payments.json, lockers.json and attendance.json
    #[arg(long, env = "GYM_KPI__DASHBOARD__DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory where KPI card configuration is persisted
    #[arg(long, env = "GYM_KPI__DASHBOARD__CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Pretend today is this date (YYYY-MM-DD)
    #[arg(long)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute KPIs for one period
    Report {
        /// day, week, month or year (defaults to the configured granularity)
        #[arg(long, value_parser = parse_granularity)]
        granularity: Option<Granularity>,

        /// Any date inside the period to report on (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Payment status filter: all, completed, pending, failed or refunded
        #[arg(long, default_value = "all", value_parser = parse_status)]
        status: StatusFilter,

        /// Move this many periods forward (positive) or back (negative)
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        shift: i32,

        /// Ignore card visibility and compute every KPI
        #[arg(long, default_value_t = false)]
        all: bool,
    },

    /// Print the period containing a date and its comparison baseline
    Range {
        #[arg(long, value_parser = parse_granularity)]
        granularity: Option<Granularity>,

        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        shift: i32,
    },

    /// Inspect or change which KPI cards are shown
    Cards {
        #[command(subcommand)]
        action: CardsAction,
    },
}

#[derive(Subcommand, Debug)]
enum CardsAction {
    /// List every card with its state
    List,
    /// Enable one card
    Enable { id: String },
    /// Disable one card
    Disable { id: String },
    /// Enable every card
    EnableAll,
    /// Disable every card
    DisableAll,
    /// Enable or disable every card of a category
    Category {
        name: String,
        #[arg(long, default_value_t = false)]
        off: bool,
    },
}

#[derive(Serialize)]
struct RangeReport {
    granularity: Granularity,
    start: NaiveDate,
    end: NaiveDate,
    days: i64,
    baseline_start: NaiveDate,
    baseline_end: NaiveDate,
}

fn parse_granularity(s: &str) -> Result<Granularity, String> {
    s.parse().map_err(|e: gym_core::GymError| e.to_string())
}

fn parse_status(s: &str) -> Result<StatusFilter, String> {
    s.parse().map_err(|e: gym_core::GymError| e.to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gym_kpi=info,gym_reporting=info,gym_analytics=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(dir) = cli.data_dir {
        config.dashboard.data_dir = dir;
    }
    if let Some(dir) = cli.config_dir {
        config.dashboard.config_dir = dir;
    }

    let clock: Arc<dyn Clock> = match cli.today {
        Some(date) => Arc::new(FixedClock::new(date)),
        None => Arc::new(SystemClock),
    };

    info!(
        data_dir = %config.dashboard.data_dir.display(),
        config_dir = %config.dashboard.config_dir.display(),
        today = %clock.today(),
        "Configuration loaded"
    );

    let card_store = Arc::new(FileConfigStore::new(&config.dashboard.config_dir));

    match cli.command {
        Command::Report {
            granularity,
            date,
            status,
            shift,
            all,
        } => {
            let registry = if all {
                Arc::new(KpiCardRegistry::new(
                    Arc::new(MemoryConfigStore::new()),
                    config.dashboard.cards_key.clone(),
                ))
            } else {
                Arc::new(KpiCardRegistry::open(
                    card_store,
                    config.dashboard.cards_key.clone(),
                ))
            };
            let sources = DataSources::from_shared(Arc::new(JsonFileSources::new(
                &config.dashboard.data_dir,
            )));
            let dashboard = KpiDashboard::new(&config, sources, registry, clock.clone());

            let granularity = granularity.unwrap_or(config.analytics.default_granularity);
            dashboard.set_granularity(granularity);
            dashboard.set_range(anchor_range(granularity, date.unwrap_or_else(|| clock.today())));
            dashboard.set_status_filter(status);
            let direction = if shift < 0 { Direction::Prev } else { Direction::Next };
            for _ in 0..shift.unsigned_abs() {
                dashboard.navigate(granularity, direction);
            }

            match dashboard.refresh().await? {
                RefreshOutcome::Applied(snapshot) => print_json(&*snapshot)?,
                RefreshOutcome::Superseded { generation, latest } => {
                    anyhow::bail!("refresh {generation} superseded by {latest}")
                }
            }
        }

        Command::Range {
            granularity,
            date,
            shift,
        } => {
            let granularity = granularity.unwrap_or(config.analytics.default_granularity);
            let mut range = anchor_range(granularity, date.unwrap_or_else(|| clock.today()));
            let direction = if shift < 0 { Direction::Prev } else { Direction::Next };
            for _ in 0..shift.unsigned_abs() {
                range = relative_range(granularity, direction, range.start());
            }
            let baseline = baseline_range(range);
            print_json(&RangeReport {
                granularity,
                start: range.start(),
                end: range.end(),
                days: range.len_days(),
                baseline_start: baseline.start(),
                baseline_end: baseline.end(),
            })?;
        }

        Command::Cards { action } => {
            let registry = KpiCardRegistry::open(card_store, config.dashboard.cards_key.clone());
            match action {
                CardsAction::List => {}
                CardsAction::Enable { id } => registry.set_enabled(&id, true)?,
                CardsAction::Disable { id } => registry.set_enabled(&id, false)?,
                CardsAction::EnableAll => registry.toggle_all(true)?,
                CardsAction::DisableAll => registry.toggle_all(false)?,
                CardsAction::Category { name, off } => {
                    let matched = registry
                        .toggle_category(&name, !off)
                        .with_context(|| format!("updating category {name}"))?;
                    if matched == 0 {
                        anyhow::bail!("no KPI cards in category {name}");
                    }
                }
            }
            print_json(&registry.cards())?;
        }
    }

    Ok(())
}
