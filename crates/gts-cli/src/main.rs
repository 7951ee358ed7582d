use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use gts_core::{SheetSnapshot, DEFAULT_KPI_DASHBOARD};
use gts_sync::{parse_rows_flexible, ServiceConfig, SheetSync};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gts-cli")]
#[command(about = "Merge CSV uploads from Cloud Storage into Google Sheets dashboards")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Listen for Cloud Storage notifications (default).
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Re-run the merge for one object already in the bucket.
    Sync {
        #[arg(long)]
        object: String,
    },
    /// Print the merge plan for a local CSV without touching any API.
    Plan {
        /// CSV file as it would be uploaded.
        #[arg(long)]
        csv: PathBuf,
        /// Object name, e.g. `daily_hours-1674409641.csv`; selects the dashboard.
        #[arg(long)]
        object: String,
        /// Export of the sheet's top rows; an empty sheet is assumed when absent.
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_KPI_DASHBOARD)]
        kpi_dashboard: String,
        /// Day the Summary row is computed from (defaults to today, UTC).
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let mut config = ServiceConfig::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            gts_web::serve(config).await?;
        }
        Commands::Sync { object } => {
            let sync = SheetSync::new(ServiceConfig::from_env()?)?;
            let outcome = sync.sync_object(&object).await?;
            println!(
                "sync complete: dashboard={} range={} rows={} inserted_row={} summary={}",
                outcome.dashboard,
                outcome.write_range,
                outcome.rows_written,
                outcome
                    .inserted_row
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "none".into()),
                outcome.summary_refreshed
            );
        }
        Commands::Plan {
            csv,
            object,
            snapshot,
            kpi_dashboard,
            today,
        } => {
            let csv_bytes = tokio::fs::read(&csv)
                .await
                .with_context(|| format!("reading {}", csv.display()))?;
            let snapshot = match snapshot {
                Some(path) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    SheetSnapshot::new(parse_rows_flexible(&bytes)?.into_iter().take(3).collect())
                }
                None => SheetSnapshot::default(),
            };
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let preview = gts_sync::preview(&object, &csv_bytes, snapshot, &kpi_dashboard, today)?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
    }

    Ok(())
}
