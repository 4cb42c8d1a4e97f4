use chrono::{DateTime, Utc};
use clap::Parser;
use flow_cli_common::{init_logging, LogArgs};
use std::path::PathBuf;
use std::sync::Arc;

use search_extract::config::Config;
use search_extract::orchestrator::{Pipeline, RunMode};
use search_extract::warehouse::HttpWarehouse;

/// search-extract pulls time-ranged records out of a paginated HTTP
/// search API and loads them into a warehouse.
#[derive(Debug, Parser)]
#[clap(author, name = "search-extract", version)]
struct Args {
    #[clap(flatten)]
    log_args: LogArgs,

    /// Path to a JSON config file describing the API, warehouse, and tunables.
    #[arg(long = "config")]
    config: PathBuf,

    /// The API endpoint (relative to the configured base URL) to extract from.
    #[arg(long = "endpoint")]
    endpoint: String,

    /// Explicit window start. Overrides both --incremental and --full-refresh.
    #[arg(long = "from")]
    from: Option<DateTime<Utc>>,

    /// Explicit window end. Defaults to now.
    #[arg(long = "to")]
    to: Option<DateTime<Utc>>,

    /// Resolve the window start from the warehouse's watermark, falling
    /// back to a 30-day lookback only if no watermark exists yet. This
    /// is the default when neither `--incremental` nor `--full-refresh`
    /// is given and `--from` is absent.
    #[arg(long = "incremental", conflicts_with = "full_refresh")]
    incremental: bool,

    /// Always resolve the window start to a 30-day lookback, ignoring
    /// any existing watermark.
    #[arg(long = "full-refresh", conflicts_with = "incremental")]
    full_refresh: bool,

    /// Base URL for the warehouse's load-batch endpoint.
    #[arg(long = "warehouse-load-url")]
    warehouse_load_url: url::Url,

    /// Base URL for the warehouse's watermark-query endpoint.
    #[arg(long = "warehouse-watermark-url")]
    warehouse_watermark_url: url::Url,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_logging(&args.log_args);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    let config = Config::parse_from_json_file(&args.config)?;

    let warehouse = Arc::new(HttpWarehouse::new(
        args.warehouse_load_url,
        args.warehouse_watermark_url,
        reqwest::Client::new(),
    ));

    let mode = if args.full_refresh {
        RunMode::FullRefresh
    } else {
        RunMode::Incremental
    };

    let pipeline = Pipeline::new(config, warehouse);
    let summary = pipeline.run(&args.endpoint, args.from, args.to, mode).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.status != "success" {
        anyhow::bail!("pipeline run did not complete successfully");
    }
    Ok(())
}
