//! Tributary - incremental sync jobs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tributary_common::logging::{init_logging, LogConfig, LogLevel};
use tributary_sync::config::{DbtConfig, EventsConfig, ProfilesConfig, SyncConfig};
use tributary_sync::fetch::DbtCloudClient;
use tributary_sync::jobs::{
    run_job, DbtDataset, DbtSync, EventsSync, ProfileOptions, ProfileSync,
};
use tributary_sync::push::ProfileApiClient;
use tributary_sync::storage::S3Storage;
use tributary_sync::warehouse::{RedshiftDataWarehouse, StatementRunner};

#[derive(Parser, Debug)]
#[command(name = "tributary")]
#[command(author, version, about = "Incremental sync jobs for the analytics warehouse")]
struct Cli {
    #[command(subcommand)]
    job: Job,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load variables from this file before reading configuration
    #[arg(long, global = true, env = "TRIBUTARY_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Job {
    /// Load model executions of the newest production run
    DbtRunDetails {
        /// Table in TARGET_SCHEMA to replace
        #[arg(long)]
        target_table: String,

        /// Load this run instead of discovering the newest one
        #[arg(long)]
        run_id: Option<i64>,
    },

    /// Load test results of the newest test run
    DbtTests {
        /// Table in TARGET_SCHEMA to replace
        #[arg(long)]
        target_table: String,

        /// Load this run instead of discovering the newest one
        #[arg(long)]
        run_id: Option<i64>,
    },

    /// Push changed user properties to the product-analytics API
    PushProfiles {
        /// Send every record, not only changed ones
        #[arg(long)]
        update_all: bool,

        /// Write reference.csv and updated_reference.csv here and stop before sending
        #[arg(long, value_name = "DIR")]
        dry_run: Option<PathBuf>,
    },

    /// Load new event-feed objects
    LoadEvents {
        /// Give every object its own scratch table
        #[arg(long)]
        split_temp_tables: bool,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::DbtRunDetails { .. } => "dbt-run-details",
            Job::DbtTests { .. } => "dbt-tests",
            Job::PushProfiles { .. } => "push-profiles",
            Job::LoadEvents { .. } => "load-events",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    }

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tributary")
        .filter_directives("aws_config=warn,aws_smithy_runtime=warn,hyper=info")
        .build()
        .overlay(|key| std::env::var(key).ok())?;
    let _guard = init_logging(&log_config)?;

    let name = cli.job.name();
    let report = run_job(name, dispatch(cli.job)).await?;

    info!(job = name, loaded = report.units_loaded, "Done");
    Ok(())
}

async fn dispatch(job: Job) -> tributary_sync::Result<tributary_sync::jobs::JobReport> {
    let sync = SyncConfig::from_env()?;
    let staging = Arc::new(S3Storage::new(&sync.staging).await);
    let warehouse = Arc::new(RedshiftDataWarehouse::new(&sync.warehouse).await);
    let runner = StatementRunner::new(warehouse, sync.warehouse.poll);

    match job {
        Job::DbtRunDetails {
            target_table,
            run_id,
        } => {
            let dbt = DbtConfig::from_env()?;
            let client = DbtCloudClient::new(&dbt, sync.retry)?;
            DbtSync::new(client, staging, runner, dbt, &sync)
                .run(DbtDataset::RunDetails, &target_table, run_id)
                .await
        },
        Job::DbtTests {
            target_table,
            run_id,
        } => {
            let dbt = DbtConfig::from_env()?;
            let client = DbtCloudClient::new(&dbt, sync.retry)?;
            DbtSync::new(client, staging, runner, dbt, &sync)
                .run(DbtDataset::Tests, &target_table, run_id)
                .await
        },
        Job::PushProfiles {
            update_all,
            dry_run,
        } => {
            let profiles = ProfilesConfig::from_env()?;
            let api = ProfileApiClient::new(&profiles)?;
            let options = ProfileOptions {
                update_all,
                dry_run,
            };
            ProfileSync::new(staging, runner, profiles, &sync)
                .run(&api, &options)
                .await
        },
        Job::LoadEvents { split_temp_tables } => {
            let mut events = EventsConfig::from_env()?;
            events.split_temp_tables |= split_temp_tables;
            let feed = Arc::new(S3Storage::new(&events.feed).await);
            EventsSync::new(feed, staging, runner, &events, &sync)?
                .run()
                .await
        },
    }
}
