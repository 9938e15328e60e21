use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPool;
use stays_core::JobKind;
use stays_import::{
    export_hotels, import_csv, JobController, JobDeps, ServiceConfig, MIGRATOR,
};
use stays_scrape::{CsvReplayFetcher, LinkCollector, SearchListingClient};
use stays_storage::{CsvStore, HotelCsvRow};
use stays_web::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stays")]
#[command(about = "Hotel stays scraping and import service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Serve the dashboard and JSON API.
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Collect hotel links into the links file.
    Links,
    /// Scrape and import hotel details from the existing links file.
    Hotels,
    /// Run link collection (when needed) followed by hotel scraping.
    Complete {
        /// Re-collect links even when a cached links file exists.
        #[arg(long)]
        update_links: bool,
    },
    /// Import a hotels checkpoint file into the database.
    Import { path: PathBuf },
    /// Export the database back to a hotels CSV file.
    Export { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env();
    let pool = PgPool::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;

    match cli.command {
        Commands::Migrate => {
            MIGRATOR.run(&pool).await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve { port } => {
            let controller = build_controller(pool, &config)?;
            let state = AppState {
                controller,
                paths: config.data_paths(),
            };
            stays_web::serve(state, port).await?;
        }
        Commands::Links => {
            run_job(&build_controller(pool, &config)?, JobKind::LinksOnly).await?;
        }
        Commands::Hotels => {
            run_job(&build_controller(pool, &config)?, JobKind::HotelsOnly).await?;
        }
        Commands::Complete { update_links } => {
            let kind = if update_links {
                JobKind::CompleteForceUpdateLinks
            } else {
                JobKind::Complete
            };
            run_job(&build_controller(pool, &config)?, kind).await?;
        }
        Commands::Import { path } => {
            let store: CsvStore<HotelCsvRow> = CsvStore::new(path);
            let report = import_csv(&pool, &store).await?;
            println!(
                "imported {} hotels, {} errors",
                report.imported, report.errors
            );
        }
        Commands::Export { path } => {
            let store: CsvStore<HotelCsvRow> = CsvStore::new(&path);
            let count = export_hotels(&pool, &store).await?;
            println!("exported {} hotels to {}", count, path.display());
        }
    }

    Ok(())
}

fn build_controller(pool: PgPool, config: &ServiceConfig) -> Result<JobController> {
    let paths = config.data_paths();
    let listing = SearchListingClient::new(config.search.clone())?;
    let replay = CsvReplayFetcher::from_store(&CsvStore::new(paths.hotels.clone()))?;
    Ok(JobController::new(JobDeps {
        pool,
        paths,
        seeds_file: config.seeds_file.clone(),
        collector: LinkCollector::default(),
        listing_fetcher: Arc::new(listing),
        hotel_fetcher: Arc::new(replay),
    }))
}

async fn run_job(controller: &JobController, kind: JobKind) -> Result<()> {
    let job_id = controller.start(kind).await?;
    println!("job {job_id} started ({kind})");

    tokio::select! {
        record = controller.wait(job_id) => {
            let record = record?;
            println!(
                "job {job_id} {}: {}",
                record.status,
                record.message.as_deref().unwrap_or("")
            );
        }
        _ = tokio::signal::ctrl_c() => {
            // Cooperative stop: the in-flight hotel finishes cleanly first.
            println!("stopping job {job_id}...");
            controller.stop(job_id).await?;
            let record = controller.wait(job_id).await?;
            println!(
                "job {job_id} {}: {}",
                record.status,
                record.message.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}
