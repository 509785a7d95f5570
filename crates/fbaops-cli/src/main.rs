use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fbaops_adapters::Compression;
use fbaops_sync::{connect_store, run_document_from_env, IngestionSummary, ReportOrigin, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fbaops-cli")]
#[command(about = "FBA inventory report ingestion and pricing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest a report document fetched from the reports API.
    Ingest {
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        country: String,
    },
    /// Ingest a report stored on disk.
    IngestFile {
        path: PathBuf,
        #[arg(long)]
        country: String,
        /// Compression tag (`GZIP`); detected from the extension when omitted.
        #[arg(long)]
        compression: Option<String>,
    },
    /// Apply database migrations.
    Migrate,
    /// Serve the report notification endpoint.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest {
            document_id,
            country,
        } => {
            let summary = run_document_from_env(&document_id, &country, ReportOrigin::SpApi).await?;
            print_summary(&summary);
        }
        Commands::IngestFile {
            path,
            country,
            compression,
        } => {
            let compression = compression
                .map(|tag| Compression::from_tag(Some(tag.as_str())))
                .transpose()?;
            let file_name = path
                .file_name()
                .with_context(|| format!("{} is not a file path", path.display()))?
                .to_string_lossy()
                .into_owned();
            let root = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));

            let origin = ReportOrigin::Files { root, compression };
            let summary = run_document_from_env(&file_name, &country, origin).await?;
            print_summary(&summary);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env()?;
            let store = connect_store(&config).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => fbaops_web::serve_from_env().await?,
    }

    Ok(())
}

fn print_summary(summary: &IngestionSummary) {
    println!(
        "ingest complete: run_id={} country={} rows={} reconciled={} failed={} invalid={}",
        summary.run_id,
        summary.country_code,
        summary.rows_read,
        summary.rows_reconciled,
        summary.rows_failed,
        summary.rows_invalid
    );
    println!("{}", summary.counts.summary_line());
}
