//! Report-to-database synchronization: resolves a report document, streams it and
//! reconciles every row into the catalog tables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fbaops_adapters::{
    CatalogLookup, Compression, CurrencyConverter, DailyRateTable, FileReportSource,
    MarketplaceRegistry, ReportSource, SpApiCatalogClient, SpApiClient, SpApiConfig,
};
use fbaops_storage::{HttpClientConfig, HttpFetcher, PgStore, Store};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod ingest;
pub mod reconcile;

pub use config::SyncConfig;
pub use ingest::{clean_field, ColumnMap, IngestError, IngestionSummary, ReportContext, ReportIngestor};
pub use reconcile::{
    InventoryRow, PricingDefaults, ReconcileError, Reconciler, RowContext, RowOutcome, SkuRequest,
};

pub const CRATE_NAME: &str = "fbaops-sync";

/// Where report documents are read from.
#[derive(Debug, Clone)]
pub enum ReportOrigin {
    SpApi,
    /// Local files; document ids are paths relative to `root`.
    Files {
        root: PathBuf,
        compression: Option<Compression>,
    },
}

pub struct SyncPipeline {
    source: Arc<dyn ReportSource>,
    ingestor: ReportIngestor,
}

impl SyncPipeline {
    pub fn new(source: Arc<dyn ReportSource>, ingestor: ReportIngestor) -> Self {
        Self { source, ingestor }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        self.ingestor.reconciler()
    }

    pub async fn run_document(
        &self,
        report_document_id: &str,
        country_code: &str,
    ) -> Result<IngestionSummary, IngestError> {
        self.run_document_with_id(Uuid::new_v4(), report_document_id, country_code)
            .await
    }

    /// Ingests one report document for `country_code` under a caller-chosen run id.
    ///
    /// Unknown marketplaces and unsupported compression fail before any row is read.
    pub async fn run_document_with_id(
        &self,
        run_id: Uuid,
        report_document_id: &str,
        country_code: &str,
    ) -> Result<IngestionSummary, IngestError> {
        let country_code = country_code.trim().to_ascii_uppercase();
        let span = info_span!(
            "ingest",
            %run_id,
            document_id = report_document_id,
            country_code = %country_code
        );
        async {
            let currency = self
                .reconciler()
                .marketplaces()
                .require(&country_code)?
                .currency
                .clone();
            let document = self.source.report_document(report_document_id).await?;
            let compression = document.compression()?;
            info!(compression = compression.tag().unwrap_or("none"), "opening report document");
            let reader = self.source.open_document(&document).await?;

            let ctx = ReportContext {
                run_id,
                report_document_id: report_document_id.to_string(),
                country_code: country_code.clone(),
                currency,
                day: Utc::now().date_naive(),
            };
            self.ingestor.ingest(reader, compression, ctx).await
        }
        .instrument(span)
        .await
    }
}

pub async fn load_marketplaces(config: &SyncConfig) -> Result<MarketplaceRegistry> {
    let path = config.marketplaces_path();
    let registry = MarketplaceRegistry::load(&path)
        .await
        .with_context(|| format!("loading marketplaces from {}", path.display()))?;
    let countries = registry.countries().collect::<Vec<_>>().join(",");
    if countries.is_empty() {
        bail!("{} configures no marketplaces", path.display());
    }
    info!(%countries, "loaded marketplaces");
    Ok(registry)
}

/// Missing rate files leave cross-currency derivation failing row by row.
pub async fn load_exchange_rates(config: &SyncConfig) -> Result<DailyRateTable> {
    let path = config.exchange_rates_path();
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        warn!(path = %path.display(), "no exchange rate file, only same-currency derivation will succeed");
        return Ok(DailyRateTable::new());
    }
    DailyRateTable::load(&path).await
}

pub fn http_fetcher(config: &SyncConfig) -> Result<HttpFetcher> {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })
}

pub fn spapi_config(config: &SyncConfig) -> SpApiConfig {
    SpApiConfig {
        endpoint: config.spapi_endpoint.clone(),
        access_token: config.spapi_access_token.clone(),
    }
}

/// Wires a pipeline against an existing store.
pub async fn build_pipeline(
    config: &SyncConfig,
    store: Arc<dyn Store>,
    origin: ReportOrigin,
) -> Result<SyncPipeline> {
    let marketplaces = Arc::new(load_marketplaces(config).await?);
    let rates: Arc<dyn CurrencyConverter> = Arc::new(load_exchange_rates(config).await?);
    let http = http_fetcher(config)?;
    let catalog: Arc<dyn CatalogLookup> = Arc::new(SpApiCatalogClient::new(
        http.clone(),
        spapi_config(config),
        marketplaces.clone(),
    ));
    let source: Arc<dyn ReportSource> = match origin {
        ReportOrigin::SpApi => Arc::new(SpApiClient::new(http, spapi_config(config))),
        ReportOrigin::Files { root, compression } => {
            let files = FileReportSource::new(root);
            Arc::new(match compression {
                Some(c) => files.with_compression(c),
                None => files,
            })
        }
    };

    let reconciler = Arc::new(Reconciler::new(store, catalog, rates, marketplaces, config.pricing));
    let ingestor = ReportIngestor::new(reconciler, config.row_concurrency, config.stall_timeout);
    Ok(SyncPipeline::new(source, ingestor))
}

pub async fn connect_store(config: &SyncConfig) -> Result<Arc<PgStore>> {
    let store = PgStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("connecting to database")?;
    Ok(Arc::new(store))
}

/// Connects to the configured database and ingests one document.
pub async fn run_document_from_env(
    report_document_id: &str,
    country_code: &str,
    origin: ReportOrigin,
) -> Result<IngestionSummary> {
    let config = SyncConfig::from_env()?;
    let store = connect_store(&config).await?;
    let pipeline = build_pipeline(&config, store, origin).await?;
    Ok(pipeline.run_document(report_document_id, country_code).await?)
}
