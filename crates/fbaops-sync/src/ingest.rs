//! Streaming ingestion of FBA inventory reports.
//!
//! The document is decoded and parsed as it arrives; rows are reconciled concurrently
//! up to a fixed limit while rows sharing a sku are applied in report order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_compression::tokio::bufread::GzipDecoder;
use chrono::{DateTime, NaiveDate, Utc};
use csv_async::{AsyncReaderBuilder, ByteRecord};
use fbaops_adapters::{AdapterError, Compression, ReportReader};
use fbaops_core::{
    parse_and_validate_number, parse_quantity, NumberOptions, RunCounters, RunCounts,
    UnsupportedFormatError, ValidationError,
};
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::reconcile::{InventoryRow, Reconciler, RowContext};

const SKU_LOCK_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),
    #[error(transparent)]
    Source(#[from] AdapterError),
    #[error("report is not readable as tab-separated text: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("report header lacks required column `{0}`")]
    MissingColumn(&'static str),
    #[error("report stream produced no data for {after:?}")]
    Stalled { after: Duration },
    #[error("row workers shut down before the report was drained")]
    Closed,
}

/// Identifies one ingestion run of one report document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub run_id: Uuid,
    pub report_document_id: String,
    pub country_code: String,
    pub currency: String,
    pub day: NaiveDate,
}

impl ReportContext {
    fn row_context(&self) -> RowContext {
        RowContext {
            country_code: self.country_code.clone(),
            currency: self.currency.clone(),
            report_document_id: self.report_document_id.clone(),
            day: self.day,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub report_document_id: String,
    pub country_code: String,
    pub rows_read: u64,
    pub rows_reconciled: u64,
    pub rows_failed: u64,
    pub rows_invalid: u64,
    pub counts: RunCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RowTally {
    read: u64,
    reconciled: u64,
    failed: u64,
    invalid: u64,
}

impl RowTally {
    fn absorb(&mut self, joined: Result<bool, JoinError>) {
        match joined {
            Ok(true) => self.reconciled += 1,
            Ok(false) => self.failed += 1,
            Err(err) => {
                warn!(error = %err, "row task aborted");
                self.failed += 1;
            }
        }
    }
}

/// Positions of the report columns the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    sku: usize,
    asin: usize,
    quantity: usize,
    fnsku: Option<usize>,
    price: Option<usize>,
    product_name: Option<usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &ByteRecord) -> Result<Self, IngestError> {
        let names: Vec<String> = headers
            .iter()
            .map(|h| {
                clean_field(&String::from_utf8_lossy(h))
                    .trim_start_matches('\u{feff}')
                    .to_ascii_lowercase()
            })
            .collect();
        let position = |name: &str| names.iter().position(|n| n == name);
        let require = |name: &'static str| position(name).ok_or(IngestError::MissingColumn(name));

        Ok(Self {
            sku: require("sku")?,
            asin: require("asin")?,
            quantity: require("afn-fulfillable-quantity")?,
            fnsku: position("fnsku"),
            price: position("your-price"),
            product_name: position("product-name"),
        })
    }

    fn field(record: &ByteRecord, index: usize) -> Option<String> {
        record
            .get(index)
            .map(|raw| clean_field(&String::from_utf8_lossy(raw)))
            .filter(|value| !value.is_empty())
    }

    pub fn parse_row(&self, record: &ByteRecord) -> Result<InventoryRow, ValidationError> {
        let sku = Self::field(record, self.sku).ok_or_else(|| ValidationError::Missing {
            param: "sku".into(),
        })?;
        let asin = Self::field(record, self.asin)
            .map(|a| a.to_ascii_uppercase())
            .ok_or_else(|| ValidationError::Missing {
                param: "asin".into(),
            })?;
        let quantity_raw = Self::field(record, self.quantity).unwrap_or_default();
        let fulfillable_quantity = parse_quantity(&quantity_raw, "afn-fulfillable-quantity")?;
        let price = match self.price.and_then(|i| Self::field(record, i)) {
            Some(raw) => Some(parse_and_validate_number(&raw, &NumberOptions::money("your-price"))?),
            None => None,
        };

        Ok(InventoryRow {
            sku,
            fnsku: self.fnsku.and_then(|i| Self::field(record, i)),
            asin,
            fulfillable_quantity,
            price,
            product_name: self.product_name.and_then(|i| Self::field(record, i)),
        })
    }
}

/// Trims a raw field and undoes the stray quoting reports carry around free text.
pub fn clean_field(raw: &str) -> String {
    let trimmed = raw.trim();
    let unwrapped = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unwrapped.replace("\"\"", "\"").trim().to_string()
}

type DecodedReader = Box<dyn AsyncRead + Send + Unpin>;

fn decode(reader: ReportReader, compression: Compression) -> DecodedReader {
    match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => {
            let mut decoder = GzipDecoder::new(reader);
            decoder.multiple_members(true);
            Box::new(decoder)
        }
    }
}

pub struct ReportIngestor {
    reconciler: Arc<Reconciler>,
    row_concurrency: usize,
    stall_timeout: Duration,
}

impl ReportIngestor {
    pub fn new(reconciler: Arc<Reconciler>, row_concurrency: usize, stall_timeout: Duration) -> Self {
        Self {
            reconciler,
            row_concurrency: row_concurrency.max(1),
            stall_timeout,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Reads, decodes and reconciles a whole report document.
    ///
    /// Invalid and failing rows are counted and skipped. The run only fails when the
    /// document itself cannot be read; rows already reconciled stay committed.
    pub async fn ingest(
        &self,
        reader: ReportReader,
        compression: Compression,
        ctx: ReportContext,
    ) -> Result<IngestionSummary, IngestError> {
        let started_at = Utc::now();
        let counters = Arc::new(RunCounters::new());
        counters.start();

        let result = self
            .ingest_rows(decode(reader, compression), &ctx, &counters)
            .await;
        let counts = counters.get_counts();
        counters.stop_and_reset();
        let tally = result?;

        let summary = IngestionSummary {
            run_id: ctx.run_id,
            report_document_id: ctx.report_document_id,
            country_code: ctx.country_code,
            rows_read: tally.read,
            rows_reconciled: tally.reconciled,
            rows_failed: tally.failed,
            rows_invalid: tally.invalid,
            counts,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            run_id = %summary.run_id,
            rows_read = summary.rows_read,
            rows_reconciled = summary.rows_reconciled,
            rows_failed = summary.rows_failed,
            rows_invalid = summary.rows_invalid,
            counts = %summary.counts.summary_line(),
            "report ingestion finished"
        );
        Ok(summary)
    }

    async fn within<F: Future>(&self, fut: F) -> Result<F::Output, IngestError> {
        tokio::time::timeout(self.stall_timeout, fut)
            .await
            .map_err(|_| IngestError::Stalled {
                after: self.stall_timeout,
            })
    }

    async fn ingest_rows(
        &self,
        input: DecodedReader,
        ctx: &ReportContext,
        counters: &Arc<RunCounters>,
    ) -> Result<RowTally, IngestError> {
        let mut csv = AsyncReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .create_reader(input);
        let headers = self.within(csv.byte_headers()).await??.clone();
        let columns = ColumnMap::from_headers(&headers)?;

        let row_ctx = Arc::new(ctx.row_context());
        let semaphore = Arc::new(Semaphore::new(self.row_concurrency));
        let mut sku_locks: HashMap<String, Arc<Mutex<()>>> = HashMap::new();
        let mut tasks: JoinSet<bool> = JoinSet::new();
        let mut tally = RowTally::default();
        let mut records = csv.byte_records();
        let mut line: u64 = 1;

        let streamed: Result<(), IngestError> = loop {
            let next = match self.within(records.next()).await {
                Ok(next) => next,
                Err(err) => break Err(err),
            };
            let record = match next {
                None => break Ok(()),
                Some(Ok(record)) => record,
                Some(Err(err)) => break Err(err.into()),
            };
            line += 1;
            tally.read += 1;

            let row = match columns.parse_row(&record) {
                Ok(row) => row,
                Err(err) => {
                    tally.invalid += 1;
                    warn!(line, country_code = %ctx.country_code, error = %err, "skipping invalid report row");
                    continue;
                }
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break Err(IngestError::Closed);
            };
            let lock = sku_locks.entry(row.sku.clone()).or_default().clone();
            let guard = lock.lock_owned().await;

            let reconciler = self.reconciler.clone();
            let counters = counters.clone();
            let row_ctx = row_ctx.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let _guard = guard;
                    match reconciler.reconcile_row(&counters, &row, &row_ctx).await {
                        Ok(_) => true,
                        Err(err) => {
                            warn!(
                                sku = %row.sku,
                                country_code = %row_ctx.country_code,
                                error = %err,
                                "row reconciliation failed"
                            );
                            false
                        }
                    }
                }
                .in_current_span(),
            );

            if sku_locks.len() > SKU_LOCK_PRUNE_THRESHOLD {
                sku_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            while tasks.len() > self.row_concurrency * 2 {
                match tasks.join_next().await {
                    Some(joined) => tally.absorb(joined),
                    None => break,
                }
            }
        };

        // Rows already handed out finish even when the stream broke off.
        while let Some(joined) = tasks.join_next().await {
            tally.absorb(joined);
        }
        streamed?;
        Ok(tally)
    }
}
