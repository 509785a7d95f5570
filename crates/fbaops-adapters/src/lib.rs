//! External collaborators of the pricing pipeline: report documents, catalog data,
//! exchange rates and marketplace settings.

use fbaops_core::{UnsupportedFormatError, ValidationError};
use fbaops_storage::FetchError;
use thiserror::Error;

pub mod catalog;
pub mod currency;
pub mod marketplace;
pub mod report;

pub use catalog::{length_to_cm, weight_to_kg, CatalogLookup, SpApiCatalogClient, StaticCatalog};
pub use currency::{CurrencyConverter, CurrencyError, DailyRateTable};
pub use marketplace::{Marketplace, MarketplaceRegistry};
pub use report::{
    Compression, FileReportSource, ReportDocument, ReportReader, ReportSource, SpApiClient,
    SpApiConfig,
};

pub const CRATE_NAME: &str = "fbaops-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),
    #[error(transparent)]
    Currency(#[from] CurrencyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no marketplace configured for country {0}")]
    UnknownMarketplace(String),
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
