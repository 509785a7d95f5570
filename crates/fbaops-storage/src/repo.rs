//! Repository contracts, one per persisted entity.
//!
//! Natural keys are unique: creating a second record for an existing key fails with
//! [`RepositoryError::Conflict`] instead of silently duplicating it.

use async_trait::async_trait;
use chrono::NaiveDate;
use fbaops_core::{
    AfnInventoryDailyUpdate, AmazonReferralFee, Asin, AsinSku, EanAsin, FbaFee,
    MinimumSellingPrice, NewAfnInventoryDailyUpdate, NewAsin, NewEanAsin, NewFbaFee,
    NewMinimumSellingPrice, NewSellingPriceHistory, NewSku, PriceGridFbaFee, PricingRule,
    SellingPriceHistory, Sku,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{entity} {key} already exists")]
    Conflict { entity: &'static str, key: String },
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Outcome of an upsert by natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<T> {
    pub record: T,
    /// `false` when an existing record was overwritten.
    pub created: bool,
}

#[async_trait]
pub trait SkuRepository: Send + Sync {
    async fn find_sku(&self, sku: &str, country_code: &str) -> RepoResult<Option<Sku>>;
    async fn get_sku(&self, id: i64) -> RepoResult<Option<Sku>>;
    /// Every country's record for a sku code, ordered by id.
    async fn find_skus_by_code(&self, sku: &str) -> RepoResult<Vec<Sku>>;
    async fn create_sku(&self, new: NewSku) -> RepoResult<Sku>;
    async fn update_sku(&self, sku: &Sku) -> RepoResult<Sku>;
}

#[async_trait]
pub trait AsinRepository: Send + Sync {
    async fn find_asin(&self, asin: &str, country_code: &str) -> RepoResult<Option<Asin>>;
    async fn get_asin(&self, id: i64) -> RepoResult<Option<Asin>>;
    /// Every country's record for an ASIN, ordered by id.
    async fn find_asins_by_code(&self, asin: &str) -> RepoResult<Vec<Asin>>;
    async fn create_asin(&self, new: NewAsin) -> RepoResult<Asin>;
    async fn update_asin(&self, asin: &Asin) -> RepoResult<Asin>;
}

#[async_trait]
pub trait AsinSkuRepository: Send + Sync {
    async fn find_asin_sku(&self, asin_id: i64, sku_id: i64) -> RepoResult<Option<AsinSku>>;
    async fn create_asin_sku(&self, asin_id: i64, sku_id: i64) -> RepoResult<AsinSku>;
    async fn list_asin_skus_for_asin(&self, asin_id: i64) -> RepoResult<Vec<AsinSku>>;
    async fn list_asin_skus_for_sku(&self, sku_id: i64) -> RepoResult<Vec<AsinSku>>;
}

#[async_trait]
pub trait MinimumSellingPriceRepository: Send + Sync {
    async fn find_minimum_selling_price(&self, sku_id: i64) -> RepoResult<Option<MinimumSellingPrice>>;
    async fn create_minimum_selling_price(
        &self,
        new: NewMinimumSellingPrice,
    ) -> RepoResult<MinimumSellingPrice>;
    async fn update_minimum_selling_price(
        &self,
        price: &MinimumSellingPrice,
    ) -> RepoResult<MinimumSellingPrice>;
}

#[async_trait]
pub trait AfnInventoryRepository: Send + Sync {
    async fn find_afn_snapshot(&self, sku_id: i64) -> RepoResult<Option<AfnInventoryDailyUpdate>>;
    async fn list_afn_snapshots_for_sku_code(&self, sku: &str) -> RepoResult<Vec<AfnInventoryDailyUpdate>>;
    /// Inserts the snapshot for `new.sku_id` or overwrites its price, quantity, currency
    /// and report reference in one step.
    async fn upsert_afn_snapshot(
        &self,
        new: NewAfnInventoryDailyUpdate,
    ) -> RepoResult<Upserted<AfnInventoryDailyUpdate>>;
}

#[async_trait]
pub trait SellingPriceHistoryRepository: Send + Sync {
    async fn find_selling_price_history(
        &self,
        sku_id: i64,
        day: NaiveDate,
    ) -> RepoResult<Option<SellingPriceHistory>>;
    async fn create_selling_price_history(
        &self,
        new: NewSellingPriceHistory,
    ) -> RepoResult<SellingPriceHistory>;
}

#[async_trait]
pub trait EanAsinRepository: Send + Sync {
    async fn list_ean_asins(&self, asin_id: i64) -> RepoResult<Vec<EanAsin>>;
    async fn create_ean_asin(&self, new: NewEanAsin) -> RepoResult<EanAsin>;
}

#[async_trait]
pub trait FbaFeeRepository: Send + Sync {
    async fn find_fba_fee(&self, asin_id: i64) -> RepoResult<Option<FbaFee>>;
    async fn create_fba_fee(&self, new: NewFbaFee) -> RepoResult<FbaFee>;
}

/// Read-only reference data maintained outside the ingestion pipeline.
#[async_trait]
pub trait FeeReferenceRepository: Send + Sync {
    /// Fee grid for a country in ascending category order.
    async fn list_price_grid_fba_fees(&self, country_code: &str) -> RepoResult<Vec<PriceGridFbaFee>>;
    async fn get_price_grid_fba_fee(&self, id: i64) -> RepoResult<Option<PriceGridFbaFee>>;
    async fn find_referral_fee(
        &self,
        country_code: &str,
        product_category: &str,
    ) -> RepoResult<Option<AmazonReferralFee>>;
    async fn get_pricing_rule(&self, id: i64) -> RepoResult<Option<PricingRule>>;
}

/// Everything the reconciliation chain reads and writes.
pub trait Store:
    SkuRepository
    + AsinRepository
    + AsinSkuRepository
    + MinimumSellingPriceRepository
    + AfnInventoryRepository
    + SellingPriceHistoryRepository
    + EanAsinRepository
    + FbaFeeRepository
    + FeeReferenceRepository
{
}

impl<T> Store for T where
    T: SkuRepository
        + AsinRepository
        + AsinSkuRepository
        + MinimumSellingPriceRepository
        + AfnInventoryRepository
        + SellingPriceHistoryRepository
        + EanAsinRepository
        + FbaFeeRepository
        + FeeReferenceRepository
{
}
