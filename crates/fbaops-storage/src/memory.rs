//! In-process store with the same uniqueness rules as the PostgreSQL schema.
//!
//! Used for dry runs and tests; reference data is seeded through the `seed_*` methods.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fbaops_core::{
    AfnInventoryDailyUpdate, AmazonReferralFee, Asin, AsinSku, EanAsin, FbaFee,
    MinimumSellingPrice, NewAfnInventoryDailyUpdate, NewAsin, NewEanAsin, NewFbaFee,
    NewMinimumSellingPrice, NewSellingPriceHistory, NewSku, PriceGridFbaFee, PricingRule,
    SellingPriceHistory, Sku,
};
use tokio::sync::Mutex;

use crate::repo::{
    AfnInventoryRepository, AsinRepository, AsinSkuRepository, EanAsinRepository,
    FbaFeeRepository, FeeReferenceRepository, MinimumSellingPriceRepository, RepoResult,
    RepositoryError, SellingPriceHistoryRepository, SkuRepository, Upserted,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    skus: BTreeMap<i64, Sku>,
    asins: BTreeMap<i64, Asin>,
    asin_skus: BTreeMap<i64, AsinSku>,
    minimum_selling_prices: BTreeMap<i64, MinimumSellingPrice>,
    afn_snapshots: BTreeMap<i64, AfnInventoryDailyUpdate>,
    price_history: BTreeMap<i64, SellingPriceHistory>,
    ean_asins: BTreeMap<i64, EanAsin>,
    fba_fees: BTreeMap<i64, FbaFee>,
    price_grid: BTreeMap<i64, PriceGridFbaFee>,
    referral_fees: BTreeMap<i64, AmazonReferralFee>,
    pricing_rules: BTreeMap<i64, PricingRule>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn conflict(entity: &'static str, key: impl Into<String>) -> RepositoryError {
    RepositoryError::Conflict {
        entity,
        key: key.into(),
    }
}

fn not_found(entity: &'static str, id: i64) -> RepositoryError {
    RepositoryError::NotFound {
        entity,
        key: id.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_price_grid_fba_fee(&self, mut row: PriceGridFbaFee) -> PriceGridFbaFee {
        let mut t = self.tables.lock().await;
        row.id = t.allocate_id();
        t.price_grid.insert(row.id, row.clone());
        row
    }

    pub async fn seed_referral_fee(&self, mut fee: AmazonReferralFee) -> AmazonReferralFee {
        let mut t = self.tables.lock().await;
        fee.id = t.allocate_id();
        t.referral_fees.insert(fee.id, fee.clone());
        fee
    }

    pub async fn seed_pricing_rule(&self, mut rule: PricingRule) -> PricingRule {
        let mut t = self.tables.lock().await;
        rule.id = t.allocate_id();
        t.pricing_rules.insert(rule.id, rule.clone());
        rule
    }
}

#[async_trait]
impl SkuRepository for MemoryStore {
    async fn find_sku(&self, sku: &str, country_code: &str) -> RepoResult<Option<Sku>> {
        let t = self.tables.lock().await;
        Ok(t
            .skus
            .values()
            .find(|s| s.sku == sku && s.country_code == country_code)
            .cloned())
    }

    async fn get_sku(&self, id: i64) -> RepoResult<Option<Sku>> {
        Ok(self.tables.lock().await.skus.get(&id).cloned())
    }

    async fn find_skus_by_code(&self, sku: &str) -> RepoResult<Vec<Sku>> {
        let t = self.tables.lock().await;
        Ok(t.skus.values().filter(|s| s.sku == sku).cloned().collect())
    }

    async fn create_sku(&self, new: NewSku) -> RepoResult<Sku> {
        let mut t = self.tables.lock().await;
        if t
            .skus
            .values()
            .any(|s| s.sku == new.sku && s.country_code == new.country_code)
        {
            return Err(conflict("sku", format!("{}/{}", new.sku, new.country_code)));
        }
        let now = Utc::now();
        let record = Sku {
            id: t.allocate_id(),
            sku: new.sku,
            country_code: new.country_code,
            currency: new.currency,
            fnsku: new.fnsku,
            acquisition_cost_excl: new.acquisition_cost_excl,
            acquisition_cost_incl: new.acquisition_cost_incl,
            total_fulfillable_quantity: new.total_fulfillable_quantity,
            average_selling_price: new.average_selling_price,
            average_margin: None,
            average_roi: None,
            active_days: 0,
            inactive_days: 0,
            is_active: false,
            restock_alert_quantity: None,
            is_test: new.is_test,
            pricing_rule_id: new.pricing_rule_id,
            created_at: now,
            updated_at: now,
        };
        t.skus.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_sku(&self, sku: &Sku) -> RepoResult<Sku> {
        let mut t = self.tables.lock().await;
        let slot = t.skus.get_mut(&sku.id).ok_or_else(|| not_found("sku", sku.id))?;
        *slot = Sku {
            updated_at: Utc::now(),
            ..sku.clone()
        };
        Ok(slot.clone())
    }
}

#[async_trait]
impl AsinRepository for MemoryStore {
    async fn find_asin(&self, asin: &str, country_code: &str) -> RepoResult<Option<Asin>> {
        let t = self.tables.lock().await;
        Ok(t
            .asins
            .values()
            .find(|a| a.asin == asin && a.country_code == country_code)
            .cloned())
    }

    async fn get_asin(&self, id: i64) -> RepoResult<Option<Asin>> {
        Ok(self.tables.lock().await.asins.get(&id).cloned())
    }

    async fn find_asins_by_code(&self, asin: &str) -> RepoResult<Vec<Asin>> {
        let t = self.tables.lock().await;
        Ok(t.asins.values().filter(|a| a.asin == asin).cloned().collect())
    }

    async fn create_asin(&self, new: NewAsin) -> RepoResult<Asin> {
        let mut t = self.tables.lock().await;
        if t
            .asins
            .values()
            .any(|a| a.asin == new.asin && a.country_code == new.country_code)
        {
            return Err(conflict("asin", format!("{}/{}", new.asin, new.country_code)));
        }
        let now = Utc::now();
        let record = Asin {
            id: t.allocate_id(),
            asin: new.asin,
            country_code: new.country_code,
            name: new.name,
            image_url: new.image_url,
            product_category: new.product_category,
            product_category_rank_id: None,
            tax_category: new.tax_category,
            preparation_notes: new.preparation_notes,
            is_hazmat: new.is_hazmat,
            has_battery: new.has_battery,
            active_sku_count: 0,
            package: new.package,
            created_at: now,
            updated_at: now,
        };
        t.asins.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_asin(&self, asin: &Asin) -> RepoResult<Asin> {
        let mut t = self.tables.lock().await;
        let slot = t.asins.get_mut(&asin.id).ok_or_else(|| not_found("asin", asin.id))?;
        *slot = Asin {
            updated_at: Utc::now(),
            ..asin.clone()
        };
        Ok(slot.clone())
    }
}

#[async_trait]
impl AsinSkuRepository for MemoryStore {
    async fn find_asin_sku(&self, asin_id: i64, sku_id: i64) -> RepoResult<Option<AsinSku>> {
        let t = self.tables.lock().await;
        Ok(t
            .asin_skus
            .values()
            .find(|l| l.asin_id == asin_id && l.sku_id == sku_id)
            .cloned())
    }

    async fn create_asin_sku(&self, asin_id: i64, sku_id: i64) -> RepoResult<AsinSku> {
        let mut t = self.tables.lock().await;
        if t
            .asin_skus
            .values()
            .any(|l| l.asin_id == asin_id && l.sku_id == sku_id)
        {
            return Err(conflict("asin_sku", format!("{asin_id}/{sku_id}")));
        }
        let record = AsinSku {
            id: t.allocate_id(),
            asin_id,
            sku_id,
            created_at: Utc::now(),
        };
        t.asin_skus.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_asin_skus_for_asin(&self, asin_id: i64) -> RepoResult<Vec<AsinSku>> {
        let t = self.tables.lock().await;
        Ok(t.asin_skus.values().filter(|l| l.asin_id == asin_id).cloned().collect())
    }

    async fn list_asin_skus_for_sku(&self, sku_id: i64) -> RepoResult<Vec<AsinSku>> {
        let t = self.tables.lock().await;
        Ok(t.asin_skus.values().filter(|l| l.sku_id == sku_id).cloned().collect())
    }
}

#[async_trait]
impl MinimumSellingPriceRepository for MemoryStore {
    async fn find_minimum_selling_price(&self, sku_id: i64) -> RepoResult<Option<MinimumSellingPrice>> {
        let t = self.tables.lock().await;
        Ok(t
            .minimum_selling_prices
            .values()
            .find(|p| p.sku_id == sku_id)
            .cloned())
    }

    async fn create_minimum_selling_price(
        &self,
        new: NewMinimumSellingPrice,
    ) -> RepoResult<MinimumSellingPrice> {
        let mut t = self.tables.lock().await;
        if t.minimum_selling_prices.values().any(|p| p.sku_id == new.sku_id) {
            return Err(conflict("minimum_selling_price", new.sku_id.to_string()));
        }
        let now = Utc::now();
        let record = MinimumSellingPrice {
            id: t.allocate_id(),
            sku_id: new.sku_id,
            currency: new.currency,
            local: new.local,
            efn: new.efn,
            enrolled_in_pan_eu: new.enrolled_in_pan_eu,
            eligible_for_pan_eu: new.eligible_for_pan_eu,
            referral_fee_id: new.referral_fee_id,
            minimum_margin_amount: new.minimum_margin_amount,
            created_at: now,
            updated_at: now,
        };
        t.minimum_selling_prices.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_minimum_selling_price(
        &self,
        price: &MinimumSellingPrice,
    ) -> RepoResult<MinimumSellingPrice> {
        let mut t = self.tables.lock().await;
        let slot = t
            .minimum_selling_prices
            .get_mut(&price.id)
            .ok_or_else(|| not_found("minimum_selling_price", price.id))?;
        *slot = MinimumSellingPrice {
            updated_at: Utc::now(),
            ..price.clone()
        };
        Ok(slot.clone())
    }
}

#[async_trait]
impl AfnInventoryRepository for MemoryStore {
    async fn find_afn_snapshot(&self, sku_id: i64) -> RepoResult<Option<AfnInventoryDailyUpdate>> {
        let t = self.tables.lock().await;
        Ok(t.afn_snapshots.values().find(|s| s.sku_id == sku_id).cloned())
    }

    async fn list_afn_snapshots_for_sku_code(&self, sku: &str) -> RepoResult<Vec<AfnInventoryDailyUpdate>> {
        let t = self.tables.lock().await;
        Ok(t.afn_snapshots.values().filter(|s| s.sku == sku).cloned().collect())
    }

    async fn upsert_afn_snapshot(
        &self,
        new: NewAfnInventoryDailyUpdate,
    ) -> RepoResult<Upserted<AfnInventoryDailyUpdate>> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        if let Some(slot) = t.afn_snapshots.values_mut().find(|s| s.sku_id == new.sku_id) {
            slot.actual_price = new.actual_price;
            slot.currency = new.currency;
            slot.fulfillable_quantity = new.fulfillable_quantity;
            slot.report_document_id = new.report_document_id;
            slot.updated_at = now;
            return Ok(Upserted {
                record: slot.clone(),
                created: false,
            });
        }
        let record = AfnInventoryDailyUpdate {
            id: t.allocate_id(),
            sku_id: new.sku_id,
            sku: new.sku,
            country_code: new.country_code,
            actual_price: new.actual_price,
            currency: new.currency,
            fulfillable_quantity: new.fulfillable_quantity,
            report_document_id: new.report_document_id,
            created_at: now,
            updated_at: now,
        };
        t.afn_snapshots.insert(record.id, record.clone());
        Ok(Upserted {
            record,
            created: true,
        })
    }
}

#[async_trait]
impl SellingPriceHistoryRepository for MemoryStore {
    async fn find_selling_price_history(
        &self,
        sku_id: i64,
        day: NaiveDate,
    ) -> RepoResult<Option<SellingPriceHistory>> {
        let t = self.tables.lock().await;
        Ok(t
            .price_history
            .values()
            .find(|h| h.sku_id == sku_id && h.day == day)
            .cloned())
    }

    async fn create_selling_price_history(
        &self,
        new: NewSellingPriceHistory,
    ) -> RepoResult<SellingPriceHistory> {
        let mut t = self.tables.lock().await;
        if t
            .price_history
            .values()
            .any(|h| h.sku_id == new.sku_id && h.day == new.day)
        {
            return Err(conflict("selling_price_history", format!("{}/{}", new.sku_id, new.day)));
        }
        let record = SellingPriceHistory {
            id: t.allocate_id(),
            sku_id: new.sku_id,
            day: new.day,
            price: new.price,
            currency: new.currency,
            created_at: Utc::now(),
        };
        t.price_history.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl EanAsinRepository for MemoryStore {
    async fn list_ean_asins(&self, asin_id: i64) -> RepoResult<Vec<EanAsin>> {
        let t = self.tables.lock().await;
        Ok(t.ean_asins.values().filter(|l| l.asin_id == asin_id).cloned().collect())
    }

    async fn create_ean_asin(&self, new: NewEanAsin) -> RepoResult<EanAsin> {
        let mut t = self.tables.lock().await;
        if t
            .ean_asins
            .values()
            .any(|l| l.asin_id == new.asin_id && l.ean == new.ean)
        {
            return Err(conflict("ean_asin", format!("{}/{}", new.ean, new.asin_id)));
        }
        let record = EanAsin {
            id: t.allocate_id(),
            ean: new.ean,
            asin_id: new.asin_id,
            quantity: new.quantity,
        };
        t.ean_asins.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl FbaFeeRepository for MemoryStore {
    async fn find_fba_fee(&self, asin_id: i64) -> RepoResult<Option<FbaFee>> {
        let t = self.tables.lock().await;
        Ok(t.fba_fees.values().find(|f| f.asin_id == asin_id).cloned())
    }

    async fn create_fba_fee(&self, new: NewFbaFee) -> RepoResult<FbaFee> {
        let mut t = self.tables.lock().await;
        if t.fba_fees.values().any(|f| f.asin_id == new.asin_id) {
            return Err(conflict("fba_fee", new.asin_id.to_string()));
        }
        let record = FbaFee {
            id: t.allocate_id(),
            asin_id: new.asin_id,
            price_grid_fba_fee_id: new.price_grid_fba_fee_id,
            country_code: new.country_code,
        };
        t.fba_fees.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl FeeReferenceRepository for MemoryStore {
    async fn list_price_grid_fba_fees(&self, country_code: &str) -> RepoResult<Vec<PriceGridFbaFee>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<_> = t
            .price_grid
            .values()
            .filter(|r| r.country_code == country_code)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.sort_order, r.id));
        Ok(rows)
    }

    async fn get_price_grid_fba_fee(&self, id: i64) -> RepoResult<Option<PriceGridFbaFee>> {
        Ok(self.tables.lock().await.price_grid.get(&id).cloned())
    }

    async fn find_referral_fee(
        &self,
        country_code: &str,
        product_category: &str,
    ) -> RepoResult<Option<AmazonReferralFee>> {
        let t = self.tables.lock().await;
        Ok(t
            .referral_fees
            .values()
            .find(|f| f.country_code == country_code && f.product_category == product_category)
            .cloned())
    }

    async fn get_pricing_rule(&self, id: i64) -> RepoResult<Option<PricingRule>> {
        Ok(self.tables.lock().await.pricing_rules.get(&id).cloned())
    }
}
