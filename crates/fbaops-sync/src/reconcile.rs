//! Find-or-create reconciliation of inventory report rows.
//!
//! Every step looks its record up by natural key first and only creates when nothing
//! exists, so a row can be replayed after a partial failure. Creation races between
//! concurrent rows surface as repository conflicts and are resolved by reading the
//! winner's record back.

use std::sync::Arc;

use chrono::NaiveDate;
use fbaops_adapters::{AdapterError, CatalogLookup, CurrencyConverter, CurrencyError, MarketplaceRegistry};
use fbaops_core::pricing::{
    default_markup_multiplier, price_fulfillment_modes, FbaFeeTerms, PricingInputs,
    ReferralFeeTerms,
};
use fbaops_core::{
    lookup_fee_schedule, AfnInventoryDailyUpdate, Asin, AsinSku, CalculationError, EanAsin,
    EntityKind, FbaFee, MinimumSellingPrice, NewAfnInventoryDailyUpdate, NewAsin, NewEanAsin,
    NewFbaFee, NewMinimumSellingPrice, NewSellingPriceHistory, NewSku, PackageDimensions,
    PriceBounds, RecordEvent, RunCounters, SellingPriceHistory, Sku, ValidationError,
};
use fbaops_storage::{RepositoryError, Store};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cannot derive {} {key}: no record exists in another country", .entity.as_str())]
    Unresolvable { entity: EntityKind, key: String },
    #[error("asin {asin_id} has no EAN links to derive from")]
    MissingEanLinks { asin_id: i64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Currency(#[from] CurrencyError),
}

impl ReconcileError {
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, ReconcileError::Unresolvable { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingDefaults {
    pub markup_multiplier: Decimal,
    /// Used when a Sku has no pricing rule.
    pub minimum_margin_amount: Decimal,
}

impl Default for PricingDefaults {
    fn default() -> Self {
        Self {
            markup_multiplier: default_markup_multiplier(),
            minimum_margin_amount: Decimal::new(200, 2),
        }
    }
}

/// One validated row of the FBA inventory report.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRow {
    pub sku: String,
    pub fnsku: Option<String>,
    pub asin: String,
    pub fulfillable_quantity: i64,
    pub price: Option<Decimal>,
    pub product_name: Option<String>,
}

/// What every row of one report shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowContext {
    pub country_code: String,
    /// Currency the report's prices are expressed in.
    pub currency: String,
    pub report_document_id: String,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, Copy)]
pub struct SkuRequest<'a> {
    pub sku: &'a str,
    pub country_code: &'a str,
    pub currency: &'a str,
    pub total_quantity: i64,
    pub average_selling_price: Option<Decimal>,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowOutcome {
    pub sku_id: i64,
    pub asin_id: i64,
    pub asin_sku_id: i64,
    pub minimum_selling_price_id: Option<i64>,
    pub snapshot_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
struct SkuPricing {
    local: PriceBounds,
    efn: Option<PriceBounds>,
    eligible_for_pan_eu: bool,
    referral_fee_id: i64,
    minimum_margin_amount: Decimal,
}

impl SkuPricing {
    fn apply_to(&self, record: &mut MinimumSellingPrice, currency: &str) {
        record.currency = currency.to_string();
        record.local = Some(self.local);
        record.efn = self.efn;
        record.eligible_for_pan_eu = self.eligible_for_pan_eu;
        record.referral_fee_id = Some(self.referral_fee_id);
        record.minimum_margin_amount = self.minimum_margin_amount;
    }
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    catalog: Arc<dyn CatalogLookup>,
    currency: Arc<dyn CurrencyConverter>,
    marketplaces: Arc<MarketplaceRegistry>,
    pricing: PricingDefaults,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn CatalogLookup>,
        currency: Arc<dyn CurrencyConverter>,
        marketplaces: Arc<MarketplaceRegistry>,
        pricing: PricingDefaults,
    ) -> Self {
        Self {
            store,
            catalog,
            currency,
            marketplaces,
            pricing,
        }
    }

    pub fn marketplaces(&self) -> &MarketplaceRegistry {
        &self.marketplaces
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Runs the full chain for one row. Sku, Asin and link failures abort the row; a
    /// pricing calculation failure only skips the price record.
    pub async fn reconcile_row(
        &self,
        counters: &RunCounters,
        row: &InventoryRow,
        ctx: &RowContext,
    ) -> Result<RowOutcome, ReconcileError> {
        let sku = self
            .find_or_create_sku(
                counters,
                &SkuRequest {
                    sku: &row.sku,
                    country_code: &ctx.country_code,
                    currency: &ctx.currency,
                    total_quantity: row.fulfillable_quantity,
                    average_selling_price: row.price,
                    day: ctx.day,
                },
            )
            .await?;
        let asin = self
            .find_or_create_asin(counters, &row.asin, &ctx.country_code, row.product_name.as_deref())
            .await?;
        let link = self.find_or_create_asin_sku(counters, asin.id, sku.id).await?;
        let price = self
            .find_or_create_minimum_selling_price(counters, &sku, &asin)
            .await?;
        let snapshot = self
            .find_or_create_afn_snapshot(counters, &sku, row.price, row.fulfillable_quantity, ctx)
            .await?;
        self.record_selling_price_history(counters, &snapshot, ctx.day)
            .await?;
        let sku = self.recompute_active_status(sku, &snapshot).await?;
        self.recompute_total_quantity(&sku.sku).await?;
        self.backfill_fnsku(sku.id, row.fnsku.as_deref()).await?;

        Ok(RowOutcome {
            sku_id: sku.id,
            asin_id: asin.id,
            asin_sku_id: link.id,
            minimum_selling_price_id: price.map(|p| p.id),
            snapshot_id: snapshot.id,
        })
    }

    fn home_currency(&self, country_code: &str, fallback: &str) -> String {
        self.marketplaces
            .get(country_code)
            .map(|m| m.currency.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Resolves the Sku for `(sku, country_code)`, deriving it from the same sku code in
    /// another country when it does not exist yet.
    pub async fn find_or_create_sku(
        &self,
        counters: &RunCounters,
        request: &SkuRequest<'_>,
    ) -> Result<Sku, ReconcileError> {
        if let Some(sku) = self.store.find_sku(request.sku, request.country_code).await? {
            counters.record(RecordEvent::found(EntityKind::Sku, sku.id));
            return Ok(sku);
        }

        let sibling = self
            .store
            .find_skus_by_code(request.sku)
            .await?
            .into_iter()
            .find(|s| s.country_code != request.country_code)
            .ok_or_else(|| ReconcileError::Unresolvable {
                entity: EntityKind::Sku,
                key: format!("{}/{}", request.sku, request.country_code),
            })?;

        let home = self.home_currency(request.country_code, request.currency);
        let (cost_excl, cost_incl) = if sibling.currency.eq_ignore_ascii_case(&home) {
            (sibling.acquisition_cost_excl, sibling.acquisition_cost_incl)
        } else {
            (
                self.currency
                    .convert(sibling.acquisition_cost_excl, &sibling.currency, &home, request.day)
                    .await?,
                self.currency
                    .convert(sibling.acquisition_cost_incl, &sibling.currency, &home, request.day)
                    .await?,
            )
        };
        let average_selling_price = match request.average_selling_price {
            Some(price) if !request.currency.eq_ignore_ascii_case(&home) => Some(
                self.currency
                    .convert(price, request.currency, &home, request.day)
                    .await?,
            ),
            other => other,
        };

        let new = NewSku::inherit_from(
            &sibling,
            request.country_code,
            &home,
            cost_excl,
            cost_incl,
            request.total_quantity,
            average_selling_price,
        );
        match self.store.create_sku(new).await {
            Ok(sku) => {
                info!(
                    sku = %sku.sku,
                    country_code = %sku.country_code,
                    sibling_country = %sibling.country_code,
                    "derived sku from sibling"
                );
                counters.record(RecordEvent::created(EntityKind::Sku, sku.id));
                Ok(sku)
            }
            Err(err) if err.is_conflict() => {
                let sku = self
                    .store
                    .find_sku(request.sku, request.country_code)
                    .await?
                    .ok_or(err)?;
                counters.record(RecordEvent::found(EntityKind::Sku, sku.id));
                Ok(sku)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resolves the Asin for `(asin, country_code)`. A missing Asin is derived from the
    /// same ASIN in another country together with its EAN links and fee-grid link.
    pub async fn find_or_create_asin(
        &self,
        counters: &RunCounters,
        asin: &str,
        country_code: &str,
        product_name: Option<&str>,
    ) -> Result<Asin, ReconcileError> {
        if let Some(found) = self.store.find_asin(asin, country_code).await? {
            counters.record(RecordEvent::found(EntityKind::Asin, found.id));
            self.repair_asin_fan_out(counters, &found).await?;
            return Ok(found);
        }

        let siblings: Vec<Asin> = self
            .store
            .find_asins_by_code(asin)
            .await?
            .into_iter()
            .filter(|a| a.country_code != country_code)
            .collect();
        let Some(first) = siblings.first() else {
            return Err(ReconcileError::Unresolvable {
                entity: EntityKind::Asin,
                key: format!("{asin}/{country_code}"),
            });
        };
        let first_id = first.id;
        let source = self
            .first_with_ean_links(siblings)
            .await?
            .ok_or(ReconcileError::MissingEanLinks { asin_id: first_id })?;

        let mut catalog = self.catalog.catalog_attributes(asin, country_code).await?;
        if catalog.name.is_none() {
            catalog.name = product_name.map(str::to_string);
        }
        let new = NewAsin::derive_from(&source, country_code, catalog);

        let created = match self.store.create_asin(new).await {
            Ok(created) => {
                info!(
                    asin = %created.asin,
                    country_code = %created.country_code,
                    sibling_country = %source.country_code,
                    "derived asin from sibling"
                );
                counters.record(RecordEvent::created(EntityKind::Asin, created.id));
                created
            }
            Err(err) if err.is_conflict() => {
                let found = self.store.find_asin(asin, country_code).await?.ok_or(err)?;
                counters.record(RecordEvent::found(EntityKind::Asin, found.id));
                self.repair_asin_fan_out(counters, &found).await?;
                return Ok(found);
            }
            Err(err) => return Err(err.into()),
        };

        self.derive_ean_asin_links(counters, source.id, created.id)
            .await?;
        self.derive_fee_schedule_link(counters, created.package.as_ref(), created.id, country_code)
            .await?;
        Ok(created)
    }

    async fn first_with_ean_links(&self, candidates: Vec<Asin>) -> Result<Option<Asin>, ReconcileError> {
        for candidate in candidates {
            if !self.store.list_ean_asins(candidate.id).await?.is_empty() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Re-derives EAN links or the fee-grid link an interrupted earlier run left missing.
    pub async fn repair_asin_fan_out(&self, counters: &RunCounters, asin: &Asin) -> Result<(), ReconcileError> {
        if self.store.list_ean_asins(asin.id).await?.is_empty() {
            let siblings: Vec<Asin> = self
                .store
                .find_asins_by_code(&asin.asin)
                .await?
                .into_iter()
                .filter(|a| a.id != asin.id)
                .collect();
            match self.first_with_ean_links(siblings).await? {
                Some(source) => {
                    info!(asin = %asin.asin, country_code = %asin.country_code, "repairing missing EAN links");
                    self.derive_ean_asin_links(counters, source.id, asin.id)
                        .await?;
                }
                None => warn!(
                    asin = %asin.asin,
                    country_code = %asin.country_code,
                    "asin has no EAN links and no sibling to copy them from"
                ),
            }
        }
        if self.store.find_fba_fee(asin.id).await?.is_none() {
            self.derive_fee_schedule_link(counters, asin.package.as_ref(), asin.id, &asin.country_code)
                .await?;
        }
        Ok(())
    }

    /// Copies every EAN link of `source_asin_id` onto `new_asin_id`.
    pub async fn derive_ean_asin_links(
        &self,
        counters: &RunCounters,
        source_asin_id: i64,
        new_asin_id: i64,
    ) -> Result<Vec<EanAsin>, ReconcileError> {
        let source = self.store.list_ean_asins(source_asin_id).await?;
        if source.is_empty() {
            return Err(ReconcileError::MissingEanLinks {
                asin_id: source_asin_id,
            });
        }
        let existing = self.store.list_ean_asins(new_asin_id).await?;

        let mut links = Vec::with_capacity(source.len());
        for link in source {
            if let Some(found) = existing.iter().find(|e| e.ean == link.ean) {
                counters.record(RecordEvent::found(EntityKind::EanAsin, found.id));
                links.push(found.clone());
                continue;
            }
            let new = NewEanAsin {
                ean: link.ean.clone(),
                asin_id: new_asin_id,
                quantity: link.quantity,
            };
            match self.store.create_ean_asin(new).await {
                Ok(created) => {
                    counters.record(RecordEvent::created(EntityKind::EanAsin, created.id));
                    links.push(created);
                }
                Err(err) if err.is_conflict() => {
                    let found = self
                        .store
                        .list_ean_asins(new_asin_id)
                        .await?
                        .into_iter()
                        .find(|e| e.ean == link.ean)
                        .ok_or(err)?;
                    counters.record(RecordEvent::found(EntityKind::EanAsin, found.id));
                    links.push(found);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(links)
    }

    /// Links the Asin to its fee-grid row. A package outside every category, or one
    /// without measurements, is logged and leaves the Asin unlinked.
    pub async fn derive_fee_schedule_link(
        &self,
        counters: &RunCounters,
        package: Option<&PackageDimensions>,
        asin_id: i64,
        country_code: &str,
    ) -> Result<Option<FbaFee>, ReconcileError> {
        if let Some(existing) = self.store.find_fba_fee(asin_id).await? {
            counters.record(RecordEvent::found(EntityKind::FbaFee, existing.id));
            return Ok(Some(existing));
        }
        let Some(package) = package else {
            warn!(asin_id, country_code, "no package dimensions, fee schedule link skipped");
            return Ok(None);
        };
        let rows = self.store.list_price_grid_fba_fees(country_code).await?;
        let grid = match lookup_fee_schedule(&rows, country_code, package) {
            Ok(grid) => grid,
            Err(miss) => {
                warn!(asin_id, country_code, reason = %miss, "no fee schedule matches package");
                return Ok(None);
            }
        };

        let new = NewFbaFee {
            asin_id,
            price_grid_fba_fee_id: grid.id,
            country_code: country_code.to_string(),
        };
        match self.store.create_fba_fee(new).await {
            Ok(created) => {
                debug!(asin_id, category = %grid.category, "linked fee schedule");
                counters.record(RecordEvent::created(EntityKind::FbaFee, created.id));
                Ok(Some(created))
            }
            Err(err) if err.is_conflict() => {
                let found = self.store.find_fba_fee(asin_id).await?.ok_or(err)?;
                counters.record(RecordEvent::found(EntityKind::FbaFee, found.id));
                Ok(Some(found))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_or_create_asin_sku(
        &self,
        counters: &RunCounters,
        asin_id: i64,
        sku_id: i64,
    ) -> Result<AsinSku, ReconcileError> {
        if let Some(link) = self.store.find_asin_sku(asin_id, sku_id).await? {
            counters.record(RecordEvent::found(EntityKind::AsinSku, link.id));
            return Ok(link);
        }
        match self.store.create_asin_sku(asin_id, sku_id).await {
            Ok(link) => {
                counters.record(RecordEvent::created(EntityKind::AsinSku, link.id));
                Ok(link)
            }
            Err(err) if err.is_conflict() => {
                let link = self.store.find_asin_sku(asin_id, sku_id).await?.ok_or(err)?;
                counters.record(RecordEvent::found(EntityKind::AsinSku, link.id));
                Ok(link)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Creates the price record on first need and recomputes it in place afterwards.
    ///
    /// A calculation failure is logged; an existing record then keeps its stored values
    /// and a missing one stays missing.
    pub async fn find_or_create_minimum_selling_price(
        &self,
        counters: &RunCounters,
        sku: &Sku,
        asin: &Asin,
    ) -> Result<Option<MinimumSellingPrice>, ReconcileError> {
        let existing = self.store.find_minimum_selling_price(sku.id).await?;
        let pricing = match self.price_sku(sku, asin).await {
            Ok(pricing) => Some(pricing),
            Err(ReconcileError::Calculation(err)) => {
                warn!(
                    sku = %sku.sku,
                    country_code = %sku.country_code,
                    error = %err,
                    "selling price calculation failed"
                );
                None
            }
            Err(err) => return Err(err),
        };

        match (existing, pricing) {
            (Some(current), Some(pricing)) => {
                let updated = self.apply_pricing(current, &pricing, &sku.currency).await?;
                counters.record(RecordEvent::found(EntityKind::MinimumSellingPrice, updated.id));
                Ok(Some(updated))
            }
            (Some(current), None) => {
                counters.record(RecordEvent::found(EntityKind::MinimumSellingPrice, current.id));
                Ok(Some(current))
            }
            (None, Some(pricing)) => {
                let new = NewMinimumSellingPrice {
                    sku_id: sku.id,
                    currency: sku.currency.clone(),
                    local: Some(pricing.local),
                    efn: pricing.efn,
                    enrolled_in_pan_eu: false,
                    eligible_for_pan_eu: pricing.eligible_for_pan_eu,
                    referral_fee_id: Some(pricing.referral_fee_id),
                    minimum_margin_amount: pricing.minimum_margin_amount,
                };
                match self.store.create_minimum_selling_price(new).await {
                    Ok(created) => {
                        counters.record(RecordEvent::created(EntityKind::MinimumSellingPrice, created.id));
                        Ok(Some(created))
                    }
                    Err(err) if err.is_conflict() => {
                        let current = self
                            .store
                            .find_minimum_selling_price(sku.id)
                            .await?
                            .ok_or(err)?;
                        let updated = self.apply_pricing(current, &pricing, &sku.currency).await?;
                        counters.record(RecordEvent::found(EntityKind::MinimumSellingPrice, updated.id));
                        Ok(Some(updated))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            (None, None) => Ok(None),
        }
    }

    async fn apply_pricing(
        &self,
        mut current: MinimumSellingPrice,
        pricing: &SkuPricing,
        currency: &str,
    ) -> Result<MinimumSellingPrice, ReconcileError> {
        pricing.apply_to(&mut current, currency);
        Ok(self.store.update_minimum_selling_price(&current).await?)
    }

    async fn price_sku(&self, sku: &Sku, asin: &Asin) -> Result<SkuPricing, ReconcileError> {
        let marketplace = self.marketplaces.get(&sku.country_code).ok_or_else(|| {
            CalculationError::MissingInput(format!("VAT rate for {}", sku.country_code))
        })?;

        let defaults = (self.pricing.minimum_margin_amount, self.pricing.markup_multiplier);
        let (minimum_margin_amount, markup_multiplier) = match sku.pricing_rule_id {
            Some(rule_id) => match self.store.get_pricing_rule(rule_id).await? {
                Some(rule) => (
                    rule.minimum_margin_amount,
                    rule.markup_multiplier.unwrap_or(self.pricing.markup_multiplier),
                ),
                None => defaults,
            },
            None => defaults,
        };

        let category = asin.product_category.as_deref().ok_or_else(|| {
            CalculationError::MissingInput(format!("product category of asin {}", asin.asin))
        })?;
        let referral_fee = self
            .store
            .find_referral_fee(&sku.country_code, category)
            .await?
            .ok_or_else(|| {
                CalculationError::MissingInput(format!(
                    "referral fee for {category} in {}",
                    sku.country_code
                ))
            })?;
        let fba_fee = self.store.find_fba_fee(asin.id).await?.ok_or_else(|| {
            CalculationError::MissingInput(format!("fba fee link for asin {}", asin.asin))
        })?;
        let grid = self
            .store
            .get_price_grid_fba_fee(fba_fee.price_grid_fba_fee_id)
            .await?
            .ok_or_else(|| {
                CalculationError::MissingInput(format!(
                    "fee grid row {}",
                    fba_fee.price_grid_fba_fee_id
                ))
            })?;

        let inputs = PricingInputs {
            acquisition_cost_excl: sku.acquisition_cost_excl,
            minimum_margin_amount,
            closing_fee: referral_fee.closing_fee,
            vat_rate: marketplace.vat_rate,
            referral: ReferralFeeTerms::from(&referral_fee),
            markup_multiplier,
        };
        let efn_terms = FbaFeeTerms::efn(&grid);
        let modes = price_fulfillment_modes(&inputs, &FbaFeeTerms::local(&grid), efn_terms.as_ref())?;
        debug!(
            sku = %sku.sku,
            country_code = %sku.country_code,
            minimum = %modes.local.minimum,
            maximum = %modes.local.maximum,
            tier = ?modes.local.tier,
            "priced sku"
        );

        Ok(SkuPricing {
            local: modes.local.into(),
            efn: modes.efn.map(PriceBounds::from),
            eligible_for_pan_eu: marketplace.pan_eu_eligible,
            referral_fee_id: referral_fee.id,
            minimum_margin_amount,
        })
    }

    /// Creates the Sku's inventory snapshot or overwrites price, quantity and report
    /// reference of the existing one.
    pub async fn find_or_create_afn_snapshot(
        &self,
        counters: &RunCounters,
        sku: &Sku,
        price: Option<Decimal>,
        quantity: i64,
        ctx: &RowContext,
    ) -> Result<AfnInventoryDailyUpdate, ReconcileError> {
        let new = NewAfnInventoryDailyUpdate {
            sku_id: sku.id,
            sku: sku.sku.clone(),
            country_code: sku.country_code.clone(),
            actual_price: price,
            currency: ctx.currency.clone(),
            fulfillable_quantity: quantity,
            report_document_id: ctx.report_document_id.clone(),
        };
        let upserted = self.store.upsert_afn_snapshot(new).await?;
        let event = if upserted.created {
            RecordEvent::created(EntityKind::AfnInventoryDailyUpdate, upserted.record.id)
        } else {
            RecordEvent::found(EntityKind::AfnInventoryDailyUpdate, upserted.record.id)
        };
        counters.record(event);
        Ok(upserted.record)
    }

    /// Appends the snapshot price to the Sku's history once per calendar day.
    pub async fn record_selling_price_history(
        &self,
        counters: &RunCounters,
        snapshot: &AfnInventoryDailyUpdate,
        day: NaiveDate,
    ) -> Result<Option<SellingPriceHistory>, ReconcileError> {
        let Some(price) = snapshot.actual_price else {
            return Ok(None);
        };
        if let Some(existing) = self
            .store
            .find_selling_price_history(snapshot.sku_id, day)
            .await?
        {
            counters.record(RecordEvent::found(EntityKind::SellingPriceHistory, existing.id));
            return Ok(Some(existing));
        }
        let new = NewSellingPriceHistory {
            sku_id: snapshot.sku_id,
            day,
            price,
            currency: snapshot.currency.clone(),
        };
        match self.store.create_selling_price_history(new).await {
            Ok(created) => {
                counters.record(RecordEvent::created(EntityKind::SellingPriceHistory, created.id));
                Ok(Some(created))
            }
            Err(err) if err.is_conflict() => {
                let found = self
                    .store
                    .find_selling_price_history(snapshot.sku_id, day)
                    .await?
                    .ok_or(err)?;
                counters.record(RecordEvent::found(EntityKind::SellingPriceHistory, found.id));
                Ok(Some(found))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Marks the Sku active when it has fulfillable stock and refreshes the active-Sku
    /// count of every Asin it is linked to.
    pub async fn recompute_active_status(
        &self,
        sku: Sku,
        snapshot: &AfnInventoryDailyUpdate,
    ) -> Result<Sku, ReconcileError> {
        let is_active = snapshot.fulfillable_quantity > 0;
        let sku = if sku.is_active == is_active {
            sku
        } else {
            let mut changed = sku;
            changed.is_active = is_active;
            self.store.update_sku(&changed).await?
        };

        for link in self.store.list_asin_skus_for_sku(sku.id).await? {
            let Some(mut asin) = self.store.get_asin(link.asin_id).await? else {
                continue;
            };
            let mut active = 0;
            for linked in self.store.list_asin_skus_for_asin(asin.id).await? {
                if let Some(linked_sku) = self.store.get_sku(linked.sku_id).await? {
                    if linked_sku.is_active {
                        active += 1;
                    }
                }
            }
            if asin.active_sku_count != active {
                asin.active_sku_count = active;
                self.store.update_asin(&asin).await?;
            }
        }
        Ok(sku)
    }

    /// Sets `total_fulfillable_quantity` on every Sku sharing the code.
    ///
    /// Skus in Pan-EU marketplaces share one pool, the sum of the latest snapshots of
    /// all Pan-EU countries. Other marketplaces only count their own snapshot. Returns
    /// the pool total.
    pub async fn recompute_total_quantity(&self, sku_code: &str) -> Result<i64, ReconcileError> {
        let snapshots = self.store.list_afn_snapshots_for_sku_code(sku_code).await?;
        let in_pool = |country_code: &str| {
            self.marketplaces
                .get(country_code)
                .is_some_and(|m| m.pan_eu_eligible)
        };
        let pool_total: i64 = snapshots
            .iter()
            .filter(|s| in_pool(&s.country_code))
            .map(|s| s.fulfillable_quantity)
            .sum();

        for mut sku in self.store.find_skus_by_code(sku_code).await? {
            let total = if in_pool(&sku.country_code) {
                pool_total
            } else {
                snapshots
                    .iter()
                    .filter(|s| s.country_code == sku.country_code)
                    .map(|s| s.fulfillable_quantity)
                    .sum()
            };
            if sku.total_fulfillable_quantity != total {
                sku.total_fulfillable_quantity = total;
                self.store.update_sku(&sku).await?;
            }
        }
        Ok(pool_total)
    }

    /// Stores the report's FNSKU on a Sku that has none yet.
    pub async fn backfill_fnsku(&self, sku_id: i64, fnsku: Option<&str>) -> Result<Option<Sku>, ReconcileError> {
        let Some(fnsku) = fnsku.map(str::trim).filter(|f| !f.is_empty()) else {
            return Ok(None);
        };
        let Some(mut sku) = self.store.get_sku(sku_id).await? else {
            return Ok(None);
        };
        if sku.fnsku.is_some() {
            return Ok(None);
        }
        sku.fnsku = Some(fnsku.to_string());
        debug!(sku = %sku.sku, country_code = %sku.country_code, fnsku, "backfilled fnsku");
        Ok(Some(self.store.update_sku(&sku).await?))
    }
}
