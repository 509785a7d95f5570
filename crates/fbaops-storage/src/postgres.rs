//! PostgreSQL-backed repositories.

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use fbaops_core::{
    AfnInventoryDailyUpdate, AmazonReferralFee, Asin, AsinSku, EanAsin, FbaFee,
    MinimumSellingPrice, NewAfnInventoryDailyUpdate, NewAsin, NewEanAsin, NewFbaFee,
    NewMinimumSellingPrice, NewSellingPriceHistory, NewSku, PackageDimensions, PriceBounds,
    PriceGridFbaFee, PricingRule, SellingPriceHistory, Sku,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::repo::{
    AfnInventoryRepository, AsinRepository, AsinSkuRepository, EanAsinRepository,
    FbaFeeRepository, FeeReferenceRepository, MinimumSellingPriceRepository, RepoResult,
    RepositoryError, SellingPriceHistoryRepository, SkuRepository, Upserted,
};

const SKU_COLUMNS: &str = "id, sku, country_code, currency, fnsku, acquisition_cost_excl, \
    acquisition_cost_incl, total_fulfillable_quantity, average_selling_price, average_margin, \
    average_roi, active_days, inactive_days, is_active, restock_alert_quantity, is_test, \
    pricing_rule_id, created_at, updated_at";

const ASIN_COLUMNS: &str = "id, asin, country_code, name, image_url, product_category, \
    product_category_rank_id, tax_category, preparation_notes, is_hazmat, has_battery, \
    active_sku_count, package_length_cm, package_width_cm, package_height_cm, \
    package_weight_kg, created_at, updated_at";

const MSP_COLUMNS: &str = "id, sku_id, currency, local_minimum, local_maximum, efn_minimum, \
    efn_maximum, enrolled_in_pan_eu, eligible_for_pan_eu, referral_fee_id, \
    minimum_margin_amount, created_at, updated_at";

const AFN_COLUMNS: &str = "id, sku_id, sku, country_code, actual_price, currency, \
    fulfillable_quantity, report_document_id, created_at, updated_at";

const GRID_COLUMNS: &str = "id, country_code, category, sort_order, max_length_cm, \
    max_width_cm, max_height_cm, max_weight_kg, fee_local, fee_efn, low_price_fee_local, \
    low_price_fee_efn, low_price_threshold";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying migrations")?;
        info!("database migrations applied");
        Ok(())
    }
}

/// Unique-key violations become [`RepositoryError::Conflict`] so callers can re-read.
fn map_insert_error(entity: &'static str, key: String) -> impl FnOnce(sqlx::Error) -> RepositoryError {
    move |err| {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return RepositoryError::Conflict { entity, key };
            }
        }
        RepositoryError::Database(err)
    }
}

fn require_row<T>(entity: &'static str, id: i64, row: Option<T>) -> RepoResult<T> {
    row.ok_or_else(|| RepositoryError::NotFound {
        entity,
        key: id.to_string(),
    })
}

fn sku_from_row(row: &PgRow) -> Result<Sku, sqlx::Error> {
    Ok(Sku {
        id: row.try_get("id")?,
        sku: row.try_get("sku")?,
        country_code: row.try_get("country_code")?,
        currency: row.try_get("currency")?,
        fnsku: row.try_get("fnsku")?,
        acquisition_cost_excl: row.try_get("acquisition_cost_excl")?,
        acquisition_cost_incl: row.try_get("acquisition_cost_incl")?,
        total_fulfillable_quantity: row.try_get("total_fulfillable_quantity")?,
        average_selling_price: row.try_get("average_selling_price")?,
        average_margin: row.try_get("average_margin")?,
        average_roi: row.try_get("average_roi")?,
        active_days: row.try_get("active_days")?,
        inactive_days: row.try_get("inactive_days")?,
        is_active: row.try_get("is_active")?,
        restock_alert_quantity: row.try_get("restock_alert_quantity")?,
        is_test: row.try_get("is_test")?,
        pricing_rule_id: row.try_get("pricing_rule_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn asin_from_row(row: &PgRow) -> Result<Asin, sqlx::Error> {
    let length: Option<Decimal> = row.try_get("package_length_cm")?;
    let width: Option<Decimal> = row.try_get("package_width_cm")?;
    let height: Option<Decimal> = row.try_get("package_height_cm")?;
    let weight: Option<Decimal> = row.try_get("package_weight_kg")?;
    let package = match (length, width, height, weight) {
        (Some(length_cm), Some(width_cm), Some(height_cm), Some(weight_kg)) => {
            Some(PackageDimensions {
                length_cm,
                width_cm,
                height_cm,
                weight_kg,
            })
        }
        _ => None,
    };
    Ok(Asin {
        id: row.try_get("id")?,
        asin: row.try_get("asin")?,
        country_code: row.try_get("country_code")?,
        name: row.try_get("name")?,
        image_url: row.try_get("image_url")?,
        product_category: row.try_get("product_category")?,
        product_category_rank_id: row.try_get("product_category_rank_id")?,
        tax_category: row.try_get("tax_category")?,
        preparation_notes: row.try_get("preparation_notes")?,
        is_hazmat: row.try_get("is_hazmat")?,
        has_battery: row.try_get("has_battery")?,
        active_sku_count: row.try_get("active_sku_count")?,
        package,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn bounds(minimum: Option<Decimal>, maximum: Option<Decimal>) -> Option<PriceBounds> {
    Some(PriceBounds {
        minimum: minimum?,
        maximum: maximum?,
    })
}

fn msp_from_row(row: &PgRow) -> Result<MinimumSellingPrice, sqlx::Error> {
    Ok(MinimumSellingPrice {
        id: row.try_get("id")?,
        sku_id: row.try_get("sku_id")?,
        currency: row.try_get("currency")?,
        local: bounds(row.try_get("local_minimum")?, row.try_get("local_maximum")?),
        efn: bounds(row.try_get("efn_minimum")?, row.try_get("efn_maximum")?),
        enrolled_in_pan_eu: row.try_get("enrolled_in_pan_eu")?,
        eligible_for_pan_eu: row.try_get("eligible_for_pan_eu")?,
        referral_fee_id: row.try_get("referral_fee_id")?,
        minimum_margin_amount: row.try_get("minimum_margin_amount")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn afn_from_row(row: &PgRow) -> Result<AfnInventoryDailyUpdate, sqlx::Error> {
    Ok(AfnInventoryDailyUpdate {
        id: row.try_get("id")?,
        sku_id: row.try_get("sku_id")?,
        sku: row.try_get("sku")?,
        country_code: row.try_get("country_code")?,
        actual_price: row.try_get("actual_price")?,
        currency: row.try_get("currency")?,
        fulfillable_quantity: row.try_get("fulfillable_quantity")?,
        report_document_id: row.try_get("report_document_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<SellingPriceHistory, sqlx::Error> {
    Ok(SellingPriceHistory {
        id: row.try_get("id")?,
        sku_id: row.try_get("sku_id")?,
        day: row.try_get("day")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
    })
}

fn ean_asin_from_row(row: &PgRow) -> Result<EanAsin, sqlx::Error> {
    Ok(EanAsin {
        id: row.try_get("id")?,
        ean: row.try_get("ean")?,
        asin_id: row.try_get("asin_id")?,
        quantity: row.try_get("quantity")?,
    })
}

fn fba_fee_from_row(row: &PgRow) -> Result<FbaFee, sqlx::Error> {
    Ok(FbaFee {
        id: row.try_get("id")?,
        asin_id: row.try_get("asin_id")?,
        price_grid_fba_fee_id: row.try_get("price_grid_fba_fee_id")?,
        country_code: row.try_get("country_code")?,
    })
}

fn grid_from_row(row: &PgRow) -> Result<PriceGridFbaFee, sqlx::Error> {
    Ok(PriceGridFbaFee {
        id: row.try_get("id")?,
        country_code: row.try_get("country_code")?,
        category: row.try_get("category")?,
        sort_order: row.try_get("sort_order")?,
        max_length_cm: row.try_get("max_length_cm")?,
        max_width_cm: row.try_get("max_width_cm")?,
        max_height_cm: row.try_get("max_height_cm")?,
        max_weight_kg: row.try_get("max_weight_kg")?,
        fee_local: row.try_get("fee_local")?,
        fee_efn: row.try_get("fee_efn")?,
        low_price_fee_local: row.try_get("low_price_fee_local")?,
        low_price_fee_efn: row.try_get("low_price_fee_efn")?,
        low_price_threshold: row.try_get("low_price_threshold")?,
    })
}

fn referral_fee_from_row(row: &PgRow) -> Result<AmazonReferralFee, sqlx::Error> {
    Ok(AmazonReferralFee {
        id: row.try_get("id")?,
        country_code: row.try_get("country_code")?,
        product_category: row.try_get("product_category")?,
        percentage: row.try_get("percentage")?,
        reduced_percentage: row.try_get("reduced_percentage")?,
        reduced_price_limit: row.try_get("reduced_price_limit")?,
        minimum_fee: row.try_get("minimum_fee")?,
        closing_fee: row.try_get("closing_fee")?,
    })
}

#[async_trait]
impl SkuRepository for PgStore {
    async fn find_sku(&self, sku: &str, country_code: &str) -> RepoResult<Option<Sku>> {
        let row = sqlx::query(&format!(
            "SELECT {SKU_COLUMNS} FROM skus WHERE sku = $1 AND country_code = $2"
        ))
        .bind(sku)
        .bind(country_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(sku_from_row).transpose()?)
    }

    async fn get_sku(&self, id: i64) -> RepoResult<Option<Sku>> {
        let row = sqlx::query(&format!("SELECT {SKU_COLUMNS} FROM skus WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(sku_from_row).transpose()?)
    }

    async fn find_skus_by_code(&self, sku: &str) -> RepoResult<Vec<Sku>> {
        let rows = sqlx::query(&format!("SELECT {SKU_COLUMNS} FROM skus WHERE sku = $1 ORDER BY id"))
            .bind(sku)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(sku_from_row).collect::<Result<_, _>>()?)
    }

    async fn create_sku(&self, new: NewSku) -> RepoResult<Sku> {
        let key = format!("{}/{}", new.sku, new.country_code);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO skus (sku, country_code, currency, fnsku, acquisition_cost_excl,
                              acquisition_cost_incl, total_fulfillable_quantity,
                              average_selling_price, pricing_rule_id, is_test)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {SKU_COLUMNS}
            "#
        ))
        .bind(&new.sku)
        .bind(&new.country_code)
        .bind(&new.currency)
        .bind(&new.fnsku)
        .bind(new.acquisition_cost_excl)
        .bind(new.acquisition_cost_incl)
        .bind(new.total_fulfillable_quantity)
        .bind(new.average_selling_price)
        .bind(new.pricing_rule_id)
        .bind(new.is_test)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error("sku", key))?;
        Ok(sku_from_row(&row)?)
    }

    async fn update_sku(&self, sku: &Sku) -> RepoResult<Sku> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE skus
               SET currency = $2, fnsku = $3, acquisition_cost_excl = $4,
                   acquisition_cost_incl = $5, total_fulfillable_quantity = $6,
                   average_selling_price = $7, average_margin = $8, average_roi = $9,
                   active_days = $10, inactive_days = $11, is_active = $12,
                   restock_alert_quantity = $13, is_test = $14, pricing_rule_id = $15,
                   updated_at = NOW()
             WHERE id = $1
            RETURNING {SKU_COLUMNS}
            "#
        ))
        .bind(sku.id)
        .bind(&sku.currency)
        .bind(&sku.fnsku)
        .bind(sku.acquisition_cost_excl)
        .bind(sku.acquisition_cost_incl)
        .bind(sku.total_fulfillable_quantity)
        .bind(sku.average_selling_price)
        .bind(sku.average_margin)
        .bind(sku.average_roi)
        .bind(sku.active_days)
        .bind(sku.inactive_days)
        .bind(sku.is_active)
        .bind(sku.restock_alert_quantity)
        .bind(sku.is_test)
        .bind(sku.pricing_rule_id)
        .fetch_optional(&self.pool)
        .await?;
        let row = require_row("sku", sku.id, row)?;
        Ok(sku_from_row(&row)?)
    }
}

#[async_trait]
impl AsinRepository for PgStore {
    async fn find_asin(&self, asin: &str, country_code: &str) -> RepoResult<Option<Asin>> {
        let row = sqlx::query(&format!(
            "SELECT {ASIN_COLUMNS} FROM asins WHERE asin = $1 AND country_code = $2"
        ))
        .bind(asin)
        .bind(country_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(asin_from_row).transpose()?)
    }

    async fn get_asin(&self, id: i64) -> RepoResult<Option<Asin>> {
        let row = sqlx::query(&format!("SELECT {ASIN_COLUMNS} FROM asins WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(asin_from_row).transpose()?)
    }

    async fn find_asins_by_code(&self, asin: &str) -> RepoResult<Vec<Asin>> {
        let rows = sqlx::query(&format!("SELECT {ASIN_COLUMNS} FROM asins WHERE asin = $1 ORDER BY id"))
            .bind(asin)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(asin_from_row).collect::<Result<_, _>>()?)
    }

    async fn create_asin(&self, new: NewAsin) -> RepoResult<Asin> {
        let key = format!("{}/{}", new.asin, new.country_code);
        let package = new.package;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO asins (asin, country_code, name, image_url, product_category,
                               tax_category, preparation_notes, is_hazmat, has_battery,
                               package_length_cm, package_width_cm, package_height_cm,
                               package_weight_kg)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {ASIN_COLUMNS}
            "#
        ))
        .bind(&new.asin)
        .bind(&new.country_code)
        .bind(&new.name)
        .bind(&new.image_url)
        .bind(&new.product_category)
        .bind(&new.tax_category)
        .bind(&new.preparation_notes)
        .bind(new.is_hazmat)
        .bind(new.has_battery)
        .bind(package.map(|p| p.length_cm))
        .bind(package.map(|p| p.width_cm))
        .bind(package.map(|p| p.height_cm))
        .bind(package.map(|p| p.weight_kg))
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error("asin", key))?;
        Ok(asin_from_row(&row)?)
    }

    async fn update_asin(&self, asin: &Asin) -> RepoResult<Asin> {
        let package = asin.package;
        let row = sqlx::query(&format!(
            r#"
            UPDATE asins
               SET name = $2, image_url = $3, product_category = $4,
                   product_category_rank_id = $5, tax_category = $6, preparation_notes = $7,
                   is_hazmat = $8, has_battery = $9, active_sku_count = $10,
                   package_length_cm = $11, package_width_cm = $12, package_height_cm = $13,
                   package_weight_kg = $14, updated_at = NOW()
             WHERE id = $1
            RETURNING {ASIN_COLUMNS}
            "#
        ))
        .bind(asin.id)
        .bind(&asin.name)
        .bind(&asin.image_url)
        .bind(&asin.product_category)
        .bind(asin.product_category_rank_id)
        .bind(&asin.tax_category)
        .bind(&asin.preparation_notes)
        .bind(asin.is_hazmat)
        .bind(asin.has_battery)
        .bind(asin.active_sku_count)
        .bind(package.map(|p| p.length_cm))
        .bind(package.map(|p| p.width_cm))
        .bind(package.map(|p| p.height_cm))
        .bind(package.map(|p| p.weight_kg))
        .fetch_optional(&self.pool)
        .await?;
        let row = require_row("asin", asin.id, row)?;
        Ok(asin_from_row(&row)?)
    }
}

fn asin_sku_from_row(row: &PgRow) -> Result<AsinSku, sqlx::Error> {
    Ok(AsinSku {
        id: row.try_get("id")?,
        asin_id: row.try_get("asin_id")?,
        sku_id: row.try_get("sku_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AsinSkuRepository for PgStore {
    async fn find_asin_sku(&self, asin_id: i64, sku_id: i64) -> RepoResult<Option<AsinSku>> {
        let row = sqlx::query(
            "SELECT id, asin_id, sku_id, created_at FROM asin_skus WHERE asin_id = $1 AND sku_id = $2",
        )
        .bind(asin_id)
        .bind(sku_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(asin_sku_from_row).transpose()?)
    }

    async fn create_asin_sku(&self, asin_id: i64, sku_id: i64) -> RepoResult<AsinSku> {
        let row = sqlx::query(
            r#"
            INSERT INTO asin_skus (asin_id, sku_id)
            VALUES ($1, $2)
            RETURNING id, asin_id, sku_id, created_at
            "#,
        )
        .bind(asin_id)
        .bind(sku_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error("asin_sku", format!("{asin_id}/{sku_id}")))?;
        Ok(asin_sku_from_row(&row)?)
    }

    async fn list_asin_skus_for_asin(&self, asin_id: i64) -> RepoResult<Vec<AsinSku>> {
        let rows = sqlx::query(
            "SELECT id, asin_id, sku_id, created_at FROM asin_skus WHERE asin_id = $1 ORDER BY id",
        )
        .bind(asin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(asin_sku_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_asin_skus_for_sku(&self, sku_id: i64) -> RepoResult<Vec<AsinSku>> {
        let rows = sqlx::query(
            "SELECT id, asin_id, sku_id, created_at FROM asin_skus WHERE sku_id = $1 ORDER BY id",
        )
        .bind(sku_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(asin_sku_from_row).collect::<Result<_, _>>()?)
    }
}

#[async_trait]
impl MinimumSellingPriceRepository for PgStore {
    async fn find_minimum_selling_price(&self, sku_id: i64) -> RepoResult<Option<MinimumSellingPrice>> {
        let row = sqlx::query(&format!(
            "SELECT {MSP_COLUMNS} FROM minimum_selling_prices WHERE sku_id = $1"
        ))
        .bind(sku_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(msp_from_row).transpose()?)
    }

    async fn create_minimum_selling_price(
        &self,
        new: NewMinimumSellingPrice,
    ) -> RepoResult<MinimumSellingPrice> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO minimum_selling_prices (sku_id, currency, local_minimum, local_maximum,
                                                efn_minimum, efn_maximum, enrolled_in_pan_eu,
                                                eligible_for_pan_eu, referral_fee_id,
                                                minimum_margin_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {MSP_COLUMNS}
            "#
        ))
        .bind(new.sku_id)
        .bind(&new.currency)
        .bind(new.local.map(|b| b.minimum))
        .bind(new.local.map(|b| b.maximum))
        .bind(new.efn.map(|b| b.minimum))
        .bind(new.efn.map(|b| b.maximum))
        .bind(new.enrolled_in_pan_eu)
        .bind(new.eligible_for_pan_eu)
        .bind(new.referral_fee_id)
        .bind(new.minimum_margin_amount)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error("minimum_selling_price", new.sku_id.to_string()))?;
        Ok(msp_from_row(&row)?)
    }

    async fn update_minimum_selling_price(
        &self,
        price: &MinimumSellingPrice,
    ) -> RepoResult<MinimumSellingPrice> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE minimum_selling_prices
               SET currency = $2, local_minimum = $3, local_maximum = $4, efn_minimum = $5,
                   efn_maximum = $6, enrolled_in_pan_eu = $7, eligible_for_pan_eu = $8,
                   referral_fee_id = $9, minimum_margin_amount = $10, updated_at = NOW()
             WHERE id = $1
            RETURNING {MSP_COLUMNS}
            "#
        ))
        .bind(price.id)
        .bind(&price.currency)
        .bind(price.local.map(|b| b.minimum))
        .bind(price.local.map(|b| b.maximum))
        .bind(price.efn.map(|b| b.minimum))
        .bind(price.efn.map(|b| b.maximum))
        .bind(price.enrolled_in_pan_eu)
        .bind(price.eligible_for_pan_eu)
        .bind(price.referral_fee_id)
        .bind(price.minimum_margin_amount)
        .fetch_optional(&self.pool)
        .await?;
        let row = require_row("minimum_selling_price", price.id, row)?;
        Ok(msp_from_row(&row)?)
    }
}

#[async_trait]
impl AfnInventoryRepository for PgStore {
    async fn find_afn_snapshot(&self, sku_id: i64) -> RepoResult<Option<AfnInventoryDailyUpdate>> {
        let row = sqlx::query(&format!(
            "SELECT {AFN_COLUMNS} FROM afn_inventory_daily_updates WHERE sku_id = $1"
        ))
        .bind(sku_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(afn_from_row).transpose()?)
    }

    async fn list_afn_snapshots_for_sku_code(&self, sku: &str) -> RepoResult<Vec<AfnInventoryDailyUpdate>> {
        let rows = sqlx::query(&format!(
            "SELECT {AFN_COLUMNS} FROM afn_inventory_daily_updates WHERE sku = $1 ORDER BY id"
        ))
        .bind(sku)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(afn_from_row).collect::<Result<_, _>>()?)
    }

    async fn upsert_afn_snapshot(
        &self,
        new: NewAfnInventoryDailyUpdate,
    ) -> RepoResult<Upserted<AfnInventoryDailyUpdate>> {
        // xmax is zero only on rows this statement inserted
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO afn_inventory_daily_updates (sku_id, sku, country_code, actual_price,
                                                     currency, fulfillable_quantity,
                                                     report_document_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (sku_id) DO UPDATE
               SET actual_price = EXCLUDED.actual_price,
                   currency = EXCLUDED.currency,
                   fulfillable_quantity = EXCLUDED.fulfillable_quantity,
                   report_document_id = EXCLUDED.report_document_id,
                   updated_at = NOW()
            RETURNING {AFN_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(new.sku_id)
        .bind(&new.sku)
        .bind(&new.country_code)
        .bind(new.actual_price)
        .bind(&new.currency)
        .bind(new.fulfillable_quantity)
        .bind(&new.report_document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Upserted {
            record: afn_from_row(&row)?,
            created: row.try_get("inserted")?,
        })
    }
}

#[async_trait]
impl SellingPriceHistoryRepository for PgStore {
    async fn find_selling_price_history(
        &self,
        sku_id: i64,
        day: NaiveDate,
    ) -> RepoResult<Option<SellingPriceHistory>> {
        let row = sqlx::query(
            r#"
            SELECT id, sku_id, day, price, currency, created_at
              FROM selling_price_histories
             WHERE sku_id = $1 AND day = $2
            "#,
        )
        .bind(sku_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(history_from_row).transpose()?)
    }

    async fn create_selling_price_history(
        &self,
        new: NewSellingPriceHistory,
    ) -> RepoResult<SellingPriceHistory> {
        let row = sqlx::query(
            r#"
            INSERT INTO selling_price_histories (sku_id, day, price, currency)
            VALUES ($1, $2, $3, $4)
            RETURNING id, sku_id, day, price, currency, created_at
            "#,
        )
        .bind(new.sku_id)
        .bind(new.day)
        .bind(new.price)
        .bind(&new.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error(
            "selling_price_history",
            format!("{}/{}", new.sku_id, new.day),
        ))?;
        Ok(history_from_row(&row)?)
    }
}

#[async_trait]
impl EanAsinRepository for PgStore {
    async fn list_ean_asins(&self, asin_id: i64) -> RepoResult<Vec<EanAsin>> {
        let rows = sqlx::query(
            "SELECT id, ean, asin_id, quantity FROM ean_asins WHERE asin_id = $1 ORDER BY id",
        )
        .bind(asin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(ean_asin_from_row).collect::<Result<_, _>>()?)
    }

    async fn create_ean_asin(&self, new: NewEanAsin) -> RepoResult<EanAsin> {
        let row = sqlx::query(
            r#"
            INSERT INTO ean_asins (ean, asin_id, quantity)
            VALUES ($1, $2, $3)
            RETURNING id, ean, asin_id, quantity
            "#,
        )
        .bind(&new.ean)
        .bind(new.asin_id)
        .bind(new.quantity)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error("ean_asin", format!("{}/{}", new.ean, new.asin_id)))?;
        Ok(ean_asin_from_row(&row)?)
    }
}

#[async_trait]
impl FbaFeeRepository for PgStore {
    async fn find_fba_fee(&self, asin_id: i64) -> RepoResult<Option<FbaFee>> {
        let row = sqlx::query(
            "SELECT id, asin_id, price_grid_fba_fee_id, country_code FROM fba_fees WHERE asin_id = $1",
        )
        .bind(asin_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(fba_fee_from_row).transpose()?)
    }

    async fn create_fba_fee(&self, new: NewFbaFee) -> RepoResult<FbaFee> {
        let row = sqlx::query(
            r#"
            INSERT INTO fba_fees (asin_id, price_grid_fba_fee_id, country_code)
            VALUES ($1, $2, $3)
            RETURNING id, asin_id, price_grid_fba_fee_id, country_code
            "#,
        )
        .bind(new.asin_id)
        .bind(new.price_grid_fba_fee_id)
        .bind(&new.country_code)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error("fba_fee", new.asin_id.to_string()))?;
        Ok(fba_fee_from_row(&row)?)
    }
}

#[async_trait]
impl FeeReferenceRepository for PgStore {
    async fn list_price_grid_fba_fees(&self, country_code: &str) -> RepoResult<Vec<PriceGridFbaFee>> {
        let rows = sqlx::query(&format!(
            "SELECT {GRID_COLUMNS} FROM price_grid_fba_fees WHERE country_code = $1 ORDER BY sort_order, id"
        ))
        .bind(country_code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(grid_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_price_grid_fba_fee(&self, id: i64) -> RepoResult<Option<PriceGridFbaFee>> {
        let row = sqlx::query(&format!("SELECT {GRID_COLUMNS} FROM price_grid_fba_fees WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(grid_from_row).transpose()?)
    }

    async fn find_referral_fee(
        &self,
        country_code: &str,
        product_category: &str,
    ) -> RepoResult<Option<AmazonReferralFee>> {
        let row = sqlx::query(
            r#"
            SELECT id, country_code, product_category, percentage, reduced_percentage,
                   reduced_price_limit, minimum_fee, closing_fee
              FROM amazon_referral_fees
             WHERE country_code = $1 AND product_category = $2
            "#,
        )
        .bind(country_code)
        .bind(product_category)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(referral_fee_from_row).transpose()?)
    }

    async fn get_pricing_rule(&self, id: i64) -> RepoResult<Option<PricingRule>> {
        let row = sqlx::query(
            "SELECT id, name, minimum_margin_amount, markup_multiplier FROM pricing_rules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> Result<PricingRule, sqlx::Error> {
            Ok(PricingRule {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                minimum_margin_amount: row.try_get("minimum_margin_amount")?,
                markup_multiplier: row.try_get("markup_multiplier")?,
            })
        })
        .transpose()
        .map_err(RepositoryError::from)
    }
}

#[cfg(test)]
mod tests {
    //! Run against a scratch database: `DATABASE_URL=postgres://... cargo test -p fbaops-storage`.
    //! Every test returns early when the variable is unset.

    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    use super::*;

    static SEQUENCE: AtomicU32 = AtomicU32::new(0);

    async fn test_store() -> Option<PgStore> {
        let database_url = std::env::var("DATABASE_URL").ok()?;
        let store = PgStore::connect(&database_url, 2).await.unwrap();
        store.migrate().await.unwrap();
        Some(store)
    }

    /// Natural keys that do not collide with earlier runs against the same database.
    fn unique(prefix: &str) -> String {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{}-{seq}", Utc::now().timestamp_micros())
    }

    fn new_sku(code: &str, country: &str) -> NewSku {
        NewSku {
            sku: code.into(),
            country_code: country.into(),
            currency: "EUR".into(),
            fnsku: None,
            acquisition_cost_excl: Decimal::new(1000, 2),
            acquisition_cost_incl: Decimal::new(1200, 2),
            total_fulfillable_quantity: 0,
            average_selling_price: None,
            pricing_rule_id: None,
            is_test: true,
        }
    }

    fn new_asin(code: &str, country: &str) -> NewAsin {
        NewAsin {
            asin: code.into(),
            country_code: country.into(),
            name: Some("Enamel mug".into()),
            image_url: None,
            product_category: Some("kitchen".into()),
            tax_category: None,
            preparation_notes: None,
            is_hazmat: false,
            has_battery: false,
            package: Some(PackageDimensions {
                length_cm: Decimal::new(1250, 2),
                width_cm: Decimal::new(900, 2),
                height_cm: Decimal::new(1100, 2),
                weight_kg: Decimal::new(420, 3),
            }),
        }
    }

    async fn insert_grid_row(store: &PgStore, category: &str) -> i64 {
        sqlx::query(
            r#"
            INSERT INTO price_grid_fba_fees (country_code, category, sort_order, max_length_cm,
                                             max_width_cm, max_height_cm, max_weight_kg,
                                             fee_local, low_price_threshold)
            VALUES ('ZZ', $1, 1, 20, 15, 12, 0.5, 2.70, 10.00)
            RETURNING id
            "#,
        )
        .bind(category)
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("id")
    }

    #[tokio::test]
    async fn sku_round_trip_and_duplicate_is_conflict() {
        let Some(store) = test_store().await else { return };
        let code = unique("MUG");
        let created = store.create_sku(new_sku(&code, "DE")).await.unwrap();
        store.create_sku(new_sku(&code, "FR")).await.unwrap();

        let found = store.find_sku(&code, "DE").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(store.get_sku(created.id).await.unwrap(), Some(created.clone()));
        assert_eq!(store.find_skus_by_code(&code).await.unwrap().len(), 2);

        let err = store.create_sku(new_sku(&code, "DE")).await.unwrap_err();
        assert!(err.is_conflict());

        let mut sku = created;
        sku.fnsku = Some("X00PGTEST".into());
        sku.total_fulfillable_quantity = 9;
        let updated = store.update_sku(&sku).await.unwrap();
        assert_eq!(updated.fnsku.as_deref(), Some("X00PGTEST"));
        assert_eq!(updated.total_fulfillable_quantity, 9);

        sku.id = -1;
        assert!(matches!(
            store.update_sku(&sku).await,
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn asin_round_trip_keeps_package_and_links_skus() {
        let Some(store) = test_store().await else { return };
        let code = unique("B0");
        let asin = store.create_asin(new_asin(&code, "DE")).await.unwrap();
        let found = store.find_asin(&code, "DE").await.unwrap().unwrap();
        assert_eq!(found.package, new_asin(&code, "DE").package);
        assert_eq!(found, asin);
        assert!(store.create_asin(new_asin(&code, "DE")).await.unwrap_err().is_conflict());

        let sku = store.create_sku(new_sku(&unique("MUG"), "DE")).await.unwrap();
        let link = store.create_asin_sku(asin.id, sku.id).await.unwrap();
        assert_eq!(store.find_asin_sku(asin.id, sku.id).await.unwrap(), Some(link.clone()));
        assert_eq!(store.list_asin_skus_for_asin(asin.id).await.unwrap(), vec![link.clone()]);
        assert_eq!(store.list_asin_skus_for_sku(sku.id).await.unwrap(), vec![link]);
        assert!(store.create_asin_sku(asin.id, sku.id).await.unwrap_err().is_conflict());

        let mut asin = asin;
        asin.active_sku_count = 1;
        let updated = store.update_asin(&asin).await.unwrap();
        assert_eq!(updated.active_sku_count, 1);
    }

    #[tokio::test]
    async fn minimum_selling_price_is_one_per_sku() {
        let Some(store) = test_store().await else { return };
        let sku = store.create_sku(new_sku(&unique("MUG"), "DE")).await.unwrap();
        let new = NewMinimumSellingPrice {
            sku_id: sku.id,
            currency: "EUR".into(),
            local: Some(PriceBounds {
                minimum: Decimal::new(1999, 2),
                maximum: Decimal::new(2999, 2),
            }),
            efn: None,
            enrolled_in_pan_eu: false,
            eligible_for_pan_eu: true,
            referral_fee_id: None,
            minimum_margin_amount: Decimal::new(300, 2),
        };
        let created = store.create_minimum_selling_price(new.clone()).await.unwrap();
        assert_eq!(store.find_minimum_selling_price(sku.id).await.unwrap(), Some(created.clone()));
        assert!(store.create_minimum_selling_price(new).await.unwrap_err().is_conflict());

        let mut price = created;
        price.efn = Some(PriceBounds {
            minimum: Decimal::new(2149, 2),
            maximum: Decimal::new(3149, 2),
        });
        let updated = store.update_minimum_selling_price(&price).await.unwrap();
        assert_eq!(updated.efn, price.efn);
        assert_eq!(updated.local, price.local);
    }

    #[tokio::test]
    async fn afn_snapshot_upsert_creates_once_then_overwrites() {
        let Some(store) = test_store().await else { return };
        let sku = store.create_sku(new_sku(&unique("MUG"), "DE")).await.unwrap();
        let snapshot = |quantity: i64, document: &str| NewAfnInventoryDailyUpdate {
            sku_id: sku.id,
            sku: sku.sku.clone(),
            country_code: sku.country_code.clone(),
            actual_price: Some(Decimal::new(2499, 2)),
            currency: "EUR".into(),
            fulfillable_quantity: quantity,
            report_document_id: document.into(),
        };

        let first = store.upsert_afn_snapshot(snapshot(5, "doc-1")).await.unwrap();
        assert!(first.created);
        let second = store.upsert_afn_snapshot(snapshot(0, "doc-2")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.record.id, first.record.id);

        let stored = store.find_afn_snapshot(sku.id).await.unwrap().unwrap();
        assert_eq!(stored.fulfillable_quantity, 0);
        assert_eq!(stored.report_document_id, "doc-2");
        assert_eq!(store.list_afn_snapshots_for_sku_code(&sku.sku).await.unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn selling_price_history_is_unique_per_day() {
        let Some(store) = test_store().await else { return };
        let sku = store.create_sku(new_sku(&unique("MUG"), "DE")).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let new = NewSellingPriceHistory {
            sku_id: sku.id,
            day,
            price: Decimal::new(2499, 2),
            currency: "EUR".into(),
        };
        let created = store.create_selling_price_history(new.clone()).await.unwrap();
        assert_eq!(store.find_selling_price_history(sku.id, day).await.unwrap(), Some(created));
        assert!(store.create_selling_price_history(new).await.unwrap_err().is_conflict());
        assert!(store
            .find_selling_price_history(sku.id, day.succ_opt().unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ean_and_fee_links_round_trip() {
        let Some(store) = test_store().await else { return };
        let asin = store.create_asin(new_asin(&unique("B0"), "DE")).await.unwrap();

        let ean = NewEanAsin {
            ean: unique("4006381333931"),
            asin_id: asin.id,
            quantity: 2,
        };
        let created = store.create_ean_asin(ean.clone()).await.unwrap();
        assert_eq!(store.list_ean_asins(asin.id).await.unwrap(), vec![created]);
        assert!(store.create_ean_asin(ean).await.unwrap_err().is_conflict());

        let grid_id = insert_grid_row(&store, &unique("small-envelope")).await;
        let fee = NewFbaFee {
            asin_id: asin.id,
            price_grid_fba_fee_id: grid_id,
            country_code: "DE".into(),
        };
        let created = store.create_fba_fee(fee.clone()).await.unwrap();
        assert_eq!(store.find_fba_fee(asin.id).await.unwrap(), Some(created));
        assert!(store.create_fba_fee(fee).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn reference_rows_are_read_back() {
        let Some(store) = test_store().await else { return };
        let category = unique("standard-parcel");
        let grid_id = insert_grid_row(&store, &category).await;
        let grid = store.get_price_grid_fba_fee(grid_id).await.unwrap().unwrap();
        assert_eq!(grid.category, category);
        assert_eq!(grid.fee_local, Decimal::new(270, 2));
        assert_eq!(grid.low_price_threshold, Some(Decimal::new(1000, 2)));
        assert!(store
            .list_price_grid_fba_fees("ZZ")
            .await
            .unwrap()
            .iter()
            .any(|row| row.id == grid_id));

        let product_category = unique("kitchen");
        sqlx::query(
            r#"
            INSERT INTO amazon_referral_fees (country_code, product_category, percentage,
                                              reduced_percentage, reduced_price_limit)
            VALUES ('ZZ', $1, 0.15, 0.08, 10.00)
            "#,
        )
        .bind(&product_category)
        .execute(store.pool())
        .await
        .unwrap();
        let referral = store.find_referral_fee("ZZ", &product_category).await.unwrap().unwrap();
        assert_eq!(referral.percentage, Decimal::new(15, 2));
        assert_eq!(referral.reduced_price_limit, Some(Decimal::new(1000, 2)));
        assert_eq!(referral.minimum_fee, Decimal::ZERO);
        assert!(store.find_referral_fee("ZZ", &unique("missing")).await.unwrap().is_none());

        let rule_id: i64 = sqlx::query(
            "INSERT INTO pricing_rules (name, minimum_margin_amount) VALUES ($1, 4.50) RETURNING id",
        )
        .bind(unique("rule"))
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("id");
        let rule = store.get_pricing_rule(rule_id).await.unwrap().unwrap();
        assert_eq!(rule.minimum_margin_amount, Decimal::new(450, 2));
        assert_eq!(rule.markup_multiplier, None);
    }
}
