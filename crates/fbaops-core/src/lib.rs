//! Core domain records and pricing primitives for the FBA operations pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod events;
pub mod fee_schedule;
pub mod numeric;
pub mod pricing;

pub use error::{CalculationError, UnsupportedFormatError, ValidationError};
pub use events::{EntityKind, OutcomeCounts, RecordEvent, RecordOutcome, RunCounters, RunCounts};
pub use fee_schedule::{lookup_fee_schedule, FeeScheduleMiss};
pub use numeric::{
    parse_and_validate_number, parse_quantity, round_half_away, validate_decimal, NumberOptions,
};

pub const CRATE_NAME: &str = "fbaops-core";

/// Seller inventory identifier, unique per (sku, country_code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sku {
    pub id: i64,
    pub sku: String,
    pub country_code: String,
    pub currency: String,
    pub fnsku: Option<String>,
    pub acquisition_cost_excl: Decimal,
    pub acquisition_cost_incl: Decimal,
    pub total_fulfillable_quantity: i64,
    pub average_selling_price: Option<Decimal>,
    pub average_margin: Option<Decimal>,
    pub average_roi: Option<Decimal>,
    pub active_days: i32,
    pub inactive_days: i32,
    pub is_active: bool,
    pub restock_alert_quantity: Option<i32>,
    pub is_test: bool,
    pub pricing_rule_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSku {
    pub sku: String,
    pub country_code: String,
    pub currency: String,
    pub fnsku: Option<String>,
    pub acquisition_cost_excl: Decimal,
    pub acquisition_cost_incl: Decimal,
    pub total_fulfillable_quantity: i64,
    pub average_selling_price: Option<Decimal>,
    pub pricing_rule_id: Option<i64>,
    pub is_test: bool,
}

impl NewSku {
    /// Builds a Sku for `country_code` from the same sku code sold in another country.
    ///
    /// Acquisition costs are taken as given; callers convert them beforehand when the
    /// sibling keeps its books in a different currency.
    pub fn inherit_from(
        sibling: &Sku,
        country_code: &str,
        currency: &str,
        acquisition_cost_excl: Decimal,
        acquisition_cost_incl: Decimal,
        total_fulfillable_quantity: i64,
        average_selling_price: Option<Decimal>,
    ) -> Self {
        Self {
            sku: sibling.sku.clone(),
            country_code: country_code.to_string(),
            currency: currency.to_string(),
            fnsku: sibling.fnsku.clone(),
            acquisition_cost_excl,
            acquisition_cost_incl,
            total_fulfillable_quantity,
            average_selling_price,
            pricing_rule_id: sibling.pricing_rule_id,
            is_test: sibling.is_test,
        }
    }
}

/// Package measurements normalized to centimetres and kilograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDimensions {
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
    pub weight_kg: Decimal,
}

/// Catalog attributes fetched for a new marketplace listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogAttributes {
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub product_category: Option<String>,
    pub package: Option<PackageDimensions>,
}

/// Catalog item identifier, unique per (asin, country_code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asin {
    pub id: i64,
    pub asin: String,
    pub country_code: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub product_category: Option<String>,
    pub product_category_rank_id: Option<i64>,
    pub tax_category: Option<String>,
    pub preparation_notes: Option<String>,
    pub is_hazmat: bool,
    pub has_battery: bool,
    pub active_sku_count: i32,
    pub package: Option<PackageDimensions>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAsin {
    pub asin: String,
    pub country_code: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub product_category: Option<String>,
    pub tax_category: Option<String>,
    pub preparation_notes: Option<String>,
    pub is_hazmat: bool,
    pub has_battery: bool,
    pub package: Option<PackageDimensions>,
}

impl NewAsin {
    /// Derives a listing for `country_code` from the same ASIN in another country.
    ///
    /// Business attributes (category, tax category, preparation, hazmat) come from the
    /// sibling; presentation and package data prefer the fresh catalog attributes.
    pub fn derive_from(sibling: &Asin, country_code: &str, catalog: CatalogAttributes) -> Self {
        Self {
            asin: sibling.asin.clone(),
            country_code: country_code.to_string(),
            name: catalog.name.or_else(|| sibling.name.clone()),
            image_url: catalog.image_url.or_else(|| sibling.image_url.clone()),
            product_category: sibling
                .product_category
                .clone()
                .or(catalog.product_category),
            tax_category: sibling.tax_category.clone(),
            preparation_notes: sibling.preparation_notes.clone(),
            is_hazmat: sibling.is_hazmat,
            has_battery: sibling.has_battery,
            package: catalog.package.or(sibling.package),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsinSku {
    pub id: i64,
    pub asin_id: i64,
    pub sku_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Minimum and maximum selling price for one fulfillment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub minimum: Decimal,
    pub maximum: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimumSellingPrice {
    pub id: i64,
    pub sku_id: i64,
    pub currency: String,
    pub local: Option<PriceBounds>,
    pub efn: Option<PriceBounds>,
    pub enrolled_in_pan_eu: bool,
    pub eligible_for_pan_eu: bool,
    pub referral_fee_id: Option<i64>,
    pub minimum_margin_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMinimumSellingPrice {
    pub sku_id: i64,
    pub currency: String,
    pub local: Option<PriceBounds>,
    pub efn: Option<PriceBounds>,
    pub enrolled_in_pan_eu: bool,
    pub eligible_for_pan_eu: bool,
    pub referral_fee_id: Option<i64>,
    pub minimum_margin_amount: Decimal,
}

/// Latest AFN inventory snapshot for a Sku; overwritten in place on every report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfnInventoryDailyUpdate {
    pub id: i64,
    pub sku_id: i64,
    pub sku: String,
    pub country_code: String,
    pub actual_price: Option<Decimal>,
    pub currency: String,
    pub fulfillable_quantity: i64,
    pub report_document_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAfnInventoryDailyUpdate {
    pub sku_id: i64,
    pub sku: String,
    pub country_code: String,
    pub actual_price: Option<Decimal>,
    pub currency: String,
    pub fulfillable_quantity: i64,
    pub report_document_id: String,
}

/// Append-only price history, one row per (Sku, calendar day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellingPriceHistory {
    pub id: i64,
    pub sku_id: i64,
    pub day: NaiveDate,
    pub price: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSellingPriceHistory {
    pub sku_id: i64,
    pub day: NaiveDate,
    pub price: Decimal,
    pub currency: String,
}

/// Product composition link: `quantity` units of an EAN make up one ASIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EanAsin {
    pub id: i64,
    pub ean: String,
    pub asin_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEanAsin {
    pub ean: String,
    pub asin_id: i64,
    pub quantity: i32,
}

/// Links an ASIN to the fee-grid row its package falls into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FbaFee {
    pub id: i64,
    pub asin_id: i64,
    pub price_grid_fba_fee_id: i64,
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFbaFee {
    pub asin_id: i64,
    pub price_grid_fba_fee_id: i64,
    pub country_code: String,
}

/// One package-size tier of a country's FBA fee grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceGridFbaFee {
    pub id: i64,
    pub country_code: String,
    pub category: String,
    pub sort_order: i32,
    pub max_length_cm: Decimal,
    pub max_width_cm: Decimal,
    pub max_height_cm: Decimal,
    pub max_weight_kg: Decimal,
    pub fee_local: Decimal,
    pub fee_efn: Option<Decimal>,
    pub low_price_fee_local: Option<Decimal>,
    pub low_price_fee_efn: Option<Decimal>,
    pub low_price_threshold: Option<Decimal>,
}

/// Referral-fee terms for a product category in one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmazonReferralFee {
    pub id: i64,
    pub country_code: String,
    pub product_category: String,
    pub percentage: Decimal,
    pub reduced_percentage: Option<Decimal>,
    pub reduced_price_limit: Option<Decimal>,
    pub minimum_fee: Decimal,
    pub closing_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: i64,
    pub name: String,
    pub minimum_margin_amount: Decimal,
    pub markup_multiplier: Option<Decimal>,
}
