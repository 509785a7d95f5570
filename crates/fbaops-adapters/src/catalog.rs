//! Catalog attributes for a listing, with package measurements normalized to cm/kg.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fbaops_core::{round_half_away, CatalogAttributes, PackageDimensions, UnsupportedFormatError};
use fbaops_storage::HttpFetcher;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::marketplace::MarketplaceRegistry;
use crate::report::SpApiConfig;
use crate::AdapterError;

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn catalog_attributes(
        &self,
        asin: &str,
        country_code: &str,
    ) -> Result<CatalogAttributes, AdapterError>;
}

pub fn length_to_cm(value: Decimal, unit: &str) -> Result<Decimal, UnsupportedFormatError> {
    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "centimeters" | "centimetres" | "centimeter" | "cm" => Decimal::ONE,
        "millimeters" | "millimetres" | "millimeter" | "mm" => Decimal::new(1, 1),
        "meters" | "metres" | "meter" | "m" => Decimal::ONE_HUNDRED,
        "inches" | "inch" | "in" => Decimal::new(254, 2),
        _ => {
            return Err(UnsupportedFormatError::Unit {
                quantity: "length",
                unit: unit.to_string(),
            })
        }
    };
    Ok(round_half_away(value * factor, 2))
}

pub fn weight_to_kg(value: Decimal, unit: &str) -> Result<Decimal, UnsupportedFormatError> {
    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "kilograms" | "kilogram" | "kg" => Decimal::ONE,
        "grams" | "gram" | "g" => Decimal::new(1, 3),
        "pounds" | "pound" | "lb" | "lbs" => Decimal::new(45_359_237, 8),
        "ounces" | "ounce" | "oz" => Decimal::new(28_349_523_125, 12),
        _ => {
            return Err(UnsupportedFormatError::Unit {
                quantity: "weight",
                unit: unit.to_string(),
            })
        }
    };
    Ok(round_half_away(value * factor, 3))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogItem {
    #[serde(default)]
    summaries: Vec<ItemSummary>,
    #[serde(default)]
    dimensions: Vec<ItemDimensions>,
    #[serde(default)]
    images: Vec<ItemImages>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    marketplace_id: String,
    item_name: Option<String>,
    website_display_group_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDimensions {
    marketplace_id: String,
    package: Option<MeasuredBox>,
}

#[derive(Debug, Deserialize)]
struct MeasuredBox {
    length: Option<Measurement>,
    width: Option<Measurement>,
    height: Option<Measurement>,
    weight: Option<Measurement>,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    unit: String,
    value: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemImages {
    marketplace_id: String,
    #[serde(default)]
    images: Vec<ItemImage>,
}

#[derive(Debug, Deserialize)]
struct ItemImage {
    variant: String,
    link: String,
}

fn convert_package(package: &MeasuredBox) -> Result<Option<PackageDimensions>, UnsupportedFormatError> {
    let (Some(l), Some(w), Some(h), Some(wt)) =
        (&package.length, &package.width, &package.height, &package.weight)
    else {
        return Ok(None);
    };
    Ok(Some(PackageDimensions {
        length_cm: length_to_cm(l.value, &l.unit)?,
        width_cm: length_to_cm(w.value, &w.unit)?,
        height_cm: length_to_cm(h.value, &h.unit)?,
        weight_kg: weight_to_kg(wt.value, &wt.unit)?,
    }))
}

impl CatalogItem {
    fn into_attributes(self, marketplace_id: &str) -> Result<CatalogAttributes, UnsupportedFormatError> {
        let summary = self
            .summaries
            .into_iter()
            .find(|s| s.marketplace_id == marketplace_id);
        let package = match self
            .dimensions
            .iter()
            .find(|d| d.marketplace_id == marketplace_id)
            .and_then(|d| d.package.as_ref())
        {
            Some(package) => convert_package(package)?,
            None => None,
        };
        let image_url = self
            .images
            .into_iter()
            .filter(|i| i.marketplace_id == marketplace_id)
            .flat_map(|i| i.images)
            .find(|i| i.variant == "MAIN")
            .map(|i| i.link);

        let (name, product_category) = match summary {
            Some(s) => (s.item_name, s.website_display_group_name),
            None => (None, None),
        };
        Ok(CatalogAttributes {
            name,
            image_url,
            product_category,
            package,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SpApiCatalogClient {
    http: HttpFetcher,
    config: SpApiConfig,
    marketplaces: Arc<MarketplaceRegistry>,
}

impl SpApiCatalogClient {
    pub fn new(http: HttpFetcher, config: SpApiConfig, marketplaces: Arc<MarketplaceRegistry>) -> Self {
        Self {
            http,
            config,
            marketplaces,
        }
    }
}

#[async_trait]
impl CatalogLookup for SpApiCatalogClient {
    async fn catalog_attributes(
        &self,
        asin: &str,
        country_code: &str,
    ) -> Result<CatalogAttributes, AdapterError> {
        let marketplace = self.marketplaces.require(country_code)?;
        let url = self.config.url(&format!(
            "/catalog/2022-04-01/items/{asin}?marketplaceIds={}&includedData=summaries,dimensions,images",
            marketplace.marketplace_id
        ));
        let item: CatalogItem = self
            .http
            .get_json(&url, self.config.access_token.as_deref())
            .await?;
        let attributes = item.into_attributes(&marketplace.marketplace_id)?;
        debug!(asin, country_code, has_package = attributes.package.is_some(), "catalog lookup");
        Ok(attributes)
    }
}

/// Fixed catalog answers keyed by `(asin, country_code)`; unknown keys yield empty attributes.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<(String, String), CatalogAttributes>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, asin: &str, country_code: &str, attributes: CatalogAttributes) -> Self {
        self.entries
            .insert((asin.to_string(), country_code.to_string()), attributes);
        self
    }
}

#[async_trait]
impl CatalogLookup for StaticCatalog {
    async fn catalog_attributes(
        &self,
        asin: &str,
        country_code: &str,
    ) -> Result<CatalogAttributes, AdapterError> {
        Ok(self
            .entries
            .get(&(asin.to_string(), country_code.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_convert_to_centimetres() {
        assert_eq!(length_to_cm(Decimal::new(125, 0), "millimeters").unwrap(), Decimal::new(1250, 2));
        assert_eq!(length_to_cm(Decimal::new(10, 0), "inches").unwrap(), Decimal::new(2540, 2));
        assert_eq!(length_to_cm(Decimal::new(15, 1), "meters").unwrap(), Decimal::new(150, 0));
    }

    #[test]
    fn weights_convert_to_kilograms() {
        assert_eq!(weight_to_kg(Decimal::new(450, 0), "grams").unwrap(), Decimal::new(450, 3));
        assert_eq!(weight_to_kg(Decimal::ONE, "pounds").unwrap(), Decimal::new(454, 3));
        assert_eq!(weight_to_kg(Decimal::new(16, 0), "ounces").unwrap(), Decimal::new(454, 3));
    }

    #[test]
    fn unknown_units_fail_explicitly() {
        let err = length_to_cm(Decimal::ONE, "furlongs").unwrap_err();
        assert_eq!(
            err,
            UnsupportedFormatError::Unit {
                quantity: "length",
                unit: "furlongs".into()
            }
        );
        assert!(weight_to_kg(Decimal::ONE, "stone").is_err());
    }

    const ITEM: &str = r#"{
        "asin": "B000TEST01",
        "summaries": [
            {"marketplaceId": "ATVPDKIKX0DER", "itemName": "US name"},
            {"marketplaceId": "A13V1IB3VIYZZH", "itemName": "Moulin à café",
             "websiteDisplayGroupName": "kitchen_display_on_website"}
        ],
        "dimensions": [
            {"marketplaceId": "A13V1IB3VIYZZH", "package": {
                "length": {"unit": "inches", "value": 7.87},
                "width": {"unit": "centimeters", "value": 10},
                "height": {"unit": "millimeters", "value": 52},
                "weight": {"unit": "grams", "value": 380}
            }}
        ],
        "images": [
            {"marketplaceId": "A13V1IB3VIYZZH", "images": [
                {"variant": "PT01", "link": "https://img.example/pt01.jpg"},
                {"variant": "MAIN", "link": "https://img.example/main.jpg"}
            ]}
        ]
    }"#;

    #[test]
    fn catalog_payload_maps_to_marketplace_attributes() {
        let item: CatalogItem = serde_json::from_str(ITEM).unwrap();
        let attrs = item.into_attributes("A13V1IB3VIYZZH").unwrap();
        assert_eq!(attrs.name.as_deref(), Some("Moulin à café"));
        assert_eq!(attrs.image_url.as_deref(), Some("https://img.example/main.jpg"));
        let package = attrs.package.unwrap();
        assert_eq!(package.length_cm, Decimal::new(1999, 2));
        assert_eq!(package.height_cm, Decimal::new(520, 2));
        assert_eq!(package.weight_kg, Decimal::new(380, 3));
    }

    #[test]
    fn catalog_payload_with_unknown_unit_is_rejected() {
        let payload = ITEM.replace("\"grams\"", "\"stones\"");
        let item: CatalogItem = serde_json::from_str(&payload).unwrap();
        assert!(matches!(
            item.into_attributes("A13V1IB3VIYZZH"),
            Err(UnsupportedFormatError::Unit { quantity: "weight", .. })
        ));
    }
}
