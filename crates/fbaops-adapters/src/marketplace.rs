//! Per-country marketplace settings loaded from `marketplaces.yaml`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use fbaops_core::{validate_decimal, NumberOptions};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AdapterError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marketplace {
    pub country_code: String,
    pub marketplace_id: String,
    pub currency: String,
    pub vat_rate: Decimal,
    #[serde(default)]
    pub pan_eu_eligible: bool,
}

#[derive(Debug, Deserialize)]
struct MarketplacesYaml {
    marketplaces: Vec<Marketplace>,
}

#[derive(Debug, Clone, Default)]
pub struct MarketplaceRegistry {
    by_country: BTreeMap<String, Marketplace>,
}

impl MarketplaceRegistry {
    pub fn new(marketplaces: impl IntoIterator<Item = Marketplace>) -> Result<Self, AdapterError> {
        let mut by_country = BTreeMap::new();
        for mut marketplace in marketplaces {
            let param = format!("{}.vat_rate", marketplace.country_code);
            marketplace.vat_rate = validate_decimal(marketplace.vat_rate, &NumberOptions::fraction(&param))?;
            marketplace.country_code = marketplace.country_code.to_ascii_uppercase();
            by_country.insert(marketplace.country_code.clone(), marketplace);
        }
        Ok(Self { by_country })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, AdapterError> {
        let parsed: MarketplacesYaml = serde_yaml::from_str(yaml)
            .context("parsing marketplaces")
            .map_err(AdapterError::Anyhow)?;
        Self::new(parsed.marketplaces)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn get(&self, country_code: &str) -> Option<&Marketplace> {
        self.by_country.get(&country_code.to_ascii_uppercase())
    }

    pub fn require(&self, country_code: &str) -> Result<&Marketplace, AdapterError> {
        self.get(country_code)
            .ok_or_else(|| AdapterError::UnknownMarketplace(country_code.to_string()))
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.by_country.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
marketplaces:
  - country_code: de
    marketplace_id: A1PA6795UKMFR9
    currency: EUR
    vat_rate: 0.19
    pan_eu_eligible: true
  - country_code: UK
    marketplace_id: A1F83G8C2ARO7P
    currency: GBP
    vat_rate: 0.20
"#;

    #[test]
    fn loads_and_normalizes_country_codes() {
        let registry = MarketplaceRegistry::from_yaml_str(YAML).unwrap();
        let de = registry.require("DE").unwrap();
        assert_eq!(de.currency, "EUR");
        assert_eq!(de.vat_rate, Decimal::new(19, 2));
        assert!(de.pan_eu_eligible);
        assert!(!registry.require("uk").unwrap().pan_eu_eligible);
        assert_eq!(registry.countries().collect::<Vec<_>>(), vec!["DE", "UK"]);
    }

    #[test]
    fn unknown_country_and_bad_vat_are_errors() {
        let registry = MarketplaceRegistry::from_yaml_str(YAML).unwrap();
        assert!(matches!(
            registry.require("JP"),
            Err(AdapterError::UnknownMarketplace(c)) if c == "JP"
        ));

        let bad = YAML.replace("0.19", "19");
        assert!(matches!(
            MarketplaceRegistry::from_yaml_str(&bad),
            Err(AdapterError::Validation(_))
        ));
    }
}
