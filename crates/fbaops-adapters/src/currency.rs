//! Daily EUR reference rates and conversions between marketplace currencies.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use fbaops_core::round_half_away;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

pub const BASE_CURRENCY: &str = "EUR";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurrencyError {
    #[error("no {currency} rate on or before {date}")]
    NoRate { currency: String, date: NaiveDate },
}

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    /// EUR equivalent of `amount` using the latest rate on or before `date`.
    async fn to_eur(&self, amount: Decimal, from: &str, date: NaiveDate) -> Result<Decimal, CurrencyError>;

    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        date: NaiveDate,
    ) -> Result<Decimal, CurrencyError>;
}

#[derive(Debug, Deserialize)]
struct DailyRatesEntry {
    date: NaiveDate,
    rates: BTreeMap<String, Decimal>,
}

/// Units of each currency per one euro, by day.
#[derive(Debug, Clone, Default)]
pub struct DailyRateTable {
    rates: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
}

impl DailyRateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let entries: Vec<DailyRatesEntry> = serde_yaml::from_str(yaml).context("parsing exchange rates")?;
        let mut table = Self::new();
        for entry in entries {
            for (currency, rate) in entry.rates {
                table.insert(entry.date, &currency, rate);
            }
        }
        Ok(table)
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    /// Records a rate; non-positive rates are ignored.
    pub fn insert(&mut self, date: NaiveDate, currency: &str, per_eur: Decimal) {
        if per_eur > Decimal::ZERO {
            self.rates
                .entry(currency.to_ascii_uppercase())
                .or_default()
                .insert(date, per_eur);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn rate_on_or_before(&self, currency: &str, date: NaiveDate) -> Result<Decimal, CurrencyError> {
        let currency = currency.to_ascii_uppercase();
        if currency == BASE_CURRENCY {
            return Ok(Decimal::ONE);
        }
        self.rates
            .get(&currency)
            .and_then(|by_day| by_day.range(..=date).next_back())
            .map(|(_, rate)| *rate)
            .ok_or(CurrencyError::NoRate { currency, date })
    }

    fn eur_value(&self, amount: Decimal, from: &str, date: NaiveDate) -> Result<Decimal, CurrencyError> {
        Ok(amount / self.rate_on_or_before(from, date)?)
    }
}

#[async_trait]
impl CurrencyConverter for DailyRateTable {
    async fn to_eur(&self, amount: Decimal, from: &str, date: NaiveDate) -> Result<Decimal, CurrencyError> {
        Ok(round_half_away(self.eur_value(amount, from, date)?, 2))
    }

    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        date: NaiveDate,
    ) -> Result<Decimal, CurrencyError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(amount);
        }
        let eur = self.eur_value(amount, from, date)?;
        Ok(round_half_away(eur * self.rate_on_or_before(to, date)?, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn table() -> DailyRateTable {
        DailyRateTable::from_yaml_str(
            r#"
- date: 2026-03-02
  rates:
    GBP: 0.85
    SEK: 11.20
- date: 2026-03-04
  rates:
    GBP: 0.80
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn uses_latest_rate_on_or_before_date() {
        let rates = table();
        assert_eq!(rates.to_eur(Decimal::new(85, 0), "GBP", day(3)).await.unwrap(), Decimal::from(100));
        assert_eq!(rates.to_eur(Decimal::new(80, 0), "GBP", day(4)).await.unwrap(), Decimal::from(100));
        assert_eq!(rates.to_eur(Decimal::new(80, 0), "gbp", day(9)).await.unwrap(), Decimal::from(100));
    }

    #[tokio::test]
    async fn fails_without_a_rate_at_or_before_date() {
        let rates = table();
        assert_eq!(
            rates.to_eur(Decimal::ONE, "GBP", day(1)).await.unwrap_err(),
            CurrencyError::NoRate {
                currency: "GBP".into(),
                date: day(1)
            }
        );
        assert!(rates.to_eur(Decimal::ONE, "PLN", day(9)).await.is_err());
    }

    #[tokio::test]
    async fn cross_conversion_routes_through_eur() {
        let rates = table();
        assert_eq!(
            rates.convert(Decimal::new(1700, 2), "GBP", "SEK", day(2)).await.unwrap(),
            Decimal::new(22400, 2)
        );
        assert_eq!(
            rates.convert(Decimal::new(1234, 2), "EUR", "EUR", day(1)).await.unwrap(),
            Decimal::new(1234, 2)
        );
        assert_eq!(
            rates.convert(Decimal::from(10), "EUR", "GBP", day(4)).await.unwrap(),
            Decimal::from(8)
        );
    }
}
