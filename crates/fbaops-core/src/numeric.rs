//! Parsing and rounding of currency and percentage values.
//!
//! Every numeric value coming from reports, API payloads or configuration passes
//! through [`parse_and_validate_number`] once; code behind it works on `Decimal`.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ValidationError;

const CURRENCY_SYMBOLS: &[char] = &['€', '$', '£', '¥', '₹', '₺', '¤'];

#[derive(Debug, Clone, Copy, Default)]
pub struct NumberOptions<'a> {
    pub param_name: &'a str,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub decimals: Option<u32>,
}

impl<'a> NumberOptions<'a> {
    pub fn new(param_name: &'a str) -> Self {
        Self {
            param_name,
            ..Default::default()
        }
    }

    pub fn min(mut self, min: Decimal) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: Decimal) -> Self {
        self.max = Some(max);
        self
    }

    pub fn decimals(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    /// Range `[0, 1]` used for rates and percentages.
    pub fn fraction(param_name: &'a str) -> Self {
        Self::new(param_name).min(Decimal::ZERO).max(Decimal::ONE)
    }

    /// Non-negative amount rounded to cents.
    pub fn money(param_name: &'a str) -> Self {
        Self::new(param_name).min(Decimal::ZERO).decimals(2)
    }
}

/// Rounds half away from zero, the way prices are shown to customers.
pub fn round_half_away(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// Parses `raw` into a validated decimal.
///
/// Currency symbols and whitespace are stripped. A leading or trailing `%` divides the
/// value by 100. A single comma is read as the decimal separator (`12,99`). Grouped
/// thousands (`1.234,56`, `1,234`) are rejected rather than guessed.
pub fn parse_and_validate_number(
    raw: &str,
    options: &NumberOptions<'_>,
) -> Result<Decimal, ValidationError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !CURRENCY_SYMBOLS.contains(c))
        .collect();
    if cleaned.is_empty() {
        return Err(ValidationError::Missing {
            param: options.param_name.to_string(),
        });
    }

    let (digits, is_percent) = if let Some(rest) = cleaned.strip_prefix('%') {
        (rest, true)
    } else if let Some(rest) = cleaned.strip_suffix('%') {
        (rest, true)
    } else {
        (cleaned.as_str(), false)
    };

    let not_a_number = || ValidationError::NotANumber {
        param: options.param_name.to_string(),
        raw: raw.to_string(),
    };
    let normalized = normalize_separator(digits).ok_or_else(not_a_number)?;
    let parsed = Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .map_err(|_| not_a_number())?;

    let value = if is_percent {
        parsed / Decimal::ONE_HUNDRED
    } else {
        parsed
    };
    validate_decimal(value, options)
}

/// At most one separator; a comma followed by exactly three digits reads as a
/// thousands group and is refused.
fn normalize_separator(digits: &str) -> Option<String> {
    let separators = digits.chars().filter(|c| matches!(c, '.' | ',')).count();
    if separators > 1 {
        return None;
    }
    match digits.split_once(',') {
        Some((_, fraction)) if fraction.len() == 3 && fraction.chars().all(|c| c.is_ascii_digit()) => None,
        Some((whole, fraction)) => Some(format!("{whole}.{fraction}")),
        None => Some(digits.to_string()),
    }
}

/// Applies the range check and rounding of `options` to an already numeric value.
pub fn validate_decimal(value: Decimal, options: &NumberOptions<'_>) -> Result<Decimal, ValidationError> {
    if let Some(min) = options.min {
        if value < min {
            return Err(ValidationError::BelowMinimum {
                param: options.param_name.to_string(),
                value,
                min,
            });
        }
    }
    if let Some(max) = options.max {
        if value > max {
            return Err(ValidationError::AboveMaximum {
                param: options.param_name.to_string(),
                value,
                max,
            });
        }
    }
    Ok(match options.decimals {
        Some(dp) => round_half_away(value, dp),
        None => value,
    })
}

/// Parses a non-negative whole quantity such as `afn-fulfillable-quantity`.
pub fn parse_quantity(raw: &str, param_name: &str) -> Result<i64, ValidationError> {
    let value = parse_and_validate_number(raw, &NumberOptions::new(param_name).min(Decimal::ZERO))?;
    if !value.fract().is_zero() {
        return Err(ValidationError::NotANumber {
            param: param_name.to_string(),
            raw: raw.to_string(),
        });
    }
    i64::try_from(value).map_err(|_| ValidationError::AboveMaximum {
        param: param_name.to_string(),
        value,
        max: Decimal::from(i64::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn trailing_and_leading_percent_are_fractions() {
        let opts = NumberOptions::new("referralFee");
        assert_eq!(parse_and_validate_number("8.24%", &opts).unwrap(), dec("0.0824"));
        assert_eq!(parse_and_validate_number("%8.24", &opts).unwrap(), dec("0.0824"));
    }

    #[test]
    fn non_numeric_input_names_the_parameter() {
        let err = parse_and_validate_number("abc", &NumberOptions::new("your-price")).unwrap_err();
        assert!(matches!(err, ValidationError::NotANumber { .. }));
        assert_eq!(err.param(), "your-price");
    }

    #[test]
    fn blank_input_is_missing() {
        let err = parse_and_validate_number("  ", &NumberOptions::new("your-price")).unwrap_err();
        assert!(matches!(err, ValidationError::Missing { .. }));
    }

    #[test]
    fn currency_symbols_and_spaces_are_stripped() {
        let opts = NumberOptions::money("price");
        assert_eq!(parse_and_validate_number(" € 12.5 ", &opts).unwrap(), dec("12.50"));
        assert_eq!(parse_and_validate_number("12,99", &opts).unwrap(), dec("12.99"));
        assert_eq!(parse_and_validate_number("1234,5", &opts).unwrap(), dec("1234.50"));
    }

    #[test]
    fn grouped_thousands_are_rejected() {
        let opts = NumberOptions::money("your-price");
        for raw in ["1.234,56", "£1,234.56", "1,234", "1,234,567", "1.234.567", "12,,9"] {
            let err = parse_and_validate_number(raw, &opts).unwrap_err();
            assert!(matches!(err, ValidationError::NotANumber { .. }), "{raw}: {err:?}");
        }
        assert_eq!(parse_and_validate_number("1234", &opts).unwrap(), dec("1234.00"));
        assert_eq!(parse_and_validate_number("1.234", &opts).unwrap(), dec("1.23"));
    }

    #[test]
    fn range_is_enforced() {
        let err = parse_and_validate_number("120%", &NumberOptions::fraction("vat")).unwrap_err();
        assert!(matches!(err, ValidationError::AboveMaximum { .. }));

        let err = parse_and_validate_number("-1", &NumberOptions::money("price")).unwrap_err();
        assert!(matches!(err, ValidationError::BelowMinimum { .. }));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_half_away(dec("35.775"), 2), dec("35.78"));
        assert_eq!(round_half_away(dec("-35.775"), 2), dec("-35.78"));
        assert_eq!(round_half_away(dec("23.8461538"), 2), dec("23.85"));
        let opts = NumberOptions::new("x").decimals(1);
        assert_eq!(parse_and_validate_number("0.25", &opts).unwrap(), dec("0.3"));
    }

    #[test]
    fn quantities_must_be_whole() {
        assert_eq!(parse_quantity("17", "qty").unwrap(), 17);
        assert!(parse_quantity("1.5", "qty").is_err());
        assert!(parse_quantity("-3", "qty").is_err());
    }
}
