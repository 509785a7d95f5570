use rust_decimal::Decimal;
use thiserror::Error;

/// Malformed or out-of-range input at the parsing boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{param}: required value is missing")]
    Missing { param: String },
    #[error("{param}: `{raw}` is not a number")]
    NotANumber { param: String, raw: String },
    #[error("{param}: {value} is below the minimum of {min}")]
    BelowMinimum {
        param: String,
        value: Decimal,
        min: Decimal,
    },
    #[error("{param}: {value} is above the maximum of {max}")]
    AboveMaximum {
        param: String,
        value: Decimal,
        max: Decimal,
    },
}

impl ValidationError {
    pub fn param(&self) -> &str {
        match self {
            ValidationError::Missing { param }
            | ValidationError::NotANumber { param, .. }
            | ValidationError::BelowMinimum { param, .. }
            | ValidationError::AboveMaximum { param, .. } => param,
        }
    }
}

/// The selling-price formula cannot produce a meaningful result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error(
        "referral fee {referral_fee_percentage} plus VAT rate {vat_rate} leaves no margin for a selling price"
    )]
    NonPositiveDenominator {
        referral_fee_percentage: Decimal,
        vat_rate: Decimal,
    },
    #[error("cost before referral fees must be positive, got {0}")]
    NonPositiveCost(Decimal),
    #[error("missing pricing input: {0}")]
    MissingInput(String),
}

/// Input encoded in a way this pipeline cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedFormatError {
    #[error("unsupported compression algorithm `{0}`")]
    Compression(String),
    #[error("unsupported {quantity} unit `{unit}`")]
    Unit { quantity: &'static str, unit: String },
}
