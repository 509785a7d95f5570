//! Minimum and maximum selling price per fulfillment mode.
//!
//! The calculation runs once with the standard FBA fee and, when the fee grid has a
//! low-price tier, once more with the low-price fee. A low-price result whose minimum
//! stays within the tier's qualifying threshold replaces the standard result.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CalculationError;
use crate::numeric::round_half_away;
use crate::{AmazonReferralFee, PriceBounds, PriceGridFbaFee};

pub const PRICE_DECIMALS: u32 = 2;

pub fn default_markup_multiplier() -> Decimal {
    Decimal::new(15, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducedReferralFee {
    pub percentage: Decimal,
    pub price_limit: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralFeeTerms {
    pub percentage: Decimal,
    pub reduced: Option<ReducedReferralFee>,
}

impl From<&AmazonReferralFee> for ReferralFeeTerms {
    fn from(fee: &AmazonReferralFee) -> Self {
        let reduced = match (fee.reduced_percentage, fee.reduced_price_limit) {
            (Some(percentage), Some(price_limit)) => Some(ReducedReferralFee {
                percentage,
                price_limit,
            }),
            _ => None,
        };
        Self {
            percentage: fee.percentage,
            reduced,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowPriceFbaFee {
    pub fee: Decimal,
    pub price_threshold: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FbaFeeTerms {
    pub fee: Decimal,
    pub low_price: Option<LowPriceFbaFee>,
}

impl FbaFeeTerms {
    /// Fee terms for local / Pan-EU fulfillment.
    pub fn local(grid: &PriceGridFbaFee) -> Self {
        Self {
            fee: grid.fee_local,
            low_price: low_price_tier(grid.low_price_fee_local, grid.low_price_threshold),
        }
    }

    /// Fee terms for EFN fulfillment, absent when the grid has no EFN fee.
    pub fn efn(grid: &PriceGridFbaFee) -> Option<Self> {
        grid.fee_efn.map(|fee| Self {
            fee,
            low_price: low_price_tier(grid.low_price_fee_efn, grid.low_price_threshold),
        })
    }
}

fn low_price_tier(fee: Option<Decimal>, threshold: Option<Decimal>) -> Option<LowPriceFbaFee> {
    match (fee, threshold) {
        (Some(fee), Some(price_threshold)) => Some(LowPriceFbaFee {
            fee,
            price_threshold,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingInputs {
    pub acquisition_cost_excl: Decimal,
    pub minimum_margin_amount: Decimal,
    pub closing_fee: Decimal,
    pub vat_rate: Decimal,
    pub referral: ReferralFeeTerms,
    pub markup_multiplier: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralFeeDecision {
    pub percentage: Decimal,
    pub reduced_applied: bool,
    /// Upper price bound while the reduced percentage is in force.
    pub price_limit: Option<Decimal>,
}

impl ReferralFeeDecision {
    pub fn standard(referral: &ReferralFeeTerms) -> Self {
        Self {
            percentage: referral.percentage,
            reduced_applied: false,
            price_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeTier {
    Standard,
    LowPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellingPriceBounds {
    pub minimum: Decimal,
    pub maximum: Decimal,
    pub tier: FeeTier,
    pub cost_before_referral_fees: Decimal,
    pub referral: ReferralFeeDecision,
}

impl From<SellingPriceBounds> for PriceBounds {
    fn from(bounds: SellingPriceBounds) -> Self {
        Self {
            minimum: bounds.minimum,
            maximum: bounds.maximum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePricing {
    pub local: SellingPriceBounds,
    pub efn: Option<SellingPriceBounds>,
}

pub fn cost_before_referral_fees(inputs: &PricingInputs, fba_fee: Decimal) -> Decimal {
    inputs.acquisition_cost_excl + inputs.minimum_margin_amount + inputs.closing_fee + fba_fee
}

/// Highest cost that still sells under the reduced-fee price limit:
/// `limit × (1/(1+vat) − reduced_percentage)`.
pub fn reduced_fee_threshold(reduced: &ReducedReferralFee, vat_rate: Decimal) -> Decimal {
    reduced.price_limit * (Decimal::ONE / (Decimal::ONE + vat_rate) - reduced.percentage)
}

pub fn select_referral_fee(
    cost_before_referral_fees: Decimal,
    referral: &ReferralFeeTerms,
    vat_rate: Decimal,
) -> ReferralFeeDecision {
    if let Some(reduced) = &referral.reduced {
        if cost_before_referral_fees <= reduced_fee_threshold(reduced, vat_rate) {
            return ReferralFeeDecision {
                percentage: reduced.percentage,
                reduced_applied: true,
                price_limit: Some(reduced.price_limit),
            };
        }
    }
    ReferralFeeDecision::standard(referral)
}

/// `cost / (1 − referral − vat)`, unrounded.
pub fn minimum_selling_price(
    cost_before_referral_fees: Decimal,
    referral_fee_percentage: Decimal,
    vat_rate: Decimal,
) -> Result<Decimal, CalculationError> {
    if cost_before_referral_fees <= Decimal::ZERO {
        return Err(CalculationError::NonPositiveCost(cost_before_referral_fees));
    }
    let denominator = Decimal::ONE - referral_fee_percentage - vat_rate;
    if denominator <= Decimal::ZERO {
        return Err(CalculationError::NonPositiveDenominator {
            referral_fee_percentage,
            vat_rate,
        });
    }
    Ok(cost_before_referral_fees / denominator)
}

struct FeeCalculation {
    cost_before_referral_fees: Decimal,
    referral: ReferralFeeDecision,
    minimum: Decimal,
}

/// The reduced percentage only holds while the price stays within its limit; a
/// minimum above the limit is recomputed with the standard percentage.
fn calculate_with_fee(inputs: &PricingInputs, fba_fee: Decimal) -> Result<FeeCalculation, CalculationError> {
    let cost = cost_before_referral_fees(inputs, fba_fee);
    let mut referral = select_referral_fee(cost, &inputs.referral, inputs.vat_rate);
    let mut minimum = round_half_away(
        minimum_selling_price(cost, referral.percentage, inputs.vat_rate)?,
        PRICE_DECIMALS,
    );
    if let Some(limit) = referral.price_limit.filter(|limit| minimum > *limit) {
        debug!(%minimum, %limit, "reduced referral fee exceeds its price limit");
        referral = ReferralFeeDecision::standard(&inputs.referral);
        minimum = round_half_away(
            minimum_selling_price(cost, referral.percentage, inputs.vat_rate)?,
            PRICE_DECIMALS,
        );
    }
    Ok(FeeCalculation {
        cost_before_referral_fees: cost,
        referral,
        minimum,
    })
}

/// Caps the maximum at the tightest applicable bound, falling back to
/// `minimum × markup_multiplier`. Callers only pass bounds at or above the minimum.
fn finish(
    calc: FeeCalculation,
    tier: FeeTier,
    low_price_threshold: Option<Decimal>,
    markup_multiplier: Decimal,
) -> SellingPriceBounds {
    let bound = [calc.referral.price_limit, low_price_threshold]
        .into_iter()
        .flatten()
        .min();
    let maximum = match bound {
        Some(bound) => bound,
        None => round_half_away(calc.minimum * markup_multiplier, PRICE_DECIMALS),
    };
    SellingPriceBounds {
        minimum: calc.minimum,
        maximum,
        tier,
        cost_before_referral_fees: calc.cost_before_referral_fees,
        referral: calc.referral,
    }
}

/// Selling-price bounds for one fulfillment mode.
pub fn selling_price_bounds(
    inputs: &PricingInputs,
    fba: &FbaFeeTerms,
) -> Result<SellingPriceBounds, CalculationError> {
    if let Some(low_price) = &fba.low_price {
        match calculate_with_fee(inputs, low_price.fee) {
            Ok(calc) if calc.minimum <= low_price.price_threshold => {
                return Ok(finish(
                    calc,
                    FeeTier::LowPrice,
                    Some(low_price.price_threshold),
                    inputs.markup_multiplier,
                ));
            }
            Ok(calc) => debug!(
                minimum = %calc.minimum,
                threshold = %low_price.price_threshold,
                "low-price tier does not qualify"
            ),
            Err(err) => debug!(error = %err, "low-price tier calculation failed"),
        }
    }
    let calc = calculate_with_fee(inputs, fba.fee)?;
    Ok(finish(calc, FeeTier::Standard, None, inputs.markup_multiplier))
}

/// Prices both fulfillment modes; EFN is skipped when its fee terms are unknown.
pub fn price_fulfillment_modes(
    inputs: &PricingInputs,
    local: &FbaFeeTerms,
    efn: Option<&FbaFeeTerms>,
) -> Result<ModePricing, CalculationError> {
    let local = selling_price_bounds(inputs, local)?;
    let efn = efn.map(|terms| selling_price_bounds(inputs, terms)).transpose()?;
    Ok(ModePricing { local, efn })
}
