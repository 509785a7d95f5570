//! Package-size tier selection on a country's FBA fee grid.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{PackageDimensions, PriceGridFbaFee};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeScheduleMiss {
    #[error("no fee grid rows for country {0}")]
    NoRows(String),
    #[error("{axis} {value} exceeds the largest fee grid category")]
    Oversize { axis: &'static str, value: Decimal },
    #[error("weight {0} kg exceeds every category that fits the package dimensions")]
    Overweight(Decimal),
}

/// Finds the fee-grid row a package falls into.
///
/// Rows are considered in ascending category order. Each of length, width and height
/// independently picks the first category whose maximum is at least the measurement
/// (inclusive); the package lands in the largest of the three. From there the first
/// category whose weight maximum admits the package weight wins.
pub fn lookup_fee_schedule<'a>(
    rows: &'a [PriceGridFbaFee],
    country_code: &str,
    package: &PackageDimensions,
) -> Result<&'a PriceGridFbaFee, FeeScheduleMiss> {
    let mut ordered: Vec<&PriceGridFbaFee> = rows
        .iter()
        .filter(|r| r.country_code == country_code)
        .collect();
    if ordered.is_empty() {
        return Err(FeeScheduleMiss::NoRows(country_code.to_string()));
    }
    ordered.sort_by_key(|r| (r.sort_order, r.id));

    let axes: [(&'static str, Decimal, fn(&PriceGridFbaFee) -> Decimal); 3] = [
        ("length", package.length_cm, |r| r.max_length_cm),
        ("width", package.width_cm, |r| r.max_width_cm),
        ("height", package.height_cm, |r| r.max_height_cm),
    ];

    let mut start = 0;
    for (axis, value, max_of) in axes {
        let position = ordered
            .iter()
            .position(|r| max_of(r) >= value)
            .ok_or(FeeScheduleMiss::Oversize { axis, value })?;
        start = start.max(position);
    }

    ordered[start..]
        .iter()
        .find(|r| r.max_weight_kg >= package.weight_kg)
        .copied()
        .ok_or(FeeScheduleMiss::Overweight(package.weight_kg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, order: i32, dims: (i64, i64, i64), weight_g: i64) -> PriceGridFbaFee {
        PriceGridFbaFee {
            id,
            country_code: "DE".into(),
            category: format!("tier-{order}"),
            sort_order: order,
            max_length_cm: Decimal::from(dims.0),
            max_width_cm: Decimal::from(dims.1),
            max_height_cm: Decimal::from(dims.2),
            max_weight_kg: Decimal::new(weight_g, 3),
            fee_local: Decimal::new(250 + i64::from(order) * 50, 2),
            fee_efn: None,
            low_price_fee_local: None,
            low_price_fee_efn: None,
            low_price_threshold: None,
        }
    }

    fn grid() -> Vec<PriceGridFbaFee> {
        // Deliberately unsorted to exercise the ordering.
        vec![
            row(30, 3, (45, 34, 26), 12_000),
            row(10, 1, (20, 15, 1), 100),
            row(20, 2, (33, 23, 5), 1_000),
        ]
    }

    fn package(l: i64, w: i64, h: i64, weight_g: i64) -> PackageDimensions {
        PackageDimensions {
            length_cm: Decimal::from(l),
            width_cm: Decimal::from(w),
            height_cm: Decimal::from(h),
            weight_kg: Decimal::new(weight_g, 3),
        }
    }

    #[test]
    fn exact_category_maximum_is_inclusive() {
        let rows = grid();
        let hit = lookup_fee_schedule(&rows, "DE", &package(20, 15, 1, 100)).unwrap();
        assert_eq!(hit.id, 10);
    }

    #[test]
    fn most_restrictive_dimension_wins() {
        let rows = grid();
        // Length and width fit tier 1, height needs tier 2.
        let hit = lookup_fee_schedule(&rows, "DE", &package(10, 10, 4, 50)).unwrap();
        assert_eq!(hit.id, 20);
    }

    #[test]
    fn weight_scans_forward_from_dimension_category() {
        let rows = grid();
        let hit = lookup_fee_schedule(&rows, "DE", &package(18, 12, 1, 2_500)).unwrap();
        assert_eq!(hit.id, 30);
    }

    #[test]
    fn one_unit_over_largest_category_is_not_found() {
        let rows = grid();
        let miss = lookup_fee_schedule(&rows, "DE", &package(46, 10, 10, 100)).unwrap_err();
        assert_eq!(
            miss,
            FeeScheduleMiss::Oversize {
                axis: "length",
                value: Decimal::from(46)
            }
        );

        let miss = lookup_fee_schedule(&rows, "DE", &package(10, 10, 1, 12_001)).unwrap_err();
        assert!(matches!(miss, FeeScheduleMiss::Overweight(_)));
    }

    #[test]
    fn other_countries_rows_are_ignored() {
        let rows = grid();
        let miss = lookup_fee_schedule(&rows, "FR", &package(1, 1, 1, 1)).unwrap_err();
        assert_eq!(miss, FeeScheduleMiss::NoRows("FR".into()));
    }
}
