use rust_decimal::Decimal;

use tallyerp_core::{ConflictDetail, ConflictKind, DomainError, DomainResult, QuantityRange};
use tallyerp_ledger::{LineLimits, QuantityField};
use tallyerp_tolerance::{ResolvedTolerance, ToleranceWindow};

/// Ledger bounds for a line ordered at `ordered` under `tolerance`.
pub fn line_limits(ordered: Decimal, tolerance: &ResolvedTolerance) -> LineLimits {
    let window = ToleranceWindow::around(ordered, tolerance);
    LineLimits {
        ceiling: window.max,
        floor: Some(window.min),
    }
}

/// A goods receipt line must receive within the tolerance window around its
/// expected quantity.
pub fn check_receipt(expected: Decimal, received: Decimal, tolerance: &ResolvedTolerance) -> DomainResult<()> {
    let window = ToleranceWindow::around(expected, tolerance);
    if window.contains(received) {
        return Ok(());
    }
    Err(breach(QuantityField::Received, received, window.range(), expected))
}

/// Shipping `requested` more against a sales order line must not push its
/// shipped total past the over-delivery bound.
///
/// The under-delivery bound is checked when the order itself ships, since a
/// line may be covered by several deliveries.
pub fn check_over_delivery(
    ordered: Decimal,
    already_shipped: Decimal,
    requested: Decimal,
    tolerance: &ResolvedTolerance,
) -> DomainResult<()> {
    let window = ToleranceWindow::around(ordered, tolerance);
    let attempted = already_shipped + requested;
    match window.max {
        Some(max) if attempted > max => Err(breach(QuantityField::Shipped, attempted, window.range(), ordered)),
        _ => Ok(()),
    }
}

fn breach(field: QuantityField, attempted: Decimal, range: QuantityRange, expected: Decimal) -> DomainError {
    let mut detail = ConflictDetail::new(
        ConflictKind::ToleranceBreach,
        format!(
            "{field} {} is outside the acceptable range {range} for expected {}",
            attempted.normalize(),
            expected.normalize()
        ),
    )
    .with_field(field.as_str())
    .with_attempted(attempted)
    .with_range(range);
    if let Some(max) = range.max.filter(|max| attempted > *max) {
        detail = detail.with_limit(max);
    } else if attempted < range.min {
        detail = detail.with_limit(range.min);
    }
    DomainError::conflict(detail)
}
