use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::QuantityRange;
use tallyerp_core::quantity::percent_of;

use crate::resolver::ResolvedTolerance;

/// Acceptable quantity window around an ordered/expected quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceWindow {
    pub expected: Decimal,
    pub min: Decimal,
    /// `None` when over-delivery is unlimited.
    pub max: Option<Decimal>,
}

impl ToleranceWindow {
    /// `[expected * (1 - under), expected * (1 + over)]`, computed in decimals.
    pub fn around(expected: Decimal, tolerance: &ResolvedTolerance) -> Self {
        let min = (expected - percent_of(expected, tolerance.under_pct)).max(Decimal::ZERO);
        let max = (!tolerance.unlimited_over).then(|| expected + percent_of(expected, tolerance.over_pct));
        Self { expected, min, max }
    }

    /// Inclusive at both ends.
    pub fn contains(&self, qty: Decimal) -> bool {
        self.range().contains(qty)
    }

    pub fn range(&self) -> QuantityRange {
        QuantityRange::new(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn tolerance(under: Decimal, over: Decimal, unlimited: bool) -> ResolvedTolerance {
        ResolvedTolerance {
            under_pct: under,
            over_pct: over,
            unlimited_over: unlimited,
            ..ResolvedTolerance::exact()
        }
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        let w = ToleranceWindow::around(dec!(100), &tolerance(dec!(5), dec!(10), false));
        assert_eq!(w.min, dec!(95));
        assert_eq!(w.max, Some(dec!(110)));
        assert!(w.contains(dec!(95)));
        assert!(w.contains(dec!(110)));
        assert!(!w.contains(dec!(94.999)));
        assert!(!w.contains(dec!(110.001)));
    }

    #[test]
    fn unlimited_over_has_no_upper_bound() {
        let w = ToleranceWindow::around(dec!(100), &tolerance(dec!(5), dec!(10), true));
        assert_eq!(w.max, None);
        assert!(w.contains(dec!(1000000)));
        assert!(!w.contains(dec!(94)));
    }

    #[test]
    fn exact_tolerance_admits_only_the_expected_quantity() {
        let w = ToleranceWindow::around(dec!(12.5), &ResolvedTolerance::exact());
        assert!(w.contains(dec!(12.5)));
        assert!(!w.contains(dec!(12.49)));
        assert!(!w.contains(dec!(12.51)));
    }

    proptest! {
        #[test]
        fn expected_quantity_is_always_inside_its_window(
            expected in 0i64..1_000_000,
            under in 0i64..=100,
            over in 0i64..=100,
        ) {
            let expected = Decimal::new(expected, 3);
            let w = ToleranceWindow::around(expected, &tolerance(Decimal::from(under), Decimal::from(over), false));
            prop_assert!(w.contains(expected));
            prop_assert!(w.min <= expected);
            prop_assert!(w.max.is_some_and(|m| m >= expected));
        }
    }
}
