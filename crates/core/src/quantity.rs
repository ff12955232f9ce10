//! Decimal quantity helpers.
//!
//! Quantities and percentages are `rust_decimal::Decimal` throughout; binary
//! floating point never enters ledger or tolerance math.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A document quantity (fixed-point decimal).
pub type Quantity = Decimal;

/// Inclusive acceptable range; `max = None` means unbounded above.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityRange {
    pub min: Decimal,
    pub max: Option<Decimal>,
}

impl QuantityRange {
    pub fn new(min: Decimal, max: Option<Decimal>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, qty: Decimal) -> bool {
        qty >= self.min && self.max.is_none_or(|max| qty <= max)
    }
}

impl core::fmt::Display for QuantityRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min.normalize(), max.normalize()),
            None => write!(f, "[{}, unlimited)", self.min.normalize()),
        }
    }
}

/// Parse a decimal string quantity (e.g. `"12.500"`).
pub fn parse_quantity(field: &str, raw: &str) -> DomainResult<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| DomainError::validation(format!("{field} must be a decimal string: {e}")))
}

/// Parse a percentage string and require it to lie in `[0, 100]`.
pub fn parse_percentage(field: &str, raw: &str) -> DomainResult<Decimal> {
    let pct = parse_quantity(field, raw)?;
    ensure_percentage(field, pct)?;
    Ok(pct)
}

pub fn ensure_percentage(field: &str, pct: Decimal) -> DomainResult<()> {
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(format!(
            "{field} must be between 0 and 100 (got {pct})"
        )));
    }
    Ok(())
}

/// `pct` percent of `base`.
pub fn percent_of(base: Decimal, pct: Decimal) -> Decimal {
    base * pct / Decimal::ONE_HUNDRED
}
