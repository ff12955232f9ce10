use serde::{Deserialize, Serialize};

use tallyerp_core::DomainError;

/// Company-level baseline for invoice matching.
///
/// The baseline bounds how much of a purchase order line may be invoiced in
/// total. The per-receipt accepted quantity is always the hard ceiling.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceControlPolicy {
    /// Invoice up to the ordered quantity.
    Ordered,
    /// Invoice up to the received quantity.
    #[default]
    Received,
}

impl InvoiceControlPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceControlPolicy::Ordered => "ORDERED",
            InvoiceControlPolicy::Received => "RECEIVED",
        }
    }
}

impl core::str::FromStr for InvoiceControlPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORDERED" => Ok(InvoiceControlPolicy::Ordered),
            "RECEIVED" => Ok(InvoiceControlPolicy::Received),
            other => Err(DomainError::validation(format!(
                "invoice control policy must be ORDERED or RECEIVED (got {other:?})"
            ))),
        }
    }
}
