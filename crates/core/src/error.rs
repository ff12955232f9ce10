//! Domain error model.
//!
//! Every document action fails with one of five kinds: malformed input
//! (`Validation`, `InvalidId`), an illegal transition (`State`), a quantity or
//! uniqueness conflict (`Conflict`), a missing resource (`NotFound`) or an
//! unexpected persistence failure (`Internal`).

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::quantity::QuantityRange;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// failures surface as `Internal` only once they cross into domain code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The action has no edge from the current status, or a guard refused it.
    #[error("illegal transition: {0}")]
    State(StateViolation),

    /// A ledger invariant, tolerance window, uniqueness rule or write lock
    /// was breached.
    #[error("conflict: {0}")]
    Conflict(ConflictDetail),

    /// A requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unexpected failure below the domain (persistence, serialization).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn state(violation: StateViolation) -> Self {
        Self::State(violation)
    }

    pub fn conflict(detail: ConflictDetail) -> Self {
        Self::Conflict(detail)
    }

    /// Write contention on a stream; the only conflict that may be retried.
    pub fn contention(msg: impl Into<String>) -> Self {
        Self::Conflict(ConflictDetail::new(ConflictKind::Contention, msg))
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Conflict(ConflictDetail::new(ConflictKind::Duplicate, msg))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Conflict(detail) if detail.is_retryable())
    }
}

/// An action attempted against a status that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateViolation {
    pub document_type: String,
    pub status: String,
    pub action: String,
    pub message: String,
}

impl StateViolation {
    pub fn new(
        document_type: impl Into<String>,
        status: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            document_type: document_type.into(),
            status: status.into(),
            action: action.into(),
            message: message.into(),
        }
    }
}

impl core::fmt::Display for StateViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} cannot {} while {}: {}",
            self.document_type, self.action, self.status, self.message
        )
    }
}

/// What kind of conflict occurred.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// A `DocumentLine` invariant would not hold after the delta.
    LedgerInvariant,
    /// A received/shipped quantity falls outside the tolerance window.
    ToleranceBreach,
    /// Invoicing beyond the accepted (or policy-baseline) quantity.
    InvoiceCeiling,
    /// Warehouse on-hand would go negative.
    StockShortfall,
    /// A uniqueness rule (or create-once rule) was violated.
    Duplicate,
    /// A concurrent writer committed first; safe to retry.
    Contention,
}

impl ConflictKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ConflictKind::LedgerInvariant => "ledger_conflict",
            ConflictKind::ToleranceBreach => "tolerance_breach",
            ConflictKind::InvoiceCeiling => "invoice_ceiling",
            ConflictKind::StockShortfall => "stock_shortfall",
            ConflictKind::Duplicate => "duplicate",
            ConflictKind::Contention => "lock_contention",
        }
    }
}

/// Payload of a conflict: the offending field and the bound it crossed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetail {
    pub kind: ConflictKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<QuantityRange>,
}

impl ConflictDetail {
    pub fn new(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            attempted: None,
            limit: None,
            range: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_attempted(mut self, attempted: Decimal) -> Self {
        self.attempted = Some(attempted);
        self
    }

    pub fn with_limit(mut self, limit: Decimal) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_range(mut self, range: QuantityRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ConflictKind::Contention
    }
}

impl core::fmt::Display for ConflictDetail {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (field: {field}")?;
            if let Some(attempted) = self.attempted {
                write!(f, ", attempted: {attempted}")?;
            }
            if let Some(limit) = self.limit {
                write!(f, ", limit: {limit}")?;
            }
            if let Some(range) = &self.range {
                write!(f, ", range: {range}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn only_contention_is_retryable() {
        assert!(DomainError::contention("stale").is_retryable());
        assert!(!DomainError::duplicate("twice").is_retryable());
        assert!(!DomainError::validation("bad").is_retryable());

        let breach = ConflictDetail::new(ConflictKind::ToleranceBreach, "over");
        assert!(!DomainError::conflict(breach).is_retryable());
    }

    #[test]
    fn conflict_display_includes_bounds() {
        let detail = ConflictDetail::new(ConflictKind::LedgerInvariant, "received over ceiling")
            .with_field("receivedQty")
            .with_attempted(dec!(120))
            .with_limit(dec!(110));
        assert_eq!(
            detail.to_string(),
            "received over ceiling (field: receivedQty, attempted: 120, limit: 110)"
        );
    }
}
