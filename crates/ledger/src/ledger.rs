use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;

use tallyerp_core::{AggregateId, ConflictDetail, ConflictKind, DomainError};

use crate::line::{DocumentLine, LineDelta, LineLimits, QuantityField};

/// A delta that would leave a line violating one of its invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConflict {
    pub line_id: AggregateId,
    pub field: QuantityField,
    pub attempted: Decimal,
    pub limit: Decimal,
    pub reason: &'static str,
}

impl core::fmt::Display for LedgerConflict {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "line {}: {} {} (attempted {}, limit {})",
            self.line_id,
            self.field,
            self.reason,
            self.attempted.normalize(),
            self.limit.normalize()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Conflict(LedgerConflict),

    #[error("line {0} does not belong to this document")]
    UnknownLine(AggregateId),

    #[error("delta for {field} on line {line_id} must not be zero")]
    ZeroDelta {
        line_id: AggregateId,
        field: QuantityField,
    },
}

impl From<LedgerError> for DomainError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Conflict(c) => DomainError::conflict(
                ConflictDetail::new(ConflictKind::LedgerInvariant, c.to_string())
                    .with_field(c.field.as_str())
                    .with_attempted(c.attempted)
                    .with_limit(c.limit),
            ),
            LedgerError::UnknownLine(id) => DomainError::not_found(format!("document line {id}")),
            e @ LedgerError::ZeroDelta { .. } => DomainError::validation(e.to_string()),
        }
    }
}

/// Apply one delta to a projected copy of `line`.
///
/// The input is never modified; on success the returned line satisfies every
/// invariant checked by [`check_line`].
pub fn apply_delta(
    line: &DocumentLine,
    field: QuantityField,
    delta: Decimal,
    limits: &LineLimits,
) -> Result<DocumentLine, LedgerError> {
    ensure_nonzero(line, field, delta)?;
    let mut projected = line.clone();
    projected.add(field, delta);
    check_line(&projected, field, limits).map_err(LedgerError::Conflict)?;
    Ok(projected)
}

/// Apply a batch of deltas to projected copies of `lines`.
///
/// All deltas are applied first and the invariants are checked on the final
/// projection, so a batch may receive and inspect the same line in one go.
/// Any failure rejects the whole batch.
pub fn apply_deltas(
    lines: &[DocumentLine],
    deltas: &[LineDelta],
    limits: &BTreeMap<AggregateId, LineLimits>,
) -> Result<Vec<DocumentLine>, LedgerError> {
    let mut projected = lines.to_vec();

    for d in deltas {
        let line = projected
            .iter_mut()
            .find(|l| l.line_id == d.line_id)
            .ok_or(LedgerError::UnknownLine(d.line_id))?;
        ensure_nonzero(line, d.field, d.delta)?;
        line.add(d.field, d.delta);
    }

    let unbounded = LineLimits::unbounded();
    for d in deltas {
        if let Some(line) = projected.iter().find(|l| l.line_id == d.line_id) {
            let line_limits = limits.get(&d.line_id).unwrap_or(&unbounded);
            check_line(line, d.field, line_limits).map_err(LedgerError::Conflict)?;
        }
    }

    Ok(projected)
}

fn ensure_nonzero(line: &DocumentLine, field: QuantityField, delta: Decimal) -> Result<(), LedgerError> {
    // Recording a count of zero is a real observation.
    let first_count = field == QuantityField::Counted && line.counted_qty.is_none();
    if delta.is_zero() && !first_count {
        return Err(LedgerError::ZeroDelta {
            line_id: line.line_id,
            field,
        });
    }
    Ok(())
}

/// Check the line invariants, reporting a violation from the point of view of
/// `changed` (the field most recently moved).
pub fn check_line(
    line: &DocumentLine,
    changed: QuantityField,
    limits: &LineLimits,
) -> Result<(), LedgerConflict> {
    use QuantityField::*;

    let conflict = |field: QuantityField, attempted: Decimal, limit: Decimal, reason| LedgerConflict {
        line_id: line.line_id,
        field,
        attempted,
        limit,
        reason,
    };

    for field in [Received, Accepted, Rejected, Invoiced, Shipped, Delivered, Counted] {
        let qty = line.quantity(field);
        if qty < Decimal::ZERO {
            return Err(conflict(field, qty, Decimal::ZERO, "must not be negative"));
        }
    }

    let inspected = line.accepted_qty + line.rejected_qty;
    if inspected > line.received_qty {
        let reason = "accepted plus rejected exceeds received";
        return Err(match changed {
            Received => conflict(Received, line.received_qty, inspected, reason),
            Rejected => conflict(
                Rejected,
                line.rejected_qty,
                line.received_qty - line.accepted_qty,
                reason,
            ),
            _ => conflict(
                Accepted,
                line.accepted_qty,
                line.received_qty - line.rejected_qty,
                reason,
            ),
        });
    }

    if line.invoiced_qty > line.accepted_qty {
        let reason = "invoiced exceeds accepted";
        return Err(match changed {
            Accepted => conflict(Accepted, line.accepted_qty, line.invoiced_qty, reason),
            _ => conflict(Invoiced, line.invoiced_qty, line.accepted_qty, reason),
        });
    }

    if line.delivered_qty > line.shipped_qty {
        let reason = "delivered exceeds shipped";
        return Err(match changed {
            Shipped => conflict(Shipped, line.shipped_qty, line.delivered_qty, reason),
            _ => conflict(Delivered, line.delivered_qty, line.shipped_qty, reason),
        });
    }

    if let Some(ceiling) = limits.ceiling {
        for field in [Received, Shipped, Delivered] {
            let qty = line.quantity(field);
            if qty > ceiling {
                return Err(conflict(field, qty, ceiling, "exceeds tolerance ceiling"));
            }
        }
    }

    Ok(())
}
