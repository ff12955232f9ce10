use rust_decimal::Decimal;

use tallyerp_core::{ConflictDetail, ConflictKind, DomainError, DomainResult};
use tallyerp_ledger::DocumentLine;

use crate::policy::InvoiceControlPolicy;

/// Three-way match for invoicing `requested` against a goods receipt line and
/// the purchase order line it references.
///
/// 1. `grn.invoiced + requested <= grn.accepted`, with no tolerance.
/// 2. The policy baseline on the order line: `po.invoiced + requested` must
///    not exceed `po.ordered` (ORDERED) or `po.received` (RECEIVED).
pub fn three_way_match(
    grn_line: &DocumentLine,
    po_line: &DocumentLine,
    requested: Decimal,
    policy: InvoiceControlPolicy,
) -> DomainResult<()> {
    if requested <= Decimal::ZERO {
        return Err(DomainError::validation("invoice quantity must be positive"));
    }

    let attempted = grn_line.invoiced_qty + requested;
    if attempted > grn_line.accepted_qty {
        return Err(ceiling(
            format!(
                "invoicing {} on receipt line {} exceeds its accepted quantity",
                requested.normalize(),
                grn_line.line_id
            ),
            attempted,
            grn_line.accepted_qty,
        ));
    }

    let baseline = match policy {
        InvoiceControlPolicy::Ordered => po_line.ordered_qty,
        InvoiceControlPolicy::Received => po_line.received_qty,
    };
    let attempted = po_line.invoiced_qty + requested;
    if attempted > baseline {
        return Err(ceiling(
            format!(
                "invoicing {} on order line {} exceeds its {} quantity",
                requested.normalize(),
                po_line.line_id,
                policy.as_str().to_ascii_lowercase()
            ),
            attempted,
            baseline,
        ));
    }

    Ok(())
}

fn ceiling(message: String, attempted: Decimal, limit: Decimal) -> DomainError {
    DomainError::conflict(
        ConflictDetail::new(ConflictKind::InvoiceCeiling, message)
            .with_field("invoicedQty")
            .with_attempted(attempted)
            .with_limit(limit),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tallyerp_core::{AggregateId, ProductId};

    fn line(ordered: Decimal, received: Decimal, accepted: Decimal, invoiced: Decimal) -> DocumentLine {
        let mut l = DocumentLine::new(AggregateId::new(), AggregateId::new(), None, ProductId::new(), ordered);
        l.received_qty = received;
        l.accepted_qty = accepted;
        l.invoiced_qty = invoiced;
        l
    }

    #[test]
    fn fully_invoiced_receipt_line_rejects_any_further_invoice() {
        let grn = line(dec!(50), dec!(50), dec!(50), dec!(50));
        let po = line(dec!(100), dec!(50), dec!(50), dec!(50));

        for policy in [InvoiceControlPolicy::Ordered, InvoiceControlPolicy::Received] {
            let err = three_way_match(&grn, &po, dec!(0.001), policy).unwrap_err();
            assert!(matches!(err, DomainError::Conflict(d) if d.kind == ConflictKind::InvoiceCeiling && d.limit == Some(dec!(50))));
        }
    }

    #[test]
    fn accepted_quantity_stays_authoritative_under_ordered_policy() {
        // Partial receipt: ordered 100, received 60, accepted 40.
        let grn = line(dec!(60), dec!(60), dec!(40), dec!(0));
        let po = line(dec!(100), dec!(60), dec!(40), dec!(0));

        assert!(three_way_match(&grn, &po, dec!(40), InvoiceControlPolicy::Ordered).is_ok());
        assert!(three_way_match(&grn, &po, dec!(41), InvoiceControlPolicy::Ordered).is_err());
    }

    #[test]
    fn received_policy_bounds_the_order_line_by_received_quantity() {
        // Two receipts on one order line; the first was already invoiced in full.
        let grn = line(dec!(30), dec!(30), dec!(30), dec!(0));
        let po = line(dec!(100), dec!(50), dec!(50), dec!(30));

        assert!(three_way_match(&grn, &po, dec!(20), InvoiceControlPolicy::Received).is_ok());
        let err = three_way_match(&grn, &po, dec!(21), InvoiceControlPolicy::Received).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(d) if d.limit == Some(dec!(50))));
        assert!(three_way_match(&grn, &po, dec!(21), InvoiceControlPolicy::Ordered).is_ok());
    }

    #[test]
    fn non_positive_request_is_validation() {
        let grn = line(dec!(1), dec!(1), dec!(1), dec!(0));
        assert!(matches!(
            three_way_match(&grn, &grn, dec!(0), InvoiceControlPolicy::Received),
            Err(DomainError::Validation(_))
        ));
    }
}
