//! Per-type guards, evaluated on the projected document after the edge
//! lookup and the ledger step.

use rust_decimal::Decimal;

use tallyerp_ledger::DocumentLine;

use crate::document::TransitionPayload;
use crate::types::{Action, DocumentType};

/// `Err(message)` when the projected document may not take this edge.
pub fn check(
    doc_type: DocumentType,
    action: Action,
    lines: &[DocumentLine],
    payload: &TransitionPayload,
) -> Result<(), String> {
    use Action::*;
    use DocumentType::*;

    match (doc_type, action) {
        (PurchaseOrder, Confirm) => require(!lines.is_empty(), "purchase order has no lines"),
        (PurchaseOrder, Complete) if !payload.force => every(
            lines,
            |l| l.received_qty >= l.ordered_qty,
            "every line must be fully received (use force to complete short)",
        ),
        (PurchaseOrder, Cancel) => every(
            lines,
            |l| l.received_qty.is_zero(),
            "goods have already been received against this order",
        ),

        (GoodsReceipt, Receive) => require(
            total(lines, |l| l.received_qty) > Decimal::ZERO,
            "nothing was received",
        ),
        (GoodsReceipt, Accept) => {
            require(
                total(lines, |l| l.received_qty) > Decimal::ZERO,
                "nothing was received",
            )?;
            every(
                lines,
                |l| l.uninspected().is_zero(),
                "accepted plus rejected must equal received on every line",
            )
        }
        (GoodsReceipt, Reject) => {
            require(
                payload.reason.as_deref().is_some_and(|r| !r.trim().is_empty()),
                "a rejection reason is required",
            )?;
            every(
                lines,
                |l| l.accepted_qty.is_zero() && l.uninspected().is_zero(),
                "a receipt with accepted quantity must be accepted as partial",
            )
        }

        (PurchaseInvoice, Post) => {
            require(
                total(lines, |l| l.invoiced_qty) > Decimal::ZERO,
                "nothing is invoiced",
            )?;
            every(
                lines,
                |l| l.invoiced_qty == l.ordered_qty,
                "every invoice line must be matched in full",
            )
        }

        (SalesOrder, Ship) => every(
            lines,
            |l| {
                let floor = payload
                    .line_limits
                    .get(&l.line_id)
                    .and_then(|limits| limits.floor)
                    .unwrap_or(l.ordered_qty);
                l.shipped_qty >= floor
            },
            "every line must be shipped within the under-delivery tolerance",
        ),
        (SalesOrder, Deliver) => every(
            lines,
            |l| l.delivered_qty >= l.shipped_qty,
            "every shipped quantity must be delivered",
        ),

        (Delivery, Ship) => require(
            total(lines, |l| l.shipped_qty) > Decimal::ZERO,
            "nothing was shipped",
        ),
        (Delivery, Deliver) => every(
            lines,
            |l| l.delivered_qty == l.shipped_qty,
            "every shipped quantity must be delivered",
        ),

        (StockTransfer, Ship) => every(
            lines,
            |l| l.shipped_qty > Decimal::ZERO,
            "every line must ship a positive quantity",
        ),
        (StockTransfer, Receive) => every(
            lines,
            |l| l.received_qty > Decimal::ZERO,
            "every line must receive a positive quantity",
        ),

        (StockOpname, Complete) => every(
            lines,
            |l| l.counted_qty.is_some(),
            "every line must be counted",
        ),

        _ => Ok(()),
    }
}

fn require(ok: bool, message: &str) -> Result<(), String> {
    if ok { Ok(()) } else { Err(message.to_string()) }
}

fn every(lines: &[DocumentLine], pred: impl Fn(&DocumentLine) -> bool, message: &str) -> Result<(), String> {
    match lines.iter().find(|l| !pred(l)) {
        None => Ok(()),
        Some(l) => Err(format!("{message} (line {})", l.line_id)),
    }
}

fn total(lines: &[DocumentLine], qty: impl Fn(&DocumentLine) -> Decimal) -> Decimal {
    lines.iter().map(qty).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tallyerp_core::{AggregateId, ProductId};
    use tallyerp_ledger::LineLimits;

    fn line(ordered: Decimal) -> DocumentLine {
        DocumentLine::new(AggregateId::new(), AggregateId::new(), None, ProductId::new(), ordered)
    }

    #[test]
    fn purchase_order_completes_short_only_when_forced() {
        let mut l = line(dec!(100));
        l.received_qty = dec!(90);
        let lines = vec![l];

        assert!(check(DocumentType::PurchaseOrder, Action::Complete, &lines, &TransitionPayload::default()).is_err());
        let forced = TransitionPayload { force: true, ..Default::default() };
        assert!(check(DocumentType::PurchaseOrder, Action::Complete, &lines, &forced).is_ok());
    }

    #[test]
    fn goods_receipt_accept_needs_full_inspection() {
        let mut l = line(dec!(10));
        l.received_qty = dec!(10);
        l.accepted_qty = dec!(7);
        l.rejected_qty = dec!(2);
        let err = check(DocumentType::GoodsReceipt, Action::Accept, std::slice::from_ref(&l), &TransitionPayload::default())
            .unwrap_err();
        assert!(err.contains("accepted plus rejected"));

        l.rejected_qty = dec!(3);
        assert!(check(DocumentType::GoodsReceipt, Action::Accept, &[l], &TransitionPayload::default()).is_ok());
    }

    #[test]
    fn reject_requires_a_reason() {
        let mut l = line(dec!(10));
        l.received_qty = dec!(10);
        l.rejected_qty = dec!(10);
        let lines = vec![l];

        let blank = TransitionPayload { reason: Some("  ".into()), ..Default::default() };
        assert!(check(DocumentType::GoodsReceipt, Action::Reject, &lines, &blank).is_err());

        let given = TransitionPayload { reason: Some("damaged pallets".into()), ..Default::default() };
        assert!(check(DocumentType::GoodsReceipt, Action::Reject, &lines, &given).is_ok());
    }

    #[test]
    fn sales_order_ship_honours_under_tolerance_floor() {
        let mut l = line(dec!(100));
        l.shipped_qty = dec!(96);
        let id = l.line_id;
        let lines = vec![l];

        assert!(check(DocumentType::SalesOrder, Action::Ship, &lines, &TransitionPayload::default()).is_err());

        let mut payload = TransitionPayload::default();
        payload.line_limits.insert(id, LineLimits { ceiling: Some(dec!(110)), floor: Some(dec!(95)) });
        assert!(check(DocumentType::SalesOrder, Action::Ship, &lines, &payload).is_ok());
    }

    #[test]
    fn opname_completes_only_when_every_line_is_counted() {
        let mut counted = line(dec!(5));
        counted.counted_qty = Some(dec!(0));
        let uncounted = line(dec!(3));

        assert!(check(DocumentType::StockOpname, Action::Complete, &[counted.clone()], &TransitionPayload::default()).is_ok());
        assert!(check(DocumentType::StockOpname, Action::Complete, &[counted, uncounted], &TransitionPayload::default()).is_err());
    }
}
