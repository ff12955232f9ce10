use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{AggregateId, ProductId};

/// One line of a document and its running quantity totals.
///
/// `ordered_qty` is fixed at creation. The meaning of "ordered" depends on the
/// owning document: the expected quantity on a goods receipt line, the signed
/// stock change on an adjustment line, the book quantity on a stock count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLine {
    pub line_id: AggregateId,
    pub parent_doc_id: AggregateId,
    pub reference_line_id: Option<AggregateId>,
    pub product_id: ProductId,
    pub ordered_qty: Decimal,
    pub received_qty: Decimal,
    pub accepted_qty: Decimal,
    pub rejected_qty: Decimal,
    pub invoiced_qty: Decimal,
    pub shipped_qty: Decimal,
    pub delivered_qty: Decimal,
    /// Absent until a count is recorded; a count of zero is `Some(0)`.
    pub counted_qty: Option<Decimal>,
}

impl DocumentLine {
    pub fn new(
        line_id: AggregateId,
        parent_doc_id: AggregateId,
        reference_line_id: Option<AggregateId>,
        product_id: ProductId,
        ordered_qty: Decimal,
    ) -> Self {
        Self {
            line_id,
            parent_doc_id,
            reference_line_id,
            product_id,
            ordered_qty,
            received_qty: Decimal::ZERO,
            accepted_qty: Decimal::ZERO,
            rejected_qty: Decimal::ZERO,
            invoiced_qty: Decimal::ZERO,
            shipped_qty: Decimal::ZERO,
            delivered_qty: Decimal::ZERO,
            counted_qty: None,
        }
    }

    /// Current value of a mutable quantity field (an unrecorded count reads as zero).
    pub fn quantity(&self, field: QuantityField) -> Decimal {
        match field {
            QuantityField::Received => self.received_qty,
            QuantityField::Accepted => self.accepted_qty,
            QuantityField::Rejected => self.rejected_qty,
            QuantityField::Invoiced => self.invoiced_qty,
            QuantityField::Shipped => self.shipped_qty,
            QuantityField::Delivered => self.delivered_qty,
            QuantityField::Counted => self.counted_qty.unwrap_or(Decimal::ZERO),
        }
    }

    /// Ordered quantity not yet received.
    pub fn outstanding_receipt(&self) -> Decimal {
        (self.ordered_qty - self.received_qty).max(Decimal::ZERO)
    }

    /// Received quantity not yet split into accepted/rejected.
    pub fn uninspected(&self) -> Decimal {
        self.received_qty - self.accepted_qty - self.rejected_qty
    }

    /// Add `delta` to `field` without checking invariants.
    ///
    /// Only for replaying deltas that were validated when they were decided;
    /// new deltas go through [`crate::apply_delta`].
    pub fn add(&mut self, field: QuantityField, delta: Decimal) {
        match field {
            QuantityField::Received => self.received_qty += delta,
            QuantityField::Accepted => self.accepted_qty += delta,
            QuantityField::Rejected => self.rejected_qty += delta,
            QuantityField::Invoiced => self.invoiced_qty += delta,
            QuantityField::Shipped => self.shipped_qty += delta,
            QuantityField::Delivered => self.delivered_qty += delta,
            QuantityField::Counted => {
                self.counted_qty = Some(self.counted_qty.unwrap_or(Decimal::ZERO) + delta)
            }
        }
    }
}

/// A mutable quantity column of a `DocumentLine`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuantityField {
    Received,
    Accepted,
    Rejected,
    Invoiced,
    Shipped,
    Delivered,
    Counted,
}

impl QuantityField {
    /// Wire name of the column, as it appears in line responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantityField::Received => "receivedQty",
            QuantityField::Accepted => "acceptedQty",
            QuantityField::Rejected => "rejectedQty",
            QuantityField::Invoiced => "invoicedQty",
            QuantityField::Shipped => "shippedQty",
            QuantityField::Delivered => "deliveredQty",
            QuantityField::Counted => "countedQty",
        }
    }
}

impl core::fmt::Display for QuantityField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed change to one field of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDelta {
    pub line_id: AggregateId,
    pub field: QuantityField,
    pub delta: Decimal,
}

impl LineDelta {
    pub fn new(line_id: AggregateId, field: QuantityField, delta: Decimal) -> Self {
        Self {
            line_id,
            field,
            delta,
        }
    }
}

/// Tolerance-derived bounds for a line.
///
/// `ceiling` caps received, shipped and delivered totals (absent = unbounded).
/// `floor` is the least quantity a completion guard accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineLimits {
    pub ceiling: Option<Decimal>,
    pub floor: Option<Decimal>,
}

impl LineLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_ceiling(ceiling: Decimal) -> Self {
        Self {
            ceiling: Some(ceiling),
            floor: None,
        }
    }
}
