//! Declarative transition tables.
//!
//! Each document type owns a static list of `(from, action, to)` edges. A
//! status with no outgoing edge is terminal. Every table is acyclic.

use tallyerp_ledger::DocumentLine;

use crate::types::{Action, DocumentStatus, DocumentType};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: DocumentStatus,
    pub action: Action,
    pub to: DocumentStatus,
}

const fn edge(from: DocumentStatus, action: Action, to: DocumentStatus) -> Edge {
    Edge { from, action, to }
}

use Action as A;
use DocumentStatus as S;

const PURCHASE_ORDER: &[Edge] = &[
    edge(S::Draft, A::Confirm, S::Confirmed),
    edge(S::Confirmed, A::Complete, S::Completed),
    edge(S::Draft, A::Cancel, S::Cancelled),
    edge(S::Confirmed, A::Cancel, S::Cancelled),
];

const GOODS_RECEIPT: &[Edge] = &[
    edge(S::Pending, A::Receive, S::Received),
    edge(S::Received, A::Inspect, S::Inspected),
    edge(S::Inspected, A::Accept, S::Accepted),
    edge(S::Inspected, A::Accept, S::Partial),
    edge(S::Inspected, A::Reject, S::Rejected),
];

const PURCHASE_INVOICE: &[Edge] = &[
    edge(S::Draft, A::Post, S::Posted),
    edge(S::Draft, A::Cancel, S::Cancelled),
];

const SALES_ORDER: &[Edge] = &[
    edge(S::Draft, A::Submit, S::Pending),
    edge(S::Pending, A::Approve, S::Approved),
    edge(S::Approved, A::Process, S::Processing),
    edge(S::Processing, A::Ship, S::Shipped),
    edge(S::Shipped, A::Deliver, S::Delivered),
    edge(S::Delivered, A::Complete, S::Completed),
    edge(S::Draft, A::Cancel, S::Cancelled),
    edge(S::Pending, A::Cancel, S::Cancelled),
    edge(S::Approved, A::Cancel, S::Cancelled),
    edge(S::Processing, A::Cancel, S::Cancelled),
    edge(S::Shipped, A::Cancel, S::Cancelled),
    edge(S::Delivered, A::Cancel, S::Cancelled),
];

const DELIVERY: &[Edge] = &[
    edge(S::Draft, A::Ship, S::Shipped),
    edge(S::Shipped, A::Deliver, S::Delivered),
    edge(S::Draft, A::Cancel, S::Cancelled),
];

const STOCK_TRANSFER: &[Edge] = &[
    edge(S::Draft, A::Ship, S::Shipped),
    edge(S::Shipped, A::Receive, S::Received),
    edge(S::Draft, A::Cancel, S::Cancelled),
    edge(S::Shipped, A::Cancel, S::Cancelled),
];

const INVENTORY_ADJUSTMENT: &[Edge] = &[
    edge(S::Draft, A::Approve, S::Approved),
    edge(S::Draft, A::Cancel, S::Cancelled),
];

const STOCK_OPNAME: &[Edge] = &[
    edge(S::Draft, A::Start, S::InProgress),
    edge(S::InProgress, A::Complete, S::Completed),
    edge(S::Draft, A::Cancel, S::Cancelled),
    edge(S::InProgress, A::Cancel, S::Cancelled),
];

pub fn edges(doc_type: DocumentType) -> &'static [Edge] {
    match doc_type {
        DocumentType::PurchaseOrder => PURCHASE_ORDER,
        DocumentType::GoodsReceipt => GOODS_RECEIPT,
        DocumentType::PurchaseInvoice => PURCHASE_INVOICE,
        DocumentType::SalesOrder => SALES_ORDER,
        DocumentType::Delivery => DELIVERY,
        DocumentType::StockTransfer => STOCK_TRANSFER,
        DocumentType::InventoryAdjustment => INVENTORY_ADJUSTMENT,
        DocumentType::StockOpname => STOCK_OPNAME,
    }
}

pub fn initial_status(doc_type: DocumentType) -> DocumentStatus {
    match doc_type {
        DocumentType::GoodsReceipt => DocumentStatus::Pending,
        _ => DocumentStatus::Draft,
    }
}

pub fn is_terminal(doc_type: DocumentType, status: DocumentStatus) -> bool {
    !edges(doc_type).iter().any(|e| e.from == status)
}

pub fn has_edge(doc_type: DocumentType, status: DocumentStatus, action: Action) -> bool {
    edges(doc_type).iter().any(|e| e.from == status && e.action == action)
}

/// Actions available from `status`, in table order, without duplicates.
pub fn available_actions(doc_type: DocumentType, status: DocumentStatus) -> Vec<Action> {
    let mut actions = Vec::new();
    for e in edges(doc_type).iter().filter(|e| e.from == status) {
        if !actions.contains(&e.action) {
            actions.push(e.action);
        }
    }
    actions
}

/// Target of `action` from `status`, choosing between several edges by
/// looking at the projected lines. `None` when no edge exists.
pub fn target(
    doc_type: DocumentType,
    status: DocumentStatus,
    action: Action,
    projected: &[DocumentLine],
) -> Option<DocumentStatus> {
    let candidates: Vec<DocumentStatus> = edges(doc_type)
        .iter()
        .filter(|e| e.from == status && e.action == action)
        .map(|e| e.to)
        .collect();

    match candidates.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => Some(select(doc_type, action, projected, many)),
    }
}

fn select(
    doc_type: DocumentType,
    action: Action,
    projected: &[DocumentLine],
    candidates: &[DocumentStatus],
) -> DocumentStatus {
    match (doc_type, action) {
        (DocumentType::GoodsReceipt, Action::Accept) => {
            if projected.iter().any(|l| l.rejected_qty > rust_decimal::Decimal::ZERO) {
                DocumentStatus::Partial
            } else {
                DocumentStatus::Accepted
            }
        }
        _ => candidates[0],
    }
}
