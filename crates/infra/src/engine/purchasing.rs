//! Procure-to-pay: goods receipts against purchase orders and invoices
//! matched against goods receipts.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use tallyerp_core::{AggregateId, WarehouseId};
use tallyerp_documents::{Action, Document, DocumentStatus, DocumentType, NewLine, TransitionPayload};
use tallyerp_events::{EventBus, EventEnvelope};
use tallyerp_ledger::{LineDelta, LineLimits, QuantityField};
use tallyerp_reconciliation::{check_receipt, line_limits, three_way_match};

use super::{
    ActionContext, ActionInput, DocumentEngine, EngineResult, TransitionOutcome, ensure_status, load_document,
    load_parent, open_dispositions, requested_quantities, stage_adjustment, stage_stock, stage_transition,
    state_error, warehouse_of,
};
use crate::command_dispatcher::{DispatchError, UnitOfWork};
use crate::event_store::EventStore;

/// Goods receipt line against a purchase order line. `expected_qty` defaults
/// to the order line's outstanding quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLineInput {
    pub po_line_id: AggregateId,
    pub expected_qty: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineInput {
    pub goods_receipt_id: AggregateId,
    pub grn_line_id: AggregateId,
    pub qty: Decimal,
}

impl<S, B> DocumentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a goods receipt for a confirmed purchase order. With no lines
    /// given, every order line with an outstanding quantity is expected.
    #[instrument(skip(self, ctx, lines), fields(tenant_id = %ctx.tenant_id, purchase_order_id = %po_id), err)]
    pub fn create_goods_receipt(
        &self,
        ctx: &ActionContext,
        po_id: AggregateId,
        warehouse_id: Option<WarehouseId>,
        lines: Vec<ReceiptLineInput>,
    ) -> EngineResult<Document> {
        let po = self.get_document(ctx, DocumentType::PurchaseOrder, po_id)?;
        ensure_status(&po, &[DocumentStatus::Confirmed], "receive against")?;

        let requested: Vec<ReceiptLineInput> = if lines.is_empty() {
            po.lines()
                .iter()
                .filter(|l| l.outstanding_receipt() > Decimal::ZERO)
                .map(|l| ReceiptLineInput { po_line_id: l.line_id, expected_qty: None })
                .collect()
        } else {
            lines
        };

        let mut new_lines = Vec::with_capacity(requested.len());
        for input in &requested {
            let po_line = po.line(input.po_line_id).ok_or_else(|| {
                DispatchError::Validation(format!("line {} is not on purchase order {po_id}", input.po_line_id))
            })?;
            let outstanding = po_line.outstanding_receipt();
            let expected = input.expected_qty.unwrap_or(outstanding);
            if expected <= Decimal::ZERO {
                return Err(DispatchError::Validation(format!(
                    "expected quantity for order line {} must be positive",
                    po_line.line_id
                )));
            }
            if expected > outstanding {
                return Err(DispatchError::Validation(format!(
                    "expected quantity {} exceeds the {} outstanding on order line {}",
                    expected.normalize(),
                    outstanding.normalize(),
                    po_line.line_id
                )));
            }
            new_lines.push(NewLine {
                line_id: AggregateId::new(),
                reference_line_id: Some(po_line.line_id),
                product_id: po_line.product_id,
                ordered_qty: expected,
            });
        }

        let warehouse_id = warehouse_id.or(po.header().warehouse_id);
        self.create(ctx, DocumentType::GoodsReceipt, warehouse_id, None, vec![po_id], new_lines)
    }

    /// Record received quantities. Each line must land inside its tolerance
    /// window; the order lines' received totals move with it.
    pub(super) fn receive_goods(&self, ctx: &ActionContext, grn_id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        let settings = self.tolerance_settings(ctx.tenant_id)?;
        self.transition(ctx, DocumentType::GoodsReceipt, grn_id, Action::Receive, |uow, grn| {
            let mut po = load_parent(uow, grn, DocumentType::PurchaseOrder)?;
            let company_id = po.header().company_id;

            let mut grn_deltas = Vec::new();
            let mut po_deltas = Vec::new();
            let mut po_limits = BTreeMap::new();
            for (line_id, qty) in requested_quantities(grn, &input.quantities, |_| Decimal::ZERO)? {
                let line = grn.line(line_id).cloned().ok_or_else(|| DispatchError::NotFound(format!("line {line_id}")))?;
                let tol = self.resolve_with(&settings, ctx.tenant_id, line.product_id, company_id);
                check_receipt(line.ordered_qty, qty, &tol)?;
                if qty.is_zero() {
                    continue;
                }

                let po_line_id = reference_of(&line)?;
                let po_line = po
                    .line(po_line_id)
                    .ok_or_else(|| DispatchError::Internal(format!("order line {po_line_id} missing")))?;
                grn_deltas.push(LineDelta::new(line_id, QuantityField::Received, qty));
                po_deltas.push(LineDelta::new(po_line_id, QuantityField::Received, qty));
                po_limits.insert(po_line_id, line_limits(po_line.ordered_qty, &tol));
            }

            let payload = TransitionPayload {
                line_deltas: grn_deltas,
                ..Default::default()
            };
            stage_transition(uow, ctx, grn, Action::Receive, payload)?;
            stage_adjustment(uow, ctx, &mut po, grn_id, po_deltas, po_limits)
        })
    }

    /// Split received quantities into accepted and rejected.
    pub(super) fn inspect_goods(&self, ctx: &ActionContext, grn_id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::GoodsReceipt, grn_id, Action::Inspect, |uow, grn| {
            let payload = TransitionPayload {
                line_deltas: inspection_deltas(grn, input)?,
                ..Default::default()
            };
            stage_transition(uow, ctx, grn, Action::Inspect, payload)
        })
    }

    /// Accept an inspected receipt (ACCEPTED, or PARTIAL with rejections).
    /// Accepted goods enter stock and rejected lines get a disposition record.
    pub(super) fn accept_goods(&self, ctx: &ActionContext, grn_id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::GoodsReceipt, grn_id, Action::Accept, |uow, grn| {
            let payload = TransitionPayload {
                line_deltas: inspection_deltas(grn, input)?,
                ..Default::default()
            };
            stage_transition(uow, ctx, grn, Action::Accept, payload)?;
            settle_inspection(uow, ctx, grn)?;

            let warehouse_id = warehouse_of(grn)?;
            let movements = grn.lines().iter().map(|l| (l.product_id, l.accepted_qty)).collect::<Vec<_>>();
            stage_stock(uow, ctx, warehouse_id, grn_id, movements)?;
            open_dispositions(uow, ctx, grn)
        })
    }

    /// Reject the whole receipt. Uninspected quantities count as rejected.
    pub(super) fn reject_goods(&self, ctx: &ActionContext, grn_id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::GoodsReceipt, grn_id, Action::Reject, |uow, grn| {
            let line_deltas = grn
                .lines()
                .iter()
                .filter(|l| l.uninspected() > Decimal::ZERO)
                .map(|l| LineDelta::new(l.line_id, QuantityField::Rejected, l.uninspected()))
                .collect();
            let payload = TransitionPayload {
                line_deltas,
                reason: input.reason.clone(),
                ..Default::default()
            };
            stage_transition(uow, ctx, grn, Action::Reject, payload)?;
            settle_inspection(uow, ctx, grn)?;
            open_dispositions(uow, ctx, grn)
        })
    }

    /// Create a draft purchase invoice against accepted goods receipt lines.
    #[instrument(skip(self, ctx, lines), fields(tenant_id = %ctx.tenant_id), err)]
    pub fn create_invoice(&self, ctx: &ActionContext, lines: Vec<InvoiceLineInput>) -> EngineResult<Document> {
        let mut parent_refs: Vec<AggregateId> = Vec::new();
        let mut receipts: BTreeMap<AggregateId, Document> = BTreeMap::new();
        let mut new_lines = Vec::with_capacity(lines.len());

        for input in &lines {
            if !receipts.contains_key(&input.goods_receipt_id) {
                let grn = self.get_document(ctx, DocumentType::GoodsReceipt, input.goods_receipt_id)?;
                ensure_status(&grn, &[DocumentStatus::Accepted, DocumentStatus::Partial], "invoice")?;
                parent_refs.push(input.goods_receipt_id);
                receipts.insert(input.goods_receipt_id, grn);
            }
            let grn = receipts
                .get(&input.goods_receipt_id)
                .ok_or_else(|| DispatchError::Internal("receipt cache miss".to_string()))?;
            let grn_line = grn.line(input.grn_line_id).ok_or_else(|| {
                DispatchError::Validation(format!(
                    "line {} is not on goods receipt {}",
                    input.grn_line_id, input.goods_receipt_id
                ))
            })?;
            new_lines.push(NewLine {
                line_id: AggregateId::new(),
                reference_line_id: Some(grn_line.line_id),
                product_id: grn_line.product_id,
                ordered_qty: input.qty,
            });
        }

        self.create(ctx, DocumentType::PurchaseInvoice, None, None, parent_refs, new_lines)
    }

    /// Post an invoice: every line passes the 3-way match and the invoiced
    /// totals of its receipt line and order line move with it.
    pub(super) fn post_invoice(&self, ctx: &ActionContext, invoice_id: AggregateId) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::PurchaseInvoice, invoice_id, Action::Post, |uow, invoice| {
            ensure_status(invoice, &[DocumentStatus::Draft], Action::Post.as_str())?;
            let policy = self.policies.invoice_control(ctx.tenant_id, invoice.header().company_id);

            let mut own_deltas = Vec::with_capacity(invoice.lines().len());
            for line in invoice.lines() {
                let grn_line_id = reference_of(line)?;
                let mut grn = receipt_holding(uow, invoice, grn_line_id)?;
                let mut po = load_parent(uow, &grn, DocumentType::PurchaseOrder)?;

                let grn_line = grn
                    .line(grn_line_id)
                    .cloned()
                    .ok_or_else(|| DispatchError::Internal(format!("receipt line {grn_line_id} missing")))?;
                let po_line_id = reference_of(&grn_line)?;
                let po_line = po
                    .line(po_line_id)
                    .cloned()
                    .ok_or_else(|| DispatchError::Internal(format!("order line {po_line_id} missing")))?;

                three_way_match(&grn_line, &po_line, line.ordered_qty, policy)?;

                let qty = line.ordered_qty;
                stage_adjustment(
                    uow,
                    ctx,
                    &mut grn,
                    invoice_id,
                    vec![LineDelta::new(grn_line_id, QuantityField::Invoiced, qty)],
                    BTreeMap::new(),
                )?;
                stage_adjustment(
                    uow,
                    ctx,
                    &mut po,
                    invoice_id,
                    vec![LineDelta::new(po_line_id, QuantityField::Invoiced, qty)],
                    BTreeMap::new(),
                )?;
                own_deltas.push(LineDelta::new(line.line_id, QuantityField::Invoiced, qty));
            }

            let payload = TransitionPayload {
                line_deltas: own_deltas,
                ..Default::default()
            };
            stage_transition(uow, ctx, invoice, Action::Post, payload)
        })
    }
}

fn reference_of(line: &tallyerp_ledger::DocumentLine) -> EngineResult<AggregateId> {
    line.reference_line_id
        .ok_or_else(|| DispatchError::Internal(format!("line {} has no reference line", line.line_id)))
}

/// Accepted/rejected deltas from the action input, for lines with non-zero values.
fn inspection_deltas(grn: &Document, input: &ActionInput) -> EngineResult<Vec<LineDelta>> {
    let mut deltas = Vec::new();
    for (line_id, inspection) in &input.inspections {
        if grn.line(*line_id).is_none() {
            return Err(DispatchError::Validation(format!("line {line_id} is not on this goods receipt")));
        }
        if !inspection.accepted.is_zero() {
            deltas.push(LineDelta::new(*line_id, QuantityField::Accepted, inspection.accepted));
        }
        if !inspection.rejected.is_zero() {
            deltas.push(LineDelta::new(*line_id, QuantityField::Rejected, inspection.rejected));
        }
    }
    Ok(deltas)
}

/// Carry a settled receipt's accepted and rejected totals onto the order lines.
fn settle_inspection<S: EventStore>(uow: &mut UnitOfWork<'_, S>, ctx: &ActionContext, grn: &Document) -> EngineResult<()> {
    let mut po = load_parent(uow, grn, DocumentType::PurchaseOrder)?;
    let mut deltas = Vec::new();
    for line in grn.lines() {
        let po_line_id = reference_of(line)?;
        if !line.accepted_qty.is_zero() {
            deltas.push(LineDelta::new(po_line_id, QuantityField::Accepted, line.accepted_qty));
        }
        if !line.rejected_qty.is_zero() {
            deltas.push(LineDelta::new(po_line_id, QuantityField::Rejected, line.rejected_qty));
        }
    }
    let limits: BTreeMap<AggregateId, LineLimits> = BTreeMap::new();
    stage_adjustment(uow, ctx, &mut po, grn.header().id, deltas, limits)
}

/// The invoiced goods receipt that holds `grn_line_id`.
fn receipt_holding<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    invoice: &Document,
    grn_line_id: AggregateId,
) -> EngineResult<Document> {
    for grn_id in &invoice.header().parent_refs {
        let grn = load_document(uow, *grn_id, DocumentType::GoodsReceipt)?;
        if grn.line(grn_line_id).is_some() {
            if !matches!(grn.status(), DocumentStatus::Accepted | DocumentStatus::Partial) {
                return Err(state_error(&grn, "invoice", "receipt is no longer invoiceable"));
            }
            return Ok(grn);
        }
    }
    Err(DispatchError::Internal(format!("receipt line {grn_line_id} not found on any referenced receipt")))
}
