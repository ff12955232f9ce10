//! Order-to-delivery: sales order shipping and deliveries.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use tallyerp_core::{AggregateId, WarehouseId};
use tallyerp_documents::{Action, Document, DocumentStatus, DocumentType, NewLine, TransitionPayload};
use tallyerp_events::{EventBus, EventEnvelope};
use tallyerp_ledger::{LineDelta, QuantityField};
use tallyerp_reconciliation::{check_over_delivery, line_limits};

use super::{
    ActionContext, ActionInput, DocumentEngine, EngineResult, TransitionOutcome, ensure_status, load_parent,
    requested_quantities, stage_adjustment, stage_stock, stage_transition, warehouse_of,
};
use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLineInput {
    pub so_line_id: AggregateId,
    pub qty: Decimal,
}

impl<S, B> DocumentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a draft delivery for an approved or processing sales order.
    #[instrument(skip(self, ctx, lines), fields(tenant_id = %ctx.tenant_id, sales_order_id = %so_id), err)]
    pub fn create_delivery(
        &self,
        ctx: &ActionContext,
        so_id: AggregateId,
        warehouse_id: Option<WarehouseId>,
        lines: Vec<DeliveryLineInput>,
    ) -> EngineResult<Document> {
        let so = self.get_document(ctx, DocumentType::SalesOrder, so_id)?;
        ensure_status(&so, &[DocumentStatus::Approved, DocumentStatus::Processing], "deliver against")?;

        let mut new_lines = Vec::with_capacity(lines.len());
        for input in &lines {
            let so_line = so.line(input.so_line_id).ok_or_else(|| {
                DispatchError::Validation(format!("line {} is not on sales order {so_id}", input.so_line_id))
            })?;
            new_lines.push(NewLine {
                line_id: AggregateId::new(),
                reference_line_id: Some(so_line.line_id),
                product_id: so_line.product_id,
                ordered_qty: input.qty,
            });
        }

        let warehouse_id = warehouse_id.or(so.header().warehouse_id);
        self.create(ctx, DocumentType::Delivery, warehouse_id, None, vec![so_id], new_lines)
    }

    /// Ship a sales order once its lines are covered by deliveries, down to
    /// the under-delivery tolerance.
    pub(super) fn ship_sales_order(&self, ctx: &ActionContext, so_id: AggregateId) -> EngineResult<TransitionOutcome> {
        let settings = self.tolerance_settings(ctx.tenant_id)?;
        self.transition(ctx, DocumentType::SalesOrder, so_id, Action::Ship, |uow, so| {
            let company_id = so.header().company_id;
            let limits = so
                .lines()
                .iter()
                .map(|l| {
                    let tol = self.resolve_with(&settings, ctx.tenant_id, l.product_id, company_id);
                    (l.line_id, line_limits(l.ordered_qty, &tol))
                })
                .collect();
            let payload = TransitionPayload {
                line_limits: limits,
                ..Default::default()
            };
            stage_transition(uow, ctx, so, Action::Ship, payload)
        })
    }

    /// Ship a delivery: each delivery line and the sales order lines' shipped
    /// totals must stay under their over-delivery bounds. The goods leave the
    /// warehouse.
    pub(super) fn ship_delivery(&self, ctx: &ActionContext, delivery_id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        let settings = self.tolerance_settings(ctx.tenant_id)?;
        self.transition(ctx, DocumentType::Delivery, delivery_id, Action::Ship, |uow, delivery| {
            let mut so = load_parent(uow, delivery, DocumentType::SalesOrder)?;
            let company_id = so.header().company_id;
            let delivery_company = delivery.header().company_id;

            let mut own_deltas = Vec::new();
            let mut own_limits = BTreeMap::new();
            let mut so_deltas = Vec::new();
            let mut so_limits = BTreeMap::new();
            let mut shipping: BTreeMap<AggregateId, Decimal> = BTreeMap::new();
            let mut movements = Vec::new();

            for (line_id, qty) in requested_quantities(delivery, &input.quantities, |l| l.ordered_qty)? {
                if qty.is_zero() {
                    continue;
                }
                let line = delivery
                    .line(line_id)
                    .cloned()
                    .ok_or_else(|| DispatchError::NotFound(format!("line {line_id}")))?;
                let so_line_id = line
                    .reference_line_id
                    .ok_or_else(|| DispatchError::Internal(format!("line {line_id} has no order line")))?;
                let so_line = so
                    .line(so_line_id)
                    .ok_or_else(|| DispatchError::Internal(format!("order line {so_line_id} missing")))?;

                let own_tol = self.resolve_with(&settings, ctx.tenant_id, line.product_id, delivery_company);
                check_over_delivery(line.ordered_qty, line.shipped_qty, qty, &own_tol)?;
                own_limits.insert(line_id, line_limits(line.ordered_qty, &own_tol));

                let tol = self.resolve_with(&settings, ctx.tenant_id, so_line.product_id, company_id);
                let already = so_line.shipped_qty + shipping.get(&so_line_id).copied().unwrap_or(Decimal::ZERO);
                check_over_delivery(so_line.ordered_qty, already, qty, &tol)?;
                *shipping.entry(so_line_id).or_insert(Decimal::ZERO) += qty;

                own_deltas.push(LineDelta::new(line_id, QuantityField::Shipped, qty));
                so_deltas.push(LineDelta::new(so_line_id, QuantityField::Shipped, qty));
                so_limits.insert(so_line_id, line_limits(so_line.ordered_qty, &tol));
                movements.push((line.product_id, -qty));
            }

            let payload = TransitionPayload {
                line_deltas: own_deltas,
                line_limits: own_limits,
                ..Default::default()
            };
            stage_transition(uow, ctx, delivery, Action::Ship, payload)?;
            stage_adjustment(uow, ctx, &mut so, delivery_id, so_deltas, so_limits)?;
            stage_stock(uow, ctx, warehouse_of(delivery)?, delivery_id, movements)
        })
    }

    /// Confirm delivery of everything shipped.
    pub(super) fn deliver_delivery(&self, ctx: &ActionContext, delivery_id: AggregateId) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::Delivery, delivery_id, Action::Deliver, |uow, delivery| {
            let mut so = load_parent(uow, delivery, DocumentType::SalesOrder)?;

            let mut own_deltas = Vec::new();
            let mut so_deltas = Vec::new();
            for line in delivery.lines().iter().filter(|l| l.shipped_qty > l.delivered_qty) {
                let qty = line.shipped_qty - line.delivered_qty;
                let so_line_id = line
                    .reference_line_id
                    .ok_or_else(|| DispatchError::Internal(format!("line {} has no order line", line.line_id)))?;
                own_deltas.push(LineDelta::new(line.line_id, QuantityField::Delivered, qty));
                so_deltas.push(LineDelta::new(so_line_id, QuantityField::Delivered, qty));
            }

            let payload = TransitionPayload {
                line_deltas: own_deltas,
                ..Default::default()
            };
            stage_transition(uow, ctx, delivery, Action::Deliver, payload)?;
            stage_adjustment(uow, ctx, &mut so, delivery_id, so_deltas, BTreeMap::new())
        })
    }
}
