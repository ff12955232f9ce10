//! Warehouse-internal documents: transfers, adjustments and stock counts.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::instrument;

use tallyerp_core::{AggregateId, ProductId, WarehouseId};
use tallyerp_documents::{Action, Document, DocumentStatus, DocumentType, NewLine, TransitionPayload};
use tallyerp_events::{EventBus, EventEnvelope};
use tallyerp_ledger::{LineDelta, LineLimits, QuantityField};
use tallyerp_reconciliation::{check_over_delivery, line_limits};

use super::{
    ActionContext, ActionInput, DocumentEngine, EngineResult, TransitionOutcome, load_stock,
    requested_quantities, stage_stock, stage_transition, warehouse_of,
};
use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;

impl<S, B> DocumentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a stock count for `products` at `warehouse_id`. Each line's
    /// ordered quantity records the book quantity at creation.
    #[instrument(skip(self, ctx, products), fields(tenant_id = %ctx.tenant_id, warehouse_id = %warehouse_id), err)]
    pub fn create_opname(
        &self,
        ctx: &ActionContext,
        warehouse_id: WarehouseId,
        products: Vec<ProductId>,
    ) -> EngineResult<Document> {
        let mut seen = BTreeSet::new();
        if let Some(dup) = products.iter().find(|p| !seen.insert(**p)) {
            return Err(DispatchError::Validation(format!("product {dup} is listed twice")));
        }

        let stock = self.warehouse_stock(ctx, warehouse_id)?;
        let lines = products
            .into_iter()
            .map(|product_id| NewLine {
                line_id: AggregateId::new(),
                reference_line_id: None,
                product_id,
                ordered_qty: stock.on_hand(product_id),
            })
            .collect();

        self.create(ctx, DocumentType::StockOpname, Some(warehouse_id), None, Vec::new(), lines)
    }

    /// Ship a transfer out of its source warehouse. Each line may ship up to
    /// its over-delivery bound.
    pub(super) fn ship_transfer(&self, ctx: &ActionContext, id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        let settings = self.tolerance_settings(ctx.tenant_id)?;
        self.transition(ctx, DocumentType::StockTransfer, id, Action::Ship, |uow, transfer| {
            let company_id = transfer.header().company_id;
            let quantities = requested_quantities(transfer, &input.quantities, |l| l.ordered_qty)?;

            let mut limits = BTreeMap::new();
            for (line_id, qty) in &quantities {
                let line = transfer
                    .line(*line_id)
                    .ok_or_else(|| DispatchError::NotFound(format!("line {line_id}")))?;
                let tol = self.resolve_with(&settings, ctx.tenant_id, line.product_id, company_id);
                check_over_delivery(line.ordered_qty, line.shipped_qty, *qty, &tol)?;
                limits.insert(*line_id, line_limits(line.ordered_qty, &tol));
            }

            let payload = TransitionPayload {
                line_deltas: deltas(QuantityField::Shipped, &quantities),
                line_limits: limits,
                ..Default::default()
            };
            let movements = movements(transfer, &quantities, Decimal::NEGATIVE_ONE);

            stage_transition(uow, ctx, transfer, Action::Ship, payload)?;
            stage_stock(uow, ctx, warehouse_of(transfer)?, id, movements)
        })
    }

    /// Receive a shipped transfer at its destination, at most what was shipped.
    /// Whatever was shipped but not received goes back to the source warehouse.
    pub(super) fn receive_transfer(&self, ctx: &ActionContext, id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::StockTransfer, id, Action::Receive, |uow, transfer| {
            let quantities = requested_quantities(transfer, &input.quantities, |l| l.shipped_qty)?;
            let line_deltas = deltas(QuantityField::Received, &quantities);
            let line_limits: BTreeMap<AggregateId, LineLimits> = transfer
                .lines()
                .iter()
                .map(|l| (l.line_id, LineLimits::with_ceiling(l.shipped_qty)))
                .collect();
            let arrivals = movements(transfer, &quantities, Decimal::ONE);
            let source = warehouse_of(transfer)?;
            let destination = transfer.header().destination_warehouse_id.ok_or_else(|| {
                DispatchError::Internal(format!("transfer {id} has no destination warehouse"))
            })?;

            stage_transition(
                uow,
                ctx,
                transfer,
                Action::Receive,
                TransitionPayload { line_deltas, line_limits, ..Default::default() },
            )?;

            let returns = transfer
                .lines()
                .iter()
                .map(|l| (l.product_id, l.shipped_qty - l.received_qty))
                .collect::<Vec<_>>();
            stage_stock(uow, ctx, destination, id, arrivals)?;
            stage_stock(uow, ctx, source, id, returns)
        })
    }

    /// Cancel a transfer. Goods already shipped return to the source warehouse.
    pub(super) fn cancel_transfer(&self, ctx: &ActionContext, id: AggregateId) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::StockTransfer, id, Action::Cancel, |uow, transfer| {
            let in_transit = if transfer.status() == DocumentStatus::Shipped {
                transfer.lines().iter().map(|l| (l.product_id, l.shipped_qty)).collect()
            } else {
                Vec::new()
            };
            let source = warehouse_of(transfer)?;

            stage_transition(uow, ctx, transfer, Action::Cancel, TransitionPayload::default())?;
            stage_stock(uow, ctx, source, id, in_transit)
        })
    }

    /// Approve an adjustment: each line's signed quantity is booked.
    pub(super) fn approve_adjustment(&self, ctx: &ActionContext, id: AggregateId) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::InventoryAdjustment, id, Action::Approve, |uow, adjustment| {
            let movements = adjustment.lines().iter().map(|l| (l.product_id, l.ordered_qty)).collect::<Vec<_>>();
            stage_transition(uow, ctx, adjustment, Action::Approve, TransitionPayload::default())?;
            stage_stock(uow, ctx, warehouse_of(adjustment)?, id, movements)
        })
    }

    /// Complete a stock count. Every line needs a counted quantity; on-hand
    /// stock is set to the counted figures.
    pub(super) fn complete_opname(&self, ctx: &ActionContext, id: AggregateId, input: &ActionInput) -> EngineResult<TransitionOutcome> {
        self.transition(ctx, DocumentType::StockOpname, id, Action::Complete, |uow, opname| {
            if let Some(unknown) = input.quantities.keys().find(|line_id| opname.line(**line_id).is_none()) {
                return Err(DispatchError::Validation(format!("line {unknown} is not on this stock count")));
            }

            let mut line_deltas = Vec::new();
            let mut counts = Vec::new();
            for line in opname.lines() {
                let Some(counted) = input.quantities.get(&line.line_id).copied() else {
                    continue;
                };
                if counted < Decimal::ZERO {
                    return Err(DispatchError::Validation(format!(
                        "counted quantity for line {} cannot be negative",
                        line.line_id
                    )));
                }
                line_deltas.push(LineDelta::new(line.line_id, QuantityField::Counted, counted));
                counts.push((line.product_id, counted));
            }

            let warehouse_id = warehouse_of(opname)?;
            let stock = load_stock(uow, warehouse_id)?;
            let movements = counts
                .into_iter()
                .map(|(product_id, counted)| (product_id, counted - stock.on_hand(product_id)))
                .collect::<Vec<_>>();

            stage_transition(uow, ctx, opname, Action::Complete, TransitionPayload { line_deltas, ..Default::default() })?;
            stage_stock(uow, ctx, warehouse_id, id, movements)
        })
    }
}

fn deltas(field: QuantityField, quantities: &[(AggregateId, Decimal)]) -> Vec<LineDelta> {
    quantities
        .iter()
        .filter(|(_, qty)| !qty.is_zero())
        .map(|(line_id, qty)| LineDelta::new(*line_id, field, *qty))
        .collect()
}

fn movements(doc: &Document, quantities: &[(AggregateId, Decimal)], sign: Decimal) -> Vec<(ProductId, Decimal)> {
    quantities
        .iter()
        .filter_map(|(line_id, qty)| doc.line(*line_id).map(|l| (l.product_id, *qty * sign)))
        .collect()
}
