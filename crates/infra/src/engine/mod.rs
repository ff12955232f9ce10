//! Document engine: cross-document workflows on top of the dispatcher.
//!
//! Each public operation runs as one unit of work. The document's own
//! transition, the ledger adjustments it causes on parent documents, stock
//! movements and disposition records are staged together and committed as a
//! single batch, so a rejected action leaves every document untouched.

mod disposition;
mod purchasing;
mod sales;
mod stock;
mod tolerance;

pub use disposition::DispositionView;
pub use purchasing::{InvoiceLineInput, ReceiptLineInput};
pub use sales::DeliveryLineInput;
pub use tolerance::NewTolerance;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use tallyerp_core::{AggregateId, CompanyId, DomainError, ProductId, TenantId, UserId, WarehouseId};
use tallyerp_disposition::{DispositionCommand, DispositionRecord, OpenDisposition};
use tallyerp_documents::{
    Action, ApplyLineDeltas, ApplyTransition, CreateDocument, Document, DocumentCommand,
    DocumentStatus, DocumentType, NewLine, TransitionPayload, TransitionReceipt,
};
use tallyerp_events::{EventBus, EventEnvelope};
use tallyerp_inventory::{MoveStock, StockCommand, StockMovement, WarehouseStock};
use tallyerp_ledger::{LineDelta, LineLimits, QuantityField};
use tallyerp_reconciliation::line_limits;
use tallyerp_tolerance::{ResolvedTolerance, ToleranceSetting, resolve};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, UnitOfWork};
use crate::directory::{CompanyPolicies, ProductCatalog};
use crate::event_store::EventStore;
use crate::tolerance_store::ToleranceStore;

pub const DOCUMENT_AGGREGATE: &str = "documents.document";
pub const STOCK_AGGREGATE: &str = "inventory.warehouse_stock";
pub const DISPOSITION_AGGREGATE: &str = "disposition.record";

pub type EngineResult<T> = Result<T, DispatchError>;

/// Caller context of one action. Supplied by the host, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionContext {
    pub tenant_id: TenantId,
    pub company_id: CompanyId,
    pub actor: UserId,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ActionContext {
    pub fn new(tenant_id: TenantId, company_id: CompanyId, actor: UserId) -> Self {
        Self {
            tenant_id,
            company_id,
            actor,
            idempotency_key: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Line of a new standalone document (order, transfer, adjustment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub product_id: ProductId,
    pub qty: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    pub accepted: Decimal,
    pub rejected: Decimal,
}

/// Quantities and flags an action may carry. Which fields an action reads
/// depends on the document type; the rest are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionInput {
    /// Per-line quantity: received, shipped, delivered or counted.
    pub quantities: BTreeMap<AggregateId, Decimal>,
    pub inspections: BTreeMap<AggregateId, Inspection>,
    pub force: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub document: Document,
    pub receipt: TransitionReceipt,
    /// The idempotency key had already been applied; nothing was committed.
    pub replayed: bool,
}

/// Orchestrates document actions for every document type.
pub struct DocumentEngine<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    tolerances: Arc<dyn ToleranceStore>,
    catalog: Arc<dyn ProductCatalog>,
    policies: Arc<dyn CompanyPolicies>,
}

impl<S, B> DocumentEngine<S, B> {
    pub fn new(
        dispatcher: CommandDispatcher<S, B>,
        tolerances: Arc<dyn ToleranceStore>,
        catalog: Arc<dyn ProductCatalog>,
        policies: Arc<dyn CompanyPolicies>,
    ) -> Self {
        Self {
            dispatcher,
            tolerances,
            catalog,
            policies,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }
}

impl<S, B> DocumentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load a document of the given type, visible to the caller's tenant.
    pub fn get_document(&self, ctx: &ActionContext, doc_type: DocumentType, id: AggregateId) -> EngineResult<Document> {
        let mut uow = UnitOfWork::new(self.dispatcher.store(), ctx.tenant_id);
        load_document(&mut uow, id, doc_type)
    }

    /// Create a document with no parent document.
    #[instrument(skip(self, ctx, lines), fields(tenant_id = %ctx.tenant_id, doc_type = %doc_type), err)]
    pub fn create_document(
        &self,
        ctx: &ActionContext,
        doc_type: DocumentType,
        warehouse_id: Option<WarehouseId>,
        destination_warehouse_id: Option<WarehouseId>,
        lines: Vec<LineInput>,
    ) -> EngineResult<Document> {
        match doc_type {
            DocumentType::PurchaseOrder
            | DocumentType::SalesOrder
            | DocumentType::StockTransfer
            | DocumentType::InventoryAdjustment => {}
            other => {
                return Err(DispatchError::Validation(format!(
                    "{other} must be created from its parent document"
                )));
            }
        }

        let new_lines = lines
            .iter()
            .map(|l| NewLine {
                line_id: AggregateId::new(),
                reference_line_id: None,
                product_id: l.product_id,
                ordered_qty: l.qty,
            })
            .collect::<Vec<_>>();

        self.create(ctx, doc_type, warehouse_id, destination_warehouse_id, Vec::new(), new_lines)
    }

    /// Run an action on a document. Actions with cross-document effects are
    /// routed to their workflow; the rest are plain transitions.
    pub fn perform(
        &self,
        ctx: &ActionContext,
        doc_type: DocumentType,
        id: AggregateId,
        action: Action,
        input: ActionInput,
    ) -> EngineResult<TransitionOutcome> {
        use Action::*;
        use DocumentType::*;

        match (doc_type, action) {
            (GoodsReceipt, Receive) => self.receive_goods(ctx, id, &input),
            (GoodsReceipt, Inspect) => self.inspect_goods(ctx, id, &input),
            (GoodsReceipt, Accept) => self.accept_goods(ctx, id, &input),
            (GoodsReceipt, Reject) => self.reject_goods(ctx, id, &input),
            (PurchaseInvoice, Post) => self.post_invoice(ctx, id),
            (SalesOrder, Ship) => self.ship_sales_order(ctx, id),
            (Delivery, Ship) => self.ship_delivery(ctx, id, &input),
            (Delivery, Deliver) => self.deliver_delivery(ctx, id),
            (StockTransfer, Ship) => self.ship_transfer(ctx, id, &input),
            (StockTransfer, Receive) => self.receive_transfer(ctx, id, &input),
            (StockTransfer, Cancel) => self.cancel_transfer(ctx, id),
            (InventoryAdjustment, Approve) => self.approve_adjustment(ctx, id),
            (StockOpname, Complete) => self.complete_opname(ctx, id, &input),
            _ => {
                let payload = TransitionPayload {
                    force: input.force,
                    reason: input.reason.clone(),
                    ..Default::default()
                };
                self.transition(ctx, doc_type, id, action, |uow, doc| {
                    stage_transition(uow, ctx, doc, action, payload.clone())
                })
            }
        }
    }

    /// Apply a single line delta outside a transition. Only goods receipt
    /// lines take direct deltas, and only for the field their current step
    /// records: `Received` while RECEIVED, `Accepted`/`Rejected` while
    /// INSPECTED. Received deltas move the order line too. Every delta is
    /// bounded by the line's over-delivery ceiling.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, document_id = %document_id), err)]
    pub fn apply_delta(
        &self,
        ctx: &ActionContext,
        doc_type: DocumentType,
        document_id: AggregateId,
        line_id: AggregateId,
        field: QuantityField,
        delta: Decimal,
    ) -> EngineResult<Document> {
        let settings = self.tolerance_settings(ctx.tenant_id)?;
        let (document, _) = self.dispatcher.run(ctx.tenant_id, |uow| {
            let mut doc = load_document(uow, document_id, doc_type)?;
            ensure_direct_field(&doc, field)?;
            let line = doc
                .line(line_id)
                .ok_or_else(|| DispatchError::NotFound(format!("line {line_id}")))?
                .clone();

            let tol = self.resolve_with(&settings, ctx.tenant_id, line.product_id, doc.header().company_id);
            let limits = BTreeMap::from([(line_id, line_limits(line.ordered_qty, &tol))]);
            stage_adjustment(uow, ctx, &mut doc, document_id, vec![LineDelta::new(line_id, field, delta)], limits)?;

            if field == QuantityField::Received {
                let mut po = load_parent(uow, &doc, DocumentType::PurchaseOrder)?;
                let po_line_id = line
                    .reference_line_id
                    .ok_or_else(|| DispatchError::Internal(format!("line {line_id} has no order line")))?;
                let po_line = po
                    .line(po_line_id)
                    .cloned()
                    .ok_or_else(|| DispatchError::Internal(format!("order line {po_line_id} missing")))?;
                let po_tol = self.resolve_with(&settings, ctx.tenant_id, po_line.product_id, po.header().company_id);
                let po_limits = BTreeMap::from([(po_line_id, line_limits(po_line.ordered_qty, &po_tol))]);
                let po_deltas = vec![LineDelta::new(po_line_id, QuantityField::Received, delta)];
                stage_adjustment(uow, ctx, &mut po, document_id, po_deltas, po_limits)?;
            }
            Ok(doc)
        })?;
        Ok(document)
    }

    pub fn warehouse_stock(&self, ctx: &ActionContext, warehouse_id: WarehouseId) -> EngineResult<WarehouseStock> {
        let stock = self.dispatcher.load(ctx.tenant_id, warehouse_id.stream_id(), STOCK_AGGREGATE, |_| {
            WarehouseStock::empty(warehouse_id)
        })?;
        match stock.tenant_id() {
            Some(owner) if owner != ctx.tenant_id => Err(DispatchError::NotFound(format!("warehouse {warehouse_id}"))),
            _ => Ok(stock),
        }
    }

    fn create(
        &self,
        ctx: &ActionContext,
        doc_type: DocumentType,
        warehouse_id: Option<WarehouseId>,
        destination_warehouse_id: Option<WarehouseId>,
        parent_refs: Vec<AggregateId>,
        lines: Vec<NewLine>,
    ) -> EngineResult<Document> {
        let document_id = AggregateId::new();
        let command = DocumentCommand::Create(CreateDocument {
            tenant_id: ctx.tenant_id,
            document_id,
            doc_type,
            company_id: ctx.company_id,
            warehouse_id,
            destination_warehouse_id,
            parent_refs,
            lines,
            created_by: ctx.actor,
            occurred_at: ctx.occurred_at,
        });

        let result = self.dispatcher.run(ctx.tenant_id, |uow| {
            let mut doc = uow.load(document_id, DOCUMENT_AGGREGATE, Document::empty)?;
            uow.stage(&mut doc, &command)?;
            Ok(doc)
        });

        match result {
            Ok((doc, _)) => {
                info!(tenant_id = %ctx.tenant_id, document_id = %document_id, doc_type = %doc_type, lines = doc.lines().len(), "document created");
                Ok(doc)
            }
            Err(e) => {
                warn!(tenant_id = %ctx.tenant_id, doc_type = %doc_type, error = %e, "document creation rejected");
                Err(e)
            }
        }
    }

    /// Run one document action. `effects` stages the document's transition
    /// and everything it causes on other aggregates.
    fn transition<F>(
        &self,
        ctx: &ActionContext,
        doc_type: DocumentType,
        id: AggregateId,
        action: Action,
        mut effects: F,
    ) -> EngineResult<TransitionOutcome>
    where
        F: FnMut(&mut UnitOfWork<'_, S>, &mut Document) -> EngineResult<()>,
    {
        let result = self.dispatcher.run(ctx.tenant_id, |uow| {
            let mut doc = load_document(uow, id, doc_type)?;

            if let Some(receipt) = replayed_receipt(&doc, ctx, action)? {
                return Ok(TransitionOutcome {
                    document: doc,
                    receipt,
                    replayed: true,
                });
            }
            doc.ensure_action(action)?;

            effects(uow, &mut doc)?;

            let receipt = doc
                .last_transition()
                .cloned()
                .ok_or_else(|| DispatchError::Internal(format!("{action} on {id} staged no transition")))?;
            Ok(TransitionOutcome {
                document: doc,
                receipt,
                replayed: false,
            })
        });

        match result {
            Ok((outcome, _)) if outcome.replayed => {
                debug!(tenant_id = %ctx.tenant_id, document_id = %id, action = %action, "idempotent replay");
                Ok(outcome)
            }
            Ok((outcome, committed)) => {
                info!(
                    tenant_id = %ctx.tenant_id,
                    document_id = %id,
                    doc_type = %doc_type,
                    action = %action,
                    from = %outcome.receipt.from,
                    to = %outcome.receipt.to,
                    events = committed.len(),
                    "document transitioned"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(tenant_id = %ctx.tenant_id, document_id = %id, doc_type = %doc_type, action = %action, error = %e, "document action rejected");
                Err(e)
            }
        }
    }

    fn tolerance_settings(&self, tenant_id: TenantId) -> EngineResult<Vec<ToleranceSetting>> {
        Ok(self.tolerances.list(tenant_id)?)
    }

    fn resolve_with(
        &self,
        settings: &[ToleranceSetting],
        tenant_id: TenantId,
        product_id: ProductId,
        company_id: CompanyId,
    ) -> ResolvedTolerance {
        let category = self.catalog.product(tenant_id, product_id).and_then(|p| p.category);
        resolve(settings, product_id, category.as_deref(), company_id)
    }
}

/// Load a created document of `doc_type` owned by the unit of work's tenant.
pub(crate) fn load_document<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    id: AggregateId,
    doc_type: DocumentType,
) -> EngineResult<Document> {
    let doc = uow.load(id, DOCUMENT_AGGREGATE, Document::empty)?;
    if !doc.is_created() || doc.tenant_id() != Some(uow.tenant_id()) || doc.doc_type() != doc_type {
        return Err(DispatchError::NotFound(format!("{doc_type} {id}")));
    }
    Ok(doc)
}

/// Parent document of `doc`, which must be of `parent_type`.
pub(crate) fn load_parent<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    doc: &Document,
    parent_type: DocumentType,
) -> EngineResult<Document> {
    let parent_id = doc
        .header()
        .parent_refs
        .first()
        .copied()
        .ok_or_else(|| DispatchError::Internal(format!("document {} has no parent", doc.header().id)))?;
    load_document(uow, parent_id, parent_type)
}

fn replayed_receipt(doc: &Document, ctx: &ActionContext, action: Action) -> EngineResult<Option<TransitionReceipt>> {
    let Some(key) = ctx.idempotency_key.as_deref() else {
        return Ok(None);
    };
    match doc.receipt(key) {
        Some(receipt) if receipt.action == action => Ok(Some(receipt.clone())),
        Some(receipt) => Err(DispatchError::Validation(format!(
            "idempotency key {key:?} was already used for {}",
            receipt.action
        ))),
        None => Ok(None),
    }
}

pub(crate) fn stage_transition<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    ctx: &ActionContext,
    doc: &mut Document,
    action: Action,
    payload: TransitionPayload,
) -> EngineResult<()> {
    let command = DocumentCommand::Transition(ApplyTransition {
        tenant_id: ctx.tenant_id,
        document_id: doc.header().id,
        action,
        payload,
        idempotency_key: ctx.idempotency_key.clone(),
        actor: ctx.actor,
        occurred_at: ctx.occurred_at,
    });
    uow.stage(doc, &command)?;
    Ok(())
}

/// Stage line deltas on `doc` caused by `source_document_id`.
pub(crate) fn stage_adjustment<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    ctx: &ActionContext,
    doc: &mut Document,
    source_document_id: AggregateId,
    deltas: Vec<LineDelta>,
    limits: BTreeMap<AggregateId, LineLimits>,
) -> EngineResult<()> {
    if deltas.is_empty() {
        return Ok(());
    }
    let command = DocumentCommand::AdjustLines(ApplyLineDeltas {
        tenant_id: ctx.tenant_id,
        document_id: doc.header().id,
        deltas,
        limits,
        source_document_id,
        occurred_at: ctx.occurred_at,
    });
    uow.stage(doc, &command)?;
    Ok(())
}

/// Stage stock movements at `warehouse_id`, netting and skipping zeros.
pub(crate) fn stage_stock<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    ctx: &ActionContext,
    warehouse_id: WarehouseId,
    document_id: AggregateId,
    movements: impl IntoIterator<Item = (ProductId, Decimal)>,
) -> EngineResult<()> {
    let mut net: BTreeMap<ProductId, Decimal> = BTreeMap::new();
    for (product_id, delta) in movements {
        *net.entry(product_id).or_insert(Decimal::ZERO) += delta;
    }
    let movements: Vec<StockMovement> = net
        .into_iter()
        .filter(|(_, delta)| !delta.is_zero())
        .map(|(product_id, delta)| StockMovement { product_id, delta })
        .collect();
    if movements.is_empty() {
        return Ok(());
    }

    let mut stock = load_stock(uow, warehouse_id)?;
    let command = StockCommand::MoveStock(MoveStock {
        tenant_id: ctx.tenant_id,
        warehouse_id,
        document_id,
        movements,
        occurred_at: ctx.occurred_at,
    });
    uow.stage(&mut stock, &command)?;
    Ok(())
}

/// Stock at `warehouse_id` as seen by the unit of work, staged movements included.
pub(crate) fn load_stock<S: EventStore>(uow: &mut UnitOfWork<'_, S>, warehouse_id: WarehouseId) -> EngineResult<WarehouseStock> {
    let stock = uow.load(warehouse_id.stream_id(), STOCK_AGGREGATE, |_| WarehouseStock::empty(warehouse_id))?;
    match stock.tenant_id() {
        Some(owner) if owner != uow.tenant_id() => Err(DispatchError::NotFound(format!("warehouse {warehouse_id}"))),
        _ => Ok(stock),
    }
}

/// Open a disposition record for every line of a goods receipt with rejected quantity.
pub(crate) fn open_dispositions<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    ctx: &ActionContext,
    grn: &Document,
) -> EngineResult<()> {
    for line in grn.lines().iter().filter(|l| l.rejected_qty > Decimal::ZERO) {
        let mut record = uow.load(line.line_id, DISPOSITION_AGGREGATE, DispositionRecord::empty)?;
        let command = DispositionCommand::Open(OpenDisposition {
            tenant_id: ctx.tenant_id,
            grn_item_id: line.line_id,
            grn_id: grn.header().id,
            rejected_qty: line.rejected_qty,
            opened_by: ctx.actor,
            occurred_at: ctx.occurred_at,
        });
        uow.stage(&mut record, &command)?;
    }
    Ok(())
}

/// Warehouse a stock-moving document operates on.
pub(crate) fn warehouse_of(doc: &Document) -> EngineResult<WarehouseId> {
    doc.header()
        .warehouse_id
        .ok_or_else(|| DispatchError::Internal(format!("{} {} has no warehouse", doc.doc_type(), doc.header().id)))
}

/// Quantity given for each line, checked against the document's lines.
pub(crate) fn requested_quantities(
    doc: &Document,
    quantities: &BTreeMap<AggregateId, Decimal>,
    default: impl Fn(&tallyerp_ledger::DocumentLine) -> Decimal,
) -> EngineResult<Vec<(AggregateId, Decimal)>> {
    if let Some(unknown) = quantities.keys().find(|id| doc.line(**id).is_none()) {
        return Err(DispatchError::Validation(format!("line {unknown} is not on this document")));
    }
    doc.lines()
        .iter()
        .map(|line| {
            let qty = if quantities.is_empty() {
                default(line)
            } else {
                quantities.get(&line.line_id).copied().unwrap_or(Decimal::ZERO)
            };
            if qty < Decimal::ZERO {
                return Err(DispatchError::Validation(format!(
                    "quantity for line {} cannot be negative",
                    line.line_id
                )));
            }
            Ok((line.line_id, qty))
        })
        .collect()
}

/// Fields a document line accepts direct deltas for in its current status.
/// Everything else is written by the owning action only.
fn ensure_direct_field(doc: &Document, field: QuantityField) -> EngineResult<()> {
    let allowed: &[QuantityField] = match (doc.doc_type(), doc.status()) {
        (DocumentType::GoodsReceipt, DocumentStatus::Received) => &[QuantityField::Received],
        (DocumentType::GoodsReceipt, DocumentStatus::Inspected) => &[QuantityField::Accepted, QuantityField::Rejected],
        _ => &[],
    };
    if allowed.contains(&field) {
        return Ok(());
    }
    Err(DispatchError::Validation(format!(
        "{field} cannot be adjusted directly on a {} {} line",
        doc.status(),
        doc.doc_type()
    )))
}

pub(crate) fn state_error(doc: &Document, action: &str, message: impl Into<String>) -> DispatchError {
    DispatchError::from(DomainError::state(tallyerp_core::StateViolation::new(
        doc.doc_type().as_str(),
        doc.status().as_str(),
        action,
        message,
    )))
}

pub(crate) fn ensure_status(doc: &Document, allowed: &[DocumentStatus], action: &str) -> EngineResult<()> {
    if allowed.contains(&doc.status()) {
        return Ok(());
    }
    let expected = allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" or ");
    Err(state_error(doc, action, format!("{} must be {expected}", doc.doc_type())))
}
