//! Rejected-goods dispositions, addressed by goods receipt and line.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use tallyerp_core::{AggregateId, UserId};
use tallyerp_disposition::{
    Disposition, DispositionCommand, DispositionHistoryEntry, DispositionRecord, ResolveDisposition,
    UpdateDisposition,
};
use tallyerp_documents::DocumentType;
use tallyerp_events::{EventBus, EventEnvelope};

use super::{ActionContext, DISPOSITION_AGGREGATE, DocumentEngine, EngineResult, load_document};
use crate::command_dispatcher::{DispatchError, UnitOfWork};
use crate::event_store::EventStore;

/// Read shape of a disposition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispositionView {
    pub grn_id: AggregateId,
    pub grn_item_id: AggregateId,
    pub rejected_qty: Decimal,
    pub disposition: Disposition,
    pub notes: Option<String>,
    pub resolved: bool,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub history: Vec<DispositionHistoryEntry>,
}

impl DispositionView {
    fn from_record(grn_id: AggregateId, record: &DispositionRecord) -> Self {
        Self {
            grn_id,
            grn_item_id: record.grn_item_id(),
            rejected_qty: record.rejected_qty(),
            disposition: record.disposition(),
            notes: record.notes().map(str::to_owned),
            resolved: record.is_resolved(),
            resolved_by: record.resolved_by(),
            resolved_at: record.resolved_at(),
            history: record.history().to_vec(),
        }
    }
}

impl<S, B> DocumentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn get_disposition(&self, ctx: &ActionContext, grn_id: AggregateId, line_id: AggregateId) -> EngineResult<DispositionView> {
        let mut uow = UnitOfWork::new(self.dispatcher.store(), ctx.tenant_id);
        let record = load_record(&mut uow, grn_id, line_id)?;
        Ok(DispositionView::from_record(grn_id, &record))
    }

    /// Change the outcome of an open disposition.
    #[instrument(skip(self, ctx, notes), fields(tenant_id = %ctx.tenant_id, grn_id = %grn_id, line_id = %line_id), err)]
    pub fn update_disposition(
        &self,
        ctx: &ActionContext,
        grn_id: AggregateId,
        line_id: AggregateId,
        disposition: Disposition,
        notes: Option<String>,
    ) -> EngineResult<DispositionView> {
        let command = DispositionCommand::Update(UpdateDisposition {
            tenant_id: ctx.tenant_id,
            grn_item_id: line_id,
            disposition,
            notes,
            actor: ctx.actor,
            occurred_at: ctx.occurred_at,
        });
        let view = self.stage_disposition(ctx, grn_id, line_id, &command)?;
        info!(tenant_id = %ctx.tenant_id, grn_item_id = %line_id, disposition = view.disposition.as_str(), "disposition updated");
        Ok(view)
    }

    /// Close a disposition. A resolved record accepts no further changes.
    #[instrument(skip(self, ctx, notes), fields(tenant_id = %ctx.tenant_id, grn_id = %grn_id, line_id = %line_id), err)]
    pub fn resolve_disposition(
        &self,
        ctx: &ActionContext,
        grn_id: AggregateId,
        line_id: AggregateId,
        disposition: Option<Disposition>,
        notes: Option<String>,
    ) -> EngineResult<DispositionView> {
        let command = DispositionCommand::Resolve(ResolveDisposition {
            tenant_id: ctx.tenant_id,
            grn_item_id: line_id,
            disposition,
            notes,
            actor: ctx.actor,
            occurred_at: ctx.occurred_at,
        });
        let view = self.stage_disposition(ctx, grn_id, line_id, &command)?;
        info!(tenant_id = %ctx.tenant_id, grn_item_id = %line_id, disposition = view.disposition.as_str(), "disposition resolved");
        Ok(view)
    }

    fn stage_disposition(
        &self,
        ctx: &ActionContext,
        grn_id: AggregateId,
        line_id: AggregateId,
        command: &DispositionCommand,
    ) -> EngineResult<DispositionView> {
        let (view, _) = self.dispatcher.run(ctx.tenant_id, |uow| {
            let mut record = load_record(uow, grn_id, line_id)?;
            uow.stage(&mut record, command)?;
            Ok(DispositionView::from_record(grn_id, &record))
        })?;
        Ok(view)
    }
}

/// Disposition record of `line_id`, which must belong to goods receipt `grn_id`.
fn load_record<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    grn_id: AggregateId,
    line_id: AggregateId,
) -> EngineResult<DispositionRecord> {
    let grn = load_document(uow, grn_id, DocumentType::GoodsReceipt)?;
    if grn.line(line_id).is_none() {
        return Err(DispatchError::NotFound(format!("line {line_id} on goods receipt {grn_id}")));
    }

    let record = uow.load(line_id, DISPOSITION_AGGREGATE, DispositionRecord::empty)?;
    if !record.is_created() || record.tenant_id() != Some(uow.tenant_id()) || record.grn_id() != Some(grn_id) {
        return Err(DispatchError::NotFound(format!("disposition for line {line_id}")));
    }
    Ok(record)
}
