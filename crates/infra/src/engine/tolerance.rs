//! Tolerance setting administration and effective-tolerance lookups.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use tallyerp_core::{CompanyId, ProductId};
use tallyerp_events::{EventBus, EventEnvelope};
use tallyerp_tolerance::{ResolvedTolerance, ToleranceId, ToleranceLevel, ToleranceSetting, ToleranceUpdate};

use super::{ActionContext, DocumentEngine, EngineResult};
use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTolerance {
    pub level: ToleranceLevel,
    pub scope_key: String,
    pub under_pct: Decimal,
    pub over_pct: Decimal,
    pub unlimited_over: bool,
}

impl<S, B> DocumentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, level = input.level.as_str()), err)]
    pub fn create_tolerance(&self, ctx: &ActionContext, input: NewTolerance) -> EngineResult<ToleranceSetting> {
        let setting = ToleranceSetting::new(
            ctx.tenant_id,
            input.level,
            input.scope_key,
            input.under_pct,
            input.over_pct,
            input.unlimited_over,
            ctx.occurred_at,
        )?;
        let stored = self.tolerances.insert(setting)?;
        info!(tenant_id = %ctx.tenant_id, tolerance_id = %stored.id, level = stored.level.as_str(), scope_key = %stored.scope_key, "tolerance created");
        Ok(stored)
    }

    pub fn get_tolerance(&self, ctx: &ActionContext, id: ToleranceId) -> EngineResult<ToleranceSetting> {
        self.tolerances
            .get(ctx.tenant_id, id)?
            .ok_or_else(|| DispatchError::NotFound(format!("tolerance setting {id}")))
    }

    pub fn list_tolerances(&self, ctx: &ActionContext) -> EngineResult<Vec<ToleranceSetting>> {
        Ok(self.tolerances.list(ctx.tenant_id)?)
    }

    #[instrument(skip(self, ctx, update), fields(tenant_id = %ctx.tenant_id, tolerance_id = %id), err)]
    pub fn update_tolerance(&self, ctx: &ActionContext, id: ToleranceId, update: ToleranceUpdate) -> EngineResult<ToleranceSetting> {
        let stored = self.tolerances.update(ctx.tenant_id, id, &update, ctx.occurred_at)?;
        info!(tenant_id = %ctx.tenant_id, tolerance_id = %id, is_active = stored.is_active, "tolerance updated");
        Ok(stored)
    }

    /// Activate or deactivate a setting. Reactivation fails if another
    /// active setting has taken the scope meanwhile.
    pub fn set_tolerance_active(&self, ctx: &ActionContext, id: ToleranceId, active: bool) -> EngineResult<ToleranceSetting> {
        let update = ToleranceUpdate {
            is_active: Some(active),
            ..Default::default()
        };
        self.update_tolerance(ctx, id, update)
    }

    /// Tolerance that would apply to `product_id` for `company_id`, or the
    /// caller's company when none is given.
    pub fn effective_tolerance(
        &self,
        ctx: &ActionContext,
        product_id: ProductId,
        company_id: Option<CompanyId>,
    ) -> EngineResult<ResolvedTolerance> {
        let settings = self.tolerance_settings(ctx.tenant_id)?;
        Ok(self.resolve_with(&settings, ctx.tenant_id, product_id, company_id.unwrap_or(ctx.company_id)))
    }
}
