use tallyerp_core::{CompanyId, TenantId, UserId};
use tallyerp_infra::engine::ActionContext;

/// Caller context of a request, taken from the gateway headers.
///
/// Immutable and present on every domain route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: TenantId,
    company_id: CompanyId,
    principal_id: UserId,
    idempotency_key: Option<String>,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, company_id: CompanyId, principal_id: UserId) -> Self {
        Self {
            tenant_id,
            company_id,
            principal_id,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn principal_id(&self) -> UserId {
        self.principal_id
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Engine context stamped with the current time.
    pub fn action(&self) -> ActionContext {
        let ctx = ActionContext::new(self.tenant_id, self.company_id, self.principal_id);
        match &self.idempotency_key {
            Some(key) => ctx.with_idempotency_key(key.clone()),
            None => ctx,
        }
    }
}
