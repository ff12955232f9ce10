//! Master-data collaborators consulted by document actions.
//!
//! Products and company policies are owned elsewhere; the engine only reads
//! the few attributes it needs. The in-memory directories are seeded by the
//! host (or by tests).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use tallyerp_core::{CompanyId, ProductId, TenantId};
use tallyerp_reconciliation::InvoiceControlPolicy;

/// Catalog attributes relevant to reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub category: Option<String>,
    pub is_batch_tracked: bool,
    pub is_perishable: bool,
}

pub trait ProductCatalog: Send + Sync {
    /// `None` for products the catalog does not know; those resolve
    /// tolerances without a category.
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductInfo>;
}

pub trait CompanyPolicies: Send + Sync {
    fn invoice_control(&self, tenant_id: TenantId, company_id: CompanyId) -> InvoiceControlPolicy;
}

impl<T: ProductCatalog + ?Sized> ProductCatalog for Arc<T> {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductInfo> {
        (**self).product(tenant_id, product_id)
    }
}

impl<T: CompanyPolicies + ?Sized> CompanyPolicies for Arc<T> {
    fn invoice_control(&self, tenant_id: TenantId, company_id: CompanyId) -> InvoiceControlPolicy {
        (**self).invoice_control(tenant_id, company_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    inner: RwLock<HashMap<(TenantId, ProductId), ProductInfo>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: TenantId, product_id: ProductId, info: ProductInfo) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, product_id), info);
        }
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductInfo> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, product_id)).cloned()
    }
}

/// Per-company invoice control with a configured fallback.
#[derive(Debug, Default)]
pub struct InMemoryCompanyPolicies {
    default_policy: InvoiceControlPolicy,
    overrides: RwLock<HashMap<(TenantId, CompanyId), InvoiceControlPolicy>>,
}

impl InMemoryCompanyPolicies {
    pub fn new(default_policy: InvoiceControlPolicy) -> Self {
        Self {
            default_policy,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, tenant_id: TenantId, company_id: CompanyId, policy: InvoiceControlPolicy) {
        if let Ok(mut map) = self.overrides.write() {
            map.insert((tenant_id, company_id), policy);
        }
    }
}

impl CompanyPolicies for InMemoryCompanyPolicies {
    fn invoice_control(&self, tenant_id: TenantId, company_id: CompanyId) -> InvoiceControlPolicy {
        self.overrides
            .read()
            .ok()
            .and_then(|map| map.get(&(tenant_id, company_id)).copied())
            .unwrap_or(self.default_policy)
    }
}
