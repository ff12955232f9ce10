//! Tenant-isolated persistence for tolerance settings.
//!
//! Settings are plain records rather than event streams; the store enforces
//! the single-active-setting-per-scope rule on insert and update.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;

use tallyerp_core::{AggregateId, DomainError, TenantId};
use tallyerp_tolerance::{ToleranceId, ToleranceLevel, ToleranceSetting, ToleranceUpdate, ensure_unique};

use crate::command_dispatcher::DispatchError;
use crate::event_store::postgres::{block_on, is_unique_violation, map_sqlx_error};
use crate::event_store::EventStoreError;

#[derive(Debug, Error)]
pub enum ToleranceStoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("tolerance store backend failure: {0}")]
    Backend(String),
}

impl From<EventStoreError> for ToleranceStoreError {
    fn from(value: EventStoreError) -> Self {
        ToleranceStoreError::Backend(value.to_string())
    }
}

impl From<ToleranceStoreError> for DispatchError {
    fn from(value: ToleranceStoreError) -> Self {
        match value {
            ToleranceStoreError::Domain(e) => DispatchError::from(e),
            ToleranceStoreError::Backend(msg) => DispatchError::Internal(msg),
        }
    }
}

pub trait ToleranceStore: Send + Sync {
    /// Store a new setting. Fails with a duplicate conflict if it is active
    /// and another active setting already covers the same scope.
    fn insert(&self, setting: ToleranceSetting) -> Result<ToleranceSetting, ToleranceStoreError>;

    /// Apply a partial update (including activation toggles).
    fn update(
        &self,
        tenant_id: TenantId,
        id: ToleranceId,
        update: &ToleranceUpdate,
        now: DateTime<Utc>,
    ) -> Result<ToleranceSetting, ToleranceStoreError>;

    fn get(&self, tenant_id: TenantId, id: ToleranceId) -> Result<Option<ToleranceSetting>, ToleranceStoreError>;

    /// Every setting of a tenant, active or not, oldest first.
    fn list(&self, tenant_id: TenantId) -> Result<Vec<ToleranceSetting>, ToleranceStoreError>;
}

impl<S> ToleranceStore for Arc<S>
where
    S: ToleranceStore + ?Sized,
{
    fn insert(&self, setting: ToleranceSetting) -> Result<ToleranceSetting, ToleranceStoreError> {
        (**self).insert(setting)
    }

    fn update(
        &self,
        tenant_id: TenantId,
        id: ToleranceId,
        update: &ToleranceUpdate,
        now: DateTime<Utc>,
    ) -> Result<ToleranceSetting, ToleranceStoreError> {
        (**self).update(tenant_id, id, update, now)
    }

    fn get(&self, tenant_id: TenantId, id: ToleranceId) -> Result<Option<ToleranceSetting>, ToleranceStoreError> {
        (**self).get(tenant_id, id)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<ToleranceSetting>, ToleranceStoreError> {
        (**self).list(tenant_id)
    }
}

fn not_found(id: ToleranceId) -> ToleranceStoreError {
    DomainError::not_found(format!("tolerance setting {id}")).into()
}

/// In-memory tenant-isolated store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryToleranceStore {
    inner: RwLock<HashMap<TenantId, Vec<ToleranceSetting>>>,
}

impl InMemoryToleranceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ToleranceStoreError {
    ToleranceStoreError::Backend("lock poisoned".to_string())
}

impl ToleranceStore for InMemoryToleranceStore {
    fn insert(&self, setting: ToleranceSetting) -> Result<ToleranceSetting, ToleranceStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let settings = map.entry(setting.tenant_id).or_default();
        ensure_unique(settings, &setting)?;
        settings.push(setting.clone());
        Ok(setting)
    }

    fn update(
        &self,
        tenant_id: TenantId,
        id: ToleranceId,
        update: &ToleranceUpdate,
        now: DateTime<Utc>,
    ) -> Result<ToleranceSetting, ToleranceStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let settings = map.get_mut(&tenant_id).ok_or_else(|| not_found(id))?;
        let idx = settings.iter().position(|s| s.id == id).ok_or_else(|| not_found(id))?;

        let next = settings[idx].updated(update, now)?;
        ensure_unique(settings, &next)?;
        settings[idx] = next.clone();
        Ok(next)
    }

    fn get(&self, tenant_id: TenantId, id: ToleranceId) -> Result<Option<ToleranceSetting>, ToleranceStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .get(&tenant_id)
            .and_then(|settings| settings.iter().find(|s| s.id == id))
            .cloned())
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<ToleranceSetting>, ToleranceStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(&tenant_id).cloned().unwrap_or_default())
    }
}

/// Postgres-backed store over the `tolerance_settings` table.
///
/// The partial unique index on active `(tenant_id, level, scope_key)` closes
/// the race between two concurrent inserts for the same scope. Like the event
/// store it blocks the calling thread and needs a multi-threaded tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresToleranceStore {
    pool: Arc<PgPool>,
}

impl PostgresToleranceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    #[instrument(skip(self, setting), fields(tenant_id = %setting.tenant_id, level = setting.level.as_str()), err)]
    async fn insert_async(&self, setting: ToleranceSetting) -> Result<ToleranceSetting, ToleranceStoreError> {
        sqlx::query(
            r#"
            INSERT INTO tolerance_settings (
                id, tenant_id, level, scope_key, under_pct, over_pct,
                unlimited_over, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(setting.id.0.as_uuid())
        .bind(setting.tenant_id.as_uuid())
        .bind(setting.level.as_str())
        .bind(&setting.scope_key)
        .bind(setting.under_pct)
        .bind(setting.over_pct)
        .bind(setting.unlimited_over)
        .bind(setting.is_active)
        .bind(setting.created_at)
        .bind(setting.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| duplicate_or_backend(&setting, "insert_tolerance", e))?;
        Ok(setting)
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, tolerance_id = %id), err)]
    async fn update_async(
        &self,
        tenant_id: TenantId,
        id: ToleranceId,
        update: &ToleranceUpdate,
        now: DateTime<Utc>,
    ) -> Result<ToleranceSetting, ToleranceStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!("{SELECT_SETTING} WHERE tenant_id = $1 AND id = $2 FOR UPDATE"))
            .bind(tenant_id.as_uuid())
            .bind(id.0.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_tolerance", e))?;
        let current = match row {
            Some(row) => decode_setting(&row)?,
            None => return Err(not_found(id)),
        };

        let next = current.updated(update, now)?;
        sqlx::query(
            r#"
            UPDATE tolerance_settings
            SET under_pct = $3, over_pct = $4, unlimited_over = $5, is_active = $6, updated_at = $7
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(id.0.as_uuid())
        .bind(next.under_pct)
        .bind(next.over_pct)
        .bind(next.unlimited_over)
        .bind(next.is_active)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_or_backend(&next, "update_tolerance", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(next)
    }

    async fn get_async(&self, tenant_id: TenantId, id: ToleranceId) -> Result<Option<ToleranceSetting>, ToleranceStoreError> {
        let row = sqlx::query(&format!("{SELECT_SETTING} WHERE tenant_id = $1 AND id = $2"))
            .bind(tenant_id.as_uuid())
            .bind(id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_tolerance", e))?;
        row.as_ref().map(decode_setting).transpose()
    }

    async fn list_async(&self, tenant_id: TenantId) -> Result<Vec<ToleranceSetting>, ToleranceStoreError> {
        let rows = sqlx::query(&format!("{SELECT_SETTING} WHERE tenant_id = $1 ORDER BY created_at ASC"))
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_tolerances", e))?;
        rows.iter().map(decode_setting).collect()
    }
}

const SELECT_SETTING: &str = r#"
    SELECT id, tenant_id, level, scope_key, under_pct, over_pct,
           unlimited_over, is_active, created_at, updated_at
    FROM tolerance_settings"#;

fn decode_setting(row: &sqlx::postgres::PgRow) -> Result<ToleranceSetting, ToleranceStoreError> {
    let decode = |e: sqlx::Error| ToleranceStoreError::Backend(format!("failed to decode tolerance row: {e}"));
    let level: String = row.try_get("level").map_err(decode)?;
    Ok(ToleranceSetting {
        id: ToleranceId::new(AggregateId::from_uuid(row.try_get("id").map_err(decode)?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        level: level.parse::<ToleranceLevel>()?,
        scope_key: row.try_get("scope_key").map_err(decode)?,
        under_pct: row.try_get::<Decimal, _>("under_pct").map_err(decode)?,
        over_pct: row.try_get::<Decimal, _>("over_pct").map_err(decode)?,
        unlimited_over: row.try_get("unlimited_over").map_err(decode)?,
        is_active: row.try_get("is_active").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn duplicate_or_backend(setting: &ToleranceSetting, operation: &str, err: sqlx::Error) -> ToleranceStoreError {
    if is_unique_violation(&err) {
        return DomainError::duplicate(format!(
            "an active {} tolerance already exists for scope {}",
            setting.level.as_str(),
            setting.scope_key
        ))
        .into();
    }
    map_sqlx_error(operation, err).into()
}

impl ToleranceStore for PostgresToleranceStore {
    fn insert(&self, setting: ToleranceSetting) -> Result<ToleranceSetting, ToleranceStoreError> {
        block_on(self.insert_async(setting))
    }

    fn update(
        &self,
        tenant_id: TenantId,
        id: ToleranceId,
        update: &ToleranceUpdate,
        now: DateTime<Utc>,
    ) -> Result<ToleranceSetting, ToleranceStoreError> {
        block_on(self.update_async(tenant_id, id, update, now))
    }

    fn get(&self, tenant_id: TenantId, id: ToleranceId) -> Result<Option<ToleranceSetting>, ToleranceStoreError> {
        block_on(self.get_async(tenant_id, id))
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<ToleranceSetting>, ToleranceStoreError> {
        block_on(self.list_async(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tallyerp_core::{ConflictKind, ProductId};

    fn product_setting(tenant: TenantId, product: ProductId) -> ToleranceSetting {
        ToleranceSetting::new(tenant, ToleranceLevel::Product, product.to_string(), dec!(5), dec!(10), false, Utc::now())
            .unwrap()
    }

    fn is_duplicate(err: &ToleranceStoreError) -> bool {
        matches!(err, ToleranceStoreError::Domain(DomainError::Conflict(d)) if d.kind == ConflictKind::Duplicate)
    }

    #[test]
    fn second_active_setting_for_a_scope_is_rejected() {
        let store = InMemoryToleranceStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.insert(product_setting(tenant, product)).unwrap();

        let err = store.insert(product_setting(tenant, product)).unwrap_err();
        assert!(is_duplicate(&err));

        // Another tenant may use the same scope.
        store.insert(product_setting(TenantId::new(), product)).unwrap();
    }

    #[test]
    fn reactivating_into_a_taken_scope_is_rejected() {
        let store = InMemoryToleranceStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        let first = store.insert(product_setting(tenant, product)).unwrap();

        let deactivate = ToleranceUpdate { is_active: Some(false), ..Default::default() };
        store.update(tenant, first.id, &deactivate, Utc::now()).unwrap();
        store.insert(product_setting(tenant, product)).unwrap();

        let activate = ToleranceUpdate { is_active: Some(true), ..Default::default() };
        let err = store.update(tenant, first.id, &activate, Utc::now()).unwrap_err();
        assert!(is_duplicate(&err));
        assert!(!store.get(tenant, first.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn settings_are_invisible_across_tenants() {
        let store = InMemoryToleranceStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        let setting = store.insert(product_setting(tenant, product)).unwrap();

        let other = TenantId::new();
        assert!(store.get(other, setting.id).unwrap().is_none());
        let err = store.update(other, setting.id, &ToleranceUpdate::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ToleranceStoreError::Domain(DomainError::NotFound(_))));
    }
}
