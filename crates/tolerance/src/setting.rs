use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tallyerp_core::{AggregateId, CompanyId, DomainError, DomainResult, ProductId, TenantId};
use tallyerp_core::quantity::ensure_percentage;

/// Tolerance setting identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToleranceId(pub AggregateId);

impl ToleranceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ToleranceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ToleranceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Scope a setting applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToleranceLevel {
    Product,
    Category,
    Company,
}

impl ToleranceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToleranceLevel::Product => "PRODUCT",
            ToleranceLevel::Category => "CATEGORY",
            ToleranceLevel::Company => "COMPANY",
        }
    }
}

impl core::str::FromStr for ToleranceLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRODUCT" => Ok(ToleranceLevel::Product),
            "CATEGORY" => Ok(ToleranceLevel::Category),
            "COMPANY" => Ok(ToleranceLevel::Company),
            other => Err(DomainError::validation(format!(
                "level must be PRODUCT, CATEGORY or COMPANY (got {other:?})"
            ))),
        }
    }
}

/// A tenant's tolerance rule for one scope.
///
/// `scope_key` is a product id, a category name or a company id depending on
/// `level`. Category names are matched verbatim (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceSetting {
    pub id: ToleranceId,
    pub tenant_id: TenantId,
    pub level: ToleranceLevel,
    pub scope_key: String,
    pub under_pct: Decimal,
    pub over_pct: Decimal,
    pub unlimited_over: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToleranceSetting {
    /// Build a new active setting, validating scope key and percentages.
    pub fn new(
        tenant_id: TenantId,
        level: ToleranceLevel,
        scope_key: impl Into<String>,
        under_pct: Decimal,
        over_pct: Decimal,
        unlimited_over: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let scope_key = normalize_scope_key(level, scope_key.into())?;
        ensure_percentage("underDeliveryTolerance", under_pct)?;
        ensure_percentage("overDeliveryTolerance", over_pct)?;

        Ok(Self {
            id: ToleranceId::new(AggregateId::new()),
            tenant_id,
            level,
            scope_key,
            under_pct,
            over_pct,
            unlimited_over,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this setting applies to the given scope at its level.
    pub fn matches(&self, product_id: ProductId, category: Option<&str>, company_id: CompanyId) -> bool {
        if !self.is_active {
            return false;
        }
        match self.level {
            ToleranceLevel::Product => self.scope_key == product_id.to_string(),
            ToleranceLevel::Category => category.is_some_and(|c| c == self.scope_key),
            ToleranceLevel::Company => self.scope_key == company_id.to_string(),
        }
    }

    /// Project an update onto a copy of this setting.
    pub fn updated(&self, update: &ToleranceUpdate, now: DateTime<Utc>) -> DomainResult<Self> {
        let mut next = self.clone();
        if let Some(under) = update.under_pct {
            ensure_percentage("underDeliveryTolerance", under)?;
            next.under_pct = under;
        }
        if let Some(over) = update.over_pct {
            ensure_percentage("overDeliveryTolerance", over)?;
            next.over_pct = over;
        }
        if let Some(unlimited) = update.unlimited_over {
            next.unlimited_over = unlimited;
        }
        if let Some(active) = update.is_active {
            next.is_active = active;
        }
        next.updated_at = now;
        Ok(next)
    }
}

/// Partial update of a setting; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceUpdate {
    pub under_pct: Option<Decimal>,
    pub over_pct: Option<Decimal>,
    pub unlimited_over: Option<bool>,
    pub is_active: Option<bool>,
}

fn normalize_scope_key(level: ToleranceLevel, raw: String) -> DomainResult<String> {
    match level {
        ToleranceLevel::Product | ToleranceLevel::Company => {
            let uuid = Uuid::parse_str(raw.trim()).map_err(|e| {
                DomainError::validation(format!(
                    "scopeKey for {} level must be a UUID: {e}",
                    level.as_str()
                ))
            })?;
            Ok(uuid.to_string())
        }
        ToleranceLevel::Category => {
            if raw.trim().is_empty() {
                return Err(DomainError::validation("scopeKey for CATEGORY level cannot be blank"));
            }
            Ok(raw)
        }
    }
}

/// At most one active setting per `(tenant, level, scope_key)`.
///
/// `candidate` is checked against `existing`, ignoring the entry with the
/// candidate's own id (so an update does not collide with itself).
pub fn ensure_unique(existing: &[ToleranceSetting], candidate: &ToleranceSetting) -> DomainResult<()> {
    if !candidate.is_active {
        return Ok(());
    }
    let clash = existing.iter().any(|s| {
        s.id != candidate.id
            && s.is_active
            && s.tenant_id == candidate.tenant_id
            && s.level == candidate.level
            && s.scope_key == candidate.scope_key
    });
    if clash {
        return Err(DomainError::duplicate(format!(
            "an active {} tolerance already exists for scope {}",
            candidate.level.as_str(),
            candidate.scope_key
        )));
    }
    Ok(())
}
