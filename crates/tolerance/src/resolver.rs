use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{CompanyId, ProductId};

use crate::setting::{ToleranceId, ToleranceLevel, ToleranceSetting};

/// Where an effective tolerance came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvedFrom {
    Product,
    Category,
    Company,
    Default,
}

impl From<ToleranceLevel> for ResolvedFrom {
    fn from(level: ToleranceLevel) -> Self {
        match level {
            ToleranceLevel::Product => ResolvedFrom::Product,
            ToleranceLevel::Category => ResolvedFrom::Category,
            ToleranceLevel::Company => ResolvedFrom::Company,
        }
    }
}

/// The effective tolerance for a `(product, category, company)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTolerance {
    pub under_pct: Decimal,
    pub over_pct: Decimal,
    pub unlimited_over: bool,
    pub resolved_from: ResolvedFrom,
    pub tolerance_id: Option<ToleranceId>,
}

impl ResolvedTolerance {
    /// Zero tolerance both ways: quantities must match exactly.
    pub fn exact() -> Self {
        Self {
            under_pct: Decimal::ZERO,
            over_pct: Decimal::ZERO,
            unlimited_over: false,
            resolved_from: ResolvedFrom::Default,
            tolerance_id: None,
        }
    }
}

impl From<&ToleranceSetting> for ResolvedTolerance {
    fn from(s: &ToleranceSetting) -> Self {
        Self {
            under_pct: s.under_pct,
            over_pct: s.over_pct,
            unlimited_over: s.unlimited_over,
            resolved_from: s.level.into(),
            tolerance_id: Some(s.id),
        }
    }
}

/// Resolve the effective tolerance: the first active setting matching at
/// PRODUCT, then CATEGORY, then COMPANY level, else zero tolerance.
///
/// `settings` must already be restricted to a single tenant.
pub fn resolve(
    settings: &[ToleranceSetting],
    product_id: ProductId,
    category: Option<&str>,
    company_id: CompanyId,
) -> ResolvedTolerance {
    [ToleranceLevel::Product, ToleranceLevel::Category, ToleranceLevel::Company]
        .into_iter()
        .find_map(|level| {
            settings
                .iter()
                .find(|s| s.level == level && s.matches(product_id, category, company_id))
        })
        .map(ResolvedTolerance::from)
        .unwrap_or_else(ResolvedTolerance::exact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tallyerp_core::TenantId;

    fn setting(tenant: TenantId, level: ToleranceLevel, key: String, under: Decimal, over: Decimal) -> ToleranceSetting {
        ToleranceSetting::new(tenant, level, key, under, over, false, Utc::now()).unwrap()
    }

    #[test]
    fn product_beats_category_beats_company() {
        let tenant = TenantId::new();
        let product = ProductId::new();
        let company = CompanyId::new();

        let by_company = setting(tenant, ToleranceLevel::Company, company.to_string(), dec!(1), dec!(1));
        let by_category = setting(tenant, ToleranceLevel::Category, "Beverages".into(), dec!(5), dec!(10));
        let by_product = setting(tenant, ToleranceLevel::Product, product.to_string(), dec!(2), dec!(3));

        let all = vec![by_company.clone(), by_category.clone(), by_product.clone()];
        let r = resolve(&all, product, Some("Beverages"), company);
        assert_eq!(r.resolved_from, ResolvedFrom::Product);
        assert_eq!(r.tolerance_id, Some(by_product.id));

        let r = resolve(&all[..2], product, Some("Beverages"), company);
        assert_eq!(r.resolved_from, ResolvedFrom::Category);
        assert_eq!((r.under_pct, r.over_pct), (dec!(5), dec!(10)));

        // No category on the product: the category rule is skipped.
        let r = resolve(&all[..2], product, None, company);
        assert_eq!(r.resolved_from, ResolvedFrom::Company);
    }

    #[test]
    fn inactive_settings_are_ignored_and_default_is_exact() {
        let tenant = TenantId::new();
        let product = ProductId::new();
        let mut s = setting(tenant, ToleranceLevel::Product, product.to_string(), dec!(5), dec!(5));
        s.is_active = false;

        let r = resolve(&[s], product, None, CompanyId::new());
        assert_eq!(r, ResolvedTolerance::exact());
        assert_eq!(r.resolved_from, ResolvedFrom::Default);
    }
}
