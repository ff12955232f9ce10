//! Seeding of the product catalog and company invoice policies.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::put,
};
use serde_json::json;

use tallyerp_core::{CompanyId, ProductId};
use tallyerp_infra::directory::ProductInfo;

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/catalog/products/:id", put(register_product))
        .route("/companies/:id/invoice-policy", put(set_invoice_policy))
}

pub async fn register_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let info: ProductInfo = match dto::parse_optional_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    services.catalog().register(ctx.tenant_id(), product_id, info.clone());
    tracing::info!(tenant_id = %ctx.tenant_id(), product_id = %product_id, "product registered");

    Json(json!({
        "productId": product_id.to_string(),
        "category": info.category,
        "isBatchTracked": info.is_batch_tracked,
        "isPerishable": info.is_perishable,
    }))
    .into_response()
}

pub async fn set_invoice_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let company_id: CompanyId = match errors::parse_id(&id, "company id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let req: dto::InvoicePolicyRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    services.policies().set(ctx.tenant_id(), company_id, req.invoice_control_policy);
    tracing::info!(tenant_id = %ctx.tenant_id(), company_id = %company_id, "invoice policy set");

    Json(json!({
        "companyId": company_id.to_string(),
        "invoiceControlPolicy": req.invoice_control_policy,
    }))
    .into_response()
}
