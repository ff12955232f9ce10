use std::sync::Arc;

use axum::{Router, body::Bytes, extract::Extension, routing::post};

use tallyerp_documents::DocumentType;

use crate::app::routes::documents;
use crate::app::{dto, errors, services::AppServices};
use crate::context::RequestContext;

pub fn sales_orders() -> Router {
    Router::new()
        .route("/", post(create_sales_order))
        .merge(documents::router(DocumentType::SalesOrder))
}

pub fn deliveries() -> Router {
    Router::new()
        .route("/", post(create_delivery))
        .merge(documents::router(DocumentType::Delivery))
}

pub async fn create_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    let req: dto::CreateDocumentRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .create_document(&ctx.action(), DocumentType::SalesOrder, req.warehouse_id, None, req.lines())
    {
        Ok(doc) => documents::created(&doc),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    let req: dto::CreateDeliveryRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .create_delivery(&ctx.action(), req.sales_order_id, req.warehouse_id, req.lines())
    {
        Ok(doc) => documents::created(&doc),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
