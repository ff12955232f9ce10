use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post},
};

use tallyerp_core::WarehouseId;
use tallyerp_documents::DocumentType;

use crate::app::routes::documents;
use crate::app::{dto, errors, services::AppServices};
use crate::context::RequestContext;

pub fn stock_transfers() -> Router {
    Router::new()
        .route("/", post(create_transfer))
        .merge(documents::router(DocumentType::StockTransfer))
}

pub fn inventory_adjustments() -> Router {
    Router::new()
        .route("/", post(create_adjustment))
        .merge(documents::router(DocumentType::InventoryAdjustment))
}

pub fn stock_opnames() -> Router {
    Router::new()
        .route("/", post(create_opname))
        .merge(documents::router(DocumentType::StockOpname))
}

pub fn warehouses() -> Router {
    Router::new().route("/:id/stock", get(get_warehouse_stock))
}

async fn create_standalone(
    services: &AppServices,
    ctx: &RequestContext,
    doc_type: DocumentType,
    body: &Bytes,
) -> axum::response::Response {
    let req: dto::CreateDocumentRequest = match dto::parse_json(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().create_document(
        &ctx.action(),
        doc_type,
        req.warehouse_id,
        req.destination_warehouse_id,
        req.lines(),
    ) {
        Ok(doc) => documents::created(&doc),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    create_standalone(&services, &ctx, DocumentType::StockTransfer, &body).await
}

/// Lines carry signed quantities: positive adds stock, negative removes it.
pub async fn create_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    create_standalone(&services, &ctx, DocumentType::InventoryAdjustment, &body).await
}

pub async fn create_opname(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    let req: dto::CreateOpnameRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().create_opname(&ctx.action(), req.warehouse_id, req.product_ids) {
        Ok(doc) => documents::created(&doc),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_warehouse_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let warehouse_id: WarehouseId = match errors::parse_id(&id, "warehouse id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().warehouse_stock(&ctx.action(), warehouse_id) {
        Ok(stock) => Json(dto::stock_to_json(&stock)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
