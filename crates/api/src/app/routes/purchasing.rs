use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post},
};

use tallyerp_core::AggregateId;
use tallyerp_documents::DocumentType;

use crate::app::routes::documents;
use crate::app::{dto, errors, services::AppServices};
use crate::context::RequestContext;

pub fn purchase_orders() -> Router {
    Router::new()
        .route("/", post(create_purchase_order))
        .merge(documents::router(DocumentType::PurchaseOrder))
}

pub fn goods_receipts() -> Router {
    Router::new()
        .route("/", post(create_goods_receipt))
        .route("/:id/lines/:line_id/disposition", get(get_disposition).post(update_disposition))
        .route("/:id/lines/:line_id/disposition/resolve", post(resolve_disposition))
        .merge(documents::router(DocumentType::GoodsReceipt))
}

pub fn purchase_invoices() -> Router {
    Router::new()
        .route("/", post(create_invoice))
        .merge(documents::router(DocumentType::PurchaseInvoice))
}

pub async fn create_purchase_order(
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
        .create_document(&ctx.action(), DocumentType::PurchaseOrder, req.warehouse_id, None, req.lines())
    {
        Ok(doc) => documents::created(&doc),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_goods_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    let req: dto::CreateGoodsReceiptRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .create_goods_receipt(&ctx.action(), req.purchase_order_id, req.warehouse_id, req.lines())
    {
        Ok(doc) => documents::created(&doc),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    let req: dto::CreateInvoiceRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().create_invoice(&ctx.action(), req.lines()) {
        Ok(doc) => documents::created(&doc),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

fn line_path(id: &str, line_id: &str) -> Result<(AggregateId, AggregateId), axum::response::Response> {
    Ok((
        errors::parse_id(id, "goods receipt id")?,
        errors::parse_id(line_id, "line id")?,
    ))
}

pub async fn get_disposition(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, line_id)): Path<(String, String)>,
) -> axum::response::Response {
    let (grn_id, line_id) = match line_path(&id, &line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().get_disposition(&ctx.action(), grn_id, line_id) {
        Ok(view) => Json(dto::disposition_to_json(&view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_disposition(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, line_id)): Path<(String, String)>,
    body: Bytes,
) -> axum::response::Response {
    let (grn_id, line_id) = match line_path(&id, &line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let req: dto::UpdateDispositionRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .update_disposition(&ctx.action(), grn_id, line_id, req.disposition, req.notes)
    {
        Ok(view) => Json(dto::disposition_to_json(&view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn resolve_disposition(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, line_id)): Path<(String, String)>,
    body: Bytes,
) -> axum::response::Response {
    let (grn_id, line_id) = match line_path(&id, &line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let req: dto::ResolveDispositionRequest = match dto::parse_optional_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .resolve_disposition(&ctx.action(), grn_id, line_id, req.disposition, req.notes)
    {
        Ok(view) => Json(dto::disposition_to_json(&view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
