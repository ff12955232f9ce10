//! Handlers shared by every document resource: fetch, actions and line deltas.
//!
//! Each resource router is layered with its `DocumentType`, so one set of
//! handlers serves `/purchase-orders/:id/confirm` and `/deliveries/:id/ship`.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use tallyerp_core::AggregateId;
use tallyerp_documents::{Action, Document, DocumentType};

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequestContext;

/// `GET /:id`, `POST /:id/:action` and `POST /:id/lines/:lineId/deltas` for one type.
pub fn router(doc_type: DocumentType) -> Router {
    Router::new()
        .route("/:id", get(get_document))
        .route("/:id/:action", post(perform_action))
        .route("/:id/lines/:line_id/deltas", post(apply_delta))
        .layer(Extension(doc_type))
}

pub(crate) fn created(doc: &Document) -> axum::response::Response {
    (StatusCode::CREATED, Json(dto::document_to_json(doc))).into_response()
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(doc_type): Extension<DocumentType>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AggregateId = match errors::parse_id(&id, "document id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().get_document(&ctx.action(), doc_type, id) {
        Ok(doc) => Json(dto::document_to_json(&doc)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn perform_action(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(doc_type): Extension<DocumentType>,
    Path((id, action)): Path<(String, String)>,
    body: Bytes,
) -> axum::response::Response {
    let id: AggregateId = match errors::parse_id(&id, "document id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let action: Action = match action.parse() {
        Ok(a) => a,
        Err(_) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("unknown action {action}")),
    };
    let input = match dto::parse_optional_json::<dto::ActionRequest>(&body).and_then(dto::ActionRequest::into_input) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().perform(&ctx.action(), doc_type, id, action, input) {
        Ok(outcome) => Json(dto::outcome_to_json(&outcome)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn apply_delta(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(doc_type): Extension<DocumentType>,
    Path((id, line_id)): Path<(String, String)>,
    body: Bytes,
) -> axum::response::Response {
    let id: AggregateId = match errors::parse_id(&id, "document id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let line_id: AggregateId = match errors::parse_id(&line_id, "line id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let req: dto::ApplyDeltaRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .apply_delta(&ctx.action(), doc_type, id, line_id, req.field, req.delta)
    {
        Ok(doc) => Json(dto::document_to_json(&doc)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
