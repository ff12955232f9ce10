use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use tallyerp_core::{CompanyId, ProductId};
use tallyerp_tolerance::ToleranceId;

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_tolerance).get(list_tolerances))
        .route("/effective", get(effective_tolerance))
        .route("/:id", get(get_tolerance).put(update_tolerance))
        .route("/:id/activate", post(activate_tolerance))
        .route("/:id/deactivate", post(deactivate_tolerance))
}

pub async fn create_tolerance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> axum::response::Response {
    let req: dto::CreateToleranceRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().create_tolerance(&ctx.action(), req.into()) {
        Ok(setting) => (StatusCode::CREATED, Json(dto::tolerance_to_json(&setting))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_tolerances(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> axum::response::Response {
    match services.engine().list_tolerances(&ctx.action()) {
        Ok(settings) => Json(serde_json::json!({
            "items": settings.iter().map(dto::tolerance_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_tolerance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ToleranceId = match errors::parse_id(&id, "tolerance id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().get_tolerance(&ctx.action(), id) {
        Ok(setting) => Json(dto::tolerance_to_json(&setting)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_tolerance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let id: ToleranceId = match errors::parse_id(&id, "tolerance id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let req: dto::UpdateToleranceRequest = match dto::parse_json(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().update_tolerance(&ctx.action(), id, req.into()) {
        Ok(setting) => Json(dto::tolerance_to_json(&setting)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

async fn set_active(services: &AppServices, ctx: &RequestContext, id: &str, active: bool) -> axum::response::Response {
    let id: ToleranceId = match errors::parse_id(id, "tolerance id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine().set_tolerance_active(&ctx.action(), id, active) {
        Ok(setting) => Json(dto::tolerance_to_json(&setting)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn activate_tolerance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    set_active(&services, &ctx, &id, true).await
}

pub async fn deactivate_tolerance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    set_active(&services, &ctx, &id, false).await
}

pub async fn effective_tolerance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<dto::EffectiveToleranceQuery>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&query.product_id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let company_id: Option<CompanyId> = match query.company_id.as_deref().map(|raw| errors::parse_id(raw, "company id")) {
        Some(Ok(v)) => Some(v),
        Some(Err(resp)) => return resp,
        None => None,
    };

    match services.engine().effective_tolerance(&ctx.action(), product_id, company_id) {
        Ok(resolved) => Json(dto::resolved_tolerance_to_json(&resolved)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
