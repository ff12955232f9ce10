use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, sse::Event as SseEvent},
};

use crate::app::services::{self, AppServices};
use crate::context::RequestContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "tenantId": ctx.tenant_id().to_string(),
        "companyId": ctx.company_id().to_string(),
        "principalId": ctx.principal_id().to_string(),
    }))
}

/// Server-sent stream of the caller's tenant's committed events.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::tenant_sse_stream(services, ctx.tenant_id())
}
