use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use tallyerp_core::{CompanyId, TenantId, UserId};

use crate::app::errors;
use crate::context::RequestContext;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const COMPANY_HEADER: &str = "x-company-id";
pub const PRINCIPAL_HEADER: &str = "x-principal-id";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Build the request context from the identity headers set by the gateway.
pub async fn context_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    match extract_context(req.headers()) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(response) => response,
    }
}

fn extract_context(headers: &HeaderMap) -> Result<RequestContext, Response> {
    let tenant_id: TenantId = required(headers, TENANT_HEADER)?;
    let company_id: CompanyId = required(headers, COMPANY_HEADER)?;
    let principal_id: UserId = required(headers, PRINCIPAL_HEADER)?;

    let idempotency_key = match headers.get(IDEMPOTENCY_HEADER) {
        None => None,
        Some(value) => {
            let key = value
                .to_str()
                .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "Idempotency-Key must be ASCII"))?
                .trim();
            (!key.is_empty()).then(|| key.to_string())
        }
    };

    Ok(RequestContext::new(tenant_id, company_id, principal_id).with_idempotency_key(idempotency_key))
}

fn required<T: std::str::FromStr>(headers: &HeaderMap, name: &'static str) -> Result<T, Response> {
    let value = headers
        .get(name)
        .ok_or_else(|| errors::json_error(StatusCode::UNAUTHORIZED, "missing_context", format!("{name} header is required")))?;
    let value = value
        .to_str()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{name} is not a valid id")))?;
    value
        .trim()
        .parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{name} is not a valid id")))
}
