//! Caller identity from request headers.
//!
//! The tenant comes from `x-tenant-id`. `x-consumer-id` carries the client
//! certificate subject forwarded by the TLS-terminating proxy.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::Response;
use compass_formation::Caller;

use crate::response::error_response;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const CONSUMER_HEADER: &str = "x-consumer-id";

/// Tenant-scoped caller; rejects requests without a tenant.
pub struct TenantCaller(pub Caller);

impl<S: Send + Sync> FromRequestParts<S> for TenantCaller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = header(parts, TENANT_HEADER)
            .ok_or_else(|| error_response("x-tenant-id header is required", StatusCode::BAD_REQUEST))?;
        let mut caller = Caller::tenant(tenant);
        caller.consumer_id = header(parts, CONSUMER_HEADER);
        Ok(Self(caller))
    }
}

/// The forwarded consumer ID, if any.
pub struct Consumer(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for Consumer {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(header(parts, CONSUMER_HEADER)))
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
