//! Bearer token check for the exam routes

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use log::warn;
use std::sync::Arc;

use crate::AppState;

/// Passes when no API token is configured, or when the request carries
/// `Authorization: Bearer <token>` matching it.
pub struct Authorized;

impl FromRequestParts<Arc<AppState>> for Authorized {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_token.as_deref() else {
            return Ok(Authorized);
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if token != expected {
            warn!("Rejected request to {} with an unknown API token", parts.uri.path());
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Authorized)
    }
}
