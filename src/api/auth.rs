// =============================================================================
// Admin Token Guard — control routes only
// =============================================================================
//
// `AdminGuard` is an extractor placed first in every control handler. It
// admits a request only when `Authorization: Bearer <token>` matches the
// configured `ANALYZER_ADMIN_TOKEN`. With no token configured every control
// request is refused. Read-only routes never use it.
// =============================================================================

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::app_state::AppState;

/// Proof that the request carried the admin token.
pub struct AdminGuard;

/// Why a control request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    NotConfigured,
    MissingToken,
    WrongToken,
}

impl Denied {
    fn message(self) -> &'static str {
        match self {
            Denied::NotConfigured => "control routes are disabled: no admin token configured",
            Denied::MissingToken => "missing bearer token",
            Denied::WrongToken => "invalid bearer token",
        }
    }
}

impl IntoResponse for Denied {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "ok": false, "error": self.message() });
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

/// Decide whether `header` (the raw `Authorization` value) grants access.
pub fn check_admin(header: Option<&str>, expected: Option<&str>) -> Result<(), Denied> {
    let expected = expected.filter(|t| !t.is_empty()).ok_or(Denied::NotConfigured)?;
    let presented = header
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(Denied::MissingToken)?;
    if tokens_match(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(Denied::WrongToken)
    }
}

/// Length-checked comparison that visits every byte.
fn tokens_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminGuard {
    type Rejection = Denied;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        check_admin(header, state.admin_token.as_deref()).map_err(|denied| {
            warn!(reason = ?denied, path = %parts.uri.path(), "control request refused");
            denied
        })?;
        Ok(AdminGuard)
    }
}
