//! Token authentication shared by the WebSocket handshake and REST ingress.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use relay_common::error::AppError;
use relay_common::token::is_valid_format;
use relay_common::types::Principal;

use crate::directory::Directory;
use crate::state::AppState;

/// Resolve a token to its principal.
///
/// Malformed and unknown tokens are both `Forbidden`; the format check runs
/// first so garbage never reaches the directory.
pub async fn authenticate_token(directory: &Directory, token: &str) -> Result<Principal, AppError> {
    if !is_valid_format(token) {
        return Err(AppError::Forbidden("Invalid token format".to_string()));
    }

    directory
        .lookup_by_token(token)
        .await?
        .ok_or_else(|| AppError::Forbidden("Invalid token".to_string()))
}

/// Principal authenticated from an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let directory = state.directory.clone();

        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.trim().to_string());

        async move {
            let token = token.ok_or_else(|| {
                AppError::Auth("Missing Authorization header. Use 'Bearer <token>'".to_string())
            })?;
            let principal = authenticate_token(&directory, &token).await?;
            Ok(AuthPrincipal(principal))
        }
    }
}
