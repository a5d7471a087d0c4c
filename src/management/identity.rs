//! Identity extraction for the management HTTP surface. Real JWT/OIDC
//! verification is out of scope (spec.md §9 delegates `ForbiddenError`
//! enforcement to "an external authorization collaborator") — this is that
//! collaborator's seam, modeled on the teacher's `auth::jwt::AuthUser`
//! extractor so the rest of the router can depend on a typed identity
//! without caring how it was established.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use async_trait::async_trait;

/// The authenticated management user attached to a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub tenant_id: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authenticate(&self, bearer_token: &str) -> Result<AuthUser, IdentityError>;
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed bearer token")]
    Malformed,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Reads `tenant_id:user_id` out of the bearer token verbatim. Sufficient to
/// compile and exercise the rest of the management surface against; a real
/// deployment swaps this for an OIDC/JWT-backed `IdentityProvider`.
pub struct StaticTokenIdentityProvider;

impl IdentityProvider for StaticTokenIdentityProvider {
    fn authenticate(&self, bearer_token: &str) -> Result<AuthUser, IdentityError> {
        let mut parts = bearer_token.splitn(2, ':');
        let tenant_id = parts.next().filter(|s| !s.is_empty()).ok_or(IdentityError::Malformed)?;
        let user_id = parts.next().filter(|s| !s.is_empty()).ok_or(IdentityError::Malformed)?;
        Ok(AuthUser { user_id: user_id.to_string(), tenant_id: tenant_id.to_string() })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    std::sync::Arc<dyn IdentityProvider>: axum::extract::FromRef<S>,
{
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let provider = std::sync::Arc::<dyn IdentityProvider>::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(IdentityError::Missing)?;
        let token = header.strip_prefix("Bearer ").ok_or(IdentityError::Malformed)?;
        provider.authenticate(token)
    }
}
