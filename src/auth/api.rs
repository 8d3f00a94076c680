use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::server::jwt;
use super::types::{AuthError, SYSTEM_ROLE};

/// HS256 secret shared by user tokens and the system credential.
#[derive(Clone)]
pub struct AuthKeys {
    secret: Arc<str>,
}

impl AuthKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Resolves a bearer token to the end user it was issued for.
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = jwt::verify_token(token, &self.secret)?;
        if claims.role.as_deref() == Some(SYSTEM_ROLE) {
            return Err(AuthError::NotAUser);
        }
        claims
            .sub
            .parse::<i32>()
            .map(AuthUser)
            .map_err(|_| AuthError::NotAUser)
    }
}

/// The authenticated end user making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i32);

impl AuthUser {
    pub fn id(&self) -> i32 {
        self.0
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        AuthKeys::from_ref(state).authenticate(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SystemCredentials;

    const SECRET: &str = "api_test_secret";

    #[test]
    fn user_tokens_resolve_to_their_numeric_subject() {
        let keys = AuthKeys::new(SECRET);
        let token = jwt::generate_token("7".into(), None, 60, SECRET).unwrap().token;
        assert_eq!(keys.authenticate(&token).unwrap(), AuthUser(7));
    }

    #[test]
    fn system_tokens_are_not_accepted_as_users() {
        let keys = AuthKeys::new(SECRET);
        let token = SystemCredentials::new(SECRET, 60).mint().unwrap();
        assert!(matches!(keys.authenticate(&token), Err(AuthError::NotAUser)));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let request = axum::http::Request::builder()
            .header(AUTHORIZATION, "Token abc")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(bearer_token(&parts), None);
    }
}
