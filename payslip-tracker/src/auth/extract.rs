use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sea_orm::DatabaseConnection;
use tracker_orm::{ActiveRecord, ApiError, Lookup, transact};

use super::{AuthError, TokenKind, TokenService};
use crate::account::user;
use crate::routes::AppState;

/// The token of a `Bearer <token>` value; the scheme is case-insensitive.
#[must_use]
pub fn bearer_value(raw: &str) -> Option<&str> {
    let (scheme, token) = raw.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty()).then_some(token)
}

#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_value)
}

/// Resolves an access token to its user.
///
/// # Errors
/// Token failures, `WrongKind` for non-access tokens, `InvalidToken` when
/// the user no longer exists and `MissingRole` for a token without a role.
pub async fn resolve_user(
    db: &DatabaseConnection,
    tokens: &TokenService,
    token: &str,
) -> Result<user::Model, AuthError> {
    let claims = tokens.validate(token, false)?;
    claims.expect_kind(TokenKind::Access)?;
    let id = claims.subject()?;

    let found = transact::<_, AuthError, _>(db, |s| {
        Box::pin(async move { Ok(user::Entity::get(s, Lookup::by_id(id)).await?) })
    })
    .await?;
    let Some(found) = found else {
        tracing::debug!(%id, "token subject has no user");
        return Err(AuthError::InvalidToken);
    };
    if claims.role.is_none() {
        return Err(AuthError::MissingRole);
    }
    Ok(found.into_model())
}

/// The authenticated caller of a REST handler.
pub struct CurrentUser(pub user::Model);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let user = resolve_user(&state.db, &state.tokens, token).await?;
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer_value("Bearer abc"), Some("abc"));
        assert_eq!(bearer_value("bearer  abc "), Some("abc"));
        assert_eq!(bearer_value("Basic abc"), None);
        assert_eq!(bearer_value("Bearer "), None);
        assert_eq!(bearer_value("abc"), None);

        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t0k"));
        assert_eq!(bearer_token(&headers), Some("t0k"));
    }
}
