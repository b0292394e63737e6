//! # Authentication
//!
//! Credentials live with an external identity provider ([`IdentityProvider`]).
//! The API issues its own HS256 tokens ([`TokenService`]) once the provider
//! accepts a sign-in, and resolves the bearer of an access token to a
//! [`user::Model`](crate::account::user::Model) on every authenticated call.

pub mod extract;
pub mod identity;
pub mod token;

pub use extract::{CurrentUser, bearer_token, bearer_value, resolve_user};
pub use identity::{FirebaseIdentity, IdentityProvider, InMemoryIdentity, ProviderSession};
pub use token::{Claims, TokenKind, TokenService};

use tracker_orm::{ApiError, OrmError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization token is missing")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    Expired,

    #[error("Role not found in token")]
    MissingRole,

    /// A valid token used for the wrong purpose, e.g. a refresh token as bearer.
    #[error("{expected} token required")]
    WrongKind { expected: TokenKind },

    #[error("Invalid email or password")]
    InvalidCredentials,

    /// The provider refused the request (e.g. `EMAIL_EXISTS`).
    #[error("{0}")]
    Provider(String),

    #[error("identity provider unavailable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Orm(#[from] OrmError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::Expired
            | AuthError::MissingRole
            | AuthError::WrongKind { .. }
            | AuthError::InvalidCredentials => Self::unauthorized(err.to_string()),
            AuthError::Provider(message) if message.starts_with("EMAIL_EXISTS") => {
                Self::conflict(message)
            }
            AuthError::Provider(message) => Self::bad_request(message),
            AuthError::Transport(source) => Self::internal(
                "Identity provider unavailable",
                Some(source.to_string()),
            ),
            AuthError::Signing(source) => {
                Self::internal("Could not issue token", Some(source.to_string()))
            }
            AuthError::Orm(err) => err.into(),
        }
    }
}
