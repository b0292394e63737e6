use std::fmt;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use super::AuthError;

pub const ACCESS_TOKEN_DAYS: i64 = 1;
pub const REFRESH_TOKEN_DAYS: i64 = 30;
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Temporary,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Temporary => "temporary",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    pub kind: TokenKind,
    /// Caller-supplied payload of temporary tokens.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Json>,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: Uuid, kind: TokenKind, ttl: Duration) -> Self {
        Self {
            sub: Some(user_id.to_string()),
            role: None,
            account_id: None,
            exp: (Utc::now() + ttl).timestamp(),
            kind,
            extra: serde_json::Map::new(),
        }
    }

    /// The user id in `sub`.
    ///
    /// # Errors
    /// `InvalidToken` when `sub` is missing or not a UUID.
    pub fn subject(&self) -> Result<Uuid, AuthError> {
        self.sub
            .as_deref()
            .and_then(|sub| Uuid::parse_str(sub).ok())
            .ok_or(AuthError::InvalidToken)
    }

    /// # Errors
    /// `WrongKind` when the token was issued for another purpose.
    pub fn expect_kind(&self, expected: TokenKind) -> Result<(), AuthError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(AuthError::WrongKind { expected })
        }
    }
}

/// Issues and validates HS256 application tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signs `claims` as they are.
    ///
    /// # Errors
    /// `Signing` when encoding fails.
    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(AuthError::Signing)
    }

    /// One-day access token; `role` defaults to [`DEFAULT_ROLE`].
    ///
    /// # Errors
    /// `Signing` when encoding fails.
    pub fn access_token(
        &self,
        user_id: Uuid,
        role: Option<&str>,
        account_id: Option<Uuid>,
    ) -> Result<String, AuthError> {
        let mut claims = Claims::new(user_id, TokenKind::Access, Self::access_ttl());
        claims.role = Some(role.unwrap_or(DEFAULT_ROLE).to_string());
        claims.account_id = account_id;
        self.issue(&claims)
    }

    /// # Errors
    /// `Signing` when encoding fails.
    pub fn refresh_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        self.issue(&Claims::new(
            user_id,
            TokenKind::Refresh,
            Duration::days(REFRESH_TOKEN_DAYS),
        ))
    }

    /// Short-lived token carrying `extra` next to the standard claims.
    ///
    /// # Errors
    /// `Signing` when encoding fails.
    pub fn temporary_token(
        &self,
        user_id: Uuid,
        minutes: i64,
        extra: serde_json::Map<String, Json>,
    ) -> Result<String, AuthError> {
        let mut claims = Claims::new(user_id, TokenKind::Temporary, Duration::minutes(minutes));
        claims.extra = extra;
        self.issue(&claims)
    }

    /// Checks the signature and, unless `allow_expired`, the expiry.
    ///
    /// # Errors
    /// `Expired` for a stale token, `InvalidToken` for anything else.
    pub fn validate(&self, token: &str, allow_expired: bool) -> Result<Claims, AuthError> {
        let mut validation = self.validation.clone();
        if allow_expired {
            validation.validate_exp = false;
        }
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    tracing::debug!(error = %err, "token rejected");
                    AuthError::InvalidToken
                }
            })
    }

    /// Validates a refresh token and returns its user id.
    ///
    /// # Errors
    /// Validation failures, or `WrongKind` for a non-refresh token.
    pub fn refresh_subject(&self, refresh_token: &str) -> Result<Uuid, AuthError> {
        let claims = self.validate(refresh_token, false)?;
        claims.expect_kind(TokenKind::Refresh)?;
        claims.subject()
    }

    #[must_use]
    pub fn access_ttl() -> Duration {
        Duration::days(ACCESS_TOKEN_DAYS)
    }
}
