use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::{DisplayFromStr, serde_as};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::AuthError;

/// Tokens returned by a successful provider sign-in.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSession {
    pub id_token: String,
    pub refresh_token: String,
    /// Seconds; the provider sends it as a string.
    #[serde_as(as = "DisplayFromStr")]
    pub expires_in: u64,
    pub email: String,
    /// Provider subject id.
    pub local_id: String,
}

/// The service that owns user credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates an account and returns its provider subject id.
    async fn register(&self, email: &str, password: &str) -> Result<String, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderSession, AuthError>;
}

/// Firebase Identity Toolkit over its REST API.
pub struct FirebaseIdentity {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderErrorDetail {
    message: String,
}

/// Sign-in failures that mean "wrong credentials" rather than a fault.
const CREDENTIAL_ERRORS: &[&str] = &[
    "EMAIL_NOT_FOUND",
    "INVALID_PASSWORD",
    "INVALID_LOGIN_CREDENTIALS",
    "USER_DISABLED",
];

impl FirebaseIdentity {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<T, AuthError> {
        let url = format!(
            "{}/accounts:{action}?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let body: ProviderErrorBody = response.json().await.unwrap_or_default();
        tracing::debug!(%status, action, error = %body.error.message, "identity provider refused");
        Err(AuthError::Provider(body.error.message))
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn register(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let body = json!({"email": email, "password": password, "returnSecureToken": true});
        let created: SignUpResponse = self.call("signUp", body).await?;
        tracing::info!(uid = %created.local_id, "identity registered");
        Ok(created.local_id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderSession, AuthError> {
        let body = json!({"email": email, "password": password, "returnSecureToken": true});
        match self.call("signInWithPassword", body).await {
            Err(AuthError::Provider(code))
                if CREDENTIAL_ERRORS.iter().any(|known| code.starts_with(known)) =>
            {
                Err(AuthError::InvalidCredentials)
            }
            other => other,
        }
    }
}

struct Account {
    uid: String,
    password: String,
}

/// Process-local provider for tests and offline development. Nothing is
/// written anywhere.
#[derive(Default)]
pub struct InMemoryIdentity {
    accounts: Mutex<HashMap<String, Account>>,
}

impl InMemoryIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn register(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(email) {
            return Err(AuthError::Provider("EMAIL_EXISTS".to_string()));
        }
        let uid = Uuid::new_v4().simple().to_string();
        accounts.insert(
            email.to_string(),
            Account {
                uid: uid.clone(),
                password: password.to_string(),
            },
        );
        Ok(uid)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderSession, AuthError> {
        let accounts = self.accounts.lock().await;
        match accounts.get(email) {
            Some(account) if account.password == password => Ok(ProviderSession {
                id_token: format!("id-{}", account.uid),
                refresh_token: format!("refresh-{}", account.uid),
                expires_in: 3600,
                email: email.to_string(),
                local_id: account.uid.clone(),
            }),
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}
