use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Runtime settings read from the environment (and `.env` when present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    /// HS256 signing secret for application tokens.
    pub secret_key: String,
    pub firebase_api_key: Option<String>,
    pub firebase_auth_url: String,
    /// `PROD` disables the GraphiQL playground.
    pub env: String,
}

pub const DEFAULT_FIREBASE_AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";

impl Config {
    /// # Errors
    /// Fails when `LISTEN_ADDR` is not a socket address.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    ///
    /// # Errors
    /// Fails when `LISTEN_ADDR` is not a socket address.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let listen_raw = get("LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8000".to_string());
        let listen_addr = listen_raw.parse().map_err(|err| ConfigError::Invalid {
            name: "LISTEN_ADDR",
            message: format!("'{listen_raw}': {err}"),
        })?;

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite::memory:".to_string()),
            listen_addr,
            secret_key: get("SECRET_KEY").unwrap_or_else(|| "secret".to_string()),
            firebase_api_key: get("FIREBASE_APIKEY"),
            firebase_auth_url: get("FIREBASE_AUTH_URL")
                .unwrap_or_else(|| DEFAULT_FIREBASE_AUTH_URL.to_string()),
            env: get("ENV").unwrap_or_else(|| "DEV".to_string()),
        })
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("PROD")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8000");
        assert_eq!(config.secret_key, "secret");
        assert!(config.firebase_api_key.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_blank_values_fall_back() {
        let config = config(&[("SECRET_KEY", "  "), ("ENV", "prod")]).unwrap();
        assert_eq!(config.secret_key, "secret");
        assert!(config.is_production());
    }

    #[test]
    fn test_bad_listen_addr() {
        let err = config(&[("LISTEN_ADDR", "nowhere")]).unwrap_err();
        assert!(err.to_string().starts_with("invalid LISTEN_ADDR"));
    }
}
