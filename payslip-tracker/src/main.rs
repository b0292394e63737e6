use std::sync::Arc;

use payslip_tracker::auth::{FirebaseIdentity, IdentityProvider, InMemoryIdentity, TokenService};
use payslip_tracker::{AppState, Config, build_app, database, entity_registry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let registry = entity_registry()?;
    tracing::info!(entities = registry.len(), "entity schemas validated");

    let db = database::connect(&config.database_url).await?;

    let identity: Arc<dyn IdentityProvider> = if let Some(api_key) = &config.firebase_api_key {
        Arc::new(FirebaseIdentity::new(&config.firebase_auth_url, api_key))
    } else {
        tracing::warn!("FIREBASE_APIKEY not set; logins are kept in memory");
        Arc::new(InMemoryIdentity::new())
    };

    let state = AppState::new(db, TokenService::new(&config.secret_key), identity);
    let app = build_app(state, !config.is_production());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, env = %config.env, "payslip tracker listening");
    axum::serve(listener, app).await?;
    Ok(())
}
