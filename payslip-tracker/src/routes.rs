use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use sea_orm::DatabaseConnection;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracker_orm::{OrmError, SchemaRegistry};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable};

use crate::account::{self, contact, contact_config, user};
use crate::auth::{IdentityProvider, TokenService};
use crate::graphql::{
    AppSchema, GRAPHQL_PATH, GRAPHQL_WS_PATH, build_schema, graphiql, graphql_handler,
    graphql_ws_handler,
};
use crate::tracker::{self, goal, income};

#[derive(OpenApi)]
#[openapi(info(
    title = "Payslip Tracker API",
    description = "Contacts, logins, incomes and savings goals"
))]
struct ApiDoc;

/// Shared by every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub tokens: Arc<TokenService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub schema: AppSchema,
}

impl AppState {
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        tokens: TokenService,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let tokens = Arc::new(tokens);
        let schema = build_schema(db.clone(), Arc::clone(&tokens));
        Self {
            db,
            tokens,
            identity,
            schema,
        }
    }
}

/// Every entity schema of the application.
///
/// # Errors
/// Fails when a schema is invalid or a relation targets an unknown entity.
pub fn entity_registry() -> Result<SchemaRegistry, OrmError> {
    SchemaRegistry::new(&[
        contact::schema(),
        contact_config::schema(),
        user::schema(),
        income::schema(),
        goal::schema(),
    ])
}

/// REST under `/api`, API docs at `/docs`, GraphQL at `/gql`. The
/// GraphiQL page answers `GET /gql` only when `playground` is set.
pub fn build_app(state: AppState, playground: bool) -> Router {
    let (api, openapi) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/Account", account::routes::router())
        .nest("/api/Tracker", tracker::routes::router())
        .split_for_parts();

    let graphql = if playground {
        get(graphiql).post(graphql_handler)
    } else {
        post(graphql_handler)
    };

    api.route(GRAPHQL_PATH, graphql)
        .route(GRAPHQL_WS_PATH, get(graphql_ws_handler))
        .with_state(state)
        .merge(Scalar::with_url("/docs", openapi))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
