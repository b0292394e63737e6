//! # GraphQL
//!
//! One schema merged from the per-module query and mutation objects. Every
//! resolver opens its own session on the shared connection. The caller is
//! resolved lazily from the `Authorization` header, or from the
//! `Authorization` entry of the websocket `connection_init` payload. The
//! partner, when the request names one, is resolved the same lazy way
//! (see [`partner`]).

pub mod partner;

use std::sync::Arc;

use async_graphql::http::{ALL_WEBSOCKET_PROTOCOLS, GraphiQLSource};
use async_graphql::{Context, Data, EmptySubscription, ErrorExtensions, MergedObject, Schema};
use async_graphql_axum::{GraphQLProtocol, GraphQLRequest, GraphQLResponse, GraphQLWebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, Response};
use futures::future::BoxFuture;
use sea_orm::DatabaseConnection;
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracker_orm::{ApiError, OrmError, Session, transact};

use crate::account::graphql::{AccountMutation, AccountQuery};
use crate::account::user;
use crate::auth::{AuthError, TokenService, bearer_token, bearer_value, resolve_user};
use crate::routes::AppState;
use crate::tracker::graphql::{GoalMutation, GoalQuery, IncomeMutation, IncomeQuery};
use partner::{Partner, PartnerDirectory, PartnerQuery, PartnerRef};

pub const GRAPHQL_PATH: &str = "/gql";
pub const GRAPHQL_WS_PATH: &str = "/gql/ws";

#[derive(MergedObject, Default)]
pub struct QueryRoot(AccountQuery, IncomeQuery, GoalQuery, PartnerQuery);

#[derive(MergedObject, Default)]
pub struct MutationRoot(AccountMutation, IncomeMutation, GoalMutation);

pub type AppSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

#[must_use]
pub fn build_schema(db: DatabaseConnection, tokens: Arc<TokenService>) -> AppSchema {
    Schema::build(QueryRoot::default(), MutationRoot::default(), EmptySubscription)
        .data(db)
        .data(tokens)
        .finish()
}

/// The caller of one request or websocket connection. The user and the
/// partner are looked up on first use and cached.
pub struct Viewer {
    token: Option<String>,
    partner_ref: Option<PartnerRef>,
    user: OnceCell<user::Model>,
    partner: OnceCell<Option<Partner>>,
}

impl Viewer {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            partner_ref: None,
            user: OnceCell::new(),
            partner: OnceCell::new(),
        }
    }

    /// Bearer token and partner headers of an HTTP request.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::new(bearer_token(headers).map(ToString::to_string))
            .with_partner(PartnerRef::from_headers(headers))
    }

    #[must_use]
    pub fn with_partner(mut self, partner: Option<PartnerRef>) -> Self {
        self.partner_ref = partner;
        self
    }

    /// Reads `Authorization: Bearer <token>` from a `connection_init` payload.
    #[must_use]
    pub fn from_init_payload(payload: &Json) -> Self {
        let token = ["Authorization", "authorization"]
            .iter()
            .find_map(|key| payload.get(*key))
            .and_then(Json::as_str)
            .and_then(bearer_value)
            .map(ToString::to_string);
        Self::new(token)
    }

    /// # Errors
    /// `MissingToken` without a bearer token, otherwise whatever
    /// [`resolve_user`] reports.
    pub async fn user(
        &self,
        db: &DatabaseConnection,
        tokens: &TokenService,
    ) -> Result<&user::Model, AuthError> {
        let token = self.token.as_deref().ok_or(AuthError::MissingToken)?;
        self.user
            .get_or_try_init(|| resolve_user(db, tokens, token))
            .await
    }

    /// `None` when the request names no partner or no directory is given.
    ///
    /// # Errors
    /// Directory failures.
    pub async fn partner(
        &self,
        directory: Option<&dyn PartnerDirectory>,
    ) -> Result<Option<&Partner>, OrmError> {
        let (Some(reference), Some(directory)) = (&self.partner_ref, directory) else {
            return Ok(None);
        };
        let found = self
            .partner
            .get_or_try_init(|| directory.find(reference))
            .await?;
        Ok(found.as_ref())
    }
}

/// The authenticated caller of the current resolver.
///
/// # Errors
/// Unauthenticated when the request carries no valid access token.
pub async fn current_user<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a user::Model> {
    let viewer = ctx.data::<Viewer>()?;
    let db = ctx.data::<DatabaseConnection>()?;
    let tokens = ctx.data::<Arc<TokenService>>()?;
    viewer.user(db, tokens).await.gql()
}

/// Runs `f` in a fresh session on the schema's connection.
///
/// # Errors
/// The converted data-layer error.
pub async fn with_session<T, F>(ctx: &Context<'_>, f: F) -> async_graphql::Result<T>
where
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, OrmError>>,
{
    let db = ctx.data::<DatabaseConnection>()?;
    transact(db, f).await.gql()
}

/// Converts data-layer and auth failures into GraphQL errors carrying a
/// `code` extension.
pub trait GqlResultExt<T> {
    /// # Errors
    /// The converted error.
    fn gql(self) -> async_graphql::Result<T>;
}

impl<T, E: Into<ApiError>> GqlResultExt<T> for Result<T, E> {
    fn gql(self) -> async_graphql::Result<T> {
        self.map_err(|err| gql_error(&err.into()))
    }
}

#[must_use]
pub fn gql_error(err: &ApiError) -> async_graphql::Error {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(error = %err, "GraphQL resolver failed");
    }
    let code = match status {
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::UNAUTHORIZED => "UNAUTHENTICATED",
        StatusCode::CONFLICT => "CONFLICT",
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => "BAD_USER_INPUT",
        _ => "INTERNAL_SERVER_ERROR",
    };
    async_graphql::Error::new(err.user_message()).extend_with(|_, ext| {
        ext.set("code", code);
        ext.set("status", status.as_u16());
    })
}

pub async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let request = request.into_inner().data(Viewer::from_headers(&headers));
    state.schema.execute(request).await.into()
}

pub async fn graphiql() -> Html<String> {
    Html(
        GraphiQLSource::build()
            .endpoint(GRAPHQL_PATH)
            .subscription_endpoint(GRAPHQL_WS_PATH)
            .finish(),
    )
}

pub async fn graphql_ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    protocol: GraphQLProtocol,
    upgrade: WebSocketUpgrade,
) -> Response {
    let schema = state.schema.clone();
    let partner = PartnerRef::from_headers(&headers);
    upgrade
        .protocols(ALL_WEBSOCKET_PROTOCOLS)
        .on_upgrade(move |socket| {
            GraphQLWebSocket::new(socket, schema, protocol)
                .on_connection_init(move |payload| async move {
                    let mut data = Data::default();
                    data.insert(Viewer::from_init_payload(&payload).with_partner(partner));
                    Ok(data)
                })
                .serve()
        })
}
