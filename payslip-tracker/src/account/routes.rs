use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracker_orm::record::to_attributes;
use tracker_orm::{
    ActiveRecord, ApiError, Attributes, CommitMode, FilterParams, Listing, ListQuery, Lookup,
    Relations, Serializer, listing_json, transact,
};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use uuid::Uuid;

use super::{contact, user};
use crate::auth::{AuthError, CurrentUser, TokenService};
use crate::routes::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Email address; also the identity provider login.
    pub username: String,
    /// Forwarded to the identity provider only.
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateUserResponse {
    pub message: String,
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Provider tokens (camelCase, as the provider names them) plus the API's
/// own bearer tokens.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    #[serde(rename = "idToken")]
    pub id_token: String,
    #[serde(rename = "refreshToken")]
    pub provider_refresh_token: String,
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ContactIdQuery {
    pub contact_id: Uuid,
}

/// Exact-match contact filters; absent values are ignored.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ContactFilterQuery {
    pub id: Option<Uuid>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContactFilterQuery {
    fn into_filter_params(self) -> FilterParams {
        let mut params = FilterParams::new();
        if let Some(id) = self.id {
            params = params.filter("id", id.to_string());
        }
        if let Some(first_name) = self.first_name {
            params = params.filter("first_name", first_name);
        }
        if let Some(last_name) = self.last_name {
            params = params.filter("last_name", last_name);
        }
        if let Some(created_at) = self.created_at {
            params = params.filter("created_at", created_at.to_rfc3339());
        }
        if let Some(updated_at) = self.updated_at {
            params = params.filter("updated_at", updated_at.to_rfc3339());
        }
        params.relations(Relations::paths(["user"]))
    }
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_user))
        .routes(routes!(login_user))
        .routes(routes!(refresh_token))
        .routes(routes!(get_contact))
        .routes(routes!(get_user))
        .routes(routes!(get_all_contacts))
        .routes(routes!(search_contact))
        .routes(routes!(filter_contacts))
        .routes(routes!(me))
}

/// Registers the credentials with the identity provider, then creates the
/// contact and its user in one transaction.
#[utoipa::path(
    post,
    path = "/CreateUser",
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "User created", body = CreateUserResponse),
        (status = 409, description = "Email already registered"),
    ),
    tag = "Account"
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let uid = state
        .identity
        .register(&request.username, &request.password)
        .await?;

    let mut contact_attrs = Attributes::new();
    contact_attrs.insert("first_name".into(), json!(request.first_name));
    contact_attrs.insert("last_name".into(), json!(request.last_name));
    let username = request.username;

    let user_id = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move {
            let contact = contact::Entity::create(
                s,
                contact_attrs,
                &[],
                Relations::None,
                CommitMode::Deferred,
            )
            .await?;

            let mut user_attrs = Attributes::new();
            user_attrs.insert("username".into(), json!(username));
            user_attrs.insert("identity_uid".into(), json!(uid));
            user_attrs.insert("contact_id".into(), json!(contact.id()));
            let user =
                user::Entity::create(s, user_attrs, &[], Relations::None, CommitMode::Deferred)
                    .await?;
            Ok(user.id())
        })
    })
    .await?;

    tracing::info!(%user_id, "user created");
    Ok(Json(CreateUserResponse {
        message: "User created successfully".to_string(),
        user_id,
    }))
}

#[utoipa::path(
    post,
    path = "/LoginUser",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 401, description = "Invalid email or password"),
    ),
    tag = "Account"
)]
pub async fn login_user(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let provider = state.identity.sign_in(&request.email, &request.password).await?;

    let email = provider.email.clone();
    let found = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move {
            Ok(user::Entity::get(s, Lookup::new().filter("username", email)).await?)
        })
    })
    .await?;
    let user = found.ok_or(AuthError::InvalidCredentials)?;

    Ok(Json(LoginResponse {
        id_token: provider.id_token,
        provider_refresh_token: provider.refresh_token,
        expires_in: provider.expires_in,
        email: provider.email,
        access_token: state.tokens.access_token(user.id(), None, None)?,
        refresh_token: state.tokens.refresh_token(user.id())?,
        token_type: "Bearer".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/RefreshToken",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = TokenResponse),
        (status = 401, description = "Invalid, expired or non-refresh token"),
    ),
    tag = "Account"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user_id = state.tokens.refresh_subject(&request.refresh_token)?;
    let found = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move { Ok(user::Entity::get(s, Lookup::by_id(user_id)).await?) })
    })
    .await?;
    if found.is_none() {
        return Err(AuthError::InvalidToken.into());
    }

    Ok(Json(TokenResponse {
        access_token: state.tokens.access_token(user_id, None, None)?,
        token_type: "Bearer".to_string(),
        expires_in: TokenService::access_ttl().num_seconds(),
    }))
}

#[utoipa::path(
    get,
    path = "/GetContact",
    params(UserIdQuery),
    responses(
        (status = 200, description = "The user's contact", body = serde_json::Value),
        (status = 404, description = "No such user or contact"),
    ),
    tag = "Account"
)]
pub async fn get_contact(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let found = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move {
            let lookup = Lookup::by_id(query.user_id).relations(Relations::paths(["contact"]));
            Ok(user::Entity::get_or_404(s, lookup).await?)
        })
    })
    .await?;
    let contact = found
        .one("contact")
        .ok_or_else(|| ApiError::not_found("Contact", None))?;
    Ok(Json(Serializer::new(found.graph()).to_value(contact.key)))
}

#[utoipa::path(
    get,
    path = "/GetUser",
    params(ContactIdQuery),
    responses(
        (status = 200, description = "The contact's user", body = serde_json::Value),
        (status = 404, description = "No such contact or user"),
    ),
    tag = "Account"
)]
pub async fn get_user(
    State(state): State<AppState>,
    Query(query): Query<ContactIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let found = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move {
            let lookup = Lookup::by_id(query.contact_id).relations(Relations::paths(["user"]));
            Ok(contact::Entity::get_or_404(s, lookup).await?)
        })
    })
    .await?;
    let user = found
        .one("user")
        .ok_or_else(|| ApiError::not_found("User", None))?;
    Ok(Json(Serializer::new(found.graph()).to_value(user.key)))
}

#[utoipa::path(
    get,
    path = "/GetAllContacts",
    responses((status = 200, description = "Every contact with its user", body = [serde_json::Value])),
    tag = "Account"
)]
pub async fn get_all_contacts(
    State(state): State<AppState>,
) -> Result<Json<Listing<Value>>, ApiError> {
    let contacts = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move {
            Ok(contact::Entity::all(s, Relations::paths(["user"]), Vec::new()).await?)
        })
    })
    .await?;
    Ok(Json(listing_json(Listing::Items(contacts))))
}

#[utoipa::path(
    get,
    path = "/SearchContact",
    params(ListQuery),
    responses(
        (status = 200, description = "Matching contacts, paged when requested", body = serde_json::Value),
        (status = 422, description = "Unknown field or bad paging"),
    ),
    tag = "Account"
)]
pub async fn search_contact(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Listing<Value>>, ApiError> {
    let mut search = query.into_search(contact::SEARCH_FIELDS)?;
    if search.params.relations == Relations::None {
        search.params.relations = Relations::paths(["user"]);
    }
    let listing = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move { Ok(contact::Entity::search(s, search).await?) })
    })
    .await?;
    Ok(Json(listing_json(listing)))
}

#[utoipa::path(
    get,
    path = "/FilterContacts",
    params(ContactFilterQuery),
    responses((status = 200, description = "Contacts matching every given field", body = [serde_json::Value])),
    tag = "Account"
)]
pub async fn filter_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactFilterQuery>,
) -> Result<Json<Listing<Value>>, ApiError> {
    let params = query.into_filter_params();
    let listing = transact::<_, ApiError, _>(&state.db, |s| {
        Box::pin(async move { Ok(contact::Entity::filter(s, params).await?) })
    })
    .await?;
    Ok(Json(listing_json(listing)))
}

#[utoipa::path(
    get,
    path = "/Me",
    responses(
        (status = 200, description = "The authenticated user", body = serde_json::Value),
        (status = 401, description = "Missing or invalid bearer token"),
    ),
    tag = "Account"
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Result<Json<Value>, ApiError> {
    let attributes = to_attributes(&user)?;
    Ok(Json(Serializer::plain(user::schema(), &attributes)))
}
