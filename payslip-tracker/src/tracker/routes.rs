use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use tracker_orm::Relations;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::routes::AppState;

/// Set by the server, never by clients.
pub const READ_ONLY_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RelationsQuery {
    /// Comma separated relation paths, e.g. `contact`
    pub relations: Option<String>,
    /// Comma separated fields, `-` prefix for descending
    pub order_by: Option<String>,
}

impl RelationsQuery {
    fn relations(&self) -> Relations {
        self.relations.as_deref().map_or(Relations::None, Relations::from_csv)
    }

    fn order_by(&self) -> Vec<String> {
        self.order_by
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Generates the REST handlers of one tracker entity plus its router.
macro_rules! tracker_resource {
    ($module:ident, $entity:ident, $tag:tt, $label:tt) => {
        pub mod $module {
            use std::collections::HashMap;

            use axum::Json;
            use axum::extract::{Path, Query, State};
            use axum::http::StatusCode;
            use serde_json::Value;
            use tracker_orm::{
                ActiveRecord, ApiError, Attributes, CommitMode, DeleteMode, ListQuery, Listing,
                Lookup, Relations, filter_params_from_query, instance_json, listing_json,
                transact,
            };
            use utoipa_axum::router::OpenApiRouter;
            use utoipa_axum::routes;
            use uuid::Uuid;

            use super::{READ_ONLY_FIELDS, RelationsQuery};
            use crate::routes::AppState;
            use crate::tracker::$entity as entity;

            pub fn router() -> OpenApiRouter<AppState> {
                OpenApiRouter::new()
                    .routes(routes!(list_all, create_one))
                    .routes(routes!(get_one, update_one, delete_one))
                    .routes(routes!(search))
                    .routes(routes!(filter))
            }

            #[utoipa::path(
                get,
                path = "/",
                params(RelationsQuery),
                responses((status = 200, description = "Every row", body = [serde_json::Value])),
                operation_id = concat!("list_", $label),
                tag = $tag
            )]
            pub async fn list_all(
                State(state): State<AppState>,
                Query(query): Query<RelationsQuery>,
            ) -> Result<Json<Listing<Value>>, ApiError> {
                let relations = query.relations();
                let order_by = query.order_by();
                let rows = transact::<_, ApiError, _>(&state.db, |s| {
                    Box::pin(async move {
                        Ok(entity::Entity::all(s, relations, order_by).await?)
                    })
                })
                .await?;
                Ok(Json(listing_json(Listing::Items(rows))))
            }

            #[utoipa::path(
                post,
                path = "/",
                request_body = serde_json::Value,
                responses(
                    (status = 201, description = "Created, with its contact", body = serde_json::Value),
                    (status = 422, description = "Unknown field or invalid value"),
                ),
                operation_id = concat!("create_", $label),
                tag = $tag
            )]
            pub async fn create_one(
                State(state): State<AppState>,
                Json(body): Json<Attributes>,
            ) -> Result<(StatusCode, Json<Value>), ApiError> {
                let created = transact::<_, ApiError, _>(&state.db, |s| {
                    Box::pin(async move {
                        Ok(entity::Entity::create(
                            s,
                            body,
                            READ_ONLY_FIELDS,
                            Relations::paths(["contact"]),
                            CommitMode::Deferred,
                        )
                        .await?)
                    })
                })
                .await?;
                tracing::info!(id = %created.id(), entity = $tag, "created");
                Ok((StatusCode::CREATED, Json(instance_json(&created))))
            }

            #[utoipa::path(
                get,
                path = "/{id}",
                params(("id" = Uuid, Path, description = "Row id"), RelationsQuery),
                responses(
                    (status = 200, description = "The row", body = serde_json::Value),
                    (status = 404, description = "No such row"),
                ),
                operation_id = concat!("get_", $label),
                tag = $tag
            )]
            pub async fn get_one(
                State(state): State<AppState>,
                Path(id): Path<Uuid>,
                Query(query): Query<RelationsQuery>,
            ) -> Result<Json<Value>, ApiError> {
                let relations = query.relations();
                let found = transact::<_, ApiError, _>(&state.db, |s| {
                    Box::pin(async move {
                        let lookup = Lookup::by_id(id).relations(relations);
                        Ok(entity::Entity::get_or_404(s, lookup).await?)
                    })
                })
                .await?;
                Ok(Json(instance_json(&found)))
            }

            #[utoipa::path(
                put,
                path = "/{id}",
                params(("id" = Uuid, Path, description = "Row id")),
                request_body = serde_json::Value,
                responses(
                    (status = 200, description = "Updated, with its contact", body = serde_json::Value),
                    (status = 404, description = "No such row"),
                    (status = 422, description = "Unknown field or invalid value"),
                ),
                operation_id = concat!("update_", $label),
                tag = $tag
            )]
            pub async fn update_one(
                State(state): State<AppState>,
                Path(id): Path<Uuid>,
                Json(body): Json<Attributes>,
            ) -> Result<Json<Value>, ApiError> {
                let changes: Attributes = body
                    .into_iter()
                    .filter(|(key, _)| !READ_ONLY_FIELDS.contains(&key.as_str()))
                    .collect();
                let updated = transact::<_, ApiError, _>(&state.db, |s| {
                    Box::pin(async move {
                        let found = entity::Entity::get_or_404(s, Lookup::by_id(id)).await?;
                        Ok(entity::Entity::update(
                            s,
                            found.into_model(),
                            changes,
                            Relations::paths(["contact"]),
                            CommitMode::Deferred,
                        )
                        .await?)
                    })
                })
                .await?;
                Ok(Json(instance_json(&updated)))
            }

            #[utoipa::path(
                delete,
                path = "/{id}",
                params(("id" = Uuid, Path, description = "Row id")),
                responses(
                    (status = 204, description = "Deleted"),
                    (status = 404, description = "No such row"),
                ),
                operation_id = concat!("delete_", $label),
                tag = $tag
            )]
            pub async fn delete_one(
                State(state): State<AppState>,
                Path(id): Path<Uuid>,
            ) -> Result<StatusCode, ApiError> {
                transact::<_, ApiError, _>(&state.db, |s| {
                    Box::pin(async move {
                        entity::Entity::delete(s, id, DeleteMode::Cascade, CommitMode::Deferred)
                            .await?;
                        Ok(())
                    })
                })
                .await?;
                tracing::info!(%id, entity = $tag, "deleted");
                Ok(StatusCode::NO_CONTENT)
            }

            #[utoipa::path(
                get,
                path = "/search",
                params(ListQuery),
                responses(
                    (status = 200, description = "Matches, paged when requested", body = serde_json::Value),
                    (status = 422, description = "Unknown field or bad paging"),
                ),
                operation_id = concat!("search_", $label),
                tag = $tag
            )]
            pub async fn search(
                State(state): State<AppState>,
                Query(query): Query<ListQuery>,
            ) -> Result<Json<Listing<Value>>, ApiError> {
                let search = query.into_search(entity::SEARCH_FIELDS)?;
                let listing = transact::<_, ApiError, _>(&state.db, |s| {
                    Box::pin(async move { Ok(entity::Entity::search(s, search).await?) })
                })
                .await?;
                Ok(Json(listing_json(listing)))
            }

            /// Every query key other than `relations`, `order_by`, `page`,
            /// `page_size` and `distinct` is a `field__operator` filter.
            #[utoipa::path(
                get,
                path = "/filter",
                responses(
                    (status = 200, description = "Rows matching every filter", body = serde_json::Value),
                    (status = 422, description = "Unknown field, relation or operator"),
                ),
                operation_id = concat!("filter_", $label),
                tag = $tag
            )]
            pub async fn filter(
                State(state): State<AppState>,
                Query(query): Query<HashMap<String, String>>,
            ) -> Result<Json<Listing<Value>>, ApiError> {
                let params = filter_params_from_query(&query)?;
                let listing = transact::<_, ApiError, _>(&state.db, |s| {
                    Box::pin(async move { Ok(entity::Entity::filter(s, params).await?) })
                })
                .await?;
                Ok(Json(listing_json(listing)))
            }
        }
    };
}

tracker_resource!(income_api, income, "Income", "income");
tracker_resource!(goal_api, goal, "Goal", "goal");

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(welcome))
        .nest("/Income", income_api::router())
        .nest("/Goal", goal_api::router())
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Greeting", body = serde_json::Value)),
    tag = "Tracker"
)]
pub async fn welcome() -> Json<Value> {
    Json(json!({"message": "Welcome to the Payslip Tracker API!"}))
}
