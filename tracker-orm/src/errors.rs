//! # Error Handling
//!
//! Two layers live here:
//!
//! - [`OrmError`] is what every query, loader and active-record call returns.
//!   Its variants follow the failure taxonomy of the data layer (missing rows,
//!   invalid filter/relation input, relation mutation on a non-collection,
//!   persistence failures that already rolled the session back).
//! - [`ApiError`] is what REST handlers return. It picks the status code,
//!   renders `{"error": ...}` bodies and logs store causes through `tracing`.
//!
//! ```rust,ignore
//! async fn handler(State(db): State<DatabaseConnection>) -> Result<Json<Value>, ApiError> {
//!     let income = transact(&db, |s| Box::pin(async move {
//!         income::Entity::get_or_404(s, Lookup::by_id(id)).await
//!     }))
//!     .await?;
//!     Ok(Json(Serializer::new(income.graph()).to_value(income.key())))
//! }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use std::fmt;

/// Failures raised by the data layer.
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    /// A lookup or refresh matched zero rows.
    #[error("{entity} not found")]
    NotFound { entity: String },

    /// Unknown operator, field or relation, bad value, bad pagination.
    #[error("{message}")]
    Validation { message: String },

    /// `extend`/`remove` called on a relation without collection semantics.
    #[error("relation '{relation}' on {entity} is not a collection")]
    RelationType { entity: String, relation: String },

    /// A write failed; the session was rolled back before this was returned.
    #[error("{message}: {source}")]
    Persistence {
        message: String,
        #[source]
        source: DbErr,
    },

    /// A read failed.
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl OrmError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn relation_type(entity: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::RelationType {
            entity: entity.into(),
            relation: relation.into(),
        }
    }

    pub fn persistence(message: impl Into<String>, source: DbErr) -> Self {
        Self::Persistence {
            message: message.into(),
            source,
        }
    }

    /// True for errors caused by caller input rather than the database.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Validation { .. } | Self::RelationType { .. }
        )
    }
}

/// What a tracker handler returns when a request cannot be served.
///
/// Each variant picks the status code; [`ApiError::user_message`] is the only
/// text a client sees. Database causes stay in the log.
#[derive(Debug)]
pub enum ApiError {
    /// 404. `resource` is the entity label, `id` the key the caller asked for.
    NotFound {
        resource: String,
        id: Option<String>,
    },

    /// 400, e.g. `extend` on a to-one relation.
    BadRequest { message: String },

    /// 401: missing, expired or wrong-kind token, or bad credentials.
    Unauthorized { message: String },

    /// 409, e.g. a username or email that is already registered.
    Conflict { message: String },

    /// 422: rejected filter, sort, pagination or payload input.
    ValidationFailed { errors: Vec<String> },

    /// 500 from the store. `internal` is logged, never returned.
    Database { message: String, internal: DbErr },

    /// 500 with a client message and an optional logged cause.
    Internal {
        message: String,
        internal: Option<String>,
    },
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation_failed(errors: Vec<String>) -> Self {
        Self::ValidationFailed { errors }
    }

    pub fn database(err: DbErr) -> Self {
        Self::Database {
            message: "A database error occurred".to_string(),
            internal: err,
        }
    }

    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text for the `error` field of the body and for GraphQL messages.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { resource, id } => match id {
                Some(id) => format!("{resource} with ID '{id}' not found"),
                None => format!("{resource} not found"),
            },
            Self::ValidationFailed { errors } => {
                if errors.len() == 1 {
                    errors[0].clone()
                } else {
                    format!("Validation failed: {}", errors.join(", "))
                }
            }
            Self::BadRequest { message }
            | Self::Unauthorized { message }
            | Self::Conflict { message }
            | Self::Database { message, .. }
            | Self::Internal { message, .. } => message.clone(),
        }
    }

    fn log_internal(&self) {
        match self {
            Self::Database { internal, .. } => {
                tracing::error!(error = ?internal, "tracker store failed");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "tracker request failed");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "request rejected"
                );
            }
        }
    }
}

/// JSON body of every REST error: `{"error": ..., "details": [...]}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<String>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();

        let status = self.status_code();
        let body = match &self {
            Self::ValidationFailed { errors } => ErrorBody {
                error: "Validation failed".to_string(),
                details: Some(errors.clone()),
            },
            _ => ErrorBody {
                error: self.user_message(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {}

/// `RecordNotFound` becomes 404, unique violations 409, everything else 500.
impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        if let DbErr::RecordNotFound(msg) = &err {
            let resource = msg.split_whitespace().next().unwrap_or("Resource");
            return Self::not_found(resource, None);
        }
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            tracing::debug!(detail = %detail, "unique constraint violated");
            return Self::conflict("A record with the same unique value already exists");
        }
        Self::database(err)
    }
}

impl From<OrmError> for ApiError {
    fn from(err: OrmError) -> Self {
        match err {
            OrmError::NotFound { entity } => Self::not_found(entity, None),
            OrmError::Validation { message } => Self::validation_failed(vec![message]),
            err @ OrmError::RelationType { .. } => Self::bad_request(err.to_string()),
            OrmError::Persistence { message, source } => {
                if let Some(SqlErr::UniqueConstraintViolation(_)) = source.sql_err() {
                    return Self::conflict(message);
                }
                let cause = source.to_string();
                Self::internal(format!("{message}: {cause}"), Some(cause))
            }
            OrmError::Database(err) => err.into(),
        }
    }
}
