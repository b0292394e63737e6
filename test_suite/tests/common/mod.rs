#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use payslip_tracker::account::{contact, user};
use payslip_tracker::auth::{InMemoryIdentity, TokenService};
use payslip_tracker::migration::Migrator;
use payslip_tracker::tracker::{goal, income};
use payslip_tracker::{AppState, build_app, database};
use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use serde_json::{Value, json};
use tower::ServiceExt;
use tracker_orm::{ActiveRecord, Attributes, CommitMode, OrmError, Relations, transact};
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-secret";

// Helper function to get database URL from environment or default to SQLite
fn get_test_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string())
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let database_url = get_test_database_url();
    let db = database::connect(&database_url).await?;

    // Persistent databases keep rows between runs
    if !database::is_in_memory(&database_url) {
        Migrator::fresh(&db).await?;
    }
    Ok(db)
}

pub fn test_tokens() -> TokenService {
    TokenService::new(TEST_SECRET)
}

pub fn test_state(db: DatabaseConnection) -> AppState {
    AppState::new(db, test_tokens(), Arc::new(InMemoryIdentity::new()))
}

pub fn setup_test_app(db: DatabaseConnection) -> Router {
    build_app(test_state(db), true)
}

pub fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Ids of the rows created by [`seed`].
pub struct Seed {
    pub ann: Uuid,
    pub bob: Uuid,
    pub ann_user: Uuid,
    /// Salary, Bonus, Freelance (Ann), Salary (Bob)
    pub incomes: Vec<Uuid>,
    /// Holiday fund (Ann), New bike (Bob)
    pub goals: Vec<Uuid>,
}

/// Two contacts: Ann Lee with a login, three incomes and a goal; Bob Stone
/// with one income and one goal.
pub async fn seed(db: &DatabaseConnection) -> Seed {
    transact::<_, OrmError, _>(db, |s| {
        Box::pin(async move {
            let mode = CommitMode::Deferred;
            let ann = contact::Entity::create(
                s,
                attrs(json!({"first_name": "Ann", "last_name": "Lee"})),
                &[],
                Relations::None,
                mode,
            )
            .await?
            .id();
            let bob = contact::Entity::create(
                s,
                attrs(json!({"first_name": "Bob", "last_name": "Stone"})),
                &[],
                Relations::None,
                mode,
            )
            .await?
            .id();
            let ann_user = user::Entity::create(
                s,
                attrs(json!({"username": "ann@example.com", "contact_id": ann})),
                &[],
                Relations::None,
                mode,
            )
            .await?
            .id();

            let mut incomes = Vec::new();
            for (owner, amount, description) in [
                (ann, 1500.0, "Salary January"),
                (ann, 250.0, "Bonus"),
                (ann, 800.0, "Freelance design"),
                (bob, 1200.0, "Salary January"),
            ] {
                let row = attrs(json!({
                    "contact_id": owner,
                    "amount": amount,
                    "description": description,
                    "income_date": "2024-01-31T00:00:00Z",
                }));
                incomes.push(
                    income::Entity::create(s, row, &[], Relations::None, mode)
                        .await?
                        .id(),
                );
            }

            let mut goals = Vec::new();
            for (owner, target, description) in
                [(ann, 2000.0, "Holiday fund"), (bob, 600.0, "New bike")]
            {
                let row = attrs(json!({
                    "contact_id": owner,
                    "target_amount": target,
                    "description": description,
                    "target_date": "2024-12-31T00:00:00Z",
                }));
                goals.push(goal::Entity::create(s, row, &[], Relations::None, mode).await?.id());
            }

            Ok(Seed {
                ann,
                bob,
                ann_user,
                incomes,
                goals,
            })
        })
    })
    .await
    .expect("Failed to seed test data")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn with_bearer(request: Request<Body>, token: &str) -> Request<Body> {
    with_header(request, "authorization", &format!("Bearer {token}"))
}

pub fn with_header(mut request: Request<Body>, name: &'static str, value: &str) -> Request<Body> {
    request.headers_mut().insert(name, value.parse().unwrap());
    request
}

/// Runs one request and returns the status with the decoded body
/// (`Value::Null` for an empty body).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| {
            panic!("non-JSON body ({status}): {}", String::from_utf8_lossy(&body))
        })
    };
    (status, value)
}
