// Active-record operations against the payslip tracker entities:
// lookups, get-or-create, upserts, updates, deletes and relation membership.

use payslip_tracker::account::{contact, user};
use payslip_tracker::tracker::{goal, income};
use serde_json::json;
use serial_test::serial;
use tracker_orm::{
    ActiveRecord, CommitMode, DeleteMode, FilterParams, Lookup, OrmError, Relations, transact,
};
use uuid::Uuid;

mod common;
use common::{attrs, seed, setup_test_db};

#[tokio::test]
#[serial]
async fn test_get_returns_none_or_not_found() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let missing = Uuid::new_v4();
    let found = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::get(s, Lookup::by_id(missing)).await })
    })
    .await
    .unwrap();
    assert!(found.is_none());

    let err = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::get_or_404(s, Lookup::by_id(missing)).await })
    })
    .await
    .unwrap_err();
    assert!(matches!(err, OrmError::NotFound { ref entity } if entity == "Income"));
    assert_eq!(err.to_string(), "Income not found");
}

#[tokio::test]
#[serial]
async fn test_get_with_filters_and_relations() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;

    let found = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            let lookup = Lookup::new()
                .filter("description", "Bonus")
                .relations(Relations::paths(["contact", "contact.user"]));
            income::Entity::get_or_404(s, lookup).await
        })
    })
    .await
    .unwrap();

    assert_eq!(found.amount, Some(250.0));
    let contact = found.one("contact").expect("contact loaded");
    assert_eq!(contact.id(), ids.ann);
    let login = found.graph().one(&contact.key, "user").expect("user loaded");
    assert_eq!(login.id(), ids.ann_user);
}

#[tokio::test]
#[serial]
async fn test_get_or_create_creates_once() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let bob = ids.bob;

    let (first, created) = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::get_or_create(
                s,
                Lookup::new().filter("description", "Tax refund"),
                attrs(json!({"amount": 90.0, "contact_id": bob})),
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap();
    assert!(created);
    assert_eq!(first.description.as_deref(), Some("Tax refund"));
    assert_eq!(first.contact_id, Some(bob));

    let (second, created) = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::get_or_create(
                s,
                Lookup::new().filter("description", "Tax refund"),
                attrs(json!({"amount": 1.0})),
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap();
    assert!(!created);
    assert_eq!(second.id(), first.id());
    assert_eq!(second.amount, Some(90.0));
}

#[tokio::test]
#[serial]
async fn test_create_excludes_fields_and_sets_timestamps() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let forced = Uuid::new_v4();

    let created = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            goal::Entity::create(
                s,
                attrs(json!({"id": forced, "description": "Emergency fund", "target_amount": 5000})),
                &["id"],
                Relations::None,
                CommitMode::Immediate,
            )
            .await
        })
    })
    .await
    .unwrap();

    assert_ne!(created.id(), forced);
    assert_eq!(created.target_amount, Some(5000.0));
    assert!(created.updated_at.is_some());
}

#[tokio::test]
#[serial]
async fn test_create_rejects_bad_input_with_named_field() {
    let db = setup_test_db().await.expect("Failed to setup test database");

    let err = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::create(
                s,
                attrs(json!({"amount": "lots"})),
                &[],
                Relations::None,
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap_err();
    assert!(err.to_string().contains("'amount' on Income"), "{err}");

    let err = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::create(
                s,
                attrs(json!({"description": "x".repeat(501)})),
                &[],
                Relations::None,
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Field 'description' on Income exceeds 500 characters"
    );
}

#[tokio::test]
#[serial]
async fn test_create_or_update_upserts_on_primary_key() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let salary = ids.incomes[0];

    let updated = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::create_or_update(
                s,
                attrs(json!({"id": salary, "amount": 1600.0})),
                &[],
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap();
    assert_eq!(updated.id(), salary);
    assert_eq!(updated.amount, Some(1600.0));
    assert_eq!(updated.description.as_deref(), Some("Salary January"));

    let created = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::create_or_update(
                s,
                attrs(json!({"amount": 10.0, "description": "Interest"})),
                &[],
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap();
    assert_ne!(created.id(), salary);

    let total = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::count(s, FilterParams::new()).await })
    })
    .await
    .unwrap();
    assert_eq!(total, 5);
}

#[tokio::test]
#[serial]
async fn test_update_is_partial_and_keeps_primary_key() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let holiday = ids.goals[0];

    let updated = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            let found = goal::Entity::get_or_404(s, Lookup::by_id(holiday)).await?;
            goal::Entity::update(
                s,
                found.into_model(),
                attrs(json!({"id": Uuid::new_v4(), "target_amount": 2500.0})),
                Relations::paths(["contact"]),
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap();

    assert_eq!(updated.id(), holiday);
    assert_eq!(updated.target_amount, Some(2500.0));
    assert_eq!(updated.description.as_deref(), Some("Holiday fund"));
    assert_eq!(updated.one("contact").map(|c| c.id()), Some(ids.ann));
}

#[tokio::test]
#[serial]
async fn test_cascade_delete_removes_children_and_detaches_user() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let ann = ids.ann;
    let ann_user = ids.ann_user;

    transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::delete(s, ann, DeleteMode::Cascade, CommitMode::Deferred).await
        })
    })
    .await
    .unwrap();

    let (incomes, goals, login) = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            let incomes = income::Entity::count(s, FilterParams::new()).await?;
            let goals = goal::Entity::count(s, FilterParams::new()).await?;
            let login = user::Entity::get_or_404(s, Lookup::by_id(ann_user)).await?;
            Ok((incomes, goals, login.into_model()))
        })
    })
    .await
    .unwrap();

    assert_eq!(incomes, 1, "only Bob's income is left");
    assert_eq!(goals, 1, "only Bob's goal is left");
    assert_eq!(login.contact_id, None);
}

#[tokio::test]
#[serial]
async fn test_direct_delete_leaves_children_in_place() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let ann = ids.ann;

    transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::delete(s, ann, DeleteMode::Direct, CommitMode::Deferred).await
        })
    })
    .await
    .unwrap();

    let (contacts, incomes) = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            Ok((
                contact::Entity::count(s, FilterParams::new()).await?,
                income::Entity::count(s, FilterParams::new()).await?,
            ))
        })
    })
    .await
    .unwrap();
    assert_eq!(contacts, 1);
    assert_eq!(incomes, 4);
}

#[tokio::test]
#[serial]
async fn test_delete_missing_row_is_not_found() {
    let db = setup_test_db().await.expect("Failed to setup test database");

    let err = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            goal::Entity::delete(s, Uuid::new_v4(), DeleteMode::Cascade, CommitMode::Deferred)
                .await
        })
    })
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "Goal not found");
}

#[tokio::test]
#[serial]
async fn test_bulk_create_is_all_or_nothing() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let shared = Uuid::new_v4();

    let err = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::bulk_create(
                s,
                vec![
                    attrs(json!({"id": shared, "amount": 1.0})),
                    attrs(json!({"id": Uuid::new_v4(), "amount": 2.0})),
                    attrs(json!({"id": shared, "amount": 3.0})),
                ],
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap_err();
    assert!(matches!(err, OrmError::Persistence { .. }), "{err}");

    let total = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::count(s, FilterParams::new()).await })
    })
    .await
    .unwrap();
    assert_eq!(total, 0);

    let created = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::bulk_create(
                s,
                vec![attrs(json!({"amount": 1.0})), attrs(json!({"amount": 2.0}))],
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap();
    assert_eq!(created.len(), 2);
}

#[tokio::test]
#[serial]
async fn test_bulk_delete_counts_removed_rows() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let mut targets = ids.incomes[..2].to_vec();
    targets.push(Uuid::new_v4());

    let removed = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::bulk_delete(s, targets, CommitMode::Deferred).await })
    })
    .await
    .unwrap();
    assert_eq!(removed, 2);

    let empty = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::bulk_delete(s, Vec::new(), CommitMode::Deferred).await })
    })
    .await
    .unwrap();
    assert_eq!(empty, 0);
}

#[tokio::test]
#[serial]
async fn test_first_and_all_follow_order() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let (smallest, all) = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            let smallest = income::Entity::first(s, FilterParams::new().order_by(["amount"])).await?;
            let all = income::Entity::all(s, Relations::None, vec!["-amount".to_string()]).await?;
            Ok((smallest, all))
        })
    })
    .await
    .unwrap();

    assert_eq!(smallest.and_then(|i| i.amount), Some(250.0));
    let amounts: Vec<Option<f64>> = all.iter().map(|i| i.amount).collect();
    assert_eq!(amounts, vec![Some(1500.0), Some(1200.0), Some(800.0), Some(250.0)]);
}

#[tokio::test]
#[serial]
async fn test_fetch_related_loads_every_relation() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let ann = ids.ann;

    let loaded = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { contact::Entity::fetch_related(s, ann, Relations::All).await })
    })
    .await
    .unwrap();

    assert_eq!(loaded.many("incomes").len(), 3);
    assert_eq!(loaded.many("goals").len(), 1);
    assert_eq!(loaded.one("user").map(|u| u.id()), Some(ids.ann_user));
    assert!(loaded.is_loaded("config"));
    assert!(loaded.one("config").is_none());
}

#[tokio::test]
#[serial]
async fn test_extend_and_remove_membership() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let (ann, bob) = (ids.ann, ids.bob);
    let bob_income = ids.incomes[3];
    let ann_salary = ids.incomes[0];

    let extended = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::extend(s, ann, "incomes", vec![bob_income], false, CommitMode::Deferred)
                .await
        })
    })
    .await
    .unwrap();
    assert_eq!(extended.many("incomes").len(), 4);

    let replaced = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::extend(s, bob, "incomes", vec![ann_salary], true, CommitMode::Deferred)
                .await
        })
    })
    .await
    .unwrap();
    let members: Vec<Uuid> = replaced.many("incomes").iter().map(|r| r.id()).collect();
    assert_eq!(members, vec![ann_salary]);

    let trimmed = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::remove(s, bob, "incomes", vec![ann_salary], CommitMode::Deferred).await
        })
    })
    .await
    .unwrap();
    assert!(trimmed.many("incomes").is_empty());

    let detached = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::get_or_404(s, Lookup::by_id(ann_salary)).await })
    })
    .await
    .unwrap();
    assert_eq!(detached.contact_id, None);
}

#[tokio::test]
#[serial]
async fn test_extend_rejects_to_one_relation() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let ann = ids.ann;

    let err = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::extend(s, ann, "user", vec![Uuid::new_v4()], false, CommitMode::Deferred)
                .await
        })
    })
    .await
    .unwrap_err();
    assert!(matches!(err, OrmError::RelationType { .. }));
}
