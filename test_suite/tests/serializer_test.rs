// JSON and typed-view output of loaded graphs: declared shape, unloaded
// relations, cycles and shared sub-trees.

use std::sync::Arc;

use payslip_tracker::account::contact::{self, ContactView};
use payslip_tracker::account::user;
use payslip_tracker::tracker::income::{self, IncomeView};
use serde_json::Value;
use serial_test::serial;
use tracker_orm::{
    ActiveRecord, FilterParams, Lookup, OrmError, Relations, instance_json, instance_view,
    listing_json, listing_views, transact,
};

mod common;
use common::{seed, setup_test_db};

#[tokio::test]
#[serial]
async fn test_json_lists_every_field_and_relation() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let bonus = ids.incomes[1];

    let found = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::get_or_404(s, Lookup::by_id(bonus)).await })
    })
    .await
    .unwrap();
    let json = instance_json(&found);

    let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    for expected in [
        "id",
        "contact_id",
        "amount",
        "description",
        "income_date",
        "created_at",
        "updated_at",
        "contact",
    ] {
        assert!(keys.contains(&expected), "missing {expected} in {json}");
    }
    assert_eq!(json["amount"].as_f64(), Some(250.0));
    assert_eq!(json["contact"], Value::Null, "unloaded relation renders as null");
}

#[tokio::test]
#[serial]
async fn test_to_one_back_reference_is_null() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let ann = ids.ann;

    let found = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            let lookup = Lookup::by_id(ann).relations(Relations::paths(["user", "user.contact"]));
            contact::Entity::get_or_404(s, lookup).await
        })
    })
    .await
    .unwrap();
    let json = instance_json(&found);

    assert_eq!(json["user"]["username"], "ann@example.com");
    assert_eq!(json["user"]["contact"], Value::Null);
    assert_eq!(json["incomes"], Value::Null);
}

#[tokio::test]
#[serial]
async fn test_to_many_back_reference_skips_the_root() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let bonus = ids.incomes[1];

    let found = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            let lookup =
                Lookup::by_id(bonus).relations(Relations::paths(["contact", "contact.incomes"]));
            income::Entity::get_or_404(s, lookup).await
        })
    })
    .await
    .unwrap();

    let json = instance_json(&found);
    let siblings = json["contact"]["incomes"].as_array().expect("incomes loaded");
    assert_eq!(siblings.len(), 2);
    assert!(siblings.iter().all(|s| s["id"] != json["id"]));

    let view: Arc<IncomeView> = instance_view(&found).unwrap();
    let owner = view.contact.as_ref().expect("contact view");
    assert_eq!(owner.incomes.as_ref().map(Vec::len), Some(2));
}

#[tokio::test]
#[serial]
async fn test_views_share_repeated_records() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let listing = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::filter(
                s,
                FilterParams::new()
                    .filter("contact__first_name", "Ann")
                    .relations(Relations::paths(["contact"])),
            )
            .await
        })
    })
    .await
    .unwrap();

    let views: Vec<Arc<IncomeView>> = listing_views(&listing).unwrap();
    assert_eq!(views.len(), 3);
    let owners: Vec<&Arc<ContactView>> =
        views.iter().filter_map(|v| v.contact.as_ref()).collect();
    assert_eq!(owners.len(), 3);
    assert!(Arc::ptr_eq(owners[0], owners[1]));
    assert!(Arc::ptr_eq(owners[1], owners[2]));

    let json = listing_json(listing);
    let items = json.items();
    assert!(items.iter().all(|item| item["contact"]["first_name"] == "Ann"));
}

#[tokio::test]
#[serial]
async fn test_unloaded_view_relations_are_none() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let ids = seed(&db).await;
    let ann_user = ids.ann_user;

    let found = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { user::Entity::get_or_404(s, Lookup::by_id(ann_user)).await })
    })
    .await
    .unwrap();
    let view: Arc<user::UserView> = instance_view(&found).unwrap();
    assert_eq!(view.username.as_deref(), Some("ann@example.com"));
    assert!(view.contact.is_none());
}

#[tokio::test]
#[serial]
async fn test_empty_listing_serializes_to_empty() {
    let db = setup_test_db().await.expect("Failed to setup test database");

    let listing = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::filter(s, FilterParams::new()).await })
    })
    .await
    .unwrap();
    let views: Vec<Arc<IncomeView>> = listing_views(&listing).unwrap();
    assert!(views.is_empty());
    assert_eq!(serde_json::to_value(listing_json(listing)).unwrap(), serde_json::json!([]));
}
