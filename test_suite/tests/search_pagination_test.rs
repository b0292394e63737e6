// Keyword search over text fields and page envelopes with totals.

use payslip_tracker::account::contact;
use payslip_tracker::tracker::income;
use sea_orm::DatabaseConnection;
use serde_json::json;
use serial_test::serial;
use tracker_orm::{
    ActiveRecord, CommitMode, FilterParams, Listing, OrmError, Pagination, SearchParams, transact,
};

mod common;
use common::{attrs, seed, setup_test_db};

async fn search_incomes(
    db: &DatabaseConnection,
    search: SearchParams,
) -> Result<Listing<String>, OrmError> {
    let listing = transact::<_, OrmError, _>(db, |s| {
        Box::pin(async move { income::Entity::search(s, search).await })
    })
    .await?;
    Ok(listing.map(|i| i.description.clone().unwrap_or_default()))
}

fn by_amount() -> FilterParams {
    FilterParams::new().order_by(["amount"])
}

#[tokio::test]
#[serial]
async fn test_keyword_is_trimmed_and_case_insensitive() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let found = search_incomes(
        &db,
        SearchParams::new(Some("  salary ".to_string()), income::SEARCH_FIELDS.iter().copied())
            .with_params(by_amount()),
    )
    .await
    .unwrap();
    assert_eq!(found.items(), ["Salary January", "Salary January"]);
    assert!(found.page().is_none());
}

#[tokio::test]
#[serial]
async fn test_blank_keyword_returns_everything() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    for keyword in [None, Some(String::new()), Some("   ".to_string())] {
        let found = search_incomes(
            &db,
            SearchParams::new(keyword, income::SEARCH_FIELDS.iter().copied()),
        )
        .await
        .unwrap();
        assert_eq!(found.items().len(), 4);
    }
}

#[tokio::test]
#[serial]
async fn test_wildcards_in_keyword_match_literally() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            income::Entity::bulk_create(
                s,
                vec![
                    attrs(json!({"amount": 10.0, "description": "100% bonus"})),
                    attrs(json!({"amount": 20.0, "description": "tax_refund"})),
                ],
                CommitMode::Deferred,
            )
            .await
        })
    })
    .await
    .unwrap();

    let percent = search_incomes(&db, SearchParams::new(Some("%".to_string()), ["description"]))
        .await
        .unwrap();
    assert_eq!(percent.items(), ["100% bonus"]);

    let underscore =
        search_incomes(&db, SearchParams::new(Some("_".to_string()), ["description"]))
            .await
            .unwrap();
    assert_eq!(underscore.items(), ["tax_refund"]);
}

#[tokio::test]
#[serial]
async fn test_search_any_of_several_fields_across_relations() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let found = search_incomes(
        &db,
        SearchParams::new(Some("stone".to_string()), ["description", "contact__last_name"]),
    )
    .await
    .unwrap();
    assert_eq!(found.items(), ["Salary January"]);

    let contacts = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::search(
                s,
                SearchParams::new(Some("o".to_string()), contact::SEARCH_FIELDS.iter().copied()),
            )
            .await
        })
    })
    .await
    .unwrap();
    // "Bob Stone" matches, "Ann Lee" does not
    assert_eq!(contacts.items().len(), 1);
    assert_eq!(contacts.items()[0].first_name.as_deref(), Some("Bob"));
}

#[tokio::test]
#[serial]
async fn test_search_rejects_non_text_fields() {
    let db = setup_test_db().await.expect("Failed to setup test database");

    let err = search_incomes(&db, SearchParams::new(Some("12".to_string()), ["amount"]))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Search field 'amount' on Income is not text");
}

#[tokio::test]
#[serial]
async fn test_search_combines_with_filters() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let found = search_incomes(
        &db,
        SearchParams::new(Some("january".to_string()), ["description"])
            .with_params(FilterParams::new().filter("contact__first_name", "Bob")),
    )
    .await
    .unwrap();
    assert_eq!(found.items().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_pages_report_totals() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let first = search_incomes(
        &db,
        SearchParams::new(None, ["description"])
            .with_params(by_amount().paginate(Pagination::new(1, 3).unwrap())),
    )
    .await
    .unwrap();
    let page = first.page().expect("paged listing");
    assert_eq!(page.items, ["Bonus", "Freelance design", "Salary January"]);
    assert_eq!((page.page, page.page_size, page.total, page.pages), (1, 3, 4, 2));

    let second = search_incomes(
        &db,
        SearchParams::new(None, ["description"])
            .with_params(by_amount().paginate(Pagination::new(2, 3).unwrap())),
    )
    .await
    .unwrap();
    let page = second.page().expect("paged listing");
    assert_eq!(page.items, ["Salary January"]);
    assert_eq!(page.total, 4);

    let beyond = search_incomes(
        &db,
        SearchParams::new(None, ["description"])
            .with_params(by_amount().paginate(Pagination::new(5, 3).unwrap())),
    )
    .await
    .unwrap();
    let page = beyond.page().expect("paged listing");
    assert!(page.items.is_empty());
    assert_eq!(page.pages, 2);
}

#[tokio::test]
#[serial]
async fn test_page_total_counts_matches_not_joined_rows() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let listing = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::filter(
                s,
                FilterParams::new()
                    .filter("incomes__amount__gt", 0)
                    .paginate(Pagination::new(1, 10)?),
            )
            .await
        })
    })
    .await
    .unwrap();
    let page = listing.page().expect("paged listing");
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 2);
}

#[test]
fn test_pagination_defaults_and_validation() {
    assert_eq!(Pagination::from_parts(None, None).unwrap(), None);
    assert_eq!(
        Pagination::from_parts(Some(3), None).unwrap(),
        Some(Pagination { page: 3, page_size: 10 })
    );
    assert_eq!(
        Pagination::from_parts(Some(0), Some(5)).unwrap_err().to_string(),
        "page must be at least 1"
    );
    assert!(Pagination::new(1, 0).is_err());
}

async fn contact_page(
    db: &DatabaseConnection,
    params: FilterParams,
) -> (Vec<String>, u64, u64) {
    let listing = transact::<_, OrmError, _>(db, |s| {
        Box::pin(async move { contact::Entity::filter(s, params).await })
    })
    .await
    .unwrap();
    let page = listing.page().expect("paged listing");
    let names = page
        .items
        .iter()
        .map(|c| c.first_name.clone().unwrap_or_default())
        .collect();
    (names, page.total, page.pages)
}

#[tokio::test]
#[serial]
async fn test_pages_stay_full_when_ordering_by_a_to_many_relation() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    // Ann has three incomes and Bob one; each contact still counts once
    let (names, total, pages) = contact_page(
        &db,
        FilterParams::new()
            .order_by(["incomes__amount"])
            .paginate(Pagination::new(1, 2).unwrap()),
    )
    .await;
    assert_eq!(names, ["Ann", "Bob"]);
    assert_eq!((total, pages), (2, 1));

    let (names, _, _) = contact_page(
        &db,
        FilterParams::new()
            .order_by(["incomes__amount"])
            .paginate(Pagination::new(2, 1).unwrap()),
    )
    .await;
    assert_eq!(names, ["Bob"]);

    // Descending terms sort by each contact's largest income
    let (names, _, _) = contact_page(
        &db,
        FilterParams::new()
            .order_by(["-incomes__amount"])
            .paginate(Pagination::new(1, 2).unwrap()),
    )
    .await;
    assert_eq!(names, ["Ann", "Bob"]);

    let top = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            contact::Entity::first(s, FilterParams::new().order_by(["-incomes__amount"])).await
        })
    })
    .await
    .unwrap()
    .expect("a contact");
    assert_eq!(top.first_name.as_deref(), Some("Ann"));
}

#[tokio::test]
#[serial]
async fn test_distinct_applies_before_paging() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let by_contact = |page| {
        FilterParams::new()
            .distinct("contact_id")
            .order_by(["-amount"])
            .paginate(Pagination::new(page, 1).unwrap())
    };

    let first = search_incomes(
        &db,
        SearchParams::new(None, ["description"]).with_params(by_contact(1)),
    )
    .await
    .unwrap();
    let page = first.page().expect("paged listing");
    assert_eq!(page.items, ["Salary January"]);
    assert_eq!((page.total, page.pages), (2, 2));

    let second = search_incomes(
        &db,
        SearchParams::new(None, ["description"]).with_params(by_contact(2)),
    )
    .await
    .unwrap();
    let page = second.page().expect("paged listing");
    assert_eq!(page.items, ["Salary January"]);
    assert_eq!(page.total, 2);

    let (listing, counted) = transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move {
            let listing = income::Entity::filter(
                s,
                FilterParams::new()
                    .distinct("contact_id")
                    .order_by(["contact_id"])
                    .paginate(Pagination::new(1, 2)?),
            )
            .await?;
            let counted =
                income::Entity::count(s, FilterParams::new().distinct("contact_id")).await?;
            Ok((listing, counted))
        })
    })
    .await
    .unwrap();
    let page = listing.page().expect("paged listing");
    assert_eq!(page.items.len(), 2);
    assert_ne!(page.items[0].contact_id, page.items[1].contact_id);
    assert_eq!(page.total, 2);
    assert_eq!(counted, 2);
}

#[tokio::test]
#[serial]
async fn test_search_through_to_many_field_pages_by_contact() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    seed(&db).await;

    let mut seen = Vec::new();
    for page in 1..=2 {
        let listing = transact::<_, OrmError, _>(&db, |s| {
            Box::pin(async move {
                contact::Entity::search(
                    s,
                    SearchParams::new(Some("n".to_string()), ["incomes__description"])
                        .with_params(FilterParams::new().paginate(Pagination::new(page, 1)?)),
                )
                .await
            })
        })
        .await
        .unwrap();
        let page = listing.page().expect("paged listing");
        assert_eq!(page.items.len(), 1);
        assert_eq!((page.total, page.pages), (2, 2));
        seen.push(page.items[0].id());
    }
    assert_ne!(seen[0], seen[1]);
}

#[tokio::test]
#[serial]
async fn test_last_page_holds_the_remainder() {
    let db = setup_test_db().await.expect("Failed to setup test database");

    let rows: Vec<_> = (1..=23)
        .map(|n| attrs(json!({"amount": f64::from(n), "description": format!("Payslip {n}")})))
        .collect();
    transact::<_, OrmError, _>(&db, |s| {
        Box::pin(async move { income::Entity::bulk_create(s, rows, CommitMode::Deferred).await })
    })
    .await
    .unwrap();

    let last = search_incomes(
        &db,
        SearchParams::new(Some("payslip".to_string()), ["description"])
            .with_params(by_amount().paginate(Pagination::new(3, 10).unwrap())),
    )
    .await
    .unwrap();
    let page = last.page().expect("paged listing");
    assert_eq!(page.items, ["Payslip 21", "Payslip 22", "Payslip 23"]);
    assert_eq!((page.page, page.page_size, page.total, page.pages), (3, 10, 23, 3));
}
