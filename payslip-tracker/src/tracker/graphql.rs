use std::sync::Arc;

use async_graphql::{Context, Object};
use chrono::{DateTime, Utc};
use tracker_orm::{
    ActiveRecord, Attributes, CommitMode, DeleteMode, FilterParams, Lookup, Pagination, Q,
    Relations, SearchParams, instance_view, listing_views,
};
use uuid::Uuid;

use super::goal::{self, GoalInput, GoalView};
use super::income::{self, IncomeInput, IncomeView};
use crate::graphql::{GqlResultExt, with_session};

/// Extra `field__operator` filters passed as one JSON object.
type FilterObject = async_graphql::Json<Attributes>;

fn extra_filters(filters: Option<FilterObject>) -> Q {
    filters
        .map(|filters| Q::from(filters.0))
        .unwrap_or_default()
}

/// Null fields of an update are left untouched.
fn present(attributes: Attributes) -> Attributes {
    attributes
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

fn search_params(
    keyword: Option<String>,
    fields: &[&str],
    relations: Option<Vec<String>>,
    page: Option<u64>,
    page_size: Option<u64>,
) -> async_graphql::Result<SearchParams> {
    let mut params = FilterParams::new().relations(relations.into());
    params.pagination = Pagination::from_parts(page, page_size).gql()?;
    Ok(SearchParams::new(keyword, fields.iter().copied()).with_params(params))
}

#[derive(Default)]
pub struct IncomeQuery;

#[Object]
impl IncomeQuery {
    async fn get_income_by_id(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        relations: Option<Vec<String>>,
    ) -> async_graphql::Result<Arc<IncomeView>> {
        let found = with_session(ctx, |s| {
            Box::pin(async move {
                income::Entity::get_or_404(s, Lookup::by_id(id).relations(relations.into())).await
            })
        })
        .await?;
        instance_view(&found).gql()
    }

    async fn get_all_income(
        &self,
        ctx: &Context<'_>,
        relations: Option<Vec<String>>,
    ) -> async_graphql::Result<Vec<Arc<IncomeView>>> {
        let params = FilterParams::new().relations(relations.into());
        let listing =
            with_session(ctx, |s| Box::pin(async move { income::Entity::filter(s, params).await }))
                .await?;
        listing_views(&listing).gql()
    }

    /// Matches `keyword` against the description; one page when `page` is set.
    async fn search_income(
        &self,
        ctx: &Context<'_>,
        keyword: Option<String>,
        relations: Option<Vec<String>>,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> async_graphql::Result<Vec<Arc<IncomeView>>> {
        let search = search_params(keyword, income::SEARCH_FIELDS, relations, page, page_size)?;
        let listing =
            with_session(ctx, |s| Box::pin(async move { income::Entity::search(s, search).await }))
                .await?;
        listing_views(&listing).gql()
    }

    /// Exact matches on the given fields plus any `filters`, by amount.
    async fn filter_income(
        &self,
        ctx: &Context<'_>,
        id: Option<Uuid>,
        amount: Option<f64>,
        income_date: Option<DateTime<Utc>>,
        filters: Option<FilterObject>,
        relations: Option<Vec<String>>,
    ) -> async_graphql::Result<Vec<Arc<IncomeView>>> {
        let mut params = FilterParams::new()
            .filters(extra_filters(filters))
            .relations(relations.into())
            .order_by(["amount"]);
        if let Some(id) = id {
            params = params.filter("id", id.to_string());
        }
        if let Some(amount) = amount {
            params = params.filter("amount", amount);
        }
        if let Some(income_date) = income_date {
            params = params.filter("income_date", income_date.to_rfc3339());
        }
        let listing =
            with_session(ctx, |s| Box::pin(async move { income::Entity::filter(s, params).await }))
                .await?;
        listing_views(&listing).gql()
    }
}

#[derive(Default)]
pub struct IncomeMutation;

#[Object]
impl IncomeMutation {
    async fn create_income(
        &self,
        ctx: &Context<'_>,
        data: IncomeInput,
    ) -> async_graphql::Result<String> {
        let attributes = data.attributes().gql()?;
        with_session(ctx, |s| {
            Box::pin(async move {
                income::Entity::create(s, attributes, &[], Relations::None, CommitMode::Deferred)
                    .await
            })
        })
        .await?;
        Ok("Ok".to_string())
    }

    async fn update_income(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        data: IncomeInput,
    ) -> async_graphql::Result<String> {
        let changes = present(data.attributes().gql()?);
        with_session(ctx, |s| {
            Box::pin(async move {
                let found = income::Entity::get_or_404(s, Lookup::by_id(id)).await?;
                income::Entity::update(
                    s,
                    found.into_model(),
                    changes,
                    Relations::None,
                    CommitMode::Deferred,
                )
                .await
            })
        })
        .await?;
        Ok("Updated income successfully".to_string())
    }

    async fn delete_income(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<String> {
        with_session(ctx, |s| {
            Box::pin(async move {
                income::Entity::delete(s, id, DeleteMode::Cascade, CommitMode::Deferred).await
            })
        })
        .await?;
        Ok("Deleted income successfully".to_string())
    }
}

#[derive(Default)]
pub struct GoalQuery;

#[Object]
impl GoalQuery {
    async fn get_goal_by_id(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        relations: Option<Vec<String>>,
    ) -> async_graphql::Result<Arc<GoalView>> {
        let found = with_session(ctx, |s| {
            Box::pin(async move {
                goal::Entity::get_or_404(s, Lookup::by_id(id).relations(relations.into())).await
            })
        })
        .await?;
        instance_view(&found).gql()
    }

    async fn get_all_goal(
        &self,
        ctx: &Context<'_>,
        relations: Option<Vec<String>>,
    ) -> async_graphql::Result<Vec<Arc<GoalView>>> {
        let params = FilterParams::new().relations(relations.into());
        let listing =
            with_session(ctx, |s| Box::pin(async move { goal::Entity::filter(s, params).await }))
                .await?;
        listing_views(&listing).gql()
    }

    async fn search_goal(
        &self,
        ctx: &Context<'_>,
        keyword: Option<String>,
        relations: Option<Vec<String>>,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> async_graphql::Result<Vec<Arc<GoalView>>> {
        let search = search_params(keyword, goal::SEARCH_FIELDS, relations, page, page_size)?;
        let listing =
            with_session(ctx, |s| Box::pin(async move { goal::Entity::search(s, search).await }))
                .await?;
        listing_views(&listing).gql()
    }

    /// Exact matches on the given fields plus any `filters`, by target amount.
    async fn filter_goal(
        &self,
        ctx: &Context<'_>,
        id: Option<Uuid>,
        target_amount: Option<f64>,
        target_date: Option<DateTime<Utc>>,
        filters: Option<FilterObject>,
        relations: Option<Vec<String>>,
    ) -> async_graphql::Result<Vec<Arc<GoalView>>> {
        let mut params = FilterParams::new()
            .filters(extra_filters(filters))
            .relations(relations.into())
            .order_by(["target_amount"]);
        if let Some(id) = id {
            params = params.filter("id", id.to_string());
        }
        if let Some(target_amount) = target_amount {
            params = params.filter("target_amount", target_amount);
        }
        if let Some(target_date) = target_date {
            params = params.filter("target_date", target_date.to_rfc3339());
        }
        let listing =
            with_session(ctx, |s| Box::pin(async move { goal::Entity::filter(s, params).await }))
                .await?;
        listing_views(&listing).gql()
    }
}

#[derive(Default)]
pub struct GoalMutation;

#[Object]
impl GoalMutation {
    async fn create_goal(&self, ctx: &Context<'_>, data: GoalInput) -> async_graphql::Result<String> {
        let attributes = data.attributes().gql()?;
        with_session(ctx, |s| {
            Box::pin(async move {
                goal::Entity::create(s, attributes, &[], Relations::None, CommitMode::Deferred)
                    .await
            })
        })
        .await?;
        Ok("Ok".to_string())
    }

    async fn update_goal(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        data: GoalInput,
    ) -> async_graphql::Result<String> {
        let changes = present(data.attributes().gql()?);
        with_session(ctx, |s| {
            Box::pin(async move {
                let found = goal::Entity::get_or_404(s, Lookup::by_id(id)).await?;
                goal::Entity::update(
                    s,
                    found.into_model(),
                    changes,
                    Relations::None,
                    CommitMode::Deferred,
                )
                .await
            })
        })
        .await?;
        Ok("Updated goal successfully".to_string())
    }

    async fn delete_goal(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<String> {
        with_session(ctx, |s| {
            Box::pin(async move {
                goal::Entity::delete(s, id, DeleteMode::Cascade, CommitMode::Deferred).await
            })
        })
        .await?;
        Ok("Deleted goal successfully".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_present_drops_nulls() {
        let mut attributes = Attributes::new();
        attributes.insert("amount".into(), json!(10.5));
        attributes.insert("description".into(), json!(null));
        let kept = present(attributes);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get("amount"), Some(&json!(10.5)));
    }

    #[test]
    fn test_extra_filters_keep_every_entry() {
        let mut raw = Attributes::new();
        raw.insert("amount__gte".into(), json!(100));
        raw.insert("description__icontains".into(), json!("bonus"));
        let q = extra_filters(Some(async_graphql::Json(raw)));
        assert_eq!(q.len(), 2);
        assert!(extra_filters(None).is_empty());
    }

    #[test]
    fn test_search_params_reject_zero_page() {
        assert!(search_params(None, income::SEARCH_FIELDS, None, Some(0), Some(10)).is_err());
        let params = search_params(Some("pay".into()), income::SEARCH_FIELDS, None, None, None)
            .unwrap();
        assert_eq!(params.fields, vec!["description".to_string()]);
        assert!(params.params.pagination.is_none());
    }
}
