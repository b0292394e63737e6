use std::sync::Arc;

use async_graphql::{Context, InputObject, Object};
use serde_json::json;
use tracker_orm::{
    ActiveRecord, ApiError, Attributes, CommitMode, FilterParams, Lookup, Relations, SearchParams,
    instance_view, listing_views,
};
use uuid::Uuid;

use super::contact::{self, ContactView};
use super::user::{self, UserView};
use crate::graphql::{GqlResultExt, current_user, gql_error, with_session};

/// Contact names; `id` selects the contact on update.
#[derive(Clone, Debug, Default, InputObject)]
pub struct ContactNameInput {
    pub id: Option<Uuid>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl ContactNameInput {
    /// Only the names that were sent.
    fn changes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        if let Some(first_name) = &self.first_name {
            attributes.insert("first_name".into(), json!(first_name));
        }
        if let Some(last_name) = &self.last_name {
            attributes.insert("last_name".into(), json!(last_name));
        }
        attributes
    }
}

#[derive(Default)]
pub struct AccountQuery;

#[Object]
impl AccountQuery {
    /// Contacts whose first or last name contains `keyword`.
    async fn search_contact(
        &self,
        ctx: &Context<'_>,
        keyword: Option<String>,
        rels: Option<Vec<String>>,
    ) -> async_graphql::Result<Vec<Arc<ContactView>>> {
        let search = SearchParams::new(keyword, contact::SEARCH_FIELDS.iter().copied())
            .with_params(FilterParams::new().relations(rels.into()));
        let listing = with_session(ctx, |s| {
            Box::pin(async move { contact::Entity::search(s, search).await })
        })
        .await?;
        listing_views(&listing).gql()
    }

    /// The caller, with their contact.
    async fn me(&self, ctx: &Context<'_>) -> async_graphql::Result<Arc<UserView>> {
        let id = current_user(ctx).await?.id;
        let found = with_session(ctx, |s| {
            Box::pin(async move {
                let lookup = Lookup::by_id(id).relations(Relations::paths(["contact"]));
                user::Entity::get_or_404(s, lookup).await
            })
        })
        .await?;
        instance_view(&found).gql()
    }
}

#[derive(Default)]
pub struct AccountMutation;

#[Object]
impl AccountMutation {
    /// Creates a bare contact. Logins are registered over REST.
    async fn create_user(
        &self,
        ctx: &Context<'_>,
        data: ContactNameInput,
    ) -> async_graphql::Result<String> {
        let attributes = data.changes();
        let created = with_session(ctx, |s| {
            Box::pin(async move {
                contact::Entity::create(s, attributes, &[], Relations::None, CommitMode::Deferred)
                    .await
            })
        })
        .await?;
        tracing::info!(id = %created.id(), "contact created");
        Ok("Ok".to_string())
    }

    async fn update_contact(
        &self,
        ctx: &Context<'_>,
        data: ContactNameInput,
    ) -> async_graphql::Result<String> {
        let id = data
            .id
            .ok_or_else(|| gql_error(&ApiError::bad_request("Contact id is required")))?;
        let changes = data.changes();
        let updated = with_session(ctx, |s| {
            Box::pin(async move {
                let found = contact::Entity::get_or_404(s, Lookup::by_id(id)).await?;
                contact::Entity::update(
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
        Ok(format!(
            "Updated contact: {id} - {} {}",
            updated.first_name.as_deref().unwrap_or_default(),
            updated.last_name.as_deref().unwrap_or_default()
        ))
    }
}
