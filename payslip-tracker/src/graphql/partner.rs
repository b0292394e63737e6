//! Partner lookup for GraphQL callers.
//!
//! A request names its partner with `X-PARTNER-SUBDOMAIN` or
//! `X-PARTNER-PUBLIC-KEY`; the subdomain wins when both are sent. Partners
//! resolve through a [`PartnerDirectory`] placed in the schema or request
//! data. Without a directory every lookup yields `None`.

use std::sync::Arc;

use async_graphql::{Context, Object, SimpleObject};
use async_trait::async_trait;
use axum::http::HeaderMap;
use tracker_orm::OrmError;

use super::{GqlResultExt, Viewer};

pub const SUBDOMAIN_HEADER: &str = "x-partner-subdomain";
pub const PUBLIC_KEY_HEADER: &str = "x-partner-public-key";

/// How a request names its partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartnerRef {
    Subdomain(String),
    PublicKey(String),
}

impl PartnerRef {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        };
        header(SUBDOMAIN_HEADER)
            .map(Self::Subdomain)
            .or_else(|| header(PUBLIC_KEY_HEADER).map(Self::PublicKey))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, SimpleObject)]
pub struct Partner {
    pub name: String,
    pub subdomain: Option<String>,
    pub public_key: Option<String>,
}

#[async_trait]
pub trait PartnerDirectory: Send + Sync {
    /// # Errors
    /// Store failures; an unknown partner is `Ok(None)`.
    async fn find(&self, partner: &PartnerRef) -> Result<Option<Partner>, OrmError>;
}

pub type SharedPartners = Arc<dyn PartnerDirectory>;

/// The partner named by the current request, looked up once per viewer.
///
/// # Errors
/// Directory failures.
pub async fn current_partner<'a>(
    ctx: &Context<'a>,
) -> async_graphql::Result<Option<&'a Partner>> {
    let viewer = ctx.data::<Viewer>()?;
    let directory = ctx
        .data_opt::<SharedPartners>()
        .map(|directory| directory.as_ref());
    viewer.partner(directory).await.gql()
}

#[derive(Default)]
pub struct PartnerQuery;

#[Object]
impl PartnerQuery {
    /// The partner named by the request headers; null when unknown.
    async fn partner(&self, ctx: &Context<'_>) -> async_graphql::Result<Option<Partner>> {
        Ok(current_partner(ctx).await?.cloned())
    }
}
