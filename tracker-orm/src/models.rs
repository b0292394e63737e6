use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as Json;
use utoipa::{IntoParams, ToSchema};

use crate::errors::OrmError;
use crate::filtering::{FilterKey, Pagination, Q};
use crate::query::{FilterParams, SearchParams};
use crate::relations::Relations;

/// Query-string keys with a fixed meaning; everything else is a filter.
pub const RESERVED_KEYS: &[&str] = &["relations", "order_by", "page", "page_size", "distinct"];

/// Query parameters for keyword search with optional paging.
///
/// `fields`, `order_by` and `relations` are comma separated. Relation paths
/// nest with `.` or `__`, e.g. `relations=contact,contact.goals`.
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Case-insensitive substring matched against `fields`
    #[param(example = "salary")]
    pub keyword: Option<String>,
    /// Text fields to search, e.g. `description,contact.first_name`
    pub fields: Option<String>,
    /// 1-based page number; omit for an unpaged list
    #[param(minimum = 1)]
    pub page: Option<u64>,
    #[param(minimum = 1)]
    pub page_size: Option<u64>,
    /// Field paths with optional `-` for descending, e.g. `-amount,id`
    pub order_by: Option<String>,
    pub relations: Option<String>,
}

impl ListQuery {
    /// `default_fields` apply when the query names none.
    ///
    /// # Errors
    /// Validation error for a zero page or page size.
    pub fn into_search(self, default_fields: &[&str]) -> Result<SearchParams, OrmError> {
        let fields = match self.fields.as_deref().map(split_csv) {
            Some(fields) if !fields.is_empty() => fields,
            _ => default_fields.iter().map(ToString::to_string).collect(),
        };
        let mut params = FilterParams::new()
            .relations(self.relations.as_deref().map_or(Relations::None, Relations::from_csv))
            .order_by(self.order_by.as_deref().map(split_csv).unwrap_or_default());
        params.pagination = Pagination::from_parts(self.page, self.page_size)?;
        Ok(SearchParams::new(self.keyword, fields).with_params(params))
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// The literal `null` is SQL NULL; list operators split on commas.
fn filter_value(key: &FilterKey, raw: &str) -> Json {
    let scalar = |s: &str| match s {
        "null" => Json::Null,
        other => Json::String(other.to_string()),
    };
    if key.operator.takes_list() {
        Json::Array(raw.split(',').map(str::trim).map(scalar).collect())
    } else {
        scalar(raw)
    }
}

/// Builds filter parameters from raw query-string pairs such as
/// `amount__gte=100&contact__first_name=Ann&relations=contact&page=2`.
///
/// String values are coerced to each field's kind when the filter compiles.
///
/// # Errors
/// Validation errors for malformed keys, unsupported operators and
/// non-numeric or zero paging values.
pub fn filter_params_from_query(query: &HashMap<String, String>) -> Result<FilterParams, OrmError> {
    let mut keys: Vec<&String> = query.keys().collect();
    keys.sort();

    let mut filters = Q::new();
    for key in keys {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let parsed = FilterKey::parse(key)?;
        filters.push(key.clone(), filter_value(&parsed, &query[key]));
    }

    let number = |name: &str| -> Result<Option<u64>, OrmError> {
        query
            .get(name)
            .map(|raw| {
                raw.trim().parse::<u64>().map_err(|_| {
                    OrmError::validation(format!("{name} must be a positive integer, got '{raw}'"))
                })
            })
            .transpose()
    };

    let mut params = FilterParams::new()
        .filters(filters)
        .relations(query.get("relations").map_or(Relations::None, |raw| Relations::from_csv(raw)))
        .order_by(query.get("order_by").map(|raw| split_csv(raw)).unwrap_or_default());
    params.distinct = query.get("distinct").cloned().filter(|d| !d.is_empty());
    params.pagination = Pagination::from_parts(number("page")?, number("page_size")?)?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_reserved_keys_are_not_filters() {
        let params = filter_params_from_query(&query(&[
            ("amount__gte", "100"),
            ("relations", "contact"),
            ("order_by", "-amount, id"),
            ("page", "2"),
            ("page_size", "5"),
        ]))
        .unwrap();

        assert_eq!(params.filters.entries(), &[("amount__gte".to_string(), json!("100"))]);
        assert_eq!(params.relations, Relations::paths(["contact"]));
        assert_eq!(params.order_by, vec!["-amount", "id"]);
        let pagination = params.pagination.unwrap();
        assert_eq!((pagination.page, pagination.page_size), (2, 5));
    }

    #[test]
    fn test_list_operators_split_and_null_literal() {
        let params = filter_params_from_query(&query(&[
            ("description__in", "rent,null"),
            ("contact_id", "null"),
        ]))
        .unwrap();
        let entries = params.filters.entries();
        assert_eq!(entries[0], ("contact_id".to_string(), Json::Null));
        assert_eq!(entries[1], ("description__in".to_string(), json!(["rent", null])));
    }

    #[test]
    fn test_bad_page_is_rejected() {
        let err = filter_params_from_query(&query(&[("page", "zero")])).unwrap_err();
        assert!(err.to_string().contains("page must be a positive integer"));
        assert!(filter_params_from_query(&query(&[("page", "0")])).is_err());
    }

    #[test]
    fn test_list_query_uses_default_fields() {
        let search = ListQuery {
            keyword: Some("ann".into()),
            ..ListQuery::default()
        }
        .into_search(&["first_name", "last_name"])
        .unwrap();
        assert_eq!(search.fields, vec!["first_name", "last_name"]);
        assert!(search.params.pagination.is_none());

        let search = ListQuery {
            fields: Some("description".into()),
            page: Some(1),
            ..ListQuery::default()
        }
        .into_search(&["first_name"])
        .unwrap();
        assert_eq!(search.fields, vec!["description"]);
        assert_eq!(search.params.pagination.unwrap().page, 1);
    }
}
