use sea_orm::Condition;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Func, LikeExpr, SimpleExpr};

use super::joins::JoinSet;
use super::lookup::split_path;
use crate::errors::OrmError;
use crate::schema::FieldKind;

/// Keywords longer than this are cut before matching.
pub const MAX_KEYWORD_LENGTH: usize = 500;

/// Escape LIKE wildcards so a keyword matches literally
/// Escapes: % (match any) and _ (match single char)
#[must_use]
pub fn escape_like_wildcards(input: &str) -> String {
    input.replace('\\', "\\\\")  // Escape backslash first
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Trimmed, length-capped keyword; `None` when blank.
#[must_use]
pub fn normalize_keyword(keyword: &str) -> Option<String> {
    let trimmed = keyword.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_KEYWORD_LENGTH).collect())
}

/// `UPPER(alias.field) LIKE '%KEYWORD%' ESCAPE '\'`
#[must_use]
pub fn build_like_condition(alias: &str, field: &str, keyword: &str) -> SimpleExpr {
    let column = Expr::col((Alias::new(alias), Alias::new(field)));
    let pattern = format!("%{}%", escape_like_wildcards(keyword).to_uppercase());
    Func::upper(column).like(LikeExpr::new(pattern).escape('\\'))
}

/// Case-insensitive substring match of `keyword` against any of `fields`.
///
/// Field paths may cross relations (`contact__first_name`); the joins go into
/// `joins` next to the filter joins. Blank keywords or an empty field list
/// produce no predicate.
///
/// # Errors
/// Validation error for unknown paths or non-text fields.
pub fn keyword_condition<S: AsRef<str>>(
    joins: &mut JoinSet,
    keyword: &str,
    fields: &[S],
) -> Result<Option<Condition>, OrmError> {
    let Some(keyword) = normalize_keyword(keyword) else {
        return Ok(None);
    };
    if fields.is_empty() {
        return Ok(None);
    }

    let mut any = Condition::any();
    for path in fields {
        let mut segments = split_path(path.as_ref());
        let field_name = segments.pop().ok_or_else(|| {
            OrmError::validation(format!("Malformed search field '{}'", path.as_ref()))
        })?;
        let (alias, schema) = joins.resolve(&segments)?;
        let field = schema.require_field(&field_name)?;
        if field.kind != FieldKind::String {
            return Err(OrmError::validation(format!(
                "Search field '{}' on {} is not text",
                field.name, schema.name
            )));
        }
        any = any.add(build_like_condition(&alias, field.name, &keyword));
    }
    tracing::debug!(keyword = %keyword, fields = fields.len(), "keyword search");
    Ok(Some(any))
}
