//! SOQL rendering for paged, cursor-filtered queries.
//!
//! # Security
//!
//! The rendered SOQL carries cursor values from live data and is never logged.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::error::AppError;
use crate::export::record::FieldValue;

/// One bounded page request: optional inclusive lower bound on the sort
/// field, ascending order on that field, and a row limit.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub sort_field: String,
    /// `sort_field >= lower_bound` when set.
    pub lower_bound: Option<FieldValue>,
    pub limit: u32,
}

impl PageQuery {
    /// First page: no filter.
    pub fn first(sort_field: impl Into<String>, limit: u32) -> Self {
        Self {
            sort_field: sort_field.into(),
            lower_bound: None,
            limit,
        }
    }

    /// Subsequent page starting at (and including) `cursor`.
    pub fn after(sort_field: impl Into<String>, cursor: FieldValue, limit: u32) -> Self {
        Self {
            sort_field: sort_field.into(),
            lower_bound: Some(cursor),
            limit,
        }
    }
}

/// Checks that a field or object name is a plain API name.
///
/// Names are spliced into SOQL, so anything beyond `[A-Za-z0-9_.]` is refused.
pub fn validate_identifier(name: &str) -> Result<(), AppError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
        && !name.starts_with('.')
        && !name.ends_with('.');
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid Salesforce API name: {:?}", name)))
    }
}

/// Renders a cursor value as a SOQL literal.
///
/// Date and datetime literals are unquoted. Datetimes are normalised to UTC
/// with whole-second precision; truncating sub-seconds can only lower an
/// inclusive bound, never skip a record.
pub fn render_literal(value: &FieldValue) -> Result<String, AppError> {
    match value {
        FieldValue::Null => Err(AppError::Salesforce(
            "cannot page on a null sort value".to_string(),
        )),
        FieldValue::Bool(b) => Ok(b.to_string()),
        FieldValue::Number(n) => Ok(n.to_string()),
        FieldValue::Text(s) => {
            if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
                return Ok(s.clone());
            }
            if let Some(dt) = parse_datetime(s) {
                return Ok(dt.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
            Ok(quote(s))
        }
    }
}

/// Parses the datetime shapes the REST API emits
/// (`2023-06-01T12:00:00.000+0000`) as well as RFC 3339.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Quotes a string literal, escaping backslashes and single quotes.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Builds the full page query.
///
/// `fields` must already contain the sort field.
pub fn build_page_soql(
    object_name: &str,
    fields: &[String],
    query: &PageQuery,
) -> Result<String, AppError> {
    validate_identifier(object_name)?;
    validate_identifier(&query.sort_field)?;
    if fields.is_empty() {
        return Err(AppError::Salesforce(format!(
            "no fields to select from {}",
            object_name
        )));
    }
    for field in fields {
        validate_identifier(field)?;
    }

    let mut soql = format!("SELECT {} FROM {}", fields.join(", "), object_name);
    if let Some(bound) = &query.lower_bound {
        soql.push_str(&format!(
            " WHERE {} >= {}",
            query.sort_field,
            render_literal(bound)?
        ));
    }
    soql.push_str(&format!(
        " ORDER BY {} ASC LIMIT {}",
        query.sort_field, query.limit
    ));
    Ok(soql)
}

/// Builds the row-count query for an object.
pub fn build_count_soql(object_name: &str) -> Result<String, AppError> {
    validate_identifier(object_name)?;
    Ok(format!("SELECT COUNT() FROM {}", object_name))
}
