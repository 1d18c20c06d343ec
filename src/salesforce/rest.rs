//! Salesforce REST API client for counting, describing, and paging records.
//!
//! - **Count** - `SELECT COUNT()` against the object, read from `totalSize`
//! - **Describe** - field discovery when no explicit field list is configured
//! - **Page queries** - one bounded, sorted SOQL query per page
//! - **Secure logging** - never logs raw SOQL or record contents

use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::export::record::Record;
use crate::salesforce::client::SalesforceClient;
use crate::salesforce::soql::{build_count_soql, build_page_soql, validate_identifier, PageQuery};

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types (match Salesforce JSON exactly)
// ─────────────────────────────────────────────────────────────────────────────

/// Mirrors the Salesforce query response JSON.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQueryResponse {
    /// Total number of records that match the query (not just this batch).
    total_size: u64,
    /// Whether this is the last batch of results.
    done: bool,
    /// Relative URL of the next batch. Only present if `done` is false.
    next_records_url: Option<String>,
    #[serde(default)]
    records: Vec<serde_json::Value>,
}

/// Salesforce API error response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSalesforceError {
    message: String,
    error_code: String,
}

#[derive(Debug, Deserialize)]
struct WireDescribe {
    fields: Vec<WireField>,
}

#[derive(Debug, Deserialize)]
struct WireField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

/// Compound types cannot be selected alongside their components in every
/// API version, and their components already carry the data.
const COMPOUND_TYPES: &[&str] = &["address", "location"];

// ─────────────────────────────────────────────────────────────────────────────
// RestQueryClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for executing SOQL against the Salesforce REST API.
#[derive(Clone)]
pub struct RestQueryClient {
    client: SalesforceClient,
}

impl RestQueryClient {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// Returns the number of records the object currently holds.
    ///
    /// This is a point-in-time figure; concurrent inserts or deletes are not
    /// reflected once it has been read.
    pub async fn count(&self, object_name: &str) -> Result<u64, AppError> {
        let soql = build_count_soql(object_name)?;
        let url = self.build_query_url(&soql)?;
        let response = self.execute_query_request(url).await?;

        let wire: WireQueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse count response: {}", e)))?;

        info!("[REST] {} holds {} records", object_name, wire.total_size);
        Ok(wire.total_size)
    }

    /// Lists the selectable field names of an object, in describe order.
    pub async fn describe_fields(&self, object_name: &str) -> Result<Vec<String>, AppError> {
        validate_identifier(object_name)?;
        let path = format!(
            "{}/sobjects/{}/describe",
            self.client.session().data_path(),
            object_name
        );
        let url = self.client.build_url(&path)?;
        let response = self.execute_query_request(url).await?;

        let wire: WireDescribe = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse describe response: {}", e)))?;

        let fields: Vec<String> = wire
            .fields
            .into_iter()
            .filter(|f| !COMPOUND_TYPES.contains(&f.field_type.as_str()))
            .map(|f| f.name)
            .collect();

        info!("[REST] {} exposes {} fields", object_name, fields.len());
        Ok(fields)
    }

    /// Executes one page query and returns its records in server order.
    ///
    /// The server may split a large page into batches; those are followed
    /// until the page is complete.
    pub async fn query_page(
        &self,
        object_name: &str,
        fields: &[String],
        query: &PageQuery,
    ) -> Result<Vec<Record>, AppError> {
        let soql = build_page_soql(object_name, fields, query)?;
        let mut next_url = Some(self.build_query_url(&soql)?);
        let mut records = Vec::new();
        let mut batches: u32 = 0;

        while let Some(url) = next_url.take() {
            batches += 1;
            let response = self.execute_query_request(url).await?;

            let wire: WireQueryResponse = response
                .json()
                .await
                .map_err(|e| AppError::Internal(format!("Failed to parse query response: {}", e)))?;

            records.extend(wire.records.into_iter().filter_map(Record::from_json));

            if wire.done {
                break;
            }
            if let Some(next) = wire.next_records_url {
                next_url = Some(self.client.build_url(&next)?);
            }
        }

        info!(
            "[REST] Page of {}: {} records in {} batch(es)",
            object_name,
            records.len(),
            batches
        );
        Ok(records)
    }

    /// Builds a query URL with the SOQL string properly URL-encoded.
    fn build_query_url(&self, soql: &str) -> Result<Url, AppError> {
        let path = format!("{}/query", self.client.session().data_path());
        let mut url = self.client.build_url(&path)?;
        url.query_pairs_mut().append_pair("q", soql);
        Ok(url)
    }

    /// Executes a request and maps error responses.
    async fn execute_query_request(&self, url: Url) -> Result<reqwest::Response, AppError> {
        let response = self.client.get_authed(url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.handle_error_response(response, status).await);
        }

        Ok(response)
    }

    /// Parses an error body into `AppError::Salesforce`.
    async fn handle_error_response(
        &self,
        response: reqwest::Response,
        status: reqwest::StatusCode,
    ) -> AppError {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Unable to read error body"));

        if let Ok(errors) = serde_json::from_str::<Vec<WireSalesforceError>>(&body) {
            if let Some(first_error) = errors.first() {
                return AppError::Salesforce(format!(
                    "[{}] {}",
                    first_error.error_code, first_error.message
                ));
            }
        }

        AppError::Salesforce(format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
