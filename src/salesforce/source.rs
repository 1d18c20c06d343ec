//! Salesforce as a [`RemoteDataSource`].

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::SalesforceConfig;
use crate::error::AppError;
use crate::export::record::Record;
use crate::export::source::RemoteDataSource;
use crate::salesforce::client::SalesforceClient;
use crate::salesforce::login;
use crate::salesforce::rest::RestQueryClient;
use crate::salesforce::soql::PageQuery;

/// Logs in with username/password and pages through the REST query API.
pub struct SalesforceSource {
    http: reqwest::Client,
    config: SalesforceConfig,
    /// Explicit field list. Empty means every field reported by describe.
    fields: Vec<String>,
    sort_field: String,
    /// Identity field the exporter de-duplicates on; always selected.
    dedup_field: Option<String>,
}

/// An authenticated REST client plus the field list it selects.
///
/// The field list is resolved on the first page request and reused for the
/// rest of the session.
pub struct SalesforceSession {
    rest: RestQueryClient,
    fields: OnceCell<Vec<String>>,
}

impl SalesforceSource {
    pub fn new(
        http: reqwest::Client,
        config: SalesforceConfig,
        fields: Vec<String>,
        sort_field: impl Into<String>,
        dedup_field: Option<String>,
    ) -> Self {
        Self {
            http,
            config,
            fields,
            sort_field: sort_field.into(),
            dedup_field,
        }
    }

    async fn resolve_fields(
        &self,
        rest: &RestQueryClient,
        object_name: &str,
    ) -> Result<Vec<String>, AppError> {
        let mut fields = if self.fields.is_empty() {
            rest.describe_fields(object_name).await?
        } else {
            self.fields.clone()
        };

        let required = std::iter::once(&self.sort_field).chain(self.dedup_field.as_ref());
        for name in required {
            if !fields.iter().any(|f| f.eq_ignore_ascii_case(name)) {
                fields.push(name.clone());
            }
        }

        info!("[SFDC] Selecting {} fields from {}", fields.len(), object_name);
        Ok(fields)
    }
}

#[async_trait]
impl RemoteDataSource for SalesforceSource {
    type Session = SalesforceSession;

    async fn authenticate(&self) -> Result<SalesforceSession, AppError> {
        let session = login::authenticate(&self.http, &self.config).await?;
        Ok(SalesforceSession {
            rest: RestQueryClient::new(SalesforceClient::new(self.http.clone(), session)),
            fields: OnceCell::new(),
        })
    }

    async fn count(&self, session: &SalesforceSession, object_name: &str) -> Result<u64, AppError> {
        session.rest.count(object_name).await
    }

    async fn query_page(
        &self,
        session: &SalesforceSession,
        object_name: &str,
        query: &PageQuery,
    ) -> Result<Vec<Record>, AppError> {
        let fields = session
            .fields
            .get_or_try_init(|| self.resolve_fields(&session.rest, object_name))
            .await?;
        session.rest.query_page(object_name, fields, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::paginator::{ExtractOptions, PaginatedExporter, StopReason};
    use crate::export::record::FieldValue;
    use crate::salesforce::login::wiremock_tests::{config, success_body};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_login(mock_server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/services/Soap/u/60.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(success_body(&mock_server.uri())))
            .expect(1)
            .mount(mock_server)
            .await;
    }

    async fn mount_count(mock_server: &MockServer, object: &str, total: u64) {
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .and(query_param("q", format!("SELECT COUNT() FROM {}", object)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalSize": total,
                "done": true,
                "records": []
            })))
            .expect(1)
            .mount(mock_server)
            .await;
    }

    fn history_rows(ids: std::ops::Range<usize>) -> Vec<serde_json::Value> {
        ids.map(|i| {
            serde_json::json!({
                "attributes": {"type": "OpportunityHistory"},
                "Id": format!("008xx{:010}", i),
                "StageName": "Prospecting",
                "CloseDate": format!("2023-01-{:02}", i + 1)
            })
        })
        .collect()
    }

    #[tokio::test]
    async fn explicit_fields_gain_the_sort_field() {
        let mock_server = MockServer::start().await;
        mount_login(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .and(query_param(
                "q",
                "SELECT Id, StageName, CloseDate FROM OpportunityHistory ORDER BY CloseDate ASC LIMIT 2",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalSize": 2,
                "done": true,
                "records": history_rows(0..2)
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SalesforceSource::new(
            reqwest::Client::new(),
            config(&mock_server.uri()),
            vec!["Id".into(), "StageName".into()],
            "CloseDate",
            Some("Id".into()),
        );
        let session = source.authenticate().await.unwrap();
        let page = source
            .query_page(&session, "OpportunityHistory", &PageQuery::first("CloseDate", 2))
            .await
            .unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].field_names().collect::<Vec<_>>(), vec!["Id", "StageName", "CloseDate"]);
    }

    #[tokio::test]
    async fn describe_runs_once_per_session() {
        let mock_server = MockServer::start().await;
        mount_login(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/sobjects/OpportunityHistory/describe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "fields": [
                    {"name": "Id", "type": "id"},
                    {"name": "StageName", "type": "picklist"},
                    {"name": "CloseDate", "type": "date"}
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalSize": 1,
                "done": true,
                "records": history_rows(0..1)
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        let source = SalesforceSource::new(
            reqwest::Client::new(),
            config(&mock_server.uri()),
            Vec::new(),
            "CloseDate",
            Some("Id".into()),
        );
        let session = source.authenticate().await.unwrap();
        for _ in 0..2 {
            source
                .query_page(&session, "OpportunityHistory", &PageQuery::first("CloseDate", 1))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn full_extraction_against_mock_org() {
        let mock_server = MockServer::start().await;
        mount_login(&mock_server).await;
        mount_count(&mock_server, "OpportunityHistory", 5).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .and(query_param(
                "q",
                "SELECT Id, CloseDate FROM OpportunityHistory ORDER BY CloseDate ASC LIMIT 3",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalSize": 3,
                "done": true,
                "records": history_rows(0..3)
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        // Boundary record 2 comes back first on the second page.
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .and(query_param(
                "q",
                "SELECT Id, CloseDate FROM OpportunityHistory WHERE CloseDate >= 2023-01-03 \
                 ORDER BY CloseDate ASC LIMIT 3",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalSize": 3,
                "done": true,
                "records": history_rows(2..5)
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SalesforceSource::new(
            reqwest::Client::new(),
            config(&mock_server.uri()),
            vec!["Id".into(), "CloseDate".into()],
            "CloseDate",
            Some("Id".into()),
        );
        let exporter = PaginatedExporter::new(
            &source,
            ExtractOptions {
                object_name: "OpportunityHistory".into(),
                sort_field: "CloseDate".into(),
                page_size: 3,
                dedup_field: Some("Id".into()),
            },
        );

        let extraction = exporter.extract().await.unwrap();
        assert_eq!(extraction.records.len(), 5);
        assert_eq!(extraction.pages, 2);
        assert_eq!(extraction.duplicates_skipped, 1);
        assert_eq!(extraction.stop_reason, StopReason::Complete);
        assert_eq!(
            extraction.records[4].get("Id"),
            Some(&FieldValue::Text("008xx0000000004".into()))
        );
    }

    /// Serves a sorted table the way the query endpoint does: inclusive
    /// lower bound on CloseDate, ascending, limited.
    struct HistoryTable {
        rows: Vec<serde_json::Value>,
    }

    impl wiremock::Respond for HistoryTable {
        fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
            let soql = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            if !soql.starts_with("SELECT StageName, CloseDate, Id FROM OpportunityHistory") {
                return ResponseTemplate::new(400).set_body_json(serde_json::json!([
                    {"message": format!("unexpected query: {}", soql), "errorCode": "MALFORMED_QUERY"}
                ]));
            }
            let bound = soql
                .split_once(">= ")
                .map(|(_, rest)| rest.split_whitespace().next().unwrap_or_default().to_string());
            let limit: usize = soql.rsplit("LIMIT ").next().unwrap().trim().parse().unwrap();

            let records: Vec<_> = self
                .rows
                .iter()
                .filter(|r| match &bound {
                    Some(b) => r["CloseDate"].as_str().unwrap() >= b.as_str(),
                    None => true,
                })
                .take(limit)
                .cloned()
                .collect();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalSize": records.len(),
                "done": true,
                "records": records
            }))
        }
    }

    #[tokio::test]
    async fn explicit_fields_without_identity_still_deduplicate() {
        let mock_server = MockServer::start().await;
        mount_login(&mock_server).await;
        mount_count(&mock_server, "OpportunityHistory", 6).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .respond_with(HistoryTable {
                rows: history_rows(0..6),
            })
            .mount(&mock_server)
            .await;

        let source = SalesforceSource::new(
            reqwest::Client::new(),
            config(&mock_server.uri()),
            vec!["StageName".into()],
            "CloseDate",
            Some("Id".into()),
        );
        let exporter = PaginatedExporter::new(
            &source,
            ExtractOptions {
                object_name: "OpportunityHistory".into(),
                sort_field: "CloseDate".into(),
                page_size: 3,
                dedup_field: Some("Id".into()),
            },
        );

        let extraction = exporter.extract().await.unwrap();
        let dates: Vec<String> = extraction
            .records
            .iter()
            .map(|r| r.get("CloseDate").unwrap().to_string())
            .collect();

        assert_eq!(
            dates,
            vec!["2023-01-01", "2023-01-02", "2023-01-03", "2023-01-04", "2023-01-05", "2023-01-06"]
        );
        assert_eq!(extraction.stop_reason, StopReason::Complete);
        assert_eq!(extraction.duplicates_skipped, 2);
    }
}
