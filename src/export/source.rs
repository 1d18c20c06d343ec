//! The data-source seam the paginator pulls from.

use async_trait::async_trait;

use crate::error::AppError;
use crate::export::record::Record;
use crate::salesforce::soql::PageQuery;

/// A remote system that can be logged into, counted, and paged.
///
/// Implementations answer `query_page` with at most `query.limit` records,
/// ascending by `query.sort_field`, filtered by the inclusive lower bound.
/// An empty page means nothing is left for that filter.
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// Authenticated handle required by the other calls.
    type Session: Send + Sync;

    async fn authenticate(&self) -> Result<Self::Session, AppError>;

    /// Point-in-time record count of the object.
    async fn count(&self, session: &Self::Session, object_name: &str) -> Result<u64, AppError>;

    async fn query_page(
        &self,
        session: &Self::Session,
        object_name: &str,
        query: &PageQuery,
    ) -> Result<Vec<Record>, AppError>;
}
