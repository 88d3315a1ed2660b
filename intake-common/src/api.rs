//! Boundary between admin sessions and the triage engine
//!
//! The hub's engine implements [`TriageBackend`] in process; admin sessions
//! reach the same operations over HTTP. Both sides speak the same types.

use crate::audit::{AuditEntry, HistoryOrder};
use crate::bulk::BulkReport;
use crate::change::SubmissionChange;
use crate::model::{AdminId, Submission};
use crate::payload::Fields;
use crate::view::{SortKey, ViewFilters};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a bulk mutation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkChangeRequest {
    pub ids: Vec<Uuid>,
    pub change: crate::change::ChangeRequest,
}

/// Body of a bulk delete request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

/// Response of a bulk delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteResponse {
    pub deleted: u64,
}

/// Body of an ingestion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubmissionRequest {
    pub form_type: String,
    #[serde(default)]
    pub fields: Fields,
}

#[async_trait]
pub trait TriageBackend: Send + Sync {
    /// Current submissions, filtered and sorted
    async fn list_submissions(
        &self,
        filters: &ViewFilters,
        sort: SortKey,
    ) -> Result<Vec<Submission>>;

    async fn get_submission(&self, id: Uuid) -> Result<Submission>;

    /// Apply one change to one submission
    async fn mutate(
        &self,
        id: Uuid,
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<Submission>;

    /// Apply one change to many submissions, independently per id
    async fn mutate_many(
        &self,
        ids: &[Uuid],
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<BulkReport>;

    async fn history(&self, id: Uuid, order: HistoryOrder) -> Result<Vec<AuditEntry>>;

    /// Irreversibly delete submissions and their audit entries
    async fn bulk_delete(&self, ids: &[Uuid], actor: &AdminId) -> Result<u64>;

    /// Ingestion boundary
    async fn create_submission(&self, form_type: &str, fields: Fields) -> Result<Submission>;
}
