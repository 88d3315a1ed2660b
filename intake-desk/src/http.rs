//! HTTP client for the intake hub
//!
//! [`HttpBackend`] implements [`TriageBackend`] over the hub's JSON API so a
//! desk session can run against a remote hub exactly as it runs against an
//! in-process engine. Hub error bodies are mapped back onto the shared error
//! taxonomy; transport failures surface as `ConnectionLost`.

use async_trait::async_trait;
use intake_common::api::{
    BulkChangeRequest, BulkDeleteRequest, BulkDeleteResponse, CreateSubmissionRequest,
    TriageBackend,
};
use intake_common::audit::{AuditEntry, HistoryOrder};
use intake_common::bulk::BulkReport;
use intake_common::change::{ChangeRequest, SubmissionChange};
use intake_common::model::{AdminId, Submission};
use intake_common::payload::Fields;
use intake_common::view::{SortKey, ViewFilters};
use intake_common::{Error, ErrorKind, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

pub const ADMIN_ID_HEADER: &str = "x-admin-id";
pub const ADMIN_LABEL_HEADER: &str = "x-admin-label";

const USER_AGENT: &str = concat!("intake-desk/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

fn kind_for_code(code: &str) -> ErrorKind {
    match code {
        "NOT_FOUND" => ErrorKind::NotFound,
        "INVALID_TRANSITION" => ErrorKind::InvalidTransition,
        "VALIDATION_ERROR" | "BAD_REQUEST" => ErrorKind::Validation,
        "TIMEOUT" => ErrorKind::Timeout,
        "CONNECTION_LOST" => ErrorKind::ConnectionLost,
        _ => ErrorKind::Internal,
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::Internal(format!("Malformed hub response: {}", e))
    } else {
        Error::ConnectionLost(e.to_string())
    }
}

/// Turn a hub error response into the matching [`Error`]
async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return transport_error(e),
    };
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Error::from_kind(kind_for_code(&body.error.code), body.error.message),
        Err(_) => Error::Internal(format!("Hub returned {}: {}", status.as_u16(), text)),
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    response.json().await.map_err(transport_error)
}

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// `base_url` is the hub root, e.g. `http://127.0.0.1:5780`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // No client-wide timeout: the event stream stays open indefinitely
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).timeout(REQUEST_TIMEOUT)
    }

    fn as_admin(
        &self,
        method: reqwest::Method,
        path: &str,
        actor: &AdminId,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .header(ADMIN_ID_HEADER, actor.as_str())
    }

    /// Open the hub's change stream as `actor`
    ///
    /// While the returned response is alive the hub lists `actor` as online.
    pub async fn open_event_stream(
        &self,
        actor: &AdminId,
        label: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(self.url("/api/events"))
            .header(ADMIN_ID_HEADER, actor.as_str())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(label) = label {
            request = request.header(ADMIN_LABEL_HEADER, label);
        }
        let response = request.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        tracing::debug!(admin_id = %actor, "Opened change stream");
        Ok(response)
    }
}

#[async_trait]
impl TriageBackend for HttpBackend {
    async fn list_submissions(
        &self,
        filters: &ViewFilters,
        sort: SortKey,
    ) -> Result<Vec<Submission>> {
        let response = self
            .get("/api/submissions")
            .query(filters)
            .query(&[("sort", sort)])
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn get_submission(&self, id: Uuid) -> Result<Submission> {
        let response = self
            .get(&format!("/api/submissions/{}", id))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn mutate(
        &self,
        id: Uuid,
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<Submission> {
        let response = self
            .as_admin(reqwest::Method::PATCH, &format!("/api/submissions/{}", id), actor)
            .json(&ChangeRequest::from(change))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn mutate_many(
        &self,
        ids: &[Uuid],
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<BulkReport> {
        let body = BulkChangeRequest {
            ids: ids.to_vec(),
            change: ChangeRequest::from(change),
        };
        let response = self
            .as_admin(reqwest::Method::POST, "/api/submissions/bulk", actor)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn history(&self, id: Uuid, order: HistoryOrder) -> Result<Vec<AuditEntry>> {
        let response = self
            .get(&format!("/api/submissions/{}/history", id))
            .query(&[("order", order)])
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn bulk_delete(&self, ids: &[Uuid], actor: &AdminId) -> Result<u64> {
        let body = BulkDeleteRequest { ids: ids.to_vec() };
        let response = self
            .as_admin(reqwest::Method::POST, "/api/submissions/bulk-delete", actor)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let deleted: BulkDeleteResponse = read_json(response).await?;
        Ok(deleted.deleted)
    }

    async fn create_submission(&self, form_type: &str, fields: Fields) -> Result<Submission> {
        let body = CreateSubmissionRequest {
            form_type: form_type.to_string(),
            fields,
        };
        let response = self
            .client
            .post(self.url("/api/submissions"))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}
