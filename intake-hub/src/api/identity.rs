//! Admin identity supplied by the upstream identity provider
//!
//! The hub sits behind an authenticating proxy and trusts its headers.

use crate::error::ApiError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use intake_common::model::AdminId;

pub const ADMIN_ID_HEADER: &str = "x-admin-id";
pub const ADMIN_LABEL_HEADER: &str = "x-admin-label";

/// The admin a request acts for
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub id: AdminId,
    /// Display name; the id when no label header is sent
    pub label: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ADMIN_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", ADMIN_ID_HEADER)))?
            .to_str()
            .map_err(|_| ApiError::Unauthorized(format!("Unreadable {} header", ADMIN_ID_HEADER)))?;
        let id = AdminId::parse(raw).map_err(|e| ApiError::Unauthorized(e.to_string()))?;

        let label = parts
            .headers
            .get(ADMIN_LABEL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string());

        Ok(AdminIdentity { id, label })
    }
}
