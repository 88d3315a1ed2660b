//! Per-id reports for bulk operations
//!
//! A bulk mutation is not transactional across ids. Each id succeeds or fails
//! on its own and every outcome is returned to the caller.

use crate::error::ErrorKind;
use crate::model::Submission;
use crate::Error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to one id in a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkResult {
    Applied { submission: Submission },
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub id: Uuid,
    #[serde(flatten)]
    pub result: BulkResult,
}

impl BulkOutcome {
    pub fn from_result(id: Uuid, result: crate::Result<Submission>) -> Self {
        let result = match result {
            Ok(submission) => BulkResult::Applied { submission },
            Err(e) => BulkResult::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        };
        Self { id, result }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, BulkResult::Applied { .. })
    }

    /// The failure as an [`Error`], if this id failed
    pub fn error(&self) -> Option<Error> {
        match &self.result {
            BulkResult::Failed { kind, message } => Some(Error::from_kind(*kind, message.clone())),
            BulkResult::Applied { .. } => None,
        }
    }
}

/// Outcomes of a bulk operation, in request order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkReport {
    pub outcomes: Vec<BulkOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkReport {
    pub fn from_outcomes(outcomes: Vec<BulkOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        Self {
            outcomes,
            succeeded,
            failed,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.succeeded > 0 && self.failed > 0
    }

    pub fn applied(&self) -> impl Iterator<Item = &Submission> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            BulkResult::Applied { submission } => Some(submission),
            BulkResult::Failed { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (Uuid, ErrorKind, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            BulkResult::Failed { kind, message } => Some((o.id, *kind, message.as_str())),
            BulkResult::Applied { .. } => None,
        })
    }
}
