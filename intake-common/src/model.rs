//! Core data model: submissions, their lifecycle enums, and presence records

use crate::audit::{self, FieldDiff};
use crate::change::SubmissionChange;
use crate::payload::{FormPayload, FormType};
use crate::sla::{compute_sla, Sla, SlaStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of an authenticated admin, as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminId(String);

impl AdminId {
    /// Validate and wrap an admin identifier
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("Admin id must not be empty".to_string()));
        }
        if trimmed.len() > 128 || trimmed.chars().any(char::is_control) {
            return Err(Error::Validation(format!("Malformed admin id: '{}'", raw)));
        }
        Ok(AdminId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdminId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Triage lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    New,
    InProgress,
    Resolved,
    Archived,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::New => "new",
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Resolved => "resolved",
            SubmissionStatus::Archived => "archived",
        }
    }

    /// Resolved and archived submissions no longer run against their SLA
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Resolved | SubmissionStatus::Archived)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(SubmissionStatus::New),
            "in_progress" => Ok(SubmissionStatus::InProgress),
            "resolved" => Ok(SubmissionStatus::Resolved),
            "archived" => Ok(SubmissionStatus::Archived),
            other => Err(Error::InvalidTransition(format!(
                "Unknown status: '{}'",
                other
            ))),
        }
    }
}

/// Response priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Sort rank: high sorts first
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::Validation(format!("Unknown priority: '{}'", other))),
        }
    }
}

/// The fields an admin may change; everything the audit log tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutableFields {
    pub status: SubmissionStatus,
    pub priority: Priority,
    pub assigned_to: Option<AdminId>,
    pub tags: BTreeSet<String>,
    pub admin_notes: Option<String>,
}

impl Default for MutableFields {
    fn default() -> Self {
        Self {
            status: SubmissionStatus::New,
            priority: Priority::default(),
            assigned_to: None,
            tags: BTreeSet::new(),
            admin_notes: None,
        }
    }
}

/// One inbound form submission
///
/// `sla_deadline` and `sla_status` are derived; they are set only by
/// [`Submission::refresh_sla`] and by committed changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub payload: FormPayload,
    pub status: SubmissionStatus,
    pub priority: Priority,
    pub assigned_to: Option<AdminId>,
    pub tags: BTreeSet<String>,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    pub sla_status: SlaStatus,
    pub last_updated_by: Option<AdminId>,
    pub last_updated_at: DateTime<Utc>,
    /// Bumped once per committed change; used to discard stale events
    pub revision: i64,
}

/// Result of applying a change to a submission in memory
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub submission: Submission,
    /// One entry per field group that actually changed
    pub diffs: Vec<FieldDiff>,
}

impl AppliedChange {
    /// Nothing changed; nothing should be persisted, audited or published
    pub fn is_noop(&self) -> bool {
        self.diffs.is_empty()
    }
}

impl Submission {
    /// A freshly ingested submission
    pub fn new(id: Uuid, payload: FormPayload, now: DateTime<Utc>) -> Self {
        let fields = MutableFields::default();
        let sla = compute_sla(fields.priority, now, fields.status, now);
        Self {
            id,
            payload,
            status: fields.status,
            priority: fields.priority,
            assigned_to: fields.assigned_to,
            tags: fields.tags,
            admin_notes: fields.admin_notes,
            created_at: now,
            sla_deadline: sla.deadline,
            sla_status: sla.status,
            last_updated_by: None,
            last_updated_at: now,
            revision: 1,
        }
    }

    pub fn form_type(&self) -> FormType {
        self.payload.form_type()
    }

    /// Snapshot of the admin-editable fields
    pub fn fields(&self) -> MutableFields {
        MutableFields {
            status: self.status,
            priority: self.priority,
            assigned_to: self.assigned_to.clone(),
            tags: self.tags.clone(),
            admin_notes: self.admin_notes.clone(),
        }
    }

    fn set_fields(&mut self, fields: MutableFields) {
        self.status = fields.status;
        self.priority = fields.priority;
        self.assigned_to = fields.assigned_to;
        self.tags = fields.tags;
        self.admin_notes = fields.admin_notes;
    }

    /// SLA as of `now`, without touching the record
    ///
    /// Terminal submissions keep their frozen deadline.
    pub fn sla_at(&self, now: DateTime<Utc>) -> Sla {
        if self.status.is_terminal() {
            Sla {
                deadline: self.sla_deadline,
                status: SlaStatus::Met,
            }
        } else {
            compute_sla(self.priority, self.created_at, self.status, now)
        }
    }

    /// Re-evaluate the derived SLA fields for a read at `now`
    pub fn refresh_sla(&mut self, now: DateTime<Utc>) {
        let sla = self.sla_at(now);
        self.sla_deadline = sla.deadline;
        self.sla_status = sla.status;
    }

    /// Consuming form of [`Submission::refresh_sla`]
    pub fn with_current_sla(mut self, now: DateTime<Utc>) -> Self {
        self.refresh_sla(now);
        self
    }

    /// Apply a validated change, producing the next record and its field diffs
    ///
    /// A change that leaves every field as it was yields a no-op with the
    /// record untouched (no revision bump, no audit entries).
    pub fn apply_change(
        &self,
        change: &SubmissionChange,
        actor: &AdminId,
        now: DateTime<Utc>,
    ) -> AppliedChange {
        let before = self.fields();
        let after = change.apply_to(&before);
        let diffs = audit::diff_fields(&before, &after);
        if diffs.is_empty() {
            return AppliedChange {
                submission: self.clone(),
                diffs,
            };
        }

        let was_terminal = self.status.is_terminal();
        let mut next = self.clone();
        next.set_fields(after);
        next.last_updated_by = Some(actor.clone());
        next.last_updated_at = now;
        next.revision += 1;

        if next.status.is_terminal() {
            // Freeze the deadline the moment the submission leaves the open states
            if !was_terminal {
                next.sla_deadline =
                    compute_sla(next.priority, next.created_at, next.status, now).deadline;
            }
            next.sla_status = SlaStatus::Met;
        } else {
            let sla = compute_sla(next.priority, next.created_at, next.status, now);
            next.sla_deadline = sla.deadline;
            next.sla_status = sla.status;
        }

        AppliedChange {
            submission: next,
            diffs,
        }
    }
}

/// Who is online and what they are looking at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub admin_id: AdminId,
    pub admin_label: String,
    pub viewing_submission_id: Option<Uuid>,
    pub last_seen_at: DateTime<Utc>,
}
