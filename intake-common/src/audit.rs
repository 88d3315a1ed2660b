//! Audit entries: field diffs, partial snapshots and history folding
//!
//! Every committed change produces one entry per field group it touched.
//! `old_value`/`new_value` carry only that group. The `created` entry carries
//! the full initial field state, so folding a complete history oldest-first
//! reproduces the submission's current fields.

use crate::change::double_option;
use crate::model::{AdminId, MutableFields, Priority, SubmissionStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What kind of change an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Created,
    StatusChanged,
    PriorityChanged,
    AssignmentChanged,
    TagsChanged,
    NotesUpdated,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Created => "created",
            ActionType::StatusChanged => "status_changed",
            ActionType::PriorityChanged => "priority_changed",
            ActionType::AssignmentChanged => "assignment_changed",
            ActionType::TagsChanged => "tags_changed",
            ActionType::NotesUpdated => "notes_updated",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(ActionType::Created),
            "status_changed" => Ok(ActionType::StatusChanged),
            "priority_changed" => Ok(ActionType::PriorityChanged),
            "assignment_changed" => Ok(ActionType::AssignmentChanged),
            "tags_changed" => Ok(ActionType::TagsChanged),
            "notes_updated" => Ok(ActionType::NotesUpdated),
            other => Err(Error::Internal(format!("Unknown audit action: '{}'", other))),
        }
    }
}

/// Partial snapshot of the mutable fields; absent members were not touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub assigned_to: Option<Option<AdminId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub admin_notes: Option<Option<String>>,
}

impl FieldSnapshot {
    /// Overwrite the members present in this snapshot
    pub fn apply_to(&self, fields: &mut MutableFields) {
        if let Some(status) = self.status {
            fields.status = status;
        }
        if let Some(priority) = self.priority {
            fields.priority = priority;
        }
        if let Some(assignee) = &self.assigned_to {
            fields.assigned_to = assignee.clone();
        }
        if let Some(tags) = &self.tags {
            fields.tags = tags.clone();
        }
        if let Some(notes) = &self.admin_notes {
            fields.admin_notes = notes.clone();
        }
    }

    /// True when every mutable field is present
    pub fn is_complete(&self) -> bool {
        self.status.is_some()
            && self.priority.is_some()
            && self.assigned_to.is_some()
            && self.tags.is_some()
            && self.admin_notes.is_some()
    }
}

impl From<&MutableFields> for FieldSnapshot {
    fn from(fields: &MutableFields) -> Self {
        Self {
            status: Some(fields.status),
            priority: Some(fields.priority),
            assigned_to: Some(fields.assigned_to.clone()),
            tags: Some(fields.tags.clone()),
            admin_notes: Some(fields.admin_notes.clone()),
        }
    }
}

/// One field group's before/after, ready to be written as an audit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub action: ActionType,
    pub old_value: Option<FieldSnapshot>,
    pub new_value: FieldSnapshot,
}

impl FieldDiff {
    /// The entry written when a submission enters the store
    pub fn created(fields: &MutableFields) -> Self {
        Self {
            action: ActionType::Created,
            old_value: None,
            new_value: FieldSnapshot::from(fields),
        }
    }
}

/// Diff two field states into per-group changes, in a fixed group order
pub fn diff_fields(before: &MutableFields, after: &MutableFields) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    if before.status != after.status {
        diffs.push(FieldDiff {
            action: ActionType::StatusChanged,
            old_value: Some(FieldSnapshot {
                status: Some(before.status),
                ..Default::default()
            }),
            new_value: FieldSnapshot {
                status: Some(after.status),
                ..Default::default()
            },
        });
    }
    if before.priority != after.priority {
        diffs.push(FieldDiff {
            action: ActionType::PriorityChanged,
            old_value: Some(FieldSnapshot {
                priority: Some(before.priority),
                ..Default::default()
            }),
            new_value: FieldSnapshot {
                priority: Some(after.priority),
                ..Default::default()
            },
        });
    }
    if before.assigned_to != after.assigned_to {
        diffs.push(FieldDiff {
            action: ActionType::AssignmentChanged,
            old_value: Some(FieldSnapshot {
                assigned_to: Some(before.assigned_to.clone()),
                ..Default::default()
            }),
            new_value: FieldSnapshot {
                assigned_to: Some(after.assigned_to.clone()),
                ..Default::default()
            },
        });
    }
    if before.tags != after.tags {
        diffs.push(FieldDiff {
            action: ActionType::TagsChanged,
            old_value: Some(FieldSnapshot {
                tags: Some(before.tags.clone()),
                ..Default::default()
            }),
            new_value: FieldSnapshot {
                tags: Some(after.tags.clone()),
                ..Default::default()
            },
        });
    }
    if before.admin_notes != after.admin_notes {
        diffs.push(FieldDiff {
            action: ActionType::NotesUpdated,
            old_value: Some(FieldSnapshot {
                admin_notes: Some(before.admin_notes.clone()),
                ..Default::default()
            }),
            new_value: FieldSnapshot {
                admin_notes: Some(after.admin_notes.clone()),
                ..Default::default()
            },
        });
    }

    diffs
}

/// Immutable record of one field-level change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub submission_id: Uuid,
    /// Monotonic per submission, starting at 1
    pub seq: i64,
    /// Absent for system-originated entries (ingestion)
    pub changed_by: Option<AdminId>,
    pub action_type: ActionType,
    pub old_value: Option<FieldSnapshot>,
    pub new_value: FieldSnapshot,
    pub created_at: DateTime<Utc>,
}

/// Order in which a history is returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    #[default]
    Oldest,
    Newest,
}

/// Rebuild the field state a history describes
///
/// Entries may be given in any order; they are folded by `seq`. Returns
/// `None` when the history does not start with a complete `created` entry.
pub fn fold_history(entries: &[AuditEntry]) -> Option<MutableFields> {
    let mut ordered: Vec<&AuditEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.seq);

    let (first, rest) = ordered.split_first()?;
    if first.action_type != ActionType::Created || !first.new_value.is_complete() {
        return None;
    }

    let mut fields = MutableFields::default();
    first.new_value.apply_to(&mut fields);
    for entry in rest {
        entry.new_value.apply_to(&mut fields);
    }
    Some(fields)
}
