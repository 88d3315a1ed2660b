//! Mutation requests
//!
//! [`SubmissionChange`] is the validated, typed form the engine applies.
//! [`ChangeRequest`] is its wire shape, carrying plain strings; converting one
//! into the other is where malformed input is rejected.

use crate::model::{AdminId, MutableFields, Priority, SubmissionStatus};
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Longest tag accepted
pub const MAX_TAG_LEN: usize = 50;

/// Longest admin note accepted
pub const MAX_NOTES_LEN: usize = 10_000;

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`)
pub(crate) fn double_option<'de, T, D>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// How a change touches the tag set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEdit {
    Replace(BTreeSet<String>),
    Add(BTreeSet<String>),
    Remove(BTreeSet<String>),
}

impl TagEdit {
    fn apply_to(&self, tags: &BTreeSet<String>) -> BTreeSet<String> {
        match self {
            TagEdit::Replace(next) => next.clone(),
            TagEdit::Add(extra) => tags.union(extra).cloned().collect(),
            TagEdit::Remove(gone) => tags.difference(gone).cloned().collect(),
        }
    }

    fn tags(&self) -> &BTreeSet<String> {
        match self {
            TagEdit::Replace(t) | TagEdit::Add(t) | TagEdit::Remove(t) => t,
        }
    }
}

/// Typed change to the mutable fields of one submission
///
/// `assigned_to` and `admin_notes` use `Some(None)` to clear the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionChange {
    pub status: Option<SubmissionStatus>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<Option<AdminId>>,
    pub tags: Option<TagEdit>,
    pub admin_notes: Option<Option<String>>,
}

impl SubmissionChange {
    pub fn with_status(mut self, status: SubmissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_assignee(mut self, assignee: Option<AdminId>) -> Self {
        self.assigned_to = Some(assignee);
        self
    }

    pub fn with_tags(mut self, edit: TagEdit) -> Self {
        self.tags = Some(edit);
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.admin_notes = Some(notes);
        self
    }

    /// True when the change names no field at all
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
            && self.tags.is_none()
            && self.admin_notes.is_none()
    }

    /// Reject empty changes and malformed tags/notes
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Validation("Change names no field".to_string()));
        }
        if let Some(edit) = &self.tags {
            for tag in edit.tags() {
                validate_tag(tag)?;
            }
        }
        if let Some(Some(notes)) = &self.admin_notes {
            if notes.chars().count() > MAX_NOTES_LEN {
                return Err(Error::Validation(format!(
                    "Admin notes exceed {} characters",
                    MAX_NOTES_LEN
                )));
            }
        }
        Ok(())
    }

    /// Field state after this change, starting from `current`
    pub fn apply_to(&self, current: &MutableFields) -> MutableFields {
        let mut next = current.clone();
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(priority) = self.priority {
            next.priority = priority;
        }
        if let Some(assignee) = &self.assigned_to {
            next.assigned_to = assignee.clone();
        }
        if let Some(edit) = &self.tags {
            next.tags = edit.apply_to(&current.tags);
        }
        if let Some(notes) = &self.admin_notes {
            next.admin_notes = notes.clone();
        }
        next
    }
}

/// Normalize a tag (trim) and check it is well formed
pub fn normalize_tag(raw: &str) -> Result<String> {
    let tag = raw.trim().to_string();
    validate_tag(&tag)?;
    Ok(tag)
}

fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(Error::Validation("Tags must not be empty".to_string()));
    }
    if tag != tag.trim() {
        return Err(Error::Validation(format!(
            "Tag has surrounding whitespace: '{}'",
            tag
        )));
    }
    if tag.chars().count() > MAX_TAG_LEN {
        return Err(Error::Validation(format!(
            "Tag longer than {} characters: '{}'",
            MAX_TAG_LEN, tag
        )));
    }
    if tag.chars().any(char::is_control) {
        return Err(Error::Validation(format!(
            "Tag contains control characters: {:?}",
            tag
        )));
    }
    Ok(())
}

/// Wire form of a change
///
/// Exactly one of `tags`, `add_tags`, `remove_tags` may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub assigned_to: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_tags: Option<Vec<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub admin_notes: Option<Option<String>>,
}

fn tag_set(raw: &[String]) -> Result<BTreeSet<String>> {
    raw.iter().map(|t| normalize_tag(t)).collect()
}

impl TryFrom<ChangeRequest> for SubmissionChange {
    type Error = Error;

    fn try_from(req: ChangeRequest) -> Result<Self> {
        let status: Option<SubmissionStatus> = req.status.as_deref().map(str::parse).transpose()?;
        let priority: Option<Priority> = req.priority.as_deref().map(str::parse).transpose()?;

        let assigned_to = match req.assigned_to {
            None => None,
            Some(None) => Some(None),
            Some(Some(raw)) if raw.trim().is_empty() => Some(None),
            Some(Some(raw)) => Some(Some(AdminId::parse(raw)?)),
        };

        let tags = match (req.tags, req.add_tags, req.remove_tags) {
            (None, None, None) => None,
            (Some(t), None, None) => Some(TagEdit::Replace(tag_set(&t)?)),
            (None, Some(t), None) => Some(TagEdit::Add(tag_set(&t)?)),
            (None, None, Some(t)) => Some(TagEdit::Remove(tag_set(&t)?)),
            _ => {
                return Err(Error::Validation(
                    "Only one of tags, add_tags, remove_tags may be given".to_string(),
                ))
            }
        };

        // Blank notes clear the field
        let admin_notes = req.admin_notes.map(|notes| {
            notes.and_then(|n| {
                let trimmed = n.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        });

        let change = SubmissionChange {
            status,
            priority,
            assigned_to,
            tags,
            admin_notes,
        };
        change.validate()?;
        Ok(change)
    }
}

impl From<&SubmissionChange> for ChangeRequest {
    fn from(change: &SubmissionChange) -> Self {
        let mut req = ChangeRequest {
            status: change.status.map(|s| s.as_str().to_string()),
            priority: change.priority.map(|p| p.as_str().to_string()),
            assigned_to: change
                .assigned_to
                .as_ref()
                .map(|a| a.as_ref().map(|id| id.as_str().to_string())),
            admin_notes: change.admin_notes.clone(),
            ..Default::default()
        };
        match &change.tags {
            Some(TagEdit::Replace(t)) => req.tags = Some(t.iter().cloned().collect()),
            Some(TagEdit::Add(t)) => req.add_tags = Some(t.iter().cloned().collect()),
            Some(TagEdit::Remove(t)) => req.remove_tags = Some(t.iter().cloned().collect()),
            None => {}
        }
        req
    }
}
