//! View derivation: filter and sort a submission list
//!
//! [`derive_view`] is pure. Every active filter must match (logical AND);
//! an unset filter matches everything. SLA filtering evaluates the SLA clock
//! at the `now` passed in, never the stored snapshot.

use crate::model::{AdminId, Priority, Submission, SubmissionStatus};
use crate::payload::FormType;
use crate::sla::SlaStatus;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Assignee predicate: nobody, or one particular admin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AssigneeFilter {
    Unassigned,
    Admin(AdminId),
}

impl AssigneeFilter {
    fn matches(&self, assigned_to: Option<&AdminId>) -> bool {
        match self {
            AssigneeFilter::Unassigned => assigned_to.is_none(),
            AssigneeFilter::Admin(id) => assigned_to == Some(id),
        }
    }
}

impl fmt::Display for AssigneeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssigneeFilter::Unassigned => f.write_str("unassigned"),
            AssigneeFilter::Admin(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for AssigneeFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "unassigned" => Ok(AssigneeFilter::Unassigned),
            other => Ok(AssigneeFilter::Admin(AdminId::parse(other)?)),
        }
    }
}

impl TryFrom<String> for AssigneeFilter {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AssigneeFilter> for String {
    fn from(filter: AssigneeFilter) -> Self {
        filter.to_string()
    }
}

/// Sort order of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Newest submissions first
    #[default]
    Date,
    /// High before medium before low, newest first within a rank
    Priority,
}

/// Active filters of a view; `None` means "any"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilters {
    /// Free-text search over payload fields and admin notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_type: Option<FormType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<AssigneeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaStatus>,
}

impl ViewFilters {
    pub fn is_empty(&self) -> bool {
        *self == ViewFilters::default()
    }

    /// True when `submission` passes every active filter at `now`
    pub fn matches(&self, submission: &Submission, now: DateTime<Utc>) -> bool {
        if let Some(q) = self.search_needle() {
            let in_notes = submission
                .admin_notes
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&q));
            if !in_notes && !submission.payload.contains_text(&q) {
                return false;
            }
        }
        if let Some(form_type) = &self.form_type {
            if submission.form_type() != *form_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if submission.status != status {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if !assignee.matches(submission.assigned_to.as_ref()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !submission.tags.contains(tag.trim()) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if submission.priority != priority {
                return false;
            }
        }
        if let Some(sla) = self.sla {
            if submission.sla_at(now).status != sla {
                return false;
            }
        }
        true
    }

    fn search_needle(&self) -> Option<String> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase)
    }
}

fn compare(a: &Submission, b: &Submission, sort: SortKey) -> Ordering {
    let by_date = b.created_at.cmp(&a.created_at);
    let primary = match sort {
        SortKey::Date => by_date,
        SortKey::Priority => a.priority.rank().cmp(&b.priority.rank()).then(by_date),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Filter and order `submissions` for display
pub fn derive_view<'a>(
    submissions: &'a [Submission],
    filters: &ViewFilters,
    sort: SortKey,
    now: DateTime<Utc>,
) -> Vec<&'a Submission> {
    let mut view: Vec<&Submission> = submissions
        .iter()
        .filter(|s| filters.matches(s, now))
        .collect();
    view.sort_by(|a, b| compare(a, b, sort));
    view
}

/// Owned variant of [`derive_view`], used where the caller hands over the list
pub fn derive_view_owned(
    mut submissions: Vec<Submission>,
    filters: &ViewFilters,
    sort: SortKey,
    now: DateTime<Utc>,
) -> Vec<Submission> {
    submissions.retain(|s| filters.matches(s, now));
    submissions.sort_by(|a, b| compare(a, b, sort));
    submissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{FormPayload, Fields};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn make(
        minutes: i64,
        status: SubmissionStatus,
        priority: Priority,
        form: &str,
    ) -> Submission {
        let mut fields = Fields::new();
        fields.insert("name".into(), json!(format!("sender {}", minutes)));
        let payload = FormPayload::from_parts(form, fields).unwrap();
        let mut s = Submission::new(Uuid::new_v4(), payload, t0() + Duration::minutes(minutes));
        s.status = status;
        s.priority = priority;
        s
    }

    #[test]
    fn test_status_filter_with_priority_sort() {
        use Priority::*;
        use SubmissionStatus::*;
        let subs = vec![
            make(0, New, Low, "contact"),
            make(1, New, High, "contact"),
            make(2, Resolved, High, "contact"),
            make(3, New, Medium, "feedback"),
            make(4, New, High, "contact"),
            make(5, InProgress, Low, "contact"),
        ];
        let filters = ViewFilters {
            status: Some(New),
            ..Default::default()
        };
        let view = derive_view(&subs, &filters, SortKey::Priority, t0());
        let order: Vec<_> = view.iter().map(|s| s.created_at).collect();
        let minute = |m| t0() + Duration::minutes(m);
        assert_eq!(order, vec![minute(4), minute(1), minute(3), minute(0)]);
        assert!(view.iter().all(|s| s.status == New));
    }

    #[test]
    fn test_date_sort_is_newest_first() {
        let subs: Vec<_> = (0..4)
            .map(|m| make(m, SubmissionStatus::New, Priority::Medium, "contact"))
            .collect();
        let view = derive_view(&subs, &ViewFilters::default(), SortKey::Date, t0());
        let minutes: Vec<_> = view
            .iter()
            .map(|s| (s.created_at - t0()).num_minutes())
            .collect();
        assert_eq!(minutes, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_filters_are_anded() {
        let mut a = make(0, SubmissionStatus::New, Priority::High, "contact");
        a.tags.insert("vip".into());
        a.assigned_to = Some(AdminId::parse("ana").unwrap());
        let mut b = make(1, SubmissionStatus::New, Priority::High, "contact");
        b.tags.insert("vip".into());
        let subs = vec![a.clone(), b.clone()];

        let filters = ViewFilters {
            tag: Some("vip".into()),
            assignee: Some("ana".parse().unwrap()),
            ..Default::default()
        };
        let view = derive_view(&subs, &filters, SortKey::Date, t0());
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, a.id);

        let unassigned = ViewFilters {
            assignee: Some(AssigneeFilter::Unassigned),
            form_type: Some(FormType::Contact),
            ..Default::default()
        };
        let view = derive_view(&subs, &unassigned, SortKey::Date, t0());
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, b.id);
    }

    #[test]
    fn test_search_matches_payload_and_notes() {
        let mut a = make(0, SubmissionStatus::New, Priority::Low, "contact");
        a.admin_notes = Some("Refund Requested".into());
        let b = make(7, SubmissionStatus::New, Priority::Low, "contact");
        let subs = vec![a.clone(), b.clone()];

        let by_note = ViewFilters {
            q: Some("  REFUND ".into()),
            ..Default::default()
        };
        assert_eq!(derive_view(&subs, &by_note, SortKey::Date, t0())[0].id, a.id);

        let by_payload = ViewFilters {
            q: Some("Sender 7".into()),
            ..Default::default()
        };
        let view = derive_view(&subs, &by_payload, SortKey::Date, t0());
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, b.id);

        let blank = ViewFilters {
            q: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(derive_view(&subs, &blank, SortKey::Date, t0()).len(), 2);
    }

    #[test]
    fn test_sla_filter_uses_now() {
        let s = make(0, SubmissionStatus::New, Priority::High, "contact");
        let subs = vec![s];
        let overdue = ViewFilters {
            sla: Some(SlaStatus::Overdue),
            ..Default::default()
        };
        assert!(derive_view(&subs, &overdue, SortKey::Date, t0()).is_empty());
        let later = t0() + Duration::minutes(61);
        assert_eq!(derive_view(&subs, &overdue, SortKey::Date, later).len(), 1);
    }

    #[test]
    fn test_assignee_filter_strings() {
        assert_eq!(
            "unassigned".parse::<AssigneeFilter>().unwrap(),
            AssigneeFilter::Unassigned
        );
        assert_eq!(String::from(AssigneeFilter::Unassigned), "unassigned");
        assert!("".parse::<AssigneeFilter>().is_err());
    }

    #[test]
    fn test_owned_view_matches_borrowed() {
        let subs: Vec<_> = (0..3)
            .map(|m| make(m, SubmissionStatus::New, Priority::Low, "inquiry"))
            .collect();
        let borrowed: Vec<_> = derive_view(&subs, &ViewFilters::default(), SortKey::Priority, t0())
            .into_iter()
            .map(|s| s.id)
            .collect();
        let owned: Vec<_> =
            derive_view_owned(subs, &ViewFilters::default(), SortKey::Priority, t0())
                .into_iter()
                .map(|s| s.id)
                .collect();
        assert_eq!(borrowed, owned);
    }
}
