//! SLA clock
//!
//! Response budgets are fixed policy, measured from `created_at`:
//! high → 1 hour, medium → 24 hours, low → 48 hours.
//!
//! Classification for open submissions:
//! - `overdue` once `now` is past the deadline
//! - `approaching` when less than a quarter of the budget remains
//! - `on_track` otherwise
//!
//! Resolved and archived submissions are always `met`; their deadline is the
//! one stored at the moment they left the open states, never recomputed here.

use crate::model::{Priority, SubmissionStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Share of the budget below which a submission counts as approaching (1/4)
pub const APPROACHING_DIVISOR: i32 = 4;

/// Derived SLA classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    OnTrack,
    Approaching,
    Overdue,
    Met,
}

impl SlaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaStatus::OnTrack => "on_track",
            SlaStatus::Approaching => "approaching",
            SlaStatus::Overdue => "overdue",
            SlaStatus::Met => "met",
        }
    }
}

impl fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlaStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "on_track" => Ok(SlaStatus::OnTrack),
            "approaching" => Ok(SlaStatus::Approaching),
            "overdue" => Ok(SlaStatus::Overdue),
            "met" => Ok(SlaStatus::Met),
            other => Err(crate::Error::Validation(format!(
                "Unknown SLA status: '{}'",
                other
            ))),
        }
    }
}

/// Deadline plus its classification at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sla {
    pub deadline: DateTime<Utc>,
    pub status: SlaStatus,
}

/// Response budget for a priority
pub fn budget(priority: Priority) -> Duration {
    match priority {
        Priority::High => Duration::hours(1),
        Priority::Medium => Duration::hours(24),
        Priority::Low => Duration::hours(48),
    }
}

/// Compute deadline and classification
///
/// Pure: identical inputs always give identical output.
pub fn compute_sla(
    priority: Priority,
    created_at: DateTime<Utc>,
    status: SubmissionStatus,
    now: DateTime<Utc>,
) -> Sla {
    let total = budget(priority);
    let deadline = created_at + total;

    let status = if status.is_terminal() {
        SlaStatus::Met
    } else if now > deadline {
        SlaStatus::Overdue
    } else if deadline - now < total / APPROACHING_DIVISOR {
        SlaStatus::Approaching
    } else {
        SlaStatus::OnTrack
    };

    Sla { deadline, status }
}
