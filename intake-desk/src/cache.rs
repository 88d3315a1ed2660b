//! Session cache: one admin session's local copy of the submission list
//!
//! The cache changes only through [`SessionCache::reduce`]. Two kinds of
//! input reach it: local optimistic edits (with their later confirmation or
//! failure) and authoritative state from the hub (snapshots and change
//! events).
//!
//! Every submission with an unconfirmed local edit has one pending slot
//! holding the last authoritative record (the rollback target) and the token
//! of the most recent local edit. A failure only rolls back when its token is
//! still the latest one, so an older edit failing after a newer one was
//! issued leaves the newer edit on screen.
//!
//! Events are accepted only when their revision is newer than the last
//! authoritative revision seen for that id, which drops duplicate and stale
//! deliveries. While reconnecting, events are held back until the next
//! snapshot arrives and are then replayed on top of it.

use chrono::{DateTime, Utc};
use intake_common::change::SubmissionChange;
use intake_common::events::{ChangeEvent, ChangeKind};
use intake_common::model::{AdminId, Submission};
use intake_common::view::{derive_view_owned, SortKey, ViewFilters};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};
use uuid::Uuid;

/// Identifies one local mutation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Applying events as they arrive
    Live,
    /// No current snapshot; events are buffered until one arrives
    Reconnecting,
}

#[derive(Debug, Clone)]
pub enum CacheAction {
    /// Full authoritative state, fetched after (re)connecting
    Snapshot(Vec<Submission>),
    /// A change delivered by the event stream
    Event(ChangeEvent),
    /// A local edit about to be sent to the hub
    OptimisticApply {
        id: Uuid,
        change: SubmissionChange,
        actor: AdminId,
        at: DateTime<Utc>,
        token: MutationToken,
    },
    /// The hub accepted the edit and returned the committed record
    MutationSucceeded {
        token: MutationToken,
        submission: Submission,
    },
    /// The hub rejected the edit or could not be reached
    MutationFailed { id: Uuid, token: MutationToken },
    /// The event stream dropped; state is stale until the next snapshot
    ConnectionLost,
}

#[derive(Debug, Clone)]
struct Pending {
    authoritative: Submission,
    token: MutationToken,
}

#[derive(Debug)]
pub struct SessionCache {
    submissions: HashMap<Uuid, Submission>,
    pending: HashMap<Uuid, Pending>,
    /// Ids deleted since the last snapshot; late events must not revive them
    deleted: HashSet<Uuid>,
    buffered: Vec<ChangeEvent>,
    connection: ConnectionState,
    next_token: u64,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            submissions: HashMap::new(),
            pending: HashMap::new(),
            deleted: HashSet::new(),
            buffered: Vec::new(),
            connection: ConnectionState::Reconnecting,
            next_token: 0,
        }
    }

    /// Issue a token for a new local mutation
    pub fn issue_token(&mut self) -> MutationToken {
        self.next_token += 1;
        MutationToken(self.next_token)
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn get(&self, id: Uuid) -> Option<&Submission> {
        self.submissions.get(&id)
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    /// Every cached submission, in no particular order
    pub fn submissions(&self) -> impl Iterator<Item = &Submission> {
        self.submissions.values()
    }

    /// Filtered, sorted copy of the cache
    pub fn view(&self, filters: &ViewFilters, sort: SortKey, now: DateTime<Utc>) -> Vec<Submission> {
        derive_view_owned(self.submissions.values().cloned().collect(), filters, sort, now)
    }

    /// Apply one action; returns whether anything visible changed
    pub fn reduce(&mut self, action: CacheAction) -> bool {
        match action {
            CacheAction::Snapshot(list) => self.apply_snapshot(list),
            CacheAction::Event(event) => {
                if self.connection == ConnectionState::Reconnecting {
                    trace!(submission_id = %event.submission_id, "Buffering event until snapshot");
                    self.buffered.push(event);
                    false
                } else {
                    self.apply_event(event)
                }
            }
            CacheAction::OptimisticApply {
                id,
                change,
                actor,
                at,
                token,
            } => self.apply_optimistic(id, &change, &actor, at, token),
            CacheAction::MutationSucceeded { token, submission } => {
                self.confirm(token, submission)
            }
            CacheAction::MutationFailed { id, token } => self.roll_back(id, token),
            CacheAction::ConnectionLost => {
                if self.connection == ConnectionState::Live {
                    debug!("Change stream lost, waiting for snapshot");
                }
                self.connection = ConnectionState::Reconnecting;
                false
            }
        }
    }

    fn apply_snapshot(&mut self, list: Vec<Submission>) -> bool {
        let mut next: HashMap<Uuid, Submission> = list.into_iter().map(|s| (s.id, s)).collect();

        // Keep local edits on top of the fresh state
        let pending = std::mem::take(&mut self.pending);
        for (id, slot) in pending {
            if let Some(fresh) = next.get(&id).cloned() {
                if let Some(shown) = self.submissions.get(&id) {
                    if shown.revision > fresh.revision {
                        next.insert(id, shown.clone());
                    }
                }
                self.pending.insert(
                    id,
                    Pending {
                        authoritative: fresh,
                        token: slot.token,
                    },
                );
            }
        }

        self.submissions = next;
        self.deleted.clear();
        self.connection = ConnectionState::Live;

        for event in std::mem::take(&mut self.buffered) {
            self.apply_event(event);
        }
        debug!(count = self.submissions.len(), "Snapshot applied");
        true
    }

    /// Last revision known to be committed for `id`
    fn authoritative_revision(&self, id: Uuid) -> Option<i64> {
        match self.pending.get(&id) {
            Some(slot) => Some(slot.authoritative.revision),
            None => self.submissions.get(&id).map(|s| s.revision),
        }
    }

    fn accept_authoritative(&mut self, submission: Submission) -> bool {
        let id = submission.id;
        if self.deleted.contains(&id) {
            return false;
        }
        if let Some(known) = self.authoritative_revision(id) {
            if submission.revision <= known {
                trace!(submission_id = %id, revision = submission.revision, "Discarding stale state");
                return false;
            }
        }
        if let Some(slot) = self.pending.get_mut(&id) {
            slot.authoritative = submission.clone();
        }
        // Authoritative state replaces whatever was shown, pending or not
        self.submissions.insert(id, submission);
        true
    }

    fn apply_event(&mut self, event: ChangeEvent) -> bool {
        match (event.kind, event.submission) {
            (ChangeKind::Deleted, _) => {
                let id = event.submission_id;
                self.pending.remove(&id);
                self.deleted.insert(id);
                self.submissions.remove(&id).is_some()
            }
            (_, Some(submission)) => self.accept_authoritative(submission),
            (kind, None) => {
                debug!(?kind, submission_id = %event.submission_id, "Event without record ignored");
                false
            }
        }
    }

    fn apply_optimistic(
        &mut self,
        id: Uuid,
        change: &SubmissionChange,
        actor: &AdminId,
        at: DateTime<Utc>,
        token: MutationToken,
    ) -> bool {
        let Some(current) = self.submissions.get(&id) else {
            return false;
        };
        let applied = current.apply_change(change, actor, at);
        if applied.is_noop() {
            return false;
        }

        let authoritative = match self.pending.remove(&id) {
            Some(slot) => slot.authoritative,
            None => current.clone(),
        };
        self.pending.insert(id, Pending { authoritative, token });
        self.submissions.insert(id, applied.submission);
        true
    }

    fn confirm(&mut self, token: MutationToken, submission: Submission) -> bool {
        let id = submission.id;
        let latest = self.pending.get(&id).map(|slot| slot.token) == Some(token);
        if !latest {
            // An older edit: its result is authoritative but must not
            // replace a newer optimistic value on screen
            if let Some(slot) = self.pending.get_mut(&id) {
                if submission.revision > slot.authoritative.revision {
                    slot.authoritative = submission;
                }
                return false;
            }
            return self.accept_authoritative(submission);
        }

        let changed = self.accept_authoritative(submission);
        self.pending.remove(&id);
        changed
    }

    fn roll_back(&mut self, id: Uuid, token: MutationToken) -> bool {
        match self.pending.get(&id) {
            Some(slot) if slot.token == token => {}
            _ => {
                debug!(submission_id = %id, "Ignoring failure of superseded edit");
                return false;
            }
        }
        if let Some(slot) = self.pending.remove(&id) {
            debug!(submission_id = %id, revision = slot.authoritative.revision, "Rolling back local edit");
            self.submissions.insert(id, slot.authoritative);
            return true;
        }
        false
    }
}
