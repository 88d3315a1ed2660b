//! Presence Registry: who is online and what they are viewing
//!
//! Purely in memory and rebuilt from live sessions. A record stays alive
//! while either its heartbeat is fresh or at least one event-stream session
//! is attached for that admin. It disappears on explicit untrack, when its
//! last session detaches, or when the sweeper finds it stale.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use intake_common::model::{AdminId, PresenceRecord};
use intake_common::time;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Records and attached-session counts, guarded together
///
/// Session counts live apart from the records so an explicit untrack does
/// not forget streams that are still open.
#[derive(Default)]
struct State {
    records: HashMap<AdminId, PresenceRecord>,
    sessions: HashMap<AdminId, usize>,
}

impl State {
    fn sessions(&self, admin_id: &AdminId) -> usize {
        self.sessions.get(admin_id).copied().unwrap_or(0)
    }

    fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.admin_id.cmp(&b.admin_id));
        records
    }
}

struct Inner {
    state: RwLock<State>,
    heartbeat_timeout: ChronoDuration,
    snapshots: watch::Sender<Vec<PresenceRecord>>,
}

#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<Inner>,
}

/// An attached event-stream session; detaches on drop
pub struct PresenceSession {
    admin_id: AdminId,
    registry: PresenceRegistry,
}

impl PresenceRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        let heartbeat_timeout =
            ChronoDuration::from_std(heartbeat_timeout).unwrap_or_else(|_| ChronoDuration::weeks(52));
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                heartbeat_timeout,
                snapshots,
            }),
        }
    }

    /// Upsert a record and reset its heartbeat
    pub fn track(
        &self,
        admin_id: AdminId,
        admin_label: impl Into<String>,
        viewing: Option<Uuid>,
    ) -> PresenceRecord {
        self.track_at(admin_id, admin_label, viewing, time::now())
    }

    pub fn track_at(
        &self,
        admin_id: AdminId,
        admin_label: impl Into<String>,
        viewing: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> PresenceRecord {
        let record = PresenceRecord {
            admin_id: admin_id.clone(),
            admin_label: admin_label.into(),
            viewing_submission_id: viewing,
            last_seen_at: now,
        };
        let mut state = self.write();
        state.records.insert(admin_id, record.clone());
        self.publish(&state);
        record
    }

    /// Remove an admin's record outright; returns whether one existed
    ///
    /// Attached sessions stay counted, so a later track is again protected
    /// from heartbeat eviction while a stream is open.
    pub fn untrack(&self, admin_id: &AdminId) -> bool {
        let mut state = self.write();
        let removed = state.records.remove(admin_id).is_some();
        if removed {
            debug!(admin_id = %admin_id, "Presence untracked");
            self.publish(&state);
        }
        removed
    }

    /// Attach an event-stream session for `admin_id`
    pub fn attach_session(
        &self,
        admin_id: AdminId,
        admin_label: impl Into<String>,
    ) -> PresenceSession {
        self.attach_session_at(admin_id, admin_label, time::now())
    }

    pub fn attach_session_at(
        &self,
        admin_id: AdminId,
        admin_label: impl Into<String>,
        now: DateTime<Utc>,
    ) -> PresenceSession {
        let admin_label = admin_label.into();
        {
            let mut state = self.write();
            *state.sessions.entry(admin_id.clone()).or_insert(0) += 1;
            let record = state
                .records
                .entry(admin_id.clone())
                .or_insert_with(|| PresenceRecord {
                    admin_id: admin_id.clone(),
                    admin_label: admin_label.clone(),
                    viewing_submission_id: None,
                    last_seen_at: now,
                });
            record.admin_label = admin_label;
            record.last_seen_at = now;
            self.publish(&state);
        }
        info!(admin_id = %admin_id, "Presence session attached");
        PresenceSession {
            admin_id,
            registry: self.clone(),
        }
    }

    fn detach_session(&self, admin_id: &AdminId) {
        let mut state = self.write();
        let remaining = state.sessions(admin_id).saturating_sub(1);
        if remaining > 0 {
            state.sessions.insert(admin_id.clone(), remaining);
            return;
        }
        state.sessions.remove(admin_id);
        if state.records.remove(admin_id).is_some() {
            info!(admin_id = %admin_id, "Presence session closed, record evicted");
            self.publish(&state);
        }
    }

    /// Every record, ordered by admin id
    pub fn list_online(&self) -> Vec<PresenceRecord> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Records of admins currently viewing `submission_id`
    pub fn list_viewing(&self, submission_id: Uuid) -> Vec<PresenceRecord> {
        self.list_online()
            .into_iter()
            .filter(|r| r.viewing_submission_id == Some(submission_id))
            .collect()
    }

    /// Drop records whose heartbeat is older than the timeout and that have
    /// no attached session; returns who was evicted
    pub fn evict_stale_at(&self, now: DateTime<Utc>) -> Vec<AdminId> {
        let cutoff = now - self.inner.heartbeat_timeout;
        let mut state = self.write();
        let stale: Vec<AdminId> = state
            .records
            .values()
            .filter(|r| state.sessions(&r.admin_id) == 0 && r.last_seen_at < cutoff)
            .map(|r| r.admin_id.clone())
            .collect();
        for id in &stale {
            state.records.remove(id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "Evicted stale presence records");
            self.publish(&state);
        }
        stale
    }

    /// Snapshot stream of the online set
    pub fn subscribe(&self) -> watch::Receiver<Vec<PresenceRecord>> {
        self.inner.snapshots.subscribe()
    }

    /// Periodically evict stale records until `cancel` fires
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Presence sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        registry.evict_stale_at(time::now());
                    }
                }
            }
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `state` while its write guard is held, so snapshots go out in
    /// the order the changes were made
    fn publish(&self, state: &State) {
        self.inner.snapshots.send_replace(state.snapshot());
    }
}

impl PresenceSession {
    pub fn admin_id(&self) -> &AdminId {
        &self.admin_id
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        self.registry.detach_session(&self.admin_id);
    }
}
