//! Triage engine: the single mutation entry point
//!
//! Every mutation follows the same path:
//! 1. validate the change (no lock taken for malformed input)
//! 2. enter the submission's critical section, bounded by the mutation timeout
//! 3. read the current record and compute the next one plus its field diffs
//! 4. write record and audit entries in one transaction
//! 5. publish the change event, still inside the critical section
//!
//! Step 5 happening under the lock is what keeps per-id event order equal to
//! commit order. A change that alters nothing commits nothing and publishes
//! nothing.

use crate::audit::AuditRecorder;
use crate::store::{IdLocks, SubmissionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use intake_common::api::TriageBackend;
use intake_common::audit::{AuditEntry, FieldDiff, HistoryOrder};
use intake_common::bulk::{BulkOutcome, BulkReport};
use intake_common::change::SubmissionChange;
use intake_common::events::{ChangeEvent, EventBus};
use intake_common::model::{AdminId, Submission};
use intake_common::payload::{FormPayload, Fields};
use intake_common::time;
use intake_common::view::{derive_view_owned, SortKey, ViewFilters};
use intake_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct Engine {
    store: SubmissionStore,
    audit: AuditRecorder,
    locks: IdLocks,
    bus: EventBus,
    mutation_timeout: Duration,
}

impl Engine {
    pub fn new(pool: SqlitePool, bus: EventBus, mutation_timeout: Duration) -> Self {
        Self {
            store: SubmissionStore::new(pool.clone()),
            audit: AuditRecorder::new(pool),
            locks: IdLocks::new(),
            bus,
            mutation_timeout,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn locks(&self) -> &IdLocks {
        &self.locks
    }

    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    /// Ingest a new submission
    pub async fn create_submission(&self, form_type: &str, fields: Fields) -> Result<Submission> {
        let payload = FormPayload::from_parts(form_type, fields)?;
        self.create_submission_at(payload, time::now()).await
    }

    /// Ingest a typed payload as of `now`
    pub async fn create_submission_at(
        &self,
        payload: FormPayload,
        now: DateTime<Utc>,
    ) -> Result<Submission> {
        let submission = Submission::new(Uuid::new_v4(), payload, now);
        let created = FieldDiff::created(&submission.fields());

        let mut tx = self.pool().begin().await?;
        self.store.insert(&mut tx, &submission).await?;
        self.audit
            .record(
                &mut tx,
                submission.id,
                created.action,
                None,
                &created.new_value,
                None,
                now,
            )
            .await?;
        tx.commit().await?;

        info!(
            submission_id = %submission.id,
            form_type = %submission.form_type(),
            "Submission created"
        );
        self.bus.emit_lossy(ChangeEvent::created(submission.clone()));
        Ok(submission)
    }

    /// Apply one change to one submission
    ///
    /// Fails with `NotFound` for an unknown id, `InvalidTransition` or
    /// `Validation` for a malformed change, `Timeout` if the submission's
    /// critical section stays busy past the mutation timeout.
    pub async fn apply_mutation(
        &self,
        id: Uuid,
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<Submission> {
        change.validate()?;
        let _guard = self.locks.acquire(id, self.mutation_timeout).await?;

        let current = self
            .store
            .fetch(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Submission {}", id)))?;

        let now = time::now();
        let applied = current.apply_change(change, actor, now);
        if applied.is_noop() {
            debug!(submission_id = %id, actor = %actor, "Change leaves submission as is");
            return Ok(applied.submission.with_current_sla(now));
        }

        let next = applied.submission;
        let mut tx = self.pool().begin().await?;
        // The UPDATE comes first so the transaction holds the write lock
        // before the audit sequence is read
        self.store.update(&mut tx, &next).await?;
        if let Err(e) = self
            .audit
            .record_diffs(&mut tx, id, &applied.diffs, Some(actor), now)
            .await
        {
            error!(submission_id = %id, error = %e, "Audit write failed, rolling back");
            return Err(e);
        }
        tx.commit().await?;

        info!(
            submission_id = %id,
            actor = %actor,
            revision = next.revision,
            changes = applied.diffs.len(),
            "Submission updated"
        );
        self.bus.emit_lossy(ChangeEvent::updated(next.clone()));
        Ok(next)
    }

    /// Apply one change to many submissions, each id independently
    ///
    /// Ids are processed concurrently; the report lists outcomes in request
    /// order with duplicates collapsed. A malformed change fails the whole
    /// request up front, since it would fail identically for every id.
    pub async fn bulk_apply(
        &self,
        ids: &[Uuid],
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<BulkReport> {
        change.validate()?;

        let mut seen = HashSet::new();
        let unique: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let results = join_all(
            unique
                .iter()
                .map(|id| self.apply_mutation(*id, change, actor)),
        )
        .await;

        let outcomes: Vec<BulkOutcome> = unique
            .iter()
            .zip(results)
            .map(|(id, result)| {
                if let Err(e) = &result {
                    warn!(submission_id = %id, error = %e, "Bulk item failed");
                }
                BulkOutcome::from_result(*id, result)
            })
            .collect();

        let report = BulkReport::from_outcomes(outcomes);
        info!(
            actor = %actor,
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk change applied"
        );
        Ok(report)
    }

    /// Irreversibly delete submissions together with their audit history
    ///
    /// Unknown ids are skipped; the returned count covers only records that
    /// existed.
    pub async fn bulk_delete(&self, ids: &[Uuid], actor: &AdminId) -> Result<u64> {
        let guards = self.locks.acquire_many(ids, self.mutation_timeout).await?;

        let mut deleted = Vec::new();
        let mut tx = self.pool().begin().await?;
        for guard in &guards {
            let id = guard.id();
            if self.store.delete(&mut tx, id).await? {
                self.audit.delete_for(&mut tx, id).await?;
                deleted.push(id);
            }
        }
        tx.commit().await?;

        info!(actor = %actor, requested = ids.len(), deleted = deleted.len(), "Submissions deleted");
        for id in &deleted {
            self.bus.emit_lossy(ChangeEvent::deleted(*id));
        }
        drop(guards);
        Ok(deleted.len() as u64)
    }

    pub async fn get(&self, id: Uuid) -> Result<Submission> {
        self.store
            .fetch(id)
            .await?
            .map(|s| s.with_current_sla(time::now()))
            .ok_or_else(|| Error::NotFound(format!("Submission {}", id)))
    }

    /// Current submissions through the view pipeline, SLA evaluated now
    pub async fn list(&self, filters: &ViewFilters, sort: SortKey) -> Result<Vec<Submission>> {
        let now = time::now();
        let all = self
            .store
            .fetch_all()
            .await?
            .into_iter()
            .map(|s| s.with_current_sla(now))
            .collect();
        Ok(derive_view_owned(all, filters, sort, now))
    }

    pub async fn history(&self, id: Uuid, order: HistoryOrder) -> Result<Vec<AuditEntry>> {
        let entries = self.audit.history(id, order).await?;
        if entries.is_empty() && self.store.fetch(id).await?.is_none() {
            return Err(Error::NotFound(format!("Submission {}", id)));
        }
        Ok(entries)
    }
}

#[async_trait]
impl TriageBackend for Engine {
    async fn list_submissions(
        &self,
        filters: &ViewFilters,
        sort: SortKey,
    ) -> Result<Vec<Submission>> {
        self.list(filters, sort).await
    }

    async fn get_submission(&self, id: Uuid) -> Result<Submission> {
        self.get(id).await
    }

    async fn mutate(
        &self,
        id: Uuid,
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<Submission> {
        self.apply_mutation(id, change, actor).await
    }

    async fn mutate_many(
        &self,
        ids: &[Uuid],
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<BulkReport> {
        self.bulk_apply(ids, change, actor).await
    }

    async fn history(&self, id: Uuid, order: HistoryOrder) -> Result<Vec<AuditEntry>> {
        Engine::history(self, id, order).await
    }

    async fn bulk_delete(&self, ids: &[Uuid], actor: &AdminId) -> Result<u64> {
        Engine::bulk_delete(self, ids, actor).await
    }

    async fn create_submission(&self, form_type: &str, fields: Fields) -> Result<Submission> {
        Engine::create_submission(self, form_type, fields).await
    }
}
