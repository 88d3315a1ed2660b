//! Admin desk controller
//!
//! Owns one session's cache, selection, filters and opened submission, and
//! turns keyboard [`Command`]s into backend calls. Marking applies
//! optimistically and reconciles with the backend's answer; every failure is
//! rolled back and reported per id.

use crate::cache::{CacheAction, MutationToken, SessionCache};
use crate::keyboard::{self, Command, KeyInput};
use crate::selection::Selection;
use chrono::{DateTime, Utc};
use intake_common::api::TriageBackend;
use intake_common::bulk::{BulkOutcome, BulkReport, BulkResult};
use intake_common::change::SubmissionChange;
use intake_common::events::{ChangeEvent, ChangeKind};
use intake_common::model::{AdminId, Submission, SubmissionStatus};
use intake_common::time;
use intake_common::view::{SortKey, ViewFilters};
use intake_common::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// What a dispatched command did
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Nothing to act on
    Nothing,
    Moved { cursor: usize },
    Opened(Uuid),
    Closed,
    Toggled { id: Uuid, selected: bool },
    SelectedAll(usize),
    /// Per-id results of a status change
    Marked(BulkReport),
    Deleted(u64),
}

pub struct Desk {
    backend: Arc<dyn TriageBackend>,
    actor: AdminId,
    cache: SessionCache,
    selection: Selection,
    filters: ViewFilters,
    sort: SortKey,
    opened: Option<Uuid>,
}

impl Desk {
    pub fn new(backend: Arc<dyn TriageBackend>, actor: AdminId) -> Self {
        Self {
            backend,
            actor,
            cache: SessionCache::new(),
            selection: Selection::new(),
            filters: ViewFilters::default(),
            sort: SortKey::default(),
            opened: None,
        }
    }

    pub fn actor(&self) -> &AdminId {
        &self.actor
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn opened(&self) -> Option<Uuid> {
        self.opened
    }

    pub fn filters(&self) -> &ViewFilters {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: ViewFilters) {
        self.filters = filters;
        self.selection.clamp(self.visible(time::now()).len());
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
    }

    /// Rows currently on screen
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<Submission> {
        self.cache.view(&self.filters, self.sort, now)
    }

    /// Re-fetch the full list and replace the cache
    ///
    /// The snapshot is unfiltered; filtering stays local.
    pub async fn refresh(&mut self) -> Result<()> {
        let all = self
            .backend
            .list_submissions(&ViewFilters::default(), SortKey::Date)
            .await?;
        self.apply(CacheAction::Snapshot(all));
        Ok(())
    }

    pub fn apply(&mut self, action: CacheAction) -> bool {
        let deleted = match &action {
            CacheAction::Event(event) if event.kind == ChangeKind::Deleted => Some(event.submission_id),
            _ => None,
        };
        let changed = self.cache.reduce(action);
        if let Some(id) = deleted {
            self.forget(&[id]);
        }
        changed
    }

    /// Apply every action already waiting on `rx`
    pub fn drain(&mut self, rx: &mut mpsc::Receiver<CacheAction>) -> usize {
        let mut applied = 0;
        while let Ok(action) = rx.try_recv() {
            self.apply(action);
            applied += 1;
        }
        applied
    }

    /// Decode a key press and dispatch it
    pub async fn handle_key(&mut self, input: KeyInput) -> Result<DispatchOutcome> {
        match keyboard::decode(input) {
            Some(command) => self.dispatch(command).await,
            None => Ok(DispatchOutcome::Nothing),
        }
    }

    pub async fn dispatch(&mut self, command: Command) -> Result<DispatchOutcome> {
        self.dispatch_at(command, time::now()).await
    }

    /// Run `command` against the view as of `now`
    pub async fn dispatch_at(
        &mut self,
        command: Command,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let rows: Vec<Uuid> = self.visible(now).iter().map(|s| s.id).collect();
        if rows.is_empty() {
            debug!(?command, "No visible rows, ignoring command");
            return Ok(DispatchOutcome::Nothing);
        }
        self.selection.clamp(rows.len());

        let outcome = match command {
            Command::NavigateDown => {
                self.selection.move_down(rows.len());
                DispatchOutcome::Moved {
                    cursor: self.selection.cursor(),
                }
            }
            Command::NavigateUp => {
                self.selection.move_up(rows.len());
                DispatchOutcome::Moved {
                    cursor: self.selection.cursor(),
                }
            }
            Command::Open => match self.selection.cursor_id(&rows) {
                Some(id) => {
                    self.opened = Some(id);
                    DispatchOutcome::Opened(id)
                }
                None => DispatchOutcome::Nothing,
            },
            Command::Close => match self.opened.take() {
                Some(_) => DispatchOutcome::Closed,
                None => DispatchOutcome::Nothing,
            },
            Command::ToggleSelection => match self.selection.cursor_id(&rows) {
                Some(id) => DispatchOutcome::Toggled {
                    id,
                    selected: self.selection.toggle(id),
                },
                None => DispatchOutcome::Nothing,
            },
            Command::SelectAll => {
                self.selection.select_all(rows.iter().copied());
                DispatchOutcome::SelectedAll(self.selection.len())
            }
            Command::MarkStatus(status) => self.mark(status, now).await?,
            Command::Delete => self.delete(now).await?,
        };
        Ok(outcome)
    }

    /// Ids a mark/delete acts on: the selection, else the opened submission
    fn targets(&self) -> Vec<Uuid> {
        if self.selection.is_empty() {
            self.opened.into_iter().collect()
        } else {
            self.selection.ids()
        }
    }

    async fn mark(&mut self, status: SubmissionStatus, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let targets = self.targets();
        if targets.is_empty() {
            return Ok(DispatchOutcome::Nothing);
        }
        let change = SubmissionChange::default().with_status(status);

        let tokens: Vec<(Uuid, MutationToken)> = targets
            .iter()
            .map(|&id| {
                let token = self.cache.issue_token();
                self.cache.reduce(CacheAction::OptimisticApply {
                    id,
                    change: change.clone(),
                    actor: self.actor.clone(),
                    at: now,
                    token,
                });
                (id, token)
            })
            .collect();

        let report = if self.selection.is_empty() {
            let id = targets[0];
            let result = self.backend.mutate(id, &change, &self.actor).await;
            BulkReport::from_outcomes(vec![BulkOutcome::from_result(id, result)])
        } else {
            match self
                .selection
                .bulk_apply(self.backend.as_ref(), &change, &self.actor)
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    for (id, token) in tokens {
                        self.cache.reduce(CacheAction::MutationFailed { id, token });
                    }
                    return Err(e);
                }
            }
        };

        for (id, token) in tokens {
            let outcome = report.outcomes.iter().find(|o| o.id == id);
            match outcome.map(|o| &o.result) {
                Some(BulkResult::Applied { submission }) => {
                    self.cache.reduce(CacheAction::MutationSucceeded {
                        token,
                        submission: submission.clone(),
                    });
                }
                _ => {
                    self.cache.reduce(CacheAction::MutationFailed { id, token });
                }
            }
        }

        info!(
            %status,
            succeeded = report.succeeded,
            failed = report.failed,
            "Marked submissions"
        );
        Ok(DispatchOutcome::Marked(report))
    }

    async fn delete(&mut self, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let targets = self.targets();
        if targets.is_empty() {
            return Ok(DispatchOutcome::Nothing);
        }
        let deleted = self.backend.bulk_delete(&targets, &self.actor).await?;

        for &id in &targets {
            self.cache.reduce(CacheAction::Event(ChangeEvent::deleted(id)));
        }
        self.forget(&targets);
        self.selection.clamp(self.visible(now).len());
        info!(requested = targets.len(), deleted, "Deleted submissions");
        Ok(DispatchOutcome::Deleted(deleted))
    }

    fn forget(&mut self, gone: &[Uuid]) {
        self.selection.forget(gone);
        if self.opened.is_some_and(|id| gone.contains(&id)) {
            self.opened = None;
        }
    }
}
