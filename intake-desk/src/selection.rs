//! Per-session selection and cursor
//!
//! The selection is a set of submission ids; the cursor is an index into the
//! currently visible (filtered, sorted) rows. Neither is shared between
//! sessions or persisted.

use intake_common::api::TriageBackend;
use intake_common::bulk::BulkReport;
use intake_common::change::SubmissionChange;
use intake_common::model::AdminId;
use intake_common::Result;
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct Selection {
    ids: BTreeSet<Uuid>,
    cursor: usize,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `id`; returns whether it is now selected
    pub fn toggle(&mut self, id: Uuid) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    /// Select every visible id (adds to the current selection)
    pub fn select_all(&mut self, visible: impl IntoIterator<Item = Uuid>) {
        self.ids.extend(visible);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn is_selected(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.ids.iter().copied().collect()
    }

    /// Drop ids that no longer exist
    pub fn forget(&mut self, gone: &[Uuid]) {
        for id in gone {
            self.ids.remove(id);
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor down, stopping at the last visible row
    pub fn move_down(&mut self, visible: usize) {
        if visible == 0 {
            return;
        }
        self.cursor = (self.cursor + 1).min(visible - 1);
    }

    pub fn move_up(&mut self, visible: usize) {
        if visible == 0 {
            return;
        }
        self.clamp(visible);
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Keep the cursor inside the visible rows after the view changed
    pub fn clamp(&mut self, visible: usize) {
        self.cursor = self.cursor.min(visible.saturating_sub(1));
    }

    /// Id of the row under the cursor
    pub fn cursor_id(&self, visible: &[Uuid]) -> Option<Uuid> {
        if visible.is_empty() {
            return None;
        }
        visible.get(self.cursor.min(visible.len() - 1)).copied()
    }

    /// Apply `change` to every selected id, independently per id
    ///
    /// An empty selection sends nothing and returns an empty report.
    pub async fn bulk_apply(
        &self,
        backend: &dyn TriageBackend,
        change: &SubmissionChange,
        actor: &AdminId,
    ) -> Result<BulkReport> {
        if self.ids.is_empty() {
            return Ok(BulkReport::from_outcomes(Vec::new()));
        }

        let ids = self.ids();
        let report = backend.mutate_many(&ids, change, actor).await?;
        for (id, kind, message) in report.failures() {
            warn!(submission_id = %id, ?kind, "Bulk change failed: {}", message);
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk change applied to selection"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use intake_common::audit::{AuditEntry, HistoryOrder};
    use intake_common::bulk::BulkOutcome;
    use intake_common::model::{Submission, SubmissionStatus};
    use intake_common::payload::Fields;
    use intake_common::view::{SortKey, ViewFilters};
    use intake_common::Error;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Backend on which every mutation finds nothing to change
    struct MissingEverything;

    #[async_trait]
    impl TriageBackend for MissingEverything {
        async fn list_submissions(&self, _: &ViewFilters, _: SortKey) -> Result<Vec<Submission>> {
            Ok(Vec::new())
        }

        async fn get_submission(&self, id: Uuid) -> Result<Submission> {
            Err(Error::NotFound(format!("Submission {}", id)))
        }

        async fn mutate(&self, id: Uuid, _: &SubmissionChange, _: &AdminId) -> Result<Submission> {
            Err(Error::NotFound(format!("Submission {}", id)))
        }

        async fn mutate_many(
            &self,
            ids: &[Uuid],
            _: &SubmissionChange,
            _: &AdminId,
        ) -> Result<BulkReport> {
            let outcomes = ids
                .iter()
                .map(|id| {
                    BulkOutcome::from_result(*id, Err(Error::NotFound(format!("Submission {}", id))))
                })
                .collect();
            Ok(BulkReport::from_outcomes(outcomes))
        }

        async fn history(&self, id: Uuid, _: HistoryOrder) -> Result<Vec<AuditEntry>> {
            Err(Error::NotFound(format!("Submission {}", id)))
        }

        async fn bulk_delete(&self, _: &[Uuid], _: &AdminId) -> Result<u64> {
            Ok(0)
        }

        async fn create_submission(&self, _: &str, _: Fields) -> Result<Submission> {
            Err(Error::Internal("ingestion not supported".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bulk_apply_logs_every_failure_when_all_fail() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut selection = Selection::new();
        selection.select_all([a, b]);

        let change = SubmissionChange::default().with_status(SubmissionStatus::Resolved);
        let report = selection
            .bulk_apply(&MissingEverything, &change, &AdminId::parse("ana").unwrap())
            .await
            .unwrap();
        assert_eq!(report.failed, 2);
        assert!(!report.is_partial());

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        for id in [a, b] {
            assert!(
                output.contains(&id.to_string()),
                "no failure line for {} in:\n{}",
                id,
                output
            );
        }
    }

    #[tokio::test]
    async fn test_empty_selection_sends_nothing() {
        let report = Selection::new()
            .bulk_apply(
                &MissingEverything,
                &SubmissionChange::default().with_status(SubmissionStatus::Resolved),
                &AdminId::parse("ana").unwrap(),
            )
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn test_toggle_and_select_all() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut selection = Selection::new();

        assert!(selection.toggle(a));
        assert!(!selection.toggle(a));
        assert!(selection.is_empty());

        selection.toggle(c);
        selection.select_all([a, b]);
        assert_eq!(selection.len(), 3);

        selection.forget(&[b]);
        assert!(!selection.is_selected(b));

        selection.clear();
        assert!(selection.is_empty());
    }

    #[test]
    fn test_cursor_stays_inside_visible_rows() {
        let mut selection = Selection::new();
        selection.move_up(3);
        assert_eq!(selection.cursor(), 0);

        for _ in 0..5 {
            selection.move_down(3);
        }
        assert_eq!(selection.cursor(), 2);

        // View shrank underneath the cursor
        selection.clamp(1);
        assert_eq!(selection.cursor(), 0);

        selection.move_down(0);
        assert_eq!(selection.cursor(), 0);
        assert_eq!(selection.cursor_id(&[]), None);
    }

    #[test]
    fn test_cursor_id_tracks_row() {
        let rows = vec![Uuid::new_v4(), Uuid::new_v4()];
        let mut selection = Selection::new();
        selection.move_down(rows.len());
        assert_eq!(selection.cursor_id(&rows), Some(rows[1]));
        assert_eq!(selection.cursor_id(&rows[..1]), Some(rows[0]));
    }
}
