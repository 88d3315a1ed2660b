//! Audit Recorder
//!
//! Entries are only ever written on a connection borrowed from the same
//! transaction that writes the submission, so a record and its audit trail
//! commit or roll back together. Sequence numbers are allocated per
//! submission inside that transaction.

use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use intake_common::audit::{ActionType, AuditEntry, FieldDiff, FieldSnapshot, HistoryOrder};
use intake_common::model::AdminId;
use intake_common::time::{parse_db_string, to_db_string};
use intake_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

const HISTORY_OLDEST_FIRST: &str = r#"
    SELECT submission_id, seq, changed_by, action_type, old_value, new_value, created_at
    FROM audit_log WHERE submission_id = ? ORDER BY seq ASC
"#;

const HISTORY_NEWEST_FIRST: &str = r#"
    SELECT submission_id, seq, changed_by, action_type, old_value, new_value, created_at
    FROM audit_log WHERE submission_id = ? ORDER BY seq DESC
"#;

#[derive(Clone)]
pub struct AuditRecorder {
    pool: SqlitePool,
}

impl AuditRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one entry for `submission_id`
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        conn: &mut SqliteConnection,
        submission_id: Uuid,
        action_type: ActionType,
        old_value: Option<&FieldSnapshot>,
        new_value: &FieldSnapshot,
        actor: Option<&AdminId>,
        at: DateTime<Utc>,
    ) -> Result<AuditEntry> {
        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM audit_log WHERE submission_id = ?",
        )
        .bind(submission_id.to_string())
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                submission_id, seq, changed_by, action_type, old_value, new_value, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(submission_id.to_string())
        .bind(seq)
        .bind(actor.map(AdminId::as_str))
        .bind(action_type.as_str())
        .bind(old_value.map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(new_value)?)
        .bind(to_db_string(at))
        .execute(&mut *conn)
        .await?;

        Ok(AuditEntry {
            submission_id,
            seq,
            changed_by: actor.cloned(),
            action_type,
            old_value: old_value.cloned(),
            new_value: new_value.clone(),
            created_at: at,
        })
    }

    /// Append one entry per diff, in order
    pub async fn record_diffs(
        &self,
        conn: &mut SqliteConnection,
        submission_id: Uuid,
        diffs: &[FieldDiff],
        actor: Option<&AdminId>,
        at: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::with_capacity(diffs.len());
        for diff in diffs {
            let entry = self
                .record(
                    conn,
                    submission_id,
                    diff.action,
                    diff.old_value.as_ref(),
                    &diff.new_value,
                    actor,
                    at,
                )
                .await?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Lazily stream a submission's history
    ///
    /// Each call runs a fresh query, so a history can be re-read from the
    /// start at any time. Nothing here writes.
    pub fn history_stream(
        &self,
        submission_id: Uuid,
        order: HistoryOrder,
    ) -> impl Stream<Item = Result<AuditEntry>> + Send + '_ {
        let sql = match order {
            HistoryOrder::Oldest => HISTORY_OLDEST_FIRST,
            HistoryOrder::Newest => HISTORY_NEWEST_FIRST,
        };
        sqlx::query(sql)
            .bind(submission_id.to_string())
            .fetch(&self.pool)
            .map(|row| row.map_err(Error::from).and_then(|r| row_to_entry(&r)))
    }

    /// Collect a whole history
    pub async fn history(&self, submission_id: Uuid, order: HistoryOrder) -> Result<Vec<AuditEntry>> {
        let mut stream = Box::pin(self.history_stream(submission_id, order));
        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// Remove every entry of a submission (part of an irreversible delete)
    pub async fn delete_for(&self, conn: &mut SqliteConnection, submission_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_log WHERE submission_id = ?")
            .bind(submission_id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry> {
    let submission_id: String = row.try_get("submission_id")?;
    let changed_by: Option<String> = row.try_get("changed_by")?;
    let action_type: String = row.try_get("action_type")?;
    let old_value: Option<String> = row.try_get("old_value")?;
    let new_value: String = row.try_get("new_value")?;

    Ok(AuditEntry {
        submission_id: Uuid::parse_str(&submission_id)
            .map_err(|e| Error::Internal(format!("Bad audit submission id: {}", e)))?,
        seq: row.try_get("seq")?,
        changed_by: changed_by.map(AdminId::parse).transpose()?,
        action_type: action_type.parse()?,
        old_value: old_value.as_deref().map(serde_json::from_str).transpose()?,
        new_value: serde_json::from_str(&new_value)?,
        created_at: parse_db_string(row.try_get("created_at")?)?,
    })
}
