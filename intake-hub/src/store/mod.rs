//! Submission Store: the single writer of submission records
//!
//! Reads go straight to the pool. Writes take a connection borrowed from an
//! open transaction so the engine can commit a record together with its
//! audit entries.

pub mod locks;

pub use locks::{IdGuard, IdLocks};

use intake_common::model::{AdminId, Submission};
use intake_common::payload::{FormPayload, RawPayload};
use intake_common::time::{parse_db_string, to_db_string};
use intake_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, form_type, payload, status, priority, assigned_to, tags, admin_notes,
           created_at, sla_deadline, sla_status, last_updated_by, last_updated_at, revision
    FROM submissions
"#;

#[derive(Clone)]
pub struct SubmissionStore {
    pool: SqlitePool,
}

impl SubmissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<Submission>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_submission).transpose()
    }

    pub async fn fetch_all(&self) -> Result<Vec<Submission>> {
        let sql = format!("{} ORDER BY created_at DESC", SELECT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_submission).collect()
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, s: &Submission) -> Result<()> {
        let raw = RawPayload::from(s.payload.clone());
        sqlx::query(
            r#"
            INSERT INTO submissions (
                id, form_type, payload, status, priority, assigned_to, tags, admin_notes,
                created_at, sla_deadline, sla_status, last_updated_by, last_updated_at, revision
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(s.id.to_string())
        .bind(raw.form_type)
        .bind(serde_json::to_string(&raw.fields)?)
        .bind(s.status.as_str())
        .bind(s.priority.as_str())
        .bind(s.assigned_to.as_ref().map(AdminId::as_str))
        .bind(serde_json::to_string(&s.tags)?)
        .bind(s.admin_notes.as_deref())
        .bind(to_db_string(s.created_at))
        .bind(to_db_string(s.sla_deadline))
        .bind(s.sla_status.as_str())
        .bind(s.last_updated_by.as_ref().map(AdminId::as_str))
        .bind(to_db_string(s.last_updated_at))
        .bind(s.revision)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Persist the full mutable state of an existing record
    pub async fn update(&self, conn: &mut SqliteConnection, s: &Submission) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = ?, priority = ?, assigned_to = ?, tags = ?, admin_notes = ?,
                sla_deadline = ?, sla_status = ?, last_updated_by = ?, last_updated_at = ?,
                revision = ?
            WHERE id = ?
            "#,
        )
        .bind(s.status.as_str())
        .bind(s.priority.as_str())
        .bind(s.assigned_to.as_ref().map(AdminId::as_str))
        .bind(serde_json::to_string(&s.tags)?)
        .bind(s.admin_notes.as_deref())
        .bind(to_db_string(s.sla_deadline))
        .bind(s.sla_status.as_str())
        .bind(s.last_updated_by.as_ref().map(AdminId::as_str))
        .bind(to_db_string(s.last_updated_at))
        .bind(s.revision)
        .bind(s.id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Submission {}", s.id)));
        }
        Ok(())
    }

    /// Remove a record; returns whether it existed
    pub async fn delete(&self, conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM submissions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_submission(row: &SqliteRow) -> Result<Submission> {
    let id: String = row.try_get("id")?;
    let form_type: String = row.try_get("form_type")?;
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let assigned_to: Option<String> = row.try_get("assigned_to")?;
    let tags: String = row.try_get("tags")?;
    let sla_status: String = row.try_get("sla_status")?;
    let last_updated_by: Option<String> = row.try_get("last_updated_by")?;

    Ok(Submission {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Bad submission id '{}': {}", id, e)))?,
        payload: FormPayload::from_parts(&form_type, serde_json::from_str(&payload)?)?,
        status: status
            .parse()
            .map_err(|_| Error::Internal(format!("Bad stored status '{}'", status)))?,
        priority: priority
            .parse()
            .map_err(|_| Error::Internal(format!("Bad stored priority '{}'", priority)))?,
        assigned_to: assigned_to.map(AdminId::parse).transpose()?,
        tags: serde_json::from_str::<BTreeSet<String>>(&tags)?,
        admin_notes: row.try_get("admin_notes")?,
        created_at: parse_db_string(row.try_get("created_at")?)?,
        sla_deadline: parse_db_string(row.try_get("sla_deadline")?)?,
        sla_status: sla_status.parse()?,
        last_updated_by: last_updated_by.map(AdminId::parse).transpose()?,
        last_updated_at: parse_db_string(row.try_get("last_updated_at")?)?,
        revision: row.try_get("revision")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_common::db::init_in_memory;
    use intake_common::model::{Priority, SubmissionStatus};
    use intake_common::payload::Fields;
    use intake_common::time;
    use serde_json::json;

    fn sample() -> Submission {
        let mut fields = Fields::new();
        fields.insert("email".into(), json!("ana@example.com"));
        fields.insert("utm_source".into(), json!("newsletter"));
        let payload = FormPayload::from_parts("contact", fields).unwrap();
        Submission::new(Uuid::new_v4(), payload, time::now())
    }

    #[tokio::test]
    async fn test_insert_fetch_update_delete() {
        let store = SubmissionStore::new(init_in_memory().await.unwrap());
        let mut s = sample();

        let mut conn = store.pool().acquire().await.unwrap();
        store.insert(&mut conn, &s).await.unwrap();
        drop(conn);
        assert_eq!(store.fetch(s.id).await.unwrap(), Some(s.clone()));

        s.status = SubmissionStatus::InProgress;
        s.priority = Priority::High;
        s.tags.insert("vip".into());
        s.assigned_to = Some(AdminId::parse("ana").unwrap());
        s.revision = 2;
        let mut conn = store.pool().acquire().await.unwrap();
        store.update(&mut conn, &s).await.unwrap();
        drop(conn);
        assert_eq!(store.fetch(s.id).await.unwrap(), Some(s.clone()));

        let mut conn = store.pool().acquire().await.unwrap();
        assert!(store.delete(&mut conn, s.id).await.unwrap());
        assert!(!store.delete(&mut conn, s.id).await.unwrap());
        drop(conn);
        assert_eq!(store.fetch(s.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_of_unknown_id_is_not_found() {
        let store = SubmissionStore::new(init_in_memory().await.unwrap());
        let mut conn = store.pool().acquire().await.unwrap();
        let err = store.update(&mut conn, &sample()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_all_newest_first() {
        let store = SubmissionStore::new(init_in_memory().await.unwrap());
        let older = sample();
        let mut newer = sample();
        newer.created_at = older.created_at + chrono::Duration::seconds(5);

        let mut conn = store.pool().acquire().await.unwrap();
        store.insert(&mut conn, &older).await.unwrap();
        store.insert(&mut conn, &newer).await.unwrap();
        drop(conn);

        let ids: Vec<_> = store.fetch_all().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
