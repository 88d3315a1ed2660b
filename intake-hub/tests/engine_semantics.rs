//! Engine semantics: serialization, audit atomicity, bulk partial failure,
//! event ordering and the history fold

use chrono::Duration as ChronoDuration;
use intake_common::audit::{fold_history, ActionType, HistoryOrder};
use intake_common::change::{SubmissionChange, TagEdit};
use intake_common::events::{ChangeKind, EventBus};
use intake_common::model::{AdminId, Priority, Submission, SubmissionStatus};
use intake_common::payload::{Fields, FormPayload};
use intake_common::sla::SlaStatus;
use intake_common::{db, time, Error, ErrorKind};
use intake_hub::Engine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

async fn engine() -> Arc<Engine> {
    let pool = db::init_in_memory().await.unwrap();
    Arc::new(Engine::new(pool, EventBus::new(256), Duration::from_millis(500)))
}

fn admin(id: &str) -> AdminId {
    AdminId::parse(id).unwrap()
}

async fn contact(engine: &Engine, name: &str) -> Submission {
    let mut fields = Fields::new();
    fields.insert("name".into(), json!(name));
    fields.insert("message".into(), json!("Please call me back"));
    engine.create_submission("contact", fields).await.unwrap()
}

fn resolve() -> SubmissionChange {
    SubmissionChange::default().with_status(SubmissionStatus::Resolved)
}

#[tokio::test]
async fn test_create_records_created_entry_and_event() {
    let engine = engine().await;
    let mut rx = engine.event_bus().subscribe();

    let s = contact(&engine, "Ana").await;
    assert_eq!(s.revision, 1);
    assert_eq!(s.status, SubmissionStatus::New);

    let history = engine.history(s.id, HistoryOrder::Oldest).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action_type, ActionType::Created);
    assert_eq!(history[0].changed_by, None);
    assert_eq!(history[0].old_value, None);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, ChangeKind::Created);
    assert_eq!(event.submission, Some(s));
}

#[tokio::test]
async fn test_bulk_apply_with_one_deleted_id() {
    let engine = engine().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(contact(&engine, &format!("sender {}", i)).await.id);
    }
    let gone = ids[2];
    assert_eq!(engine.bulk_delete(&[gone], &admin("ana")).await.unwrap(), 1);

    let report = engine
        .bulk_apply(&ids, &resolve(), &admin("ben"))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, gone);
    assert_eq!(failures[0].1, ErrorKind::NotFound);
    assert_eq!(
        report.outcomes.iter().map(|o| o.id).collect::<Vec<_>>(),
        ids,
        "outcomes follow request order"
    );

    for s in report.applied() {
        let history = engine.history(s.id, HistoryOrder::Oldest).await.unwrap();
        assert_eq!(history.len(), 2, "created + exactly one new entry");
        assert_eq!(history[1].action_type, ActionType::StatusChanged);
        assert_eq!(history[1].changed_by, Some(admin("ben")));
    }
}

#[tokio::test]
async fn test_repeated_resolve_is_a_noop() {
    let engine = engine().await;
    let s = contact(&engine, "Ana").await;

    let first = engine.apply_mutation(s.id, &resolve(), &admin("ana")).await.unwrap();
    let mut rx = engine.event_bus().subscribe();
    let second = engine.apply_mutation(s.id, &resolve(), &admin("ben")).await.unwrap();

    assert_eq!(first.revision, 2);
    assert_eq!(second.revision, 2);
    assert_eq!(second.last_updated_by, Some(admin("ana")));
    assert_eq!(second.sla_status, SlaStatus::Met);

    let history = engine.history(s.id, HistoryOrder::Oldest).await.unwrap();
    let status_entries = history
        .iter()
        .filter(|e| e.action_type == ActionType::StatusChanged)
        .count();
    assert_eq!(status_entries, 1);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_fields_equal_fold_of_history() {
    let engine = engine().await;
    let s = contact(&engine, "Ana").await;
    let ana = admin("ana");

    let changes = [
        SubmissionChange::default().with_status(SubmissionStatus::InProgress),
        SubmissionChange::default()
            .with_priority(Priority::High)
            .with_assignee(Some(admin("ben"))),
        SubmissionChange::default().with_tags(TagEdit::Add(["vip".to_string()].into())),
        SubmissionChange::default().with_notes(Some("Called, left voicemail".into())),
        SubmissionChange::default()
            .with_tags(TagEdit::Add(["billing".to_string()].into()))
            .with_assignee(None),
        SubmissionChange::default().with_tags(TagEdit::Remove(["vip".to_string()].into())),
        resolve(),
        SubmissionChange::default().with_status(SubmissionStatus::InProgress),
    ];
    for change in &changes {
        engine.apply_mutation(s.id, change, &ana).await.unwrap();
    }

    let current = engine.get(s.id).await.unwrap();
    let mut newest_first = engine.history(s.id, HistoryOrder::Newest).await.unwrap();
    assert_eq!(fold_history(&newest_first), Some(current.fields()));

    newest_first.reverse();
    let seqs: Vec<_> = newest_first.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=seqs.len() as i64).collect::<Vec<_>>());
    assert_eq!(current.revision, changes.len() as i64 + 1);
}

#[tokio::test]
async fn test_same_id_events_arrive_in_commit_order_for_every_subscriber() {
    let engine = engine().await;
    let s = contact(&engine, "Ana").await;
    let mut session_a = engine.event_bus().subscribe();
    let mut session_b = engine.event_bus().subscribe();

    let priorities = [Priority::High, Priority::Low, Priority::Medium];
    let mut tasks = Vec::new();
    for i in 0..12 {
        let engine = Arc::clone(&engine);
        let actor = admin(if i % 2 == 0 { "ana" } else { "ben" });
        let change = SubmissionChange::default()
            .with_priority(priorities[i % 3])
            .with_notes(Some(format!("edit {}", i)));
        tasks.push(tokio::spawn(async move {
            engine.apply_mutation(s.id, &change, &actor).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let drain = |rx: &mut tokio::sync::broadcast::Receiver<_>| {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen
    };
    let a: Vec<intake_common::events::ChangeEvent> = drain(&mut session_a);
    let b: Vec<intake_common::events::ChangeEvent> = drain(&mut session_b);

    assert_eq!(a.len(), 12);
    assert_eq!(a, b);
    let revisions: Vec<_> = a.iter().filter_map(|e| e.revision()).collect();
    assert_eq!(revisions, (2..=13).collect::<Vec<_>>());

    // Both sessions' last view of the id is the stored record
    let stored = engine.get(s.id).await.unwrap();
    let last = a.last().and_then(|e| e.submission.clone()).unwrap();
    assert_eq!(last.fields(), stored.fields());
    assert_eq!(last.revision, stored.revision);
}

#[tokio::test]
async fn test_failed_audit_write_rolls_back_mutation() {
    let engine = engine().await;
    let s = contact(&engine, "Ana").await;

    sqlx::query(
        r#"
        CREATE TRIGGER reject_status_audit BEFORE INSERT ON audit_log
        WHEN NEW.action_type = 'status_changed'
        BEGIN
            SELECT RAISE(ABORT, 'audit store unavailable');
        END
        "#,
    )
    .execute(engine.pool())
    .await
    .unwrap();

    let mut rx = engine.event_bus().subscribe();
    let change = resolve().with_priority(Priority::High);
    let err = engine
        .apply_mutation(s.id, &change, &admin("ana"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    let stored = engine.get(s.id).await.unwrap();
    assert_eq!(stored.status, SubmissionStatus::New);
    assert_eq!(stored.priority, Priority::Medium);
    assert_eq!(stored.revision, 1);
    assert_eq!(engine.history(s.id, HistoryOrder::Oldest).await.unwrap().len(), 1);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    // Changes that do not hit the failing entry type still commit
    let ok = engine
        .apply_mutation(s.id, &SubmissionChange::default().with_priority(Priority::High), &admin("ana"))
        .await
        .unwrap();
    assert_eq!(ok.revision, 2);
}

#[tokio::test]
async fn test_busy_submission_times_out() {
    let engine = engine().await;
    let s = contact(&engine, "Ana").await;

    let held = engine
        .locks()
        .acquire(s.id, Duration::from_secs(1))
        .await
        .unwrap();
    let err = engine
        .apply_mutation(s.id, &resolve(), &admin("ana"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.kind().is_retryable());

    // Other ids are unaffected while this one is held
    let other = contact(&engine, "Ben").await;
    engine.apply_mutation(other.id, &resolve(), &admin("ana")).await.unwrap();

    drop(held);
    engine.apply_mutation(s.id, &resolve(), &admin("ana")).await.unwrap();
}

#[tokio::test]
async fn test_rejections() {
    let engine = engine().await;
    let s = contact(&engine, "Ana").await;

    let missing = engine
        .apply_mutation(Uuid::new_v4(), &resolve(), &admin("ana"))
        .await
        .unwrap_err();
    assert!(matches!(missing, Error::NotFound(_)));

    let empty = engine
        .apply_mutation(s.id, &SubmissionChange::default(), &admin("ana"))
        .await
        .unwrap_err();
    assert!(matches!(empty, Error::Validation(_)));

    let bad_tag = SubmissionChange::default().with_tags(TagEdit::Add(["x".repeat(51)].into()));
    assert!(matches!(
        engine.bulk_apply(&[s.id], &bad_tag, &admin("ana")).await,
        Err(Error::Validation(_))
    ));

    assert!(matches!(
        engine.create_submission("Not A Form!", Fields::new()).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        engine.history(Uuid::new_v4(), HistoryOrder::Oldest).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_bulk_delete_cascades_to_history() {
    let engine = engine().await;
    let a = contact(&engine, "Ana").await;
    let b = contact(&engine, "Ben").await;
    engine.apply_mutation(a.id, &resolve(), &admin("ana")).await.unwrap();

    let mut rx = engine.event_bus().subscribe();
    let deleted = engine
        .bulk_delete(&[a.id, Uuid::new_v4(), a.id], &admin("ana"))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    assert!(matches!(engine.get(a.id).await, Err(Error::NotFound(_))));
    assert!(matches!(
        engine.history(a.id, HistoryOrder::Oldest).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(engine.history(b.id, HistoryOrder::Oldest).await.unwrap().len(), 1);

    let event = rx.recv().await.unwrap();
    assert_eq!((event.kind, event.submission_id), (ChangeKind::Deleted, a.id));
    assert!(event.submission.is_none());
}

#[tokio::test]
async fn test_sla_follows_priority_and_freezes_on_resolution() {
    let engine = engine().await;
    let created_at = time::now() - ChronoDuration::minutes(61);
    let payload = FormPayload::from_parts("quick_contact", Fields::new()).unwrap();
    let s = engine.create_submission_at(payload, created_at).await.unwrap();
    assert_eq!(engine.get(s.id).await.unwrap().sla_status, SlaStatus::OnTrack);

    let high = SubmissionChange::default().with_priority(Priority::High);
    let escalated = engine.apply_mutation(s.id, &high, &admin("ana")).await.unwrap();
    assert_eq!(escalated.sla_status, SlaStatus::Overdue);
    assert_eq!(escalated.sla_deadline, created_at + ChronoDuration::hours(1));

    let resolved = engine.apply_mutation(s.id, &resolve(), &admin("ana")).await.unwrap();
    assert_eq!(resolved.sla_status, SlaStatus::Met);

    let low = SubmissionChange::default().with_priority(Priority::Low);
    let after = engine.apply_mutation(s.id, &low, &admin("ana")).await.unwrap();
    assert_eq!(after.sla_status, SlaStatus::Met);
    assert_eq!(after.sla_deadline, resolved.sla_deadline);
}

#[tokio::test]
async fn test_list_applies_view_pipeline() {
    use intake_common::view::{SortKey, ViewFilters};

    let engine = engine().await;
    let low = contact(&engine, "Low").await;
    let high = contact(&engine, "High").await;
    let done = contact(&engine, "Done").await;
    let ana = admin("ana");
    engine
        .apply_mutation(low.id, &SubmissionChange::default().with_priority(Priority::Low), &ana)
        .await
        .unwrap();
    engine
        .apply_mutation(high.id, &SubmissionChange::default().with_priority(Priority::High), &ana)
        .await
        .unwrap();
    engine.apply_mutation(done.id, &resolve(), &ana).await.unwrap();

    let filters = ViewFilters {
        status: Some(SubmissionStatus::New),
        ..Default::default()
    };
    let view = engine.list(&filters, SortKey::Priority).await.unwrap();
    assert_eq!(view.iter().map(|s| s.id).collect::<Vec<_>>(), vec![high.id, low.id]);
}

#[tokio::test]
async fn test_file_backed_store_handles_concurrent_bulk() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database(&dir.path().join("intake.db")).await.unwrap();
    let engine = Engine::new(pool, EventBus::new(64), Duration::from_secs(2));

    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(contact(&engine, &format!("sender {}", i)).await.id);
    }
    let tag = SubmissionChange::default().with_tags(TagEdit::Add(["spam".to_string()].into()));
    let report = engine.bulk_apply(&ids, &tag, &admin("ana")).await.unwrap();
    assert_eq!(report.succeeded, 8);

    for id in ids {
        let s = engine.get(id).await.unwrap();
        assert!(s.tags.contains("spam"));
        let history = engine.history(id, HistoryOrder::Oldest).await.unwrap();
        assert_eq!(fold_history(&history), Some(s.fields()));
    }
}
