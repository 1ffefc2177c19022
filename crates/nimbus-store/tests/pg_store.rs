//! Storage round-trip tests against a real PostgreSQL.
//!
//! Run with `cargo test -p nimbus-store --features pg-tests` and a
//! `DATABASE_URL` pointing at a scratch database.

#![cfg(feature = "pg-tests")]

use chrono::{Duration, Utc};
use serde_json::Map;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use nimbus_core::{
    ChatMessage, HistoryId, JobHistoryRecord, JobId, JobSpec, JobStatus, Role, Trigger,
};
use nimbus_store::{PgStore, StoreError};

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("pg-tests require DATABASE_URL");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect");
    let store = PgStore::from_pool(pool);
    store.migrate().await.expect("migrate");
    store
}

fn job_id(prefix: &str) -> JobId {
    JobId::new(format!("{prefix}-{}", Uuid::new_v4().simple())).unwrap()
}

fn once_spec(id: &JobId, run_at: chrono::DateTime<Utc>) -> JobSpec {
    JobSpec::new(
        id.clone(),
        "jobs:health_check",
        Trigger::once(run_at),
        vec![],
        Map::new(),
    )
}

#[tokio::test]
async fn job_upsert_get_round_trip() {
    let store = store().await;
    let id = job_id("roundtrip");
    let spec = once_spec(&id, Utc::now() + Duration::hours(1));

    store.upsert_job(&spec, false).await.unwrap();
    let loaded = store.get_job(&id).await.unwrap().expect("job present");
    assert_eq!(loaded.func_ref, "jobs:health_check");
    assert_eq!(loaded.next_run_at, spec.next_run_at);
    assert!(store.raw_job_row_exists(&id).await.unwrap());

    // Duplicate insert without replace conflicts.
    let err = store.upsert_job(&spec, false).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
    // With replace it succeeds.
    store.upsert_job(&spec, true).await.unwrap();

    assert!(store.delete_job(&id).await.unwrap());
    assert!(store.get_job(&id).await.unwrap().is_none());
    assert!(!store.raw_job_row_exists(&id).await.unwrap());
}

#[tokio::test]
async fn due_scan_orders_by_fire_time_then_insertion() {
    let store = store().await;
    let past = Utc::now() - Duration::seconds(30);
    let late = job_id("due-late");
    let early_a = job_id("due-early-a");
    let early_b = job_id("due-early-b");

    store
        .upsert_job(&once_spec(&late, past + Duration::seconds(10)), false)
        .await
        .unwrap();
    store
        .upsert_job(&once_spec(&early_a, past), false)
        .await
        .unwrap();
    store
        .upsert_job(&once_spec(&early_b, past), false)
        .await
        .unwrap();

    let due = store.due_jobs(Utc::now()).await.unwrap();
    let positions: Vec<usize> = [&early_a, &early_b, &late]
        .iter()
        .map(|id| due.iter().position(|j| j.id == **id).expect("job due"))
        .collect();
    // Earlier fire times first; equal fire times keep insertion order.
    assert!(positions[0] < positions[1]);
    assert!(positions[1] < positions[2]);

    for id in [&late, &early_a, &early_b] {
        store.delete_job(id).await.unwrap();
    }
}

#[tokio::test]
async fn pause_clears_fire_time_and_hides_from_due_scan() {
    let store = store().await;
    let id = job_id("pause");
    store
        .upsert_job(&once_spec(&id, Utc::now() - Duration::seconds(1)), false)
        .await
        .unwrap();

    store.set_job_paused(&id, true, None).await.unwrap();
    let loaded = store.get_job(&id).await.unwrap().unwrap();
    assert!(loaded.paused);
    assert!(loaded.next_run_at.is_none());
    assert!(!store
        .due_jobs(Utc::now())
        .await
        .unwrap()
        .iter()
        .any(|j| j.id == id));

    let resume_at = Utc::now() + Duration::minutes(5);
    store
        .set_job_paused(&id, false, Some(resume_at))
        .await
        .unwrap();
    let loaded = store.get_job(&id).await.unwrap().unwrap();
    assert!(!loaded.paused);
    assert_eq!(loaded.next_run_at, Some(resume_at));

    store.delete_job(&id).await.unwrap();
}

#[tokio::test]
async fn set_next_run_updates_projection_and_payload_together() {
    let store = store().await;
    let id = job_id("advance");
    store
        .upsert_job(&once_spec(&id, Utc::now()), false)
        .await
        .unwrap();

    store.set_job_next_run(&id, None).await.unwrap();
    let loaded = store.get_job(&id).await.unwrap().unwrap();
    assert!(loaded.next_run_at.is_none());
    assert!(store.next_wakeup().await.unwrap().map_or(true, |next| {
        // This job no longer contributes a wakeup.
        loaded.next_run_at.is_none() && next > Utc::now() - Duration::days(365)
    }));

    let missing = JobId::new("never-existed").unwrap();
    assert!(matches!(
        store.set_job_next_run(&missing, None).await.unwrap_err(),
        StoreError::NotFound { .. }
    ));

    store.delete_job(&id).await.unwrap();
}

#[tokio::test]
async fn history_is_append_only_and_filterable() {
    let store = store().await;
    let id = job_id("history");
    let spec = once_spec(&id, Utc::now());

    for (offset, status) in [
        (2, JobStatus::Created),
        (1, JobStatus::Running),
        (0, JobStatus::Completed),
    ] {
        let record = JobHistoryRecord {
            id: HistoryId::generate(),
            job_id: id.clone(),
            func_ref: spec.func_ref.clone(),
            trigger_repr: spec.trigger.repr(),
            trigger_type: spec.trigger.kind(),
            status,
            args: None,
            kwargs: None,
            next_run_at: None,
            error_message: (status == JobStatus::Failed).then(|| "boom".into()),
            logs: None,
            user_id: Some("tester".into()),
            created_at: Utc::now() - Duration::seconds(offset),
        };
        store.insert_history(&record).await.unwrap();
    }

    let (rows, total) = store.list_history(Some(&id), 1, 10).await.unwrap();
    assert_eq!(total, 3);
    // Newest first.
    let statuses: Vec<JobStatus> = rows.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Completed, JobStatus::Running, JobStatus::Created]
    );

    let latest = store.latest_history_for(&id).await.unwrap().unwrap();
    assert_eq!(latest.status, JobStatus::Completed);

    // Pagination.
    let (page, _) = store.list_history(Some(&id), 2, 2).await.unwrap();
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn conversation_lock_serializes_writers() {
    let store = store().await;
    let user = format!("user-{}", Uuid::new_v4().simple());
    let conversation = store.create_conversation(&user, "locked").await.unwrap();

    // Writer A holds the row lock while writer B queues behind it; both
    // messages land, in order.
    let mut tx_a = store.begin().await.unwrap();
    PgStore::conversation_for_update(&mut tx_a, conversation.id, &user)
        .await
        .unwrap()
        .expect("owned conversation");
    let first: ChatMessage =
        PgStore::add_message_tx(&mut tx_a, conversation.id, Role::User, "from A", None)
            .await
            .unwrap();

    let store_b = store.clone();
    let user_b = user.clone();
    let id_b = conversation.id;
    let writer_b = tokio::spawn(async move {
        let mut tx_b = store_b.begin().await.unwrap();
        PgStore::conversation_for_update(&mut tx_b, id_b, &user_b)
            .await
            .unwrap()
            .expect("owned conversation");
        let msg = PgStore::add_message_tx(&mut tx_b, id_b, Role::User, "from B", None)
            .await
            .unwrap();
        tx_b.commit().await.unwrap();
        msg
    });

    // Give B a moment to block on the lock, then release it.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tx_a.commit().await.unwrap();
    let second = writer_b.await.unwrap();

    let messages = store.list_messages(conversation.id, &user).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, first.id);
    assert_eq!(messages[1].id, second.id);

    store.delete_conversation(conversation.id, &user).await.unwrap();
}
