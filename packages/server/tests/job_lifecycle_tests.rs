//! Integration tests for the job store's transition matrix and idempotence
//! guarantees (spec §4.5, §8 invariants 1 and 5) against a real Postgres.

mod common;

use chrono::Utc;
use common::TestHarness;
use server_core::domains::jobs::models::{Job, Kind, State};
use server_core::domains::jobs::store::{JobStore, PostgresJobStore, StateUpdate, StoreError};
use test_context::test_context;
use uuid::Uuid;

fn new_job(session_id: &str, user_ordinal: i32) -> Job {
    Job {
        job_id: Uuid::new_v4().into(),
        session_id: session_id.to_string(),
        kind: Kind::Card,
        state: State::Queued,
        prompt: "a prompt long enough to pass validation".to_string(),
        artifact_key: None,
        error: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        attempt: 0,
        user_ordinal,
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn put_then_get_roundtrips(ctx: &TestHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let session_id = TestHarness::fresh_session_id();
    let job = new_job(&session_id, 1);
    let job_id = job.job_id;

    store.put(&job).await.expect("put should succeed");
    let loaded = store.get(job_id).await.expect("get should succeed");

    assert_eq!(loaded.job_id, job_id);
    assert_eq!(loaded.state, State::Queued);
    assert_eq!(loaded.session_id, session_id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn queued_to_completed_is_rejected_without_processing(ctx: &TestHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let job = new_job(&TestHarness::fresh_session_id(), 1);
    let job_id = job.job_id;
    store.put(&job).await.unwrap();

    let result = store
        .update_state(job_id, State::Completed, StateUpdate::default())
        .await;

    assert!(matches!(
        result,
        Err(StoreError::IllegalTransition {
            from: State::Queued,
            to: State::Completed
        })
    ));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn full_happy_path_transition_sequence(ctx: &TestHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let job = new_job(&TestHarness::fresh_session_id(), 1);
    let job_id = job.job_id;
    store.put(&job).await.unwrap();

    let processing = store
        .update_state(
            job_id,
            State::Processing,
            StateUpdate {
                started_at: Some(Utc::now()),
                bump_attempt: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(processing.state, State::Processing);
    assert_eq!(processing.attempt, 1);

    let completed = store
        .update_state(
            job_id,
            State::Completed,
            StateUpdate {
                artifact_key: Some("cards/x.png".to_string()),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(completed.state, State::Completed);
    assert_eq!(completed.artifact_key.as_deref(), Some("cards/x.png"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn redelivery_of_completed_job_is_a_no_op(ctx: &TestHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let job = new_job(&TestHarness::fresh_session_id(), 1);
    let job_id = job.job_id;
    store.put(&job).await.unwrap();

    store
        .update_state(
            job_id,
            State::Processing,
            StateUpdate {
                bump_attempt: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store
        .update_state(
            job_id,
            State::Completed,
            StateUpdate {
                artifact_key: Some("cards/x.png".to_string()),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Redelivery: the record is already completed, so this must be a no-op
    // that leaves artifact_key and attempt untouched, and must not error.
    let noop = store
        .update_state(
            job_id,
            State::Completed,
            StateUpdate {
                artifact_key: Some("cards/should-not-overwrite.png".to_string()),
                bump_attempt: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(noop.artifact_key.as_deref(), Some("cards/x.png"));
    assert_eq!(noop.attempt, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn user_ordinal_is_unique_and_increasing_per_session_and_kind(ctx: &TestHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let session_id = TestHarness::fresh_session_id();

    let first = store.next_user_ordinal(&session_id, Kind::Card).await.unwrap();
    let second = store.next_user_ordinal(&session_id, Kind::Card).await.unwrap();
    let first_video = store.next_user_ordinal(&session_id, Kind::Video).await.unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 2);
    // Different kind within the same session gets its own counter.
    assert_eq!(first_video, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn list_by_session_returns_only_completed_most_recent_first(ctx: &TestHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let session_id = TestHarness::fresh_session_id();

    let mut older = new_job(&session_id, 1);
    older.created_at = Utc::now() - chrono::Duration::minutes(5);
    store.put(&older).await.unwrap();
    store
        .update_state(
            older.job_id,
            State::Processing,
            StateUpdate {
                bump_attempt: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store
        .update_state(
            older.job_id,
            State::Completed,
            StateUpdate {
                artifact_key: Some("cards/older.png".to_string()),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let newer = new_job(&session_id, 2);
    store.put(&newer).await.unwrap();
    store
        .update_state(
            newer.job_id,
            State::Processing,
            StateUpdate {
                bump_attempt: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store
        .update_state(
            newer.job_id,
            State::Completed,
            StateUpdate {
                artifact_key: Some("cards/newer.png".to_string()),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let still_queued = new_job(&session_id, 3);
    store.put(&still_queued).await.unwrap();

    let listed = store
        .list_by_session(&session_id, None, 10)
        .await
        .unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].job_id, newer.job_id);
    assert_eq!(listed[1].job_id, older.job_id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reconcile_marks_stuck_processing_jobs_as_dead_lettered(ctx: &TestHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let mut job = new_job(&TestHarness::fresh_session_id(), 1);
    job.state = State::Processing;
    job.started_at = Some(Utc::now() - chrono::Duration::hours(2));
    store.put(&job).await.unwrap();

    let threshold = Utc::now() - chrono::Duration::hours(1);
    let reconciled = store.reconcile_stuck_jobs(threshold).await.unwrap();

    assert_eq!(reconciled, vec![job.job_id]);
    let reloaded = store.get(job.job_id).await.unwrap();
    assert_eq!(reloaded.state, State::Failed);
    assert_eq!(reloaded.error.unwrap().kind, "dead_lettered");
}
