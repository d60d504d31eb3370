//! Integration tests for the work queue's at-least-once delivery, visibility
//! timeout redelivery, and dead-letter sink (spec §4.2, §8 scenarios 2 and 4)
//! against a real Postgres.

mod common;

use common::TestHarness;
use server_core::domains::jobs::models::{Kind, QueueMessage};
use server_core::domains::jobs::queue::{PostgresWorkQueue, WorkQueue};
use std::time::Duration;
use test_context::test_context;
use uuid::Uuid;

fn message(job_id: Uuid, session_id: &str) -> QueueMessage {
    QueueMessage {
        job_id: job_id.into(),
        session_id: session_id.to_string(),
        kind: Kind::Card,
        prompt: "a prompt".to_string(),
        user_ordinal: 1,
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn publish_then_receive_then_delete(ctx: &TestHarness) {
    let queue = PostgresWorkQueue::new(ctx.db_pool.clone(), Duration::from_secs(90), 3);
    let session_id = TestHarness::fresh_session_id();
    let job_id = Uuid::new_v4();

    queue.publish(message(job_id, &session_id)).await.unwrap();

    let received = queue
        .receive(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("message should be immediately visible");
    assert_eq!(received.message.job_id, job_id.into());
    assert_eq!(received.delivery_count, 1);

    queue.delete(received.receipt).await.unwrap();

    let after_delete = queue.receive(Duration::from_millis(200)).await.unwrap();
    assert!(after_delete.is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn message_is_invisible_until_its_visibility_timeout_elapses(ctx: &TestHarness) {
    let queue = PostgresWorkQueue::new(ctx.db_pool.clone(), Duration::from_millis(500), 3);
    let session_id = TestHarness::fresh_session_id();
    let job_id = Uuid::new_v4();

    queue.publish(message(job_id, &session_id)).await.unwrap();

    let first = queue
        .receive(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("first receive");
    assert_eq!(first.delivery_count, 1);

    // Immediately after claiming, the message must not be redelivered.
    let immediate = queue.receive(Duration::from_millis(100)).await.unwrap();
    assert!(immediate.is_none());

    // After the visibility timeout elapses, the queue redelivers it.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let redelivered = queue
        .receive(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("message should be redelivered after visibility timeout");
    assert_eq!(redelivered.message.job_id, job_id.into());
    assert_eq!(redelivered.delivery_count, 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn message_is_dead_lettered_after_exhausting_redeliveries(ctx: &TestHarness) {
    let max_redeliveries = 2;
    let queue = PostgresWorkQueue::new(
        ctx.db_pool.clone(),
        Duration::from_millis(200),
        max_redeliveries,
    );
    let session_id = TestHarness::fresh_session_id();
    let job_id = Uuid::new_v4();

    queue.publish(message(job_id, &session_id)).await.unwrap();

    // Deliver it (max_redeliveries + 1) times without ever deleting it, each
    // time waiting out the visibility timeout so it comes back around.
    for attempt in 1..=(max_redeliveries + 1) {
        let received = queue
            .receive(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("expected delivery #{attempt}"));
        assert_eq!(received.delivery_count, attempt);
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    // The (cap+1)th redelivery attempt now finds the message past its cap
    // and moves it to the dead-letter sink instead of returning it.
    let after_cap = queue.receive(Duration::from_millis(300)).await.unwrap();
    assert!(after_cap.is_none());

    let dead_letters = queue.dead_letters().await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].job_id, job_id.into());
}
