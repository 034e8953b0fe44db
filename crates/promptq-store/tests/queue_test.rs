// Integration tests for the queue choreography against a live Redis
// Run with: cargo test --test queue_test -- --ignored --test-threads=1
//
// Uses database 15 and flushes it between tests.

use std::collections::HashSet;

use promptq_core::{Task, TaskStatus};
use promptq_store::{keys, Store};
use redis::AsyncCommands;

const TEST_REDIS_URL: &str = "redis://127.0.0.1:6379/15";

async fn store() -> Store {
    let store = Store::connect(TEST_REDIS_URL)
        .await
        .expect("Failed to connect to Redis");
    let client = redis::Client::open(TEST_REDIS_URL).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("FLUSHDB")
        .query_async::<_, ()>(&mut conn)
        .await
        .unwrap();
    store
}

async fn list(key: &str) -> Vec<String> {
    let client = redis::Client::open(TEST_REDIS_URL).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    conn.lrange(key, 0, -1).await.unwrap()
}

fn task(prompt: &str, handler_id: &str) -> Task {
    Task::new(
        uuid::Uuid::new_v4().to_string(),
        "user-1",
        prompt,
        handler_id,
        true,
    )
}

/// Number of top-level queues the id currently appears in. The placement
/// invariant says this is at most 1 between any two operations on the task.
async fn queue_memberships(task_id: &str) -> usize {
    let mut hits = 0;
    for key in [
        keys::TASK_QUEUE,
        keys::PENDING_TASK_QUEUE,
        keys::PROCESSING_QUEUE,
        keys::DEAD_LETTERS,
    ] {
        if list(key).await.iter().any(|id| id == task_id) {
            hits += 1;
        }
    }
    hits
}

#[tokio::test]
#[ignore]
async fn enqueue_claim_complete_keeps_single_membership() {
    let store = store().await;
    let mut t = task("hi", "echo:1");
    t.status = TaskStatus::Queued;

    store.enqueue_ready(&t).await.unwrap();
    assert_eq!(queue_memberships(&t.task_id).await, 1);
    assert_eq!(list(&keys::ready_shard("echo:1")).await, vec![t.task_id.clone()]);

    let claimed = store
        .claim(&[keys::ready_shard("echo:1")])
        .await
        .unwrap()
        .expect("expected a task");
    assert_eq!(claimed, t.task_id);
    assert_eq!(queue_memberships(&t.task_id).await, 1);
    assert_eq!(list(keys::PROCESSING_QUEUE).await, vec![t.task_id.clone()]);

    t.status = TaskStatus::Completed;
    store.complete(&t).await.unwrap();
    assert_eq!(queue_memberships(&t.task_id).await, 0);

    let stored = store.load_task(&t.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}

#[tokio::test]
#[ignore]
async fn claim_times_out_on_empty_shard() {
    let store = store().await;
    let claimed = store.claim(&[keys::ready_shard("echo:1")]).await.unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
#[ignore]
async fn fifo_within_a_shard() {
    let store = store().await;
    let tasks: Vec<Task> = (0..3).map(|i| task(&format!("p{}", i), "echo:1")).collect();
    for t in &tasks {
        store.enqueue_ready(t).await.unwrap();
    }

    for expected in &tasks {
        let claimed = store
            .claim(&[keys::ready_shard("echo:1")])
            .await
            .unwrap()
            .expect("expected a task");
        assert_eq!(claimed, expected.task_id);
        // release the processing slot before the next claim
        let mut done = expected.clone();
        done.status = TaskStatus::Completed;
        store.complete(&done).await.unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn retry_requeues_at_global_head() {
    let store = store().await;
    let first = task("first", "echo:1");
    let second = task("second", "echo:1");
    store.enqueue_ready(&first).await.unwrap();
    store.enqueue_ready(&second).await.unwrap();

    let claimed = store
        .claim(&[keys::ready_shard("echo:1")])
        .await
        .unwrap()
        .expect("expected a task");
    assert_eq!(claimed, first.task_id);

    let mut retried = first.clone();
    retried.retries = 1;
    store.retry(&retried).await.unwrap();

    assert_eq!(queue_memberships(&first.task_id).await, 1);
    // head of the global queue is the rightmost element
    let global = list(keys::TASK_QUEUE).await;
    assert_eq!(global.last(), Some(&first.task_id));

    let stored = store.load_task(&first.task_id).await.unwrap();
    assert_eq!(stored.retries, 1);
}

#[tokio::test]
#[ignore]
async fn terminal_failure_lands_in_dead_letters() {
    let store = store().await;
    let mut t = task("boom", "echo:1");
    store.enqueue_ready(&t).await.unwrap();
    store
        .claim(&[keys::ready_shard("echo:1")])
        .await
        .unwrap()
        .expect("expected a task");

    t.status = TaskStatus::Failed;
    t.retries = 3;
    store.fail_terminal(&t).await.unwrap();

    assert_eq!(queue_memberships(&t.task_id).await, 1);
    assert_eq!(list(keys::DEAD_LETTERS).await, vec![t.task_id.clone()]);
    assert!(list(keys::PROCESSING_QUEUE).await.is_empty());
}

#[tokio::test]
#[ignore]
async fn migration_to_pending_and_back() {
    let store = store().await;
    let t = task("parked", "echo:1");
    store.enqueue_ready(&t).await.unwrap();

    store.drain_ready_shard("echo:1").await.unwrap();
    assert_eq!(queue_memberships(&t.task_id).await, 1);
    assert_eq!(list(keys::PENDING_TASK_QUEUE).await, vec![t.task_id.clone()]);
    assert_eq!(list(&keys::pending_shard("echo:1")).await, vec![t.task_id.clone()]);
    let stored = store.load_task(&t.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.current_position, -1);

    let added: HashSet<String> = ["echo:1".to_string()].into();
    store.recover_pending(&added).await.unwrap();
    assert_eq!(queue_memberships(&t.task_id).await, 1);
    assert_eq!(list(keys::TASK_QUEUE).await, vec![t.task_id.clone()]);
    let stored = store.load_task(&t.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Queued);
}

#[tokio::test]
#[ignore]
async fn migration_is_idempotent() {
    let store = store().await;
    let t = task("parked", "echo:1");
    store.enqueue_ready(&t).await.unwrap();

    store.drain_ready_shard("echo:1").await.unwrap();
    let first_pass = (
        list(keys::PENDING_TASK_QUEUE).await,
        list(&keys::pending_shard("echo:1")).await,
        list(keys::TASK_QUEUE).await,
    );

    // same diff again: an interrupted-and-restarted reconciler cycle
    store.drain_ready_shard("echo:1").await.unwrap();
    let second_pass = (
        list(keys::PENDING_TASK_QUEUE).await,
        list(&keys::pending_shard("echo:1")).await,
        list(keys::TASK_QUEUE).await,
    );
    assert_eq!(first_pass, second_pass);

    let added: HashSet<String> = ["echo:1".to_string()].into();
    store.recover_pending(&added).await.unwrap();
    store.recover_pending(&added).await.unwrap();
    assert_eq!(queue_memberships(&t.task_id).await, 1);
    assert_eq!(list(keys::TASK_QUEUE).await, vec![t.task_id.clone()]);
}

#[tokio::test]
#[ignore]
async fn orphaned_processing_entries_migrate_to_pending() {
    let store = store().await;
    let t = task("orphan", "echo:1");
    store.enqueue_ready(&t).await.unwrap();
    store
        .claim(&[keys::ready_shard("echo:1")])
        .await
        .unwrap()
        .expect("expected a task");

    let removed: HashSet<String> = ["echo:1".to_string()].into();
    store.repending_processing(&removed).await.unwrap();

    assert!(list(keys::PROCESSING_QUEUE).await.is_empty());
    assert_eq!(list(keys::PENDING_TASK_QUEUE).await, vec![t.task_id.clone()]);
    let stored = store.load_task(&t.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
}

#[tokio::test]
#[ignore]
async fn update_position_tracks_queue_and_pending() {
    let store = store().await;
    let first = task("a", "echo:1");
    let second = task("b", "echo:1");
    store.enqueue_ready(&first).await.unwrap();
    store.enqueue_ready(&second).await.unwrap();

    assert_eq!(store.update_position(&first.task_id).await.unwrap(), 1);
    assert_eq!(store.update_position(&second.task_id).await.unwrap(), 2);

    let parked = task("c", "rag:2");
    store.enqueue_pending(&parked).await.unwrap();
    assert_eq!(store.update_position(&parked.task_id).await.unwrap(), -1);

    assert_eq!(store.update_position("no-such-task").await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn dead_letter_trim_respects_threshold() {
    let store = store().await;

    for i in 0..3 {
        let mut t = task(&format!("dead-{}", i), "echo:1");
        t.status = TaskStatus::Failed;
        store.enqueue_ready(&t).await.unwrap();
        store
            .claim(&[keys::ready_shard("echo:1")])
            .await
            .unwrap()
            .expect("expected a task");
        store.fail_terminal(&t).await.unwrap();
    }

    // under the threshold: nothing happens
    assert_eq!(store.trim_dead_letters(5).await.unwrap(), 0);
    assert_eq!(list(keys::DEAD_LETTERS).await.len(), 3);

    // over the threshold: list and records are gone
    assert_eq!(store.trim_dead_letters(2).await.unwrap(), 3);
    assert!(list(keys::DEAD_LETTERS).await.is_empty());
}

#[tokio::test]
#[ignore]
async fn worker_registry_aggregates_live_workers() {
    let store = store().await;
    let configs = vec![promptq_core::HandlerConfig {
        name: "Echo".into(),
        task_type: "echo".into(),
        import_path: "builtin:echo".into(),
        version: "1".into(),
        description: String::new(),
    }];

    store.register_worker("worker:1111", &configs).await.unwrap();
    store.register_worker("worker:2222", &configs).await.unwrap();

    let available = store.aggregate_available_handlers().await.unwrap();
    assert_eq!(available.get("echo:1"), Some(&2));

    store.deregister_worker("worker:2222").await.unwrap();
    let available = store.aggregate_available_handlers().await.unwrap();
    assert_eq!(available.get("echo:1"), Some(&1));

    let stored_configs = store.read_handlers_configs().await.unwrap();
    assert!(stored_configs.contains_key("echo:1"));
}
