use std::sync::Arc;
use std::time::Duration;

use conveyer::error::Error;
use conveyer::model::Work;
use conveyer::queue::{JsonLinesQueue, MemoryQueue, Queue};
use serde_json::json;

#[tokio::test]
async fn memory_queue_is_fifo() {
    let queue = MemoryQueue::new();
    queue.push(Work::new("alice", "a"));
    queue.push(Work::new("alice", "b"));
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.pull().await.unwrap().unit, "a");
    assert_eq!(queue.pull().await.unwrap().unit, "b");
    assert!(queue.is_empty());
}

#[tokio::test]
async fn memory_queue_pull_waits_for_push() {
    let queue = Arc::new(MemoryQueue::new());

    let puller = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.pull().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!puller.is_finished());

    queue.push(Work::new("alice", "late"));
    let work = tokio::time::timeout(Duration::from_secs(1), puller)
        .await
        .expect("pull should wake up")
        .unwrap()
        .unwrap();
    assert_eq!(work.unit, "late");
}

#[tokio::test]
async fn closed_memory_queue_drains_then_fails() {
    let queue = MemoryQueue::new();
    queue.push(Work::new("alice", "last"));
    queue.close();

    assert_eq!(queue.pull().await.unwrap().unit, "last");
    assert!(matches!(queue.pull().await, Err(Error::QueueClosed)));
}

#[tokio::test]
async fn failure_is_delivered_in_order() {
    let queue = MemoryQueue::new();
    queue.push(Work::new("alice", "w1"));
    queue.fail("storage unreachable");
    queue.push(Work::new("alice", "w2"));
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.pull().await.unwrap().unit, "w1");
    match queue.pull().await {
        Err(Error::Queue(reason)) => assert_eq!(reason, "storage unreachable"),
        other => panic!("expected queue failure, got {other:?}"),
    }
    assert_eq!(queue.pull().await.unwrap().unit, "w2");
}

#[tokio::test]
async fn json_lines_queue_parses_work_and_ends_at_eof() {
    let first = Work::new("alice", "build1").spec(json!({"command": "make"}));
    let input = format!(
        "{}\n\n{}\n",
        serde_json::to_string(&first).unwrap(),
        r#"{"owner": "bob", "unit": "deploy"}"#
    );
    let queue = JsonLinesQueue::new(tokio::io::BufReader::new(input.as_bytes()));

    assert_eq!(queue.pull().await.unwrap(), first);

    let second = queue.pull().await.unwrap();
    assert_eq!(second.owner, "bob");
    assert_eq!(second.unit, "deploy");
    assert!(second.spec.is_null());

    assert!(matches!(queue.pull().await, Err(Error::QueueClosed)));
}

#[tokio::test]
async fn json_lines_queue_fails_on_garbage() {
    let queue = JsonLinesQueue::new(tokio::io::BufReader::new(&b"not json\n"[..]));
    assert!(matches!(queue.pull().await, Err(Error::Json(_))));
}
