//! Background work: mail goes through the pool, never the request path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use account_api::tasks::{PoolState, ShutdownOutcome, SubmitError, TaskPool};
use reqwest::StatusCode;
use serde_json::json;

mod common;
use common::{test_config, TestServer, PASSWORD};

#[tokio::test]
async fn test_register_sends_welcome_mail_in_background() {
    let server = TestServer::start().await;

    server.register("hana@example.com").await;
    server.wait_for_mail(1).await;

    let sent = server.mailer.messages();
    assert_eq!(sent[0].to, "hana@example.com");
    assert_eq!(sent[0].subject, "Welcome!");

    server.stop().await;
}

#[tokio::test]
async fn test_failing_transport_does_not_fail_requests() {
    let server = TestServer::start().await;
    server.mailer.set_failing(true);

    let res = server
        .post(
            "/auth/register",
            json!({ "email": "ivan@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = server
        .post("/auth/forgot-password", json!({ "email": "ivan@example.com" }))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    server.stop().await;
}

#[tokio::test]
async fn test_full_queue_drops_mail_but_request_succeeds() {
    let mut config = test_config();
    config.workers.count = 1;
    config.workers.queue_capacity = 1;
    let server = TestServer::start_with(config).await;

    // Park the only worker so the single queue slot is all there is.
    let (release_tx, mut release_rx) = tokio::sync::watch::channel(false);
    server
        .pool
        .submit(async move {
            let _ = release_rx.wait_for(|go| *go).await;
        })
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.pool.queued() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let mut ok = 0;
    for i in 0..10 {
        let res = server
            .post(
                "/auth/register",
                json!({ "email": format!("u{i}@example.com"), "password": PASSWORD }),
            )
            .await;
        if res.status() == StatusCode::CREATED {
            ok += 1;
        }
    }
    assert_eq!(ok, 10);

    release_tx.send(true).unwrap();
    server.wait_for_mail(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // One welcome mail took the free slot; the other nine were dropped.
    assert_eq!(server.mailer.messages().len(), 1);
    assert_eq!(server.mailer.messages()[0].to, "u0@example.com");

    server.stop().await;
}

#[tokio::test]
async fn test_submit_never_blocks_when_saturated() {
    let pool = TaskPool::with_capacity(2, 4);
    let ran = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);

    // Two workers busy, four queued: the pool is full.
    let mut accepted = 0;
    let mut rejected = 0;
    let start = Instant::now();
    for _ in 0..20 {
        let ran = ran.clone();
        let mut release = release_rx.clone();
        let result = pool.submit(async move {
            let _ = release.wait_for(|go| *go).await;
            ran.fetch_add(1, Ordering::SeqCst);
        });
        match result {
            Ok(()) => accepted += 1,
            Err(SubmitError::QueueFull) => rejected += 1,
            Err(SubmitError::Closed) => panic!("pool closed early"),
        }
        // Let workers pick up jobs so the count is deterministic.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(accepted, 6);
    assert_eq!(rejected, 14);

    release_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while ran.load(Ordering::SeqCst) < accepted {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(pool.shutdown(Duration::from_secs(5)).await, ShutdownOutcome::Drained);
    assert_eq!(ran.load(Ordering::SeqCst), 6);
    assert_eq!(pool.state(), PoolState::Terminated);
}

#[tokio::test]
async fn test_shutdown_returns_by_deadline_with_stuck_job() {
    let pool = TaskPool::with_capacity(1, 4);
    pool.submit(std::future::pending::<()>()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let start = Instant::now();
    let outcome = pool.shutdown(Duration::from_millis(200)).await;
    assert_eq!(outcome, ShutdownOutcome::TimedOut);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(pool.submit(async {}), Err(SubmitError::Closed));
}
