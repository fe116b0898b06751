mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use turbo_push_core::model::{NotificationJob, Priority};
use turbo_push_core::queue::{MemoryBroker, PutOptions};

use common::{BATCH_TUBE, context, get, post_json, read_json, token};

#[tokio::test]
async fn test_small_request_goes_to_app_tube() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;

    let body = json!([{
        "app_name": "demo",
        "device_tokens": [token(1), token(2), token(3)],
        "payload": {"alert": "hello", "badge": 1}
    }]);
    let response = post_json(router, "/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({}));

    let jobs = broker.ready_jobs("push.demo");
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|job| job.priority == 4294967295));
    let tokens: Vec<String> = jobs
        .iter()
        .map(|stored| {
            let job = NotificationJob::from_slice(&stored.body).unwrap();
            assert_eq!(job.priority, Priority::Low);
            assert!(job.enqueue_time.is_some());
            job.device_token
        })
        .collect();
    assert_eq!(tokens, vec![token(1), token(2), token(3)]);
    assert!(broker.jobs_in(BATCH_TUBE).is_empty());
}

#[tokio::test]
async fn test_large_request_goes_to_batch_tube() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;

    let tokens: Vec<String> = (1..=7).map(token).collect();
    let body = json!([{
        "app_name": "demo",
        "device_tokens": tokens,
        "payload": {"alert": "hello"}
    }]);
    let response = post_json(router, "/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let batch = broker.ready_jobs(BATCH_TUBE);
    assert_eq!(batch.len(), 1);
    let jobs: Vec<NotificationJob> = serde_json::from_slice(&batch[0].body).unwrap();
    assert_eq!(jobs.len(), 7);
    assert!(broker.jobs_in("push.demo").is_empty());
}

#[tokio::test]
async fn test_priority_and_delay_are_applied() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;

    let body = json!([{
        "app_name": "demo",
        "device_token": token(9),
        "payload": {"alert": "later"},
        "priority": "high",
        "delay": 30
    }]);
    let response = post_json(router, "/api/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let jobs = broker.jobs_in("push.demo");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].priority, 0);
    assert_eq!(jobs[0].delay, Duration::from_secs(30));
    assert!(broker.ready_jobs("push.demo").is_empty());
}

#[tokio::test]
async fn test_unknown_app_rejects_whole_batch() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;

    let body = json!([
        {"app_name": "demo", "device_token": token(1), "payload": {"alert": "a"}},
        {"app_name": "ghost", "device_token": token(2), "payload": {"alert": "b"}}
    ]);
    let response = post_json(router, "/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "unknown_app_name");
    assert!(broker.jobs_in("push.demo").is_empty());
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let broker = MemoryBroker::new();
    let ctx = context(&broker);

    let response = post_json(ctx.router.clone(), "/push", "{not json".to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "invalid_request");

    let body = json!([{"app_name": "demo", "device_token": "abc", "payload": {}}]);
    let response = post_json(ctx.router.clone(), "/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "invalid_device_token");

    let body = json!([{"app_name": "demo", "payload": {"alert": "x"}}]);
    let response = post_json(ctx.router, "/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "missing_device_token");

    assert!(broker.jobs_in("push.demo").is_empty());
}

#[tokio::test]
async fn test_broker_outage_returns_service_unavailable() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;
    broker.set_available(false);

    let body = json!([{"app_name": "demo", "device_token": token(1), "payload": {"alert": "a"}}]);
    let response = post_json(router, "/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await["code"], "broker_unavailable");
}

#[tokio::test]
async fn test_push_stats_for_one_app() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;
    broker.put_job("push.demo", b"{}", PutOptions::default());
    broker.put_job("push.demo", b"{}", PutOptions::default());

    let response = get(router.clone(), "/push_stats?app_name=demo").await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = read_json(response).await;
    assert_eq!(stats["name"], "push.demo");
    assert_eq!(stats["current-jobs-ready"], 2);

    let response = get(router, "/push_stats?app_name=ghost").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "unknown_app_name");
}

#[tokio::test]
async fn test_push_stats_for_all_tubes() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;
    broker.put_job(BATCH_TUBE, b"[]", PutOptions::default());

    let response = get(router, "/api/push_stats").await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = read_json(response).await;
    assert_eq!(stats[BATCH_TUBE]["current-jobs-ready"], 1);
    assert_eq!(stats["push.demo"]["current-jobs-ready"], 0);
    assert_eq!(stats["push.other"]["total-jobs"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let broker = MemoryBroker::new();
    let router = context(&broker).router;

    let body = json!([{"app_name": "demo", "device_token": token(4), "payload": {"alert": "m"}}]);
    let response = post_json(router.clone(), "/push", body.to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(router, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("turbo_push_api_batches_enqueued_total"));
}
