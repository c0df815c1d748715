mod support;

use kubelet_util::Error;
use std::time::Duration;
use support::{FakeKubelet, pod};

async fn ready_fake() -> (FakeKubelet, kubelet_util::KubeletClient) {
    let fake = FakeKubelet::http_only().await;
    fake.set_pods(&[
        pod("uid-1", "node-1", "10.0.0.1", &["docker://aaa"]),
        pod("uid-2", "node-1", "10.0.0.1", &["docker://bbb", "docker://ccc"]),
    ]);
    let client = fake.client(fake.config(), &["127.0.0.1"]);
    client.ensure_ready().await.unwrap();
    (fake, client)
}

#[tokio::test]
async fn test_fresh_list_is_served_from_cache() {
    let (fake, client) = ready_fake().await;

    let first = client.get_local_pod_list().await.unwrap();
    let second = client.get_local_pod_list().await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(fake.count("http", "/pods"), 1);

    let stats = client.cache_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.cached_pods, Some(2));
}

#[tokio::test]
async fn test_expired_list_is_fetched_once() {
    let (fake, client) = ready_fake().await;
    client.set_pod_list_cache_duration(Duration::from_millis(50));

    client.get_local_pod_list().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.get_local_pod_list().await.unwrap();
    client.get_local_pod_list().await.unwrap();

    assert_eq!(fake.count("http", "/pods"), 2);
}

#[tokio::test]
async fn test_zero_ttl_always_fetches() {
    let (fake, client) = ready_fake().await;
    client.set_pod_list_cache_duration(Duration::ZERO);

    for _ in 0..3 {
        client.get_local_pod_list().await.unwrap();
    }
    assert_eq!(fake.count("http", "/pods"), 3);
}

#[tokio::test]
async fn test_force_refresh_bypasses_fresh_entry() {
    let (fake, client) = ready_fake().await;

    client.get_local_pod_list().await.unwrap();
    fake.set_pods(&[pod("uid-3", "node-1", "10.0.0.1", &[])]);

    let forced = client.force_get_local_pod_list().await.unwrap();
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].metadata.uid, "uid-3");
    assert_eq!(fake.count("http", "/pods"), 2);

    // the forced fetch replaced the entry
    let cached = client.get_local_pod_list().await.unwrap();
    assert_eq!(cached[0].metadata.uid, "uid-3");
    assert_eq!(fake.count("http", "/pods"), 2);
}

#[tokio::test]
async fn test_reset_cache_forces_fetch() {
    let (fake, client) = ready_fake().await;

    client.get_local_pod_list().await.unwrap();
    client.reset_cache().await;
    client.get_local_pod_list().await.unwrap();

    assert_eq!(fake.count("http", "/pods"), 2);
}

#[tokio::test]
async fn test_error_status_keeps_previous_list() {
    let (fake, client) = ready_fake().await;
    client.get_local_pod_list().await.unwrap();

    fake.set_pods_status(500);
    let err = client.force_get_local_pod_list().await.unwrap_err();
    match &err {
        Error::HttpStatus {
            status,
            endpoint,
            path,
            ..
        } => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(endpoint, &format!("http://127.0.0.1:{}", fake.http_port));
            assert_eq!(path, "/pods");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }

    let cached = client.get_local_pod_list().await.unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(fake.count("http", "/pods"), 2);
}

#[tokio::test]
async fn test_parse_error_keeps_previous_list() {
    let (fake, client) = ready_fake().await;
    client.get_local_pod_list().await.unwrap();

    fake.set_pods_body("{\"items\": [not json");
    let err = client.force_get_local_pod_list().await.unwrap_err();
    assert!(matches!(err, Error::Json(_)), "{err:?}");

    let cached = client.get_local_pod_list().await.unwrap();
    assert_eq!(cached.len(), 2);
}

#[tokio::test]
async fn test_failed_first_fetch_leaves_cache_empty() {
    let (fake, client) = ready_fake().await;
    fake.set_pods_status(503);

    assert!(client.get_local_pod_list().await.is_err());
    assert!(client.get_local_pod_list().await.is_err());
    assert_eq!(fake.count("http", "/pods"), 2);
    assert_eq!(client.cache_stats().await.cached_pods, None);
}

#[tokio::test]
async fn test_null_fields_parse_as_empty() {
    let (fake, client) = ready_fake().await;
    fake.set_pods_body(
        r#"{"items":[{"metadata":{"uid":"u1","labels":{"a":"b"}},"spec":null,"status":{"containerStatuses":null}}]}"#,
    );

    let pods = client.force_get_local_pod_list().await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].metadata.uid, "u1");
    assert_eq!(pods[0].spec.node_name, "");
    assert!(pods[0].status.containers.is_empty());
}
