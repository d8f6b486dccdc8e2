//! End-to-end resilience scenarios through the public client facade.

use breakwater_core::{
    config::{
        CacheConfig, Credential, EndpointTemplate, ProviderProfile, RateLimitConfig, RetryConfig,
    },
    BreakwaterClient, RpcError,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("breakwater_core=debug")
        .with_test_writer()
        .try_init();
}

fn profile(name: &str, server: &mockito::ServerGuard) -> ProviderProfile {
    ProviderProfile {
        name: Arc::from(name),
        chain_id: 1,
        endpoint: EndpointTemplate {
            scheme: "http".to_string(),
            ..EndpointTemplate::new(server.host_with_port(), "eth")
        },
        credential: Credential::new(format!("{name}-key")),
        archive_mode: false,
        rate_limit: RateLimitConfig::SlidingWindow {
            requests_per_second: 1_000,
            burst_limit: 10_000,
            daily_limit: None,
        },
        circuit_breaker: Default::default(),
        cache: CacheConfig { cacheable_methods: vec![], ..CacheConfig::default() },
        pool: Default::default(),
        retry: RetryConfig { max_retries: 0, base_delay_ms: 10, max_delay_ms: 50 },
        request_timeout_ms: 5_000,
        degraded_latency_ms: 2_000,
    }
}

/// Response body generator echoing the request id, so sequential calls pass
/// the executor's id-correlation check.
fn echo_id_body(
    result: &'static str,
) -> impl Fn(&mockito::Request) -> Vec<u8> + Send + Sync + 'static {
    move |request| {
        let id = serde_json::from_slice::<serde_json::Value>(request.body().unwrap())
            .ok()
            .and_then(|value| value.get("id").cloned())
            .unwrap_or(json!(1));
        format!(r#"{{"jsonrpc":"2.0","result":{result},"id":{id}}}"#).into_bytes()
    }
}

/// A burst beyond the bucket size yields exactly `burst_size` successes; the
/// overflow is rejected locally with a nonzero retry-after and never reaches
/// the provider.
#[tokio::test]
async fn burst_beyond_bucket_size_is_throttled_deterministically() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let wire = server
        .mock("POST", "/eth/solo-key")
        .with_status(200)
        .with_body_from_request(echo_id_body("1"))
        .expect(20)
        .create_async()
        .await;

    let mut solo = profile("solo", &server);
    // One token per second steady state keeps refill out of the picture for
    // the duration of the burst; the bucket alone decides.
    solo.rate_limit = RateLimitConfig::TokenBucket { requests_per_minute: 60, burst_size: 20 };

    let client = BreakwaterClient::builder()
        .provider(solo)
        .shutdown_grace(Duration::from_millis(100))
        .build()
        .unwrap();

    let mut successes = 0u32;
    let mut rejections = 0u32;
    for _ in 0..25 {
        match client.call("eth_getBalance", None).await {
            Ok(_) => successes += 1,
            Err(RpcError::RateLimited { retry_after }) => {
                rejections += 1;
                assert!(retry_after > Duration::ZERO, "retry-after must be nonzero");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(successes, 20);
    assert_eq!(rejections, 5);
    wire.assert_async().await;

    let snapshot = client.metrics_snapshot();
    assert_eq!(snapshot.rate_limit_denials, 5);
    client.shutdown().await;
}

/// A rate-limited primary is transparent to the caller: the fallback serves
/// the call, and the failover state reflects the switch.
#[tokio::test]
async fn caller_never_sees_a_rate_limited_primary() {
    init_tracing();
    let mut primary = mockito::Server::new_async().await;
    let mut fallback = mockito::Server::new_async().await;

    let _primary_mock = primary
        .mock("POST", "/eth/primary-key")
        .with_status(429)
        .with_body("limited")
        .create_async()
        .await;
    let fallback_mock = fallback
        .mock("POST", "/eth/fallback-key")
        .with_status(200)
        .with_body_from_request(echo_id_body(r#""0xbeef""#))
        .expect(2)
        .create_async()
        .await;

    let client = BreakwaterClient::builder()
        .provider(profile("primary", &primary))
        .provider(profile("fallback", &fallback))
        .failover_threshold(3)
        .shutdown_grace(Duration::from_millis(100))
        .build()
        .unwrap();

    let first = client.call("eth_getBalance", None).await.unwrap();
    assert_eq!(first, json!("0xbeef"));

    let state = client.failover_state();
    assert_eq!(state.active_index, 1);
    assert!(state.failover_active);

    // Subsequent calls go straight to the fallback.
    client.call("eth_getBalance", None).await.unwrap();
    fallback_mock.assert_async().await;

    let snapshot = client.metrics_snapshot();
    assert_eq!(snapshot.failover_activations, 1);
    assert_eq!(snapshot.active_provider_index, 1);

    client.shutdown().await;
}

/// Every provider failing in one logical call surfaces the aggregate error
/// with each provider's failure attached.
#[tokio::test]
async fn exhausting_all_providers_reports_every_failure() {
    init_tracing();
    let mut primary = mockito::Server::new_async().await;
    let mut fallback = mockito::Server::new_async().await;

    let _p = primary
        .mock("POST", "/eth/primary-key")
        .with_status(503)
        .with_body("down")
        .create_async()
        .await;
    let _f = fallback
        .mock("POST", "/eth/fallback-key")
        .with_status(503)
        .with_body("also down")
        .create_async()
        .await;

    let client = BreakwaterClient::builder()
        .provider(profile("primary", &primary))
        .provider(profile("fallback", &fallback))
        .shutdown_grace(Duration::from_millis(100))
        .build()
        .unwrap();

    let error = client.call("eth_getBalance", None).await.unwrap_err();
    match &error {
        RpcError::FailoverExhausted { attempts } => {
            assert_eq!(attempts.len(), 2);
            let text = error.to_string();
            assert!(text.contains("primary"));
            assert!(text.contains("fallback"));
        }
        other => panic!("expected FailoverExhausted, got {other:?}"),
    }

    client.shutdown().await;
}

/// A failed rotation attempt leaves the running credential fully usable.
#[tokio::test]
async fn failed_rotation_keeps_the_client_serving() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let _bad_key = server
        .mock("POST", "/eth/bad-key")
        .with_status(401)
        .with_body("unauthorized")
        .create_async()
        .await;
    let _good_key = server
        .mock("POST", "/eth/solo-key")
        .with_status(200)
        .with_body_from_request(echo_id_body(r#""0x1""#))
        .create_async()
        .await;

    let client = BreakwaterClient::builder()
        .provider(profile("solo", &server))
        .shutdown_grace(Duration::from_millis(100))
        .build()
        .unwrap();

    let error = client.rotate_credentials("solo", "bad-key").await.unwrap_err();
    assert!(matches!(error, RpcError::InvalidCredentials { .. }));

    // The old credential still serves immediately afterwards.
    let value = client.call("eth_getBalance", None).await.unwrap();
    assert_eq!(value, json!("0x1"));

    client.shutdown().await;
}
