//! Traversal behavior across targets: reroute on 5xx, unreachable
//! primaries, per-target retries, and exhaustion.

use crate::mock_infrastructure::{
    counter_value, spawn_gateway, CapturingUpstream, GatewayOptions, TargetSpec,
};
use std::time::Duration;

#[tokio::test]
async fn test_failover_on_5xx_serves_from_secondary() {
    let primary = CapturingUpstream::start(500, "").await;
    let secondary = CapturingUpstream::start(200, r#"{"this_is":"body"}"#).await;

    let harness = spawn_gateway(
        &[
            TargetSpec::plain("e1-primary", &primary.url()),
            TargetSpec::plain("e1-secondary", &secondary.url()),
        ],
        GatewayOptions::default(),
    )
    .await;

    let response = reqwest::Client::new()
        .post(harness.url())
        .header("content-type", "application/json")
        .body(r#"{"this_is":"body"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"this_is":"body"}"#);
    assert_eq!(primary.request_count(), 1);
    assert_eq!(secondary.request_count(), 1);

    let rendered = harness.metrics.render();
    assert_eq!(
        counter_value(
            &rendered,
            "rpc_gateway_request_errors_handled_total",
            &[("provider", "e1-primary"), ("type", "rerouted")],
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_unreachable_primary_records_one_failure() {
    let secondary = CapturingUpstream::start(200, "echo").await;

    let harness = spawn_gateway(
        &[
            TargetSpec::plain("e4-dead", "http://127.0.0.1:1"),
            TargetSpec::plain("e4-live", &secondary.url()),
        ],
        GatewayOptions::default(),
    )
    .await;

    let response = reqwest::Client::new()
        .post(harness.url())
        .body(r#"{"ping":true}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "echo");

    // Exactly one failure observation landed in the dead target's window.
    let dead = &harness.supervisor.runtimes()[0];
    assert_eq!(dead.window().len().await, 1);
    assert_eq!(dead.window().sum().await, 0);

    let live = &harness.supervisor.runtimes()[1];
    assert_eq!(live.window().len().await, 1);
    assert_eq!(live.window().sum().await, 1);
}

#[tokio::test]
async fn test_exhaustion_returns_503() {
    let first = CapturingUpstream::start(500, "").await;
    let second = CapturingUpstream::start(503, "").await;

    let harness = spawn_gateway(
        &[
            TargetSpec::plain("exhaust-a", &first.url()),
            TargetSpec::plain("exhaust-b", &second.url()),
        ],
        GatewayOptions::default(),
    )
    .await;

    let response =
        reqwest::Client::new().post(harness.url()).body("{}").send().await.unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "Service Unavailable");

    // Each target was tried exactly once before giving up.
    assert_eq!(first.request_count(), 1);
    assert_eq!(second.request_count(), 1);

    let rendered = harness.metrics.render();
    assert_eq!(
        counter_value(
            &rendered,
            "rpc_gateway_request_errors_handled_total",
            &[("provider", "exhaust-b"), ("type", "failure")],
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_single_failing_target_without_retries_is_not_reissued() {
    let flaky = CapturingUpstream::start(500, "").await;

    let harness = spawn_gateway(
        &[TargetSpec::plain("noretry", &flaky.url())],
        GatewayOptions::default(),
    )
    .await;

    let response =
        reqwest::Client::new().post(harness.url()).body("{}").send().await.unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(flaky.request_count(), 1);
}

#[tokio::test]
async fn test_per_target_retry_reissues_before_giving_up() {
    let flaky = CapturingUpstream::start(500, "").await;

    let harness = spawn_gateway(
        &[TargetSpec::plain("retry-once", &flaky.url())],
        GatewayOptions {
            retries_per_target: 1,
            retry_delay: Duration::from_millis(5),
            ..GatewayOptions::default()
        },
    )
    .await;

    let response =
        reqwest::Client::new().post(harness.url()).body("{}").send().await.unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(flaky.request_count(), 2);

    let rendered = harness.metrics.render();
    assert_eq!(
        counter_value(
            &rendered,
            "rpc_gateway_request_errors_handled_total",
            &[("provider", "retry-once"), ("type", "retry")],
        ),
        Some(1.0)
    );
    // A single failure observation: retries within one target collapse into
    // one strike when the target is abandoned.
    assert_eq!(harness.supervisor.runtimes()[0].window().len().await, 1);
}

#[tokio::test]
async fn test_application_level_error_passes_through() {
    // A 400 with a JSON-RPC error body is a response, not a failover
    // trigger; the client sees it verbatim.
    let only = CapturingUpstream::start(400, r#"{"error":{"code":-32600}}"#).await;

    let harness = spawn_gateway(
        &[TargetSpec::plain("passthrough", &only.url())],
        GatewayOptions::default(),
    )
    .await;

    let response =
        reqwest::Client::new().post(harness.url()).body("{}").send().await.unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), r#"{"error":{"code":-32600}}"#);
    assert_eq!(harness.supervisor.runtimes()[0].window().sum().await, 1);
}

#[tokio::test]
async fn test_upstream_timeout_fails_over() {
    let slow =
        CapturingUpstream::start_with_delay(200, "slow", Duration::from_millis(200)).await;
    let fast = CapturingUpstream::start(200, "fast").await;

    let harness = spawn_gateway(
        &[
            TargetSpec::plain("timeout-slow", &slow.url()),
            TargetSpec::plain("timeout-fast", &fast.url()),
        ],
        GatewayOptions { upstream_timeout: Duration::from_millis(50), ..GatewayOptions::default() },
    )
    .await;

    let response =
        reqwest::Client::new().post(harness.url()).body("{}").send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "fast");
    assert_eq!(harness.supervisor.runtimes()[0].window().sum().await, 0);
}
