
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use harness::{
    dead_downstream_url, spawn_downstream, spawn_echo_downstream, spawn_slow_downstream,
    GatewayProcess, TEST_API_KEY,
};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

fn proxy_config(airtable_url: &str, mcp_url: &str, timeout_ms: u64) -> String {
    format!(
        r#"
[[auth.api_keys]]
name = "contract"
key = "{key}"

[[services]]
name = "airtable-gateway"
base_url = "{airtable_url}"
timeout_ms = {timeout_ms}

[[services]]
name = "mcp-server"
base_url = "{mcp_url}"
timeout_ms = {timeout_ms}

[[routes]]
prefix = "/api/airtable"
service = "airtable-gateway"
strip_prefix = true

[[routes]]
prefix = "/api/tools"
service = "mcp-server"

[[routes]]
prefix = "/api/execute-tool"
service = "mcp-server"
"#,
        key = TEST_API_KEY,
        airtable_url = airtable_url,
        mcp_url = mcp_url,
        timeout_ms = timeout_ms,
    )
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_degraded_when_one_downstream_is_down() {
    let airtable = spawn_downstream(200, "ok").await;
    let dead = dead_downstream_url();
    let process =
        GatewayProcess::spawn_with_config(&proxy_config(&airtable.base_url, &dead, 2_000)).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/health", process.base_url))
        .send()
        .await
        .expect("health response");
    assert_eq!(resp.status(), 200, "health must answer 200 while degraded");

    let body: Value = resp.json().await.expect("health json");
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["gateway"], "airbase-gateway");

    let services = body["services"].as_array().expect("services array");
    assert_eq!(services.len(), 2);
    assert_eq!(services[0]["name"], "airtable-gateway");
    assert_eq!(services[0]["status"], "healthy");
    assert!(
        services[0]["response_time"].as_f64().is_some(),
        "healthy entry records latency, body={body}"
    );
    assert_eq!(services[1]["name"], "mcp-server");
    assert_eq!(services[1]["status"], "unhealthy");

    assert_eq!(body["websocket_stats"]["active_connections"], 0);
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_api_key_never_reaches_the_downstream() {
    let airtable = spawn_downstream(200, r#"{"bases":[]}"#).await;
    let mcp = spawn_downstream(200, "{}").await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &mcp.base_url,
        2_000,
    ))
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/airtable/bases", process.base_url))
        .send()
        .await
        .expect("unauthenticated response");
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.expect("error json");
    assert_eq!(body["code"], "auth.unauthenticated");

    let resp = client
        .get(format!("{}/api/airtable/bases", process.base_url))
        .header("X-API-Key", "not-the-key")
        .send()
        .await
        .expect("bad key response");
    assert_eq!(resp.status(), 401);

    assert_eq!(airtable.hits(), 0, "downstream must not be contacted");
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn valid_key_relays_the_downstream_body_verbatim() {
    let airtable = spawn_downstream(200, "{}").await;
    let mcp = spawn_downstream(200, r#"{"tools":["list_bases","get_records"]}"#).await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &mcp.base_url,
        2_000,
    ))
    .await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/tools", process.base_url))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("tools response");
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.expect("body");
    assert_eq!(text, r#"{"tools":["list_bases","get_records"]}"#);
    assert_eq!(mcp.hits(), 1);
    assert_eq!(airtable.hits(), 0, "only the configured target is contacted");
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bearer_header_is_accepted_as_key_alias() {
    let airtable = spawn_downstream(200, "{}").await;
    let mcp = spawn_downstream(200, r#"{"tools":[]}"#).await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &mcp.base_url,
        2_000,
    ))
    .await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/tools", process.base_url))
        .bearer_auth(TEST_API_KEY)
        .send()
        .await
        .expect("tools response");
    assert_eq!(resp.status(), 200);
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_downstream_maps_to_504_on_schedule() {
    let airtable = spawn_downstream(200, "{}").await;
    let slow = spawn_slow_downstream(10_000).await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &slow.base_url,
        2_000,
    ))
    .await;

    let start = Instant::now();
    let resp = reqwest::Client::new()
        .get(format!("{}/api/tools", process.base_url))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("timeout response");
    let elapsed = start.elapsed();

    assert_eq!(resp.status(), 504);
    let body: Value = resp.json().await.expect("error json");
    assert_eq!(body["code"], "upstream.timeout");
    assert!(
        elapsed >= Duration::from_millis(1_800),
        "timed out early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(8),
        "timed out late: {elapsed:?}"
    );
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_downstream_maps_to_503() {
    let airtable = spawn_downstream(200, "{}").await;
    let dead = dead_downstream_url();
    let process =
        GatewayProcess::spawn_with_config(&proxy_config(&airtable.base_url, &dead, 2_000)).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/tools", process.base_url))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("unavailable response");
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.expect("error json");
    assert_eq!(body["code"], "upstream.unavailable");
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn downstream_5xx_passes_through_status_and_body() {
    let airtable = spawn_downstream(200, "{}").await;
    let broken = spawn_downstream(500, "upstream exploded").await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &broken.base_url,
        2_000,
    ))
    .await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/tools", process.base_url))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("passthrough response");
    assert_eq!(resp.status(), 500);
    assert_eq!(resp.text().await.expect("body"), "upstream exploded");
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prefix_stripping_forwards_the_derived_path() {
    let airtable = spawn_echo_downstream().await;
    let mcp = spawn_echo_downstream().await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &mcp.base_url,
        2_000,
    ))
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "{}/api/airtable/bases?limit=5",
            process.base_url
        ))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("airtable response");
    assert_eq!(resp.text().await.expect("body"), "/bases?limit=5");

    let resp = client
        .get(format!("{}/api/tools", process.base_url))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("tools response");
    assert_eq!(resp.text().await.expect("body"), "/api/tools");
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_routes_answer_404_locally() {
    let airtable = spawn_downstream(200, "{}").await;
    let mcp = spawn_downstream(200, "{}").await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &mcp.base_url,
        2_000,
    ))
    .await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/unknown/thing", process.base_url))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("404 response");
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.expect("error json");
    assert_eq!(body["code"], "route.not_found");
    assert_eq!(airtable.hits() + mcp.hits(), 0);
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn websocket_counters_track_the_connection_lifecycle() {
    let process = GatewayProcess::spawn_with_config("").await;

    let (mut ws1, _) = tokio_tungstenite::connect_async(process.ws_url())
        .await
        .expect("ws1 connect");
    let (mut ws2, _) = tokio_tungstenite::connect_async(process.ws_url())
        .await
        .expect("ws2 connect");
    let (mut ws3, _) = tokio_tungstenite::connect_async(process.ws_url())
        .await
        .expect("ws3 connect");

    for ws in [&mut ws1, &mut ws2] {
        for _ in 0..2 {
            ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
                .await
                .expect("send ping");
            let reply = ws.next().await.expect("reply frame").expect("reply ok");
            assert!(reply.to_text().expect("text frame").contains("pong"));
        }
    }
    ws3.send(Message::Text(r#"{"type":"echo","payload":42}"#.into()))
        .await
        .expect("send echo");
    let reply = ws3.next().await.expect("reply frame").expect("reply ok");
    assert!(reply.to_text().expect("text frame").contains("42"));

    ws1.close(None).await.expect("close ws1");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats: Value = reqwest::Client::new()
        .get(format!("{}/api/websocket/stats", process.base_url))
        .send()
        .await
        .expect("stats response")
        .json()
        .await
        .expect("stats json");

    assert_eq!(stats["total_connections"], 3);
    assert_eq!(stats["active_connections"], 2);
    assert_eq!(stats["messages_sent"], 5);
}

#[serial_test::serial]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_and_routes_expose_gateway_introspection() {
    let airtable = spawn_downstream(200, "{}").await;
    let mcp = spawn_downstream(200, "{}").await;
    let process = GatewayProcess::spawn_with_config(&proxy_config(
        &airtable.base_url,
        &mcp.base_url,
        2_000,
    ))
    .await;
    let client = reqwest::Client::new();

    client
        .get(format!("{}/api/tools", process.base_url))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .expect("tools response")
        .error_for_status()
        .expect("tools ok");

    let routes: Value = client
        .get(format!("{}/routes", process.base_url))
        .send()
        .await
        .expect("routes response")
        .json()
        .await
        .expect("routes json");
    let listed = routes.as_array().expect("routes array");
    assert!(listed
        .iter()
        .any(|r| r["prefix"] == "/api/airtable" && r["service"] == "airtable-gateway"));

    let metrics: Value = client
        .get(format!("{}/metrics", process.base_url))
        .send()
        .await
        .expect("metrics response")
        .json()
        .await
        .expect("metrics json");
    assert!(metrics["total_requests"].as_u64().expect("requests") >= 1);
    assert!(metrics["paths"]
        .as_array()
        .expect("paths")
        .iter()
        .any(|p| p["path"] == "/api/tools"));
    assert_eq!(metrics["upstream"]["requests"], 1);
}
