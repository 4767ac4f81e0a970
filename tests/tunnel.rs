//! End-to-end tests for the transparent tunnel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_gate::config::RelayConfig;
use tokio_tungstenite::tungstenite::Message;

mod common;

use common::{client, http_response, start_fixed_origin, start_relay, start_ws_origin};

#[tokio::test]
async fn passthrough_is_transparent() {
    let mut origin = start_fixed_origin(http_response(
        "200 OK",
        &[("Content-Type", "application/json"), ("X-Custom", "yes")],
        br#"{"ok":true}"#,
    ))
    .await;
    let relay = start_relay(RelayConfig::default()).await;

    let res = client()
        .get(relay.tunnel_url(&origin.url("/data?x=1")))
        .header("X-App", "1")
        .header("Connection", "keep-alive, x-secret")
        .header("X-Secret", "s3cret")
        .header("X-Forwarded-For", "10.0.0.1")
        .send()
        .await
        .expect("relay unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-custom"], "yes");
    assert_eq!(res.headers()["content-type"], "application/json");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), r#"{"ok":true}"#);

    let seen = origin.next_request().await;
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.target, "/data?x=1");
    assert_eq!(seen.header("host"), Some(origin.addr.to_string().as_str()));
    assert_eq!(seen.header("x-app"), Some("1"));
    assert_eq!(seen.header("x-secret"), None, "connection-listed header leaked");
    assert_eq!(seen.header("x-forwarded-for"), None);
    assert_eq!(seen.header("x-request-id"), None);

    relay.shutdown.trigger();
}

#[tokio::test]
async fn redirects_are_relayed_not_followed() {
    let mut origin = start_fixed_origin(http_response(
        "302 Found",
        &[("Location", "/elsewhere")],
        b"",
    ))
    .await;
    let relay = start_relay(RelayConfig::default()).await;

    let res = client()
        .get(relay.tunnel_url(&origin.url("/start")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 302);
    assert_eq!(res.headers()["location"], "/elsewhere");

    let seen = origin.next_request().await;
    assert_eq!(seen.target, "/start");
    assert!(
        tokio::time::timeout(Duration::from_millis(200), origin.seen.recv())
            .await
            .is_err(),
        "redirect target must not be fetched"
    );

    relay.shutdown.trigger();
}

#[tokio::test]
async fn request_body_is_forwarded() {
    let mut origin = start_fixed_origin(http_response("201 Created", &[], b"stored")).await;
    let relay = start_relay(RelayConfig::default()).await;

    let res = client()
        .post(relay.tunnel_url(&origin.url("/items")))
        .header("Content-Type", "text/plain")
        .body("hello world")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.text().await.unwrap(), "stored");

    let seen = origin.next_request().await;
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.body, b"hello world");
    assert_eq!(seen.header("content-type"), Some("text/plain"));

    relay.shutdown.trigger();
}

#[tokio::test]
async fn failure_classes_are_distinguishable() {
    let relay = start_relay(RelayConfig::default()).await;
    let client = client();

    let unreachable = client
        .get(relay.tunnel_url(&format!("http://127.0.0.1:{}/", common::closed_port())))
        .send()
        .await
        .unwrap();
    assert_eq!(unreachable.status(), 502);
    assert_eq!(unreachable.headers()["x-relay-error"], "UPSTREAM_UNREACHABLE");
    let body: serde_json::Value = unreachable.json().await.unwrap();
    assert_eq!(body["code"], "UPSTREAM_UNREACHABLE");

    let malformed = client.get(relay.url("/bare/not%20a%20url")).send().await.unwrap();
    assert_eq!(malformed.status(), 400);
    assert_eq!(malformed.headers()["x-relay-error"], "CLIENT_REQUEST");

    let bad_scheme = client
        .get(relay.tunnel_url("ftp://example.com/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_scheme.status(), 400);

    relay.shutdown.trigger();
}

#[tokio::test]
async fn hung_destination_times_out() {
    let silent = common::start_silent_origin().await;
    let mut config = RelayConfig::default();
    config.timeouts.upstream_secs = 1;
    let relay = start_relay(config).await;

    let res = client()
        .get(relay.tunnel_url(&format!("http://{}/slow", silent)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);
    assert_eq!(res.headers()["x-relay-error"], "UPSTREAM_TIMEOUT");

    relay.shutdown.trigger();
}

#[tokio::test]
async fn destination_timeout_beats_request_timeout() {
    let silent = common::start_silent_origin().await;
    let mut config = RelayConfig::default();
    config.timeouts.request_secs = 2;
    config.timeouts.upstream_secs = 1;
    assert!(relay_gate::config::validate_config(&config).is_ok());
    let relay = start_relay(config).await;

    let res = client()
        .get(relay.tunnel_url(&format!("http://{}/slow", silent)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);
    assert_eq!(res.headers()["x-relay-error"], "UPSTREAM_TIMEOUT");

    relay.shutdown.trigger();
}

#[tokio::test]
async fn manifest_on_bare_prefix() {
    let relay = start_relay(RelayConfig::default()).await;
    let res = client().get(relay.url("/bare/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let manifest: serde_json::Value = res.json().await.unwrap();
    assert_eq!(manifest["versions"][0], "v1");
    assert_eq!(manifest["project"]["name"], "relay-gate");

    relay.shutdown.trigger();
}

#[tokio::test]
async fn websocket_relay_and_close_propagation() {
    let (ws_addr, origin_closed) = start_ws_origin().await;
    let relay = start_relay(RelayConfig::default()).await;

    let url = format!(
        "ws://{}/bare/{}",
        relay.addr,
        urlencoding::encode(&format!("ws://{}/ws", ws_addr))
    );
    let (mut socket, response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("websocket handshake through relay");
    assert_eq!(response.status(), 101);

    socket.send(Message::text("ping")).await.unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no echo")
        .expect("stream ended")
        .unwrap();
    assert_eq!(echoed.to_text().unwrap(), "ping");

    socket.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let echoed = socket.next().await.unwrap().unwrap();
    assert_eq!(echoed.into_data().as_ref(), &[1u8, 2, 3]);

    drop(socket);
    assert!(
        common::wait_for_flag(&origin_closed, Duration::from_secs(5)).await,
        "origin side must close once the client leaves"
    );

    relay.shutdown.trigger();
}

#[tokio::test]
async fn shutdown_closes_live_relays() {
    let (ws_addr, origin_closed) = start_ws_origin().await;
    let relay = start_relay(RelayConfig::default()).await;

    let url = format!(
        "ws://{}/bare/{}",
        relay.addr,
        urlencoding::encode(&format!("ws://{}/ws", ws_addr))
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    socket.send(Message::text("hello")).await.unwrap();
    let _ = socket.next().await;

    relay.shutdown.trigger();
    assert!(
        common::wait_for_flag(&origin_closed, Duration::from_secs(5)).await,
        "shutdown must tear down the origin connection"
    );
}
