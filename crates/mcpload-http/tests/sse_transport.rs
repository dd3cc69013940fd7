//! Legacy HTTP+SSE client transport against a mock server.

use std::time::Duration;

use bytes::Bytes;
use mcpload_http::{AuthConfig, AuthInjector, SseClientConfig, SseClientTransport};
use mcpload_protocol::MessageId;
use mcpload_transport_traits::{Transport, TransportError, TransportMessage, TransportState};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

fn transport_for(server: &MockServer, auth: &AuthConfig) -> SseClientTransport {
    let url = format!("{}/sse", server.uri()).parse().unwrap();
    SseClientTransport::new(
        AuthInjector::wrap(reqwest::Client::new(), auth),
        SseClientConfig::new(url)
            .with_endpoint_timeout(Duration::from_secs(2))
            .with_request_timeout(Some(Duration::from_secs(5))),
    )
}

#[tokio::test]
async fn test_endpoint_discovery_post_and_stream_messages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sse"))
        .and(header("Authorization", "Bearer abc"))
        .respond_with(sse(concat!(
            ": connected\n\n",
            "event: endpoint\n",
            "data: /messages?sessionId=s1\n\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n",
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("Authorization", "Bearer abc"))
        .and(body_json(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server, &AuthConfig::bearer("abc"));
    transport.connect().await.unwrap();

    let endpoint = transport.message_endpoint().unwrap();
    assert_eq!(endpoint.path(), "/messages");
    assert_eq!(endpoint.query(), Some("sessionId=s1"));

    let ping = TransportMessage::new(
        Some(MessageId::Number(1)),
        Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#),
    );
    transport.send(ping).await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), transport.receive())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(message.id, Some(MessageId::Number(1)));

    // The mock body ends after the last event: the server closed the stream.
    let closed = tokio::time::timeout(Duration::from_secs(5), transport.receive())
        .await
        .unwrap()
        .unwrap();
    assert!(closed.is_none());

    transport.disconnect().await.unwrap();
    assert_eq!(transport.state().await, TransportState::Disconnected);
}

#[tokio::test]
async fn test_json_endpoint_event() {
    let server = MockServer::start().await;
    let absolute = format!("{}/rpc", server.uri());

    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(sse(&format!(
            "event: endpoint\ndata: {{\"uri\":\"{absolute}\"}}\n\n"
        )))
        .mount(&server)
        .await;

    let transport = transport_for(&server, &AuthConfig::default());
    transport.connect().await.unwrap();
    assert_eq!(transport.message_endpoint().unwrap().as_str(), absolute);
}

#[tokio::test]
async fn test_stream_without_endpoint_fails_to_connect() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(sse("event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n\n"))
        .mount(&server)
        .await;

    let transport = transport_for(&server, &AuthConfig::default());
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionFailed(_)), "{err:?}");
    assert!(matches!(
        transport.state().await,
        TransportState::Failed { .. }
    ));
    assert!(transport.connect().await.is_err());
}

#[tokio::test]
async fn test_forbidden_stream_maps_to_authentication_failed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let transport = transport_for(&server, &AuthConfig::bearer("wrong"));
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::AuthenticationFailed(_)), "{err:?}");
}
