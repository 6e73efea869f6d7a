//! Request construction, error pass-through and retry behavior.

use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::{Value, json};
use session_client::{
    ApiClient, Client, ClientConfig, ClientError, OperationDefinition, TransportError,
};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "k3y-with.symbols_~";

/// Returns a URL on a local port that has nothing listening on it.
fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/")
}

#[tokio::test]
async fn base_url_and_credential_reach_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/server-info"))
        .and(header("x-api-key", API_KEY))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "svc" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/items"))
        .and(header("x-api-key", API_KEY))
        .and(query_param("dry_run", "true"))
        .and(body_json(json!({ "name": "widget" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(format!("{}/api/v1", server.uri()), API_KEY)
        .expect("client")
        .scoped();

    assert_eq!(client.server_info().await.expect("info")["name"], "svc");
    assert_eq!(
        client
            .call_operation("getServerInfo", &[], &[], None)
            .await
            .expect("info by id")["name"],
        "svc"
    );
    let created = client
        .request_json_with_query(
            Method::POST,
            "/items",
            &[("dry_run", "true")],
            Some(json!({ "name": "widget" })),
        )
        .await
        .expect("create");
    assert_eq!(created["id"], 7);

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 3);
    for request in requests {
        assert!(request.url.path().starts_with("/api/v1/"));
        assert_eq!(
            request.headers.get("x-api-key").map(|v| v.as_bytes()),
            Some(API_KEY.as_bytes())
        );
    }
}

#[tokio::test]
async fn custom_api_key_header_and_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("authorization", API_KEY))
        .and(header("user-agent", "tests/1.0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::builder(server.uri())
        .api_key(API_KEY)
        .api_key_header("Authorization")
        .user_agent("tests/1.0")
        .build()
        .expect("config");
    let client = Client::from_config(config).scoped();

    let value = client
        .call_operation("getHealth", &[], &[], None)
        .await
        .expect("health");
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn operations_outside_the_catalog_render_path_params() {
    const GET_ITEM: OperationDefinition = OperationDefinition {
        operation_id: "getItem",
        method: "GET",
        path_template: "items/{item_id}",
        path_params: &["item_id"],
    };

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/item%2F42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(server.uri(), API_KEY).expect("client").scoped();
    let value = client
        .call(&GET_ITEM, &[("item_id", "item/42")], &[], None)
        .await
        .expect("item");
    assert_eq!(value["ok"], true);
}

#[tokio::test]
async fn path_params_are_percent_encoded_as_path_segments() {
    const GET_ITEM: OperationDefinition = OperationDefinition {
        operation_id: "getItem",
        method: "GET",
        path_template: "items/{item_id}",
        path_params: &["item_id"],
    };

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/a%20b%2Bc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(server.uri(), API_KEY).expect("client").scoped();
    let value = client
        .call(&GET_ITEM, &[("item_id", "a b+c")], &[], None)
        .await
        .expect("item");
    assert_eq!(value["ok"], true);

    let error = client
        .call(&GET_ITEM, &[("item_id", "..")], &[], None)
        .await
        .expect_err("dot segment");
    assert!(matches!(error, ClientError::InvalidPath(_)));
}

#[tokio::test]
async fn raw_paths_cannot_leave_the_base_url() {
    let server = MockServer::start().await;
    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hit": "other" })))
        .expect(0)
        .mount(&other)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hit": "base" })))
        .expect(0)
        .mount(&server)
        .await;

    let client = Client::new(format!("{}/api/v1", server.uri()), API_KEY)
        .expect("client")
        .scoped();

    let absolute = format!("{}/steal", other.uri());
    for raw in [absolute.as_str(), "../../admin", "items/../../../admin"] {
        let error = client
            .request_json_with_query(Method::GET, raw, &[], None)
            .await
            .expect_err(raw);
        assert!(
            matches!(&error, ClientError::InvalidPath(rejected) if rejected == raw),
            "{raw}: {error}"
        );
    }

    assert!(other.received_requests().await.expect("recording").is_empty());
    assert!(server.received_requests().await.expect("recording").is_empty());
}

#[tokio::test]
async fn json_helpers_send_method_body_and_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "2"))
        .and(header("x-api-key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .and(header("x-api-key", API_KEY))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "name": "widget" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 2 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/items/2"))
        .and(header("x-api-key", API_KEY))
        .and(body_json(json!({ "name": "gadget" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": 2, "name": "gadget" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/items/2"))
        .and(header("x-api-key", API_KEY))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(ClientConfig::new(server.uri(), API_KEY).expect("config"));

    let page = client
        .get_json_with_query("items", &[("page", "2")])
        .await
        .expect("list");
    assert_eq!(page[0]["id"], 1);

    let created = client
        .post_json("items", json!({ "name": "widget" }))
        .await
        .expect("create");
    assert_eq!(created["id"], 2);

    let updated = client
        .put_json("items/2", json!({ "name": "gadget" }))
        .await
        .expect("update");
    assert_eq!(updated["name"], "gadget");

    let deleted = client.delete_json("items/2").await.expect("delete");
    assert_eq!(deleted, Value::Null);

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 4);
    assert!(client.close());
}

#[tokio::test]
async fn http_errors_are_passed_through_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server-info"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::builder(server.uri())
        .api_key(API_KEY)
        .retries(3)
        .retry_wait(Duration::ZERO)
        .build()
        .expect("config");
    let client = Client::from_config(config).scoped();

    match client.server_info().await.expect_err("503") {
        ClientError::HttpStatus { status, body } => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn invalid_json_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server-info"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
        .mount(&server)
        .await;

    let client = Client::new(server.uri(), API_KEY).expect("client").scoped();
    let error = client.server_info().await.expect_err("bad json");
    assert!(matches!(error, ClientError::Json(_)));
}

#[tokio::test]
async fn connection_failures_are_retried_then_surface_as_transport_errors() {
    const RETRIES: u32 = 2;
    const WAIT: Duration = Duration::from_millis(150);

    let config = ClientConfig::builder(unreachable_base_url())
        .api_key(API_KEY)
        .retries(RETRIES)
        .retry_wait(WAIT)
        .build()
        .expect("config");
    let client = ApiClient::new(config);

    let started = Instant::now();
    let error = client.get_json("server-info").await.expect_err("nothing listens");
    let elapsed = started.elapsed();

    match error {
        ClientError::Transport(TransportError::Request(source)) => assert!(source.is_connect()),
        other => panic!("unexpected error: {other}"),
    }
    // One wait between each pair of attempts.
    assert!(elapsed >= WAIT * RETRIES, "gave up after {elapsed:?}");
    assert!(elapsed < WAIT * (RETRIES + 2), "kept retrying for {elapsed:?}");
    client.close();
}

#[tokio::test]
async fn connection_failures_without_retries_fail_immediately() {
    let config = ClientConfig::builder(unreachable_base_url())
        .retry_wait(Duration::from_secs(5))
        .build()
        .expect("config");
    let client = ApiClient::new(config);

    let started = Instant::now();
    let error = client.get_json("server-info").await.expect_err("nothing listens");
    assert!(error.is_transport());
    assert!(started.elapsed() < Duration::from_secs(5));
    client.close();
}

#[tokio::test]
async fn close_during_retry_wait_stops_retrying() {
    let config = ClientConfig::builder(unreachable_base_url())
        .retries(5)
        .retry_wait(Duration::from_millis(200))
        .build()
        .expect("config");
    let client = ApiClient::new(config);
    let closer = client.clone();

    let request = tokio::spawn(async move { client.get_json("server-info").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(closer.close());

    let error = request.await.expect("task completes").expect_err("closed");
    assert!(error.is_closed());
}

#[tokio::test]
async fn cancelled_request_is_not_retried_and_session_stays_usable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server-info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "up": true })))
        .mount(&server)
        .await;

    let config = ClientConfig::builder(server.uri())
        .api_key(API_KEY)
        .retries(3)
        .retry_wait(Duration::ZERO)
        .build()
        .expect("config");
    let client = Client::from_config(config).scoped();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        client.request_json_with_query(Method::GET, "slow", &[], None),
    )
    .await;
    assert!(cancelled.is_err());

    assert_eq!(client.server_info().await.expect("still usable")["up"], true);

    let slow_requests = server
        .received_requests()
        .await
        .expect("recording enabled")
        .into_iter()
        .filter(|request| request.url.path() == "/slow")
        .count();
    assert_eq!(slow_requests, 1);
}
