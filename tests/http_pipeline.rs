//! End-to-end pipeline tests against a mock storefront backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storefront_client::auth::{HttpRefreshExchange, MemoryTokenStore, TokenStore};
use storefront_client::net::{HttpClient, HttpTransport};
use storefront_client::reference::GetProvinces;
use storefront_client::{
    AuthFailure, Failure, NetworkFailure, Operation, Pipeline, TokenEvent, TokenEventBus, TokenPair,
};

struct Harness {
    pipeline: Pipeline,
    store: MemoryTokenStore,
    events: TokenEventBus,
}

fn harness(server: &MockServer, store: MemoryTokenStore) -> Harness {
    harness_at(&format!("{}/graphql", server.uri()), server, store, None)
}

fn harness_at(
    endpoint: &str,
    server: &MockServer,
    store: MemoryTokenStore,
    timeout: Option<Duration>,
) -> Harness {
    let client = HttpClient::new();
    let mut transport = HttpTransport::new(client.clone(), Url::parse(endpoint).unwrap());
    if let Some(timeout) = timeout {
        transport = transport.with_timeout(timeout);
    }
    let refresh = Url::parse(&format!("{}/auth/refresh", server.uri())).unwrap();
    let exchange = HttpRefreshExchange::new(client, refresh);
    let events = TokenEventBus::new();

    let pipeline = Pipeline::builder(Arc::new(transport), Arc::new(exchange))
        .store(Arc::new(store.clone()))
        .events(events.clone())
        .build();

    Harness {
        pipeline,
        store,
        events,
    }
}

fn signed_in() -> MemoryTokenStore {
    MemoryTokenStore::with_pair(TokenPair::new("at-1", "rt-1", Some(3600)))
}

fn data(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": body }))
}

#[tokio::test]
async fn test_private_operation_carries_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer at-1"))
        .and(body_partial_json(json!({"operationName": "getCart"})))
        .respond_with(data(json!({"cart": {"items": []}})))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    let value = h.pipeline.submit(Operation::query("getCart")).await.unwrap();
    assert_eq!(value, json!({"cart": {"items": []}}));
}

#[tokio::test]
async fn test_public_operation_never_carries_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"operationName": "getProvinces"})))
        .respond_with(data(json!({"provinces": [{"id": "79", "name": "Ho Chi Minh"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    let provinces = h.pipeline.execute::<GetProvinces>(&()).await.unwrap();
    assert_eq!(provinces[0].id, "79");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
    assert!(received[0].headers.get("x-request-id").is_some());
}

#[tokio::test]
async fn test_empty_store_fails_without_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(data(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server, MemoryTokenStore::new());
    let err = h.pipeline.submit(Operation::query("getCart")).await.unwrap_err();
    assert_eq!(err, Failure::Authentication(AuthFailure::MissingCredential));
}

#[tokio::test]
async fn test_http_401_refreshes_and_replays() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(json!({"refreshToken": "rt-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "at-2",
            "refreshToken": "rt-2",
            "expiresIn": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(data(json!({"me": {"email": "a@b.vn"}})))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&updates);
    let _sub = h.events.subscribe(TokenEvent::Updated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let value = h.pipeline.submit(Operation::query("me")).await.unwrap();
    assert_eq!(value["me"]["email"], "a@b.vn");

    let stored = h.store.get().unwrap().unwrap();
    assert_eq!(stored.access_token, "at-2");
    assert_eq!(stored.refresh_token, "rt-2");
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unauthenticated_error_code_refreshes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "jwt expired", "extensions": {"code": "UNAUTHENTICATED"}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(data(json!({"orders": []})))
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    let value = h.pipeline.submit(Operation::query("getOrders")).await.unwrap();
    assert_eq!(value, json!({"orders": []}));

    // No rotation: the old refresh token is kept.
    let stored = h.store.get().unwrap().unwrap();
    assert_eq!(stored.access_token, "at-2");
    assert_eq!(stored.refresh_token, "rt-1");
}

#[tokio::test]
async fn test_concurrent_rejections_share_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"accessToken": "at-2", "refreshToken": "rt-2"}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(data(json!({"ok": true})))
        .expect(5)
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    let calls = (0..5).map(|i| h.pipeline.submit(Operation::query(format!("op{i}"))));
    for result in futures::future::join_all(calls).await {
        assert_eq!(result.unwrap(), json!({"ok": true}));
    }
}

#[tokio::test]
async fn test_failed_refresh_ends_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid refresh token"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    let removed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&removed);
    let _sub = h.events.subscribe(TokenEvent::Removed, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = h.pipeline.submit(Operation::query("getCart")).await.unwrap_err();
    assert!(err.is_session_expired());
    assert!(h.store.is_empty());
    assert_eq!(removed.load(Ordering::SeqCst), 1);

    // Subsequent private calls fail fast.
    let err = h.pipeline.submit(Operation::query("getCart")).await.unwrap_err();
    assert_eq!(err, Failure::missing_credential());
}

#[tokio::test]
async fn test_application_error_surfaces_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "Out of stock", "extensions": {"code": "OUT_OF_STOCK"}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    let err = h
        .pipeline
        .submit(Operation::mutation("addToCart").with_variable("productId", "p1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Failure::Application {
            code: "OUT_OF_STOCK".into(),
            message: "Out of stock".into(),
        }
    );
    assert_eq!(h.store.get().unwrap().unwrap().access_token, "at-1");
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(data(json!({"ok": true})).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let endpoint = format!("{}/graphql", server.uri());
    let h = harness_at(
        &endpoint,
        &server,
        signed_in(),
        Some(Duration::from_millis(200)),
    );
    let err = h.pipeline.submit(Operation::query("getCart")).await.unwrap_err();
    assert_eq!(err, Failure::Network(NetworkFailure::Timeout));
    assert_eq!(h.store.get().unwrap().unwrap().access_token, "at-1");
}

#[tokio::test]
async fn test_unreachable_backend_is_connectivity() {
    let server = MockServer::start().await;
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let endpoint = format!("http://127.0.0.1:{port}/graphql");
    let h = harness_at(&endpoint, &server, signed_in(), None);
    let err = h
        .pipeline
        .submit(Operation::query("getProvinces").public())
        .await
        .unwrap_err();
    assert!(
        matches!(err, Failure::Network(NetworkFailure::Connectivity(_))),
        "unexpected {err:?}"
    );
}

#[tokio::test]
async fn test_sign_out_keeps_reference_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"operationName": "getProvinces"})))
        .respond_with(data(json!({"provinces": [{"id": "01", "name": "Ha Noi"}]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"operationName": "getWishlist"})))
        .respond_with(data(json!({"wishlist": ["p1"]})))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, signed_in());
    h.pipeline.execute::<GetProvinces>(&()).await.unwrap();
    h.pipeline.submit(Operation::query("getWishlist")).await.unwrap();
    assert_eq!(h.pipeline.cache().len(), 2);

    h.pipeline.sign_out().unwrap();
    assert_eq!(h.pipeline.cache().len(), 1);

    // Served from cache; the mock would fail its expectation otherwise.
    let provinces = h.pipeline.execute::<GetProvinces>(&()).await.unwrap();
    assert_eq!(provinces[0].name, "Ha Noi");
}
