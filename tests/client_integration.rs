use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::any,
    Json, Router,
};
use jwt_http::{
    ApiRequest, ClientOptions, DefaultTokenStore, FileKeyValueStore, JwtHttpClient, JwtHttpError,
    MemoryCookieJar, RefreshMethod, RequestConfig, TokenStore,
};
use serde_json::{json, Value as JsonValue};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: JsonValue,
    headers: Vec<(&'static str, &'static str)>,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
            delay: Duration::from_millis(0),
        }
    }

    fn unauthorized() -> Self {
        Self::json(StatusCode::UNAUTHORIZED, json!({"message": "token expired"}))
    }

    fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct Recorded {
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    body: String,
}

#[derive(Clone)]
struct MockState {
    api: Arc<Mutex<VecDeque<MockResponse>>>,
    refresh: Arc<Mutex<VecDeque<MockResponse>>>,
    api_requests: Arc<Mutex<Vec<Recorded>>>,
    refresh_requests: Arc<Mutex<Vec<Recorded>>>,
    api_hits: Arc<AtomicUsize>,
    refresh_hits: Arc<AtomicUsize>,
}

fn record(method: Method, uri: &Uri, headers: HeaderMap, body: String) -> Recorded {
    Recorded {
        method,
        path_and_query: uri
            .path_and_query()
            .map(|value| value.as_str().to_owned())
            .unwrap_or_default(),
        headers,
        body,
    }
}

async fn respond(queue: &Mutex<VecDeque<MockResponse>>) -> impl IntoResponse {
    let response = {
        let mut queue = queue
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    (response.status, headers, Json(response.body))
}

async fn api_handler(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    state.api_hits.fetch_add(1, Ordering::SeqCst);
    state
        .api_requests
        .lock()
        .expect("request log mutex")
        .push(record(method, &uri, headers, body));
    respond(&state.api).await
}

async fn refresh_handler(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    state.refresh_hits.fetch_add(1, Ordering::SeqCst);
    state
        .refresh_requests
        .lock()
        .expect("request log mutex")
        .push(record(method, &uri, headers, body));
    respond(&state.refresh).await
}

struct TestServer {
    base_url: String,
    state: MockState,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn refresh_url(&self) -> String {
        format!("{}/auth/refresh", self.base_url)
    }

    fn api_hits(&self) -> usize {
        self.state.api_hits.load(Ordering::SeqCst)
    }

    fn refresh_hits(&self) -> usize {
        self.state.refresh_hits.load(Ordering::SeqCst)
    }

    fn api_requests(&self) -> Vec<Recorded> {
        self.state.api_requests.lock().expect("request log mutex").clone()
    }

    fn refresh_requests(&self) -> Vec<Recorded> {
        self.state
            .refresh_requests
            .lock()
            .expect("request log mutex")
            .clone()
    }
}

async fn spawn_server(api: Vec<MockResponse>, refresh: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        api: Arc::new(Mutex::new(api.into())),
        refresh: Arc::new(Mutex::new(refresh.into())),
        api_requests: Arc::default(),
        refresh_requests: Arc::default(),
        api_hits: Arc::new(AtomicUsize::new(0)),
        refresh_hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/auth/refresh", any(refresh_handler))
        .fallback(api_handler)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        state,
        task,
    }
}

fn options(server: &TestServer, max_refresh_attempts: usize) -> ClientOptions {
    ClientOptions {
        base_url: Some(server.base_url.clone()),
        max_refresh_attempts,
        ..ClientOptions::with_refresh_endpoint(server.refresh_url())
    }
}

async fn seeded_store() -> Arc<DefaultTokenStore> {
    let store = Arc::new(DefaultTokenStore::in_memory("BEARER", "REFRESH"));
    store.set_access_token("A1").await.expect("seed access token");
    store.set_refresh_token("R1").await.expect("seed refresh token");
    store
}

#[tokio::test]
async fn post_refreshes_on_401_and_replays() {
    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::json(StatusCode::OK, json!({"ok": true})),
        ],
        vec![MockResponse::json(
            StatusCode::OK,
            json!({"BEARER": "new", "REFRESH": "r2"}),
        )],
    )
    .await;
    let store = seeded_store().await;
    let before_calls = Arc::new(AtomicUsize::new(0));
    let after_payloads = Arc::new(Mutex::new(Vec::new()));

    let before = Arc::clone(&before_calls);
    let after = Arc::clone(&after_payloads);
    let client = JwtHttpClient::builder()
        .options(options(&server, 3))
        .token_store(Arc::clone(&store))
        .before(move || {
            before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .after(move |payload| {
            after.lock().expect("payload log").push(payload.clone());
            Ok(())
        })
        .build()
        .expect("client builds");

    let payload = client
        .post("/orders", json!({"id": 12}))
        .await
        .expect("call succeeds after refresh");

    assert_eq!(payload, json!({"ok": true}));
    assert_eq!(before_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *after_payloads.lock().expect("payload log"),
        vec![json!({"ok": true})]
    );
    assert_eq!(server.api_hits(), 2);
    assert_eq!(server.refresh_hits(), 1);

    assert_eq!(
        store.access_token().await.expect("read access"),
        Some("new".to_owned())
    );
    assert_eq!(
        store.refresh_token().await.expect("read refresh"),
        Some("r2".to_owned())
    );

    let refresh = &server.refresh_requests()[0];
    assert_eq!(refresh.method, Method::POST);
    let sent: JsonValue = serde_json::from_str(&refresh.body).expect("refresh body is json");
    assert_eq!(sent, json!({"REFRESH": "R1"}));
}

#[tokio::test]
async fn replay_repeats_original_request() {
    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::json(StatusCode::OK, json!({"saved": true})),
        ],
        vec![MockResponse::json(StatusCode::OK, json!({"BEARER": "A2"}))],
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let request = ApiRequest::put("/orders/7")
        .data(json!({"qty": 3}))
        .expect("data serializes")
        .header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("abc"),
        );
    client.execute(request).await.expect("call succeeds");

    let requests = server.api_requests();
    assert_eq!(requests.len(), 2);
    let (first, replay) = (&requests[0], &requests[1]);
    assert_eq!(first.method, replay.method);
    assert_eq!(first.path_and_query, "/orders/7");
    assert_eq!(first.path_and_query, replay.path_and_query);
    assert_eq!(first.body, replay.body);
    assert_eq!(replay.headers.get("x-request-id").expect("caller header"), "abc");
    assert_eq!(first.headers.get("authorization").expect("auth"), "Bearer A1");
    assert_eq!(replay.headers.get("authorization").expect("auth"), "Bearer A2");
}

#[tokio::test]
async fn always_unauthorized_fails_after_max_refresh_cycles() {
    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::unauthorized(),
            MockResponse::unauthorized(),
            MockResponse::unauthorized(),
        ],
        vec![
            MockResponse::json(StatusCode::OK, json!({"BEARER": "A2"})),
            MockResponse::json(StatusCode::OK, json!({"BEARER": "A3"})),
            MockResponse::json(StatusCode::OK, json!({"BEARER": "A4"})),
        ],
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 2))
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let err = client.get("/me", ()).await.expect_err("must give up");

    match err {
        JwtHttpError::MaxCallCountExceeded { attempts } => assert_eq!(attempts, 2),
        other => panic!("expected max call count error, got {other:?}"),
    }
    assert_eq!(server.refresh_hits(), 2);
    assert_eq!(server.api_hits(), 3);
}

#[tokio::test]
async fn success_never_refreshes() {
    let server = spawn_server(
        vec![MockResponse::json(StatusCode::OK, json!({"id": 1}))],
        Vec::new(),
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 3))
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let payload = client.get("/users/1", ()).await.expect("call succeeds");

    assert_eq!(payload, json!({"id": 1}));
    assert_eq!(server.refresh_hits(), 0);
}

#[tokio::test]
async fn server_error_propagates_without_refresh() {
    let server = spawn_server(
        vec![MockResponse::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"message": "database unavailable"}),
        )],
        Vec::new(),
    )
    .await;
    let after_calls = Arc::new(AtomicUsize::new(0));
    let after = Arc::clone(&after_calls);
    let client = JwtHttpClient::builder()
        .options(options(&server, 3))
        .token_store(seeded_store().await)
        .after(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .expect("client builds");

    let err = client.delete("/orders/1", ()).await.expect_err("500 fails");

    match err {
        JwtHttpError::Http { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "database unavailable");
        }
        other => panic!("expected http error, got {other:?}"),
    }
    assert_eq!(server.refresh_hits(), 0);
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refresh_without_new_refresh_token_keeps_stored_one() {
    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::json(StatusCode::OK, json!([])),
        ],
        vec![MockResponse::json(StatusCode::OK, json!({"BEARER": "A3"}))],
    )
    .await;
    let store = seeded_store().await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(Arc::clone(&store))
        .build()
        .expect("client builds");

    client.get("/items", ()).await.expect("call succeeds");

    assert_eq!(
        store.access_token().await.expect("read access"),
        Some("A3".to_owned())
    );
    assert_eq!(
        store.refresh_token().await.expect("read refresh"),
        Some("R1".to_owned())
    );
}

#[tokio::test]
async fn get_data_is_sent_as_query_parameters() {
    let server = spawn_server(
        vec![MockResponse::json(StatusCode::OK, json!({"results": []}))],
        Vec::new(),
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    client
        .get(&format!("{}/api", server.base_url), json!({"a": 1, "b": "x"}))
        .await
        .expect("call succeeds");

    let request = &server.api_requests()[0];
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.path_and_query, "/api?a=1&b=x");
    assert!(request.body.is_empty());
}

#[tokio::test]
async fn caller_headers_beat_common_headers() {
    let server = spawn_server(
        vec![MockResponse::json(StatusCode::OK, json!({}))],
        Vec::new(),
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let mut common = HeaderMap::new();
    common.insert("x-foo", HeaderValue::from_static("1"));
    common.insert("x-client", HeaderValue::from_static("jwt-http"));
    client.add_common_headers(common);

    let request = ApiRequest::get("/headers").header(
        HeaderName::from_static("x-foo"),
        HeaderValue::from_static("2"),
    );
    client.execute(request).await.expect("call succeeds");

    let seen = &server.api_requests()[0].headers;
    assert_eq!(seen.get("x-foo").expect("x-foo"), "2");
    assert_eq!(seen.get("x-client").expect("x-client"), "jwt-http");
    assert_eq!(seen.get("authorization").expect("auth"), "Bearer A1");
    assert_eq!(seen.get("content-type").expect("content type"), "application/json");
}

#[tokio::test]
async fn refresh_endpoint_404_surfaces_not_found() {
    let server = spawn_server(
        vec![MockResponse::unauthorized()],
        vec![MockResponse::json(StatusCode::NOT_FOUND, json!({}))],
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(ClientOptions {
            refresh_endpoint: "/auth/refresh".to_owned(),
            ..options(&server, 3)
        })
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let err = client.get("/me", ()).await.expect_err("refresh endpoint missing");

    assert_eq!(err.kind(), "Error404");
    match err {
        JwtHttpError::NotFound { url } => assert_eq!(url, server.refresh_url()),
        other => panic!("expected not found error, got {other:?}"),
    }
    assert_eq!(server.api_hits(), 1);
}

#[tokio::test]
async fn failing_before_handler_stops_call_before_dispatch() {
    let server = spawn_server(
        vec![MockResponse::json(StatusCode::OK, json!({"ok": true}))],
        Vec::new(),
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(seeded_store().await)
        .before(|| Err("session locked".into()))
        .build()
        .expect("client builds");

    let err = client
        .post("/orders", json!({"id": 12}))
        .await
        .expect_err("before handler fails the call");

    assert_eq!(err.kind(), "HandlerError");
    assert!(err.to_string().contains("session locked"));
    assert_eq!(server.api_hits(), 0);
    assert_eq!(server.refresh_hits(), 0);
}

#[tokio::test]
async fn failing_after_handler_fails_successful_call() {
    let server = spawn_server(
        vec![MockResponse::json(StatusCode::OK, json!({"ok": true}))],
        Vec::new(),
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(seeded_store().await)
        .after(|payload| {
            assert_eq!(payload, &json!({"ok": true}));
            Err("audit log unavailable".into())
        })
        .build()
        .expect("client builds");

    let err = client
        .post("/orders", json!({"id": 12}))
        .await
        .expect_err("after handler fails the call");

    assert!(matches!(err, JwtHttpError::Hook(_)), "got {err:?}");
    assert_eq!(server.api_hits(), 1);
}

#[tokio::test]
async fn concurrent_unauthorized_calls_share_one_refresh() {
    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::unauthorized(),
            MockResponse::json(StatusCode::OK, json!({"ok": 1})),
            MockResponse::json(StatusCode::OK, json!({"ok": 2})),
        ],
        vec![
            MockResponse::json(StatusCode::OK, json!({"BEARER": "A2", "REFRESH": "R2"}))
                .with_delay(Duration::from_millis(150)),
        ],
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(ClientOptions {
            coalesce_refresh: true,
            ..options(&server, 1)
        })
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let (first, second) = tokio::join!(client.get("/a", ()), client.get("/b", ()));

    first.expect("first call succeeds");
    second.expect("second call succeeds");
    assert_eq!(server.refresh_hits(), 1);
    assert_eq!(server.api_hits(), 4);

    let requests = server.api_requests();
    for replay in &requests[2..] {
        assert_eq!(replay.headers.get("authorization").expect("auth"), "Bearer A2");
    }
}

#[tokio::test]
async fn access_token_can_come_from_response_header() {
    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::json(StatusCode::OK, json!({"ok": true})),
        ],
        vec![MockResponse::json(StatusCode::OK, json!({"REFRESH": "r9"}))
            .with_header("bearer", "Bearer from-header")],
    )
    .await;
    let store = seeded_store().await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(Arc::clone(&store))
        .build()
        .expect("client builds");
    client.set_check_bearer_in_header_flag(true);

    client.get("/me", ()).await.expect("call succeeds");

    assert_eq!(
        store.access_token().await.expect("read access"),
        Some("from-header".to_owned())
    );
    assert_eq!(
        store.refresh_token().await.expect("read refresh"),
        Some("r9".to_owned())
    );
    assert_eq!(
        server.api_requests()[1]
            .headers
            .get("authorization")
            .expect("auth"),
        "Bearer from-header"
    );
}

#[tokio::test]
async fn refresh_by_get_sends_tokens_in_query() {
    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::json(StatusCode::OK, json!({"ok": true})),
        ],
        vec![MockResponse::json(StatusCode::OK, json!({"BEARER": "A2"}))],
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(ClientOptions {
            refresh_method: RefreshMethod::Get,
            send_access_token_on_refresh: true,
            ..options(&server, 1)
        })
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    client.get("/me", ()).await.expect("call succeeds");

    let refresh = &server.refresh_requests()[0];
    assert_eq!(refresh.method, Method::GET);
    assert_eq!(refresh.path_and_query, "/auth/refresh?REFRESH=R1&BEARER=A1");
    assert!(refresh.body.is_empty());
}

#[tokio::test]
async fn refresh_token_persists_in_file_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("tokens.json");

    let server = spawn_server(
        vec![
            MockResponse::unauthorized(),
            MockResponse::json(StatusCode::OK, json!({"ok": true})),
        ],
        vec![MockResponse::json(
            StatusCode::OK,
            json!({"BEARER": "A2", "REFRESH": "R2"}),
        )],
    )
    .await;
    let store = Arc::new(DefaultTokenStore::new(
        MemoryCookieJar::new(),
        FileKeyValueStore::new(&path),
        "BEARER",
        "REFRESH",
    ));
    store.set_access_token("A1").await.expect("seed access");
    store.set_refresh_token("R1").await.expect("seed refresh");

    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(Arc::clone(&store))
        .build()
        .expect("client builds");
    client.get("/me", ()).await.expect("call succeeds");

    let persisted: JsonValue =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("store file exists"))
            .expect("store file is json");
    assert_eq!(persisted, json!({"REFRESH": "R2"}));
}

#[tokio::test]
async fn request_timeout_surfaces_transport_error() {
    let server = spawn_server(
        vec![MockResponse::json(StatusCode::OK, json!({})).with_delay(Duration::from_millis(150))],
        Vec::new(),
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(ClientOptions {
            request: RequestConfig::standard().with_timeout(Duration::from_millis(20)),
            ..options(&server, 1)
        })
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let err = client.get("/slow", ()).await.expect_err("request must time out");

    match err {
        JwtHttpError::Transport(inner) => assert!(inner.is_timeout()),
        other => panic!("expected transport timeout error, got {other:?}"),
    }
}

#[derive(Debug, serde::Deserialize, PartialEq)]
struct Order {
    id: u64,
    status: String,
}

#[tokio::test]
async fn execute_json_deserializes_payload() {
    let server = spawn_server(
        vec![MockResponse::json(
            StatusCode::OK,
            json!({"id": 12, "status": "open"}),
        )],
        Vec::new(),
    )
    .await;
    let client = JwtHttpClient::builder()
        .options(options(&server, 1))
        .token_store(seeded_store().await)
        .build()
        .expect("client builds");

    let order: Order = client
        .execute_json(ApiRequest::get("/orders/12"))
        .await
        .expect("call succeeds");

    assert_eq!(
        order,
        Order {
            id: 12,
            status: "open".to_owned()
        }
    );
}
