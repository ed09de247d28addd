//! Local axum app the unit tests send real requests to.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::routing::get;

pub struct TestApp {
    pub addr: SocketAddr,
    pub reference_hits: Arc<AtomicUsize>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn reference_hits(&self) -> usize {
        self.reference_hits.load(Ordering::SeqCst)
    }
}

/// Starts the app on an ephemeral port.
pub async fn spawn() -> TestApp {
    let reference_hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route("/hello", get(|| async { "hello" }))
        .route("/okay", get(|| async { "okay!" }))
        .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route("/json", get(json))
        .route("/redirect", get(redirect))
        .route("/unavailable", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route("/echo", any(echo))
        .route("/request-id/{id}", get(request_id))
        .route("/reference", get(reference))
        .with_state(reference_hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        addr,
        reference_hits,
    }
}

async fn json() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"id":1,"name":"blackbox"}"#,
    )
}

async fn redirect() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/hello")], "moved")
}

/// Answers with one line per interesting request property.
async fn echo(method: Method, headers: HeaderMap, body: String) -> String {
    let header = |name: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",")
    };

    format!(
        "method={method}\ncontent-type={}\nauthorization={}\nx-custom={}\nbody={body}",
        header("content-type"),
        header("authorization"),
        header("x-custom"),
    )
}

async fn request_id(axum::extract::Path(id): axum::extract::Path<String>) -> impl IntoResponse {
    ([("x-request-id", id)], "tagged")
}

async fn reference(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::ACCEPTED,
        [("x-request-id", "ref-1")],
        "reference body",
    )
}
