use std::io::Read;
use std::net::SocketAddr;

use bitroute::{Control, Json, Router, Server};
use flate2::read::GzDecoder;
use hyper::{Body, Client, Method, Request, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), bitroute::Error>>,
}

async fn start(router: Router, max_body_size: usize) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, stopped) = oneshot::channel::<()>();
    let server = Server::from_listener(listener)
        .max_workers(4)
        .max_body_size(max_body_size);
    let handle = tokio::spawn(server.serve_with_shutdown(router, async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        shutdown,
        handle,
    }
}

fn router() -> Router {
    let mut router = Router::new();
    router.get("/hello/:name", |c: &mut Control| {
        let greeting = format!("Hello {}", c.query(":name"));
        c.write(greeting);
    });
    router.put("/hello/:name", |c: &mut Control| c.code(204));
    router.post("/echo", |c: &mut Control| {
        let value: serde_json::Value = c.request().body().json().unwrap_or_default();
        c.code(201);
        c.write(Json(value));
    });
    router.get("/panic", |_: &mut Control| panic!("handler failure"));
    router
}

async fn text(response: hyper::Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Tests a named route over a real connection.
#[tokio::test]
async fn test_serve_hello() {
    let server = start(router(), 1024).await;
    let client = Client::new();

    let uri = format!("http://{}/hello/Jane", server.addr).parse().unwrap();
    let response = client.get(uri).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(text(response).await, "Hello Jane");

    server.shutdown.send(()).unwrap();
    assert!(server.handle.await.unwrap().is_ok());
}

/// Tests the default 404 and 405 responses.
#[tokio::test]
async fn test_serve_not_found_and_not_allowed() {
    let server = start(router(), 1024).await;
    let client = Client::new();

    let uri = format!("http://{}/missing", server.addr).parse().unwrap();
    let response = client.get(uri).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(text(response).await, "404 page not found\n");

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("http://{}/hello/Jane", server.addr))
        .body(Body::empty())
        .unwrap();
    let response = client.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"], "GET, PUT");
}

/// Tests a JSON body in both directions with gzip negotiation.
#[tokio::test]
async fn test_serve_json_gzip() {
    let server = start(router(), 1024).await;
    let client = Client::new();

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/echo", server.addr))
        .header("accept-encoding", "gzip")
        .body(Body::from(r#"{"name":"Tom"}"#))
        .unwrap();
    let response = client.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["content-encoding"], "gzip");
    assert_eq!(response.headers()["content-type"], "application/json");

    let compressed = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let mut decoded = String::new();
    GzDecoder::new(&compressed[..])
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, r#"{"name":"Tom"}"#);
}

/// Tests that oversized bodies are refused with 413.
#[tokio::test]
async fn test_serve_payload_too_large() {
    let server = start(router(), 8).await;
    let client = Client::new();

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/echo", server.addr))
        .body(Body::from(vec![b'x'; 64]))
        .unwrap();
    let response = client.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

/// Tests that a panic without a recovery handler drops the connection and
/// leaves the server running.
#[tokio::test]
async fn test_serve_panic_drops_connection() {
    let server = start(router(), 1024).await;
    let client = Client::new();

    let uri = format!("http://{}/panic", server.addr).parse().unwrap();
    assert!(client.get(uri).await.is_err());

    let uri = format!("http://{}/hello/Joe", server.addr).parse().unwrap();
    let response = client.get(uri).await.unwrap();
    assert_eq!(text(response).await, "Hello Joe");
}
