//! Integration tests for proxy forwarding behind the gatekeeper

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use gatekeeper::blocklist::Blocklist;
use gatekeeper::config::RoutesConfig;
use gatekeeper::downstream::Firewall;
use gatekeeper::gatekeeper::Gatekeeper;
use gatekeeper::proxy::{ProxyClient, ProxyConfig};
use gatekeeper::recorder::ViolationRecorder;
use gatekeeper::server::Server;

/// Backend echoing the forwarding headers it received.
async fn run_backend_server(hits: Arc<AtomicUsize>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };

            let io = TokioIo::new(stream);
            let hits = hits.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<Incoming>| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let header = |name: &str| {
                            req.headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("missing")
                                .to_string()
                        };
                        let body = format!(
                            "{} {}\nX-Forwarded-For: {}\nX-Real-IP: {}",
                            req.method(),
                            req.uri(),
                            header("x-forwarded-for"),
                            header("x-real-ip")
                        );

                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("X-Backend", "test-backend")
                                .body(Full::new(Bytes::from(body)))
                                .unwrap(),
                        )
                    }
                });

                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    (addr, handle)
}

async fn run_gatekeeper(upstream_url: String) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let blocklist = Arc::new(Blocklist::default());
    let (recorder, _worker) = ViolationRecorder::spawn(blocklist.clone(), 64);
    let proxy_client = ProxyClient::new(ProxyConfig::new(upstream_url)).unwrap();

    let gatekeeper = Gatekeeper::new(
        &RoutesConfig::default(),
        blocklist,
        recorder,
        Arc::new(Firewall::new(proxy_client)),
    );

    let server = Server::bind(SocketAddr::from(([127, 0, 0, 1], 0)), Arc::new(gatekeeper))
        .await
        .unwrap();
    let addr = server.addr();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, handle)
}

fn client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(hyper_util::rt::TokioExecutor::new()).build_http()
}

#[tokio::test]
async fn test_proxy_forwards_to_backend() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (backend_addr, backend_handle) = run_backend_server(hits.clone()).await;
    let (gatekeeper_addr, server_handle) = run_gatekeeper(format!("http://{}", backend_addr)).await;

    let response = client()
        .get(format!("http://{}/api/users?page=2", gatekeeper_addr).parse().unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-Backend").unwrap(), "test-backend");

    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body_str = String::from_utf8(body_bytes.to_vec()).unwrap();
    assert!(body_str.starts_with("GET /api/users?page=2"), "{body_str}");
    assert!(body_str.contains("X-Forwarded-For: 127.0.0.1"));
    assert!(body_str.contains("X-Real-IP: 127.0.0.1"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    server_handle.abort();
    backend_handle.abort();
}

#[tokio::test]
async fn test_denied_requests_never_reach_backend() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (backend_addr, backend_handle) = run_backend_server(hits.clone()).await;
    let (gatekeeper_addr, server_handle) = run_gatekeeper(format!("http://{}", backend_addr)).await;

    let client = client();
    for (path, status) in [
        ("/wp-admin", StatusCode::NOT_FOUND),
        ("/api/shell.php", StatusCode::BAD_REQUEST),
        ("/api/a;b", StatusCode::BAD_REQUEST),
        ("/api//users", StatusCode::BAD_REQUEST),
    ] {
        let response = client
            .get(format!("http://{}{}", gatekeeper_addr, path).parse().unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), status, "{path}");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 0);

    server_handle.abort();
    backend_handle.abort();
}

#[tokio::test]
async fn test_backend_down_hides_details() {
    // Reserve a port, then free it so nothing listens there.
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    let (gatekeeper_addr, server_handle) = run_gatekeeper(format!("http://{}", dead_addr)).await;

    let request = hyper::Request::builder()
        .uri(format!("http://{}/api/users", gatekeeper_addr))
        .header("accept", "application/json")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = client().request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body_str = String::from_utf8(body_bytes.to_vec()).unwrap();
    assert!(body_str.contains("Internal Server Error"), "{body_str}");
    assert!(!body_str.to_lowercase().contains("refused"));
    assert!(!body_str.contains(&dead_addr.port().to_string()));

    server_handle.abort();
}
