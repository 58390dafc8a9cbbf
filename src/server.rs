use std::future::{self, Future};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::StatusCode;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{Error, ServeError};
use crate::executor::WorkerPool;
use crate::http::{Body, Request, Response};

/// hyper refuses smaller HTTP/1 read buffers.
const MIN_BUF_SIZE: usize = 8192;

/// Handles requests on the worker pool.
///
/// Implemented for [`Router`](crate::Router) and for plain closures:
///
/// ```no_run
/// use bitroute::{ConnectionInfo, Request, Response, Server};
///
/// # async fn run() -> Result<(), bitroute::Error> {
/// Server::bind("127.0.0.1:3000")
///     .serve(|_req: Request, _info: ConnectionInfo| Response::new(bitroute::hyper::Body::from("Hello World!")))
///     .await
/// # }
/// ```
pub trait Service: Send + Sync + 'static {
    fn call(&self, request: Request, info: ConnectionInfo) -> Response;
}

impl<F> Service for F
where
    F: Fn(Request, ConnectionInfo) -> Response + Send + Sync + 'static,
{
    fn call(&self, request: Request, info: ConnectionInfo) -> Response {
        self(request, info)
    }
}

/// Information about the connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    peer_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// The remote address of the client, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

enum Listen {
    Addr(String),
    Listener(TcpListener),
}

/// An HTTP server: accepts connections on the tokio runtime and runs the
/// service for every request on a [`WorkerPool`].
pub struct Server {
    listen: Listen,
    config: ServerConfig,
}

impl Server {
    /// Creates a server that will bind `addr` when served.
    pub fn bind(addr: &str) -> Self {
        Self {
            listen: Listen::Addr(addr.to_owned()),
            config: ServerConfig::default(),
        }
    }

    /// Creates a server from a full configuration, binding `host:port`.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            listen: Listen::Addr(config.addr()),
            config,
        }
    }

    /// Creates a server on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listen: Listen::Listener(listener),
            config: ServerConfig::default(),
        }
    }

    /// Replaces the configuration, keeping the bind target.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the maximum number of worker threads.
    pub fn max_workers(mut self, val: usize) -> Self {
        self.config.max_workers = val;
        self
    }

    /// Sets how long idle workers are kept.
    pub fn worker_keep_alive(mut self, val: Duration) -> Self {
        self.config.worker_keep_alive_secs = val.as_secs();
        self
    }

    /// Sets the largest accepted request body in bytes.
    pub fn max_body_size(mut self, val: usize) -> Self {
        self.config.max_body_size = val;
        self
    }

    /// Enables or disables HTTP/1 keep-alive.
    pub fn http1_keep_alive(mut self, val: bool) -> Self {
        self.config.http1_keep_alive = val;
        self
    }

    /// Sets whether HTTP/1 connections support half-closures.
    pub fn http1_half_close(mut self, val: bool) -> Self {
        self.config.http1_half_close = val;
        self
    }

    /// Only accept HTTP/1 connections.
    pub fn http1_only(mut self, val: bool) -> Self {
        self.config.http1_only = val;
        self
    }

    /// Only accept HTTP/2 connections.
    #[cfg(feature = "http2")]
    pub fn http2_only(mut self, val: bool) -> Self {
        self.config.http2_only = val;
        self
    }

    /// Serves `service` until the process stops.
    ///
    /// # Errors
    /// Fails when the address cannot be bound.
    pub async fn serve<S: Service>(self, service: S) -> Result<(), Error> {
        self.serve_with_shutdown(service, future::pending()).await
    }

    /// Serves `service` until `signal` resolves, then stops accepting new
    /// connections. Connections already accepted keep running on the
    /// runtime until they finish.
    ///
    /// # Errors
    /// Fails when the address cannot be bound.
    pub async fn serve_with_shutdown<S, F>(self, service: S, signal: F) -> Result<(), Error>
    where
        S: Service,
        F: Future<Output = ()>,
    {
        let http = Arc::new(self.http());
        let listener = match self.listen {
            Listen::Addr(addr) => match TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(source) => return Err(Error::Bind { addr, source }),
            },
            Listen::Listener(listener) => listener,
        };
        log::info!("Listening on {}", listener.local_addr()?);

        let shared = Arc::new(Shared {
            service,
            pool: WorkerPool::new(self.config.max_workers, self.config.worker_keep_alive()),
            max_body_size: self.config.max_body_size,
        });

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    log::info!("Stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            log::warn!("Failed to accept connection: {}", err);
                            continue;
                        }
                    };

                    let http = http.clone();
                    let shared = shared.clone();
                    let info = ConnectionInfo { peer_addr: Some(peer) };
                    tokio::spawn(async move {
                        let service = service_fn(move |request| shared.clone().handle(request, info));
                        if let Err(err) = http.serve_connection(stream, service).await {
                            log::debug!("Connection from {} closed: {}", peer, err);
                        }
                    });
                }
            }
        }
    }

    fn http(&self) -> Http {
        let config = &self.config;
        let mut http = Http::new();
        http.http1_keep_alive(config.http1_keep_alive)
            .http1_half_close(config.http1_half_close)
            .max_buf_size(config.http1_max_buf_size.max(MIN_BUF_SIZE))
            .pipeline_flush(config.http1_pipeline_flush)
            .http1_writev(config.http1_writev)
            .http1_title_case_headers(config.http1_title_case_headers)
            .http1_preserve_header_case(config.http1_preserve_header_case);
        if config.http1_only {
            http.http1_only(true);
        }

        #[cfg(feature = "http2")]
        {
            if config.http2_only {
                http.http2_only(true);
            }
            http.http2_initial_stream_window_size(config.http2_initial_stream_window_size)
                .http2_initial_connection_window_size(config.http2_initial_connection_window_size)
                .http2_adaptive_window(config.http2_adaptive_window)
                .http2_max_frame_size(config.http2_max_frame_size)
                .http2_max_concurrent_streams(config.http2_max_concurrent_streams)
                .http2_max_send_buf_size(config.http2_max_send_buf_size);
        }

        http
    }
}

/// State shared by every connection of one server.
struct Shared<S> {
    service: S,
    pool: WorkerPool,
    max_body_size: usize,
}

impl<S: Service> Shared<S> {
    /// Buffers the body, then runs the service on the pool and waits for
    /// its response.
    async fn handle(
        self: Arc<Self>,
        request: hyper::Request<hyper::Body>,
        info: ConnectionInfo,
    ) -> Result<Response, ServeError> {
        let (parts, body) = request.into_parts();
        let body = match Body::collect(body, self.max_body_size).await {
            Ok(body) => body,
            Err(ServeError::PayloadTooLarge { limit }) => {
                log::debug!("Rejected {} {}: body over {} bytes", parts.method, parts.uri.path(), limit);
                return Ok(payload_too_large());
            }
            Err(err) => return Err(err),
        };
        let request = Request::from_parts(parts, body);

        let (tx, rx) = oneshot::channel();
        let shared = self.clone();
        self.pool.execute(move || {
            let response = shared.service.call(request, info);
            // the receiver is gone when the client hung up
            let _ = tx.send(response);
        })?;

        rx.await.map_err(|_| ServeError::Aborted)
    }
}

fn payload_too_large() -> Response {
    let status = StatusCode::PAYLOAD_TOO_LARGE;
    let mut response = Response::new(hyper::Body::from(format!(
        "{}\n",
        status.canonical_reason().unwrap_or("Payload Too Large")
    )));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared<S: Service>(service: S, max_body_size: usize) -> Arc<Shared<S>> {
        Arc::new(Shared {
            service,
            pool: WorkerPool::new(2, Duration::from_secs(1)),
            max_body_size,
        })
    }

    fn echo(request: Request, _: ConnectionInfo) -> Response {
        Response::new(hyper::Body::from(request.into_body().into_bytes()))
    }

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            peer_addr: Some(([127, 0, 0, 1], 4000).into()),
        }
    }

    /// Tests that closures are services and see the connection info.
    #[test]
    fn test_closure_service() {
        let service = |_: Request, info: ConnectionInfo| {
            Response::new(hyper::Body::from(info.peer_addr().map(|a| a.to_string()).unwrap_or_default()))
        };
        let response = Service::call(&service, Request::new(Body::empty()), info());
        let body = futures::executor::block_on(hyper::body::to_bytes(response.into_body())).unwrap();
        assert_eq!(body, "127.0.0.1:4000");
    }

    /// Tests that the body is buffered and handed to the service.
    #[tokio::test]
    async fn test_handle_buffers_body() {
        let request = hyper::Request::new(hyper::Body::from("payload"));
        let response = shared(echo, 64).handle(request, info()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, "payload");
    }

    /// Tests that oversized bodies are answered with 413 without running the
    /// service.
    #[tokio::test]
    async fn test_handle_payload_too_large() {
        let service = |_: Request, _: ConnectionInfo| -> Response { panic!("must not run") };
        let request = hyper::Request::new(hyper::Body::from("0123456789"));
        let response = shared(service, 4).handle(request, info()).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, "Payload Too Large\n");
    }

    /// Tests that a panicking service aborts the request.
    #[tokio::test]
    async fn test_handle_panic_aborts() {
        let service = |_: Request, _: ConnectionInfo| -> Response { panic!("handler failure") };
        let request = hyper::Request::new(hyper::Body::empty());
        let err = shared(service, 64).handle(request, info()).await.unwrap_err();

        assert!(matches!(err, ServeError::Aborted));
    }

    /// Tests that builder knobs land in the configuration.
    #[test]
    fn test_builder() {
        let server = Server::bind("127.0.0.1:0")
            .max_workers(3)
            .worker_keep_alive(Duration::from_secs(2))
            .max_body_size(10)
            .http1_keep_alive(false)
            .http1_half_close(true)
            .http1_only(true);

        assert_eq!(server.config.max_workers, 3);
        assert_eq!(server.config.worker_keep_alive_secs, 2);
        assert_eq!(server.config.max_body_size, 10);
        assert!(!server.config.http1_keep_alive);
        assert!(server.config.http1_half_close);
        assert!(server.config.http1_only);
        assert!(matches!(server.listen, Listen::Addr(ref addr) if addr == "127.0.0.1:0"));
    }

    /// Tests that a second bind on a used port reports the address.
    #[tokio::test]
    async fn test_bind_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let err = Server::bind(&addr).serve(echo).await.unwrap_err();
        assert!(matches!(err, Error::Bind { addr: ref a, .. } if *a == addr));
    }
}
