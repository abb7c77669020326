//! Local dynamic HTTP endpoint that records every request it receives, plus
//! a small blocking client that tags requests so they can be found again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Header carrying the id assigned by [`TrackingClient`].
pub const REQUEST_ID_HEADER: &str = "x-tsqa-request-id";

/// A request as seen by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    /// Path and query.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER)
    }
}

/// Builds the response for a recorded request.
pub type Handler = Arc<dyn Fn(&RecordedRequest) -> Response<Full<Bytes>> + Send + Sync>;

#[derive(Default)]
struct Shared {
    handlers: Mutex<HashMap<String, Handler>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

type ReadySignal = std::result::Result<SocketAddr, String>;

/// HTTP server on `127.0.0.1` running on its own thread.
pub struct DynamicHttpEndpoint {
    port: u16,
    shared: Arc<Shared>,
    ready_rx: Mutex<Option<mpsc::Receiver<ReadySignal>>>,
    address: OnceLock<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DynamicHttpEndpoint {
    /// Endpoint that will bind `port` (0 picks a free one).
    pub fn new(port: u16) -> Self {
        Self {
            port,
            shared: Arc::new(Shared::default()),
            ready_rx: Mutex::new(None),
            address: OnceLock::new(),
            shutdown_tx: None,
            thread: None,
        }
    }

    /// Spawn the server thread. Returns immediately; use
    /// [`DynamicHttpEndpoint::wait_ready`] to block until it is listening.
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::InvalidState("endpoint already started".into()));
        }
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = self.shared.clone();
        let port = self.port;
        let thread = std::thread::Builder::new()
            .name("tsqa-endpoint".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("runtime: {e}")));
                        return;
                    }
                };
                rt.block_on(serve(port, shared, ready_tx, shutdown_rx));
            })?;
        *lock(&self.ready_rx) = Some(ready_rx);
        self.shutdown_tx = Some(shutdown_tx);
        self.thread = Some(thread);
        Ok(())
    }

    /// Block until the server is listening. The readiness signal fires once;
    /// later calls return the cached address.
    pub fn wait_ready(&self, timeout: Duration) -> Result<SocketAddr> {
        if let Some(addr) = self.address.get() {
            return Ok(*addr);
        }
        let guard = lock(&self.ready_rx);
        let rx = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("endpoint not started".into()))?;
        match rx.recv_timeout(timeout) {
            Ok(Ok(addr)) => {
                let _ = self.address.set(addr);
                Ok(addr)
            }
            Ok(Err(e)) => Err(Error::Endpoint(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Endpoint(format!(
                "not ready after {timeout:?}"
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => self
                .address
                .get()
                .copied()
                .ok_or_else(|| Error::Endpoint("server thread exited".into())),
        }
    }

    /// Bound address, once ready.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address.get().copied()
    }

    /// URL for `path` on this endpoint. A leading `/` is added if missing.
    pub fn url(&self, path: &str) -> Result<String> {
        let addr = self
            .address()
            .ok_or_else(|| Error::InvalidState("endpoint not ready".into()))?;
        Ok(format!("http://127.0.0.1:{}{}", addr.port(), normalize_path(path)))
    }

    /// Serve `path` with `handler`. Unregistered paths answer 404.
    pub fn add_handler<F>(&self, path: &str, handler: F)
    where
        F: Fn(&RecordedRequest) -> Response<Full<Bytes>> + Send + Sync + 'static,
    {
        lock(&self.shared.handlers).insert(normalize_path(path), Arc::new(handler));
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared.requests).clone()
    }

    /// The request tagged with `id` by a [`TrackingClient`].
    pub fn request_by_id(&self, id: &str) -> Option<RecordedRequest> {
        lock(&self.shared.requests)
            .iter()
            .find(|r| r.request_id() == Some(id))
            .cloned()
    }

    /// Block until the server thread exits.
    pub fn join(mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }

    /// Stop the server and wait for its thread.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for DynamicHttpEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

async fn serve(
    port: u16,
    shared: Arc<Shared>,
    ready_tx: mpsc::SyncSender<ReadySignal>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await {
        Ok(l) => l,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("bind 127.0.0.1:{port}: {e}")));
            return;
        }
    };
    let addr = match listener.local_addr() {
        Ok(a) => a,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("local addr: {e}")));
            return;
        }
    };
    debug!(%addr, "endpoint listening");
    let _ = ready_tx.send(Ok(addr));

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("endpoint accept error: {e}");
                        continue;
                    }
                };
                let shared = shared.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let shared = shared.clone();
                        async move { handle(req, &shared).await }
                    });
                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%remote, "endpoint connection error: {e:#}");
                    }
                });
            }
        }
    }
    debug!(%addr, "endpoint stopped");
}

async fn handle(
    req: Request<Incoming>,
    shared: &Shared,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let recorded = RecordedRequest {
        method: parts.method.to_string(),
        path: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: parts
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect(),
        body: body.to_vec(),
    };

    let handler = lock(&shared.handlers).get(parts.uri.path()).cloned();
    let response = match handler {
        Some(h) => h(&recorded),
        None => {
            let mut r = Response::new(Full::from("no handler registered\n"));
            *r.status_mut() = StatusCode::NOT_FOUND;
            r
        }
    };
    debug!(
        method = %recorded.method,
        path = %recorded.path,
        status = response.status().as_u16(),
        "endpoint request"
    );
    lock(&shared.requests).push(recorded);
    Ok(response)
}

/// Response to a tracked request.
#[derive(Debug, Clone)]
pub struct TrackedResponse {
    pub request_id: String,
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl TrackedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Blocking HTTP/1.1 client that tags each request with a unique
/// [`REQUEST_ID_HEADER`].
pub struct TrackingClient {
    rt: tokio::runtime::Runtime,
    proxy: Option<SocketAddr>,
    id_prefix: String,
    counter: AtomicU64,
}

impl TrackingClient {
    pub fn new() -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let id_prefix = format!(
            "{:x}-{:x}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        );
        Ok(Self {
            rt,
            proxy: None,
            id_prefix,
            counter: AtomicU64::new(0),
        })
    }

    /// Send every request through the forward proxy at `addr`.
    pub fn via_proxy(mut self, addr: SocketAddr) -> Self {
        self.proxy = Some(addr);
        self
    }

    pub fn get(&self, url: &str) -> Result<TrackedResponse> {
        self.request(Method::GET, url, Bytes::new())
    }

    pub fn request(&self, method: Method, url: &str, body: Bytes) -> Result<TrackedResponse> {
        let id = format!(
            "{}-{}",
            self.id_prefix,
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        let uri: http::Uri = url
            .parse()
            .map_err(|e| Error::Endpoint(format!("bad url {url:?}: {e}")))?;
        let host = uri
            .host()
            .ok_or_else(|| Error::Endpoint(format!("url {url:?} has no host")))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);
        let authority = format!("{host}:{port}");

        // Proxies take absolute-form; origin servers take origin-form.
        let target = match self.proxy {
            Some(_) => uri.to_string(),
            None => uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        };
        let req = Request::builder()
            .method(method)
            .uri(target)
            .header(http::header::HOST, &authority)
            .header(REQUEST_ID_HEADER, &id)
            .body(Full::new(body))
            .map_err(|e| Error::Endpoint(format!("build request: {e}")))?;

        let connect_to = match self.proxy {
            Some(p) => p.to_string(),
            None => authority,
        };
        let (status, headers, body) = self.rt.block_on(send(connect_to, req))?;
        Ok(TrackedResponse {
            request_id: id,
            status,
            headers,
            body,
        })
    }
}

async fn send(
    connect_to: String,
    req: Request<Full<Bytes>>,
) -> Result<(StatusCode, http::HeaderMap, Bytes)> {
    let stream = TcpStream::connect(&connect_to).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::Endpoint(format!("handshake with {connect_to}: {e}")))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("client connection error: {e:#}");
        }
    });
    let response = sender
        .send_request(req)
        .await
        .map_err(|e| Error::Endpoint(format!("request to {connect_to}: {e}")))?;
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| Error::Endpoint(format!("read body: {e}")))?
        .to_bytes();
    Ok((parts.status, parts.headers, body))
}
