//! The kernel owns the listener loop and drives each request through the
//! pipeline: parse, middleware run phase, route dispatch, deferred
//! middleware, middleware terminate phase, then a single socket flush.
//!
//! # Examples
//!
//! ```no_run
//! use trellis::Kernel;
//! use trellis::http::{Request, Response};
//! use trellis::handler::HandlerFuture;
//!
//! fn hello<'a>(_req: &'a mut Request, _res: &'a mut Response) -> HandlerFuture<'a> {
//!     Box::pin(async { Ok(Some("hello".to_string())) })
//! }
//!
//! let mut kernel = Kernel::new();
//! kernel.get("/", hello);
//! kernel.listen("127.0.0.1:3000").unwrap();
//! ```

use crate::error::{ServerError, ServerResult};
use crate::events::{Emitter, Event};
use crate::extensions::Extensions;
use crate::handler::Handler;
use crate::http::{Body, Method, Request, Response};
use crate::middleware::{Middleware, MiddlewareHandler};
use crate::router::{Route, Router};
use futures::FutureExt;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

type ErrorHook = Arc<dyn Fn(&ServerError) -> Response + Send + Sync>;

/// TLS configuration for HTTPS support.
pub struct TlsConfig {
    cert_file: PathBuf,
    key_file: PathBuf,
}

impl TlsConfig {
    pub fn new<P: AsRef<Path>>(cert_file: P, key_file: P) -> Self {
        Self {
            cert_file: cert_file.as_ref().to_path_buf(),
            key_file: key_file.as_ref().to_path_buf(),
        }
    }

    fn load_certs(&self) -> Result<Vec<CertificateDer<'static>>, Box<dyn std::error::Error>> {
        let cert_file = File::open(&self.cert_file)?;
        let mut reader = StdBufReader::new(cert_file);
        let certs = rustls_pemfile::certs(&mut reader)
            .filter_map(|result| result.ok())
            .collect();
        Ok(certs)
    }

    fn load_key(&self) -> Result<PrivateKeyDer<'static>, Box<dyn std::error::Error>> {
        let key_file = File::open(&self.key_file)?;
        let mut reader = StdBufReader::new(key_file);
        let key = rustls_pemfile::private_key(&mut reader)?
            .ok_or("no private key found")?;
        Ok(key)
    }
}

/// The server core. Routes, middleware prototypes and shared state are
/// registered up front; [`Kernel::listen`] then seals the configuration and
/// starts accepting connections.
pub struct Kernel {
    max_connections: usize,
    max_body_size: usize,
    request_deadline: Duration,
    router: Router,
    middleware: Vec<Box<dyn Middleware>>,
    static_dir: Option<PathBuf>,
    extensions: Extensions,
    emitter: Emitter,
    on_error: Option<ErrorHook>,
    tls: Option<Arc<TlsConfig>>,
}

impl Kernel {
    pub fn new() -> Self {
        let emitter = Emitter::new();
        Self {
            max_connections: 256,
            max_body_size: 10 * 1024 * 1024,
            request_deadline: Duration::from_secs(30),
            router: Router::with_emitter(emitter.clone()),
            middleware: Vec::new(),
            static_dir: None,
            extensions: Extensions::new(),
            emitter,
            on_error: None,
            tls: None,
        }
    }

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.max_connections = max_connections;
        self
    }

    /// Caps the request body. A Content-Length over the cap is rejected
    /// with 413 before a single body byte is read or allocated.
    pub fn max_body_size(&mut self, bytes: usize) -> &mut Self {
        self.max_body_size = bytes;
        self
    }

    /// Hard per-request budget covering middleware, handler and terminators
    /// together. A request past the deadline gets a 503.
    pub fn request_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.request_deadline = deadline;
        self
    }

    /// Registers shared state reachable from every request via
    /// `req.extensions.get::<T>()`.
    pub fn provide<T>(&mut self, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.extensions.provide(value);
        self
    }

    /// Appends a middleware prototype. Every request gets a fresh clone, in
    /// registration order.
    pub fn middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    pub fn on_error<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&ServerError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Serves files under `dir` for GET requests that match no route.
    pub fn static_dir(&mut self, dir: &str) -> &mut Self {
        self.static_dir = Some(PathBuf::from(dir));
        self
    }

    pub fn with_tls<P: AsRef<Path>>(&mut self, cert_file: P, key_file: P) -> &mut Self {
        self.tls = Some(Arc::new(TlsConfig::new(cert_file, key_file)));
        self
    }

    /// Event feed for route registrations, inbound connections and handler
    /// failures.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.emitter.subscribe()
    }

    pub fn router(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn match_<H: Handler>(&mut self, methods: &[Method], uri: &str, handler: H) -> Arc<Route> {
        self.router.match_(methods, uri, handler)
    }

    pub fn get<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.router.get(uri, handler)
    }

    pub fn post<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.router.post(uri, handler)
    }

    pub fn put<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.router.put(uri, handler)
    }

    pub fn patch<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.router.patch(uri, handler)
    }

    pub fn delete<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.router.delete(uri, handler)
    }

    pub fn options<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.router.options(uri, handler)
    }

    pub fn any<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.router.any(uri, handler)
    }

    /// Binds `addr` and serves until the process exits.
    pub fn listen(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let runtime = Runtime::new()?;
        runtime.block_on(async {
            let listener = TcpListener::bind(addr).await?;
            let connection_counter = Arc::new(AtomicUsize::new(0));

            let tls_acceptor = if let Some(tls) = &self.tls {
                let certs = tls.load_certs()?;
                let key = tls.load_key()?;
                let config = ServerConfig::builder()
                    .with_no_client_auth()
                    .with_single_cert(certs, key)?;
                Some(TlsAcceptor::from(Arc::new(config)))
            } else {
                None
            };

            log::info!(
                "listening on {}://{}",
                if tls_acceptor.is_some() { "https" } else { "http" },
                addr
            );

            let kernel = Arc::new(self);
            loop {
                if connection_counter.load(Ordering::Relaxed) >= kernel.max_connections {
                    log::warn!("connection limit reached, pausing accepts");
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    continue;
                }

                match listener.accept().await {
                    Ok((stream, _)) => {
                        connection_counter.fetch_add(1, Ordering::Relaxed);
                        let kernel = Arc::clone(&kernel);
                        let counter = Arc::clone(&connection_counter);
                        let acceptor = tls_acceptor.clone();

                        tokio::spawn(async move {
                            let result = if let Some(acceptor) = acceptor {
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => kernel.handle_connection(tls_stream).await,
                                    Err(err) => {
                                        log::warn!("TLS handshake failed: {}", err);
                                        Ok(())
                                    }
                                }
                            } else {
                                kernel.handle_connection(stream).await
                            };

                            if let Err(err) = result {
                                log::warn!("connection error: {}", err);
                            }
                            counter.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(err) => log::warn!("accept failed: {}", err),
                }
            }
        })
    }

    async fn handle_connection<S>(&self, mut stream: S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let parsed = {
            let mut reader = BufReader::new(&mut stream);
            Self::read_request(&mut reader, self.max_body_size).await
        };

        let res = match parsed {
            Ok(Some(mut req)) => {
                req.extensions = self.extensions.clone();
                self.process(&mut req).await
            }
            Ok(None) => return Ok(()),
            Err(ServerError::IoError(err)) => return Err(err),
            Err(err) => {
                log::debug!("rejected request: {}", err);
                let mut res = Response::new(err.status_code());
                res.render_error(&err);
                res.send(None);
                res
            }
        };

        Self::write_response(&mut stream, &res).await
    }

    /// Reads one HTTP/1.1 request off the wire. `Ok(None)` means the peer
    /// closed before sending anything.
    async fn read_request<R>(reader: &mut R, max_body: usize) -> ServerResult<Option<Request>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        if request_line.trim().is_empty() {
            return Ok(None);
        }

        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| ServerError::BadRequest("malformed request line".to_string()))?;
        let method = Method::parse(method)?;
        let target = parts
            .next()
            .ok_or_else(|| ServerError::BadRequest("missing request target".to_string()))?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line.trim().is_empty() {
                break;
            }
            if let Some((name, value)) = line.trim().split_once(':') {
                headers.insert(name.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let body = match headers.get("content-length") {
            Some(raw) => {
                let length: usize = raw
                    .parse()
                    .map_err(|_| ServerError::BadRequest("invalid content-length".to_string()))?;
                if length > max_body {
                    return Err(ServerError::PayloadTooLarge);
                }
                let mut data = Vec::with_capacity(length);
                (&mut *reader).take(length as u64).read_to_end(&mut data).await?;
                let content_type = headers
                    .get("content-type")
                    .cloned()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Body::new(content_type, data)
            }
            None => Body::empty(),
        };

        let mut req = Request::new(method, path);
        req.query = query;
        if let Some(raw) = headers.get("cookie") {
            req.cookies = Request::parse_cookies(raw);
        }
        req.headers = headers;
        req.body = body;
        Ok(Some(req))
    }

    /// Drives a parsed request to a finished response, converting timeouts
    /// and panics into error responses instead of dropped connections.
    async fn process(&self, req: &mut Request) -> Response {
        let mut res = Response::new(200);
        let deadline = self.request_deadline;

        let outcome =
            AssertUnwindSafe(tokio::time::timeout(deadline, self.dispatch(req, &mut res)))
                .catch_unwind()
                .await;
        let outcome = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(ServerError::Timeout),
            Err(panic) => Err(ServerError::PanicError(panic_message(&panic))),
        };

        if let Err(err) = outcome {
            log::error!("{} {} failed: {}", req.method, req.path, err);
            if let Some(hook) = &self.on_error {
                let mut custom = hook(&err);
                custom.send(None);
                return custom;
            }
            res.render_error(&err);
            res.send(None);
        }
        res
    }

    /// The pipeline proper: run phase, dispatch (with static fallback),
    /// deferred middleware, terminate phase.
    async fn dispatch(&self, req: &mut Request, res: &mut Response) -> ServerResult<()> {
        self.emitter.emit(Event::ConnectionReceived {
            method: req.method,
            path: req.path.clone(),
        });

        let mut chain = MiddlewareHandler::with(self.middleware.clone());
        let mut outcome = chain.run(req, res).await;

        if outcome.is_ok() {
            outcome = self.route(req, res).await;
        }
        if outcome.is_ok() {
            for middleware in req.take_deferred() {
                if let Err(err) = chain.add(middleware, req, res).await {
                    outcome = Err(err);
                    break;
                }
            }
        }

        chain.terminate(req, res).await?;
        outcome
    }

    /// Route dispatch with the static-file fallback. The trie is walked
    /// once; the resolved route and its variables feed dispatch directly.
    /// A miss is reported as an error so the kernel's `on_error` hook gets
    /// a say in rendering it.
    async fn route(&self, req: &mut Request, res: &mut Response) -> ServerResult<()> {
        if res.is_sent() {
            return Ok(());
        }
        if let Some((route, vars)) = self.router.get_route(req.method, &req.path) {
            req.params = vars;
            route.run(req, res).await;
            return Ok(());
        }
        if req.method == Method::GET && self.serve_static(&req.path, res) {
            res.send(None);
            return Ok(());
        }
        Err(ServerError::NotFound)
    }

    fn serve_static(&self, path: &str, res: &mut Response) -> bool {
        let Some(static_dir) = &self.static_dir else {
            return false;
        };
        let file_path = static_dir.join(path.trim_start_matches('/'));
        let Ok(canonical) = fs::canonicalize(&file_path) else {
            return false;
        };
        // Containment check defeats ../ traversal.
        let Ok(root) = fs::canonicalize(static_dir) else {
            return false;
        };
        if !canonical.starts_with(&root) || !canonical.is_file() {
            return false;
        }
        let Ok(contents) = fs::read(&canonical) else {
            return false;
        };

        if let Some(ext) = canonical.extension().and_then(|e| e.to_str()) {
            let content_type = match ext {
                "html" => "text/html",
                "css" => "text/css",
                "js" => "text/javascript",
                "json" => "application/json",
                "txt" => "text/plain",
                "png" => "image/png",
                "jpg" | "jpeg" => "image/jpeg",
                "gif" => "image/gif",
                "svg" => "image/svg+xml",
                "ico" => "image/x-icon",
                _ => "application/octet-stream",
            };
            res.header("Content-Type", content_type);
        }
        res.header("Cache-Control", "public, max-age=31536000");

        if let Ok(metadata) = fs::metadata(&canonical) {
            if let Ok(modified) = metadata.modified() {
                res.header("Last-Modified", httpdate::fmt_http_date(modified));
            }
            let etag = format!(
                "\"{}-{}\"",
                metadata.len(),
                metadata
                    .modified()
                    .ok()
                    .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0)
            );
            res.header("ETag", etag);
        }

        res.status(200).body_bytes(contents);
        true
    }

    /// One write per response. Status line, headers, Set-Cookie lines,
    /// Content-Length, then the body bytes untouched.
    async fn write_response<S>(stream: &mut S, res: &Response) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut head = format!("HTTP/1.1 {}\r\n", res.status_code());
        for (name, value) in res.headers() {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        for cookie in res.cookies() {
            head.push_str(&format!("Set-Cookie: {}\r\n", cookie.to_header_value()));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", res.body_len()));

        let mut wire = head.into_bytes();
        wire.extend_from_slice(res.body_raw());
        stream.write_all(&wire).await?;
        stream.flush().await
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).ok()?;
            let value = urlencoding::decode(value).ok()?;
            Some((key.into_owned(), value.into_owned()))
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
