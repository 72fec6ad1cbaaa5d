//! # Trellis
//!
//! A trie-routed web framework with a two-phase middleware pipeline.
//!
//! ## Features
//!
//! - Segment-trie routing with `{var}` and optional `{var?}` path variables
//! - Ordered middleware with a forward run phase and a reverse terminate phase
//! - Per-request deadlines, panic isolation and structured error responses
//! - Sessions, CSRF protection, rate limiting, response caching, compression
//! - Static file serving and TLS support
//! - Route registration and failure events over a broadcast channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use trellis::{Kernel, Request, Response};
//! use trellis::handler::HandlerFuture;
//!
//! fn index<'a>(_req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
//!     Box::pin(async move {
//!         res.json(&trellis::json!({ "message": "Hello, World!" }))?;
//!         Ok(None)
//!     })
//! }
//!
//! fn main() {
//!     let mut kernel = Kernel::new();
//!     kernel.get("/", index);
//!     kernel.listen("127.0.0.1:3000").unwrap();
//! }
//! ```
//!
//! ## Middleware Usage
//!
//! ```no_run
//! use trellis::Kernel;
//! use trellis::middleware::{RequestLog, RateLimiter, RateLimitConfig};
//!
//! let mut kernel = Kernel::new();
//! kernel.middleware(RequestLog::new());
//! kernel.middleware(RateLimiter::new(RateLimitConfig::default()));
//! ```

pub mod database;
pub mod error;
pub mod events;
pub mod extensions;
pub mod handler;
pub mod http;
pub mod kernel;
pub mod middleware;
pub mod router;
pub mod session;
pub extern crate serde_json;

// Reexport serde_json
pub use serde_json::{json, Value};

pub use error::{ServerError, ServerResult};
pub use events::{Emitter, Event};
pub use extensions::Extensions;
pub use handler::{Handler, HandlerFuture, HandlerResult};
pub use http::{Body, Cookie, Method, Request, Response};
pub use kernel::{Kernel, TlsConfig};
pub use router::{PathVariables, Route, Router};
pub use session::{MemoryStore, Session, SessionStore};
