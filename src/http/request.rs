use crate::error::{ServerError, ServerResult};
use crate::extensions::Extensions;
use crate::middleware::Middleware;
use crate::router::PathVariables;
use crate::session::Session;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// The HTTP methods routes can be registered under.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    OPTIONS,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    /// Parses a wire-format method name, case-insensitively. Anything
    /// outside the supported set is rejected rather than defaulted.
    pub fn parse(s: &str) -> ServerResult<Method> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "OPTIONS" => Ok(Method::OPTIONS),
            other => Err(ServerError::BadRequest(format!(
                "unsupported HTTP method: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw request payload plus the Content-Type it arrived with. Structured
/// decoding (forms, multipart) is the form-body middleware's job; the body
/// itself only offers the byte/string/JSON views.
#[derive(Debug, Default)]
pub struct Body {
    content_type: String,
    data: Vec<u8>,
}

impl Body {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Body {
        Body {
            content_type: content_type.into(),
            data,
        }
    }

    pub fn empty() -> Body {
        Body::default()
    }

    pub fn from_string(s: &str) -> Body {
        Body::new("text/plain", s.as_bytes().to_vec())
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn json<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.content_type.starts_with("application/json") {
            serde_json::from_slice(&self.data).ok()
        } else {
            None
        }
    }
}

/// One inbound HTTP request. Owned by a single request lifecycle and never
/// shared across requests; the middleware chain and the matched handler
/// borrow it mutably in turn.
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Path variables extracted by the router, in template order.
    pub params: PathVariables,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Free-form side channel written by middleware (decoded form bodies,
    /// request timing marks) and read by handlers.
    pub data: HashMap<String, Value>,
    pub body: Body,
    pub session: Option<Session>,
    pub extensions: Extensions,
    deferred: Vec<Box<dyn Middleware>>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Request {
        Request {
            method,
            path: path.into(),
            query: HashMap::new(),
            params: PathVariables::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            data: HashMap::new(),
            body: Body::empty(),
            session: None,
            extensions: Extensions::new(),
            deferred: Vec::new(),
        }
    }

    /// Header lookup; names are stored lower-cased at parse time.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|v| v.as_str())
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set_data<T>(&mut self, key: &str, value: T)
    where
        T: serde::Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
    }

    pub fn typed_data<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.to_owned()).ok())
    }

    /// Queues a middleware from inside a handler. The kernel hands these to
    /// the per-request chain after dispatch; because the chain's run phase
    /// has completed by then, each one starts immediately and still takes
    /// part in the terminate phase.
    pub fn defer_middleware(&mut self, middleware: impl Middleware) {
        self.deferred.push(Box::new(middleware));
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Box<dyn Middleware>> {
        std::mem::take(&mut self.deferred)
    }

    pub(crate) fn parse_cookies(header: &str) -> HashMap<String, String> {
        header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
