use crate::error::ServerError;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;

/// A Set-Cookie entry staged on a response.
#[derive(Debug, Clone)]
pub struct Cookie {
    name: String,
    value: String,
    path: String,
    max_age: Option<u64>,
    http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Cookie {
        Cookie {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            max_age: None,
            http_only: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn http_only(mut self, on: bool) -> Self {
        self.http_only = on;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub(crate) fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", age));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// The outbound half of a request lifecycle.
///
/// `send` marks the response as finished; it never writes to the socket
/// itself (the kernel flushes exactly once, after the terminate phase).
/// A second `send` is a no-op returning `false`, which is the guard the
/// route wrapper relies on when deciding whether to apply its fallback send.
#[derive(Debug)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
    headers: HashMap<String, String>,
    cookies: Vec<Cookie>,
    sent: bool,
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            body: Vec::new(),
            headers: HashMap::new(),
            cookies: Vec::new(),
            sent: false,
        }
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn body<T: AsRef<str>>(&mut self, body: T) -> &mut Self {
        self.body = body.as_ref().as_bytes().to_vec();
        self
    }

    pub fn body_bytes(&mut self, body: Vec<u8>) -> &mut Self {
        self.body = body;
        self
    }

    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub(crate) fn body_raw(&self) -> &[u8] {
        &self.body
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers
            .insert(name.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn set_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.push(cookie);
        self
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub(crate) fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, ServerError> {
        let json_string = serde_json::to_string(value)
            .map_err(|e| ServerError::InternalError(format!("JSON serialization error: {}", e)))?;
        self.header("Content-Type", "application/json");
        self.body(json_string);
        Ok(self)
    }

    /// Marks the response as sent, optionally stamping a final status code.
    /// Returns `false` without touching anything when already sent.
    pub fn send(&mut self, status: Option<u16>) -> bool {
        if self.sent {
            return false;
        }
        if let Some(status) = status {
            self.status = status;
        }
        self.sent = true;
        true
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Renders a `ServerError` into this response: status from the error's
    /// class, body a stable JSON error shape.
    pub fn render_error(&mut self, err: &ServerError) -> &mut Self {
        let status = err.status_code();
        self.status(status);
        self.json(&serde_json::json!({
            "error": {
                "message": err.to_string(),
                "status": status
            }
        }))
        .expect("error body serialization");
        self
    }

    pub fn error(err: &ServerError) -> Response {
        let mut response = Response::new(err.status_code());
        response.render_error(err);
        response
    }

    pub fn ok<T: Serialize>(data: &T) -> Result<Response, ServerError> {
        let mut response = Response::new(200);
        response.json(data)?;
        Ok(response)
    }

    pub fn text<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.header("Content-Type", "text/plain").body(content);
        response
    }

    pub fn html<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.header("Content-Type", "text/html").body(content);
        response
    }

    pub fn redirect(location: &str) -> Response {
        let mut response = Response::new(302);
        response.header("Location", location);
        response
    }

    pub fn no_content() -> Response {
        Response::new(204)
    }
}
