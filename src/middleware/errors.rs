use crate::http::{Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};

/// Rewrites server-error responses into a stable JSON shape during the
/// terminate phase.
///
/// By default the route wrapper's 500 body carries the error message plus a
/// debug rendering of the failure; that is fine in development but leaks
/// internals in production. With `expose_detail` off (the default) this
/// middleware replaces any 5xx body with a generic envelope.
#[derive(Clone)]
pub struct ErrorListener {
    expose_detail: bool,
}

impl ErrorListener {
    pub fn new() -> Self {
        ErrorListener {
            expose_detail: false,
        }
    }

    pub fn expose_detail(mut self, on: bool) -> Self {
        self.expose_detail = on;
        self
    }
}

impl Default for ErrorListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for ErrorListener {
    fn terminate<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let status = res.status_code();
            if status >= 500 && !self.expose_detail {
                log::debug!("masking {} body for {} {}", status, req.method, req.path);
                res.json(&serde_json::json!({
                    "error": {
                        "message": "Internal Server Error",
                        "status": status
                    }
                }))?;
            }
            Ok(())
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(self.clone())
    }
}
