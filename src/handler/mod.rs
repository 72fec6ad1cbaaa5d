use crate::error::ServerResult;
use crate::http::{Request, Response};
use futures::future::BoxFuture;

/// What a route handler resolves to. `Ok(Some(body))` asks the route wrapper
/// to use the value as the response body, provided the handler did not
/// already send the response itself; `Ok(None)` means the handler dealt with
/// the response directly.
pub type HandlerResult = ServerResult<Option<String>>;

pub type HandlerFuture<'a> = BoxFuture<'a, HandlerResult>;

/// A route handler: borrows the request and response for the duration of
/// its future. Extracted path variables arrive on `req.params`.
///
/// Plain `fn` items with the explicit lifetime signature implement this
/// automatically:
///
/// ```rust,no_run
/// use trellis::{HandlerFuture, Request, Response};
///
/// fn hello<'a>(_req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
///     Box::pin(async move {
///         res.body("hello");
///         Ok(None)
///     })
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a>;

    fn dyn_clone(&self) -> Box<dyn Handler>;
}

impl Clone for Box<dyn Handler> {
    fn clone(&self) -> Box<dyn Handler> {
        self.dyn_clone()
    }
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a>
        + Send
        + Sync
        + Clone
        + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        (self)(req, res)
    }

    fn dyn_clone(&self) -> Box<dyn Handler> {
        Box::new(self.clone())
    }
}
