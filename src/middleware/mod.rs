//! Request/response interception with a pre-phase (`run`) and post-phase
//! (`terminate`).
//!
//! The pipeline driver awaits each stage in sequence; a stage continues the
//! chain simply by returning `Ok(())`, and stops it by returning an error,
//! which the kernel renders with the error's status class. There is no
//! `next()` continuation to forget.

mod body;
mod cache;
mod compress;
mod csrf;
mod errors;
mod limit;
mod logger;
mod session;

pub use body::FormBody;
pub use cache::ResponseCache;
pub use compress::{Compression, CompressionConfig};
pub use csrf::Csrf;
pub use errors::ErrorListener;
pub use limit::{RateLimitConfig, RateLimiter};
pub use logger::RequestLog;
pub use session::SessionMiddleware;

use crate::error::ServerResult;
use crate::http::{Request, Response};
use futures::future::BoxFuture;

pub type MiddlewareFuture<'a> = BoxFuture<'a, ServerResult<()>>;

/// One unit of request/response interception. Both phases default to a
/// pass-through, so concrete middleware override only the phase they need.
/// Instances are cloned fresh for every request via `clone_box`; nothing is
/// shared across requests unless the middleware itself holds an `Arc`.
pub trait Middleware: Send + Sync + 'static {
    fn run<'a>(&'a self, _req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn terminate<'a>(
        &'a self,
        _req: &'a mut Request,
        _res: &'a mut Response,
    ) -> MiddlewareFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn clone_box(&self) -> Box<dyn Middleware>;
}

impl Clone for Box<dyn Middleware> {
    fn clone(&self) -> Box<dyn Middleware> {
        self.clone_box()
    }
}

/// Orchestrates an ordered middleware list bound to a single
/// request/response pair. Single-use: not-started -> running -> complete.
///
/// `run` executes stages in registration (FIFO) order, `terminate` in exact
/// reverse (LIFO) order, mirroring an onion model where the first middleware
/// to see the request is the last to see the outgoing response. Middleware
/// added after the run phase completed starts immediately instead of being
/// silently skipped, and still participates in `terminate`.
pub struct MiddlewareHandler {
    stack: Vec<Box<dyn Middleware>>,
    completed: bool,
    terminated: bool,
}

impl MiddlewareHandler {
    pub fn new() -> Self {
        Self::with(Vec::new())
    }

    pub fn with(stack: Vec<Box<dyn Middleware>>) -> Self {
        MiddlewareHandler {
            stack,
            completed: false,
            terminated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Appends a middleware. When the run phase has already completed, the
    /// newcomer's `run` executes before this call resolves.
    pub async fn add(
        &mut self,
        middleware: Box<dyn Middleware>,
        req: &mut Request,
        res: &mut Response,
    ) -> ServerResult<()> {
        self.stack.push(middleware);
        if self.completed {
            self.stack.last().unwrap().run(req, res).await?;
        }
        Ok(())
    }

    /// Runs every stage forward, strictly sequentially: stage N+1 does not
    /// start until stage N's future resolves. Marks the handler complete
    /// only after the full list succeeded.
    pub async fn run(&mut self, req: &mut Request, res: &mut Response) -> ServerResult<()> {
        for middleware in &self.stack {
            middleware.run(req, res).await?;
        }
        self.completed = true;
        Ok(())
    }

    /// Runs every stage's `terminate` in reverse registration order. Calling
    /// it twice is a no-op; terminators never re-run.
    pub async fn terminate(&mut self, req: &mut Request, res: &mut Response) -> ServerResult<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        for middleware in self.stack.iter().rev() {
            middleware.terminate(req, res).await?;
        }
        Ok(())
    }
}

impl Default for MiddlewareHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::http::Method;
    use std::sync::{Arc, Mutex};

    /// Appends phase markers to a shared log so ordering can be asserted.
    struct Recorder {
        label: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn boxed(label: &'static str, trace: &Arc<Mutex<Vec<String>>>) -> Box<dyn Middleware> {
            Box::new(Recorder {
                label,
                trace: trace.clone(),
            })
        }
    }

    impl Middleware for Recorder {
        fn run<'a>(&'a self, _req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
            Box::pin(async move {
                self.trace.lock().unwrap().push(format!("{}.run", self.label));
                Ok(())
            })
        }

        fn terminate<'a>(
            &'a self,
            _req: &'a mut Request,
            _res: &'a mut Response,
        ) -> MiddlewareFuture<'a> {
            Box::pin(async move {
                self.trace
                    .lock()
                    .unwrap()
                    .push(format!("{}.terminate", self.label));
                Ok(())
            })
        }

        fn clone_box(&self) -> Box<dyn Middleware> {
            Box::new(Recorder {
                label: self.label,
                trace: self.trace.clone(),
            })
        }
    }

    struct Failing;

    impl Middleware for Failing {
        fn run<'a>(&'a self, _req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
            Box::pin(async { Err(ServerError::Forbidden("denied".to_string())) })
        }

        fn clone_box(&self) -> Box<dyn Middleware> {
            Box::new(Failing)
        }
    }

    fn pair() -> (Request, Response) {
        (Request::new(Method::GET, "/"), Response::new(200))
    }

    #[tokio::test]
    async fn run_is_fifo_and_terminate_is_lifo() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareHandler::with(vec![
            Recorder::boxed("a", &trace),
            Recorder::boxed("b", &trace),
            Recorder::boxed("c", &trace),
        ]);
        let (mut req, mut res) = pair();

        chain.run(&mut req, &mut res).await.unwrap();
        chain.terminate(&mut req, &mut res).await.unwrap();

        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "a.run",
                "b.run",
                "c.run",
                "c.terminate",
                "b.terminate",
                "a.terminate"
            ]
        );
    }

    #[tokio::test]
    async fn empty_chain_is_a_no_op_success() {
        let mut chain = MiddlewareHandler::new();
        let (mut req, mut res) = pair();
        chain.run(&mut req, &mut res).await.unwrap();
        chain.terminate(&mut req, &mut res).await.unwrap();
        assert!(chain.completed());
    }

    #[tokio::test]
    async fn single_middleware_fifo_equals_lifo() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareHandler::with(vec![Recorder::boxed("only", &trace)]);
        let (mut req, mut res) = pair();
        chain.run(&mut req, &mut res).await.unwrap();
        chain.terminate(&mut req, &mut res).await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["only.run", "only.terminate"]);
    }

    #[tokio::test]
    async fn late_addition_after_run_starts_immediately() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareHandler::with(vec![Recorder::boxed("a", &trace)]);
        let (mut req, mut res) = pair();

        chain.run(&mut req, &mut res).await.unwrap();
        chain
            .add(Recorder::boxed("late", &trace), &mut req, &mut res)
            .await
            .unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["a.run", "late.run"]);

        chain.terminate(&mut req, &mut res).await.unwrap();
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["a.run", "late.run", "late.terminate", "a.terminate"]
        );
    }

    #[tokio::test]
    async fn addition_before_run_is_deferred() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareHandler::new();
        let (mut req, mut res) = pair();

        chain
            .add(Recorder::boxed("a", &trace), &mut req, &mut res)
            .await
            .unwrap();
        assert!(trace.lock().unwrap().is_empty());

        chain.run(&mut req, &mut res).await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["a.run"]);
    }

    #[tokio::test]
    async fn double_terminate_is_a_no_op() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareHandler::with(vec![Recorder::boxed("a", &trace)]);
        let (mut req, mut res) = pair();

        chain.run(&mut req, &mut res).await.unwrap();
        chain.terminate(&mut req, &mut res).await.unwrap();
        chain.terminate(&mut req, &mut res).await.unwrap();

        assert_eq!(*trace.lock().unwrap(), vec!["a.run", "a.terminate"]);
    }

    #[tokio::test]
    async fn failing_stage_stops_the_run_phase() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareHandler::with(vec![
            Recorder::boxed("a", &trace),
            Box::new(Failing),
            Recorder::boxed("b", &trace),
        ]);
        let (mut req, mut res) = pair();

        let err = chain.run(&mut req, &mut res).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(!chain.completed());
        assert_eq!(*trace.lock().unwrap(), vec!["a.run"]);
    }
}
