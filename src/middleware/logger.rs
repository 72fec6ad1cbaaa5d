use crate::http::{Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};
use std::time::{SystemTime, UNIX_EPOCH};

const START_KEY: &str = "request.start_ms";

/// Access logging: the run phase stamps a start mark, the terminate phase
/// logs method, path, final status and elapsed time. Registered first, it
/// terminates last and therefore sees the fully settled response.
#[derive(Clone, Default)]
pub struct RequestLog;

impl RequestLog {
    pub fn new() -> Self {
        RequestLog
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Middleware for RequestLog {
    fn run<'a>(&'a self, req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            req.set_data(START_KEY, now_ms());
            Ok(())
        })
    }

    fn terminate<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let elapsed = req
                .typed_data::<u64>(START_KEY)
                .map(|start| now_ms().saturating_sub(start));
            match elapsed {
                Some(ms) => log::info!(
                    "{} {} -> {} ({} ms)",
                    req.method,
                    req.path,
                    res.status_code(),
                    ms
                ),
                None => log::info!("{} {} -> {}", req.method, req.path, res.status_code()),
            }
            Ok(())
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(RequestLog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn run_stamps_a_start_mark() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mw = RequestLog::new();
        let mut req = Request::new(Method::GET, "/");
        let mut res = Response::new(200);
        mw.run(&mut req, &mut res).await.unwrap();
        assert!(req.typed_data::<u64>(START_KEY).is_some());
        mw.terminate(&mut req, &mut res).await.unwrap();
    }
}
