use crate::http::{Method, Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};
use moka::future::Cache;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone)]
struct CachedResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// Caches successful GET responses.
///
/// Run phase: on a hit, the stored response is written out and sent, which
/// makes the router skip dispatch entirely. Terminate phase: stores fresh
/// 200 responses. Clones share one underlying cache, so the per-request
/// `clone_box` instances all see the same entries.
#[derive(Clone)]
pub struct ResponseCache {
    cache: Cache<String, CachedResponse>,
}

impl ResponseCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn invalidate(&self, path: &str) {
        self.cache.remove(&path.to_string()).await;
    }
}

const HIT_HEADER: &str = "X-Cache";

impl Middleware for ResponseCache {
    fn run<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            if req.method != Method::GET {
                return Ok(());
            }
            if let Some(hit) = self.cache.get(&req.path).await {
                res.status(hit.status);
                for (name, value) in &hit.headers {
                    res.header(name, value);
                }
                res.header(HIT_HEADER, "hit");
                res.body_bytes(hit.body);
                res.send(None);
                log::debug!("cache hit for {}", req.path);
            }
            Ok(())
        })
    }

    fn terminate<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let served_from_cache = res.get_header(HIT_HEADER).is_some();
            if req.method == Method::GET && res.status_code() == 200 && !served_from_cache {
                self.cache
                    .insert(
                        req.path.clone(),
                        CachedResponse {
                            status: res.status_code(),
                            headers: res.headers().clone(),
                            body: res.body_raw().to_vec(),
                        },
                    )
                    .await;
            }
            Ok(())
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let mw = ResponseCache::new(16, Duration::from_secs(60));

        let mut req = Request::new(Method::GET, "/article");
        let mut res = Response::new(200);
        res.body("first render");
        mw.run(&mut req, &mut res).await.unwrap();
        assert!(!res.is_sent());
        res.send(None);
        mw.terminate(&mut req, &mut res).await.unwrap();

        let mut req = Request::new(Method::GET, "/article");
        let mut res = Response::new(200);
        mw.run(&mut req, &mut res).await.unwrap();
        assert!(res.is_sent());
        assert_eq!(res.body_str(), "first render");
        assert_eq!(res.get_header(HIT_HEADER), Some("hit"));
    }

    #[tokio::test]
    async fn non_get_requests_bypass_the_cache() {
        let mw = ResponseCache::new(16, Duration::from_secs(60));
        let mut req = Request::new(Method::POST, "/article");
        let mut res = Response::new(200);
        res.body("created");
        res.send(None);
        mw.terminate(&mut req, &mut res).await.unwrap();

        let mut req = Request::new(Method::POST, "/article");
        let mut res = Response::new(200);
        mw.run(&mut req, &mut res).await.unwrap();
        assert!(!res.is_sent());
    }

    #[tokio::test]
    async fn invalidate_drops_an_entry() {
        let mw = ResponseCache::new(16, Duration::from_secs(60));
        let mut req = Request::new(Method::GET, "/stale");
        let mut res = Response::new(200);
        res.body("v1");
        res.send(None);
        mw.terminate(&mut req, &mut res).await.unwrap();

        mw.invalidate("/stale").await;

        let mut req = Request::new(Method::GET, "/stale");
        let mut res = Response::new(200);
        mw.run(&mut req, &mut res).await.unwrap();
        assert!(!res.is_sent());
    }
}
