mod route;
mod segment;

pub use route::Route;
pub use segment::PathVariables;

use crate::error::ServerError;
use crate::events::{Emitter, Event};
use crate::handler::Handler;
use crate::http::{Method, Request, Response};
use segment::Segment;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps method + URI to a registered route.
///
/// One segment trie per HTTP method, written only during boot-time
/// registration and read-only once traffic flows. Dispatch misses are not
/// errors; they resolve to a 404 response.
pub struct Router {
    tries: HashMap<Method, Segment>,
    case_sensitive: bool,
    emitter: Emitter,
}

impl Router {
    pub fn new() -> Self {
        Self::with_emitter(Emitter::new())
    }

    pub(crate) fn with_emitter(emitter: Emitter) -> Self {
        Router {
            tries: HashMap::new(),
            case_sensitive: false,
            emitter,
        }
    }

    /// Toggles case-sensitive matching for routes registered after the call.
    pub fn case_sensitive(&mut self, on: bool) -> &mut Self {
        self.case_sensitive = on;
        self
    }

    /// Registers `handler` for `uri` under every listed method. The URI is
    /// normalized (slashes trimmed, empty becomes `/`). Returns the shared
    /// route so `.where_()` / `.name()` can be chained.
    ///
    /// Duplicate variable names within one template are a boot-time
    /// programmer error and panic.
    pub fn match_<H: Handler>(&mut self, methods: &[Method], uri: &str, handler: H) -> Arc<Route> {
        let normalized = normalize_uri(uri);
        let tokens = split_tokens(&normalized);

        let mut seen = Vec::new();
        for name in segment::template_variables(&tokens) {
            if seen.contains(&name) {
                panic!("duplicate variable '{{{}}}' in route '{}'", name, normalized);
            }
            seen.push(name);
        }

        let route = Arc::new(Route::new(
            &normalized,
            Box::new(handler),
            self.case_sensitive,
            self.emitter.clone(),
        ));
        for &method in methods {
            self.tries
                .entry(method)
                .or_insert_with(Segment::root)
                .add_route(&tokens, route.clone());
            log::debug!("route registered: {} {}", method, normalized);
            self.emitter.emit(Event::RouteRegistered {
                method,
                uri: normalized.clone(),
            });
        }
        route
    }

    pub fn get<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.match_(&[Method::GET], uri, handler)
    }

    pub fn post<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.match_(&[Method::POST], uri, handler)
    }

    pub fn put<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.match_(&[Method::PUT], uri, handler)
    }

    pub fn patch<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.match_(&[Method::PATCH], uri, handler)
    }

    pub fn delete<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.match_(&[Method::DELETE], uri, handler)
    }

    pub fn options<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.match_(&[Method::OPTIONS], uri, handler)
    }

    /// Registers across every supported method.
    pub fn any<H: Handler>(&mut self, uri: &str, handler: H) -> Arc<Route> {
        self.match_(&Method::ALL, uri, handler)
    }

    /// Resolves a route and its extracted path variables, or `None`.
    pub fn get_route(&self, method: Method, uri: &str) -> Option<(Arc<Route>, PathVariables)> {
        let normalized = normalize_uri(uri);
        let tokens = split_tokens(&normalized);
        let mut vars = PathVariables::new();
        let route = self.tries.get(&method)?.find_route(&tokens, &mut vars)?;
        Some((route, vars))
    }

    /// Dispatches one request. No match sends a 404 without touching any
    /// handler. A response some middleware already sent short-circuits
    /// dispatch entirely.
    pub async fn run_route(&self, req: &mut Request, res: &mut Response) {
        if res.is_sent() {
            return;
        }
        match self.get_route(req.method, &req.path) {
            Some((route, vars)) => {
                req.params = vars;
                route.run(req, res).await;
            }
            None => {
                log::debug!("no route for {} {}", req.method, req.path);
                res.render_error(&ServerError::NotFound);
                res.send(None);
            }
        }
    }

    pub(crate) fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Trims surrounding slashes; an empty or root path normalizes to `/`.
fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn split_tokens(normalized: &str) -> Vec<&str> {
    if normalized == "/" {
        Vec::new()
    } else {
        normalized.trim_start_matches('/').split('/').collect()
    }
}
