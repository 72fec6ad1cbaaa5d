use crate::error::ServerError;
use crate::http::{Method, Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};
use uuid::Uuid;

const TOKEN_KEY: &str = "csrf.token";

/// Session-backed CSRF protection. Must be registered after
/// [`SessionMiddleware`](crate::middleware::SessionMiddleware).
///
/// Run phase: ensures the session holds a token, then checks it against the
/// request header on mutating verbs; a mismatch rejects with 403. Terminate
/// phase: echoes the token in a response header so clients can pick it up.
#[derive(Clone)]
pub struct Csrf {
    header_name: String,
}

impl Csrf {
    pub fn new() -> Self {
        Csrf {
            header_name: "x-csrf-token".to_string(),
        }
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    fn protects(method: Method) -> bool {
        matches!(
            method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

impl Default for Csrf {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for Csrf {
    fn run<'a>(&'a self, req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let Some(session) = req.session.as_mut() else {
                log::warn!("Csrf registered without a session; skipping check");
                return Ok(());
            };
            if session.get(TOKEN_KEY).is_none() {
                session.set(TOKEN_KEY, Uuid::new_v4().to_string());
            }
            if Self::protects(req.method) {
                let expected = req
                    .session
                    .as_ref()
                    .and_then(|s| s.get(TOKEN_KEY))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let presented = req.header(&self.header_name);
                if expected.as_deref() != presented {
                    return Err(ServerError::Forbidden("CSRF token mismatch".to_string()));
                }
            }
            Ok(())
        })
    }

    fn terminate<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            if let Some(token) = req
                .session
                .as_ref()
                .and_then(|s| s.get(TOKEN_KEY))
                .and_then(|v| v.as_str())
            {
                res.header(&self.header_name, token);
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
    use crate::session::Session;

    fn request_with_session(method: Method) -> Request {
        let mut req = Request::new(method, "/form");
        req.session = Some(Session::new());
        req
    }

    #[tokio::test]
    async fn get_requests_mint_a_token_without_checking() {
        let mw = Csrf::new();
        let mut req = request_with_session(Method::GET);
        let mut res = Response::new(200);
        mw.run(&mut req, &mut res).await.unwrap();
        assert!(req.session.as_ref().unwrap().get(TOKEN_KEY).is_some());

        mw.terminate(&mut req, &mut res).await.unwrap();
        assert!(res.get_header("x-csrf-token").is_some());
    }

    #[tokio::test]
    async fn mutating_request_without_token_is_forbidden() {
        let mw = Csrf::new();
        let mut req = request_with_session(Method::POST);
        let mut res = Response::new(200);
        let err = mw.run(&mut req, &mut res).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn matching_token_is_accepted() {
        let mw = Csrf::new();
        let mut req = request_with_session(Method::POST);
        req.session
            .as_mut()
            .unwrap()
            .set(TOKEN_KEY, "tok-1".to_string());
        req.headers
            .insert("x-csrf-token".to_string(), "tok-1".to_string());
        let mut res = Response::new(200);
        mw.run(&mut req, &mut res).await.unwrap();
    }

    #[tokio::test]
    async fn missing_session_skips_the_check() {
        let mw = Csrf::new();
        let mut req = Request::new(Method::POST, "/form");
        let mut res = Response::new(200);
        mw.run(&mut req, &mut res).await.unwrap();
    }
}
