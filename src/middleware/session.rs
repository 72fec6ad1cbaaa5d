use crate::http::{Cookie, Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};
use crate::session::{Session, SessionStore};
use std::sync::Arc;

/// Attaches a [`Session`] to every request.
///
/// Run phase: restores the session named by the cookie, or starts a fresh
/// one. Terminate phase: saves dirty sessions and sets the cookie for
/// newly minted ids.
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
}

impl SessionMiddleware {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        SessionMiddleware {
            store,
            cookie_name: "sid".to_string(),
        }
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }
}

impl Middleware for SessionMiddleware {
    fn run<'a>(&'a self, req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let session = req
                .cookie(&self.cookie_name)
                .and_then(|id| {
                    self.store
                        .load(id)
                        .map(|values| Session::restore(id.to_string(), values))
                })
                .unwrap_or_else(Session::new);
            req.session = Some(session);
            Ok(())
        })
    }

    fn terminate<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let known_id = req.cookie(&self.cookie_name).map(|id| id.to_string());
            if let Some(session) = req.session.as_mut() {
                session.save(self.store.as_ref());
                if known_id.as_deref() != Some(session.id()) {
                    res.set_cookie(Cookie::new(&self.cookie_name, session.id()).http_only(true));
                }
            }
            Ok(())
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(SessionMiddleware {
            store: self.store.clone(),
            cookie_name: self.cookie_name.clone(),
        })
    }
}
