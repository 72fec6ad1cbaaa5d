use crate::error::ServerError;
use crate::events::{Emitter, Event};
use crate::handler::Handler;
use crate::http::{Request, Response};
use std::collections::HashMap;
use std::sync::RwLock;

/// The registered binding of one URI template to a handler.
///
/// A route is shared (via `Arc`) by every method trie it was registered
/// under and is immutable after boot, except for the `name` and `patterns`
/// side tables which the fluent registration API fills in before the first
/// dispatch.
pub struct Route {
    uri: String,
    handler: Box<dyn Handler>,
    case_sensitive: bool,
    patterns: RwLock<HashMap<String, String>>,
    name: RwLock<Option<String>>,
    emitter: Emitter,
}

impl Route {
    pub(crate) fn new(
        uri: &str,
        handler: Box<dyn Handler>,
        case_sensitive: bool,
        emitter: Emitter,
    ) -> Route {
        Route {
            uri: uri.to_string(),
            handler,
            case_sensitive,
            patterns: RwLock::new(HashMap::new()),
            name: RwLock::new(None),
            emitter,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Records a regex constraint for one named path variable.
    pub fn where_(&self, name: &str, pattern: &str) -> &Self {
        self.patterns
            .write()
            .unwrap()
            .insert(name.to_string(), pattern.to_string());
        self
    }

    /// Batch form of [`Route::where_`].
    pub fn where_all(&self, patterns: &[(&str, &str)]) -> &Self {
        let mut table = self.patterns.write().unwrap();
        for (name, pattern) in patterns {
            table.insert(name.to_string(), pattern.to_string());
        }
        self
    }

    pub fn get_pattern(&self, name: &str) -> Option<String> {
        self.patterns.read().unwrap().get(name).cloned()
    }

    /// Assigns a name for reverse lookup; `None` clears it.
    pub fn name(&self, name: Option<&str>) -> &Self {
        *self.name.write().unwrap() = name.map(|n| n.to_string());
        self
    }

    pub fn get_name(&self) -> Option<String> {
        self.name.read().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> bool {
        self.name.read().unwrap().as_deref() == Some(name)
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    /// Executes the handler and settles the response.
    ///
    /// A returned body is applied only when the handler has not already sent
    /// the response; an error is rendered into the response with the error's
    /// status class, logged and broadcast. Handler failures never escape this
    /// method, and the response ends up sent exactly once.
    pub async fn run(&self, req: &mut Request, res: &mut Response) {
        match self.handler.call(req, res).await {
            Ok(value) => {
                if let Some(body) = value {
                    if !res.is_sent() {
                        res.body(body);
                    }
                }
                if !res.is_sent() {
                    res.send(None);
                }
            }
            Err(err) => {
                log::error!("handler for '{} {}' failed: {}", req.method, self.uri, err);
                self.emitter.emit(Event::HandlerError {
                    method: req.method,
                    path: req.path.clone(),
                    message: err.to_string(),
                });
                if !res.is_sent() {
                    self.render_failure(res, &err);
                    res.send(None);
                }
            }
        }
    }

    fn render_failure(&self, res: &mut Response, err: &ServerError) {
        let status = err.status_code();
        res.status(status);
        res.json(&serde_json::json!({
            "error": {
                "message": err.to_string(),
                "detail": format!("{:?}", err),
                "status": status
            }
        }))
        .expect("error body serialization");
    }
}
