//! Session state carried across requests via a cookie. The persistence
//! format behind [`SessionStore`] is a black box to the framework; the
//! bundled [`MemoryStore`] is enough for single-process deployments and
//! tests.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub trait SessionStore: Send + Sync {
    fn load(&self, id: &str) -> Option<HashMap<String, Value>>;
    fn store(&self, id: &str, values: HashMap<String, Value>);
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    sessions: Arc<Mutex<HashMap<String, HashMap<String, Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, id: &str) -> Option<HashMap<String, Value>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    fn store(&self, id: &str, values: HashMap<String, Value>) {
        self.sessions.lock().unwrap().insert(id.to_string(), values);
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    values: HashMap<String, Value>,
    dirty: bool,
}

impl Session {
    pub fn new() -> Session {
        Session {
            id: Uuid::new_v4().to_string(),
            values: HashMap::new(),
            dirty: false,
        }
    }

    pub(crate) fn restore(id: String, values: HashMap<String, Value>) -> Session {
        Session {
            id,
            values,
            dirty: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set<T: serde::Serialize>(&mut self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.values.insert(key.to_string(), value);
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the session through to the store when it changed.
    pub fn save(&mut self, store: &dyn SessionStore) {
        if self.dirty {
            store.store(&self.id, self.values.clone());
            self.dirty = false;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_round_trips_through_the_store() {
        let store = MemoryStore::new();
        let mut session = Session::new();
        session.set("user", "mallory");
        assert!(session.is_dirty());
        session.save(&store);
        assert!(!session.is_dirty());

        let reloaded = Session::restore(session.id().to_string(), store.load(session.id()).unwrap());
        assert_eq!(reloaded.get("user").unwrap(), "mallory");
    }

    #[test]
    fn clean_sessions_are_not_written() {
        let store = MemoryStore::new();
        let mut session = Session::new();
        session.save(&store);
        assert!(store.load(session.id()).is_none());
    }

    #[test]
    fn remove_marks_dirty_only_on_hit() {
        let mut session = Session::new();
        assert!(session.remove("ghost").is_none());
        assert!(!session.is_dirty());
        session.set("k", 1);
        session.save(&MemoryStore::new());
        assert!(session.remove("k").is_some());
        assert!(session.is_dirty());
    }

    #[test]
    fn fresh_sessions_get_distinct_ids() {
        assert_ne!(Session::new().id(), Session::new().id());
    }
}
