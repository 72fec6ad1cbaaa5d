use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed shared state, registered before the kernel starts accepting
/// connections and read-only afterwards. Every request carries a cheap clone.
#[derive(Default, Clone)]
pub struct Extensions {
    entries: Arc<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn provide<T: Send + Sync + 'static>(&mut self, value: T) {
        Arc::get_mut(&mut self.entries)
            .expect("extensions are sealed once the kernel is running")
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AppName(&'static str);

    #[test]
    fn provides_and_reads_typed_values() {
        let mut ext = Extensions::new();
        ext.provide(AppName("trellis"));
        assert_eq!(ext.get::<AppName>().unwrap().0, "trellis");
        assert!(ext.get::<u32>().is_none());
    }

    #[test]
    #[should_panic(expected = "sealed")]
    fn providing_after_clone_panics() {
        let mut ext = Extensions::new();
        let _shared = ext.clone();
        ext.provide(AppName("late"));
    }
}
