//! Context id → worker handle table

use std::collections::HashMap;

use super::handle::WorkerHandle;
use super::id::ContextId;

/// Routes inbound traffic back to the owning handle.
///
/// Holds exactly the live, non-terminated handles. Lookups hand out clones so
/// callers never keep the table borrowed while running listeners.
#[derive(Default)]
pub struct Registry {
    handles: HashMap<ContextId, WorkerHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: WorkerHandle) -> Option<WorkerHandle> {
        self.handles.insert(handle.id().clone(), handle)
    }

    pub fn remove(&mut self, id: &ContextId) -> Option<WorkerHandle> {
        self.handles.remove(id)
    }

    pub fn get(&self, id: &ContextId) -> Option<WorkerHandle> {
        self.handles.get(id).cloned()
    }

    pub fn contains(&self, id: &ContextId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.handles.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::context::ContextHandle;
    use std::rc::Weak;
    use url::Url;

    fn handle(id: &str) -> WorkerHandle {
        let url = Url::parse("http://example.com/w.js").unwrap();
        WorkerHandle::new("w.js", url, ContextHandle::new(ContextId::from(id)), Weak::new())
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        registry.insert(handle("worker-2-0"));
        registry.insert(handle("worker-1-0"));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.ids(),
            vec![ContextId::from("worker-1-0"), ContextId::from("worker-2-0")]
        );

        let id = ContextId::from("worker-1-0");
        assert_eq!(registry.get(&id).map(|h| h.id().clone()), Some(id.clone()));
        assert!(registry.remove(&id).is_some());
        assert!(!registry.contains(&id));
        assert!(registry.remove(&id).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookups_are_detached() {
        let mut registry = Registry::new();
        registry.insert(handle("worker-1-0"));

        let found = registry.get(&ContextId::from("worker-1-0")).unwrap();
        registry.remove(found.id());
        assert_eq!(found.script_ref(), "w.js");
        assert!(registry.is_empty());
    }
}
