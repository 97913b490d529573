//! Readiness tracking for isolated contexts

use std::collections::HashMap;

use super::error::{WorkerError, WorkerResult};
use super::id::ContextId;

/// One-way not-ready → ready switch per context.
///
/// Only the explicit signal sent at the end of a context's bootstrap opens
/// the gate. Terminating a context removes its entry instead of resetting it.
#[derive(Debug, Default)]
pub struct ReadyGate {
    entries: HashMap<ContextId, bool>,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly created context
    pub fn track(&mut self, id: &ContextId) {
        self.entries.entry(id.clone()).or_insert(false);
    }

    pub fn is_ready(&self, id: &ContextId) -> bool {
        self.entries.get(id).copied().unwrap_or(false)
    }

    pub fn is_tracked(&self, id: &ContextId) -> bool {
        self.entries.contains_key(id)
    }

    /// Open the gate. Returns `true` only for the first transition.
    pub fn open(&mut self, id: &ContextId) -> WorkerResult<bool> {
        match self.entries.get_mut(id) {
            Some(ready) if *ready => Ok(false),
            Some(ready) => {
                *ready = true;
                Ok(true)
            }
            None => Err(WorkerError::ContextDestroyed(id.clone())),
        }
    }

    pub fn remove(&mut self, id: &ContextId) {
        self.entries.remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_exactly_once() {
        let mut gate = ReadyGate::new();
        let id = ContextId::from("worker-0-0");
        gate.track(&id);

        assert!(!gate.is_ready(&id));
        assert_eq!(gate.open(&id), Ok(true));
        assert!(gate.is_ready(&id));
        assert_eq!(gate.open(&id), Ok(false));
        assert!(gate.is_ready(&id));
    }

    #[test]
    fn test_tracking_again_does_not_reset() {
        let mut gate = ReadyGate::new();
        let id = ContextId::from("worker-0-0");
        gate.track(&id);
        gate.open(&id).unwrap();
        gate.track(&id);
        assert!(gate.is_ready(&id));
    }

    #[test]
    fn test_removed_context_cannot_open() {
        let mut gate = ReadyGate::new();
        let id = ContextId::from("worker-0-0");
        gate.track(&id);
        gate.remove(&id);

        assert!(!gate.is_tracked(&id));
        assert!(!gate.is_ready(&id));
        assert_eq!(gate.open(&id), Err(WorkerError::ContextDestroyed(id.clone())));
        assert!(gate.is_empty());
    }
}
