//! Context id allocation

use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier of an isolated context, unique for the lifetime of its host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(String);

impl ContextId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        ContextId(s.to_string())
    }
}

/// Hands out ids made of a monotonically increasing counter and a timestamp.
///
/// The counter alone guarantees uniqueness; the timestamp only makes ids from
/// different host runs distinguishable in logs.
#[derive(Debug, Default)]
pub struct IdAllocator {
    counter: Cell<u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ContextId {
        let n = self.counter.get();
        self.counter.set(n + 1);
        ContextId(format!("worker-{}-{}", n, now_millis()))
    }

    /// Number of ids handed out so far
    pub fn allocated(&self) -> u64 {
        self.counter.get()
    }
}

/// Milliseconds since the Unix epoch, used for ids and synthetic event timestamps
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids = IdAllocator::new();
        let seen: HashSet<ContextId> = (0..100).map(|_| ids.next()).collect();
        assert_eq!(seen.len(), 100);
        assert_eq!(ids.allocated(), 100);
    }

    #[test]
    fn test_id_shape() {
        let ids = IdAllocator::new();
        let first = ids.next();
        let second = ids.next();
        assert!(first.as_str().starts_with("worker-0-"));
        assert!(second.as_str().starts_with("worker-1-"));
        assert_eq!(first.to_string(), first.as_str());
    }
}
