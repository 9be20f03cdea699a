//! Bounded canonical-key to node-id caches

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::graph::{Label, NodeId};

/// Thread-safe LRU from canonical key to store node id.
///
/// A miss is never authoritative; absence only means the resolution layer
/// has to consult the store index. Entries are evicted by capacity alone,
/// never by age, and never go stale because node ids are not reused.
pub struct NodeCache {
    entries: Mutex<LruCache<String, NodeId>>,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<NodeId> {
        self.entries.lock().unwrap().get(key).copied()
    }

    pub fn put(&self, key: String, id: NodeId) {
        self.entries.lock().unwrap().put(key, id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One cache per entity kind.
pub struct Caches {
    pub identities: NodeCache,
    pub pages: NodeCache,
}

impl Caches {
    pub fn new(identity_capacity: usize, page_capacity: usize) -> Self {
        Self {
            identities: NodeCache::new(identity_capacity),
            pages: NodeCache::new(page_capacity),
        }
    }

    pub fn for_label(&self, label: Label) -> &NodeCache {
        match label {
            Label::Identity => &self.identities,
            Label::Page => &self.pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let cache = NodeCache::new(4);
        assert_eq!(cache.get("k1"), None);

        cache.put("k1".to_string(), NodeId(1));
        assert_eq!(cache.get("k1"), Some(NodeId(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = NodeCache::new(2);
        cache.put("a".to_string(), NodeId(1));
        cache.put("b".to_string(), NodeId(2));
        cache.put("c".to_string(), NodeId(3));

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(NodeId(2)));
        assert_eq!(cache.get("c"), Some(NodeId(3)));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = NodeCache::new(2);
        cache.put("a".to_string(), NodeId(1));
        cache.put("b".to_string(), NodeId(2));

        cache.get("a");
        cache.put("c".to_string(), NodeId(3));

        assert_eq!(cache.get("a"), Some(NodeId(1)));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_zero_capacity_clamps_to_one() {
        let cache = NodeCache::new(0);
        cache.put("a".to_string(), NodeId(1));
        assert_eq!(cache.get("a"), Some(NodeId(1)));
    }

    #[test]
    fn test_caches_routed_by_label() {
        let caches = Caches::new(4, 4);
        caches.for_label(Label::Identity).put("k".to_string(), NodeId(1));

        assert_eq!(caches.identities.get("k"), Some(NodeId(1)));
        assert_eq!(caches.pages.get("k"), None);
    }
}
