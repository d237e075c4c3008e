//! Node identity on top of an [`IdentifierAllocator`].

use std::sync::Arc;

use assetgraph_idmap::{IdentifierAllocator, MemoryAllocator};

use crate::quad::{NQuad, TYPE_PREDICATE};

/// Resolves external keys to node uids and emits a node's defining triples.
#[derive(Clone)]
pub struct NodeIds {
    allocator: Arc<dyn IdentifierAllocator>,
    ignore_new: bool,
}

impl NodeIds {
    /// `ignore_new = true` re-asserts the defining triples for every lookup,
    /// `false` emits them only when the id was freshly allocated.
    pub fn new(allocator: Arc<dyn IdentifierAllocator>, ignore_new: bool) -> Self {
        Self {
            allocator,
            ignore_new,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryAllocator::new()), false)
    }

    pub fn allocator(&self) -> &Arc<dyn IdentifierAllocator> {
        &self.allocator
    }

    pub fn uid_for_xid(&self, xid: &str) -> (String, bool) {
        let (id, is_new) = self.allocator.assign_id(xid);
        (id.to_string(), is_new)
    }

    /// Uid for `xid`, plus `type_name` and primary-key triples when they must
    /// be (re-)asserted.
    pub fn uid_for_type(
        &self,
        xid: &str,
        type_name: &str,
        pk_predicate: &str,
        pk_value: &str,
    ) -> (String, Vec<NQuad>) {
        let (uid, is_new) = self.uid_for_xid(xid);
        if !self.ignore_new && !is_new {
            return (uid, Vec::new());
        }
        let quads = vec![
            NQuad::string(&uid, TYPE_PREDICATE, type_name),
            NQuad::string(&uid, pk_predicate, pk_value),
        ];
        (uid, quads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defining_triples_only_for_fresh_ids() {
        let ids = NodeIds::in_memory();
        let (uid, quads) = ids.uid_for_type("P1", "product", "product.swidtag", "P1");
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[0].object_str(), Some("product"));
        assert_eq!(quads[1].predicate, "product.swidtag");

        let (again, quads) = ids.uid_for_type("P1", "product", "product.swidtag", "P1");
        assert_eq!(uid, again);
        assert!(quads.is_empty());
    }

    #[test]
    fn test_ignore_new_reasserts_defining_triples() {
        let ids = NodeIds::new(Arc::new(MemoryAllocator::new()), true);
        ids.uid_for_type("S1", "equipment", "equipment.id", "S1");
        let (_, quads) = ids.uid_for_type("S1", "equipment", "equipment.id", "S1");
        assert_eq!(quads.len(), 2);
    }
}
