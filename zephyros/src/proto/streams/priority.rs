use std::collections::HashMap;

use crate::frame::{StreamDependency, StreamId};

/// Default wire weight (effective weight 16) for streams that never received
/// an explicit priority.
pub const DEFAULT_WEIGHT: u8 = 15;

/// The stream dependency tree, kept as an arena keyed by stream id.
///
/// Edges are id-valued parent pointers plus child id lists; stream id zero is
/// the implicit root. Reparenting a stream under one of its own descendants
/// first moves that descendant up to the stream's old parent, so the tree
/// never cycles.
#[derive(Debug, Default)]
pub struct PriorityTree {
    nodes: HashMap<StreamId, Node>,
}

#[derive(Debug)]
struct Node {
    parent: StreamId,
    weight: u8,
    children: Vec<StreamId>,
}

impl PriorityTree {
    pub fn new() -> PriorityTree {
        PriorityTree {
            nodes: HashMap::new(),
        }
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent(&self, id: StreamId) -> Option<StreamId> {
        self.nodes.get(&id).map(|n| n.parent)
    }

    pub fn weight(&self, id: StreamId) -> Option<u8> {
        self.nodes.get(&id).map(|n| n.weight)
    }

    pub fn children(&self, id: StreamId) -> Vec<StreamId> {
        if id.is_zero() {
            return self.root_children();
        }
        self.nodes
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn root_children(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent.is_zero())
            .map(|(&id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Ensures a node for `id` exists, as a child of the root with default
    /// weight.
    pub fn ensure(&mut self, id: StreamId) {
        debug_assert!(!id.is_zero());
        self.nodes.entry(id).or_insert(Node {
            parent: StreamId::ZERO,
            weight: DEFAULT_WEIGHT,
            children: Vec::new(),
        });
    }

    /// Applies a PRIORITY update for `id`.
    pub fn reprioritize(&mut self, id: StreamId, dep: StreamDependency) {
        debug_assert!(dep.dependency_id() != id);

        self.ensure(id);
        let new_parent = dep.dependency_id();
        if !new_parent.is_zero() {
            self.ensure(new_parent);
        }

        // Reparenting under a descendant would create a cycle; the descendant
        // is first moved up to this stream's current parent.
        if self.is_descendant(id, new_parent) {
            let grandparent = self.nodes[&id].parent;
            self.move_node(new_parent, grandparent);
        }

        self.move_node(id, new_parent);
        self.nodes.get_mut(&id).expect("node").weight = dep.weight();

        if dep.is_exclusive() {
            // Adopt every other child of the new parent.
            let siblings: Vec<StreamId> = self
                .children(new_parent)
                .into_iter()
                .filter(|&sibling| sibling != id)
                .collect();

            for sibling in siblings {
                self.move_node(sibling, id);
            }
        }

        tracing::trace!("reprioritize; id={:?} dep={:?}", id, dep);
    }

    /// Drops a stream from the tree; its children move up to its parent.
    pub fn remove(&mut self, id: StreamId) {
        let node = match self.nodes.remove(&id) {
            Some(node) => node,
            None => return,
        };

        for child in node.children {
            if let Some(c) = self.nodes.get_mut(&child) {
                c.parent = node.parent;
            }
            if let Some(p) = self.nodes.get_mut(&node.parent) {
                p.children.push(child);
            }
        }

        if let Some(p) = self.nodes.get_mut(&node.parent) {
            p.children.retain(|&c| c != id);
        }
    }

    fn is_descendant(&self, ancestor: StreamId, id: StreamId) -> bool {
        let mut current = id;
        while let Some(node) = self.nodes.get(&current) {
            if node.parent == ancestor {
                return true;
            }
            current = node.parent;
        }
        false
    }

    fn move_node(&mut self, id: StreamId, new_parent: StreamId) {
        let old_parent = self.nodes[&id].parent;

        if let Some(p) = self.nodes.get_mut(&old_parent) {
            p.children.retain(|&c| c != id);
        }

        self.nodes.get_mut(&id).expect("node").parent = new_parent;

        if let Some(p) = self.nodes.get_mut(&new_parent) {
            p.children.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(id: u32, weight: u8, exclusive: bool) -> StreamDependency {
        StreamDependency::new(StreamId::from(id), weight, exclusive)
    }

    fn id(n: u32) -> StreamId {
        StreamId::from(n)
    }

    #[test]
    fn default_placement_under_root() {
        let mut tree = PriorityTree::new();
        tree.ensure(id(1));

        assert_eq!(tree.parent(id(1)), Some(StreamId::ZERO));
        assert_eq!(tree.weight(id(1)), Some(DEFAULT_WEIGHT));
    }

    #[test]
    fn simple_dependency_chain() {
        let mut tree = PriorityTree::new();
        tree.reprioritize(id(3), dep(1, 10, false));
        tree.reprioritize(id(5), dep(3, 20, false));

        assert_eq!(tree.parent(id(3)), Some(id(1)));
        assert_eq!(tree.parent(id(5)), Some(id(3)));
        assert_eq!(tree.weight(id(5)), Some(20));
        assert_eq!(tree.children(id(1)), vec![id(3)]);
    }

    #[test]
    fn exclusive_adopts_siblings() {
        let mut tree = PriorityTree::new();
        tree.reprioritize(id(3), dep(1, 15, false));
        tree.reprioritize(id(5), dep(1, 15, false));
        tree.reprioritize(id(7), dep(1, 15, true));

        // 7 is now the only child of 1; former siblings hang off 7.
        assert_eq!(tree.children(id(1)), vec![id(7)]);
        let mut adopted = tree.children(id(7));
        adopted.sort();
        assert_eq!(adopted, vec![id(3), id(5)]);
        assert_eq!(tree.parent(id(3)), Some(id(7)));
    }

    #[test]
    fn reparenting_under_descendant_moves_descendant_first() {
        // 1 <- 3 <- 5; then reprioritize 1 to depend on 5.
        let mut tree = PriorityTree::new();
        tree.reprioritize(id(3), dep(1, 15, false));
        tree.reprioritize(id(5), dep(3, 15, false));

        tree.reprioritize(id(1), dep(5, 15, false));

        // 5 took 1's old place under the root; no cycle.
        assert_eq!(tree.parent(id(5)), Some(StreamId::ZERO));
        assert_eq!(tree.parent(id(1)), Some(id(5)));
        assert_eq!(tree.parent(id(3)), Some(id(1)));

        // Walking up from any node terminates at the root.
        for start in [1u32, 3, 5] {
            let mut current = id(start);
            let mut hops = 0;
            while let Some(parent) = tree.parent(current) {
                assert!(hops < 10, "cycle detected");
                hops += 1;
                if parent.is_zero() {
                    break;
                }
                current = parent;
            }
        }
    }

    #[test]
    fn removal_reparents_children() {
        let mut tree = PriorityTree::new();
        tree.reprioritize(id(3), dep(1, 15, false));
        tree.reprioritize(id(5), dep(3, 15, false));
        tree.reprioritize(id(7), dep(3, 15, false));

        tree.remove(id(3));

        assert_eq!(tree.parent(id(5)), Some(id(1)));
        assert_eq!(tree.parent(id(7)), Some(id(1)));
        let mut children = tree.children(id(1));
        children.sort();
        assert_eq!(children, vec![id(5), id(7)]);
    }
}
