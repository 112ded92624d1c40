//! Handle-indexed watch tree of one attached process.
//!
//! The tree keeps a flat `handle -> node` map and threads the hierarchy
//! through the nodes themselves (parent, first/last child, prev/next
//! sibling). Insert and remove are O(1) map operations plus O(1) link
//! updates; children stay in insertion order.
//!
//! Invariant: a handle is in the map if and only if its node is linked
//! either into the root list or into exactly one parent's child list.
//! Every mutation updates both sides before returning.

use std::collections::HashMap;

use crate::error::{DomainError, DomainResult};
use crate::watch::{NewWatch, WatchHandle, WatchObject, WatchView};

/// Maximum nesting depth of categories.
///
/// Views and serialization walk the tree recursively; this bounds the
/// recursion depth regardless of what a client sends.
pub const MAX_DEPTH: usize = 128;

/// Watch objects of one process.
#[derive(Debug, Default)]
pub struct WatchTree {
    nodes: HashMap<WatchHandle, WatchObject>,
    depths: HashMap<WatchHandle, usize>,
    first_root: Option<WatchHandle>,
    last_root: Option<WatchHandle>,
    /// Number of times each original name has been used.
    name_counts: HashMap<String, u32>,
    /// Serial handed to the most recent insertion.
    last_serial: u64,
}

/// Nodes detached by [`WatchTree::remove`].
#[derive(Debug)]
pub struct RemovedSubtree {
    /// The node that was asked for.
    pub root: WatchObject,
    /// Nodes that were below it, deepest first (children before parents).
    pub descendants: Vec<WatchObject>,
}

impl RemovedSubtree {
    /// All removed nodes, children before parents, the requested node last.
    pub fn into_post_order(self) -> impl Iterator<Item = WatchObject> {
        self.descendants.into_iter().chain(std::iter::once(self.root))
    }
}

impl WatchTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, handle: WatchHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub fn get(&self, handle: WatchHandle) -> Option<&WatchObject> {
        self.nodes.get(&handle)
    }

    pub fn get_mut(&mut self, handle: WatchHandle) -> Option<&mut WatchObject> {
        self.nodes.get_mut(&handle)
    }

    /// Iterates all nodes in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &WatchObject> {
        self.nodes.values()
    }

    /// Root-level nodes in insertion order.
    pub fn roots(&self) -> Siblings<'_> {
        Siblings {
            tree: self,
            next: self.first_root,
        }
    }

    /// Children of `handle` in insertion order (empty for unknown handles).
    pub fn children(&self, handle: WatchHandle) -> Siblings<'_> {
        Siblings {
            tree: self,
            next: self.nodes.get(&handle).and_then(|n| n.first_child),
        }
    }

    /// Inserts a node under `parent` (`None` = root set).
    ///
    /// The display name is de-duplicated against every name previously
    /// inserted into this tree: the first "X" stays "X", later ones become
    /// "X (1)", "X (2)", ... in insertion order.
    ///
    /// # Errors
    ///
    /// Fails without modifying the tree if the handle is 0 or already
    /// present, or if the parent is unknown or not a category.
    pub fn insert(&mut self, parent: Option<WatchHandle>, new: NewWatch) -> DomainResult<&WatchObject> {
        let handle = new.handle;

        if handle.is_root() {
            return Err(DomainError::ReservedHandle);
        }
        if self.nodes.contains_key(&handle) {
            return Err(DomainError::DuplicateHandle { handle });
        }

        let depth = match parent {
            None => 0,
            Some(parent) => {
                let node = self
                    .nodes
                    .get(&parent)
                    .ok_or(DomainError::ParentNotFound { parent })?;
                if !node.is_category() {
                    return Err(DomainError::ParentNotCategory { parent });
                }
                let depth = self.depths.get(&parent).copied().unwrap_or(0) + 1;
                if depth > MAX_DEPTH {
                    return Err(DomainError::TooDeep { parent, max: MAX_DEPTH });
                }
                depth
            }
        };

        let display_name = self.unique_name(&new.name);
        self.last_serial += 1;
        let mut object = WatchObject::new(new, display_name, self.last_serial);
        self.link_last(parent, &mut object);
        self.depths.insert(handle, depth);

        let inserted: &WatchObject = self.nodes.entry(handle).or_insert(object);
        Ok(inserted)
    }

    /// Removes a node and everything below it.
    ///
    /// Returns `None` (and changes nothing) if the handle is unknown, so a
    /// repeated removal is a no-op.
    pub fn remove(&mut self, handle: WatchHandle) -> Option<RemovedSubtree> {
        if !self.nodes.contains_key(&handle) {
            return None;
        }

        self.unlink(handle);

        // Pre-order walk of the subtree; reversed it puts every node
        // after all of its descendants.
        let mut order = Vec::new();
        let mut stack: Vec<WatchHandle> = self.children(handle).map(|c| c.handle()).collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            order.push(next);
            let mut kids: Vec<WatchHandle> = self.children(next).map(|c| c.handle()).collect();
            kids.reverse();
            stack.extend(kids);
        }

        let descendants = order
            .into_iter()
            .rev()
            .filter_map(|h| self.take(h))
            .collect();

        let root = self.take(handle)?;
        Some(RemovedSubtree { root, descendants })
    }

    /// Nested snapshot of the whole tree, roots in insertion order.
    pub fn snapshot(&self) -> Vec<WatchView> {
        self.roots().map(|node| self.view_subtree(node)).collect()
    }

    /// Nested snapshot of one node and its descendants.
    pub fn snapshot_of(&self, handle: WatchHandle) -> Option<WatchView> {
        self.nodes.get(&handle).map(|node| self.view_subtree(node))
    }

    fn view_subtree(&self, node: &WatchObject) -> WatchView {
        let mut view = node.view();
        view.children = self
            .children(node.handle())
            .map(|child| self.view_subtree(child))
            .collect();
        view
    }

    fn unique_name(&mut self, name: &str) -> String {
        match self.name_counts.get_mut(name) {
            Some(count) => {
                let unique = format!("{name} ({count})");
                *count += 1;
                unique
            }
            None => {
                self.name_counts.insert(name.to_string(), 1);
                name.to_string()
            }
        }
    }

    /// Appends `object` to the end of `parent`'s child list (or the roots).
    fn link_last(&mut self, parent: Option<WatchHandle>, object: &mut WatchObject) {
        let handle = object.handle();
        let previous_last = match parent {
            Some(p) => self.nodes.get(&p).and_then(|n| n.last_child),
            None => self.last_root,
        };

        object.parent = parent;
        object.prev_sibling = previous_last;
        object.next_sibling = None;

        match previous_last {
            Some(last) => {
                if let Some(node) = self.nodes.get_mut(&last) {
                    node.next_sibling = Some(handle);
                }
            }
            None => self.set_first(parent, Some(handle)),
        }
        self.set_last(parent, Some(handle));
    }

    /// Detaches `handle` from its sibling list, leaving it in the map.
    fn unlink(&mut self, handle: WatchHandle) {
        let Some(node) = self.nodes.get_mut(&handle) else {
            return;
        };
        let parent = node.parent;
        let prev = node.prev_sibling.take();
        let next = node.next_sibling.take();

        match prev {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.next_sibling = next;
                }
            }
            None => self.set_first(parent, next),
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes.get_mut(&n) {
                    node.prev_sibling = prev;
                }
            }
            None => self.set_last(parent, prev),
        }
    }

    /// Removes a node from the map, clearing its structural links.
    fn take(&mut self, handle: WatchHandle) -> Option<WatchObject> {
        self.depths.remove(&handle);
        let mut node = self.nodes.remove(&handle)?;
        node.prev_sibling = None;
        node.next_sibling = None;
        node.first_child = None;
        node.last_child = None;
        Some(node)
    }

    fn set_first(&mut self, parent: Option<WatchHandle>, value: Option<WatchHandle>) {
        match parent {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.first_child = value;
                }
            }
            None => self.first_root = value,
        }
    }

    fn set_last(&mut self, parent: Option<WatchHandle>, value: Option<WatchHandle>) {
        match parent {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.last_child = value;
                }
            }
            None => self.last_root = value,
        }
    }
}

/// Iterator over a sibling list.
pub struct Siblings<'a> {
    tree: &'a WatchTree,
    next: Option<WatchHandle>,
}

impl<'a> Iterator for Siblings<'a> {
    type Item = &'a WatchObject;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.next?;
        let node = self.tree.nodes.get(&handle)?;
        self.next = node.next_sibling;
        Some(node)
    }
}
