//! Dependency tree expansion
//!
//! Expands the adjacency depth-first into a tree rooted at a synthetic
//! `ROOT` node. Cycle detection is path-scoped: every branch carries its own
//! copy of the ancestor names, so a workload reached again through an
//! unrelated sibling branch is expanded in full while a workload reached again
//! through its own ancestors is attached as a circular leaf.
//!
//! Children are keyed by name, so repeated edges collapse into one child.
//! Repeated edges are still *expanded* once per occurrence; the builder
//! counts expansions so the cost is visible in logs.

mod printer;

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::graph::{Adjacency, DestinationMetadata};

pub use printer::{print_tree, render_tree, write_tree};

/// Names on the path from the top of the tree to the current node
pub type AncestorPath = HashSet<String>;

/// A workload in the dependency tree
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    /// Workload name
    pub name: String,
    /// Metadata of the edge that introduced this node
    pub metadata: DestinationMetadata,
    /// Children keyed (and ordered) by name
    pub children: BTreeMap<String, Node>,
    /// Whether this node closes a cycle back to one of its ancestors
    pub is_circular: bool,
    sentinel: bool,
}

impl Node {
    /// Create a detached node
    pub fn new(name: impl Into<String>, metadata: DestinationMetadata) -> Self {
        Self {
            name: name.into(),
            metadata,
            ..Default::default()
        }
    }

    /// Create the synthetic `ROOT` node
    pub fn sentinel() -> Self {
        Self {
            name: crate::ROOT_NODE_NAME.to_string(),
            sentinel: true,
            ..Default::default()
        }
    }

    /// Whether this is the synthetic `ROOT` node
    pub fn is_sentinel(&self) -> bool {
        self.sentinel
    }

    /// Attach a child by name, returning the existing child if present
    pub fn add_child(
        &mut self,
        name: impl Into<String>,
        metadata: DestinationMetadata,
    ) -> &mut Node {
        let name = name.into();
        self.children
            .entry(name.clone())
            .or_insert_with(|| Node::new(name, metadata))
    }

    /// Look up a direct child
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    /// Total nodes in this subtree, including this one
    pub fn size(&self) -> usize {
        1 + self.children.values().map(Node::size).sum::<usize>()
    }
}

/// Depth-first tree expansion over an adjacency
pub struct TreeBuilder<'a> {
    adjacency: &'a Adjacency,
    expansions: usize,
}

impl<'a> TreeBuilder<'a> {
    /// Create a builder reading from `adjacency`
    pub fn new(adjacency: &'a Adjacency) -> Self {
        Self {
            adjacency,
            expansions: 0,
        }
    }

    /// Number of `build_tree` visits so far (duplicate edges included)
    pub fn expansions(&self) -> usize {
        self.expansions
    }

    /// Attach `node` under `parent` and expand its destinations
    ///
    /// If `node` is already on `ancestors` it is attached with
    /// `is_circular` set and not expanded.
    pub fn build_tree(&mut self, node: Node, parent: &mut Node, ancestors: &AncestorPath) {
        self.expansions += 1;

        if ancestors.contains(&node.name) {
            let circular = parent.add_child(node.name, node.metadata);
            circular.is_circular = true;
            return;
        }

        let mut path = ancestors.clone();
        path.insert(node.name.clone());

        let adjacency = self.adjacency;
        let destinations = adjacency.destinations(&node.name);
        let current = parent.add_child(node.name, node.metadata);

        for dest in destinations {
            self.build_tree(Node::new(dest.name.clone(), dest.clone()), current, &path);
        }
    }

    /// Build a fresh tree with one branch per root under a `ROOT` sentinel
    pub fn build_from_roots<S: AsRef<str>>(&mut self, roots: &[S]) -> Node {
        let mut root = Node::sentinel();
        for name in roots {
            let node = Node::new(name.as_ref(), DestinationMetadata::default());
            self.build_tree(node, &mut root, &AncestorPath::new());
        }
        root
    }
}

/// Build the dependency tree for `roots`
pub fn build_dependency_tree<S: AsRef<str>>(adjacency: &Adjacency, roots: &[S]) -> Node {
    let mut builder = TreeBuilder::new(adjacency);
    let root = builder.build_from_roots(roots);
    debug!(
        roots = roots.len(),
        nodes = root.size() - 1,
        expansions = builder.expansions(),
        "built dependency tree"
    );
    root
}

/// Build the dependency tree starting from one named workload
///
/// Useful when the graph has no roots because every workload sits on a cycle.
pub fn build_tree_from(adjacency: &Adjacency, workload: &str) -> Node {
    build_dependency_tree(adjacency, &[workload])
}
