//! Dispatch tree of a transaction
//!
//! A record with nested forwards/includes is exposed as a tagged tree and
//! walked by a visitor:
//!
//! ```text
//! Dispatch(GET /shop)
//!   ├── Leaf(include /header.jsp)
//!   └── Dispatch(forward /cart.jsp)
//!         └── Leaf(include /footer.jsp)
//! ```

use super::models::{DispatchKind, DispatchRecord, TransactionRecord};

/// Borrowed view of a transaction or one of its dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef<'a> {
    Transaction(&'a TransactionRecord),
    Dispatch(&'a DispatchRecord),
}

impl<'a> NodeRef<'a> {
    pub fn uri(&self) -> &'a str {
        match self {
            NodeRef::Transaction(record) => &record.request.uri,
            NodeRef::Dispatch(dispatch) => &dispatch.uri,
        }
    }

    /// None for the top-level transaction
    pub fn dispatch_kind(&self) -> Option<DispatchKind> {
        match self {
            NodeRef::Transaction(_) => None,
            NodeRef::Dispatch(dispatch) => Some(dispatch.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionNode<'a> {
    Leaf(NodeRef<'a>),
    Dispatch {
        node: NodeRef<'a>,
        children: Vec<TransactionNode<'a>>,
    },
}

impl<'a> TransactionNode<'a> {
    pub fn node(&self) -> NodeRef<'a> {
        match self {
            TransactionNode::Leaf(node) => *node,
            TransactionNode::Dispatch { node, .. } => *node,
        }
    }

    pub fn children(&self) -> &[TransactionNode<'a>] {
        match self {
            TransactionNode::Leaf(_) => &[],
            TransactionNode::Dispatch { children, .. } => children,
        }
    }

    /// Depth-first, parent before children
    pub fn walk<V: NodeVisitor<'a>>(&self, visitor: &mut V) {
        self.walk_at(visitor, 0);
    }

    fn walk_at<V: NodeVisitor<'a>>(&self, visitor: &mut V, depth: usize) {
        match self {
            TransactionNode::Leaf(node) => visitor.visit_leaf(*node, depth),
            TransactionNode::Dispatch { node, children } => {
                visitor.enter_dispatch(*node, depth);
                for child in children {
                    child.walk_at(visitor, depth + 1);
                }
                visitor.leave_dispatch(*node, depth);
            }
        }
    }

    /// Number of nodes in the tree, including the root
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }
}

pub trait NodeVisitor<'a> {
    fn visit_leaf(&mut self, node: NodeRef<'a>, depth: usize);

    fn enter_dispatch(&mut self, node: NodeRef<'a>, depth: usize);

    fn leave_dispatch(&mut self, _node: NodeRef<'a>, _depth: usize) {}
}

pub fn build_tree(record: &TransactionRecord) -> TransactionNode<'_> {
    let node = NodeRef::Transaction(record);
    if record.dispatches.is_empty() {
        TransactionNode::Leaf(node)
    } else {
        TransactionNode::Dispatch {
            node,
            children: record.dispatches.iter().map(dispatch_node).collect(),
        }
    }
}

fn dispatch_node(dispatch: &DispatchRecord) -> TransactionNode<'_> {
    let node = NodeRef::Dispatch(dispatch);
    if dispatch.dispatches.is_empty() {
        TransactionNode::Leaf(node)
    } else {
        TransactionNode::Dispatch {
            node,
            children: dispatch.dispatches.iter().map(dispatch_node).collect(),
        }
    }
}
