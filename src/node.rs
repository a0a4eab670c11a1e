use std::fmt;
use std::hash::Hash;

use sea_orm::sea_query::Nullable;
use sea_orm::{EntityTrait, TryGetable, Value};
use serde::{Deserialize, Serialize};

use crate::config::NodeKind;

/// Key type usable as a node identifier.
///
/// Blanket-implemented for every type SeaORM can bind and read back, such as
/// `i32`, `i64`, `String` or `Uuid`.
pub trait NodeId:
    Clone
    + Eq
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + Into<Value>
    + Nullable
    + TryGetable
    + 'static
{
}

impl<T> NodeId for T where
    T: Clone
        + Eq
        + Ord
        + Hash
        + fmt::Debug
        + fmt::Display
        + Send
        + Sync
        + Into<Value>
        + Nullable
        + TryGetable
        + 'static
{
}

/// A reference to a node: the record kind it lives in plus its identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef<I> {
    pub kind: String,
    pub id: I,
}

impl<I> NodeRef<I> {
    pub fn new(kind: impl Into<String>, id: I) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl<I: fmt::Display> fmt::Display for NodeRef<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// One row of the closure table.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HierarchyEdge<I> {
    pub ancestor: NodeRef<I>,
    pub descendant: NodeRef<I>,
    pub generations: i32,
}

impl<I: Clone> HierarchyEdge<I> {
    pub fn new(ancestor: NodeRef<I>, descendant: NodeRef<I>, generations: i32) -> Self {
        Self {
            ancestor,
            descendant,
            generations,
        }
    }

    pub fn self_edge(node: &NodeRef<I>) -> Self {
        Self::new(node.clone(), node.clone(), 0)
    }

    pub fn is_self_edge(&self) -> bool
    where
        I: PartialEq,
    {
        self.generations == 0 && self.ancestor == self.descendant
    }
}

/// Trait implemented by SeaORM `Model` types that participate in a hierarchy.
///
/// Implementations are normally provided by `#[derive(TreeNode)]`.
pub trait TreeNode: Clone + Send + Sync + 'static {
    type Entity: EntityTrait<Model = Self>;
    type Id: NodeId;

    /// Type tag stored in the closure table for rows of this model.
    const KIND: &'static str;

    /// Table layout used for parent-pointer reads and writes.
    fn node_kind() -> NodeKind;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;

    fn node_id(&self) -> Self::Id;
    fn parent_ref(&self) -> Option<NodeRef<Self::Id>>;

    fn node_ref(&self) -> NodeRef<Self::Id> {
        NodeRef::new(Self::KIND, self.node_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_refs_display_kind_and_id() {
        assert_eq!(NodeRef::new("Task", 12).to_string(), "Task#12");
    }

    #[test]
    fn self_edge_has_zero_generations() {
        let node = NodeRef::new("Project", 3_i64);
        let edge = HierarchyEdge::self_edge(&node);
        assert!(edge.is_self_edge());
        assert!(!HierarchyEdge::new(NodeRef::new("Project", 1_i64), node, 1).is_self_edge());
    }
}
