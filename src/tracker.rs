use sea_orm::ConnectionTrait;
use tracing::debug;

use crate::config::MaintenanceStrategy;
use crate::error::ClosureTreeError;
use crate::node::{NodeId, NodeRef};
use crate::store::HierarchyStore;

/// What persisting a node means for the closure table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParentChange<I> {
    /// The node has no hierarchy rows yet.
    Created { parent: Option<NodeRef<I>> },
    /// The stored parent pointer differs from the parent recorded in the closure table.
    Moved {
        from: Option<NodeRef<I>>,
        to: Option<NodeRef<I>>,
    },
    Unchanged,
}

impl<I: NodeId> ParentChange<I> {
    /// Classify a save given the closure table's view of the node.
    ///
    /// `recorded` is `None` when the node has no self-edge, otherwise the
    /// parent recorded by its `generations = 1` edge.
    pub fn classify(
        node: &NodeRef<I>,
        recorded: Option<Option<NodeRef<I>>>,
        current: Option<NodeRef<I>>,
    ) -> Result<Self, ClosureTreeError> {
        if current.as_ref() == Some(node) {
            return Err(ClosureTreeError::cycle(node, node));
        }

        Ok(match recorded {
            None => ParentChange::Created { parent: current },
            Some(from) if from == current => ParentChange::Unchanged,
            Some(from) => ParentChange::Moved { from, to: current },
        })
    }
}

/// Folds persisted parent pointers into the closure table.
///
/// Run it on the same transaction that wrote the node, after the node's id
/// is assigned and before commit.
#[derive(Debug, Clone)]
pub struct ParentPointerTracker<I> {
    store: HierarchyStore<I>,
}

impl<I: NodeId> ParentPointerTracker<I> {
    pub fn new(store: HierarchyStore<I>) -> Self {
        Self { store }
    }

    /// Compare `node`'s stored parent pointer with the closure table.
    pub async fn detect<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<ParentChange<I>, ClosureTreeError> {
        let current = self.store.tables().read_parent(conn, node).await?;
        let recorded = if self.store.has_self_edge(conn, node).await? {
            Some(self.store.recorded_parent(conn, node).await?)
        } else {
            None
        };
        ParentChange::classify(node, recorded, current)
    }

    /// Detect the change for `node` and apply it.
    pub async fn track<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<ParentChange<I>, ClosureTreeError> {
        let change = self.detect(conn, node).await?;
        self.apply(conn, node, &change).await?;
        Ok(change)
    }

    pub async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        change: &ParentChange<I>,
    ) -> Result<(), ClosureTreeError> {
        match change {
            ParentChange::Created { parent } => {
                self.store.insert_node(conn, node, parent.as_ref()).await
            }
            ParentChange::Moved { from, to } => {
                debug!(
                    %node,
                    from = ?from.as_ref().map(ToString::to_string),
                    to = ?to.as_ref().map(ToString::to_string),
                    "parent changed"
                );
                match self.store_strategy() {
                    MaintenanceStrategy::Incremental => {
                        self.store.move_node(conn, node, to.as_ref()).await
                    }
                    MaintenanceStrategy::Rebuild => {
                        self.store.ensure_can_move(conn, node, to.as_ref()).await?;
                        self.store.rebuild_subtree(conn, node).await.map(|_| ())
                    }
                }
            }
            ParentChange::Unchanged => Ok(()),
        }
    }

    fn store_strategy(&self) -> MaintenanceStrategy {
        self.store.tables().config().maintenance()
    }
}
