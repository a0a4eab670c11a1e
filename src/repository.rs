use std::sync::Arc;

use sea_orm::{ConnectionTrait, DatabaseConnection};

use crate::config::{ClosureTreeConfig, DependentBehavior};
use crate::error::ClosureTreeError;
use crate::hash_tree::{HashTree, HashTreeNode};
use crate::lock::{ensure_supported, LockedTransaction};
use crate::node::{NodeId, NodeRef, TreeNode};
use crate::query::{HierarchyQuery, KindScope};
use crate::resolver::KindRegistry;
use crate::store::HierarchyStore;
use crate::tracker::{ParentChange, ParentPointerTracker};

/// Repository exposing the closure-table operations of one hierarchy.
///
/// `I` is the id type shared by every kind in the hierarchy and `N` the typed
/// node that refs resolve into (a single model, or an enum over several).
#[derive(Debug)]
pub struct ClosureTreeRepository<I, N> {
    config: Arc<ClosureTreeConfig>,
    store: HierarchyStore<I>,
    query: HierarchyQuery<I>,
    tracker: ParentPointerTracker<I>,
    registry: KindRegistry<I, N>,
}

impl<I: Clone, N> Clone for ClosureTreeRepository<I, N> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: self.store.clone(),
            query: self.query.clone(),
            tracker: self.tracker.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<I, N> ClosureTreeRepository<I, N>
where
    I: NodeId,
    N: Send + 'static,
{
    pub fn new(config: ClosureTreeConfig, registry: KindRegistry<I, N>) -> Self {
        let config = Arc::new(config);
        let store = HierarchyStore::new(Arc::clone(&config));
        Self {
            query: HierarchyQuery::new(store.clone()),
            tracker: ParentPointerTracker::new(store.clone()),
            store,
            config,
            registry,
        }
    }

    pub fn config(&self) -> &ClosureTreeConfig {
        &self.config
    }

    pub fn store(&self) -> &HierarchyStore<I> {
        &self.store
    }

    pub fn query(&self) -> &HierarchyQuery<I> {
        &self.query
    }

    pub fn tracker(&self) -> &ParentPointerTracker<I> {
        &self.tracker
    }

    pub fn registry(&self) -> &KindRegistry<I, N> {
        &self.registry
    }

    /// Open a transaction for writing nodes and their closure rows together.
    pub async fn begin(
        &self,
        db: &DatabaseConnection,
    ) -> Result<LockedTransaction, ClosureTreeError> {
        LockedTransaction::acquire(&self.config, db).await
    }

    /// Fold `node`'s persisted parent pointer into the closure table.
    ///
    /// Run on the connection that wrote the node, before commit.
    pub async fn after_save<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<ParentChange<I>, ClosureTreeError> {
        ensure_supported(conn)?;
        self.tracker.track(conn, node).await
    }

    pub async fn after_save_model<C, M>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<ParentChange<I>, ClosureTreeError>
    where
        C: ConnectionTrait,
        M: TreeNode<Id = I>,
    {
        self.after_save(conn, &model.node_ref()).await
    }

    /// Create the closure rows of an already persisted node.
    pub async fn insert_node(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        parent: Option<&NodeRef<I>>,
    ) -> Result<(), ClosureTreeError> {
        let txn = self.begin(db).await?;
        let result = self.store.insert_node(txn.connection(), node, parent).await;
        txn.finish(result).await
    }

    /// Point `node` at `new_parent` and update the closure table.
    pub async fn move_node(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        new_parent: Option<&NodeRef<I>>,
    ) -> Result<ParentChange<I>, ClosureTreeError> {
        let txn = self.begin(db).await?;
        let result = self.move_node_in(txn.connection(), node, new_parent).await;
        txn.finish(result).await
    }

    /// [`move_node`](Self::move_node) on a caller-managed transaction.
    pub async fn move_node_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        new_parent: Option<&NodeRef<I>>,
    ) -> Result<ParentChange<I>, ClosureTreeError> {
        ensure_supported(conn)?;
        self.store.ensure_can_move(conn, node, new_parent).await?;
        self.store.tables().write_parent(conn, node, new_parent).await?;
        self.tracker.track(conn, node).await
    }

    /// Delete `node` using the configured [`DependentBehavior`].
    pub async fn delete_node(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        self.delete_node_with(db, node, self.config.dependent_behavior())
            .await
    }

    pub async fn delete_node_with(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        behavior: DependentBehavior,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        let txn = self.begin(db).await?;
        let result = self.store.delete_node(txn.connection(), node, behavior).await;
        txn.finish(result).await
    }

    /// Recompute the whole closure table in one transaction.
    pub async fn rebuild_all(&self, db: &DatabaseConnection) -> Result<usize, ClosureTreeError> {
        let txn = self.begin(db).await?;
        let result = self.store.rebuild_all(txn.connection()).await;
        txn.finish(result).await
    }

    pub async fn rebuild_subtree(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<usize, ClosureTreeError> {
        let txn = self.begin(db).await?;
        let result = self.store.rebuild_subtree(txn.connection(), node).await;
        txn.finish(result).await
    }

    /// Check the stored closure against the parent pointers.
    pub async fn verify(&self, db: &DatabaseConnection) -> Result<(), ClosureTreeError> {
        ensure_supported(db)?;
        self.store.verify(db).await
    }

    pub async fn parent(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Option<N>, ClosureTreeError> {
        ensure_supported(db)?;
        match self.query.parent(db, node).await? {
            Some(parent) => self.registry.resolve_one(db, &parent).await,
            None => Ok(None),
        }
    }

    pub async fn children(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.children(db, node, KindScope::Own).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn poly_children(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.children(db, node, KindScope::All).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn ancestors(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.ancestors(db, node, KindScope::Own).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn self_and_ancestors(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.self_and_ancestors(db, node, KindScope::Own).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn poly_ancestors(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.ancestors(db, node, KindScope::All).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn poly_self_and_ancestors(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.self_and_ancestors(db, node, KindScope::All).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn descendants(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.descendants(db, node, KindScope::Own).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn self_and_descendants(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self
            .query
            .self_and_descendants(db, node, KindScope::Own)
            .await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn poly_descendants(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.descendants(db, node, KindScope::All).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn poly_self_and_descendants(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self
            .query
            .self_and_descendants(db, node, KindScope::All)
            .await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn siblings(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.siblings(db, node, KindScope::Own).await?;
        self.registry.resolve(db, &refs).await
    }

    pub async fn self_and_siblings(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.self_and_siblings(db, node, KindScope::Own).await?;
        self.registry.resolve(db, &refs).await
    }

    /// Farthest ancestor of the node's own kind.
    pub async fn root(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<N, ClosureTreeError> {
        ensure_supported(db)?;
        let root = self.query.root(db, node, KindScope::Own).await?;
        self.resolve_required(db, &root).await
    }

    /// Farthest ancestor of any kind.
    pub async fn poly_root(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<N, ClosureTreeError> {
        ensure_supported(db)?;
        let root = self.query.root(db, node, KindScope::All).await?;
        self.resolve_required(db, &root).await
    }

    pub async fn leaves(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.leaves(db, node, KindScope::Own).await?;
        self.registry.resolve(db, &refs).await
    }

    /// Parentless nodes of every kind.
    pub async fn roots(&self, db: &DatabaseConnection) -> Result<Vec<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let refs = self.query.roots(db).await?;
        self.registry.resolve(db, &refs).await
    }

    /// Proper ancestors of the node's own kind.
    pub async fn depth(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<usize, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.depth(db, node, KindScope::Own).await
    }

    /// Proper ancestors of any kind.
    pub async fn poly_depth(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<usize, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.depth(db, node, KindScope::All).await
    }

    pub async fn is_leaf(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_leaf(db, node).await
    }

    pub async fn is_root(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_root(db, node).await
    }

    pub async fn hash_tree(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        limit_depth: Option<usize>,
    ) -> Result<HashTree<N>, ClosureTreeError> {
        self.resolved_tree(db, node, KindScope::Own, limit_depth).await
    }

    pub async fn poly_hash_tree(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        limit_depth: Option<usize>,
    ) -> Result<HashTree<N>, ClosureTreeError> {
        self.resolved_tree(db, node, KindScope::All, limit_depth).await
    }

    pub async fn is_ancestor_of(
        &self,
        db: &DatabaseConnection,
        ancestor: &NodeRef<I>,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_ancestor_of(db, ancestor, node).await
    }

    pub async fn is_descendant_of(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        ancestor: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_descendant_of(db, node, ancestor).await
    }

    pub async fn is_parent_of(
        &self,
        db: &DatabaseConnection,
        parent: &NodeRef<I>,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_parent_of(db, parent, node).await
    }

    pub async fn is_child_of(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        parent: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_child_of(db, node, parent).await
    }

    pub async fn is_root_of(
        &self,
        db: &DatabaseConnection,
        root: &NodeRef<I>,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_root_of(db, root, node).await
    }

    pub async fn is_family_of(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        other: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.is_family_of(db, node, other).await
    }

    pub async fn find_by_path<S: AsRef<str>>(
        &self,
        db: &DatabaseConnection,
        segments: &[S],
    ) -> Result<Option<N>, ClosureTreeError> {
        ensure_supported(db)?;
        match self.query.find_by_path(db, segments).await? {
            Some(node) => self.registry.resolve_one(db, &node).await,
            None => Ok(None),
        }
    }

    pub async fn ancestry_path(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Vec<String>, ClosureTreeError> {
        ensure_supported(db)?;
        self.query.ancestry_path(db, node).await
    }

    async fn resolved_tree(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
        scope: KindScope,
        limit_depth: Option<usize>,
    ) -> Result<HashTree<N>, ClosureTreeError> {
        ensure_supported(db)?;
        let tree = self.query.hash_tree(db, node, scope, limit_depth).await?;

        let mut refs = Vec::with_capacity(tree.len());
        collect_refs(&tree.roots, &mut refs);
        let mut resolved = self.registry.resolve_keyed(db, &refs).await?;
        Ok(tree.filter_map(|node_ref| resolved.remove(&node_ref)))
    }

    async fn resolve_required(
        &self,
        db: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<N, ClosureTreeError> {
        self.registry
            .resolve_one(db, node)
            .await?
            .ok_or_else(|| ClosureTreeError::NodeNotFound(node.to_string()))
    }
}

fn collect_refs<I: Clone>(nodes: &[HashTreeNode<NodeRef<I>>], refs: &mut Vec<NodeRef<I>>) {
    for node in nodes {
        refs.push(node.node.clone());
        collect_refs(&node.children, refs);
    }
}
