use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Value};
use tracing::warn;

use crate::error::ClosureTreeError;
use crate::node::{NodeId, NodeRef, TreeNode};
use crate::sql;

/// Bulk record lookup for one node kind.
#[async_trait]
pub trait KindLookup<I, N>: Send + Sync {
    /// Fetch the records with the given ids, keyed by id. Missing ids are
    /// simply absent from the result.
    async fn lookup_by_ids(
        &self,
        conn: &DatabaseConnection,
        ids: &[I],
    ) -> Result<Vec<(I, N)>, ClosureTreeError>;
}

/// [`KindLookup`] for a SeaORM model implementing [`TreeNode`].
pub struct ModelLookup<M>(PhantomData<fn() -> M>);

impl<M> ModelLookup<M> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<M> Default for ModelLookup<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M, N> KindLookup<M::Id, N> for ModelLookup<M>
where
    M: TreeNode + sea_orm::FromQueryResult,
    N: From<M> + Send + 'static,
    <M::Entity as EntityTrait>::Column: Send + Sync,
{
    async fn lookup_by_ids(
        &self,
        conn: &DatabaseConnection,
        ids: &[M::Id],
    ) -> Result<Vec<(M::Id, N)>, ClosureTreeError> {
        let values: Vec<Value> = ids.iter().cloned().map(Into::into).collect();
        let models = M::Entity::find()
            .filter(M::id_column().is_in(values))
            .all(conn)
            .await?;
        Ok(models
            .into_iter()
            .map(|model| (model.node_id(), N::from(model)))
            .collect())
    }
}

/// Registry mapping kind tags to their record lookups.
///
/// Populated while wiring up the repository; resolution never looks types up
/// by name at query time.
pub struct KindRegistry<I, N> {
    lookups: HashMap<String, Arc<dyn KindLookup<I, N>>>,
}

impl<I, N> Clone for KindRegistry<I, N> {
    fn clone(&self) -> Self {
        Self {
            lookups: self.lookups.clone(),
        }
    }
}

impl<I, N> fmt::Debug for KindRegistry<I, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.lookups.keys().collect();
        kinds.sort();
        f.debug_struct("KindRegistry").field("kinds", &kinds).finish()
    }
}

impl<I, N> Default for KindRegistry<I, N> {
    fn default() -> Self {
        Self {
            lookups: HashMap::new(),
        }
    }
}

impl<I: NodeId, N: Send + 'static> KindRegistry<I, N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lookup for `tag`, replacing any earlier one.
    pub fn register(
        mut self,
        tag: impl Into<String>,
        lookup: impl KindLookup<I, N> + 'static,
    ) -> Self {
        self.lookups.insert(tag.into(), Arc::new(lookup));
        self
    }

    /// Register the SeaORM model `M` under its [`TreeNode::KIND`].
    pub fn register_model<M>(self) -> Self
    where
        M: TreeNode<Id = I> + sea_orm::FromQueryResult,
        N: From<M>,
        <M::Entity as EntityTrait>::Column: Send + Sync,
    {
        self.register(M::KIND, ModelLookup::<M>::new())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.lookups.contains_key(tag)
    }

    /// Resolve refs to typed nodes, one bulk lookup per kind.
    ///
    /// Results follow the order of `refs`. Kinds absent from `refs` are never
    /// consulted; a kind present in `refs` without a registered lookup is an
    /// [`ClosureTreeError::UnknownKind`].
    pub async fn resolve(
        &self,
        conn: &DatabaseConnection,
        refs: &[NodeRef<I>],
    ) -> Result<Vec<N>, ClosureTreeError> {
        let mut found = self.resolve_keyed(conn, refs).await?;
        let mut nodes = Vec::with_capacity(found.len());
        for node_ref in refs {
            match found.remove(node_ref) {
                Some(node) => nodes.push(node),
                None => warn!(node = %node_ref, "hierarchy row references a missing record"),
            }
        }
        Ok(nodes)
    }

    /// Like [`resolve`](Self::resolve), keyed by ref instead of ordered.
    pub async fn resolve_keyed(
        &self,
        conn: &DatabaseConnection,
        refs: &[NodeRef<I>],
    ) -> Result<HashMap<NodeRef<I>, N>, ClosureTreeError> {
        let mut found: HashMap<NodeRef<I>, N> = HashMap::with_capacity(refs.len());
        for (tag, ids) in sql::group_by_kind(refs) {
            let lookup = self
                .lookups
                .get(tag)
                .ok_or_else(|| ClosureTreeError::UnknownKind(tag.to_owned()))?;
            let ids: Vec<I> = ids.into_iter().cloned().collect();
            for (id, node) in lookup.lookup_by_ids(conn, &ids).await? {
                found.insert(NodeRef::new(tag, id), node);
            }
        }
        Ok(found)
    }

    /// Resolve a single ref.
    pub async fn resolve_one(
        &self,
        conn: &DatabaseConnection,
        node: &NodeRef<I>,
    ) -> Result<Option<N>, ClosureTreeError> {
        let mut nodes = self.resolve(conn, std::slice::from_ref(node)).await?;
        Ok(nodes.pop())
    }
}
