use std::collections::HashMap;

use sea_orm::sea_query::{Alias, Condition, Expr, Func, Order, Query};
use sea_orm::ConnectionTrait;

use crate::error::ClosureTreeError;
use crate::hash_tree::{HashTree, TreeEntry};
use crate::node::{HierarchyEdge, NodeId, NodeRef};
use crate::records::NodeTables;
use crate::sql::{self, col};
use crate::store::HierarchyStore;

/// Which kinds a query returns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KindScope {
    /// Only nodes of the queried node's own kind.
    Own,
    /// Nodes of every kind sharing the hierarchy.
    All,
}

/// Read-side queries answered from the closure table and parent pointers.
#[derive(Debug, Clone)]
pub struct HierarchyQuery<I> {
    store: HierarchyStore<I>,
}

impl<I: NodeId> HierarchyQuery<I> {
    pub fn new(store: HierarchyStore<I>) -> Self {
        Self { store }
    }

    fn tables(&self) -> &NodeTables<I> {
        self.store.tables()
    }

    fn generations(&self) -> &str {
        &self.tables().config().hierarchy().generations
    }

    /// Edges with `descendant = node`, root first.
    pub async fn self_and_ancestor_edges<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        let t = self.tables().config().hierarchy();
        let mut condition = self.store.is_descendant(node);
        if scope == KindScope::Own {
            condition = condition.add(col(&t.ancestor_type).eq(node.kind.as_str()));
        }

        let mut select = self.store.select_edges();
        select
            .cond_where(condition)
            .order_by(Alias::new(&t.generations), Order::Desc);
        self.store.fetch_edges(conn, &select).await
    }

    /// Edges with `ancestor = node`, self first.
    pub async fn self_and_descendant_edges<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
        max_generations: Option<i32>,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        let t = self.tables().config().hierarchy();
        let mut condition = self.store.is_ancestor(node);
        if scope == KindScope::Own {
            condition = condition.add(col(&t.descendant_type).eq(node.kind.as_str()));
        }
        if let Some(max) = max_generations {
            condition = condition.add(col(&t.generations).lte(max));
        }

        let mut select = self.store.select_edges();
        select
            .cond_where(condition)
            .order_by(Alias::new(&t.generations), Order::Asc)
            .order_by(Alias::new(&t.descendant_type), Order::Asc)
            .order_by(Alias::new(&t.descendant_id), Order::Asc);
        self.store.fetch_edges(conn, &select).await
    }

    /// Root first, ending with `node`.
    pub async fn self_and_ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        Ok(self
            .self_and_ancestor_edges(conn, node, scope)
            .await?
            .into_iter()
            .map(|edge| edge.ancestor)
            .collect())
    }

    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        Ok(self
            .self_and_ancestor_edges(conn, node, scope)
            .await?
            .into_iter()
            .filter(|edge| edge.generations > 0)
            .map(|edge| edge.ancestor)
            .collect())
    }

    /// `node` first, then descendants by increasing generation.
    pub async fn self_and_descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        Ok(self
            .self_and_descendant_edges(conn, node, scope, None)
            .await?
            .into_iter()
            .map(|edge| edge.descendant)
            .collect())
    }

    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        Ok(self
            .self_and_descendant_edges(conn, node, scope, None)
            .await?
            .into_iter()
            .filter(|edge| edge.generations > 0)
            .map(|edge| edge.descendant)
            .collect())
    }

    /// The farthest ancestor of `node` within `scope`.
    pub async fn root<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<NodeRef<I>, ClosureTreeError> {
        let edges = self.self_and_ancestor_edges(conn, node, scope).await?;
        let Some(top) = edges.first() else {
            return Err(ClosureTreeError::integrity(format!(
                "{node} has no hierarchy rows"
            )));
        };

        let candidates = edges
            .iter()
            .take_while(|edge| edge.generations == top.generations)
            .count();
        if candidates > 1 {
            return Err(ClosureTreeError::integrity(format!(
                "{node} has {candidates} ancestors at generation {}",
                top.generations
            )));
        }
        Ok(top.ancestor.clone())
    }

    /// Number of proper ancestors within `scope`; equals `ancestors(node, scope).len()`.
    pub async fn depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<usize, ClosureTreeError> {
        let t = self.tables().config().hierarchy();
        let mut condition = self
            .store
            .is_descendant(node)
            .add(col(&t.generations).gt(0));
        if scope == KindScope::Own {
            condition = condition.add(col(&t.ancestor_type).eq(node.kind.as_str()));
        }

        let select = Query::select()
            .expr_as(
                Func::count(Expr::col(Alias::new(&t.generations))),
                Alias::new("depth"),
            )
            .from(Alias::new(&t.table))
            .cond_where(condition)
            .to_owned();
        let depth: i64 = match sql::query_one(conn, &select).await? {
            Some(row) => row.try_get("", "depth")?,
            None => 0,
        };
        Ok(usize::try_from(depth).unwrap_or_default())
    }

    /// True when no `generations = 1` edge starts at `node`.
    pub async fn is_leaf<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        let mut select = self.store.select_edges();
        select
            .cond_where(
                self.store
                    .is_ancestor(node)
                    .add(col(self.generations()).eq(1)),
            )
            .limit(1);
        Ok(sql::query_one(conn, &select).await?.is_none())
    }

    /// True when `node`'s parent pointer is null.
    pub async fn is_root<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        Ok(self.tables().read_parent(conn, node).await?.is_none())
    }

    pub async fn parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<Option<NodeRef<I>>, ClosureTreeError> {
        self.tables().read_parent(conn, node).await
    }

    /// Direct children by parent pointer, in each kind's configured order.
    pub async fn children<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        self.with_parent(conn, node, Some(node), scope).await
    }

    /// Nodes sharing `node`'s parent pointer, including `node`.
    pub async fn self_and_siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        let parent = self.tables().read_parent(conn, node).await?;
        self.with_parent(conn, node, parent.as_ref(), scope).await
    }

    pub async fn siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        let mut nodes = self.self_and_siblings(conn, node, scope).await?;
        nodes.retain(|sibling| sibling != node);
        Ok(nodes)
    }

    /// Nodes of every kind without a parent.
    pub async fn roots<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        self.tables().with_parent_any_kind(conn, None).await
    }

    /// Nodes in `node`'s subtree (itself included) that have no children.
    pub async fn leaves<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        let t = self.tables().config().hierarchy();
        let outer = Alias::new("d");
        let inner = Alias::new("c");

        let has_child = Query::select()
            .expr(Expr::val(1))
            .from_as(Alias::new(&t.table), inner.clone())
            .and_where(
                Expr::col((inner.clone(), Alias::new(&t.ancestor_id)))
                    .equals((outer.clone(), Alias::new(&t.descendant_id))),
            )
            .and_where(
                Expr::col((inner.clone(), Alias::new(&t.ancestor_type)))
                    .equals((outer.clone(), Alias::new(&t.descendant_type))),
            )
            .and_where(Expr::col((inner, Alias::new(&t.generations))).eq(1))
            .to_owned();

        let mut condition = Condition::all()
            .add(Expr::col((outer.clone(), Alias::new(&t.ancestor_id))).eq(sql::value(&node.id)))
            .add(Expr::col((outer.clone(), Alias::new(&t.ancestor_type))).eq(node.kind.as_str()))
            .add(Expr::exists(has_child).not());
        if scope == KindScope::Own {
            condition = condition.add(
                Expr::col((outer.clone(), Alias::new(&t.descendant_type))).eq(node.kind.as_str()),
            );
        }

        let select = Query::select()
            .columns([
                (outer.clone(), Alias::new(&t.ancestor_id)),
                (outer.clone(), Alias::new(&t.ancestor_type)),
                (outer.clone(), Alias::new(&t.descendant_id)),
                (outer.clone(), Alias::new(&t.descendant_type)),
                (outer.clone(), Alias::new(&t.generations)),
            ])
            .from_as(Alias::new(&t.table), outer.clone())
            .cond_where(condition)
            .order_by((outer.clone(), Alias::new(&t.generations)), Order::Asc)
            .order_by((outer.clone(), Alias::new(&t.descendant_type)), Order::Asc)
            .order_by((outer, Alias::new(&t.descendant_id)), Order::Asc)
            .to_owned();

        Ok(self
            .store
            .fetch_edges(conn, &select)
            .await?
            .into_iter()
            .map(|edge| edge.descendant)
            .collect())
    }

    /// Nested tree of `node`'s subtree, `limit_depth` levels deep (1 = only `node`).
    ///
    /// Under [`KindScope::Own`] each node hangs from its nearest ancestor of
    /// the same kind, so nodes of other kinds in between are skipped.
    pub async fn hash_tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        scope: KindScope,
        limit_depth: Option<usize>,
    ) -> Result<HashTree<NodeRef<I>>, ClosureTreeError> {
        if limit_depth == Some(0) {
            return Ok(HashTree::default());
        }
        let max_generations =
            limit_depth.map(|limit| i32::try_from(limit - 1).unwrap_or(i32::MAX));
        let edges = self
            .self_and_descendant_edges(conn, node, scope, max_generations)
            .await?;

        let below: Vec<NodeRef<I>> = edges
            .iter()
            .filter(|edge| edge.generations > 0)
            .map(|edge| edge.descendant.clone())
            .collect();
        let mut parents = self.nearest_ancestors(conn, &below, scope, &node.kind).await?;

        let entries = edges.into_iter().map(|edge| {
            let parent = if edge.generations == 0 {
                None
            } else {
                parents.remove(&edge.descendant)
            };
            TreeEntry {
                key: edge.descendant.clone(),
                parent,
                generations: edge.generations,
                value: edge.descendant,
            }
        });
        Ok(HashTree::build(entries, limit_depth))
    }

    /// Whether `ancestor` is a proper ancestor of `node`.
    pub async fn is_ancestor_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: &NodeRef<I>,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        Ok(self
            .store
            .edge(conn, ancestor, node)
            .await?
            .is_some_and(|edge| edge.generations > 0))
    }

    pub async fn is_descendant_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        ancestor: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        self.is_ancestor_of(conn, ancestor, node).await
    }

    pub async fn is_parent_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent: &NodeRef<I>,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        Ok(self.tables().read_parent(conn, node).await?.as_ref() == Some(parent))
    }

    pub async fn is_child_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        parent: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        self.is_parent_of(conn, parent, node).await
    }

    pub async fn is_root_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &NodeRef<I>,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        Ok(&self.root(conn, node, KindScope::All).await? == root)
    }

    /// Whether both nodes share a root.
    pub async fn is_family_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        other: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        let mine = self.root(conn, node, KindScope::All).await?;
        let theirs = self.root(conn, other, KindScope::All).await?;
        Ok(mine == theirs)
    }

    /// Follow name segments from the roots down.
    pub async fn find_by_path<C: ConnectionTrait, S: AsRef<str>>(
        &self,
        conn: &C,
        segments: &[S],
    ) -> Result<Option<NodeRef<I>>, ClosureTreeError> {
        if segments.is_empty() {
            return Err(ClosureTreeError::EmptyPath);
        }

        let mut current: Option<NodeRef<I>> = None;
        for segment in segments {
            match self
                .tables()
                .find_child_by_name(conn, current.as_ref(), segment.as_ref())
                .await?
            {
                Some(node) => current = Some(node),
                None => return Ok(None),
            }
        }
        Ok(current)
    }

    /// Names from the root down to `node`; kinds without a name column are skipped.
    pub async fn ancestry_path<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<Vec<String>, ClosureTreeError> {
        let mut names = Vec::new();
        for ancestor in self.self_and_ancestors(conn, node, KindScope::All).await? {
            if let Some(name) = self.tables().name_of(conn, &ancestor).await? {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn with_parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        parent: Option<&NodeRef<I>>,
        scope: KindScope,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        match scope {
            KindScope::Own => {
                let kind = self.tables().config().kind(&node.kind)?;
                self.tables().with_parent(conn, kind, parent).await
            }
            KindScope::All => self.tables().with_parent_any_kind(conn, parent).await,
        }
    }

    /// For each of `nodes`, its closest proper ancestor within `scope`.
    ///
    /// `All` reads the `generations = 1` edges; `Own` keeps the closest
    /// ancestor of type `kind`.
    async fn nearest_ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        nodes: &[NodeRef<I>],
        scope: KindScope,
        kind: &str,
    ) -> Result<HashMap<NodeRef<I>, NodeRef<I>>, ClosureTreeError> {
        if nodes.is_empty() {
            return Ok(HashMap::new());
        }
        let t = self.tables().config().hierarchy();
        let mut condition =
            Condition::all().add(sql::is_any_node(&t.descendant_id, &t.descendant_type, nodes));
        condition = match scope {
            KindScope::All => condition.add(col(&t.generations).eq(1)),
            KindScope::Own => condition
                .add(col(&t.generations).gt(0))
                .add(col(&t.ancestor_type).eq(kind)),
        };

        let mut select = self.store.select_edges();
        select
            .cond_where(condition)
            .order_by(Alias::new(&t.generations), Order::Asc);

        let mut nearest = HashMap::with_capacity(nodes.len());
        for edge in self.store.fetch_edges(conn, &select).await? {
            nearest.entry(edge.descendant).or_insert(edge.ancestor);
        }
        Ok(nearest)
    }
}
