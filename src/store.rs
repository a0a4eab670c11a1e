use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use sea_orm::sea_query::{Alias, Condition, Expr, Order, Query, SelectStatement, SimpleExpr};
use sea_orm::{ConnectionTrait, QueryResult};
use tracing::{debug, info};

use crate::config::{ClosureTreeConfig, DependentBehavior, HierarchyTable};
use crate::error::ClosureTreeError;
use crate::node::{HierarchyEdge, NodeId, NodeRef};
use crate::records::NodeTables;
use crate::sql::{self, col, value};

/// Rows per `INSERT` statement; keeps bind parameters well under SQLite's limit.
const INSERT_BATCH: usize = 100;

/// Owner of the closure-table rows.
///
/// Every method takes the connection to run on; callers pass a transaction so
/// that the read of the current closure and the write of the delta commit
/// together.
#[derive(Debug)]
pub struct HierarchyStore<I> {
    config: Arc<ClosureTreeConfig>,
    tables: NodeTables<I>,
}

impl<I> Clone for HierarchyStore<I> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            tables: self.tables.clone(),
        }
    }
}

impl<I: NodeId> HierarchyStore<I> {
    pub fn new(config: Arc<ClosureTreeConfig>) -> Self {
        let tables = NodeTables::new(Arc::clone(&config));
        Self { config, tables }
    }

    pub fn tables(&self) -> &NodeTables<I> {
        &self.tables
    }

    fn table(&self) -> &HierarchyTable {
        self.config.hierarchy()
    }

    pub(crate) fn select_edges(&self) -> SelectStatement {
        let t = self.table();
        Query::select()
            .columns([
                Alias::new(&t.ancestor_id),
                Alias::new(&t.ancestor_type),
                Alias::new(&t.descendant_id),
                Alias::new(&t.descendant_type),
                Alias::new(&t.generations),
            ])
            .from(Alias::new(&t.table))
            .to_owned()
    }

    pub(crate) fn edge_from_row(
        &self,
        row: &QueryResult,
    ) -> Result<HierarchyEdge<I>, ClosureTreeError> {
        let t = self.table();
        Ok(HierarchyEdge::new(
            NodeRef::new(
                row.try_get::<String>("", &t.ancestor_type)?,
                row.try_get::<I>("", &t.ancestor_id)?,
            ),
            NodeRef::new(
                row.try_get::<String>("", &t.descendant_type)?,
                row.try_get::<I>("", &t.descendant_id)?,
            ),
            row.try_get::<i32>("", &t.generations)?,
        ))
    }

    pub(crate) async fn fetch_edges<C: ConnectionTrait>(
        &self,
        conn: &C,
        select: &SelectStatement,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        sql::query_all(conn, select)
            .await?
            .iter()
            .map(|row| self.edge_from_row(row))
            .collect()
    }

    pub(crate) fn is_ancestor(&self, node: &NodeRef<I>) -> Condition {
        let t = self.table();
        sql::is_node(&t.ancestor_id, &t.ancestor_type, node)
    }

    pub(crate) fn is_descendant(&self, node: &NodeRef<I>) -> Condition {
        let t = self.table();
        sql::is_node(&t.descendant_id, &t.descendant_type, node)
    }

    /// Edges with `descendant = node`, root first.
    pub async fn edges_to<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        let mut select = self.select_edges();
        select
            .cond_where(self.is_descendant(node))
            .order_by(Alias::new(&self.table().generations), Order::Desc);
        self.fetch_edges(conn, &select).await
    }

    /// Edges with `ancestor = node`, self first, then by generation.
    pub async fn edges_from<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        let t = self.table();
        let mut select = self.select_edges();
        select
            .cond_where(self.is_ancestor(node))
            .order_by(Alias::new(&t.generations), Order::Asc)
            .order_by(Alias::new(&t.descendant_type), Order::Asc)
            .order_by(Alias::new(&t.descendant_id), Order::Asc);
        self.fetch_edges(conn, &select).await
    }

    /// The edge between two nodes, if `ancestor` is an ancestor of (or is) `descendant`.
    pub async fn edge<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: &NodeRef<I>,
        descendant: &NodeRef<I>,
    ) -> Result<Option<HierarchyEdge<I>>, ClosureTreeError> {
        let mut select = self.select_edges();
        select
            .cond_where(
                Condition::all()
                    .add(self.is_ancestor(ancestor))
                    .add(self.is_descendant(descendant)),
            )
            .limit(1);
        match sql::query_one(conn, &select).await? {
            Some(row) => Ok(Some(self.edge_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn has_self_edge<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<bool, ClosureTreeError> {
        Ok(self.edge(conn, node, node).await?.is_some())
    }

    /// Parent as recorded by the closure table (the `generations = 1` edge).
    pub async fn recorded_parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<Option<NodeRef<I>>, ClosureTreeError> {
        let mut select = self.select_edges();
        select
            .cond_where(
                self.is_descendant(node)
                    .add(col(&self.table().generations).eq(1)),
            )
            .limit(1);
        match sql::query_one(conn, &select).await? {
            Some(row) => Ok(Some(self.edge_from_row(&row)?.ancestor)),
            None => Ok(None),
        }
    }

    /// Every edge in the table, sorted.
    pub async fn all_edges<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        let mut edges = self.fetch_edges(conn, &self.select_edges()).await?;
        edges.sort();
        Ok(edges)
    }

    /// Create the self-edge and ancestor edges for a freshly persisted node.
    pub async fn insert_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        parent: Option<&NodeRef<I>>,
    ) -> Result<(), ClosureTreeError> {
        if parent == Some(node) {
            return Err(ClosureTreeError::cycle(node, node));
        }
        if self.has_self_edge(conn, node).await? {
            return Err(ClosureTreeError::integrity(format!(
                "{node} already has hierarchy rows"
            )));
        }

        let mut rows = vec![HierarchyEdge::self_edge(node)];
        if let Some(parent) = parent {
            let ancestors = self.existing_ancestors(conn, parent).await?;
            if ancestors.iter().any(|edge| &edge.ancestor == node) {
                return Err(ClosureTreeError::cycle(node, parent));
            }
            rows.extend(ancestors.into_iter().map(|edge| {
                HierarchyEdge::new(edge.ancestor, node.clone(), edge.generations + 1)
            }));
        }

        debug!(%node, rows = rows.len(), "inserting hierarchy rows");
        self.insert_edges(conn, &rows).await
    }

    /// Detach `node`'s subtree from its old ancestors and attach it below
    /// `new_parent` (or make it a root when `None`).
    pub async fn move_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        new_parent: Option<&NodeRef<I>>,
    ) -> Result<(), ClosureTreeError> {
        if new_parent == Some(node) {
            return Err(ClosureTreeError::cycle(node, node));
        }

        let subtree = self.edges_from(conn, node).await?;
        if subtree.is_empty() {
            return Err(ClosureTreeError::integrity(format!(
                "{node} has no hierarchy rows"
            )));
        }
        if let Some(parent) = new_parent {
            if subtree.iter().any(|edge| &edge.descendant == parent) {
                return Err(ClosureTreeError::cycle(node, parent));
            }
        }

        let subtree_nodes: Vec<NodeRef<I>> =
            subtree.iter().map(|edge| edge.descendant.clone()).collect();
        let old_ancestors: Vec<NodeRef<I>> = self
            .edges_to(conn, node)
            .await?
            .into_iter()
            .filter(|edge| edge.generations > 0)
            .map(|edge| edge.ancestor)
            .collect();

        let removed = self
            .delete_between(conn, &old_ancestors, &subtree_nodes)
            .await?;

        let mut rows = Vec::new();
        if let Some(parent) = new_parent {
            for above in self.existing_ancestors(conn, parent).await? {
                for below in &subtree {
                    rows.push(HierarchyEdge::new(
                        above.ancestor.clone(),
                        below.descendant.clone(),
                        above.generations + 1 + below.generations,
                    ));
                }
            }
        }

        debug!(
            %node,
            subtree = subtree_nodes.len(),
            removed,
            inserted = rows.len(),
            "moving subtree"
        );
        self.insert_edges(conn, &rows).await
    }

    /// Reject moving `node` below itself or one of its descendants.
    pub async fn ensure_can_move<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        new_parent: Option<&NodeRef<I>>,
    ) -> Result<(), ClosureTreeError> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if parent == node || self.edge(conn, node, parent).await?.is_some() {
            return Err(ClosureTreeError::cycle(node, parent));
        }
        Ok(())
    }

    /// Remove `node` and its closure rows, handling its children per `behavior`.
    ///
    /// Returns the records that were deleted.
    pub async fn delete_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        behavior: DependentBehavior,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        let subtree = self.edges_from(conn, node).await?;
        if subtree.is_empty() {
            return Err(ClosureTreeError::integrity(format!(
                "{node} has no hierarchy rows"
            )));
        }
        let ancestry = self.edges_to(conn, node).await?;

        let subtree_nodes: Vec<NodeRef<I>> =
            subtree.iter().map(|edge| edge.descendant.clone()).collect();
        let self_and_ancestors: Vec<NodeRef<I>> =
            ancestry.iter().map(|edge| edge.ancestor.clone()).collect();
        let children: Vec<NodeRef<I>> = subtree
            .iter()
            .filter(|edge| edge.generations == 1)
            .map(|edge| edge.descendant.clone())
            .collect();

        debug!(%node, ?behavior, subtree = subtree_nodes.len(), "deleting node");

        match behavior {
            DependentBehavior::Nullify => {
                for child in &children {
                    self.tables.write_parent(conn, child, None).await?;
                }
                self.delete_between(conn, &self_and_ancestors, &subtree_nodes)
                    .await?;
                self.tables.delete_rows(conn, std::slice::from_ref(node)).await?;
                Ok(vec![node.clone()])
            }
            DependentBehavior::Adopt => {
                let grandparent = ancestry
                    .iter()
                    .find(|edge| edge.generations == 1)
                    .map(|edge| edge.ancestor.clone());
                for child in &children {
                    self.tables
                        .write_parent(conn, child, grandparent.as_ref())
                        .await?;
                }

                let proper_ancestors: Vec<NodeRef<I>> = ancestry
                    .iter()
                    .filter(|edge| edge.generations > 0)
                    .map(|edge| edge.ancestor.clone())
                    .collect();
                let proper_descendants: Vec<NodeRef<I>> = subtree
                    .iter()
                    .filter(|edge| edge.generations > 0)
                    .map(|edge| edge.descendant.clone())
                    .collect();
                self.shorten_between(conn, &proper_ancestors, &proper_descendants)
                    .await?;
                self.delete_touching(conn, node).await?;
                self.tables.delete_rows(conn, std::slice::from_ref(node)).await?;
                Ok(vec![node.clone()])
            }
            DependentBehavior::Destroy => {
                let t = self.table();
                let delete = Query::delete()
                    .from_table(Alias::new(&t.table))
                    .cond_where(sql::is_any_node(
                        &t.descendant_id,
                        &t.descendant_type,
                        &subtree_nodes,
                    ))
                    .to_owned();
                sql::execute(conn, &delete).await?;

                let mut levels: BTreeMap<i32, Vec<NodeRef<I>>> = BTreeMap::new();
                for edge in &subtree {
                    levels
                        .entry(edge.generations)
                        .or_default()
                        .push(edge.descendant.clone());
                }
                for level in levels.values().rev() {
                    self.tables.delete_rows(conn, level).await?;
                }
                Ok(subtree_nodes)
            }
        }
    }

    /// Recompute every edge from the parent pointers of every configured kind.
    ///
    /// Returns the number of edges written.
    pub async fn rebuild_all<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<usize, ClosureTreeError> {
        let edges = self.expected_edges(conn).await?;

        let delete = Query::delete()
            .from_table(Alias::new(&self.table().table))
            .to_owned();
        sql::execute(conn, &delete).await?;
        self.insert_edges(conn, &edges).await?;

        info!(
            hierarchy = self.config.hierarchy_name(),
            edges = edges.len(),
            "rebuilt closure table"
        );
        Ok(edges.len())
    }

    /// Recompute the closure rows of `node`'s subtree from parent pointers,
    /// attaching it below its parent's current closure.
    pub async fn rebuild_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<usize, ClosureTreeError> {
        let mut children: HashMap<NodeRef<I>, Vec<NodeRef<I>>> = HashMap::new();
        let mut members = vec![node.clone()];
        let mut seen: HashSet<NodeRef<I>> = HashSet::from([node.clone()]);
        let mut cursor = 0;
        while cursor < members.len() {
            let current = members[cursor].clone();
            cursor += 1;
            let kids = self
                .tables
                .with_parent_any_kind(conn, Some(&current))
                .await?;
            for kid in &kids {
                if !seen.insert(kid.clone()) {
                    return Err(ClosureTreeError::integrity(format!(
                        "parent pointers below {node} contain a cycle at {kid}"
                    )));
                }
                members.push(kid.clone());
            }
            children.insert(current, kids);
        }

        let above = match self.tables.read_parent(conn, node).await? {
            Some(parent) => {
                if seen.contains(&parent) {
                    return Err(ClosureTreeError::cycle(node, parent));
                }
                self.existing_ancestors(conn, &parent).await?
            }
            None => Vec::new(),
        };

        let mut edges = Vec::new();
        let mut visited = HashSet::new();
        walk_subtree(node, &above, &children, &mut visited, &mut edges);

        let t = self.table();
        let delete = Query::delete()
            .from_table(Alias::new(&t.table))
            .cond_where(sql::is_any_node(&t.descendant_id, &t.descendant_type, &members))
            .to_owned();
        sql::execute(conn, &delete).await?;
        self.insert_edges(conn, &edges).await?;

        debug!(%node, members = members.len(), edges = edges.len(), "rebuilt subtree");
        Ok(edges.len())
    }

    /// Compare the stored edges with the closure implied by parent pointers.
    pub async fn verify<C: ConnectionTrait>(&self, conn: &C) -> Result<(), ClosureTreeError> {
        let expected: BTreeSet<HierarchyEdge<I>> =
            self.expected_edges(conn).await?.into_iter().collect();
        let stored = self.all_edges(conn).await?;
        let stored_len = stored.len();
        let stored: BTreeSet<HierarchyEdge<I>> = stored.into_iter().collect();

        if stored_len != stored.len() {
            return Err(ClosureTreeError::integrity("duplicate hierarchy rows"));
        }
        let missing = expected.difference(&stored).count();
        let extra = stored.difference(&expected).count();
        if missing > 0 || extra > 0 {
            return Err(ClosureTreeError::integrity(format!(
                "{missing} hierarchy rows missing, {extra} unexpected"
            )));
        }
        Ok(())
    }

    /// The full closure implied by the current parent pointers.
    async fn expected_edges<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        let pointers = self.tables.all_pointers(conn).await?;
        let known: HashSet<&NodeRef<I>> = pointers.iter().map(|(node, _)| node).collect();

        let mut roots = Vec::new();
        let mut children: HashMap<NodeRef<I>, Vec<NodeRef<I>>> = HashMap::new();
        for (node, parent) in &pointers {
            match parent {
                None => roots.push(node.clone()),
                Some(parent) if !known.contains(parent) => {
                    return Err(ClosureTreeError::integrity(format!(
                        "{node} points at missing parent {parent}"
                    )));
                }
                Some(parent) => children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.clone()),
            }
        }

        let mut edges = Vec::new();
        let mut visited = HashSet::new();
        for root in &roots {
            walk_subtree(root, &[], &children, &mut visited, &mut edges);
        }
        if visited.len() != pointers.len() {
            return Err(ClosureTreeError::integrity(format!(
                "{} nodes are unreachable from any root (parent pointer cycle)",
                pointers.len() - visited.len()
            )));
        }

        edges.sort();
        Ok(edges)
    }

    /// `parent`'s self-and-ancestor edges; empty means `parent` was never inserted.
    async fn existing_ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent: &NodeRef<I>,
    ) -> Result<Vec<HierarchyEdge<I>>, ClosureTreeError> {
        let ancestors = self.edges_to(conn, parent).await?;
        if ancestors.is_empty() {
            return Err(ClosureTreeError::integrity(format!(
                "parent {parent} has no hierarchy rows"
            )));
        }
        Ok(ancestors)
    }

    pub(crate) async fn insert_edges<C: ConnectionTrait>(
        &self,
        conn: &C,
        edges: &[HierarchyEdge<I>],
    ) -> Result<(), ClosureTreeError> {
        let t = self.table();
        for chunk in edges.chunks(INSERT_BATCH) {
            let mut insert = Query::insert();
            insert.into_table(Alias::new(&t.table)).columns([
                Alias::new(&t.ancestor_id),
                Alias::new(&t.ancestor_type),
                Alias::new(&t.descendant_id),
                Alias::new(&t.descendant_type),
                Alias::new(&t.generations),
            ]);
            for edge in chunk {
                insert.values([
                    value(&edge.ancestor.id),
                    SimpleExpr::from(edge.ancestor.kind.as_str()),
                    value(&edge.descendant.id),
                    SimpleExpr::from(edge.descendant.kind.as_str()),
                    SimpleExpr::from(edge.generations),
                ])?;
            }
            sql::execute(conn, &insert).await?;
        }
        Ok(())
    }

    async fn delete_between<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestors: &[NodeRef<I>],
        descendants: &[NodeRef<I>],
    ) -> Result<u64, ClosureTreeError> {
        if ancestors.is_empty() || descendants.is_empty() {
            return Ok(0);
        }
        let delete = Query::delete()
            .from_table(Alias::new(&self.table().table))
            .cond_where(self.between(ancestors, descendants))
            .to_owned();
        sql::execute(conn, &delete).await
    }

    /// Pull every descendant in `descendants` one generation closer to the
    /// ancestors in `ancestors`.
    async fn shorten_between<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestors: &[NodeRef<I>],
        descendants: &[NodeRef<I>],
    ) -> Result<u64, ClosureTreeError> {
        if ancestors.is_empty() || descendants.is_empty() {
            return Ok(0);
        }
        let generations = &self.table().generations;
        let update = Query::update()
            .table(Alias::new(&self.table().table))
            .value(
                Alias::new(generations),
                Expr::col(Alias::new(generations)).sub(1),
            )
            .cond_where(self.between(ancestors, descendants))
            .to_owned();
        sql::execute(conn, &update).await
    }

    async fn delete_touching<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<u64, ClosureTreeError> {
        let delete = Query::delete()
            .from_table(Alias::new(&self.table().table))
            .cond_where(
                Condition::any()
                    .add(self.is_ancestor(node))
                    .add(self.is_descendant(node)),
            )
            .to_owned();
        sql::execute(conn, &delete).await
    }

    fn between(&self, ancestors: &[NodeRef<I>], descendants: &[NodeRef<I>]) -> Condition {
        let t = self.table();
        Condition::all()
            .add(sql::is_any_node(&t.ancestor_id, &t.ancestor_type, ancestors))
            .add(sql::is_any_node(&t.descendant_id, &t.descendant_type, descendants))
    }
}

/// Depth-first walk emitting the closure rows of `top`'s subtree.
///
/// `above` holds the self-and-ancestor edges of `top`'s parent.
fn walk_subtree<I: NodeId>(
    top: &NodeRef<I>,
    above: &[HierarchyEdge<I>],
    children: &HashMap<NodeRef<I>, Vec<NodeRef<I>>>,
    visited: &mut HashSet<NodeRef<I>>,
    edges: &mut Vec<HierarchyEdge<I>>,
) {
    let mut stack: Vec<(NodeRef<I>, Vec<NodeRef<I>>)> = vec![(top.clone(), Vec::new())];
    while let Some((node, path)) = stack.pop() {
        if !visited.insert(node.clone()) {
            continue;
        }

        let depth = path.len() as i32;
        edges.push(HierarchyEdge::self_edge(&node));
        for (index, ancestor) in path.iter().enumerate() {
            edges.push(HierarchyEdge::new(
                ancestor.clone(),
                node.clone(),
                depth - index as i32,
            ));
        }
        for edge in above {
            edges.push(HierarchyEdge::new(
                edge.ancestor.clone(),
                node.clone(),
                edge.generations + 1 + depth,
            ));
        }

        if let Some(kids) = children.get(&node) {
            for kid in kids.iter().rev() {
                let mut kid_path = path.clone();
                kid_path.push(node.clone());
                stack.push((kid.clone(), kid_path));
            }
        }
    }
}
