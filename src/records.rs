use std::marker::PhantomData;
use std::sync::Arc;

use sea_orm::sea_query::{Alias, Condition, Order, Query, SelectStatement, SimpleExpr};
use sea_orm::{ConnectionTrait, QueryResult, Value};

use crate::config::{ClosureTreeConfig, NodeKind};
use crate::error::ClosureTreeError;
use crate::node::{NodeId, NodeRef};
use crate::sql::{self, col, value};

/// Parent-pointer access to the record tables of every configured kind.
#[derive(Debug)]
pub struct NodeTables<I> {
    config: Arc<ClosureTreeConfig>,
    _marker: PhantomData<fn() -> I>,
}

impl<I> Clone for NodeTables<I> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            _marker: PhantomData,
        }
    }
}

impl<I: NodeId> NodeTables<I> {
    pub fn new(config: Arc<ClosureTreeConfig>) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &ClosureTreeConfig {
        &self.config
    }

    /// Current parent pointer of `node` as stored in its own table.
    pub async fn read_parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<Option<NodeRef<I>>, ClosureTreeError> {
        let kind = self.config.kind(&node.kind)?;
        let mut select = Query::select();
        select
            .column(Alias::new(&kind.parent_column))
            .from(Alias::new(&kind.table))
            .and_where(col(&kind.id_column).eq(value(&node.id)));
        if let Some(type_column) = &kind.parent_type_column {
            select.column(Alias::new(type_column));
        }

        let row = sql::query_one(conn, &select)
            .await?
            .ok_or_else(|| ClosureTreeError::NodeNotFound(node.to_string()))?;
        parent_from_row(kind, &row)
    }

    /// Overwrite the parent pointer of `node`.
    pub async fn write_parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
        parent: Option<&NodeRef<I>>,
    ) -> Result<(), ClosureTreeError> {
        let kind = self.config.kind(&node.kind)?;
        let parent_id: Value = parent.map(|parent| parent.id.clone()).into();

        let mut update = Query::update();
        update
            .table(Alias::new(&kind.table))
            .value(Alias::new(&kind.parent_column), SimpleExpr::Value(parent_id))
            .and_where(col(&kind.id_column).eq(value(&node.id)));

        match &kind.parent_type_column {
            Some(type_column) => {
                let parent_type: Value = parent.map(|parent| parent.kind.clone()).into();
                update.value(Alias::new(type_column), SimpleExpr::Value(parent_type));
            }
            None => {
                if let Some(parent) = parent.filter(|parent| parent.kind != kind.tag) {
                    return Err(ClosureTreeError::integrity(format!(
                        "{node} cannot point at {parent}: kind `{}` has no parent type column",
                        kind.tag
                    )));
                }
            }
        }

        if sql::execute(conn, &update).await? == 0 {
            return Err(ClosureTreeError::NodeNotFound(node.to_string()));
        }
        Ok(())
    }

    /// Rows of `kind` whose parent pointer equals `parent` (`None` = roots).
    pub async fn with_parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: &NodeKind,
        parent: Option<&NodeRef<I>>,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        let condition = match (parent, &kind.parent_type_column) {
            (None, _) => Condition::all().add(col(&kind.parent_column).is_null()),
            (Some(parent), Some(type_column)) => {
                sql::is_node(&kind.parent_column, type_column, parent)
            }
            (Some(parent), None) if parent.kind == kind.tag => {
                Condition::all().add(col(&kind.parent_column).eq(value(&parent.id)))
            }
            (Some(_), None) => return Ok(Vec::new()),
        };

        let mut select = self.select_ids(kind);
        select.cond_where(condition);
        self.ordered_refs(conn, kind, select).await
    }

    /// Rows with the given parent across every configured kind.
    pub async fn with_parent_any_kind<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent: Option<&NodeRef<I>>,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        let mut nodes = Vec::new();
        for kind in self.config.kinds() {
            nodes.extend(self.with_parent(conn, kind, parent).await?);
        }
        Ok(nodes)
    }

    /// Delete the records of `nodes`, grouped into one statement per kind.
    pub async fn delete_rows<C: ConnectionTrait>(
        &self,
        conn: &C,
        nodes: &[NodeRef<I>],
    ) -> Result<u64, ClosureTreeError> {
        let mut deleted = 0;
        for (tag, ids) in sql::group_by_kind(nodes) {
            let kind = self.config.kind(tag)?;
            let values: Vec<SimpleExpr> = ids.into_iter().map(value).collect();
            let delete = Query::delete()
                .from_table(Alias::new(&kind.table))
                .and_where(col(&kind.id_column).is_in(values))
                .to_owned();
            deleted += sql::execute(conn, &delete).await?;
        }
        Ok(deleted)
    }

    /// Parent pointers of every row of every configured kind.
    pub async fn all_pointers<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<(NodeRef<I>, Option<NodeRef<I>>)>, ClosureTreeError> {
        let mut pointers = Vec::new();
        for kind in self.config.kinds() {
            let mut select = self.select_ids(kind);
            select.column(Alias::new(&kind.parent_column));
            if let Some(type_column) = &kind.parent_type_column {
                select.column(Alias::new(type_column));
            }
            select.order_by(Alias::new(&kind.id_column), Order::Asc);

            for row in sql::query_all(conn, &select).await? {
                let id: I = row.try_get("", &kind.id_column)?;
                let parent = parent_from_row(kind, &row)?;
                pointers.push((NodeRef::new(kind.tag.clone(), id), parent));
            }
        }
        Ok(pointers)
    }

    /// Child of `parent` (or root when `None`) whose name column equals `name`.
    pub async fn find_child_by_name<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent: Option<&NodeRef<I>>,
        name: &str,
    ) -> Result<Option<NodeRef<I>>, ClosureTreeError> {
        for kind in self.config.kinds() {
            let Some(name_column) = &kind.name_column else {
                continue;
            };
            let candidates = self.with_parent(conn, kind, parent).await?;
            if candidates.is_empty() {
                continue;
            }

            let ids: Vec<SimpleExpr> = candidates.iter().map(|node| value(&node.id)).collect();
            let mut select = self.select_ids(kind);
            select
                .and_where(col(&kind.id_column).is_in(ids))
                .and_where(col(name_column).eq(name))
                .limit(1);

            if let Some(row) = sql::query_one(conn, &select).await? {
                let id: I = row.try_get("", &kind.id_column)?;
                return Ok(Some(NodeRef::new(kind.tag.clone(), id)));
            }
        }
        Ok(None)
    }

    /// Value of the kind's name column for `node`, if the kind has one.
    pub async fn name_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &NodeRef<I>,
    ) -> Result<Option<String>, ClosureTreeError> {
        let kind = self.config.kind(&node.kind)?;
        let Some(name_column) = &kind.name_column else {
            return Ok(None);
        };

        let select = Query::select()
            .column(Alias::new(name_column))
            .from(Alias::new(&kind.table))
            .and_where(col(&kind.id_column).eq(value(&node.id)))
            .to_owned();
        match sql::query_one(conn, &select).await? {
            Some(row) => Ok(Some(row.try_get("", name_column)?)),
            None => Err(ClosureTreeError::NodeNotFound(node.to_string())),
        }
    }

    fn select_ids(&self, kind: &NodeKind) -> SelectStatement {
        Query::select()
            .column(Alias::new(&kind.id_column))
            .from(Alias::new(&kind.table))
            .to_owned()
    }

    async fn ordered_refs<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: &NodeKind,
        mut select: SelectStatement,
    ) -> Result<Vec<NodeRef<I>>, ClosureTreeError> {
        if let Some(column) = kind.order.column() {
            select.order_by(Alias::new(column), Order::Asc);
        }
        select.order_by(Alias::new(&kind.id_column), Order::Asc);

        sql::query_all(conn, &select)
            .await?
            .iter()
            .map(|row| {
                let id: I = row.try_get("", &kind.id_column)?;
                Ok(NodeRef::new(kind.tag.clone(), id))
            })
            .collect()
    }
}

fn parent_from_row<I: NodeId>(
    kind: &NodeKind,
    row: &QueryResult,
) -> Result<Option<NodeRef<I>>, ClosureTreeError> {
    let Some(parent_id) = row.try_get::<Option<I>>("", &kind.parent_column)? else {
        return Ok(None);
    };

    let parent_kind = match &kind.parent_type_column {
        Some(type_column) => row.try_get::<Option<String>>("", type_column)?.ok_or_else(|| {
            ClosureTreeError::integrity(format!(
                "a row of `{}` points at parent {parent_id} without a parent type",
                kind.table
            ))
        })?,
        None => kind.tag.clone(),
    };
    Ok(Some(NodeRef::new(parent_kind, parent_id)))
}
