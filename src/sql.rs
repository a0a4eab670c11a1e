//! Small helpers for running `sea_query` statements on any SeaORM connection.

use std::collections::BTreeMap;

use sea_orm::sea_query::{Alias, Condition, Expr, SimpleExpr};
use sea_orm::{ConnectionTrait, QueryResult, StatementBuilder, Value};

use crate::error::ClosureTreeError;
use crate::node::{NodeId, NodeRef};

pub(crate) async fn execute<C, S>(conn: &C, stmt: &S) -> Result<u64, ClosureTreeError>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    let result = conn.execute(backend.build(stmt)).await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(
    conn: &C,
    stmt: &S,
) -> Result<Vec<QueryResult>, ClosureTreeError>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    Ok(conn.query_all(backend.build(stmt)).await?)
}

pub(crate) async fn query_one<C, S>(
    conn: &C,
    stmt: &S,
) -> Result<Option<QueryResult>, ClosureTreeError>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    Ok(conn.query_one(backend.build(stmt)).await?)
}

pub(crate) fn col(name: &str) -> Expr {
    Expr::col(Alias::new(name))
}

pub(crate) fn value<I: NodeId>(id: &I) -> SimpleExpr {
    let value: Value = id.clone().into();
    SimpleExpr::Value(value)
}

/// `id_column = id AND type_column = kind`
pub(crate) fn is_node<I: NodeId>(
    id_column: &str,
    type_column: &str,
    node: &NodeRef<I>,
) -> Condition {
    Condition::all()
        .add(col(id_column).eq(value(&node.id)))
        .add(col(type_column).eq(node.kind.as_str()))
}

/// Membership of a (kind, id) pair in `nodes`, one `IN` list per kind.
///
/// Callers must not pass an empty slice.
pub(crate) fn is_any_node<I: NodeId>(
    id_column: &str,
    type_column: &str,
    nodes: &[NodeRef<I>],
) -> Condition {
    let mut condition = Condition::any();
    for (kind, ids) in group_by_kind(nodes) {
        let values: Vec<SimpleExpr> = ids.into_iter().map(value).collect();
        condition = condition.add(
            Condition::all()
                .add(col(type_column).eq(kind))
                .add(col(id_column).is_in(values)),
        );
    }
    condition
}

/// Group node ids by kind tag, in tag order.
pub(crate) fn group_by_kind<I>(nodes: &[NodeRef<I>]) -> BTreeMap<&str, Vec<&I>> {
    let mut grouped: BTreeMap<&str, Vec<&I>> = BTreeMap::new();
    for node in nodes {
        grouped.entry(node.kind.as_str()).or_default().push(&node.id);
    }
    grouped
}
