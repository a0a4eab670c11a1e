mod common;

use std::collections::HashMap;

use closure_table::prelude::*;
use closure_table::{ClosureTreeError, HierarchyEdge, ParentChange};
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;

use common::entity::category;
use common::*;

fn edge(
    ancestor: &category::Model,
    descendant: &category::Model,
    generations: i32,
) -> HierarchyEdge<i32> {
    HierarchyEdge::new(ancestor.node_ref(), descendant.node_ref(), generations)
}

async fn chain(
    repo: &CategoryRepo,
    db: &DatabaseConnection,
    names: &[&str],
) -> Result<Vec<category::Model>, ClosureTreeError> {
    let mut nodes: Vec<category::Model> = Vec::new();
    for name in names {
        let node = create_category(repo, db, name, nodes.last()).await?;
        nodes.push(node);
    }
    Ok(nodes)
}

#[tokio::test]
async fn insert_writes_self_and_ancestor_edges() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;
    let (root, a, b) = (&nodes[0], &nodes[1], &nodes[2]);

    let mut expected = vec![
        edge(root, root, 0),
        edge(root, a, 1),
        edge(root, b, 2),
        edge(a, a, 0),
        edge(a, b, 1),
        edge(b, b, 0),
    ];
    expected.sort();
    assert_eq!(edges(&repo, &db).await?, expected);
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn inserting_twice_is_an_integrity_error() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let root = create_category(&repo, &db, "root", None).await?;

    let result = repo.insert_node(&db, &root.node_ref(), None).await;
    assert!(matches!(result, Err(ClosureTreeError::Integrity(_))));
    Ok(())
}

#[tokio::test]
async fn saving_an_unchanged_node_is_a_no_op() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a"]).await?;
    let before = edges(&repo, &db).await?;

    let change = repo.after_save(&db, &nodes[1].node_ref()).await?;
    assert_eq!(change, ParentChange::Unchanged);
    assert_eq!(edges(&repo, &db).await?, before);
    Ok(())
}

#[tokio::test]
async fn tracker_picks_up_parent_pointer_updates() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;
    let other = create_category(&repo, &db, "other", None).await?;

    let txn = repo.begin(&db).await?;
    let mut active: category::ActiveModel = nodes[2].clone().into();
    active.parent_id = Set(Some(other.id));
    active.update(txn.connection()).await?;
    let change = repo.after_save(txn.connection(), &nodes[2].node_ref()).await;
    let change = txn.finish(change).await?;

    assert_eq!(
        change,
        ParentChange::Moved {
            from: Some(nodes[1].node_ref()),
            to: Some(other.node_ref()),
        }
    );
    assert_eq!(names(&repo.ancestors(&db, &nodes[2].node_ref()).await?), vec!["other"]);
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn moving_a_subtree_rewrites_edges_from_old_ancestors() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b", "c"]).await?;
    let x = create_category(&repo, &db, "x", None).await?;
    let (root, a, b, c) = (&nodes[0], &nodes[1], &nodes[2], &nodes[3]);

    repo.move_node(&db, &b.node_ref(), Some(&x.node_ref())).await?;

    let query = repo.query();
    assert_eq!(names(&repo.ancestors(&db, &b.node_ref()).await?), vec!["x"]);
    assert_eq!(names(&repo.ancestors(&db, &c.node_ref()).await?), vec!["x", "b"]);
    assert!(!query.is_ancestor_of(&db, &root.node_ref(), &c.node_ref()).await?);
    assert!(!query.is_ancestor_of(&db, &a.node_ref(), &b.node_ref()).await?);
    assert_eq!(
        repo.store().edge(&db, &x.node_ref(), &c.node_ref()).await?,
        Some(edge(&x, c, 2))
    );
    assert_eq!(names(&repo.descendants(&db, &root.node_ref()).await?), vec!["a"]);
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn moving_to_none_makes_a_root() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;

    let change = repo.move_node(&db, &nodes[1].node_ref(), None).await?;
    assert_eq!(
        change,
        ParentChange::Moved {
            from: Some(nodes[0].node_ref()),
            to: None,
        }
    );

    assert!(repo.is_root(&db, &nodes[1].node_ref()).await?);
    assert_eq!(repo.root(&db, &nodes[2].node_ref()).await?.name, "a");
    assert_eq!(repo.depth(&db, &nodes[2].node_ref()).await?, 1);
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn cyclic_moves_are_rejected_and_leave_the_table_untouched() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;
    let (a, b) = (&nodes[1], &nodes[2]);
    let before = edges(&repo, &db).await?;

    let below = repo.move_node(&db, &a.node_ref(), Some(&b.node_ref())).await;
    assert!(matches!(below, Err(ClosureTreeError::Cycle { .. })));

    let onto_self = repo.move_node(&db, &a.node_ref(), Some(&a.node_ref())).await;
    assert!(matches!(onto_self, Err(ClosureTreeError::Cycle { .. })));

    assert_eq!(edges(&repo, &db).await?, before);
    let parent = repo.parent(&db, &a.node_ref()).await?.map(|parent| parent.name);
    assert_eq!(parent.as_deref(), Some("root"));
    Ok(())
}

#[tokio::test]
async fn failed_moves_roll_back_deletes_and_pointer_writes() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;
    let (a, b) = (&nodes[1], &nodes[2]);
    let x = create_category(&repo, &db, "x", None).await?;

    // The move would insert (x, b); an existing row makes that insert fail
    // after the old ancestor rows were already deleted.
    execute(
        &db,
        &format!(
            "INSERT INTO category_hierarchies \
             (ancestor_id, ancestor_type, descendant_id, descendant_type, generations) \
             VALUES ({}, 'Category', {}, 'Category', 7)",
            x.id, b.id
        ),
    )
    .await?;
    let before = edges(&repo, &db).await?;

    let result = repo.move_node(&db, &a.node_ref(), Some(&x.node_ref())).await;
    assert!(matches!(result, Err(ClosureTreeError::Database(_))));

    assert_eq!(edges(&repo, &db).await?, before);
    let parent = repo.parent(&db, &a.node_ref()).await?.map(|parent| parent.name);
    assert_eq!(parent.as_deref(), Some("root"));
    Ok(())
}

#[tokio::test]
async fn nullify_turns_children_into_roots() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b", "c"]).await?;

    let deleted = repo.delete_node(&db, &nodes[1].node_ref()).await?;
    assert_eq!(deleted, vec![nodes[1].node_ref()]);

    assert!(repo.is_root(&db, &nodes[2].node_ref()).await?);
    assert_eq!(names(&repo.ancestors(&db, &nodes[3].node_ref()).await?), vec!["b"]);
    assert_eq!(names(&repo.roots(&db).await?), vec!["root", "b"]);
    assert!(category::Entity::find_by_id(nodes[1].id).one(&db).await?.is_none());
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn adopt_attaches_children_to_the_grandparent() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo_with(
        ClosureTreeOptions::default().dependent_behavior(DependentBehavior::Adopt),
    );
    let nodes = chain(&repo, &db, &["root", "a", "b", "c"]).await?;
    let (root, b, c) = (&nodes[0], &nodes[2], &nodes[3]);

    repo.delete_node(&db, &nodes[1].node_ref()).await?;

    let parent = repo.parent(&db, &b.node_ref()).await?;
    assert_eq!(parent.map(|parent| parent.id), Some(root.id));
    assert_eq!(
        repo.store().edge(&db, &root.node_ref(), &c.node_ref()).await?,
        Some(edge(root, c, 2))
    );
    assert_eq!(repo.depth(&db, &c.node_ref()).await?, 2);
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn adopting_children_of_a_root_makes_them_roots() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;

    repo.delete_node_with(&db, &nodes[0].node_ref(), DependentBehavior::Adopt)
        .await?;

    assert_eq!(names(&repo.roots(&db).await?), vec!["a"]);
    assert_eq!(edges(&repo, &db).await?.len(), 3);
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn destroy_removes_the_whole_subtree() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo_with(
        ClosureTreeOptions::default().dependent_behavior(DependentBehavior::Destroy),
    );
    let nodes = chain(&repo, &db, &["root", "a", "b", "c"]).await?;

    let deleted = repo.delete_node(&db, &nodes[1].node_ref()).await?;
    assert_eq!(deleted.len(), 3);

    let remaining = category::Entity::find().all(&db).await?;
    assert_eq!(names(&remaining), vec!["root"]);
    assert_eq!(edges(&repo, &db).await?, vec![edge(&nodes[0], &nodes[0], 0)]);
    Ok(())
}

#[tokio::test]
async fn rebuild_all_matches_incremental_maintenance() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;
    let x = create_category(&repo, &db, "x", Some(&nodes[0])).await?;
    create_category(&repo, &db, "y", Some(&x)).await?;
    repo.move_node(&db, &nodes[1].node_ref(), Some(&x.node_ref())).await?;
    let incremental = edges(&repo, &db).await?;

    let written = repo.rebuild_all(&db).await?;
    assert_eq!(written, incremental.len());
    assert_eq!(edges(&repo, &db).await?, incremental);

    repo.rebuild_all(&db).await?;
    assert_eq!(edges(&repo, &db).await?, incremental);
    Ok(())
}

#[tokio::test]
async fn rebuild_all_repairs_a_wiped_table() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    chain(&repo, &db, &["root", "a", "b"]).await?;
    let original = edges(&repo, &db).await?;

    execute(&db, "DELETE FROM category_hierarchies").await?;
    assert!(matches!(repo.verify(&db).await, Err(ClosureTreeError::Integrity(_))));

    repo.rebuild_all(&db).await?;
    assert_eq!(edges(&repo, &db).await?, original);
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn rebuild_all_refuses_dangling_pointers() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    chain(&repo, &db, &["root", "a"]).await?;
    let before = edges(&repo, &db).await?;

    execute(&db, "INSERT INTO categories (parent_id, name) VALUES (999, 'stray')").await?;
    let result = repo.rebuild_all(&db).await;

    assert!(matches!(result, Err(ClosureTreeError::Integrity(_))));
    assert_eq!(edges(&repo, &db).await?, before);
    Ok(())
}

#[tokio::test]
async fn rebuild_all_refuses_pointer_cycles() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;

    execute(
        &db,
        &format!(
            "UPDATE categories SET parent_id = {} WHERE id = {}",
            nodes[2].id, nodes[1].id
        ),
    )
    .await?;

    let result = repo.rebuild_all(&db).await;
    assert!(matches!(result, Err(ClosureTreeError::Integrity(_))));
    Ok(())
}

#[tokio::test]
async fn rebuild_strategy_recomputes_moved_subtrees() -> TestResult {
    let db = setup_database().await?;
    let repo =
        category_repo_with(ClosureTreeOptions::default().maintenance(MaintenanceStrategy::Rebuild));
    let nodes = chain(&repo, &db, &["root", "a", "b", "c"]).await?;
    let x = create_category(&repo, &db, "x", None).await?;

    repo.move_node(&db, &nodes[2].node_ref(), Some(&x.node_ref())).await?;
    assert_eq!(names(&repo.ancestors(&db, &nodes[3].node_ref()).await?), vec!["x", "b"]);
    repo.verify(&db).await?;

    let cyclic = repo
        .move_node(&db, &x.node_ref(), Some(&nodes[3].node_ref()))
        .await;
    assert!(matches!(cyclic, Err(ClosureTreeError::Cycle { .. })));
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn rebuild_subtree_restores_missing_rows() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b"]).await?;
    let original = edges(&repo, &db).await?;

    execute(
        &db,
        &format!(
            "DELETE FROM category_hierarchies WHERE descendant_id = {}",
            nodes[2].id
        ),
    )
    .await?;

    let written = repo.rebuild_subtree(&db, &nodes[1].node_ref()).await?;
    assert_eq!(written, 2 + 3);
    assert_eq!(edges(&repo, &db).await?, original);
    Ok(())
}

#[tokio::test]
async fn every_node_keeps_exactly_one_self_edge() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();
    let nodes = chain(&repo, &db, &["root", "a", "b", "c"]).await?;
    let x = create_category(&repo, &db, "x", None).await?;

    repo.move_node(&db, &nodes[2].node_ref(), Some(&x.node_ref())).await?;
    repo.move_node(&db, &x.node_ref(), Some(&nodes[1].node_ref())).await?;
    repo.move_node(&db, &nodes[3].node_ref(), None).await?;

    let mut self_edges: HashMap<NodeRef<i32>, usize> = HashMap::new();
    for edge in edges(&repo, &db).await? {
        if edge.generations == 0 {
            assert_eq!(edge.ancestor, edge.descendant);
            *self_edges.entry(edge.descendant).or_default() += 1;
        }
    }
    assert_eq!(self_edges.len(), 5);
    assert!(self_edges.values().all(|count| *count == 1));
    repo.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn unknown_kinds_are_reported() -> TestResult {
    let db = setup_database().await?;
    let repo = category_repo();

    let result = repo.move_node(&db, &NodeRef::new("Widget", 1), None).await;
    assert!(matches!(result, Err(ClosureTreeError::UnknownKind(kind)) if kind == "Widget"));
    Ok(())
}
