#![allow(dead_code)]

use closure_table::prelude::*;
use closure_table::{ClosureTreeError, HierarchyEdge};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectOptions, Database, DbBackend, Statement};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub mod entity {
    pub mod project {
        use closure_table::TreeNode;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeNode)]
        #[sea_orm(table_name = "projects")]
        #[closure_tree(
            kind = "Project",
            parent_type_field = "parent_type",
            name_field = "name"
        )]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub parent_type: Option<String>,
            pub name: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod task {
        use closure_table::TreeNode;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeNode)]
        #[sea_orm(table_name = "tasks")]
        #[closure_tree(
            kind = "Task",
            parent_type_field = "parent_type",
            name_field = "name",
            order_field = "position"
        )]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub parent_type: Option<String>,
            pub name: String,
            pub position: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod category {
        use closure_table::TreeNode;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeNode)]
        #[sea_orm(table_name = "categories")]
        #[closure_tree(kind = "Category", name_field = "name")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub name: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::{category, project, task};

/// Typed node of the project/task hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Project(project::Model),
    Task(task::Model),
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Project(project) => &project.name,
            Item::Task(task) => &task.name,
        }
    }

    pub fn node_ref(&self) -> NodeRef<i32> {
        match self {
            Item::Project(project) => project.node_ref(),
            Item::Task(task) => task.node_ref(),
        }
    }
}

impl From<project::Model> for Item {
    fn from(model: project::Model) -> Self {
        Item::Project(model)
    }
}

impl From<task::Model> for Item {
    fn from(model: task::Model) -> Self {
        Item::Task(model)
    }
}

pub type ItemRepo = ClosureTreeRepository<i32, Item>;
pub type CategoryRepo = ClosureTreeRepository<i32, category::Model>;

const SCHEMA: &[&str] = &[
    "CREATE TABLE projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER,
        parent_type TEXT,
        name TEXT NOT NULL
    )",
    "CREATE TABLE tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER,
        parent_type TEXT,
        name TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE item_hierarchies (
        ancestor_id INTEGER NOT NULL,
        ancestor_type TEXT NOT NULL,
        descendant_id INTEGER NOT NULL,
        descendant_type TEXT NOT NULL,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, ancestor_type, descendant_id, descendant_type)
    )",
    "CREATE TABLE categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER,
        name TEXT NOT NULL
    )",
    "CREATE TABLE category_hierarchies (
        ancestor_id INTEGER NOT NULL,
        ancestor_type TEXT NOT NULL,
        descendant_id INTEGER NOT NULL,
        descendant_type TEXT NOT NULL,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, ancestor_type, descendant_id, descendant_type)
    )",
];

/// Fresh in-memory SQLite database with both hierarchies' tables.
///
/// The pool holds a single connection so every handle sees the same memory
/// database; never touch `db` while a transaction from it is open.
pub async fn setup_database() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    for statement in SCHEMA {
        execute(&db, statement).await?;
    }
    Ok(db)
}

pub async fn execute(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(DbBackend::Sqlite, sql.to_owned()))
        .await?;
    Ok(())
}

pub fn item_config() -> ClosureTreeConfig {
    ClosureTreeConfig::new("items", "item_hierarchies")
        .with_kind(project::Model::node_kind())
        .with_kind(task::Model::node_kind())
}

pub fn item_repo() -> ItemRepo {
    item_repo_with(ClosureTreeOptions::default())
}

pub fn item_repo_with(options: ClosureTreeOptions) -> ItemRepo {
    let registry: KindRegistry<i32, Item> = KindRegistry::new()
        .register_model::<project::Model>()
        .register_model::<task::Model>();
    ClosureTreeRepository::new(options.apply(item_config()), registry)
}

pub fn category_repo() -> CategoryRepo {
    category_repo_with(ClosureTreeOptions::default())
}

pub fn category_repo_with(options: ClosureTreeOptions) -> CategoryRepo {
    let config = ClosureTreeConfig::new("categories", "category_hierarchies")
        .with_kind(category::Model::node_kind());
    let registry: KindRegistry<i32, category::Model> =
        KindRegistry::new().register_model::<category::Model>();
    ClosureTreeRepository::new(options.apply(config), registry)
}

/// Insert a project and fold it into the hierarchy in one transaction.
pub async fn create_project(
    repo: &ItemRepo,
    db: &DatabaseConnection,
    name: &str,
    parent: Option<&NodeRef<i32>>,
) -> Result<project::Model, ClosureTreeError> {
    let txn = repo.begin(db).await?;
    let active = project::ActiveModel {
        parent_id: Set(parent.map(|parent| parent.id)),
        parent_type: Set(parent.map(|parent| parent.kind.clone())),
        name: Set(name.to_owned()),
        ..Default::default()
    };
    let result = match active.insert(txn.connection()).await {
        Ok(model) => repo
            .after_save_model(txn.connection(), &model)
            .await
            .map(|_| model),
        Err(err) => Err(err.into()),
    };
    txn.finish(result).await
}

pub async fn create_task(
    repo: &ItemRepo,
    db: &DatabaseConnection,
    name: &str,
    parent: Option<&NodeRef<i32>>,
    position: i32,
) -> Result<task::Model, ClosureTreeError> {
    let txn = repo.begin(db).await?;
    let active = task::ActiveModel {
        parent_id: Set(parent.map(|parent| parent.id)),
        parent_type: Set(parent.map(|parent| parent.kind.clone())),
        name: Set(name.to_owned()),
        position: Set(position),
        ..Default::default()
    };
    let result = match active.insert(txn.connection()).await {
        Ok(model) => repo
            .after_save_model(txn.connection(), &model)
            .await
            .map(|_| model),
        Err(err) => Err(err.into()),
    };
    txn.finish(result).await
}

pub async fn create_category(
    repo: &CategoryRepo,
    db: &DatabaseConnection,
    name: &str,
    parent: Option<&category::Model>,
) -> Result<category::Model, ClosureTreeError> {
    let txn = repo.begin(db).await?;
    let active = category::ActiveModel {
        parent_id: Set(parent.map(|parent| parent.id)),
        name: Set(name.to_owned()),
        ..Default::default()
    };
    let result = match active.insert(txn.connection()).await {
        Ok(model) => repo
            .after_save_model(txn.connection(), &model)
            .await
            .map(|_| model),
        Err(err) => Err(err.into()),
    };
    txn.finish(result).await
}

pub fn names<'a>(nodes: impl IntoIterator<Item = &'a category::Model>) -> Vec<&'a str> {
    nodes.into_iter().map(|node| node.name.as_str()).collect()
}

pub fn item_names(items: &[Item]) -> Vec<&str> {
    items.iter().map(Item::name).collect()
}

pub async fn edges<N: Send + 'static>(
    repo: &ClosureTreeRepository<i32, N>,
    db: &DatabaseConnection,
) -> Result<Vec<HierarchyEdge<i32>>, ClosureTreeError> {
    repo.store().all_edges(db).await
}
