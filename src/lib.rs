//! Closure-table hierarchies for SeaORM entities.
//!
//! A side table stores every (ancestor, descendant, generations) triple
//! implied by the records' parent pointers and is kept in step as parents
//! change. Several record kinds can share one hierarchy; refs into the
//! closure table carry a kind tag and resolve back to typed records through
//! a [`KindRegistry`]. PostgreSQL and SQLite are supported.

pub mod config;
pub mod error;
pub mod hash_tree;
pub mod lock;
pub mod node;
pub mod query;
pub mod records;
pub mod repository;
pub mod resolver;
mod sql;
pub mod store;
pub mod tracker;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{
        AdvisoryLockStrategy, ClosureTreeConfig, ClosureTreeOptions, DependentBehavior,
        MaintenanceStrategy, NodeKind, OrderStrategy,
    };
    pub use crate::node::{NodeRef, TreeNode};
    pub use crate::query::KindScope;
    pub use crate::repository::ClosureTreeRepository;
    pub use crate::resolver::KindRegistry;
}

pub use closure_table_macros::TreeNode;
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, ClosureTreeConfig, ClosureTreeOptions,
    DependentBehavior, HierarchyTable, Isolation, MaintenanceStrategy, NodeKind, OrderStrategy,
};
pub use error::ClosureTreeError;
pub use hash_tree::{HashTree, HashTreeNode};
pub use lock::LockedTransaction;
pub use node::{HierarchyEdge, NodeId, NodeRef, TreeNode};
pub use query::{HierarchyQuery, KindScope};
pub use repository::ClosureTreeRepository;
pub use resolver::{KindLookup, KindRegistry, ModelLookup};
pub use store::HierarchyStore;
pub use tracker::{ParentChange, ParentPointerTracker};
