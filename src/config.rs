use crc32fast::Hasher;
use sea_orm::IsolationLevel;
use serde::{Deserialize, Serialize};

use crate::error::ClosureTreeError;

/// Configuration describing one hierarchy: its closure table, the record
/// kinds that share it, and how maintenance runs.
///
/// One instance per hierarchy, owned by whoever wires up the repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClosureTreeConfig {
    hierarchy_name: String,
    hierarchy: HierarchyTable,
    #[serde(default)]
    kinds: Vec<NodeKind>,
    #[serde(default)]
    dependent_behavior: DependentBehavior,
    #[serde(default)]
    maintenance: MaintenanceStrategy,
    #[serde(default = "default_isolation")]
    isolation: Option<Isolation>,
    #[serde(default)]
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

fn default_isolation() -> Option<Isolation> {
    Some(Isolation::Serializable)
}

impl ClosureTreeConfig {
    /// Create a configuration for the hierarchy stored in `hierarchy_table`.
    pub fn new(hierarchy_name: impl Into<String>, hierarchy_table: impl Into<String>) -> Self {
        Self {
            hierarchy_name: hierarchy_name.into(),
            hierarchy: HierarchyTable::new(hierarchy_table),
            kinds: Vec::new(),
            dependent_behavior: DependentBehavior::default(),
            maintenance: MaintenanceStrategy::default(),
            isolation: default_isolation(),
            advisory_lock_strategy: None,
        }
    }

    /// Parse a JSON document into a configuration.
    pub fn from_json(raw: &str) -> Result<Self, ClosureTreeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Register a node kind sharing this hierarchy.
    ///
    /// Registering the same tag twice replaces the earlier entry.
    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kinds.retain(|existing| existing.tag != kind.tag);
        self.kinds.push(kind);
        self
    }

    pub(crate) fn apply_options(mut self, options: ClosureTreeOptions) -> Self {
        if let Some(hierarchy) = options.hierarchy {
            self.hierarchy = hierarchy;
        }
        if let Some(behavior) = options.dependent_behavior {
            self.dependent_behavior = behavior;
        }
        if let Some(maintenance) = options.maintenance {
            self.maintenance = maintenance;
        }
        if let Some(isolation) = options.isolation {
            self.isolation = isolation;
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = Some(strategy);
        }
        self
    }

    /// Logical name of the hierarchy, used to namespace advisory locks.
    pub fn hierarchy_name(&self) -> &str {
        &self.hierarchy_name
    }

    /// Closure table layout.
    pub fn hierarchy(&self) -> &HierarchyTable {
        &self.hierarchy
    }

    /// Every registered kind, in registration order.
    pub fn kinds(&self) -> &[NodeKind] {
        &self.kinds
    }

    /// Look up a kind by its type tag.
    pub fn kind(&self, tag: &str) -> Result<&NodeKind, ClosureTreeError> {
        self.kinds
            .iter()
            .find(|kind| kind.tag == tag)
            .ok_or_else(|| ClosureTreeError::UnknownKind(tag.to_owned()))
    }

    /// Dependent behavior when deleting nodes.
    pub fn dependent_behavior(&self) -> DependentBehavior {
        self.dependent_behavior
    }

    /// How parent changes are folded into the closure table.
    pub fn maintenance(&self) -> MaintenanceStrategy {
        self.maintenance
    }

    /// Isolation level requested for maintenance transactions.
    pub fn isolation(&self) -> Option<Isolation> {
        self.isolation
    }

    /// Advisory lock strategy (PostgreSQL only). Defaults to a key derived
    /// from the hierarchy name and table.
    pub fn advisory_lock_strategy(&self) -> AdvisoryLockStrategy {
        match &self.advisory_lock_strategy {
            Some(strategy) => strategy.clone(),
            None => AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
                &self.hierarchy_name,
                &self.hierarchy.table,
            )),
        }
    }
}

/// Builder-style overrides applied on top of a base configuration.
#[derive(Clone, Debug, Default)]
pub struct ClosureTreeOptions {
    hierarchy: Option<HierarchyTable>,
    dependent_behavior: Option<DependentBehavior>,
    maintenance: Option<MaintenanceStrategy>,
    isolation: Option<Option<Isolation>>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl ClosureTreeOptions {
    pub fn hierarchy(mut self, table: HierarchyTable) -> Self {
        self.hierarchy = Some(table);
        self
    }

    pub fn dependent_behavior(mut self, behavior: DependentBehavior) -> Self {
        self.dependent_behavior = Some(behavior);
        self
    }

    pub fn maintenance(mut self, strategy: MaintenanceStrategy) -> Self {
        self.maintenance = Some(strategy);
        self
    }

    /// `None` keeps the connection's default isolation level.
    pub fn isolation(mut self, isolation: Option<Isolation>) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: ClosureTreeConfig) -> ClosureTreeConfig {
        base.apply_options(self)
    }
}

/// Table and column names of the closure table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyTable {
    pub table: String,
    pub ancestor_id: String,
    pub ancestor_type: String,
    pub descendant_id: String,
    pub descendant_type: String,
    pub generations: String,
}

impl HierarchyTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

impl Default for HierarchyTable {
    fn default() -> Self {
        Self {
            table: "hierarchies".to_string(),
            ancestor_id: "ancestor_id".to_string(),
            ancestor_type: "ancestor_type".to_string(),
            descendant_id: "descendant_id".to_string(),
            descendant_type: "descendant_type".to_string(),
            generations: "generations".to_string(),
        }
    }
}

/// Layout of one record kind taking part in the hierarchy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeKind {
    pub tag: String,
    pub table: String,
    #[serde(default = "NodeKind::default_id_column")]
    pub id_column: String,
    #[serde(default = "NodeKind::default_parent_column")]
    pub parent_column: String,
    /// Column storing the parent's type tag. Without it the parent is
    /// assumed to be of the same kind.
    #[serde(default)]
    pub parent_type_column: Option<String>,
    #[serde(default)]
    pub name_column: Option<String>,
    #[serde(default)]
    pub order: OrderStrategy,
}

impl NodeKind {
    pub fn new(tag: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            table: table.into(),
            id_column: Self::default_id_column(),
            parent_column: Self::default_parent_column(),
            parent_type_column: None,
            name_column: None,
            order: OrderStrategy::default(),
        }
    }

    fn default_id_column() -> String {
        "id".to_string()
    }

    fn default_parent_column() -> String {
        "parent_id".to_string()
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn parent_column(mut self, column: impl Into<String>) -> Self {
        self.parent_column = column.into();
        self
    }

    pub fn parent_type_column(mut self, column: impl Into<String>) -> Self {
        self.parent_type_column = Some(column.into());
        self
    }

    pub fn name_column(mut self, column: impl Into<String>) -> Self {
        self.name_column = Some(column.into());
        self
    }

    pub fn order(mut self, strategy: OrderStrategy) -> Self {
        self.order = strategy;
        self
    }
}

/// Behaviour applied to the children of a deleted node.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentBehavior {
    /// Children become roots.
    #[default]
    Nullify,
    /// Children attach to the deleted node's parent.
    Adopt,
    /// The whole subtree is deleted.
    Destroy,
}

/// How a parent change is written to the closure table.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStrategy {
    /// Apply the delete/insert delta for the moved subtree.
    #[default]
    Incremental,
    /// Recompute the moved subtree from its parent pointers.
    Rebuild,
}

/// Strategy used to order children and siblings.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStrategy {
    #[default]
    Manual,
    NumericColumn { column: String },
}

impl OrderStrategy {
    pub fn numeric_column(column: impl Into<String>) -> Self {
        Self::NumericColumn {
            column: column.into(),
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            OrderStrategy::Manual => None,
            OrderStrategy::NumericColumn { column } => Some(column.as_str()),
        }
    }
}

/// Transaction isolation requested for maintenance.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl From<Isolation> for IsolationLevel {
    fn from(value: Isolation) -> Self {
        match value {
            Isolation::ReadCommitted => IsolationLevel::ReadCommitted,
            Isolation::RepeatableRead => IsolationLevel::RepeatableRead,
            Isolation::Serializable => IsolationLevel::Serializable,
        }
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(hierarchy: &str, table: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(hierarchy.as_bytes());
        hasher.update(b"/");
        hasher.update(table.as_bytes());
        let crc = hasher.finalize();
        Self(format!("closure-table::{hierarchy}::{table}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}
