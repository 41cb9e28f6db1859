//! Flow and definition types for Conveyor.
//!
//! A `Flow` is the logical identity of a workflow (one per distinct name).
//! Each edit of its graph mints a new immutable `FlowVersion`; published
//! versions are never edited in place. The definition itself is a node/edge
//! graph (`FlowDefinition`) that the compiler in `conveyor-core` turns into
//! an executable plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Flow identity
// ---------------------------------------------------------------------------

/// Logical workflow identity. Created once per distinct name, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    /// Unique human-readable name.
    pub name: String,
    /// When the flow was first created.
    pub created_at: DateTime<Utc>,
}

impl Flow {
    /// Create a new flow with a freshly minted id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Flow versions
// ---------------------------------------------------------------------------

/// Lifecycle status of a flow version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowVersionStatus {
    /// Editable; cannot start runs.
    Draft,
    /// Frozen; runs may be started against it.
    Published,
}

/// An immutable compiled-definition snapshot of a flow.
///
/// New edits always create a new version; a published version's definition
/// never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    /// UUIDv7 version id.
    pub id: Uuid,
    /// The flow this version belongs to.
    pub flow_id: Uuid,
    /// Monotonically increasing version number within the flow.
    pub version: u32,
    /// The node/edge graph.
    pub definition: FlowDefinition,
    /// Draft or published.
    pub status: FlowVersionStatus,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Definition graph
// ---------------------------------------------------------------------------

/// A declarative node/edge graph describing one workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Declared nodes. Ids must be unique within the definition.
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    /// Directed edges between declared node ids.
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

/// A single node in the definition graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// User-defined node id (e.g. "fetch-batch"). Unique within a definition.
    pub id: String,
    /// The kind of node plus its type-specific payload.
    pub config: NodeConfig,
}

/// Type-specific node payload.
///
/// Internally tagged by `type` to match the persisted JSON structure:
/// ```json
/// { "type": "task", "code_ref": "inventory.fetch", "args": { "limit": 50 } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Entry marker. At most one per definition.
    Start {},
    /// Exit marker; the run completes when it is reached.
    End {},
    /// Handler-backed task: a `code_ref` resolved through the registry at
    /// dispatch time, plus static arguments passed to the handler.
    Task {
        code_ref: String,
        #[serde(default)]
        args: serde_json::Map<String, Value>,
    },
    /// Boolean branch: the expression is evaluated against the run data and
    /// selects the `on_true` or `on_false` successor.
    Condition {
        expression: Predicate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_true: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_false: Option<String>,
    },
}

impl NodeConfig {
    /// Short name of the node kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeConfig::Start {} => "start",
            NodeConfig::End {} => "end",
            NodeConfig::Task { .. } => "task",
            NodeConfig::Condition { .. } => "condition",
        }
    }
}

/// A directed edge between two declared nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
}

// ---------------------------------------------------------------------------
// Condition expressions
// ---------------------------------------------------------------------------

/// Boolean expression tree evaluated against the run data map.
///
/// Deserialized from the persisted JSON form at compile time; evaluation is
/// pure (see `conveyor_core::engine::expression`). Variable names may use
/// dotted paths into nested objects (`"batch.processed"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Truthiness of a variable: false for null/absent/false/0/"".
    Var { name: String },
    /// Equality of a variable against a literal.
    Eq { var: String, value: Value },
    /// Numeric greater-or-equal of a variable against a literal.
    Gte { var: String, value: Value },
    /// All sub-predicates hold.
    And { all: Vec<Predicate> },
    /// At least one sub-predicate holds.
    Or { any: Vec<Predicate> },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
