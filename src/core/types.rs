// src/core/types.rs
//! Snapshot data model exchanged with the Core
//!
//! Field names serialize in camelCase so snapshots round-trip with the
//! JSON shape the rest of the runtime stores and displays.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque domain schema handed to the Core on every call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Stable hash of the schema definition
    pub hash: String,

    /// Domain definition, uninterpreted by the engine
    #[serde(default)]
    pub definition: Value,
}

impl Schema {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            definition: Value::Null,
        }
    }

    pub fn with_definition(mut self, definition: Value) -> Self {
        self.definition = definition;
        self
    }
}

/// An action request driven by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    /// Action name
    #[serde(rename = "type")]
    pub intent_type: String,

    /// Action input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Unique id for this submission
    pub intent_id: String,
}

impl Intent {
    /// Create an intent with a fresh ULID id
    pub fn new(intent_type: impl Into<String>) -> Self {
        Self {
            intent_type: intent_type.into(),
            input: None,
            intent_id: ulid::Ulid::new().to_string(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_id(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = intent_id.into();
        self
    }
}

/// Patch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Set,
    Merge,
}

/// A single declarative mutation of `snapshot.data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,

    /// Dot-separated path rooted at `data`
    pub path: String,

    pub value: Value,
}

impl Patch {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Set,
            path: path.into(),
            value,
        }
    }

    pub fn merge(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Merge,
            path: path.into(),
            value,
        }
    }
}

/// Where in the action flow a requirement was raised
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPosition {
    pub node_path: String,
    pub snapshot_version: u64,
}

/// A pending effect request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub id: String,

    /// Effect type, used to pick a handler
    #[serde(rename = "type")]
    pub effect_type: String,

    #[serde(default)]
    pub params: Value,

    pub action_id: String,

    pub flow_position: FlowPosition,

    /// Creation time (milliseconds since epoch, from the frozen context)
    pub created_at: i64,
}

/// Coarse system status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    #[default]
    Idle,
    Pending,
}

/// Where a recorded error originated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSource {
    pub action_id: String,
    pub node_path: String,
}

/// An error entry stored in `system.errors`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorValue {
    pub code: String,
    pub message: String,
    pub source: ErrorSource,

    /// Milliseconds since epoch, from the frozen context
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Engine-owned part of the snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    pub status: SystemStatus,
    pub pending_requirements: Vec<Requirement>,
    pub errors: Vec<ErrorValue>,
    pub last_error: Option<ErrorValue>,
}

impl SystemState {
    pub fn is_pending(&self, requirement_id: &str) -> bool {
        self.pending_requirements
            .iter()
            .any(|r| r.id == requirement_id)
    }

    /// `status == idle` iff nothing is pending
    pub fn is_coherent(&self) -> bool {
        (self.status == SystemStatus::Idle) == self.pending_requirements.is_empty()
    }
}

/// Snapshot metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub version: u64,
    pub timestamp: i64,
    pub random_seed: String,
    pub schema_hash: String,
}

/// Immutable state value at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub data: Value,
    pub computed: Map<String, Value>,
    pub system: SystemState,
    pub meta: SnapshotMeta,
}

impl Snapshot {
    /// Empty snapshot at version 0 for a schema
    pub fn genesis(schema_hash: impl Into<String>) -> Self {
        Self {
            data: Value::Object(Map::new()),
            computed: Map::new(),
            system: SystemState::default(),
            meta: SnapshotMeta {
                schema_hash: schema_hash.into(),
                ..Default::default()
            },
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Look up a dot-separated path under `data`
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|s| !s.is_empty())
            .try_fold(&self.data, |node, segment| node.get(segment))
    }
}

/// Outcome reported by `Core::compute`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeStatus {
    Complete,
    Pending,
    Error,
}

impl ComputeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ComputeStatus::Complete | ComputeStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeStatus::Complete => "complete",
            ComputeStatus::Pending => "pending",
            ComputeStatus::Error => "error",
        }
    }
}

/// Result of one compute step
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeResult {
    pub status: ComputeStatus,
    pub snapshot: Snapshot,

    /// Requirements raised by this step, to be dispatched
    pub requirements: Vec<Requirement>,
}
