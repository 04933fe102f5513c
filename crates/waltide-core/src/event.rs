use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to an entity version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Modify,
    Delete,
}

impl ChangeAction {
    /// Action implied by an entity version and its visibility.
    pub fn for_version(version: i64, visible: bool) -> Self {
        if !visible {
            ChangeAction::Delete
        } else if version == 1 {
            ChangeAction::Create
        } else {
            ChangeAction::Modify
        }
    }
}

/// A member of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMember {
    pub member_type: String,
    pub member_id: i64,
    pub role: String,
}

/// Kind-specific payload of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntityBody {
    Node { latitude: f64, longitude: f64 },
    Way { nodes: Vec<i64> },
    Relation { members: Vec<RelationMember> },
}

impl EntityBody {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityBody::Node { .. } => "node",
            EntityBody::Way { .. } => "way",
            EntityBody::Relation { .. } => "relation",
        }
    }
}

/// One version of an entity as stored in the source database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: i64,
    pub version: i64,
    pub changeset_id: i64,
    pub timestamp: DateTime<Utc>,
    pub visible: bool,
    pub user_id: Option<i64>,
    pub user: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub body: EntityBody,
}

impl EntitySnapshot {
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

/// A change event forwarded to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub entity: EntitySnapshot,
}

impl ChangeEvent {
    pub fn new(entity: EntitySnapshot) -> Self {
        Self {
            action: ChangeAction::for_version(entity.version, entity.visible),
            entity,
        }
    }

    /// Timestamp of the entity carried by this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.entity.timestamp
    }
}
