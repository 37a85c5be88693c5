//! Fixture row types

use tablecache::{CachedRow, FilterValue, Filterable, GroupKey, KeyedBy, RowId, SiblingRow};
use uuid::Uuid;

/// A task, grouped by (project, owner) and keyed by owner
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: RowId,
    pub project: i64,
    pub owner: i64,
    pub title: String,
}

impl Task {
    pub fn new(id: RowId, project: i64, owner: i64) -> Self {
        Self {
            id,
            project,
            owner,
            title: format!("task {}", id),
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }
}

impl CachedRow for Task {
    const TABLE: &'static str = "tasks";

    fn id(&self) -> RowId {
        self.id
    }
}

impl SiblingRow for Task {
    fn group(&self) -> GroupKey {
        GroupKey::pair(self.project, self.owner)
    }
}

impl KeyedBy<i64> for Task {
    const KEY_COLUMN: &'static str = "owner";

    fn key(&self) -> i64 {
        self.owner
    }
}

impl Filterable for Task {
    fn group_key(&self) -> Option<GroupKey> {
        Some(self.group())
    }

    fn column_value(&self, column: &str) -> Option<FilterValue> {
        match column {
            "id" => Some(FilterValue::Int(self.id)),
            "owner" => Some(FilterValue::Int(self.owner)),
            "project" => Some(FilterValue::Int(self.project)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: RowId,
    pub uuid: Uuid,
    pub name: String,
}

impl User {
    pub fn new(id: RowId, name: &str) -> Self {
        Self {
            id,
            uuid: Uuid::from_u128(0x5eed_0000 + id as u128),
            name: name.to_string(),
        }
    }
}

impl CachedRow for User {
    const TABLE: &'static str = "users";

    fn id(&self) -> RowId {
        self.id
    }
}

impl KeyedBy<Uuid> for User {
    const KEY_COLUMN: &'static str = "uuid";

    fn key(&self) -> Uuid {
        self.uuid
    }
}

impl KeyedBy<String> for User {
    const KEY_COLUMN: &'static str = "name";

    fn key(&self) -> String {
        self.name.clone()
    }
}

impl Filterable for User {
    fn column_value(&self, column: &str) -> Option<FilterValue> {
        match column {
            "id" => Some(FilterValue::Int(self.id)),
            "uuid" => Some(FilterValue::Uuid(self.uuid)),
            "name" => Some(FilterValue::Text(self.name.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: RowId,
    pub user: Uuid,
}

impl CachedRow for Session {
    const TABLE: &'static str = "sessions";

    fn id(&self) -> RowId {
        self.id
    }
}

impl KeyedBy<Uuid> for Session {
    const KEY_COLUMN: &'static str = "user_uuid";

    fn key(&self) -> Uuid {
        self.user
    }
}

impl Filterable for Session {
    fn column_value(&self, column: &str) -> Option<FilterValue> {
        match column {
            "id" => Some(FilterValue::Int(self.id)),
            "user_uuid" => Some(FilterValue::Uuid(self.user)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: RowId,
    pub actor: i64,
}

impl CachedRow for AuditEntry {
    const TABLE: &'static str = "audit_log";

    fn id(&self) -> RowId {
        self.id
    }
}

impl KeyedBy<i64> for AuditEntry {
    const KEY_COLUMN: &'static str = "actor";

    fn key(&self) -> i64 {
        self.actor
    }
}

impl Filterable for AuditEntry {
    fn column_value(&self, column: &str) -> Option<FilterValue> {
        match column {
            "id" => Some(FilterValue::Int(self.id)),
            "actor" => Some(FilterValue::Int(self.actor)),
            _ => None,
        }
    }
}
