use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Set of user ids backing `read_by`, `deleted_by` and group membership.
///
/// Adding an id that is already present is a no-op, which is what makes
/// mark-read, clear-chat and member addition safe under concurrent retries.
/// Serializes as a plain JSON array so the same value can live in a SQLite
/// text column and a mirror subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdSet(BTreeSet<Uuid>);

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(id: Uuid) -> Self {
        let mut set = Self::new();
        set.insert(id);
        set
    }

    /// Returns true if the id was newly added.
    pub fn insert(&mut self, id: Uuid) -> bool {
        self.0.insert(id)
    }

    /// Returns true if the id was present.
    pub fn remove(&mut self, id: Uuid) -> bool {
        self.0.remove(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<Uuid> {
        self.0.iter().copied().collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".into())
    }

    /// Lenient parse: a corrupt column yields an empty set rather than a
    /// poisoned row.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

impl FromIterator<Uuid> for IdSet {
    fn from_iter<T: IntoIterator<Item = Uuid>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Kind of a chat message, direct or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    File,
    Post,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::File => "file",
            MessageKind::Post => "post",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "voice" => Ok(MessageKind::Voice),
            "file" => Ok(MessageKind::File),
            "post" => Ok(MessageKind::Post),
            other => Err(format!("unknown message kind '{other}'")),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a friendship edge. Only the target user may move an edge out
/// of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendStatus::Pending => "pending",
            FriendStatus::Accepted => "accepted",
            FriendStatus::Rejected => "rejected",
        }
    }

    /// Pending and accepted edges both block a new request for the pair.
    pub fn is_active(&self) -> bool {
        matches!(self, FriendStatus::Pending | FriendStatus::Accepted)
    }
}

impl FromStr for FriendStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FriendStatus::Pending),
            "accepted" => Ok(FriendStatus::Accepted),
            "rejected" => Ok(FriendStatus::Rejected),
            other => Err(format!("unknown friend status '{other}'")),
        }
    }
}

/// Whether a relational row has been published to the realtime mirror.
/// Rows stuck in `Pending` are picked up by the repair sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idset_insert_is_idempotent() {
        let id = Uuid::new_v4();
        let mut set = IdSet::new();
        assert!(set.insert(id));
        assert!(!set.insert(id));
        assert_eq!(set.len(), 1);
        assert!(set.contains(id));
    }

    #[test]
    fn idset_survives_corrupt_json() {
        let set = IdSet::from_json("not json at all");
        assert!(set.is_empty());
    }

    #[test]
    fn idset_json_round_trips_through_text_column() {
        let set: IdSet = [Uuid::new_v4(), Uuid::new_v4()].into_iter().collect();
        let restored = IdSet::from_json(&set.to_json());
        assert_eq!(set, restored);
    }
}
