//! Operations issued against the directory
//!
//! Every mutation a pass performs is described by an [`Operation`] so that
//! progress can be reported on success, partial failure and cancellation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credential::{CredentialKind, OwnerKind};
use crate::ids::{CredentialId, ObjectId};

/// Many-to-many edge managed on a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Group membership (group -> member object).
    Members,
    /// Group ownership (group -> owner principal).
    Owners,
}

impl Relation {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Members => "members",
            Relation::Owners => "owners",
        }
    }

    /// Singular noun for one edge of this relation.
    #[must_use]
    pub fn edge_noun(&self) -> &'static str {
        match self {
            Relation::Members => "member",
            Relation::Owners => "owner",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single directory mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Add `target_id` to the group's `relation` set.
    AddEdge {
        relation: Relation,
        group_id: ObjectId,
        target_id: ObjectId,
    },
    /// Remove `target_id` from the group's `relation` set.
    RemoveEdge {
        relation: Relation,
        group_id: ObjectId,
        target_id: ObjectId,
    },
    /// Create a credential on its owner object.
    CreateCredential {
        owner_kind: OwnerKind,
        kind: CredentialKind,
        id: CredentialId,
    },
    /// Remove a credential from its owner object.
    DeleteCredential {
        owner_kind: OwnerKind,
        kind: CredentialKind,
        id: CredentialId,
    },
    /// Create a group.
    CreateGroup { display_name: String },
    /// Delete a group.
    DeleteGroup { group_id: ObjectId },
}

impl Operation {
    /// Edge addition.
    #[must_use]
    pub fn add_edge(relation: Relation, group_id: ObjectId, target_id: ObjectId) -> Self {
        Self::AddEdge {
            relation,
            group_id,
            target_id,
        }
    }

    /// Edge removal.
    #[must_use]
    pub fn remove_edge(relation: Relation, group_id: ObjectId, target_id: ObjectId) -> Self {
        Self::RemoveEdge {
            relation,
            group_id,
            target_id,
        }
    }

    /// Check if this operation adds to the directory.
    #[must_use]
    pub fn is_additive(&self) -> bool {
        matches!(
            self,
            Self::AddEdge { .. } | Self::CreateCredential { .. } | Self::CreateGroup { .. }
        )
    }

    /// The id of the object the operation is addressed to, if known.
    #[must_use]
    pub fn target(&self) -> Option<String> {
        match self {
            Self::AddEdge { target_id, .. } | Self::RemoveEdge { target_id, .. } => {
                Some(target_id.to_string())
            }
            Self::CreateCredential { id, .. } | Self::DeleteCredential { id, .. } => {
                Some(id.key_id().to_string())
            }
            Self::CreateGroup { .. } => None,
            Self::DeleteGroup { group_id } => Some(group_id.to_string()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddEdge {
                relation,
                group_id,
                target_id,
            } => write!(f, "add {} {target_id} to group {group_id}", relation.edge_noun()),
            Self::RemoveEdge {
                relation,
                group_id,
                target_id,
            } => write!(
                f,
                "remove {} {target_id} from group {group_id}",
                relation.edge_noun()
            ),
            Self::CreateCredential { owner_kind, kind, id } => {
                write!(f, "create {kind} {} on {owner_kind} {}", id.key_id(), id.owner_id())
            }
            Self::DeleteCredential { owner_kind, kind, id } => {
                write!(f, "delete {kind} {} from {owner_kind} {}", id.key_id(), id.owner_id())
            }
            Self::CreateGroup { display_name } => write!(f, "create group {display_name:?}"),
            Self::DeleteGroup { group_id } => write!(f, "delete group {group_id}"),
        }
    }
}
