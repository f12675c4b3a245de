//! Directory capability traits
//!
//! The engine never talks HTTP. It drives a directory through these
//! capability traits, which a connector crate implements against a real
//! service and tests implement in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credential::{CredentialKind, CredentialRecord, NewCredential, OwnerKind};
use crate::error::DirectoryResult;
use crate::ids::{KeyId, ObjectId};

/// Type of a directory object as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    User,
    Group,
    ServicePrincipal,
    Application,
    Device,
    Unknown,
}

impl ObjectKind {
    /// Map an OData type tag such as `#microsoft.graph.group`.
    #[must_use]
    pub fn from_odata_type(odata_type: &str) -> Self {
        let name = odata_type.rsplit('.').next().unwrap_or(odata_type);
        match name {
            "user" => Self::User,
            "group" => Self::Group,
            "servicePrincipal" => Self::ServicePrincipal,
            "application" => Self::Application,
            "device" => Self::Device,
            _ => Self::Unknown,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::ServicePrincipal => "service_principal",
            Self::Application => "application",
            Self::Device => "device",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<OwnerKind> for ObjectKind {
    fn from(kind: OwnerKind) -> Self {
        match kind {
            OwnerKind::Application => Self::Application,
            OwnerKind::ServicePrincipal => Self::ServicePrincipal,
        }
    }
}

/// Minimal view of a directory object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub kind: ObjectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ObjectRef {
    /// Create an object reference.
    pub fn new(id: ObjectId, kind: ObjectKind) -> Self {
        Self {
            id,
            kind,
            display_name: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Desired attributes of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mail_nickname: String,
    pub security_enabled: bool,
    pub mail_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_types: Vec<String>,
}

impl NewGroup {
    /// A security group with a generated mail nickname.
    pub fn security(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            description: None,
            mail_nickname: uuid::Uuid::new_v4().simple().to_string(),
            security_enabled: true,
            mail_enabled: false,
            group_types: Vec::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Attribute changes to an existing group. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GroupPatch {
    /// Check if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.description.is_none()
    }
}

/// Group as stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: ObjectId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_nickname: Option<String>,
    pub security_enabled: bool,
    pub mail_enabled: bool,
}

/// Base trait for directory collaborators.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up any directory object by id.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    async fn get_object(&self, id: &ObjectId) -> DirectoryResult<Option<ObjectRef>>;
}

/// Capability for searching objects by display name.
#[async_trait]
pub trait NameLookup: Send + Sync {
    /// All objects of `kind` whose display name matches `display_name`.
    ///
    /// Implementations may match loosely; callers re-check the name.
    async fn find_by_display_name(
        &self,
        kind: ObjectKind,
        display_name: &str,
    ) -> DirectoryResult<Vec<ObjectRef>>;
}

/// Capability for managing credentials on applications and service principals.
#[async_trait]
pub trait CredentialOp: Directory {
    /// All credentials of `kind` on the owner, in directory order.
    async fn list_credentials(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        kind: CredentialKind,
    ) -> DirectoryResult<Vec<CredentialRecord>>;

    /// Create a credential and return what the directory stored.
    async fn add_credential(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        credential: &NewCredential,
    ) -> DirectoryResult<CredentialRecord>;

    /// Remove one credential. Fails with `NotFound` if the key is absent.
    async fn remove_credential(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        kind: CredentialKind,
        key_id: &KeyId,
    ) -> DirectoryResult<()>;
}

/// Capability for managing groups and their member and owner edges.
#[async_trait]
pub trait GroupOp: Directory + NameLookup {
    /// Ids of all direct members, every page.
    async fn list_members(&self, group_id: &ObjectId) -> DirectoryResult<Vec<ObjectId>>;

    /// Add a member. Fails with `AlreadyExists` if already present.
    async fn add_member(&self, group_id: &ObjectId, member_id: &ObjectId) -> DirectoryResult<()>;

    /// Remove a member. Fails with `NotFound` if absent.
    async fn remove_member(&self, group_id: &ObjectId, member_id: &ObjectId)
        -> DirectoryResult<()>;

    /// Ids of all owners, every page.
    async fn list_owners(&self, group_id: &ObjectId) -> DirectoryResult<Vec<ObjectId>>;

    /// Add an owner. Fails with `AlreadyExists` if already present.
    async fn add_owner(&self, group_id: &ObjectId, owner_id: &ObjectId) -> DirectoryResult<()>;

    /// Remove an owner. Fails with `NotFound` if absent.
    async fn remove_owner(&self, group_id: &ObjectId, owner_id: &ObjectId) -> DirectoryResult<()>;

    /// Create a group.
    async fn create_group(&self, group: &NewGroup) -> DirectoryResult<GroupRecord>;

    /// Update group attributes.
    async fn update_group(&self, group_id: &ObjectId, patch: &GroupPatch) -> DirectoryResult<()>;

    /// Delete a group. Fails with `NotFound` if absent.
    async fn delete_group(&self, group_id: &ObjectId) -> DirectoryResult<()>;
}
