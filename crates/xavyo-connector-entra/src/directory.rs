//! Graph-backed implementation of the reconciliation collaborator traits.
//!
//! Every call maps its failure through [`EntraError::into_directory_error`],
//! so the engine only ever sees `NotFound`, `AlreadyExists`, `Transient` or
//! `Rejected`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};
use xavyo_reconcile::credential::{
    CertificateType, CredentialKind, CredentialRecord, KeyUsage, NewCredential, OwnerKind,
    PreparedMaterial,
};
use xavyo_reconcile::error::{DirectoryError, DirectoryResult};
use xavyo_reconcile::ids::{KeyId, ObjectId};
use xavyo_reconcile::operation::Relation;
use xavyo_reconcile::traits::{
    CredentialOp, Directory, GroupOp, GroupPatch, GroupRecord, NameLookup, NewGroup, ObjectKind,
    ObjectRef,
};

use crate::{EntraConfig, EntraCredentials, EntraError, EntraResult, GraphClient};

/// Graph `directoryObject` projection.
#[derive(Debug, Deserialize)]
struct GraphDirectoryObject {
    id: String,
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

/// Graph `group` resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphGroup {
    id: String,
    display_name: String,
    description: Option<String>,
    mail_nickname: Option<String>,
    #[serde(default)]
    security_enabled: bool,
    #[serde(default)]
    mail_enabled: bool,
}

/// Graph `passwordCredential`. `secretText` is never mapped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphPasswordCredential {
    key_id: String,
    display_name: Option<String>,
    start_date_time: DateTime<Utc>,
    end_date_time: DateTime<Utc>,
}

/// Graph `keyCredential`. `key` is null on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphKeyCredential {
    key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    start_date_time: DateTime<Utc>,
    end_date_time: DateTime<Utc>,
    #[serde(rename = "type")]
    key_type: String,
    usage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

/// Credential collections of an application or service principal.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphCredentialOwner {
    #[serde(default)]
    password_credentials: Vec<GraphPasswordCredential>,
    #[serde(default)]
    key_credentials: Vec<GraphKeyCredential>,
}

impl From<GraphPasswordCredential> for CredentialRecord {
    fn from(c: GraphPasswordCredential) -> Self {
        Self {
            key_id: c.key_id,
            kind: CredentialKind::Password,
            description: c.display_name,
            start: c.start_date_time,
            end: c.end_date_time,
            certificate_type: None,
            usage: None,
        }
    }
}

impl From<GraphKeyCredential> for CredentialRecord {
    fn from(c: GraphKeyCredential) -> Self {
        Self {
            certificate_type: c.key_type.parse().ok(),
            usage: c.usage.parse().ok(),
            key_id: c.key_id,
            kind: CredentialKind::Certificate,
            description: c.display_name,
            start: c.start_date_time,
            end: c.end_date_time,
        }
    }
}

impl TryFrom<GraphGroup> for GroupRecord {
    type Error = EntraError;

    fn try_from(g: GraphGroup) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_object_id(&g.id)?,
            display_name: g.display_name,
            description: g.description,
            mail_nickname: g.mail_nickname,
            security_enabled: g.security_enabled,
            mail_enabled: g.mail_enabled,
        })
    }
}

fn parse_object_id(raw: &str) -> EntraResult<ObjectId> {
    ObjectId::parse(raw)
        .map_err(|e| EntraError::UnexpectedResponse(format!("invalid object id {raw:?}: {e}")))
}

fn graph_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Graph collection segment for an object kind.
fn collection(kind: ObjectKind) -> Option<&'static str> {
    match kind {
        ObjectKind::User => Some("users"),
        ObjectKind::Group => Some("groups"),
        ObjectKind::ServicePrincipal => Some("servicePrincipals"),
        ObjectKind::Application => Some("applications"),
        ObjectKind::Device => Some("devices"),
        ObjectKind::Unknown => None,
    }
}

fn owner_collection(kind: OwnerKind) -> &'static str {
    match kind {
        OwnerKind::Application => "applications",
        OwnerKind::ServicePrincipal => "servicePrincipals",
    }
}

/// `$filter` for an exact display name, with single quotes doubled.
fn display_name_filter(display_name: &str) -> String {
    format!("displayName eq '{}'", display_name.replace('\'', "''"))
}

/// Entra ID directory reached through Microsoft Graph.
#[derive(Debug, Clone)]
pub struct EntraDirectory {
    client: GraphClient,
}

impl EntraDirectory {
    /// Connect with client credentials.
    pub fn new(config: &EntraConfig, credentials: EntraCredentials) -> EntraResult<Self> {
        Ok(Self::with_client(GraphClient::new(config, credentials)?))
    }

    /// Wrap an existing Graph client.
    #[must_use]
    pub fn with_client(client: GraphClient) -> Self {
        Self { client }
    }

    /// The underlying Graph client.
    #[must_use]
    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    async fn list_edges(&self, group_id: &ObjectId, relation: Relation) -> DirectoryResult<Vec<ObjectId>> {
        let url = self.client.url(&format!(
            "groups/{group_id}/{relation}?$select=id&$top={}",
            self.client.page_size()
        ));
        let objects: Vec<GraphDirectoryObject> = self
            .client
            .get_all_pages(&url)
            .await
            .map_err(|e| e.into_directory_error(group_id.as_str()))?;

        let ids = objects
            .iter()
            .map(|o| parse_object_id(&o.id))
            .collect::<EntraResult<Vec<_>>>()
            .map_err(|e| e.into_directory_error(group_id.as_str()))?;
        debug!(group_id = %group_id, relation = %relation, count = ids.len(), "Listed edges");
        Ok(ids)
    }

    async fn add_edge(
        &self,
        group_id: &ObjectId,
        target: &ObjectId,
        relation: Relation,
    ) -> DirectoryResult<()> {
        let url = self.client.url(&format!("groups/{group_id}/{relation}/$ref"));
        let body = json!({
            "@odata.id": self.client.url(&format!("directoryObjects/{target}")),
        });
        self.client
            .post_no_content(&url, &body)
            .await
            .map_err(|e| e.into_directory_error(target.as_str()))
    }

    async fn remove_edge(
        &self,
        group_id: &ObjectId,
        target: &ObjectId,
        relation: Relation,
    ) -> DirectoryResult<()> {
        let url = self
            .client
            .url(&format!("groups/{group_id}/{relation}/{target}/$ref"));
        self.client
            .delete(&url)
            .await
            .map_err(|e| e.into_directory_error(target.as_str()))
    }

    async fn credential_owner(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
    ) -> DirectoryResult<GraphCredentialOwner> {
        let url = self.client.url(&format!(
            "{}/{owner_id}?$select=id,passwordCredentials,keyCredentials",
            owner_collection(owner_kind)
        ));
        self.client
            .get(&url)
            .await
            .map_err(|e| e.into_directory_error(owner_id.as_str()))
    }

    /// Replace the whole `keyCredentials` collection. Existing entries are
    /// sent without key material, which Graph keeps unchanged.
    async fn put_key_credentials(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        key_credentials: &[GraphKeyCredential],
    ) -> DirectoryResult<()> {
        let url = self
            .client
            .url(&format!("{}/{owner_id}", owner_collection(owner_kind)));
        self.client
            .patch(&url, &json!({ "keyCredentials": key_credentials }))
            .await
            .map_err(|e| e.into_directory_error(owner_id.as_str()))
    }

    async fn add_password(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        credential: &NewCredential,
        secret: &secrecy::SecretString,
    ) -> DirectoryResult<CredentialRecord> {
        let url = self
            .client
            .url(&format!("{}/{owner_id}/addPassword", owner_collection(owner_kind)));
        let mut password = json!({
            "keyId": credential.key_id.as_str(),
            "startDateTime": graph_timestamp(credential.window.start),
            "endDateTime": graph_timestamp(credential.window.end),
            "secretText": secret.expose_secret(),
        });
        if let Some(description) = &credential.description {
            password["displayName"] = json!(description);
        }

        let created: GraphPasswordCredential = self
            .client
            .post(&url, &json!({ "passwordCredential": password }))
            .await
            .map_err(|e| e.into_directory_error(owner_id.as_str()))?;
        Ok(created.into())
    }

    async fn add_key(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        credential: &NewCredential,
        key_type: CertificateType,
        usage: KeyUsage,
        key: &str,
    ) -> DirectoryResult<CredentialRecord> {
        let mut key_credentials = self.credential_owner(owner_kind, owner_id).await?.key_credentials;
        if key_credentials
            .iter()
            .any(|c| c.key_id == credential.key_id.as_str())
        {
            return Err(DirectoryError::AlreadyExists {
                object_id: credential.key_id.to_string(),
            });
        }
        for existing in &mut key_credentials {
            existing.key = None;
        }

        let new_key = GraphKeyCredential {
            key_id: credential.key_id.to_string(),
            display_name: credential.description.clone(),
            start_date_time: credential.window.start,
            end_date_time: credential.window.end,
            key_type: key_type.as_str().to_string(),
            usage: usage.as_str().to_string(),
            key: Some(key.to_string()),
        };
        let record = CredentialRecord::from(new_key.clone());
        key_credentials.push(new_key);

        // PATCH returns no body, so the record is built from what was sent.
        self.put_key_credentials(owner_kind, owner_id, &key_credentials)
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl Directory for EntraDirectory {
    #[instrument(skip_all, fields(object_id = %id))]
    async fn get_object(&self, id: &ObjectId) -> DirectoryResult<Option<ObjectRef>> {
        let url = self
            .client
            .url(&format!("directoryObjects/{id}?$select=id,displayName"));
        match self.client.get::<GraphDirectoryObject>(&url).await {
            Ok(object) => {
                let kind = object
                    .odata_type
                    .as_deref()
                    .map_or(ObjectKind::Unknown, ObjectKind::from_odata_type);
                let mut found = ObjectRef::new(id.clone(), kind);
                found.display_name = object.display_name;
                Ok(Some(found))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into_directory_error(id.as_str())),
        }
    }
}

#[async_trait]
impl NameLookup for EntraDirectory {
    #[instrument(skip(self, kind), fields(kind = %kind))]
    async fn find_by_display_name(
        &self,
        kind: ObjectKind,
        display_name: &str,
    ) -> DirectoryResult<Vec<ObjectRef>> {
        let segment = collection(kind).ok_or_else(|| {
            DirectoryError::rejected(format!("cannot search objects of kind {kind}"))
        })?;
        let url = self.client.url(&format!(
            "{segment}?$filter={}&$select=id,displayName&$top={}",
            urlencoding::encode(&display_name_filter(display_name)),
            self.client.page_size()
        ));
        let objects: Vec<GraphDirectoryObject> = self
            .client
            .get_all_pages(&url)
            .await
            .map_err(|e| e.into_directory_error(display_name))?;

        objects
            .into_iter()
            .map(|o| -> DirectoryResult<ObjectRef> {
                let id = parse_object_id(&o.id).map_err(|e| e.into_directory_error(display_name))?;
                let mut found = ObjectRef::new(id, kind);
                found.display_name = o.display_name;
                Ok(found)
            })
            .collect()
    }
}

#[async_trait]
impl CredentialOp for EntraDirectory {
    #[instrument(skip_all, fields(owner_id = %owner_id))]
    async fn list_credentials(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        kind: CredentialKind,
    ) -> DirectoryResult<Vec<CredentialRecord>> {
        let owner = self.credential_owner(owner_kind, owner_id).await?;
        Ok(match kind {
            CredentialKind::Password => owner
                .password_credentials
                .into_iter()
                .map(CredentialRecord::from)
                .collect(),
            CredentialKind::Certificate => owner
                .key_credentials
                .into_iter()
                .map(CredentialRecord::from)
                .collect(),
        })
    }

    #[instrument(skip_all, fields(owner_id = %owner_id, key_id = %credential.key_id))]
    async fn add_credential(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        credential: &NewCredential,
    ) -> DirectoryResult<CredentialRecord> {
        let record = match &credential.material {
            PreparedMaterial::Password(secret) => {
                self.add_password(owner_kind, owner_id, credential, secret)
                    .await?
            }
            PreparedMaterial::Certificate {
                key_type,
                usage,
                key,
            } => {
                self.add_key(owner_kind, owner_id, credential, *key_type, *usage, key)
                    .await?
            }
        };
        info!(owner_id = %owner_id, key_id = %record.key_id, kind = %record.kind, "Credential added");
        Ok(record)
    }

    #[instrument(skip_all, fields(owner_id = %owner_id, key_id = %key_id))]
    async fn remove_credential(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        kind: CredentialKind,
        key_id: &KeyId,
    ) -> DirectoryResult<()> {
        let owner = self.credential_owner(owner_kind, owner_id).await?;
        match kind {
            CredentialKind::Password => {
                if !owner
                    .password_credentials
                    .iter()
                    .any(|c| c.key_id == key_id.as_str())
                {
                    return Err(DirectoryError::not_found(key_id.as_str()));
                }
                let url = self
                    .client
                    .url(&format!("{}/{owner_id}/removePassword", owner_collection(owner_kind)));
                self.client
                    .post_no_content(&url, &json!({ "keyId": key_id.as_str() }))
                    .await
                    .map_err(|e| e.into_directory_error(key_id.as_str()))?;
            }
            CredentialKind::Certificate => {
                let before = owner.key_credentials.len();
                let remaining: Vec<GraphKeyCredential> = owner
                    .key_credentials
                    .into_iter()
                    .filter(|c| c.key_id != key_id.as_str())
                    .map(|mut c| {
                        c.key = None;
                        c
                    })
                    .collect();
                if remaining.len() == before {
                    return Err(DirectoryError::not_found(key_id.as_str()));
                }
                self.put_key_credentials(owner_kind, owner_id, &remaining)
                    .await?;
            }
        }
        info!(owner_id = %owner_id, key_id = %key_id, kind = %kind, "Credential removed");
        Ok(())
    }
}

#[async_trait]
impl GroupOp for EntraDirectory {
    #[instrument(skip_all, fields(group_id = %group_id))]
    async fn list_members(&self, group_id: &ObjectId) -> DirectoryResult<Vec<ObjectId>> {
        self.list_edges(group_id, Relation::Members).await
    }

    #[instrument(skip_all, fields(group_id = %group_id, target_id = %member_id))]
    async fn add_member(&self, group_id: &ObjectId, member_id: &ObjectId) -> DirectoryResult<()> {
        self.add_edge(group_id, member_id, Relation::Members).await
    }

    #[instrument(skip_all, fields(group_id = %group_id, target_id = %member_id))]
    async fn remove_member(
        &self,
        group_id: &ObjectId,
        member_id: &ObjectId,
    ) -> DirectoryResult<()> {
        self.remove_edge(group_id, member_id, Relation::Members).await
    }

    #[instrument(skip_all, fields(group_id = %group_id))]
    async fn list_owners(&self, group_id: &ObjectId) -> DirectoryResult<Vec<ObjectId>> {
        self.list_edges(group_id, Relation::Owners).await
    }

    #[instrument(skip_all, fields(group_id = %group_id, target_id = %owner_id))]
    async fn add_owner(&self, group_id: &ObjectId, owner_id: &ObjectId) -> DirectoryResult<()> {
        self.add_edge(group_id, owner_id, Relation::Owners).await
    }

    #[instrument(skip_all, fields(group_id = %group_id, target_id = %owner_id))]
    async fn remove_owner(&self, group_id: &ObjectId, owner_id: &ObjectId) -> DirectoryResult<()> {
        self.remove_edge(group_id, owner_id, Relation::Owners).await
    }

    #[instrument(skip_all, fields(display_name = %group.display_name))]
    async fn create_group(&self, group: &NewGroup) -> DirectoryResult<GroupRecord> {
        let mut body = json!({
            "displayName": group.display_name,
            "mailNickname": group.mail_nickname,
            "securityEnabled": group.security_enabled,
            "mailEnabled": group.mail_enabled,
            "groupTypes": group.group_types,
        });
        if let Some(description) = &group.description {
            body["description"] = json!(description);
        }

        let created: GraphGroup = self
            .client
            .post(&self.client.url("groups"), &body)
            .await
            .map_err(|e| e.into_directory_error(&group.display_name))?;
        let record =
            GroupRecord::try_from(created).map_err(|e| e.into_directory_error(&group.display_name))?;
        info!(group_id = %record.id, display_name = %record.display_name, "Group created");
        Ok(record)
    }

    #[instrument(skip_all, fields(group_id = %group_id))]
    async fn update_group(&self, group_id: &ObjectId, patch: &GroupPatch) -> DirectoryResult<()> {
        let mut body = serde_json::Map::new();
        if let Some(name) = &patch.display_name {
            body.insert("displayName".to_string(), json!(name));
        }
        if let Some(description) = &patch.description {
            body.insert("description".to_string(), json!(description));
        }
        self.client
            .patch(&self.client.url(&format!("groups/{group_id}")), &body)
            .await
            .map_err(|e| e.into_directory_error(group_id.as_str()))
    }

    #[instrument(skip_all, fields(group_id = %group_id))]
    async fn delete_group(&self, group_id: &ObjectId) -> DirectoryResult<()> {
        self.client
            .delete(&self.client.url(&format!("groups/{group_id}")))
            .await
            .map_err(|e| e.into_directory_error(group_id.as_str()))?;
        info!(group_id = %group_id, "Group deleted");
        Ok(())
    }
}
