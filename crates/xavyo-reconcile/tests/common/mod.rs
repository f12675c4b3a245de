//! Common test utilities for xavyo-reconcile integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use xavyo_reconcile::async_trait;
use xavyo_reconcile::prelude::*;

/// Deterministic object id from a small number.
pub fn oid(n: u32) -> ObjectId {
    ObjectId::parse(&format!("00000000-0000-0000-0000-{n:012x}")).unwrap()
}

/// Several ids at once.
pub fn oids(ns: &[u32]) -> Vec<ObjectId> {
    ns.iter().copied().map(oid).collect()
}

#[derive(Debug, Default)]
struct GroupState {
    record: Option<GroupRecord>,
    members: Vec<ObjectId>,
    owners: Vec<ObjectId>,
}

#[derive(Default)]
struct State {
    objects: HashMap<ObjectId, ObjectRef>,
    groups: HashMap<ObjectId, GroupState>,
    credentials: HashMap<(ObjectId, CredentialKind), Vec<CredentialRecord>>,
    /// Credentials created but not yet visible, with the number of list
    /// calls still to hide them from.
    invisible: Vec<(ObjectId, CredentialKind, CredentialRecord, u32)>,
    faults: HashMap<String, VecDeque<DirectoryError>>,
    calls: Vec<String>,
    applied_mutations: usize,
    next_id: u32,
    visibility_delay: u32,
    assigned_key_id: Option<String>,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// In-memory directory with fault injection, delayed visibility and a call log.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<State>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        let dir = Self::default();
        dir.state.lock().unwrap().next_id = 0x1000;
        dir
    }

    /// Register a plain object (user, service principal, application).
    pub fn add_object(&self, id: &ObjectId, kind: ObjectKind, name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .insert(id.clone(), ObjectRef::new(id.clone(), kind).with_display_name(name));
    }

    /// Register an existing group with members and owners.
    pub fn add_group(&self, id: &ObjectId, name: &str, members: &[ObjectId], owners: &[ObjectId]) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            id.clone(),
            ObjectRef::new(id.clone(), ObjectKind::Group).with_display_name(name),
        );
        state.groups.insert(
            id.clone(),
            GroupState {
                record: Some(GroupRecord {
                    id: id.clone(),
                    display_name: name.to_string(),
                    description: None,
                    mail_nickname: None,
                    security_enabled: true,
                    mail_enabled: false,
                }),
                members: members.to_vec(),
                owners: owners.to_vec(),
            },
        );
    }

    /// Seed an existing credential.
    pub fn add_credential_record(&self, owner: &ObjectId, record: CredentialRecord) {
        let mut state = self.state.lock().unwrap();
        state
            .credentials
            .entry((owner.clone(), record.kind))
            .or_default()
            .push(record);
    }

    /// Fail the next call whose log entry equals `call` with `error`.
    pub fn fail_next(&self, call: &str, error: DirectoryError) {
        let mut state = self.state.lock().unwrap();
        state.faults.entry(call.to_string()).or_default().push_back(error);
    }

    /// Hide newly created credentials from the next `lists` list calls.
    pub fn delay_visibility(&self, lists: u32) {
        self.state.lock().unwrap().visibility_delay = lists;
    }

    /// Store created credentials under this key id instead of the requested one.
    pub fn assign_key_id(&self, key_id: &str) {
        self.state.lock().unwrap().assigned_key_id = Some(key_id.to_string());
    }

    /// Cancel `token` once `mutations` mutating calls have succeeded.
    pub fn cancel_after(&self, mutations: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((mutations, token));
    }

    /// Every call made, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Mutating calls made, in order.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["add_", "remove_", "create_", "update_", "delete_"]
                    .iter()
                    .any(|p| c.starts_with(p))
            })
            .collect()
    }

    pub fn members(&self, group: &ObjectId) -> Vec<ObjectId> {
        let state = self.state.lock().unwrap();
        state.groups.get(group).map(|g| g.members.clone()).unwrap_or_default()
    }

    pub fn owners(&self, group: &ObjectId) -> Vec<ObjectId> {
        let state = self.state.lock().unwrap();
        state.groups.get(group).map(|g| g.owners.clone()).unwrap_or_default()
    }

    pub fn credentials(&self, owner: &ObjectId, kind: CredentialKind) -> Vec<CredentialRecord> {
        let state = self.state.lock().unwrap();
        state
            .credentials
            .get(&(owner.clone(), kind))
            .cloned()
            .unwrap_or_default()
    }

    pub fn group_exists(&self, id: &ObjectId) -> bool {
        self.state.lock().unwrap().groups.contains_key(id)
    }

    /// Log the call and pop an injected fault for it, if any.
    fn enter(&self, call: String) -> DirectoryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        match state.faults.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Count a successful mutation and fire the cancel hook.
    fn mutated(state: &mut State) {
        state.applied_mutations += 1;
        if let Some((after, token)) = &state.cancel_after {
            if state.applied_mutations >= *after {
                token.cancel();
            }
        }
    }

    fn edges<'s>(
        state: &'s mut State,
        group: &ObjectId,
        relation: Relation,
    ) -> DirectoryResult<&'s mut Vec<ObjectId>> {
        let g = state
            .groups
            .get_mut(group)
            .ok_or_else(|| DirectoryError::not_found(group.as_str()))?;
        Ok(match relation {
            Relation::Members => &mut g.members,
            Relation::Owners => &mut g.owners,
        })
    }

    fn add_edge(&self, relation: Relation, group: &ObjectId, target: &ObjectId) -> DirectoryResult<()> {
        self.enter(format!("add_{} {group} {target}", relation.edge_noun()))?;
        let mut state = self.state.lock().unwrap();
        if !state.objects.contains_key(target) {
            return Err(DirectoryError::not_found(target.as_str()));
        }
        let edges = Self::edges(&mut state, group, relation)?;
        if edges.contains(target) {
            return Err(DirectoryError::AlreadyExists {
                object_id: target.to_string(),
            });
        }
        edges.push(target.clone());
        Self::mutated(&mut state);
        Ok(())
    }

    fn remove_edge(&self, relation: Relation, group: &ObjectId, target: &ObjectId) -> DirectoryResult<()> {
        self.enter(format!("remove_{} {group} {target}", relation.edge_noun()))?;
        let mut state = self.state.lock().unwrap();
        let edges = Self::edges(&mut state, group, relation)?;
        let before = edges.len();
        edges.retain(|e| e != target);
        if edges.len() == before {
            return Err(DirectoryError::not_found(target.as_str()));
        }
        Self::mutated(&mut state);
        Ok(())
    }

    fn list_edges(&self, relation: Relation, group: &ObjectId) -> DirectoryResult<Vec<ObjectId>> {
        self.enter(format!("list_{} {group}", relation.as_str()))?;
        let mut state = self.state.lock().unwrap();
        Ok(Self::edges(&mut state, group, relation)?.clone())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn get_object(&self, id: &ObjectId) -> DirectoryResult<Option<ObjectRef>> {
        self.enter(format!("get_object {id}"))?;
        Ok(self.state.lock().unwrap().objects.get(id).cloned())
    }
}

#[async_trait]
impl NameLookup for InMemoryDirectory {
    async fn find_by_display_name(
        &self,
        kind: ObjectKind,
        display_name: &str,
    ) -> DirectoryResult<Vec<ObjectRef>> {
        self.enter(format!("find_by_display_name {display_name}"))?;
        let state = self.state.lock().unwrap();
        let mut found: Vec<ObjectRef> = state
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .filter(|o| {
                o.display_name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(display_name))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[async_trait]
impl CredentialOp for InMemoryDirectory {
    async fn list_credentials(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        kind: CredentialKind,
    ) -> DirectoryResult<Vec<CredentialRecord>> {
        self.enter(format!("list_credentials {owner_kind} {owner_id} {kind}"))?;
        let mut state = self.state.lock().unwrap();
        if !state.objects.contains_key(owner_id) {
            return Err(DirectoryError::not_found(owner_id.as_str()));
        }

        // Promote credentials whose visibility delay has run out.
        let mut still_hidden = Vec::new();
        let mut promoted = Vec::new();
        for (owner, k, record, remaining) in std::mem::take(&mut state.invisible) {
            if owner == *owner_id && k == kind {
                if remaining == 0 {
                    promoted.push((owner, k, record));
                } else {
                    still_hidden.push((owner, k, record, remaining - 1));
                }
            } else {
                still_hidden.push((owner, k, record, remaining));
            }
        }
        state.invisible = still_hidden;
        for (owner, k, record) in promoted {
            state.credentials.entry((owner, k)).or_default().push(record);
        }

        Ok(state
            .credentials
            .get(&(owner_id.clone(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn add_credential(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        credential: &NewCredential,
    ) -> DirectoryResult<CredentialRecord> {
        self.enter(format!(
            "add_credential {owner_kind} {owner_id} {}",
            credential.key_id
        ))?;
        let mut state = self.state.lock().unwrap();
        if !state.objects.contains_key(owner_id) {
            return Err(DirectoryError::not_found(owner_id.as_str()));
        }

        let mut record = CredentialRecord::from_new(credential);
        if let Some(assigned) = state.assigned_key_id.clone() {
            record.key_id = assigned;
        }
        let kind = record.kind;
        if state.visibility_delay > 0 {
            let delay = state.visibility_delay;
            state
                .invisible
                .push((owner_id.clone(), kind, record.clone(), delay));
        } else {
            state
                .credentials
                .entry((owner_id.clone(), kind))
                .or_default()
                .push(record.clone());
        }
        Self::mutated(&mut state);
        Ok(record)
    }

    async fn remove_credential(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        kind: CredentialKind,
        key_id: &KeyId,
    ) -> DirectoryResult<()> {
        self.enter(format!("remove_credential {owner_kind} {owner_id} {key_id}"))?;
        let mut state = self.state.lock().unwrap();
        let records = state
            .credentials
            .get_mut(&(owner_id.clone(), kind))
            .ok_or_else(|| DirectoryError::not_found(key_id.as_str()))?;
        let before = records.len();
        records.retain(|r| r.key_id != key_id.as_str());
        if records.len() == before {
            return Err(DirectoryError::not_found(key_id.as_str()));
        }
        Self::mutated(&mut state);
        Ok(())
    }
}

#[async_trait]
impl GroupOp for InMemoryDirectory {
    async fn list_members(&self, group_id: &ObjectId) -> DirectoryResult<Vec<ObjectId>> {
        self.list_edges(Relation::Members, group_id)
    }

    async fn add_member(&self, group_id: &ObjectId, member_id: &ObjectId) -> DirectoryResult<()> {
        self.add_edge(Relation::Members, group_id, member_id)
    }

    async fn remove_member(&self, group_id: &ObjectId, member_id: &ObjectId) -> DirectoryResult<()> {
        self.remove_edge(Relation::Members, group_id, member_id)
    }

    async fn list_owners(&self, group_id: &ObjectId) -> DirectoryResult<Vec<ObjectId>> {
        self.list_edges(Relation::Owners, group_id)
    }

    async fn add_owner(&self, group_id: &ObjectId, owner_id: &ObjectId) -> DirectoryResult<()> {
        self.add_edge(Relation::Owners, group_id, owner_id)
    }

    async fn remove_owner(&self, group_id: &ObjectId, owner_id: &ObjectId) -> DirectoryResult<()> {
        self.remove_edge(Relation::Owners, group_id, owner_id)
    }

    async fn create_group(&self, group: &NewGroup) -> DirectoryResult<GroupRecord> {
        self.enter(format!("create_group {}", group.display_name))?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = oid(state.next_id);
        let record = GroupRecord {
            id: id.clone(),
            display_name: group.display_name.clone(),
            description: group.description.clone(),
            mail_nickname: Some(group.mail_nickname.clone()),
            security_enabled: group.security_enabled,
            mail_enabled: group.mail_enabled,
        };
        state.objects.insert(
            id.clone(),
            ObjectRef::new(id.clone(), ObjectKind::Group).with_display_name(&group.display_name),
        );
        state.groups.insert(
            id,
            GroupState {
                record: Some(record.clone()),
                ..Default::default()
            },
        );
        Self::mutated(&mut state);
        Ok(record)
    }

    async fn update_group(&self, group_id: &ObjectId, patch: &GroupPatch) -> DirectoryResult<()> {
        self.enter(format!("update_group {group_id}"))?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .groups
            .get_mut(group_id)
            .and_then(|g| g.record.as_mut())
            .ok_or_else(|| DirectoryError::not_found(group_id.as_str()))?;
        if let Some(name) = &patch.display_name {
            record.display_name = name.clone();
        }
        if let Some(description) = &patch.description {
            record.description = Some(description.clone());
        }
        let name = record.display_name.clone();
        if let Some(obj) = state.objects.get_mut(group_id) {
            obj.display_name = Some(name);
        }
        Self::mutated(&mut state);
        Ok(())
    }

    async fn delete_group(&self, group_id: &ObjectId) -> DirectoryResult<()> {
        self.enter(format!("delete_group {group_id}"))?;
        let mut state = self.state.lock().unwrap();
        if state.groups.remove(group_id).is_none() {
            return Err(DirectoryError::not_found(group_id.as_str()));
        }
        state.objects.remove(group_id);
        Self::mutated(&mut state);
        Ok(())
    }
}
