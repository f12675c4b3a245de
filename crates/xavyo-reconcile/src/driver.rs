//! Reconciliation driver
//!
//! Sequences the pure components against a directory client. Every pass
//! loads the complete observed state, diffs it, then issues operations one
//! at a time: additions before removals, halting on the first failure.
//! Application-level operations are never retried here; transient transport
//! retry belongs to the client.

use tracing::{debug, info, instrument, warn};

use crate::config::ReconcileConfig;
use crate::context::ReconcileContext;
use crate::credential::{CredentialKind, CredentialRecord, CredentialSpec, NewCredential, OwnerKind};
use crate::diff::diff;
use crate::error::{DirectoryError, PartialApplyError, ReconcileError, ReconcileResult};
use crate::guard::check_name_unique;
use crate::ids::{CredentialId, KeyId, ObjectId};
use crate::matcher::find_by_key_id;
use crate::operation::{Operation, Relation};
use crate::pass::{Pass, PassReport, PassState};
use crate::traits::{CredentialOp, Directory, GroupOp, GroupPatch, GroupRecord, NewGroup, ObjectKind};

/// Desired state of a group.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub group: NewGroup,
    pub members: Vec<ObjectId>,
    pub owners: Vec<ObjectId>,
}

/// Result of [`Reconciler::ensure_group`].
#[derive(Debug, Clone)]
pub struct GroupReport {
    pub group: GroupRecord,
    pub owners: Option<PassReport>,
    pub members: Option<PassReport>,
    /// Every mutation in order: the create, then owner and member edges.
    pub applied: Vec<Operation>,
}

/// Result of [`Reconciler::create_credential`].
#[derive(Debug, Clone)]
pub struct CredentialOutcome {
    /// Composite id to persist for later reads and deletes.
    pub id: CredentialId,
    /// The record as read back from the directory.
    pub record: CredentialRecord,
    pub report: PassReport,
}

/// Drives reconciliation passes against a directory client.
#[derive(Debug)]
pub struct Reconciler<'a, C: ?Sized> {
    ctx: ReconcileContext<'a, C>,
}

impl<'a, C: ?Sized> Reconciler<'a, C> {
    /// Create a reconciler with a default context.
    pub fn new(client: &'a C, config: ReconcileConfig) -> Self {
        Self::with_context(ReconcileContext::new(client, config))
    }

    /// Create a reconciler from an explicit context.
    pub fn with_context(ctx: ReconcileContext<'a, C>) -> Self {
        Self { ctx }
    }

    /// The pass context.
    pub fn context(&self) -> &ReconcileContext<'a, C> {
        &self.ctx
    }

    /// Compute the operations converging `observed` to `desired`.
    ///
    /// Additions come before removals so that an owner swap never leaves the
    /// group ownerless in between. Refuses to drain the last owner of a group
    /// unless `allow_owner_drain` is set.
    pub fn plan(
        &self,
        relation: Relation,
        group_id: &ObjectId,
        desired: &[ObjectId],
        observed: &[ObjectId],
    ) -> ReconcileResult<Vec<Operation>> {
        if relation == Relation::Owners
            && desired.is_empty()
            && !observed.is_empty()
            && !self.ctx.config.allow_owner_drain
        {
            let owners: Vec<&str> = observed.iter().map(ObjectId::as_str).collect();
            return Err(ReconcileError::invariant(
                group_id.as_str(),
                format!(
                    "refusing to remove last owner(s) {}: a group cannot be left without owners",
                    owners.join(", ")
                ),
            ));
        }

        let delta = diff(desired, observed);
        let ops = delta
            .to_add
            .into_iter()
            .map(|target| Operation::add_edge(relation, group_id.clone(), target))
            .chain(
                delta
                    .to_remove
                    .into_iter()
                    .map(|target| Operation::remove_edge(relation, group_id.clone(), target)),
            )
            .collect();
        Ok(ops)
    }

    fn check_cancelled(&self, owner_id: &str, applied: &[Operation]) -> ReconcileResult<()> {
        if self.ctx.cancel.is_cancelled() {
            warn!(owner_id, applied = applied.len(), "Reconciliation pass cancelled");
            return Err(ReconcileError::Cancelled {
                owner_id: owner_id.to_string(),
                applied: applied.to_vec(),
            });
        }
        Ok(())
    }
}

impl<'a, C> Reconciler<'a, C>
where
    C: Directory + ?Sized,
{
    /// Fail with `NotFound` unless the owner object exists.
    async fn require_object(&self, kind: &str, id: &ObjectId) -> ReconcileResult<()> {
        match self.ctx.client.get_object(id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(ReconcileError::NotFound {
                kind: kind.to_string(),
                object_id: id.to_string(),
            }),
            Err(e) if e.is_not_found() => Err(ReconcileError::NotFound {
                kind: kind.to_string(),
                object_id: id.to_string(),
            }),
            Err(e) => Err(ReconcileError::directory(id.as_str(), format!("get {kind}"), e)),
        }
    }

    /// Check if the object exists. A not-found response is authoritative.
    async fn object_exists(&self, kind: &str, id: &ObjectId) -> ReconcileResult<bool> {
        match self.require_object(kind, id).await {
            Ok(()) => Ok(true),
            Err(ReconcileError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<'a, C> Reconciler<'a, C>
where
    C: GroupOp + ?Sized,
{
    /// Converge one relation of a group from a caller-supplied observed set.
    #[instrument(skip(self, desired, observed), fields(group_id = %group_id, relation = %relation))]
    pub async fn reconcile(
        &self,
        relation: Relation,
        group_id: &ObjectId,
        desired: &[ObjectId],
        observed: &[ObjectId],
    ) -> ReconcileResult<PassReport> {
        let mut pass = Pass::start(group_id.as_str(), self.ctx.now());

        let ops = self.plan(relation, group_id, desired, observed)?;
        pass.advance(PassState::Diffed);
        info!(
            desired = desired.len(),
            observed = observed.len(),
            planned = ops.len(),
            "Reconciliation plan computed"
        );

        pass.advance(PassState::Applying);
        let applied = match self.apply(group_id, ops).await {
            Ok(applied) => applied,
            Err(e) => {
                pass.fail();
                return Err(e);
            }
        };
        pass.advance(PassState::Verified);

        let report = pass.finish(applied, self.ctx.now());
        info!(applied = report.applied.len(), "Reconciliation pass complete");
        Ok(report)
    }

    /// Load the full observed edge set, then converge it to `desired`.
    #[instrument(skip(self, desired), fields(group_id = %group_id, relation = %relation))]
    pub async fn reconcile_edges(
        &self,
        relation: Relation,
        group_id: &ObjectId,
        desired: &[ObjectId],
    ) -> ReconcileResult<PassReport> {
        self.check_cancelled(group_id.as_str(), &[])?;
        let observed = self.list_edges(relation, group_id).await?;
        self.reconcile(relation, group_id, desired, &observed).await
    }

    /// Check if the remote edge set already equals `desired`.
    ///
    /// Ids compare exactly, as in [`Reconciler::plan`], so a converged set
    /// is one for which a pass would issue nothing.
    #[instrument(skip(self, desired), fields(group_id = %group_id, relation = %relation))]
    pub async fn is_converged(
        &self,
        relation: Relation,
        group_id: &ObjectId,
        desired: &[ObjectId],
    ) -> ReconcileResult<bool> {
        let observed = self.list_edges(relation, group_id).await?;
        Ok(diff(desired, &observed).is_empty())
    }

    /// Issue edge operations in order, stopping at the first failure.
    ///
    /// Adding an edge that already exists and removing one that is already
    /// gone both count as applied.
    pub async fn apply(&self, owner_id: &ObjectId, ops: Vec<Operation>) -> ReconcileResult<Vec<Operation>> {
        if let Some(op) = ops
            .iter()
            .find(|op| !matches!(op, Operation::AddEdge { .. } | Operation::RemoveEdge { .. }))
        {
            return Err(ReconcileError::invariant(
                owner_id.as_str(),
                format!("{op} is not an edge operation"),
            ));
        }

        let mut applied = Vec::with_capacity(ops.len());
        let mut pending = ops.into_iter();
        while let Some(op) = pending.next() {
            self.check_cancelled(owner_id.as_str(), &applied)?;

            match self.issue_edge(&op).await {
                Ok(()) => {
                    debug!(operation = %op, "Operation applied");
                    applied.push(op);
                }
                Err(source) => {
                    let remaining: Vec<Operation> = pending.collect();
                    warn!(
                        operation = %op,
                        applied = applied.len(),
                        remaining = remaining.len(),
                        error = %source,
                        "Operation failed, halting pass"
                    );
                    return Err(PartialApplyError {
                        owner_id: owner_id.to_string(),
                        applied,
                        failed: op,
                        remaining,
                        source,
                    }
                    .into());
                }
            }
        }
        Ok(applied)
    }

    async fn issue_edge(&self, op: &Operation) -> Result<(), DirectoryError> {
        let client = self.ctx.client;
        let result = match op {
            Operation::AddEdge {
                relation,
                group_id,
                target_id,
            } => match relation {
                Relation::Members => client.add_member(group_id, target_id).await,
                Relation::Owners => client.add_owner(group_id, target_id).await,
            },
            Operation::RemoveEdge {
                relation,
                group_id,
                target_id,
            } => match relation {
                Relation::Members => client.remove_member(group_id, target_id).await,
                Relation::Owners => client.remove_owner(group_id, target_id).await,
            },
            _ => return Err(DirectoryError::rejected(format!("{op} is not an edge operation"))),
        };

        match result {
            Err(DirectoryError::AlreadyExists { .. }) if op.is_additive() => {
                debug!(operation = %op, "Edge already present");
                Ok(())
            }
            Err(DirectoryError::NotFound { .. }) if !op.is_additive() => {
                debug!(operation = %op, "Edge already absent");
                Ok(())
            }
            other => other,
        }
    }

    async fn list_edges(&self, relation: Relation, group_id: &ObjectId) -> ReconcileResult<Vec<ObjectId>> {
        let result = match relation {
            Relation::Members => self.ctx.client.list_members(group_id).await,
            Relation::Owners => self.ctx.client.list_owners(group_id).await,
        };
        result.map_err(|e| {
            if e.is_not_found() {
                ReconcileError::NotFound {
                    kind: ObjectKind::Group.to_string(),
                    object_id: group_id.to_string(),
                }
            } else {
                ReconcileError::directory(group_id.as_str(), format!("list {relation}"), e)
            }
        })
    }

    /// Create a group, then converge its owners and members.
    ///
    /// With `prevent_duplicate_names` set, fails with `DuplicateName` before
    /// creating anything if the display name is taken. The check is advisory:
    /// two concurrent creations can still race.
    #[instrument(skip(self, spec), fields(display_name = %spec.group.display_name))]
    pub async fn ensure_group(&self, spec: &GroupSpec) -> ReconcileResult<GroupReport> {
        let display_name = spec.group.display_name.as_str();
        if display_name.trim().is_empty() {
            return Err(ReconcileError::configuration("group display name is empty"));
        }

        if self.ctx.config.prevent_duplicate_names {
            check_name_unique(self.ctx.client, ObjectKind::Group, display_name).await?;
        }

        self.check_cancelled(display_name, &[])?;
        let group = self
            .ctx
            .client
            .create_group(&spec.group)
            .await
            .map_err(|e| ReconcileError::directory(display_name, "create group", e))?;
        info!(group_id = %group.id, "Group created");
        let mut applied = vec![Operation::CreateGroup {
            display_name: group.display_name.clone(),
        }];

        // A new group starts with no owners, so an empty desired set is a no-op.
        let owners = if spec.owners.is_empty() {
            None
        } else {
            Some(
                self.reconcile_edges(Relation::Owners, &group.id, &spec.owners)
                    .await
                    .map_err(|e| e.with_context(group.id.as_str(), Relation::Owners.as_str()))?,
            )
        };

        let members = if spec.members.is_empty() {
            None
        } else {
            Some(
                self.reconcile_edges(Relation::Members, &group.id, &spec.members)
                    .await
                    .map_err(|e| e.with_context(group.id.as_str(), Relation::Members.as_str()))?,
            )
        };

        for report in owners.iter().chain(members.iter()) {
            applied.extend(report.applied.iter().cloned());
        }

        Ok(GroupReport {
            group,
            owners,
            members,
            applied,
        })
    }

    /// Update group attributes.
    #[instrument(skip(self, patch), fields(group_id = %group_id))]
    pub async fn update_group(&self, group_id: &ObjectId, patch: &GroupPatch) -> ReconcileResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.check_cancelled(group_id.as_str(), &[])?;
        self.ctx
            .client
            .update_group(group_id, patch)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ReconcileError::NotFound {
                        kind: ObjectKind::Group.to_string(),
                        object_id: group_id.to_string(),
                    }
                } else {
                    ReconcileError::directory(group_id.as_str(), "update group", e)
                }
            })
    }

    /// Delete a group. A group that is already gone counts as deleted.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub async fn delete_group(&self, group_id: &ObjectId) -> ReconcileResult<Vec<Operation>> {
        self.check_cancelled(group_id.as_str(), &[])?;
        let op = Operation::DeleteGroup {
            group_id: group_id.clone(),
        };
        match self.ctx.client.delete_group(group_id).await {
            Ok(()) => {
                info!("Group deleted");
                Ok(vec![op])
            }
            Err(e) if e.is_not_found() => {
                info!("Group already absent");
                Ok(Vec::new())
            }
            Err(source) => Err(PartialApplyError {
                owner_id: group_id.to_string(),
                applied: Vec::new(),
                failed: op,
                remaining: Vec::new(),
                source,
            }
            .into()),
        }
    }
}

impl<'a, C> Reconciler<'a, C>
where
    C: CredentialOp + ?Sized,
{
    /// Create a credential and confirm it is visible on read-back.
    ///
    /// All validation happens before the first remote call. If a credential
    /// with the requested key id already exists the pass fails with
    /// `CredentialAlreadyExists` and nothing is created.
    #[instrument(
        skip(self, spec),
        fields(owner_id = %spec.owner_id, owner_kind = %spec.owner_kind, kind = %spec.kind())
    )]
    pub async fn create_credential(&self, spec: &CredentialSpec) -> ReconcileResult<CredentialOutcome> {
        let owner_id = &spec.owner_id;
        let owner_kind = spec.owner_kind;
        let kind = spec.kind();
        let subject = spec.key_id.as_deref().unwrap_or(kind.as_str());

        let new = spec
            .prepare(self.ctx.now())
            .map_err(|e| e.with_context(owner_id.as_str(), subject))?;
        let key_id = new.key_id.clone();

        self.check_cancelled(owner_id.as_str(), &[])?;
        self.require_object(owner_kind.as_str(), owner_id).await?;
        let existing = self.list_credentials(owner_kind, owner_id, kind).await?;
        let mut pass = Pass::start(owner_id.as_str(), self.ctx.now());

        if find_by_key_id(&existing, key_id.as_str()).is_some() {
            warn!(key_id = %key_id, "Credential already exists, refusing to create");
            return Err(ReconcileError::CredentialAlreadyExists {
                owner_id: owner_id.to_string(),
                key_id: key_id.to_string(),
            });
        }
        pass.advance(PassState::Diffed);

        self.check_cancelled(owner_id.as_str(), &[])?;
        pass.advance(PassState::Applying);
        let created = match self.issue_create(owner_kind, owner_id, &new).await {
            Ok(record) => record,
            Err(e) => {
                pass.fail();
                return Err(e);
            }
        };

        let key_id = match self.settle_key_id(spec, &key_id, &created) {
            Ok(key_id) => key_id,
            Err(e) => {
                pass.fail();
                return Err(e);
            }
        };
        let id = CredentialId::new(owner_id.clone(), key_id);
        let applied = vec![Operation::CreateCredential {
            owner_kind,
            kind,
            id: id.clone(),
        }];
        info!(credential_id = %id, "Credential created");

        let record = match self.verify_visible(owner_kind, kind, &id, &applied).await {
            Ok(record) => record,
            Err(e) => {
                pass.fail();
                return Err(e);
            }
        };
        pass.advance(PassState::Verified);

        let report = pass.finish(applied, self.ctx.now());
        Ok(CredentialOutcome { id, record, report })
    }

    /// Read a credential by composite id.
    ///
    /// Returns `Ok(None)` when the owner or the key is gone; the caller
    /// should drop its local state.
    #[instrument(skip(self), fields(credential_id = %id))]
    pub async fn read_credential(
        &self,
        owner_kind: OwnerKind,
        kind: CredentialKind,
        id: &CredentialId,
    ) -> ReconcileResult<Option<CredentialRecord>> {
        if !self.object_exists(owner_kind.as_str(), id.owner_id()).await? {
            info!("Owner no longer exists");
            return Ok(None);
        }

        let records = match self.list_credentials(owner_kind, id.owner_id(), kind).await {
            Ok(records) => records,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let found = find_by_key_id(&records, id.key_id().as_str()).cloned();
        if found.is_none() {
            info!("Credential no longer present");
        }
        Ok(found)
    }

    /// Remove a credential by composite id. An absent owner or key counts as
    /// already removed.
    #[instrument(skip(self), fields(credential_id = %id))]
    pub async fn delete_credential(
        &self,
        owner_kind: OwnerKind,
        kind: CredentialKind,
        id: &CredentialId,
    ) -> ReconcileResult<Vec<Operation>> {
        let owner = id.owner_id().as_str();
        self.check_cancelled(owner, &[])?;

        if self.read_credential(owner_kind, kind, id).await?.is_none() {
            return Ok(Vec::new());
        }

        self.check_cancelled(owner, &[])?;
        let op = Operation::DeleteCredential {
            owner_kind,
            kind,
            id: id.clone(),
        };
        match self
            .ctx
            .client
            .remove_credential(owner_kind, id.owner_id(), kind, id.key_id())
            .await
        {
            Ok(()) => {
                info!("Credential removed");
                Ok(vec![op])
            }
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(source) => Err(PartialApplyError {
                owner_id: owner.to_string(),
                applied: Vec::new(),
                failed: op,
                remaining: Vec::new(),
                source,
            }
            .into()),
        }
    }

    async fn list_credentials(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        kind: CredentialKind,
    ) -> ReconcileResult<Vec<CredentialRecord>> {
        self.ctx
            .client
            .list_credentials(owner_kind, owner_id, kind)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ReconcileError::NotFound {
                        kind: owner_kind.to_string(),
                        object_id: owner_id.to_string(),
                    }
                } else {
                    ReconcileError::directory(owner_id.as_str(), format!("list {kind} credentials"), e)
                }
            })
    }

    async fn issue_create(
        &self,
        owner_kind: OwnerKind,
        owner_id: &ObjectId,
        new: &NewCredential,
    ) -> ReconcileResult<CredentialRecord> {
        self.ctx
            .client
            .add_credential(owner_kind, owner_id, new)
            .await
            .map_err(|source| {
                PartialApplyError {
                    owner_id: owner_id.to_string(),
                    applied: Vec::new(),
                    failed: Operation::CreateCredential {
                        owner_kind,
                        kind: new.kind(),
                        id: CredentialId::new(owner_id.clone(), new.key_id.clone()),
                    },
                    remaining: Vec::new(),
                    source,
                }
                .into()
            })
    }

    /// Decide which key id identifies the created credential.
    fn settle_key_id(
        &self,
        spec: &CredentialSpec,
        requested: &KeyId,
        created: &CredentialRecord,
    ) -> ReconcileResult<KeyId> {
        if created.key_id == requested.as_str() {
            return Ok(requested.clone());
        }
        let owner = spec.owner_id.as_str();
        if spec.key_id.is_some() {
            // The create went through under the assigned id.
            let applied = KeyId::parse(&created.key_id)
                .map(|assigned| {
                    vec![Operation::CreateCredential {
                        owner_kind: spec.owner_kind,
                        kind: spec.kind(),
                        id: CredentialId::new(spec.owner_id.clone(), assigned),
                    }]
                })
                .unwrap_or_default();
            return Err(ReconcileError::invariant(
                owner,
                format!(
                    "requested key id {requested} but the directory assigned {}",
                    created.key_id
                ),
            )
            .with_applied(applied));
        }
        warn!(requested = %requested, assigned = %created.key_id, "Directory assigned a different key id");
        KeyId::parse(&created.key_id).map_err(|e| {
            ReconcileError::invariant(owner, format!("directory returned an unusable key id: {e}"))
        })
    }

    /// Poll the credential list until the key id shows up.
    async fn verify_visible(
        &self,
        owner_kind: OwnerKind,
        kind: CredentialKind,
        id: &CredentialId,
        applied: &[Operation],
    ) -> ReconcileResult<CredentialRecord> {
        let owner = id.owner_id().as_str();
        let attempts = self.ctx.config.verify_attempts.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.ctx.config.verify_interval()).await;
            }
            self.check_cancelled(owner, applied)?;

            match self.ctx.client.list_credentials(owner_kind, id.owner_id(), kind).await {
                Ok(records) => {
                    if let Some(record) = find_by_key_id(&records, id.key_id().as_str()) {
                        debug!(attempt, "Credential visible on read-back");
                        return Ok(record.clone());
                    }
                    debug!(attempt, attempts, "Credential not yet visible");
                }
                Err(e) if e.is_transient() || e.is_not_found() => {
                    debug!(attempt, attempts, error = %e, "Read-back failed, will poll again");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Read-back rejected");
                    return Err(ReconcileError::VerificationFailed {
                        owner_id: owner.to_string(),
                        key_id: id.key_id().to_string(),
                        attempts: attempt,
                        applied: applied.to_vec(),
                        last_error: Some(e),
                    });
                }
            }
        }

        warn!(attempts, "Credential never became visible");
        Err(ReconcileError::VerificationFailed {
            owner_id: owner.to_string(),
            key_id: id.key_id().to_string(),
            attempts,
            applied: applied.to_vec(),
            last_error: None,
        })
    }
}
