//! # Directory Reconciliation Engine
//!
//! Converges declared directory state (group members, group owners and
//! time-bounded credentials on applications and service principals) with
//! what a remote identity directory actually holds.
//!
//! The engine decides which operations to issue and how to interpret
//! identifiers. It never speaks HTTP: the directory is reached through the
//! capability traits in [`traits`], implemented by a connector crate.
//!
//! ## Architecture
//!
//! - [`ids`] - Composite credential identifiers (`<owner id>/<key id>`)
//! - [`matcher`] - Find a credential record by key id
//! - [`window`] - Resolve credential validity windows
//! - [`diff`] - Set reconciliation for many-to-many edges
//! - [`guard`] - Duplicate display name pre-flight check
//! - [`driver`] - Per-relation passes: load, diff, apply, verify
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_reconcile::prelude::*;
//!
//! let reconciler = Reconciler::new(&directory, ReconcileConfig::from_env()?);
//!
//! // Converge the owners of a group
//! let report = reconciler
//!     .reconcile_edges(Relation::Owners, &group_id, &desired_owners)
//!     .await?;
//!
//! // Create a password valid for six months
//! let spec = CredentialSpec::password(OwnerKind::Application, app_id, secret)
//!     .end_date_relative("4320h");
//! let outcome = reconciler.create_credential(&spec).await?;
//! println!("import id: {}", outcome.id);
//! ```
//!
//! ## Guarantees
//!
//! - Validation errors are raised before any remote call.
//! - Operations are issued one at a time, additions before removals.
//! - A failing operation halts the pass and reports what was applied.
//! - Re-running a pass is safe: the next diff skips applied work.

pub mod config;
pub mod context;
pub mod credential;
pub mod diff;
pub mod driver;
pub mod error;
pub mod guard;
pub mod ids;
pub mod matcher;
pub mod operation;
pub mod pass;
pub mod traits;
pub mod window;

/// Prelude module for convenient imports.
///
/// ```
/// use xavyo_reconcile::prelude::*;
/// ```
pub mod prelude {
    // IDs
    pub use crate::ids::{CredentialId, KeyId, ObjectId};

    // Error handling
    pub use crate::error::{
        DirectoryError, DirectoryResult, PartialApplyError, ReconcileError, ReconcileResult,
    };

    // Credentials
    pub use crate::credential::{
        CertificateEncoding, CertificateType, CredentialKind, CredentialMaterial,
        CredentialRecord, CredentialSpec, KeyUsage, NewCredential, OwnerKind, PreparedMaterial,
    };
    pub use crate::matcher::{find_by_key_id, KeyedCredential};
    pub use crate::window::TimeWindow;

    // Set reconciliation
    pub use crate::diff::{diff, set_equal, SetDelta};
    pub use crate::operation::{Operation, Relation};

    // Traits
    pub use crate::traits::{
        CredentialOp, Directory, GroupOp, GroupPatch, GroupRecord, NameLookup, NewGroup,
        ObjectKind, ObjectRef,
    };

    // Driver
    pub use crate::config::ReconcileConfig;
    pub use crate::context::{Clock, FixedClock, ReconcileContext, SystemClock};
    pub use crate::driver::{CredentialOutcome, GroupReport, GroupSpec, Reconciler};
    pub use crate::guard::check_name_unique;
    pub use crate::pass::{PassReport, PassState};
}

// Re-export async_trait for directory implementors
pub use async_trait::async_trait;
