//! Reconciliation pass state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::operation::Operation;

/// State of one reconciliation pass over one managed relation.
///
/// `Loaded -> Diffed -> Applying -> Verified -> Done`, with `Failed`
/// reachable from `Applying` and `Verified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    /// Observed set fetched, every page concatenated.
    Loaded,
    /// Operation list computed.
    Diffed,
    /// Operations being issued one at a time.
    Applying,
    /// Post-conditions confirmed.
    Verified,
    /// Pass completed.
    Done,
    /// Pass stopped on an error.
    Failed,
}

impl PassState {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Loaded => "loaded",
            PassState::Diffed => "diffed",
            PassState::Applying => "applying",
            PassState::Verified => "verified",
            PassState::Done => "done",
            PassState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PassState::Done | PassState::Failed)
    }

    /// Check if the pass may move from this state to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: PassState) -> bool {
        matches!(
            (self, next),
            (PassState::Loaded, PassState::Diffed)
                | (PassState::Diffed, PassState::Applying)
                | (PassState::Applying, PassState::Verified)
                | (PassState::Applying, PassState::Failed)
                | (PassState::Verified, PassState::Done)
                | (PassState::Verified, PassState::Failed)
        )
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Object the pass ran against.
    pub owner_id: String,
    /// Terminal state reached.
    pub state: PassState,
    /// Operations issued and acknowledged, in order.
    pub applied: Vec<Operation>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    /// Check if the pass changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Tracks the state of a running pass.
#[derive(Debug)]
pub(crate) struct Pass {
    owner_id: String,
    state: PassState,
    started_at: DateTime<Utc>,
}

impl Pass {
    pub(crate) fn start(owner_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.into(),
            state: PassState::Loaded,
            started_at,
        }
    }

    pub(crate) fn state(&self) -> PassState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: PassState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid pass transition {} -> {}",
            self.state,
            next
        );
        debug!(owner_id = %self.owner_id, from = %self.state, to = %next, "Pass state transition");
        self.state = next;
    }

    /// Move to `Failed` if the pass is past the point of issuing operations.
    pub(crate) fn fail(&mut self) {
        if self.state.can_transition_to(PassState::Failed) {
            self.advance(PassState::Failed);
        }
    }

    pub(crate) fn finish(mut self, applied: Vec<Operation>, finished_at: DateTime<Utc>) -> PassReport {
        self.advance(PassState::Done);
        PassReport {
            owner_id: self.owner_id,
            state: self.state,
            applied,
            started_at: self.started_at,
            finished_at,
        }
    }
}
