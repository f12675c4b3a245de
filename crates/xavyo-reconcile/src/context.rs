//! Explicit per-pass context
//!
//! Everything a pass depends on (directory client, configuration,
//! cancellation and clock) is carried here and handed to the driver. There
//! is no process-wide client.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcileConfig;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Context threaded through a reconciliation pass.
pub struct ReconcileContext<'a, C: ?Sized> {
    pub(crate) client: &'a C,
    pub(crate) config: ReconcileConfig,
    pub(crate) cancel: CancellationToken,
    pub(crate) clock: Arc<dyn Clock>,
}

impl<'a, C: ?Sized> ReconcileContext<'a, C> {
    /// Create a context with a fresh cancellation token and the wall clock.
    pub fn new(client: &'a C, config: ReconcileConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancellationToken::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use the given cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use the given clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The directory client.
    pub fn client(&self) -> &'a C {
        self.client
    }

    /// The engine configuration.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// The cancellation token checked between operations.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current time from the context clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl<C: ?Sized> fmt::Debug for ReconcileContext<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
