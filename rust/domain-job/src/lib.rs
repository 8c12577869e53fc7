//! Per-domain job control for a hypervisor management daemon.
//!
//! Every managed virtual machine ("domain") carries a [`JobRecord`] guarded by
//! the domain's own lock. Before any operation that changes or inspects a
//! running domain, the caller must acquire a job on one of three channels:
//!
//! - the **primary** channel (monitor-style operations such as query, modify,
//!   destroy), one holder at a time;
//! - the **agent** channel (guest-agent operations), independent of primary;
//! - the **async** channel (long running operations such as migration, save,
//!   dump, snapshot, backup) which can run alongside a restricted set of
//!   primary jobs described by its [`JobMask`].
//!
//! Waiters block on per-domain condition variables with a single wall-clock
//! budget and an optional global queue ceiling. State that must survive a
//! daemon restart is flushed through a [`StatusStore`] and recovered with
//! [`recovery::recover_domain`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use domain_job::prelude::*;
//!
//! let store = Arc::new(InMemoryStatusStore::new());
//! let jobs = JobController::new(store, &JobsConfig::default());
//! let domain = Domain::new("vm1", NoPayload::ops());
//!
//! let ctx = JobContext::current("domainSetMemory");
//! let mut guard = domain.lock();
//! jobs.begin_job(&mut guard, &ctx, JobKind::Modify)?;
//! // ... talk to the monitor ...
//! jobs.end_job(&mut guard);
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod domain;
pub mod error;
pub mod kinds;
pub mod limiter;
pub mod logging;
pub mod payload;
pub mod record;
pub mod recovery;
pub mod status;

// Re-exports
pub use crate::config::JobsConfig;
pub use crate::context::{JobContext, OwnerId};
pub use crate::controller::JobController;
pub use crate::domain::{Domain, DomainGuard};
pub use crate::error::{Blocker, Blockers, JobError, JobResult};
pub use crate::kinds::{
    AgentJobKind, AsyncJobKind, JobKind, JobMask, JobOperation, JobStatsType, JobStatus,
    MigrationPhase,
};
pub use crate::limiter::QueueLimiter;
pub use crate::payload::{JobPayload, JobPayloadOps, NoPayload};
pub use crate::record::{JobInfo, JobRecord, JobSummary, RestoredJob};
pub use crate::status::{InMemoryStatusStore, StatusDirStore, StatusElement, StatusStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::JobsConfig;
    pub use crate::context::{JobContext, OwnerId};
    pub use crate::controller::JobController;
    pub use crate::domain::{Domain, DomainGuard};
    pub use crate::error::{JobError, JobResult};
    pub use crate::kinds::{AgentJobKind, AsyncJobKind, JobKind, JobMask, JobOperation};
    pub use crate::payload::{JobPayload, JobPayloadOps, NoPayload};
    pub use crate::status::{InMemoryStatusStore, StatusDirStore, StatusStore};
}
