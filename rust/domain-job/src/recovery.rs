//! Job recovery after a daemon restart.
//!
//! When the daemon starts it reloads each domain's status document, takes the
//! interrupted job out of the record with [`JobRecord::restore`], and decides
//! what the driver has to do about it. The cleared record is flushed so a
//! second crash does not replay the same job.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_job::recovery::{recover_domain, RecoveryAction};
//!
//! let mut guard = domain.lock();
//! let recovered = recover_domain(&mut guard, store.as_ref())?;
//! match recovered.action {
//!     RecoveryAction::ResumeAsync { kind, phase } => driver.resume(kind, phase),
//!     RecoveryAction::CancelAsync { .. } => driver.cancel(),
//!     RecoveryAction::FinishDestroy => driver.kill(),
//!     RecoveryAction::Nothing => {}
//! }
//! ```
//!
//! [`JobRecord::restore`]: crate::record::JobRecord::restore

use tracing::{info, warn};

use crate::domain::DomainGuard;
use crate::error::JobResult;
use crate::kinds::{AsyncJobKind, JobKind};
use crate::record::RestoredJob;
use crate::status::{parse_status, StatusStore};

/// What the driver must do with a job found in persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// No job was in flight.
    Nothing,

    /// A destroy was interrupted and must be completed.
    FinishDestroy,

    /// A migration reached a named phase and can be resumed or rolled back
    /// from there.
    ResumeAsync { kind: AsyncJobKind, phase: u32 },

    /// Any other async job must be cancelled and its side effects undone.
    CancelAsync { kind: AsyncJobKind, phase: u32 },
}

impl RecoveryAction {
    /// Classifies a restored job. An interrupted destroy wins over any async
    /// job.
    #[must_use]
    pub fn for_job(job: &RestoredJob) -> Self {
        if job.active == JobKind::Destroy {
            return Self::FinishDestroy;
        }

        match job.async_job {
            AsyncJobKind::None => Self::Nothing,
            kind if kind.is_migration() && job.phase != 0 => Self::ResumeAsync {
                kind,
                phase: job.phase,
            },
            kind => Self::CancelAsync {
                kind,
                phase: job.phase,
            },
        }
    }

    #[must_use]
    pub const fn needs_driver(&self) -> bool {
        !matches!(self, Self::Nothing)
    }
}

/// Outcome of recovering one domain.
#[derive(Debug)]
pub struct RecoveredDomain {
    /// State taken out of the record, including the driver payload.
    pub restored: RestoredJob,
    pub action: RecoveryAction,
}

/// Reloads the persisted job of a locked domain and clears it.
///
/// A domain without a status document recovers to [`RecoveryAction::Nothing`].
pub fn recover_domain<T>(
    dom: &mut DomainGuard<'_, T>,
    store: &dyn StatusStore,
) -> JobResult<RecoveredDomain> {
    if let Some(document) = store.load_status(dom.name())? {
        let recorded = match parse_status(&document, dom.job_mut()) {
            Ok(recorded) => recorded,
            Err(err) => {
                // Parsing fills the record as it goes; drop whatever was
                // applied before the failure so the channels stay usable.
                let _partial = dom.job_mut().restore();
                warn!(domain = dom.name(), error = %err, "Discarding unreadable status document");
                return Err(err);
            }
        };
        if !recorded.is_empty() && recorded != dom.name() {
            warn!(
                domain = dom.name(),
                recorded = %recorded,
                "Status document was written for a different domain"
            );
        }
    }

    let restored = dom.job_mut().restore();
    let action = RecoveryAction::for_job(&restored);

    if !restored.is_empty() {
        store.save_status(dom.name(), dom.job())?;
    }

    info!(
        domain = dom.name(),
        job = %restored.active,
        async_job = %restored.async_job,
        phase = restored.async_job.phase_name(restored.phase),
        action = ?action,
        "Recovered domain job state"
    );

    Ok(RecoveredDomain { restored, action })
}
