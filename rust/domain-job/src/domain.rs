//! The domain object lock and its wait queues.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::payload::JobPayloadOps;
use crate::record::JobRecord;

struct DomainState<T> {
    job: JobRecord,
    data: T,
}

/// A managed domain: its identity, its lock, and the wait queues for the
/// job channels.
///
/// `T` is any driver state that must be protected by the same lock as the
/// job record.
pub struct Domain<T = ()> {
    name: String,
    state: Mutex<DomainState<T>>,
    /// Signaled when the primary or agent channel is released.
    job_cond: Condvar,
    /// Signaled on async channel changes.
    async_cond: Condvar,
    /// General purpose wakeup, used for abort requests.
    cond: Condvar,
}

impl Domain<()> {
    pub fn new(name: impl Into<String>, ops: Arc<dyn JobPayloadOps>) -> Self {
        Self::with_data(name, ops, ())
    }
}

impl<T> Domain<T> {
    pub fn with_data(name: impl Into<String>, ops: Arc<dyn JobPayloadOps>, data: T) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DomainState {
                job: JobRecord::new(ops),
                data,
            }),
            job_cond: Condvar::new(),
            async_cond: Condvar::new(),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locks the domain object.
    pub fn lock(&self) -> DomainGuard<'_, T> {
        DomainGuard {
            domain: self,
            state: self.state.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<DomainGuard<'_, T>> {
        self.state.try_lock().map(|state| DomainGuard {
            domain: self,
            state,
        })
    }

    /// Wakes everyone waiting on the general condition.
    pub fn broadcast(&self) {
        self.cond.notify_all();
    }

    pub(crate) fn notify_job(&self) {
        self.job_cond.notify_all();
    }

    pub(crate) fn notify_async(&self) {
        self.async_cond.notify_all();
    }
}

impl<T> fmt::Debug for Domain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a locked domain.
pub struct DomainGuard<'a, T = ()> {
    domain: &'a Domain<T>,
    state: MutexGuard<'a, DomainState<T>>,
}

impl<'a, T> DomainGuard<'a, T> {
    pub fn domain(&self) -> &'a Domain<T> {
        self.domain
    }

    pub fn name(&self) -> &'a str {
        self.domain.name()
    }

    pub fn job(&self) -> &JobRecord {
        &self.state.job
    }

    pub fn job_mut(&mut self) -> &mut JobRecord {
        &mut self.state.job
    }

    pub fn data(&self) -> &T {
        &self.state.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.state.data
    }

    /// Waits on the general condition, releasing the lock meanwhile.
    /// Returns `false` if `deadline` passed first.
    pub fn wait_until(&mut self, deadline: Instant) -> bool {
        !self.domain.cond.wait_until(&mut self.state, deadline).timed_out()
    }

    pub(crate) fn wait_job(&mut self, deadline: Instant) -> bool {
        !self
            .domain
            .job_cond
            .wait_until(&mut self.state, deadline)
            .timed_out()
    }

    pub(crate) fn wait_async(&mut self, deadline: Instant) -> bool {
        !self
            .domain
            .async_cond
            .wait_until(&mut self.state, deadline)
            .timed_out()
    }

    /// Releases the lock for the duration of `f`.
    pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        MutexGuard::unlocked(&mut self.state, f)
    }
}

impl<T: fmt::Debug> fmt::Debug for DomainGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainGuard")
            .field("name", &self.domain.name)
            .field("job", &self.state.job)
            .field("data", &self.state.data)
            .finish()
    }
}
