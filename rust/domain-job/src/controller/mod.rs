//! Job admission and release for locked domains.
//!
//! Every operation takes a [`DomainGuard`], so callers must already hold the
//! domain lock. Waiting releases the lock and reacquires it before returning.
//! A successful `begin_*` must be paired with the matching `end_*` on every
//! path.

mod admission;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::JobsConfig;
use crate::context::JobContext;
use crate::domain::DomainGuard;
use crate::error::{JobError, JobResult};
use crate::kinds::{AgentJobKind, AsyncJobKind, JobKind, JobMask, JobOperation};
use crate::limiter::QueueLimiter;
use crate::status::StatusStore;

use admission::Request;

/// Serializes jobs on domains and persists tracked state changes.
pub struct JobController {
    limiter: QueueLimiter,
    wait_budget: Duration,
    store: Arc<dyn StatusStore>,
}

impl JobController {
    pub fn new(store: Arc<dyn StatusStore>, config: &JobsConfig) -> Self {
        Self::with_limits(store, QueueLimiter::new(config.max_queued_jobs), config.wait_budget())
    }

    pub fn with_limits(
        store: Arc<dyn StatusStore>,
        limiter: QueueLimiter,
        wait_budget: Duration,
    ) -> Self {
        Self {
            limiter,
            wait_budget,
            store,
        }
    }

    pub fn limiter(&self) -> QueueLimiter {
        self.limiter
    }

    pub fn wait_budget(&self) -> Duration {
        self.wait_budget
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Acquires a primary job, waiting up to the wait budget.
    pub fn begin_job<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        job: JobKind,
    ) -> JobResult<()> {
        self.begin_internal(dom, ctx, Request::primary(job))?;
        Ok(())
    }

    /// Acquires an agent job.
    pub fn begin_agent_job<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        agent: AgentJobKind,
    ) -> JobResult<()> {
        let req = Request {
            agent,
            ..Request::primary(JobKind::None)
        };
        self.begin_internal(dom, ctx, req)?;
        Ok(())
    }

    /// Acquires a primary and an agent job at once.
    ///
    /// Both channels must be free at the same time; neither is held while
    /// waiting for the other. Release with
    /// [`end_job_with_agent`](Self::end_job_with_agent).
    pub fn begin_job_with_agent<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        job: JobKind,
        agent: AgentJobKind,
    ) -> JobResult<()> {
        let req = Request {
            agent,
            ..Request::primary(job)
        };
        self.begin_internal(dom, ctx, req)?;
        Ok(())
    }

    /// Starts an async job. The caller becomes its owner.
    pub fn begin_async_job<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        async_job: AsyncJobKind,
        operation: JobOperation,
        api_flags: u64,
    ) -> JobResult<()> {
        let req = Request {
            async_job,
            operation,
            api_flags,
            ..Request::primary(JobKind::Async)
        };
        self.begin_internal(dom, ctx, req)?;
        Ok(())
    }

    /// Acquires the primary channel on behalf of the running async job.
    ///
    /// Nested jobs skip the async mask but still need the primary channel to
    /// be free.
    pub fn begin_nested_job<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        async_job: AsyncJobKind,
    ) -> JobResult<()> {
        let active = dom.job().async_job();
        if async_job != active {
            return Err(JobError::ProtocolMismatch {
                requested: async_job,
                active,
            });
        }

        if dom.job().async_owner() != Some(ctx.owner()) {
            warn!(
                domain = dom.name(),
                owner = %ctx.owner(),
                async_owner = ?dom.job().async_owner(),
                async_owner_api = dom.job().async_owner_api(),
                "This thread doesn't seem to be the async job owner"
            );
        }

        self.begin_job(dom, ctx, JobKind::AsyncNested)
    }

    /// Like [`begin_job`](Self::begin_job) but never waits.
    ///
    /// Returns `Ok(false)` without reporting an error if the job could not be
    /// acquired immediately.
    pub fn begin_job_nowait<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        job: JobKind,
    ) -> JobResult<bool> {
        let req = Request {
            nowait: true,
            ..Request::primary(job)
        };
        self.begin_internal(dom, ctx, req)
    }

    /// Releases the primary job and wakes its waiters.
    pub fn end_job<T>(&self, dom: &mut DomainGuard<'_, T>) {
        let job = dom.job().active();
        let record = dom.job_mut();
        record.dequeue();
        debug!(job = %job, async_job = %record.async_job(), "Stopping job");
        record.reset_primary();
        if job.is_tracked() {
            self.save_status(dom);
        }
        dom.domain().notify_job();
    }

    pub fn end_agent_job<T>(&self, dom: &mut DomainGuard<'_, T>) {
        let record = dom.job_mut();
        record.dequeue();
        debug!(
            agent_job = %record.agent_active(),
            job = %record.active(),
            async_job = %record.async_job(),
            "Stopping agent job"
        );
        record.reset_agent();
        dom.domain().notify_job();
    }

    /// Releases a job taken with [`begin_job_with_agent`](Self::begin_job_with_agent).
    pub fn end_job_with_agent<T>(&self, dom: &mut DomainGuard<'_, T>) {
        let job = dom.job().active();
        let record = dom.job_mut();
        record.dequeue();
        debug!(
            job = %job,
            agent_job = %record.agent_active(),
            async_job = %record.async_job(),
            "Stopping job with agent"
        );
        record.reset_primary();
        record.reset_agent();
        if job.is_tracked() {
            self.save_status(dom);
        }
        dom.domain().notify_job();
    }

    /// Finishes the async job and wakes callers waiting on it.
    pub fn end_async_job<T>(&self, dom: &mut DomainGuard<'_, T>) {
        let record = dom.job_mut();
        record.dequeue();
        debug!(async_job = %record.async_job(), "Stopping async job");
        record.reset_async();
        self.save_status(dom);
        dom.domain().notify_async();
    }

    /// Drops the async job without touching the queue counter.
    ///
    /// Used when the async job could not be started properly, for example
    /// after a failed recovery. No waiters are woken.
    pub fn discard_async_job<T>(&self, dom: &mut DomainGuard<'_, T>) {
        let record = dom.job_mut();
        debug!(async_job = %record.async_job(), "Discarding async job");
        if record.active() == JobKind::AsyncNested {
            record.reset_primary();
        }
        record.reset_async();
        self.save_status(dom);
    }

    /// Clears the async owner so another thread can take the job over.
    pub fn release_async_job<T>(&self, dom: &mut DomainGuard<'_, T>, ctx: &JobContext) {
        let record = dom.job_mut();
        debug!(async_job = %record.async_job(), "Releasing ownership of async job");
        if record.async_owner() != Some(ctx.owner()) {
            warn!(
                owner = %ctx.owner(),
                async_owner = ?record.async_owner(),
                async_owner_api = record.async_owner_api(),
                "Async job is not owned by this thread"
            );
        }
        record.async_holder.owner = None;
    }

    /// Flags the async job for cancellation and wakes it. No-op without an
    /// async job.
    pub fn abort_async_job<T>(&self, dom: &mut DomainGuard<'_, T>) {
        if dom.job().async_job() == AsyncJobKind::None {
            debug!(domain = dom.name(), "No async job to abort");
            return;
        }
        debug!(async_job = %dom.job().async_job(), "Requesting abort of async job");
        dom.job_mut().abort_requested = true;
        dom.domain().broadcast();
    }

    /// Moves the async job to `phase` and makes the caller its owner.
    ///
    /// Phases outside the kind's phase table are refused with a warning and
    /// leave the job untouched, since they could not be persisted.
    pub fn set_async_phase<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        phase: impl Into<u32>,
    ) {
        let phase = phase.into();
        let record = dom.job_mut();
        if record.async_job() == AsyncJobKind::None {
            return;
        }

        if phase >= record.async_job().phase_count() {
            warn!(
                async_job = %record.async_job(),
                phase,
                "Ignoring phase unknown to async job"
            );
            return;
        }

        debug!(
            async_job = %record.async_job(),
            phase = record.async_job().phase_name(phase),
            "Setting async job phase"
        );

        if let Some(owner) = record.async_owner() {
            if owner != ctx.owner() {
                warn!(
                    owner = %ctx.owner(),
                    async_owner = %owner,
                    async_owner_api = record.async_owner_api(),
                    "Changing phase of async job owned by another thread"
                );
            }
        }

        record.phase = phase;
        record.async_holder.owner = Some(ctx.owner());
        self.save_status(dom);
    }

    /// Restricts which primary jobs may run alongside the async job.
    /// Destroy is always allowed.
    pub fn set_async_job_mask<T>(&self, dom: &mut DomainGuard<'_, T>, allowed: JobMask) {
        let record = dom.job_mut();
        if record.async_job() == AsyncJobKind::None {
            return;
        }
        record.mask = allowed.with(JobKind::Destroy);
        dom.domain().notify_async();
    }

    fn save_status<T>(&self, dom: &DomainGuard<'_, T>) {
        if let Err(err) = self.store.save_status(dom.name(), dom.job()) {
            warn!(domain = dom.name(), error = %err, "Failed to save status");
        }
    }
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("limiter", &self.limiter)
            .field("wait_budget", &self.wait_budget)
            .finish_non_exhaustive()
    }
}
