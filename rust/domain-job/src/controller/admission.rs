//! Admission: waiting for a channel and installing the new holder.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use crate::context::JobContext;
use crate::domain::DomainGuard;
use crate::error::{Blockers, JobError, JobResult};
use crate::kinds::{AgentJobKind, AsyncJobKind, JobKind, JobOperation};
use crate::record::{ChannelHolder, JobInfo};

use super::JobController;

/// What a caller asked for.
#[derive(Debug, Clone, Copy)]
pub(super) struct Request {
    pub(super) job: JobKind,
    pub(super) agent: AgentJobKind,
    pub(super) async_job: AsyncJobKind,
    pub(super) operation: JobOperation,
    pub(super) api_flags: u64,
    pub(super) nowait: bool,
}

impl Request {
    pub(super) fn primary(job: JobKind) -> Self {
        Self {
            job,
            agent: AgentJobKind::None,
            async_job: AsyncJobKind::None,
            operation: JobOperation::Unknown,
            api_flags: 0,
            nowait: false,
        }
    }

    fn nested(&self) -> bool {
        self.job == JobKind::AsyncNested
    }
}

/// Why waiting for a slot ended without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Timeout,
    QueueLimit,
}

impl JobController {
    /// Acquires the requested channels on a locked domain.
    ///
    /// Returns `Ok(false)` only for `nowait` requests that found the channel
    /// busy or the queue full.
    pub(super) fn begin_internal<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        ctx: &JobContext,
        req: Request,
    ) -> JobResult<bool> {
        debug!(
            domain = dom.name(),
            job = %req.job,
            agent_job = %req.agent,
            async_job = %req.async_job,
            current_job = %dom.job().active(),
            current_agent_job = %dom.job().agent_active(),
            current_async_job = %dom.job().async_job(),
            "Starting job"
        );

        let deadline = Instant::now()
            .checked_add(self.wait_budget)
            .ok_or_else(|| JobError::SystemFailure("job wait deadline overflows the clock".into()))?;

        dom.job_mut().enqueue();

        let outcome = self.wait_for_slot(dom, req, deadline);
        match outcome {
            Ok(true) => {
                self.install(dom, ctx, req);
                Ok(true)
            }
            Ok(false) => {
                dom.job_mut().dequeue();
                Ok(false)
            }
            Err(refusal) => {
                let err = self.refusal_error(dom, req, refusal);
                dom.job_mut().dequeue();
                Err(err)
            }
        }
    }

    fn wait_for_slot<T>(
        &self,
        dom: &mut DomainGuard<'_, T>,
        req: Request,
        deadline: Instant,
    ) -> Result<bool, Refusal> {
        loop {
            if self.limiter.rejects(req.job, dom.job().queued()) {
                if req.nowait {
                    return Ok(false);
                }
                return Err(Refusal::QueueLimit);
            }

            while !req.nested() && !dom.job().nested_allowed(req.job) {
                if req.nowait {
                    return Ok(false);
                }
                debug!(domain = dom.name(), "Waiting for async job");
                if !dom.wait_async(deadline) {
                    return Err(Refusal::Timeout);
                }
            }

            while !dom.job().can_set(req.job, req.agent) {
                if req.nowait {
                    return Ok(false);
                }
                debug!(domain = dom.name(), "Waiting for job");
                if !dom.wait_job(deadline) {
                    return Err(Refusal::Timeout);
                }
            }

            // An async job may have started while we waited for the primary
            // channel.
            if req.nested() || dom.job().nested_allowed(req.job) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Err(Refusal::Timeout);
            }
        }
    }

    fn install<T>(&self, dom: &mut DomainGuard<'_, T>, ctx: &JobContext, req: Request) {
        let now = Utc::now();
        let record = dom.job_mut();

        if req.job != JobKind::None {
            record.reset_primary();

            if req.job == JobKind::Async {
                debug!(async_job = %req.async_job, "Started async job");
                record.reset_async();
                let mut info = JobInfo::new(req.async_job, now);
                info.operation = req.operation;
                record.current = Some(info);
                record.async_job = req.async_job;
                record.async_holder = ChannelHolder::taken_by(ctx, now);
                record.api_flags = req.api_flags;
            } else {
                debug!(job = %req.job, "Started job");
                record.active = req.job;
                record.holder = ChannelHolder::taken_by(ctx, now);
            }
        }

        if req.agent != AgentJobKind::None {
            debug!(agent_job = %req.agent, "Started agent job");
            record.reset_agent();
            record.agent_active = req.agent;
            record.agent_holder = ChannelHolder::taken_by(ctx, now);
        }

        if req.job.is_tracked() {
            self.save_status(dom);
        }
    }

    fn refusal_error<T>(&self, dom: &DomainGuard<'_, T>, req: Request, refusal: Refusal) -> JobError {
        let record = dom.job();
        let now = Utc::now();

        warn!(
            domain = dom.name(),
            job = %req.job,
            agent_job = %req.agent,
            async_job = %req.async_job,
            current_job = %record.active(),
            current_agent_job = %record.agent_active(),
            current_async_job = %record.async_job(),
            owner = ?record.owner(),
            owner_api = record.owner_api(),
            agent_owner = ?record.agent_owner(),
            agent_owner_api = record.agent_owner_api(),
            async_owner = ?record.async_owner(),
            async_owner_api = record.async_owner_api(),
            held_for_secs = record.holder.held_for(now).as_secs(),
            agent_held_for_secs = record.agent_holder.held_for(now).as_secs(),
            async_held_for_secs = record.async_holder.held_for(now).as_secs(),
            queued = record.queued(),
            "Cannot start job"
        );

        let monitor = if req.job == JobKind::None {
            None
        } else if req.nested() || record.nested_allowed(req.job) {
            record.holder.blocker(record.active().as_str(), now)
        } else {
            record.async_holder.blocker(record.async_job().as_str(), now)
        };
        let agent = if req.agent == AgentJobKind::None {
            None
        } else {
            record.agent_holder.blocker(record.agent_active().as_str(), now)
        };
        let blockers = Blockers { monitor, agent };

        match refusal {
            Refusal::Timeout => JobError::LockTimeout { blockers },
            Refusal::QueueLimit => JobError::QueueLimitExceeded { blockers },
        }
    }
}
