//! Per-domain job record.
//!
//! A [`JobRecord`] lives inside the domain lock and is only mutated by the
//! [`JobController`](crate::JobController) and the status parser.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::context::{JobContext, OwnerId};
use crate::error::Blocker;
use crate::kinds::{AgentJobKind, AsyncJobKind, JobKind, JobMask, JobOperation, JobStatsType, JobStatus};
use crate::payload::{JobPayload, JobPayloadOps};

/// Who holds a channel and since when.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChannelHolder {
    pub(crate) owner: Option<OwnerId>,
    pub(crate) api: Option<String>,
    pub(crate) started: Option<DateTime<Utc>>,
}

impl ChannelHolder {
    pub(crate) fn taken_by(ctx: &JobContext, now: DateTime<Utc>) -> Self {
        Self {
            owner: Some(ctx.owner()),
            api: ctx.api().map(str::to_owned),
            started: Some(now),
        }
    }

    pub(crate) fn held_for(&self, now: DateTime<Utc>) -> Duration {
        self.started
            .and_then(|started| (now - started).to_std().ok())
            .unwrap_or_default()
    }

    pub(crate) fn blocker(&self, kind: &str, now: DateTime<Utc>) -> Option<Blocker> {
        self.api.as_ref().map(|api| Blocker {
            api: api.clone(),
            kind: kind.to_string(),
            held_for: self.held_for(now),
        })
    }
}

/// Progress information for the current async job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub status: JobStatus,
    pub operation: JobOperation,
    pub stats_type: JobStatsType,
    pub started: DateTime<Utc>,
}

impl JobInfo {
    pub(crate) fn new(kind: AsyncJobKind, started: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Active,
            operation: JobOperation::Unknown,
            stats_type: kind.stats_type(),
            started,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started).to_std().unwrap_or_default()
    }
}

/// State handed back by [`JobRecord::restore`].
#[derive(Debug)]
pub struct RestoredJob {
    pub active: JobKind,
    pub owner: Option<OwnerId>,
    pub async_job: AsyncJobKind,
    pub async_owner: Option<OwnerId>,
    pub phase: u32,
    pub api_flags: u64,
    pub payload: Box<dyn JobPayload>,
}

impl RestoredJob {
    pub fn is_empty(&self) -> bool {
        self.active == JobKind::None && self.async_job == AsyncJobKind::None
    }
}

/// Serializable snapshot of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub job: &'static str,
    pub job_owner: Option<u64>,
    pub job_api: Option<String>,
    pub agent_job: &'static str,
    pub agent_job_owner: Option<u64>,
    pub async_job: &'static str,
    pub async_job_owner: Option<u64>,
    pub async_job_api: Option<String>,
    pub phase: &'static str,
    pub allowed: Vec<&'static str>,
    pub api_flags: String,
    pub queued: u32,
    pub abort_requested: bool,
    pub status: Option<&'static str>,
    pub operation: Option<&'static str>,
    pub async_started: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Job state for one domain.
pub struct JobRecord {
    pub(crate) active: JobKind,
    pub(crate) holder: ChannelHolder,

    pub(crate) agent_active: AgentJobKind,
    pub(crate) agent_holder: ChannelHolder,

    pub(crate) async_job: AsyncJobKind,
    pub(crate) async_holder: ChannelHolder,
    pub(crate) phase: u32,
    pub(crate) mask: JobMask,
    pub(crate) abort_requested: bool,
    pub(crate) api_flags: u64,
    pub(crate) last_error: Option<String>,
    pub(crate) current: Option<JobInfo>,

    pub(crate) queued: u32,

    payload: Box<dyn JobPayload>,
    ops: Arc<dyn JobPayloadOps>,
}

impl JobRecord {
    pub fn new(ops: Arc<dyn JobPayloadOps>) -> Self {
        Self {
            active: JobKind::None,
            holder: ChannelHolder::default(),
            agent_active: AgentJobKind::None,
            agent_holder: ChannelHolder::default(),
            async_job: AsyncJobKind::None,
            async_holder: ChannelHolder::default(),
            phase: 0,
            mask: JobMask::DEFAULT,
            abort_requested: false,
            api_flags: 0,
            last_error: None,
            current: None,
            queued: 0,
            payload: ops.alloc(),
            ops,
        }
    }

    pub fn active(&self) -> JobKind {
        self.active
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.holder.owner
    }

    pub fn owner_api(&self) -> Option<&str> {
        self.holder.api.as_deref()
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.holder.started
    }

    pub fn agent_active(&self) -> AgentJobKind {
        self.agent_active
    }

    pub fn agent_owner(&self) -> Option<OwnerId> {
        self.agent_holder.owner
    }

    pub fn agent_owner_api(&self) -> Option<&str> {
        self.agent_holder.api.as_deref()
    }

    pub fn agent_started(&self) -> Option<DateTime<Utc>> {
        self.agent_holder.started
    }

    pub fn async_job(&self) -> AsyncJobKind {
        self.async_job
    }

    pub fn async_owner(&self) -> Option<OwnerId> {
        self.async_holder.owner
    }

    pub fn async_owner_api(&self) -> Option<&str> {
        self.async_holder.api.as_deref()
    }

    pub fn async_started(&self) -> Option<DateTime<Utc>> {
        self.async_holder.started
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn mask(&self) -> JobMask {
        self.mask
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    pub fn api_flags(&self) -> u64 {
        self.api_flags
    }

    /// Number of callers currently queued or holding a job.
    pub fn queued(&self) -> u32 {
        self.queued
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Records a failure message for the current async job.
    pub fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn job_info(&self) -> Option<&JobInfo> {
        self.current.as_ref()
    }

    pub fn job_info_mut(&mut self) -> Option<&mut JobInfo> {
        self.current.as_mut()
    }

    pub fn payload(&self) -> &dyn JobPayload {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> &mut dyn JobPayload {
        self.payload.as_mut()
    }

    /// Downcasts the payload to the driver's concrete type.
    pub fn payload_as<P: JobPayload + 'static>(&self) -> Option<&P> {
        self.payload.as_any().downcast_ref::<P>()
    }

    pub fn payload_as_mut<P: JobPayload + 'static>(&mut self) -> Option<&mut P> {
        self.payload.as_any_mut().downcast_mut::<P>()
    }

    /// Whether a primary job of `kind` may run alongside the current async job.
    pub fn nested_allowed(&self, kind: JobKind) -> bool {
        self.async_job == AsyncJobKind::None || kind == JobKind::None || self.mask.contains(kind)
    }

    /// Whether both requested channels are free.
    pub fn can_set(&self, kind: JobKind, agent: AgentJobKind) -> bool {
        (kind == JobKind::None || self.active == JobKind::None)
            && (agent == AgentJobKind::None || self.agent_active == AgentJobKind::None)
    }

    /// Whether a primary job of `kind` could be admitted right now.
    pub fn job_allowed(&self, kind: JobKind) -> bool {
        self.active == JobKind::None && self.nested_allowed(kind)
    }

    /// Takes the persisted state out of the record for recovery and leaves
    /// both primary and async channels cleared with a fresh payload.
    pub fn restore(&mut self) -> RestoredJob {
        let payload = std::mem::replace(&mut self.payload, self.ops.alloc());
        let restored = RestoredJob {
            active: self.active,
            owner: self.holder.owner,
            async_job: self.async_job,
            async_owner: self.async_holder.owner,
            phase: self.phase,
            api_flags: self.api_flags,
            payload,
        };
        self.reset_primary();
        self.reset_async();
        restored
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job: self.active.as_str(),
            job_owner: self.holder.owner.map(OwnerId::get),
            job_api: self.holder.api.clone(),
            agent_job: self.agent_active.as_str(),
            agent_job_owner: self.agent_holder.owner.map(OwnerId::get),
            async_job: self.async_job.as_str(),
            async_job_owner: self.async_holder.owner.map(OwnerId::get),
            async_job_api: self.async_holder.api.clone(),
            phase: self.async_job.phase_name(self.phase),
            allowed: self.mask.kinds().map(JobKind::as_str).collect(),
            api_flags: format!("0x{:x}", self.api_flags),
            queued: self.queued,
            abort_requested: self.abort_requested,
            status: self.current.as_ref().map(|info| info.status.as_str()),
            operation: self.current.as_ref().map(|info| info.operation.as_str()),
            async_started: self.async_holder.started,
            last_error: self.last_error.clone(),
        }
    }

    pub(crate) fn reset_primary(&mut self) {
        self.active = JobKind::None;
        self.holder = ChannelHolder::default();
    }

    pub(crate) fn reset_agent(&mut self) {
        self.agent_active = AgentJobKind::None;
        self.agent_holder = ChannelHolder::default();
    }

    pub(crate) fn reset_async(&mut self) {
        self.async_job = AsyncJobKind::None;
        self.async_holder = ChannelHolder::default();
        self.phase = 0;
        self.mask = JobMask::DEFAULT;
        self.abort_requested = false;
        self.last_error = None;
        self.payload.reset();
        self.api_flags = 0;
        self.current = None;
    }

    pub(crate) fn enqueue(&mut self) {
        self.queued += 1;
    }

    pub(crate) fn dequeue(&mut self) {
        if self.queued == 0 {
            warn!("job queue counter underflow, ignoring release");
            return;
        }
        self.queued -= 1;
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("active", &self.active)
            .field("holder", &self.holder)
            .field("agent_active", &self.agent_active)
            .field("agent_holder", &self.agent_holder)
            .field("async_job", &self.async_job)
            .field("async_holder", &self.async_holder)
            .field("phase", &self.phase)
            .field("mask", &self.mask)
            .field("abort_requested", &self.abort_requested)
            .field("api_flags", &self.api_flags)
            .field("queued", &self.queued)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
