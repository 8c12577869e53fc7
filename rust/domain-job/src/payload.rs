//! Hypervisor-specific job payload.
//!
//! The job core never looks inside the payload. It allocates one per record,
//! resets it with the async channel, hands it out on restore, and lets it
//! contribute children to the persisted `<job>` element.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::JobResult;
use crate::status::StatusElement;

/// Private per-record data attached to the async channel.
pub trait JobPayload: Send + fmt::Debug {
    /// Clears the payload when the async channel is reset.
    fn reset(&mut self);

    /// Appends persisted children to the `<job>` element.
    fn format(&self, children: &mut Vec<StatusElement>) -> JobResult<()>;

    /// Restores state from a persisted `<job>` element.
    fn parse(&mut self, job: &StatusElement) -> JobResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Factory for payloads, supplied by the hosting hypervisor driver.
pub trait JobPayloadOps: Send + Sync {
    fn alloc(&self) -> Box<dyn JobPayload>;
}

/// Payload for drivers that keep no private job data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoPayload;

impl NoPayload {
    pub fn ops() -> Arc<dyn JobPayloadOps> {
        Arc::new(NoPayloadOps)
    }
}

impl JobPayload for NoPayload {
    fn reset(&mut self) {}

    fn format(&self, _children: &mut Vec<StatusElement>) -> JobResult<()> {
        Ok(())
    }

    fn parse(&mut self, _job: &StatusElement) -> JobResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug)]
struct NoPayloadOps;

impl JobPayloadOps for NoPayloadOps {
    fn alloc(&self) -> Box<dyn JobPayload> {
        Box::new(NoPayload)
    }
}

impl fmt::Debug for dyn JobPayloadOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JobPayloadOps")
    }
}
