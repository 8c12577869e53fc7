use crate::kinds::JobKind;

/// Global ceiling on callers queued per domain.
///
/// A ceiling of zero disables the limit. Async and destroy requests are
/// never rejected by it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLimiter {
    max_queued: u32,
}

impl QueueLimiter {
    pub const fn new(max_queued: u32) -> Self {
        Self { max_queued }
    }

    pub const fn unlimited() -> Self {
        Self { max_queued: 0 }
    }

    pub const fn max_queued(&self) -> u32 {
        self.max_queued
    }

    pub const fn is_unlimited(&self) -> bool {
        self.max_queued == 0
    }

    /// Whether `queued` callers, counting the requester, exceed the ceiling.
    pub const fn exceeded(&self, queued: u32) -> bool {
        !self.is_unlimited() && queued > self.max_queued
    }

    /// Whether a request for `kind` must be turned away.
    pub const fn rejects(&self, kind: JobKind, queued: u32) -> bool {
        !matches!(kind, JobKind::Async | JobKind::Destroy) && self.exceeded(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_rejects() {
        let limiter = QueueLimiter::unlimited();
        assert!(limiter.is_unlimited());
        assert!(!limiter.rejects(JobKind::Modify, u32::MAX));
    }

    #[test]
    fn test_ceiling_counts_requester() {
        let limiter = QueueLimiter::new(1);
        assert!(!limiter.rejects(JobKind::Modify, 1));
        assert!(limiter.rejects(JobKind::Modify, 2));
        assert!(limiter.rejects(JobKind::AsyncNested, 2));
    }

    #[test]
    fn test_async_and_destroy_bypass() {
        let limiter = QueueLimiter::new(1);
        assert!(!limiter.rejects(JobKind::Destroy, 10));
        assert!(!limiter.rejects(JobKind::Async, 10));
    }
}
