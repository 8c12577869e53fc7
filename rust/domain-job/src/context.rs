//! Identity of the thread of control asking for a job.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_OWNER: Cell<u64> = const { Cell::new(0) };
}

/// Opaque owner identity recorded in a job channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    pub const fn new(id: u64) -> Self {
        OwnerId(id)
    }

    /// Identity of the calling thread, allocated on first use.
    pub fn current() -> Self {
        CURRENT_OWNER.with(|slot| {
            let mut id = slot.get();
            if id == 0 {
                id = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
                slot.set(id);
            }
            OwnerId(id)
        })
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calling context passed to every job operation.
///
/// The API label is only used for diagnostics, so it is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    owner: OwnerId,
    api: Option<String>,
}

impl JobContext {
    pub fn new(owner: OwnerId, api: impl Into<String>) -> Self {
        Self {
            owner,
            api: Some(api.into()),
        }
    }

    pub fn anonymous(owner: OwnerId) -> Self {
        Self { owner, api: None }
    }

    /// Context for the calling thread.
    pub fn current(api: impl Into<String>) -> Self {
        Self::new(OwnerId::current(), api)
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn api(&self) -> Option<&str> {
        self.api.as_deref()
    }
}
