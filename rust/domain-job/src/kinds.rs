//! Job kinds, the async job mask and their canonical names.
//!
//! The names are the persisted spelling used in the status document and must
//! stay stable across releases.

use std::fmt;
use std::ops::BitOr;

/// Primary (monitor) channel job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobKind {
    #[default]
    None,
    /// Doesn't change any state.
    Query,
    /// Destroys the domain, cannot be masked out.
    Destroy,
    /// Suspends (stops vCPUs) the domain.
    Suspend,
    /// May change state.
    Modify,
    /// Aborts the current async job.
    Abort,
    /// Changes migration parameters while an async migration runs.
    MigrationOp,
    /// Marker requesting the async channel. Never stored as the active kind.
    Async,
    /// Primary job nested inside the active async job.
    AsyncNested,
}

impl JobKind {
    pub const ALL: [JobKind; 9] = [
        JobKind::None,
        JobKind::Query,
        JobKind::Destroy,
        JobKind::Suspend,
        JobKind::Modify,
        JobKind::Abort,
        JobKind::MigrationOp,
        JobKind::Async,
        JobKind::AsyncNested,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            JobKind::None | JobKind::Async => "none",
            JobKind::Query => "query",
            JobKind::Destroy => "destroy",
            JobKind::Suspend => "suspend",
            JobKind::Modify => "modify",
            JobKind::Abort => "abort",
            JobKind::MigrationOp => "migration operation",
            JobKind::AsyncNested => "async nested",
        }
    }

    /// Looks up a kind by name. `"none"` resolves to [`JobKind::None`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether holding this kind must be persisted.
    pub const fn is_tracked(self) -> bool {
        matches!(self, JobKind::Destroy | JobKind::Async)
    }

    const fn mask_bit(self) -> u32 {
        match self {
            JobKind::None => 0,
            other => 1 << (other as u32 - 1),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent channel job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AgentJobKind {
    #[default]
    None,
    Query,
    Modify,
}

impl AgentJobKind {
    pub const ALL: [AgentJobKind; 3] = [AgentJobKind::None, AgentJobKind::Query, AgentJobKind::Modify];

    pub const fn as_str(self) -> &'static str {
        match self {
            AgentJobKind::None => "none",
            AgentJobKind::Query => "query",
            AgentJobKind::Modify => "modify",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for AgentJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Async channel job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AsyncJobKind {
    #[default]
    None,
    MigrationOut,
    MigrationIn,
    Save,
    Dump,
    Snapshot,
    Start,
    Backup,
}

impl AsyncJobKind {
    pub const ALL: [AsyncJobKind; 8] = [
        AsyncJobKind::None,
        AsyncJobKind::MigrationOut,
        AsyncJobKind::MigrationIn,
        AsyncJobKind::Save,
        AsyncJobKind::Dump,
        AsyncJobKind::Snapshot,
        AsyncJobKind::Start,
        AsyncJobKind::Backup,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AsyncJobKind::None => "none",
            AsyncJobKind::MigrationOut => "migration out",
            AsyncJobKind::MigrationIn => "migration in",
            AsyncJobKind::Save => "save",
            AsyncJobKind::Dump => "dump",
            AsyncJobKind::Snapshot => "snapshot",
            AsyncJobKind::Start => "start",
            AsyncJobKind::Backup => "backup",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub const fn is_migration(self) -> bool {
        matches!(self, AsyncJobKind::MigrationOut | AsyncJobKind::MigrationIn)
    }

    /// Number of phases this kind knows by name.
    pub const fn phase_count(self) -> u32 {
        if self.is_migration() {
            MigrationPhase::ALL.len() as u32
        } else {
            1
        }
    }

    /// Renders `phase` for this kind. Unknown phases render as `"none"`.
    pub fn phase_name(self, phase: u32) -> &'static str {
        if self.is_migration() {
            MigrationPhase::from_index(phase).map_or("none", MigrationPhase::as_str)
        } else {
            "none"
        }
    }

    /// Parses a phase name for this kind.
    pub fn phase_from_name(self, name: &str) -> Option<u32> {
        if self.is_migration() {
            MigrationPhase::from_name(name).map(MigrationPhase::index)
        } else if name == "none" {
            Some(0)
        } else {
            None
        }
    }

    /// Statistics family reported for this kind.
    pub const fn stats_type(self) -> JobStatsType {
        match self {
            AsyncJobKind::MigrationOut | AsyncJobKind::MigrationIn => JobStatsType::Migration,
            AsyncJobKind::Save | AsyncJobKind::Snapshot => JobStatsType::SaveDump,
            AsyncJobKind::Dump => JobStatsType::MemDump,
            AsyncJobKind::Backup => JobStatsType::Backup,
            AsyncJobKind::None | AsyncJobKind::Start => JobStatsType::None,
        }
    }
}

impl fmt::Display for AsyncJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named phases of migration async jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MigrationPhase {
    #[default]
    None,
    Perform2,
    Begin3,
    Perform3,
    Perform3Done,
    Confirm3Cancelled,
    Confirm3,
    Prepare,
    Finish2,
    Finish3,
}

impl MigrationPhase {
    pub const ALL: [MigrationPhase; 10] = [
        MigrationPhase::None,
        MigrationPhase::Perform2,
        MigrationPhase::Begin3,
        MigrationPhase::Perform3,
        MigrationPhase::Perform3Done,
        MigrationPhase::Confirm3Cancelled,
        MigrationPhase::Confirm3,
        MigrationPhase::Prepare,
        MigrationPhase::Finish2,
        MigrationPhase::Finish3,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::None => "none",
            MigrationPhase::Perform2 => "perform2",
            MigrationPhase::Begin3 => "begin3",
            MigrationPhase::Perform3 => "perform3",
            MigrationPhase::Perform3Done => "perform3_done",
            MigrationPhase::Confirm3Cancelled => "confirm3_cancelled",
            MigrationPhase::Confirm3 => "confirm3",
            MigrationPhase::Prepare => "prepare",
            MigrationPhase::Finish2 => "finish2",
            MigrationPhase::Finish3 => "finish3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.as_str() == name)
    }

    pub const fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(usize::try_from(index).ok()?).copied()
    }
}

impl From<MigrationPhase> for u32 {
    fn from(phase: MigrationPhase) -> Self {
        phase.index()
    }
}

/// Set of primary job kinds permitted to run concurrently with an async job.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JobMask(u32);

impl JobMask {
    pub const EMPTY: JobMask = JobMask(0);

    /// Mask installed whenever the async channel is reset.
    pub const DEFAULT: JobMask = JobMask(
        JobKind::Query.mask_bit() | JobKind::Destroy.mask_bit() | JobKind::Abort.mask_bit(),
    );

    pub fn of(kinds: &[JobKind]) -> Self {
        kinds.iter().fold(Self::EMPTY, |mask, kind| mask.with(*kind))
    }

    #[must_use]
    pub const fn with(self, kind: JobKind) -> Self {
        JobMask(self.0 | kind.mask_bit())
    }

    #[must_use]
    pub const fn without(self, kind: JobKind) -> Self {
        JobMask(self.0 & !kind.mask_bit())
    }

    /// [`JobKind::None`] is never contained.
    pub const fn contains(self, kind: JobKind) -> bool {
        let bit = kind.mask_bit();
        bit != 0 && self.0 & bit == bit
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn kinds(self) -> impl Iterator<Item = JobKind> {
        JobKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl BitOr for JobMask {
    type Output = JobMask;

    fn bitor(self, rhs: JobMask) -> JobMask {
        JobMask(self.0 | rhs.0)
    }
}

impl From<JobKind> for JobMask {
    fn from(kind: JobKind) -> Self {
        JobMask::EMPTY.with(kind)
    }
}

impl fmt::Debug for JobMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds().map(JobKind::as_str)).finish()
    }
}

/// Public-facing operation an async job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobOperation {
    #[default]
    Unknown,
    Start,
    Save,
    Restore,
    MigrationIn,
    MigrationOut,
    Snapshot,
    SnapshotRevert,
    Dump,
    Backup,
    SnapshotDelete,
}

impl JobOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobOperation::Unknown => "unknown",
            JobOperation::Start => "start",
            JobOperation::Save => "save",
            JobOperation::Restore => "restore",
            JobOperation::MigrationIn => "migration in",
            JobOperation::MigrationOut => "migration out",
            JobOperation::Snapshot => "snapshot",
            JobOperation::SnapshotRevert => "snapshot revert",
            JobOperation::Dump => "dump",
            JobOperation::Backup => "backup",
            JobOperation::SnapshotDelete => "snapshot delete",
        }
    }
}

impl fmt::Display for JobOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress status of the current async job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobStatus {
    #[default]
    None,
    Active,
    Migrating,
    HypervisorCompleted,
    Paused,
    Postcopy,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::None => "none",
            JobStatus::Active => "active",
            JobStatus::Migrating => "migrating",
            JobStatus::HypervisorCompleted => "hypervisor completed",
            JobStatus::Paused => "paused",
            JobStatus::Postcopy => "postcopy",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Whether the job has reached a final state.
    pub const fn is_finished(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics family attached to job info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobStatsType {
    #[default]
    None,
    Migration,
    SaveDump,
    MemDump,
    Backup,
}

impl JobStatsType {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatsType::None => "none",
            JobStatsType::Migration => "migration",
            JobStatsType::SaveDump => "savedump",
            JobStatsType::MemDump => "memdump",
            JobStatsType::Backup => "backup",
        }
    }
}
