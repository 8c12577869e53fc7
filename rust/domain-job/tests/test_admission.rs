use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use domain_job::{
    AgentJobKind, AsyncJobKind, Domain, DomainGuard, InMemoryStatusStore, JobContext, JobController, JobError,
    JobKind, JobMask, JobOperation, NoPayload, QueueLimiter, StatusStore,
};

struct Harness {
    domain: Arc<Domain>,
    jobs: Arc<JobController>,
}

fn setup(max_queued: u32, wait: Duration) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store: Arc<dyn StatusStore> = Arc::new(InMemoryStatusStore::new());
    Harness {
        domain: Arc::new(Domain::new("vm1", NoPayload::ops())),
        jobs: Arc::new(JobController::with_limits(
            store,
            QueueLimiter::new(max_queued),
            wait,
        )),
    }
}

impl Harness {
    fn spawn<R: Send + 'static>(
        &self,
        f: impl FnOnce(&Domain, &JobController) -> R + Send + 'static,
    ) -> thread::JoinHandle<R> {
        let domain = Arc::clone(&self.domain);
        let jobs = Arc::clone(&self.jobs);
        thread::spawn(move || f(&domain, &jobs))
    }

    fn queued(&self) -> u32 {
        self.domain.lock().job().queued()
    }

    /// Polls until `expected` callers are queued, so waiters are known to be parked.
    fn wait_for_queued(&self, expected: u32) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.queued() != expected {
            assert!(Instant::now() < deadline, "queue never reached {expected}");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

#[test]
fn test_modify_blocks_during_save_until_async_ends() {
    let h = setup(0, Duration::from_secs(10));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainSave");
        h.jobs
            .begin_async_job(&mut guard, &ctx, AsyncJobKind::Save, JobOperation::Save, 0)
            .unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let waiter = h.spawn(move |domain, jobs| {
        let mut guard = domain.lock();
        let ctx = JobContext::current("domainSetMemory");
        let result = jobs.begin_job(&mut guard, &ctx, JobKind::Modify);
        let _ = tx.send(());
        if result.is_ok() {
            jobs.end_job(&mut guard);
        }
        result
    });

    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "modify must wait while save is running"
    );

    {
        let mut guard = h.domain.lock();
        h.jobs.end_async_job(&mut guard);
    }

    waiter.join().unwrap().unwrap();
    assert_eq!(h.queued(), 0);
}

#[test]
fn test_destroy_runs_during_migration() {
    let h = setup(0, Duration::from_secs(10));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainMigratePerform3");
        h.jobs
            .begin_async_job(
                &mut guard,
                &ctx,
                AsyncJobKind::MigrationOut,
                JobOperation::MigrationOut,
                0,
            )
            .unwrap();
    }

    let elapsed = h
        .spawn(|domain, jobs| {
            let start = Instant::now();
            let mut guard = domain.lock();
            let ctx = JobContext::current("domainDestroy");
            jobs.begin_job(&mut guard, &ctx, JobKind::Destroy).unwrap();
            assert_eq!(guard.job().active(), JobKind::Destroy);
            assert_eq!(guard.job().async_job(), AsyncJobKind::MigrationOut);
            jobs.end_job(&mut guard);
            start.elapsed()
        })
        .join()
        .unwrap();

    assert!(elapsed < Duration::from_secs(2), "destroy waited {elapsed:?}");

    let mut guard = h.domain.lock();
    h.jobs.end_async_job(&mut guard);
    assert_eq!(guard.job().queued(), 0);
}

#[test]
fn test_queue_limit_rejects_second_caller() {
    let h = setup(1, Duration::from_secs(10));
    let mut guard = h.domain.lock();
    let ctx = JobContext::current("domainSetMemory");
    h.jobs.begin_job(&mut guard, &ctx, JobKind::Modify).unwrap();
    drop(guard);

    let err = h
        .spawn(|domain, jobs| {
            let mut guard = domain.lock();
            let ctx = JobContext::current("domainSetVcpus");
            jobs.begin_job(&mut guard, &ctx, JobKind::Modify)
        })
        .join()
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, JobError::QueueLimitExceeded { .. }), "{err}");
    let monitor = err.blockers().and_then(|b| b.monitor.clone()).unwrap();
    assert_eq!(monitor.api, "domainSetMemory");
    assert_eq!(monitor.kind, "modify");
    assert!(err.to_string().contains("max_queued"));

    let mut guard = h.domain.lock();
    assert_eq!(guard.job().queued(), 1);
    h.jobs.end_job(&mut guard);
    assert_eq!(guard.job().queued(), 0);
}

#[test]
fn test_destroy_ignores_queue_limit() {
    let h = setup(1, Duration::from_secs(10));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainSetMemory");
        h.jobs.begin_job(&mut guard, &ctx, JobKind::Modify).unwrap();
    }

    let destroyer = h.spawn(|domain, jobs| {
        let mut guard = domain.lock();
        let ctx = JobContext::current("domainDestroy");
        jobs.begin_job(&mut guard, &ctx, JobKind::Destroy)?;
        jobs.end_job(&mut guard);
        Ok::<_, JobError>(())
    });

    h.wait_for_queued(2);
    {
        let mut guard = h.domain.lock();
        h.jobs.end_job(&mut guard);
    }

    destroyer.join().unwrap().unwrap();
    assert_eq!(h.queued(), 0);
}

#[test]
fn test_lock_timeout_reports_holder() {
    let h = setup(0, Duration::from_millis(100));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainBlockJobAbort");
        h.jobs.begin_job(&mut guard, &ctx, JobKind::Modify).unwrap();
    }

    let err = h
        .spawn(|domain, jobs| {
            let mut guard = domain.lock();
            let ctx = JobContext::current("domainGetInfo");
            jobs.begin_job(&mut guard, &ctx, JobKind::Query)
        })
        .join()
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, JobError::LockTimeout { .. }), "{err}");
    assert!(err.is_retryable());
    let blockers = err.blockers().unwrap();
    assert_eq!(blockers.monitor.as_ref().unwrap().api, "domainBlockJobAbort");
    assert!(blockers.agent.is_none());
    assert!(err
        .to_string()
        .contains("held by monitor=domainBlockJobAbort"));
    assert_eq!(h.queued(), 1);
}

#[test]
fn test_timeout_while_masked_blames_async_owner() {
    let h = setup(0, Duration::from_millis(100));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainCoreDump");
        h.jobs
            .begin_async_job(&mut guard, &ctx, AsyncJobKind::Dump, JobOperation::Dump, 0)
            .unwrap();
    }

    let err = h
        .spawn(|domain, jobs| {
            let mut guard = domain.lock();
            let ctx = JobContext::current("domainSuspend");
            jobs.begin_job(&mut guard, &ctx, JobKind::Suspend)
        })
        .join()
        .unwrap()
        .unwrap_err();

    let monitor = err.blockers().and_then(|b| b.monitor.clone()).unwrap();
    assert_eq!(monitor.api, "domainCoreDump");
    assert_eq!(monitor.kind, "dump");
}

#[test]
fn test_nested_job_with_wrong_async_kind_is_refused() {
    let h = setup(0, Duration::from_secs(10));
    let mut guard = h.domain.lock();
    let ctx = JobContext::current("domainSave");
    h.jobs
        .begin_async_job(&mut guard, &ctx, AsyncJobKind::Save, JobOperation::Save, 0)
        .unwrap();

    let err = h
        .jobs
        .begin_nested_job(&mut guard, &ctx, AsyncJobKind::MigrationOut)
        .unwrap_err();

    assert!(matches!(
        err,
        JobError::ProtocolMismatch {
            requested: AsyncJobKind::MigrationOut,
            active: AsyncJobKind::Save
        }
    ));
    assert_eq!(guard.job().queued(), 1);
    assert_eq!(guard.job().active(), JobKind::None);
}

#[test]
fn test_nested_job_skips_mask() {
    let h = setup(0, Duration::from_secs(10));
    let mut guard = h.domain.lock();
    let ctx = JobContext::current("domainSave");
    h.jobs
        .begin_async_job(&mut guard, &ctx, AsyncJobKind::Save, JobOperation::Save, 0)
        .unwrap();
    h.jobs.set_async_job_mask(&mut guard, JobMask::EMPTY);

    h.jobs
        .begin_nested_job(&mut guard, &ctx, AsyncJobKind::Save)
        .unwrap();
    assert_eq!(guard.job().active(), JobKind::AsyncNested);
    assert_eq!(guard.job().queued(), 2);

    h.jobs.end_job(&mut guard);
    h.jobs.end_async_job(&mut guard);
    assert_eq!(guard.job().queued(), 0);
}

#[test]
fn test_nowait_reports_busy_without_error() {
    let h = setup(0, Duration::from_secs(10));
    let mut guard = h.domain.lock();
    let ctx = JobContext::current("domainGetInfo");

    assert!(h.jobs.begin_job_nowait(&mut guard, &ctx, JobKind::Query).unwrap());
    assert_eq!(guard.job().queued(), 1);

    let other = JobContext::current("domainGetState");
    assert!(!h.jobs.begin_job_nowait(&mut guard, &other, JobKind::Query).unwrap());
    assert_eq!(guard.job().queued(), 1);
    assert_eq!(guard.job().owner_api(), Some("domainGetInfo"));

    h.jobs.end_job(&mut guard);
    assert_eq!(guard.job().queued(), 0);
}

#[test]
fn test_nowait_at_queue_limit_reports_busy_without_error() {
    let h = setup(1, Duration::from_secs(10));
    let mut guard = h.domain.lock();
    let holder = JobContext::current("domainSetMemory");
    h.jobs.begin_job(&mut guard, &holder, JobKind::Modify).unwrap();

    let ctx = JobContext::current("domainGetInfo");
    let acquired = h.jobs.begin_job_nowait(&mut guard, &ctx, JobKind::Query).unwrap();

    assert!(!acquired);
    assert_eq!(guard.job().queued(), 1);
    assert_eq!(guard.job().owner_api(), Some("domainSetMemory"));
    h.jobs.end_job(&mut guard);
    assert_eq!(guard.job().queued(), 0);
}

#[test]
fn test_nowait_reports_masked_job_busy() {
    let h = setup(0, Duration::from_secs(10));
    let mut guard = h.domain.lock();
    let ctx = JobContext::current("domainSnapshotCreate");
    h.jobs
        .begin_async_job(
            &mut guard,
            &ctx,
            AsyncJobKind::Snapshot,
            JobOperation::Snapshot,
            0,
        )
        .unwrap();

    assert!(!h.jobs.begin_job_nowait(&mut guard, &ctx, JobKind::Modify).unwrap());
    assert_eq!(guard.job().queued(), 1);
    h.jobs.end_async_job(&mut guard);
}

#[test]
fn test_waiter_rechecks_mask_when_async_job_starts() {
    let h = setup(0, Duration::from_secs(10));
    let holder = JobContext::current("domainSave");
    {
        let mut guard = h.domain.lock();
        h.jobs.begin_job(&mut guard, &holder, JobKind::Modify).unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let waiter = h.spawn(move |domain, jobs| {
        let mut guard = domain.lock();
        let ctx = JobContext::current("domainSetMemory");
        let result = jobs.begin_job(&mut guard, &ctx, JobKind::Modify);
        let _ = tx.send(());
        if result.is_ok() {
            assert_eq!(guard.job().async_job(), AsyncJobKind::None);
            jobs.end_job(&mut guard);
        }
        result
    });

    h.wait_for_queued(2);
    {
        // Hand the primary channel back and start an async job before the
        // waiter can run again.
        let mut guard = h.domain.lock();
        h.jobs.end_job(&mut guard);
        h.jobs
            .begin_async_job(&mut guard, &holder, AsyncJobKind::Save, JobOperation::Save, 0)
            .unwrap();
    }

    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "modify must wait again once save has started"
    );

    {
        let mut guard = h.domain.lock();
        assert_eq!(guard.job().active(), JobKind::None);
        h.jobs.end_async_job(&mut guard);
    }

    waiter.join().unwrap().unwrap();
    assert_eq!(h.queued(), 0);
}

#[test]
fn test_widening_mask_admits_waiter() {
    let h = setup(0, Duration::from_secs(10));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainMigrateBegin3");
        h.jobs
            .begin_async_job(
                &mut guard,
                &ctx,
                AsyncJobKind::MigrationOut,
                JobOperation::MigrationOut,
                0,
            )
            .unwrap();
    }

    let waiter = h.spawn(|domain, jobs| {
        let mut guard = domain.lock();
        let ctx = JobContext::current("domainSuspend");
        jobs.begin_job(&mut guard, &ctx, JobKind::Suspend)?;
        jobs.end_job(&mut guard);
        Ok::<_, JobError>(())
    });

    h.wait_for_queued(2);
    {
        let mut guard = h.domain.lock();
        h.jobs
            .set_async_job_mask(&mut guard, JobMask::of(&[JobKind::Suspend, JobKind::Query]));
        assert!(guard.job().mask().contains(JobKind::Destroy));
    }

    waiter.join().unwrap().unwrap();

    let mut guard = h.domain.lock();
    assert_eq!(guard.job().queued(), 1);
    h.jobs.end_async_job(&mut guard);
    assert_eq!(guard.job().queued(), 0);
}

#[test]
fn test_agent_channel_is_independent() {
    let h = setup(0, Duration::from_secs(10));
    let mut guard = h.domain.lock();
    let ctx = JobContext::current("domainSetMemory");
    h.jobs.begin_job(&mut guard, &ctx, JobKind::Modify).unwrap();

    let agent_ctx = JobContext::current("domainFSFreeze");
    h.jobs
        .begin_agent_job(&mut guard, &agent_ctx, AgentJobKind::Modify)
        .unwrap();
    assert_eq!(guard.job().active(), JobKind::Modify);
    assert_eq!(guard.job().agent_active(), AgentJobKind::Modify);
    assert_eq!(guard.job().agent_owner_api(), Some("domainFSFreeze"));
    assert_eq!(guard.job().queued(), 2);

    h.jobs.end_agent_job(&mut guard);
    assert_eq!(guard.job().active(), JobKind::Modify);
    h.jobs.end_job(&mut guard);
    assert_eq!(guard.job().queued(), 0);
}

#[test]
fn test_combined_request_waits_for_both_channels() {
    let h = setup(0, Duration::from_secs(10));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainGuestAgentCommand");
        h.jobs
            .begin_agent_job(&mut guard, &ctx, AgentJobKind::Query)
            .unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let waiter = h.spawn(move |domain, jobs| {
        let mut guard = domain.lock();
        let ctx = JobContext::current("domainSetTime");
        jobs.begin_job_with_agent(&mut guard, &ctx, JobKind::Modify, AgentJobKind::Modify)?;
        let _ = tx.send(());
        assert_eq!(guard.job().active(), JobKind::Modify);
        assert_eq!(guard.job().agent_active(), AgentJobKind::Modify);
        jobs.end_job_with_agent(&mut guard);
        assert_eq!(guard.job().agent_active(), AgentJobKind::None);
        Ok::<_, JobError>(())
    });

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    {
        let guard = h.domain.lock();
        assert_eq!(guard.job().active(), JobKind::None, "primary must not be held while waiting");
    }
    {
        let mut guard = h.domain.lock();
        h.jobs.end_agent_job(&mut guard);
    }

    waiter.join().unwrap().unwrap();
    assert_eq!(h.queued(), 0);
}

#[test]
fn test_release_wakes_every_waiter() {
    let h = setup(0, Duration::from_secs(10));
    {
        let mut guard = h.domain.lock();
        let ctx = JobContext::current("domainSetMemory");
        h.jobs.begin_job(&mut guard, &ctx, JobKind::Modify).unwrap();
    }

    let waiters: Vec<_> = (0..5)
        .map(|i| {
            h.spawn(move |domain, jobs| {
                let mut guard = domain.lock();
                let ctx = JobContext::current(format!("domainGetStats{i}"));
                jobs.begin_job(&mut guard, &ctx, JobKind::Query)?;
                jobs.end_job(&mut guard);
                Ok::<_, JobError>(())
            })
        })
        .collect();

    h.wait_for_queued(6);
    {
        let mut guard = h.domain.lock();
        h.jobs.end_job(&mut guard);
    }

    for waiter in waiters {
        waiter.join().unwrap().unwrap();
    }
    assert_eq!(h.queued(), 0);
}

type Step = fn(&JobController, &mut DomainGuard<'_>, &JobContext);

/// Runs `begin`/`end` pairs from several threads and counts how often two
/// holders were inside at once.
fn count_overlaps(h: &Harness, begin: Step, end: Step) -> usize {
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            h.spawn(move |domain, jobs| {
                let ctx = JobContext::current(format!("worker{i}"));
                for _ in 0..25 {
                    let mut guard = domain.lock();
                    begin(jobs, &mut guard, &ctx);
                    guard.unlocked(|| {
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(200));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                    end(jobs, &mut guard, &ctx);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    overlaps.load(Ordering::SeqCst)
}

#[test]
fn test_primary_channel_is_mutually_exclusive() {
    let h = setup(0, Duration::from_secs(30));

    let overlaps = count_overlaps(
        &h,
        |jobs, guard, ctx| jobs.begin_job(guard, ctx, JobKind::Modify).unwrap(),
        |jobs, guard, _ctx| jobs.end_job(guard),
    );

    assert_eq!(overlaps, 0);
    assert_eq!(h.queued(), 0);
    assert_eq!(h.domain.lock().job().active(), JobKind::None);
}

#[test]
fn test_agent_channel_is_mutually_exclusive() {
    let h = setup(0, Duration::from_secs(30));

    let overlaps = count_overlaps(
        &h,
        |jobs, guard, ctx| jobs.begin_agent_job(guard, ctx, AgentJobKind::Modify).unwrap(),
        |jobs, guard, _ctx| jobs.end_agent_job(guard),
    );

    assert_eq!(overlaps, 0);
    assert_eq!(h.queued(), 0);
    assert_eq!(h.domain.lock().job().agent_active(), AgentJobKind::None);
}

#[test]
fn test_async_channel_is_mutually_exclusive() {
    let h = setup(0, Duration::from_secs(30));

    let overlaps = count_overlaps(
        &h,
        |jobs, guard, ctx| {
            jobs.begin_async_job(guard, ctx, AsyncJobKind::Dump, JobOperation::Dump, 0)
                .unwrap();
        },
        |jobs, guard, _ctx| jobs.end_async_job(guard),
    );

    assert_eq!(overlaps, 0);
    assert_eq!(h.queued(), 0);
    assert_eq!(h.domain.lock().job().async_job(), AsyncJobKind::None);
}
