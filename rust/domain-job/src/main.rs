//! `domain-jobctl`: inspect and exercise domain job state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use domain_job::recovery::recover_domain;
use domain_job::status::parse_status;
use domain_job::{
    AsyncJobKind, Domain, InMemoryStatusStore, JobContext, JobController, JobKind, JobMask,
    JobOperation, JobRecord, JobsConfig, NoPayload, QueueLimiter, StatusDirStore, StatusStore,
};

#[derive(Parser, Debug)]
#[command(name = "domain-jobctl")]
#[command(about = "Inspect and exercise per-domain job state")]
#[command(version)]
struct Args {
    /// Config file path.
    #[arg(short, long, env = "DOMAIN_JOBS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the job recorded in a status document.
    Inspect {
        /// Status document to read.
        file: PathBuf,
    },

    /// Recover domains from a status directory and print what each needs.
    Recover {
        /// Directory holding `<name>.xml` status documents.
        #[arg(long, env = "DOMAIN_JOBS__STATUS_DIR")]
        status_dir: Option<PathBuf>,

        /// Domains to recover.
        #[arg(required = true)]
        domains: Vec<String>,
    },

    /// Print the effective configuration.
    Config,

    /// Run an async job with a queued modify job behind it.
    Demo {
        /// How long the async job runs, in milliseconds.
        #[arg(long, default_value = "500")]
        hold_ms: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    domain_job::logging::init()?;

    let config = JobsConfig::load_from(args.config.as_deref()).context("loading configuration")?;

    match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::Recover {
            status_dir,
            domains,
        } => recover(&config, status_dir, &domains),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Demo { hold_ms } => demo(&config, Duration::from_millis(hold_ms)),
    }
}

fn inspect(file: &Path) -> anyhow::Result<()> {
    let document = std::fs::read_to_string(file)
        .with_context(|| format!("reading status document {}", file.display()))?;

    let mut record = JobRecord::new(NoPayload::ops());
    let name = parse_status(&document, &mut record)?;

    let summary = serde_json::json!({
        "domain": name,
        "job": record.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn recover(
    config: &JobsConfig,
    status_dir: Option<PathBuf>,
    domains: &[String],
) -> anyhow::Result<()> {
    let dir = status_dir
        .or_else(|| config.status_dir.clone())
        .context("no status directory: pass --status-dir or set DOMAIN_JOBS__STATUS_DIR")?;
    let store = StatusDirStore::new(dir);

    for name in domains {
        let domain = Domain::new(name.as_str(), NoPayload::ops());
        let mut guard = domain.lock();
        let recovered = recover_domain(&mut guard, &store)
            .with_context(|| format!("recovering domain {name}"))?;
        let line = serde_json::json!({
            "domain": name,
            "job": recovered.restored.active.as_str(),
            "async": recovered.restored.async_job.as_str(),
            "phase": recovered.restored.async_job.phase_name(recovered.restored.phase),
            "action": format!("{:?}", recovered.action),
        });
        println!("{line}");
    }
    Ok(())
}

fn demo(config: &JobsConfig, hold: Duration) -> anyhow::Result<()> {
    let store: Arc<dyn StatusStore> = match &config.status_dir {
        Some(dir) => Arc::new(StatusDirStore::new(dir)),
        None => Arc::new(InMemoryStatusStore::new()),
    };
    let jobs = Arc::new(JobController::with_limits(
        store,
        QueueLimiter::new(config.max_queued_jobs),
        config.wait_budget().max(hold * 2),
    ));
    let domain = Arc::new(Domain::new("demo", NoPayload::ops()));

    {
        let mut guard = domain.lock();
        let ctx = JobContext::current("demoSave");
        jobs.begin_async_job(&mut guard, &ctx, AsyncJobKind::Save, JobOperation::Save, 0)?;
        jobs.set_async_job_mask(&mut guard, JobMask::DEFAULT);
        info!(job = ?guard.job().summary(), "Async job started");
    }

    let modify = {
        let domain = Arc::clone(&domain);
        let jobs = Arc::clone(&jobs);
        thread::spawn(move || -> anyhow::Result<Duration> {
            let ctx = JobContext::current("demoSetMemory");
            let start = Instant::now();
            let mut guard = domain.lock();
            jobs.begin_job(&mut guard, &ctx, JobKind::Modify)?;
            let waited = start.elapsed();
            info!(waited_ms = millis(waited), "Modify job admitted");
            jobs.end_job(&mut guard);
            Ok(waited)
        })
    };

    {
        let mut guard = domain.lock();
        let ctx = JobContext::current("demoQuery");
        jobs.begin_job(&mut guard, &ctx, JobKind::Query)?;
        info!("Query job runs alongside the async job");
        jobs.end_job(&mut guard);
    }

    thread::sleep(hold);
    {
        let mut guard = domain.lock();
        jobs.end_async_job(&mut guard);
        info!("Async job finished");
    }

    let waited = modify
        .join()
        .map_err(|panic| anyhow::anyhow!("modify thread panicked: {panic:?}"))??;
    let guard = domain.lock();
    println!(
        "{}",
        serde_json::json!({
            "modify_waited_ms": millis(waited),
            "queued": guard.job().queued(),
        })
    );
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
