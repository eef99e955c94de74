use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::error::SchedulerError;

/// Work bound to a trigger
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Run one execution; `fired_at` is in the scheduler's reference zone
    async fn run(&self, fired_at: DateTime<Tz>);
}

/// Result of a single trigger firing
#[derive(Debug)]
pub enum FireOutcome {
    /// The job was spawned on its own task
    Started(JoinHandle<()>),
    /// The previous firing of the same job is still running
    Skipped,
}

impl FireOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

struct JobSlot {
    name: String,
    trigger: String,
    job: Arc<dyn ScheduledJob>,
    running: AtomicBool,
}

/// Clears the running flag when the execution ends, including by panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl JobSlot {
    fn fire(self: &Arc<Self>, fired_at: DateTime<Tz>) -> FireOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(job = %self.name, "Previous run still in progress, skipping trigger");
            return FireOutcome::Skipped;
        }

        let slot = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = RunningGuard(&slot.running);
            slot.job.run(fired_at).await;
        });
        FireOutcome::Started(handle)
    }
}

/// Named recurring triggers, each bound to one job
///
/// Firings of different jobs run independently on their own tasks. A job
/// never overlaps with itself: a firing that arrives while the previous one
/// is still running is skipped.
pub struct Scheduler {
    timezone: Tz,
    jobs: BTreeMap<String, Arc<JobSlot>>,
    engine: Option<JobScheduler>,
}

impl Scheduler {
    /// Create a scheduler whose triggers fire in `timezone`
    pub fn new(timezone: Tz) -> Self {
        Self { timezone, jobs: BTreeMap::new(), engine: None }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Bind `job` to a six-field cron expression under `name`
    ///
    /// The expression is validated here so that a bad trigger fails startup
    /// before anything is scheduled.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        trigger: impl Into<String>,
        job: Arc<dyn ScheduledJob>,
    ) -> Result<(), SchedulerError> {
        let name = name.into();
        let trigger = trigger.into();

        if self.jobs.contains_key(&name) {
            return Err(SchedulerError::DuplicateJob(name));
        }

        Job::new_async_tz(trigger.as_str(), self.timezone, |_id, _lock| Box::pin(async {}))
            .map_err(|e| invalid_trigger(&name, &trigger, e))?;

        info!(job = %name, trigger = %trigger, timezone = %self.timezone.name(), "Registered job");
        let slot = JobSlot { name: name.clone(), trigger, job, running: AtomicBool::new(false) };
        self.jobs.insert(name, Arc::new(slot));
        Ok(())
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Whether a firing of `name` is currently executing
    pub fn is_running(&self, name: &str) -> bool {
        self.jobs.get(name).is_some_and(|slot| slot.running.load(Ordering::SeqCst))
    }

    /// Fire `name` now, as if its trigger had elapsed
    pub fn fire(&self, name: &str) -> Result<FireOutcome, SchedulerError> {
        self.fire_at(name, Utc::now().with_timezone(&self.timezone))
    }

    /// Fire `name` with an explicit fire time
    pub fn fire_at(&self, name: &str, fired_at: DateTime<Tz>) -> Result<FireOutcome, SchedulerError> {
        let slot = self.jobs.get(name).ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        Ok(slot.fire(fired_at))
    }

    /// Arm every registered trigger
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.engine.is_some() {
            return Err(SchedulerError::Engine("scheduler already started".to_string()));
        }

        let mut cron_jobs = Vec::with_capacity(self.jobs.len());
        for slot in self.jobs.values() {
            let tz = self.timezone;
            let callback_slot = Arc::clone(slot);
            let cron_job = Job::new_async_tz(slot.trigger.as_str(), tz, move |_id, _lock| {
                let slot = Arc::clone(&callback_slot);
                Box::pin(async move {
                    slot.fire(Utc::now().with_timezone(&tz));
                })
            })
            .map_err(|e| invalid_trigger(&slot.name, &slot.trigger, e))?;
            cron_jobs.push(cron_job);
        }

        let engine = JobScheduler::new().await.map_err(engine_error)?;
        for cron_job in cron_jobs {
            engine.add(cron_job).await.map_err(engine_error)?;
        }
        engine.start().await.map_err(engine_error)?;

        info!(jobs = self.jobs.len(), timezone = %self.timezone.name(), "Scheduler started");
        self.engine = Some(engine);
        Ok(())
    }

    /// Stop arming triggers; executions already in flight finish on their own
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown().await.map_err(engine_error)?;
            info!("Scheduler stopped");
        }
        Ok(())
    }
}

fn invalid_trigger(job: &str, expression: &str, e: impl std::fmt::Debug) -> SchedulerError {
    SchedulerError::InvalidTrigger {
        job: job.to_string(),
        expression: expression.to_string(),
        reason: format!("{e:?}"),
    }
}

fn engine_error(e: impl std::fmt::Debug) -> SchedulerError {
    SchedulerError::Engine(format!("{e:?}"))
}
