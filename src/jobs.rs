use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::schedule::RecurringNotifier;
use crate::store::StoreHandle;

/// A durable unit of deferred work. Jobs carry identifiers only; the
/// referenced rows are re-read when the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    RunSchedule { schedule_id: i64 },
    SendAssignment { work_item_id: i64 },
    SendReminder { work_item_id: i64 },
}

impl Job {
    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Store(format!("encode job: {e}")))
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::Store(format!("decode job: {e}")))
    }
}

/// External scheduler contract: delayed execution and immediate dispatch.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn schedule(&self, job: Job, execute_at: DateTime<Utc>) -> Result<()>;

    /// Run as soon as possible, decoupled from the caller.
    async fn dispatch(&self, job: Job) -> Result<()>;
}

/// Queue persisted in the store's `jobs` table.
#[derive(Debug, Clone)]
pub struct StoreJobQueue {
    store: StoreHandle,
}

impl StoreJobQueue {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobQueue for StoreJobQueue {
    async fn schedule(&self, job: Job, execute_at: DateTime<Utc>) -> Result<()> {
        let payload = job.to_payload()?;
        let id = self.store.enqueue_job(payload, execute_at).await?;
        log::debug!("Queued job {id} {job:?} for {execute_at}");
        Ok(())
    }

    async fn dispatch(&self, job: Job) -> Result<()> {
        self.schedule(job, Utc::now()).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub failed: usize,
}

/// Claims due jobs from the store and executes them.
pub struct JobRunner {
    store: StoreHandle,
    schedules: Arc<RecurringNotifier>,
    notifier: Arc<Notifier>,
}

impl JobRunner {
    pub fn new(
        store: StoreHandle,
        schedules: Arc<RecurringNotifier>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            store,
            schedules,
            notifier,
        }
    }

    /// Execute every job due at `now`. A failing job is logged and counted;
    /// it does not stop the others and is not retried.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for queued in self.store.take_due_jobs(now).await? {
            let result = match Job::from_payload(&queued.payload) {
                Ok(job) => self.execute(job, now).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => summary.executed += 1,
                Err(e) => {
                    log::warn!("Job {} failed: {e}", queued.id);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn execute(&self, job: Job, now: DateTime<Utc>) -> Result<()> {
        match job {
            Job::RunSchedule { schedule_id } => {
                let outcome = self.schedules.run(schedule_id, now).await?;
                log::debug!("Schedule {schedule_id}: {outcome:?}");
            }
            Job::SendAssignment { work_item_id } => {
                self.notifier.send_assignment(work_item_id).await?;
            }
            Job::SendReminder { work_item_id } => {
                self.notifier.send_reminder(work_item_id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::Frequency;
    use crate::testing::{schedule_for, RecordingSender};

    #[test]
    fn payload_is_tagged_json() {
        let job = Job::RunSchedule { schedule_id: 7 };
        let payload = job.to_payload().unwrap();
        assert_eq!(payload, r#"{"kind":"run_schedule","schedule_id":7}"#);
        assert_eq!(Job::from_payload(&payload).unwrap(), job);
        assert!(Job::from_payload(r#"{"kind":"unknown"}"#).is_err());
    }

    #[tokio::test]
    async fn runner_drives_schedule_and_notification() {
        let store = StoreHandle::open_in_memory().unwrap();
        let queue = Arc::new(StoreJobQueue::new(store.clone()));
        let sender = Arc::new(RecordingSender::default());
        let notifier = Arc::new(Notifier::new(store.clone(), sender.clone()));
        let schedules = Arc::new(RecurringNotifier::new(store.clone(), queue.clone()));
        let runner = JobRunner::new(store.clone(), schedules, notifier);

        // Dispatch stamps jobs with the wall clock, so drive the runner from it.
        let now = Utc::now();
        let id = store
            .save_schedule(schedule_for(Frequency::Daily, now, None))
            .await
            .unwrap();
        queue
            .schedule(Job::RunSchedule { schedule_id: id }, now)
            .await
            .unwrap();

        // The schedule run queues the assignment and tomorrow's run.
        let first = runner.run_due(now).await.unwrap();
        assert_eq!(first, RunSummary { executed: 1, failed: 0 });
        assert!(sender.sent().is_empty());

        let second = runner.run_due(now + Duration::minutes(1)).await.unwrap();
        assert_eq!(second, RunSummary { executed: 1, failed: 0 });
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "bob@acme.test");

        let tomorrow = runner.run_due(now + Duration::days(1)).await.unwrap();
        assert_eq!(tomorrow.executed, 1);
    }

    #[tokio::test]
    async fn bad_payload_counts_as_failure() {
        let store = StoreHandle::open_in_memory().unwrap();
        let queue = Arc::new(StoreJobQueue::new(store.clone()));
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            Arc::new(RecordingSender::default()),
        ));
        let schedules = Arc::new(RecurringNotifier::new(store.clone(), queue));
        let runner = JobRunner::new(store.clone(), schedules, notifier);

        let now = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
        store.enqueue_job("not json".into(), now).await.unwrap();
        store
            .enqueue_job(Job::SendAssignment { work_item_id: 404 }.to_payload().unwrap(), now)
            .await
            .unwrap();
        store
            .enqueue_job(Job::RunSchedule { schedule_id: 404 }.to_payload().unwrap(), now)
            .await
            .unwrap();

        let summary = runner.run_due(now).await.unwrap();
        // Missing schedule terminates cleanly; missing work item and the
        // garbage payload fail.
        assert_eq!(summary, RunSummary { executed: 1, failed: 2 });
        assert!(store.take_due_jobs(now).await.unwrap().is_empty());
    }
}
