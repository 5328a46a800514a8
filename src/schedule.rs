use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::jobs::{Job, JobQueue};
use crate::models::{Frequency, ScheduleDefinition, WorkItem, WorkStatus};
use crate::store::StoreHandle;

/// Spacing between runs. `Once` has none.
///
/// Monthly is a fixed 30 days, not calendar months.
pub fn interval(frequency: Frequency) -> Option<Duration> {
    match frequency {
        Frequency::Once => None,
        Frequency::Daily => Some(Duration::days(1)),
        Frequency::Weekly => Some(Duration::days(7)),
        Frequency::Monthly => Some(Duration::days(30)),
    }
}

/// The run after `from`, or `None` when the chain ends (a one-off schedule,
/// or the next run would fall past `end`).
pub fn next_run(
    frequency: Frequency,
    from: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let next = from + interval(frequency)?;
    match end {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NotFound,
    Inactive,
    PastEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A work item was created; `next_run` is when the schedule runs again.
    Created {
        work_item_id: i64,
        next_run: Option<DateTime<Utc>>,
    },
    /// Invoked before the start bound; re-queued for `until`.
    Deferred { until: DateTime<Utc> },
    /// The chain ends here; nothing was created or queued.
    Terminated(StopReason),
}

/// Turns schedule definitions into work items, one per invocation.
///
/// Each invocation re-reads the schedule and queues at most one follow-up
/// run; the queue owns all timing.
pub struct RecurringNotifier {
    store: StoreHandle,
    queue: Arc<dyn JobQueue>,
}

impl RecurringNotifier {
    pub fn new(store: StoreHandle, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Queue the first run of a schedule at its start bound.
    pub async fn start(&self, schedule: &ScheduleDefinition) -> Result<()> {
        self.queue
            .schedule(
                Job::RunSchedule {
                    schedule_id: schedule.id,
                },
                schedule.starts_at,
            )
            .await
    }

    pub async fn run(&self, schedule_id: i64, now: DateTime<Utc>) -> Result<RunOutcome> {
        let Some(schedule) = self.store.load_schedule(schedule_id).await? else {
            log::info!("Schedule {schedule_id} no longer exists");
            return Ok(RunOutcome::Terminated(StopReason::NotFound));
        };
        if !schedule.is_active {
            log::info!("Schedule {schedule_id} is inactive, stopping");
            return Ok(RunOutcome::Terminated(StopReason::Inactive));
        }
        if schedule.ends_at.is_some_and(|end| now > end) {
            log::info!("Schedule {schedule_id} is past its end bound, stopping");
            return Ok(RunOutcome::Terminated(StopReason::PastEnd));
        }
        if now < schedule.starts_at {
            let until = schedule.starts_at;
            self.queue.schedule(Job::RunSchedule { schedule_id }, until).await?;
            return Ok(RunOutcome::Deferred { until });
        }

        let item = work_item_from(&schedule, now);
        let work_item_id = self.store.insert_work_item(item).await?;

        if let Err(e) = self.queue.dispatch(Job::SendAssignment { work_item_id }).await {
            log::warn!("Could not queue assignment notice for work item {work_item_id}: {e}");
        }

        let next = next_run(schedule.frequency, now, schedule.ends_at);
        match next {
            Some(at) => {
                self.queue.schedule(Job::RunSchedule { schedule_id }, at).await?;
                log::debug!("Schedule {schedule_id} next runs at {at}");
            }
            None => log::info!("Schedule {schedule_id} has no further runs"),
        }

        Ok(RunOutcome::Created {
            work_item_id,
            next_run: next,
        })
    }
}

/// One day for one-off schedules, otherwise one interval.
fn work_item_from(schedule: &ScheduleDefinition, now: DateTime<Utc>) -> WorkItem {
    let due_in = interval(schedule.frequency).unwrap_or_else(|| Duration::days(1));
    WorkItem {
        id: 0,
        tenant_id: schedule.tenant_id.clone(),
        schedule_id: Some(schedule.id),
        title: schedule.title.clone(),
        description: schedule.description.clone(),
        assignee_name: schedule.assignee_name.clone(),
        assignee_email: schedule.assignee_email.clone(),
        assigned_by: schedule.assigned_by.clone(),
        category: schedule.category.clone(),
        priority: schedule.priority,
        status: WorkStatus::Pending,
        due_at: now + due_in,
        created_at: now,
    }
}
