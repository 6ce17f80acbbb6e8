//! Periodic report trigger.
//!
//! Sleeps until the next cron fire time, enqueues a `generate_report` job,
//! then sleeps out the remainder of the slot so one slot never fires twice.
//! An enqueue failure is logged and the loop carries on to the next slot.

use std::ops::Sub;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use clusterwatch::job::JobKind;
use clusterwatch::queue::JobQueue;
use clusterwatch::store::JobStore;

pub struct ScheduleRunner<S> {
    queue: Arc<JobQueue<S>>,
    schedule: Schedule,
}

impl<S> ScheduleRunner<S>
where
    S: JobStore + 'static,
{
    pub fn new(queue: Arc<JobQueue<S>>, schedule: Schedule) -> Self {
        Self { queue, schedule }
    }

    pub fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancellation_token))
    }

    async fn run(self, cancellation_token: CancellationToken) {
        info!(schedule = %self.schedule, "report scheduler started");

        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                error!("schedule has no upcoming fire time, scheduler stopping");
                break;
            };
            // Wake slightly early so the fire lands on the slot, not after.
            let delay = next
                .sub(Utc::now())
                .sub(TimeDelta::milliseconds(10))
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    if let Err(err) = self.queue.enqueue(JobKind::GenerateReport, None).await {
                        error!(error = %err, "failed to enqueue scheduled report");
                    }
                    let remainder = next - Utc::now();
                    if let Ok(remainder) = remainder.to_std() {
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = tokio::time::sleep(remainder) => {}
                        }
                    }
                }
            }
        }

        info!("report scheduler shutting down");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clusterwatch::store::memory::InMemoryStore;
    use std::str::FromStr;

    #[tokio::test]
    async fn fires_and_enqueues_on_schedule() {
        let store = InMemoryStore::new();
        let queue = Arc::new(JobQueue::new(store.clone()));
        let every_second = Schedule::from_str("* * * * * *").unwrap();

        let token = CancellationToken::new();
        let handle = ScheduleRunner::new(queue, every_second).spawn(token.clone());

        tokio::time::timeout(Duration::from_secs(3), async {
            while store.all_jobs().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("scheduler should enqueue within the slot");

        token.cancel();
        handle.await.unwrap();

        let jobs = store.all_jobs();
        assert!(jobs.iter().all(|job| job.kind == "generate_report"));
    }

    #[tokio::test]
    async fn cancellation_stops_a_waiting_scheduler() {
        let store = InMemoryStore::new();
        let queue = Arc::new(JobQueue::new(store));
        // Far enough out that the runner is asleep when cancelled.
        let yearly = Schedule::from_str("0 0 0 1 1 *").unwrap();

        let token = CancellationToken::new();
        let handle = ScheduleRunner::new(queue, yearly).spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should stop promptly on cancellation")
            .unwrap();
    }
}
