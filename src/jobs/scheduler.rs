//! Deferred one-shot task scheduler.
//!
//! The scheduling endpoint pushes `ScheduledTask`s into an in-memory queue; a
//! single consumer loop wakes on every tick, drains the tasks whose `fire_at`
//! has passed according to the injected [`Clock`], and issues one
//! `GET target_url` per task through the relay. Best-effort: no retry, no
//! persistence, fired tasks are dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;
use uuid::Uuid;

use crate::clock::Clock;
use crate::middleware::metrics::GatewayMetrics;
use crate::proxy::{RelayClient, RelayRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Fired,
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub target_url: Url,
    pub fire_at: DateTime<Utc>,
    pub state: TaskState,
}

/// Returned to the caller that scheduled a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskHandle {
    pub id: Uuid,
    pub fire_at: DateTime<Utc>,
}

pub struct Scheduler {
    queue: Mutex<Vec<ScheduledTask>>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub fn schedule(&self, target_url: Url, fire_at: DateTime<Utc>) -> TaskHandle {
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            target_url,
            fire_at,
            state: TaskState::Pending,
        };
        let handle = TaskHandle {
            id: task.id,
            fire_at,
        };
        self.lock().push(task);
        handle
    }

    /// Remove and return every task due at the clock's current time, marked
    /// `Fired`. The lock is held only for the drain.
    pub fn tick(&self) -> Vec<ScheduledTask> {
        self.due_at(self.clock.now())
    }

    pub fn due_at(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let mut queue = self.lock();
        let (due, pending): (Vec<_>, Vec<_>) =
            queue.drain(..).partition(|task| task.fire_at <= now);
        *queue = pending;
        drop(queue);

        due.into_iter()
            .map(|mut task| {
                task.state = TaskState::Fired;
                task
            })
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ScheduledTask>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Spawn the consumer loop. Call this once at startup.
pub fn spawn(
    scheduler: Arc<Scheduler>,
    relay: RelayClient,
    metrics: Arc<GatewayMetrics>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            for task in scheduler.tick() {
                // Each fire runs on its own task so a slow upstream never
                // delays the next tick.
                tokio::spawn(fire(task, relay.clone(), metrics.clone()));
            }
        }
    })
}

/// Issue the task's single GET. Failures are logged and dropped.
pub async fn fire(task: ScheduledTask, relay: RelayClient, metrics: Arc<GatewayMetrics>) {
    tracing::info!(task_id = %task.id, host = task.target_url.host_str().unwrap_or(""), "firing scheduled task");
    match relay.relay(RelayRequest::get(task.target_url)).await {
        Ok(resp) => {
            metrics.record_task("fired");
            tracing::info!(task_id = %task.id, status = resp.status.as_u16(), "scheduled task fired");
        }
        Err(e) => {
            metrics.record_task("failed");
            tracing::warn!(task_id = %task.id, "scheduled task failed: {}", e);
        }
    }
}
