//! Delayed job queue on Redis.
//!
//! Layout per queue:
//! - `netbill:{queue}:scheduled` sorted set of task ids scored by `process_at` millis
//! - `netbill:{queue}:inflight` sorted set of claimed task ids scored by lease deadline millis
//! - `netbill:{queue}:tasks` hash of task id to envelope JSON
//! - `netbill:{queue}:dead` list of envelopes that exhausted their retries
//!
//! A claimed task stays leased until it is completed, dead-lettered or
//! rescheduled. Leases that run out are put back on the schedule by the
//! next `claim_due`, so a consumer that dies mid-task loses nothing.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use netbill_shared::jobs::TaskEnvelope;
use tracing::{debug, warn};

use super::redis_service::RedisService;

const DEAD_LETTER_CAP: isize = 1000;

/// How long a claimed task may stay unsettled before it is redelivered.
/// Longer than any send timeout plus its bookkeeping.
pub const CLAIM_LEASE: Duration = Duration::from_secs(120);

/// Moves ARGV[1] from KEYS[1] to KEYS[2] with score ARGV[2], only if it was in KEYS[1].
const MOVE_MEMBER: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
    return 1
end
return 0
"#;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedules (or reschedules) a task at its `process_at`.
    async fn enqueue(&self, task: &TaskEnvelope) -> Result<()>;

    /// Claims up to `limit` due tasks under a `CLAIM_LEASE` lease. A task is
    /// handed to one caller at a time; expired leases are redelivered first.
    async fn claim_due(&self, queue: &str, now_ms: i64, limit: usize) -> Result<Vec<TaskEnvelope>>;

    /// Drops the payload and lease of a finished task.
    async fn complete(&self, task: &TaskEnvelope) -> Result<()>;

    async fn dead_letter(&self, task: &TaskEnvelope) -> Result<()>;
}

pub fn process_at_after(delay: Duration) -> i64 {
    Utc::now().timestamp_millis() + delay.as_millis() as i64
}

fn scheduled_key(queue: &str) -> String {
    format!("netbill:{}:scheduled", queue)
}

fn tasks_key(queue: &str) -> String {
    format!("netbill:{}:tasks", queue)
}

fn dead_key(queue: &str) -> String {
    format!("netbill:{}:dead", queue)
}

fn inflight_key(queue: &str) -> String {
    format!("netbill:{}:inflight", queue)
}

fn lease_deadline(now_ms: i64) -> i64 {
    now_ms + CLAIM_LEASE.as_millis() as i64
}

#[derive(Clone)]
pub struct RedisTaskQueue {
    redis: RedisService,
}

impl RedisTaskQueue {
    pub fn new(redis: RedisService) -> Self {
        Self { redis }
    }

    async fn move_member(&self, from: &str, to: &str, id: &str, score: i64) -> Result<bool> {
        let mut conn = self.redis.connection();
        let moved: i64 = redis::cmd("EVAL")
            .arg(MOVE_MEMBER)
            .arg(2)
            .arg(from)
            .arg(to)
            .arg(id)
            .arg(score)
            .query_async(&mut conn)
            .await
            .context("Failed to move task between sets")?;
        Ok(moved == 1)
    }

    /// Puts tasks whose lease ran out back on the schedule, due immediately.
    async fn requeue_expired(&self, queue: &str, now_ms: i64) -> Result<()> {
        let mut conn = self.redis.connection();
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(inflight_key(queue))
            .arg("-inf")
            .arg(now_ms)
            .query_async(&mut conn)
            .await
            .context("Failed to scan expired leases")?;
        for id in expired {
            if self.move_member(&inflight_key(queue), &scheduled_key(queue), &id, now_ms).await? {
                warn!("Lease on task {} ({}) expired; redelivering", id, queue);
            }
        }
        Ok(())
    }

    /// Drops a task's payload and lease.
    async fn release(&self, queue: &str, id: &str) -> Result<()> {
        let mut conn = self.redis.connection();
        let _: () = redis::pipe()
            .atomic()
            .cmd("HDEL")
            .arg(tasks_key(queue))
            .arg(id)
            .ignore()
            .cmd("ZREM")
            .arg(inflight_key(queue))
            .arg(id)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("Failed to drop finished task")?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: &TaskEnvelope) -> Result<()> {
        let json = serde_json::to_string(task).context("Failed to encode task")?;
        let id = task.id.to_string();
        let mut conn = self.redis.connection();
        let _: () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(tasks_key(&task.queue))
            .arg(&id)
            .arg(json)
            .ignore()
            .cmd("ZADD")
            .arg(scheduled_key(&task.queue))
            .arg(task.process_at)
            .arg(&id)
            .ignore()
            .cmd("ZREM")
            .arg(inflight_key(&task.queue))
            .arg(&id)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("Failed to enqueue task")?;
        Ok(())
    }

    async fn claim_due(&self, queue: &str, now_ms: i64, limit: usize) -> Result<Vec<TaskEnvelope>> {
        self.requeue_expired(queue, now_ms).await?;

        let mut conn = self.redis.connection();
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(scheduled_key(queue))
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .context("Failed to scan scheduled tasks")?;

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let leased = self
                .move_member(&scheduled_key(queue), &inflight_key(queue), &id, lease_deadline(now_ms))
                .await?;
            if !leased {
                // Another worker won the race.
                continue;
            }

            let raw: Option<String> = redis::cmd("HGET")
                .arg(tasks_key(queue))
                .arg(&id)
                .query_async(&mut conn)
                .await
                .context("Failed to load task payload")?;
            match raw.map(|r| serde_json::from_str::<TaskEnvelope>(&r)) {
                Some(Ok(task)) => claimed.push(task),
                Some(Err(e)) => {
                    warn!("Discarding undecodable task {} on {}: {}", id, queue, e);
                    self.release(queue, &id).await?;
                }
                None => {
                    debug!("Task {} on {} has no payload; skipped", id, queue);
                    self.release(queue, &id).await?;
                }
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, task: &TaskEnvelope) -> Result<()> {
        self.release(&task.queue, &task.id.to_string()).await
    }

    async fn dead_letter(&self, task: &TaskEnvelope) -> Result<()> {
        let json = serde_json::to_string(task).context("Failed to encode task")?;
        let mut conn = self.redis.connection();
        let _: () = redis::pipe()
            .atomic()
            .cmd("HDEL")
            .arg(tasks_key(&task.queue))
            .arg(task.id.to_string())
            .ignore()
            .cmd("ZREM")
            .arg(inflight_key(&task.queue))
            .arg(task.id.to_string())
            .ignore()
            .cmd("LPUSH")
            .arg(dead_key(&task.queue))
            .arg(json)
            .ignore()
            .cmd("LTRIM")
            .arg(dead_key(&task.queue))
            .arg(0)
            .arg(DEAD_LETTER_CAP - 1)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("Failed to dead-letter task")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-process queue with the same claim and lease semantics as the Redis one.
    #[derive(Default)]
    pub struct MemoryTaskQueue {
        pub scheduled: Mutex<HashMap<String, Vec<TaskEnvelope>>>,
        /// Claimed tasks with their lease deadline.
        pub inflight: Mutex<HashMap<String, Vec<(i64, TaskEnvelope)>>>,
        pub dead: Mutex<Vec<TaskEnvelope>>,
        pub completed: Mutex<Vec<TaskEnvelope>>,
    }

    impl MemoryTaskQueue {
        pub fn pending(&self, queue: &str) -> Vec<TaskEnvelope> {
            self.scheduled.lock().unwrap().get(queue).cloned().unwrap_or_default()
        }

        pub fn leased(&self, queue: &str) -> usize {
            self.inflight.lock().unwrap().get(queue).map_or(0, Vec::len)
        }

        fn release(&self, task: &TaskEnvelope) {
            if let Some(leases) = self.inflight.lock().unwrap().get_mut(&task.queue) {
                leases.retain(|(_, t)| t.id != task.id);
            }
        }
    }

    #[async_trait]
    impl TaskQueue for MemoryTaskQueue {
        async fn enqueue(&self, task: &TaskEnvelope) -> Result<()> {
            self.release(task);
            let mut scheduled = self.scheduled.lock().unwrap();
            let bucket = scheduled.entry(task.queue.clone()).or_default();
            bucket.retain(|t| t.id != task.id);
            bucket.push(task.clone());
            Ok(())
        }

        async fn claim_due(&self, queue: &str, now_ms: i64, limit: usize) -> Result<Vec<TaskEnvelope>> {
            let mut inflight = self.inflight.lock().unwrap();
            let leases = inflight.entry(queue.to_string()).or_default();
            let mut scheduled = self.scheduled.lock().unwrap();
            let bucket = scheduled.entry(queue.to_string()).or_default();

            let (expired, live): (Vec<_>, Vec<_>) = leases.drain(..).partition(|(deadline, _)| *deadline <= now_ms);
            *leases = live;
            bucket.extend(expired.into_iter().map(|(_, task)| task));

            bucket.sort_by_key(|t| t.process_at);
            let due = bucket.iter().take_while(|t| t.process_at <= now_ms).count().min(limit);
            let claimed: Vec<TaskEnvelope> = bucket.drain(..due).collect();
            leases.extend(claimed.iter().map(|t| (lease_deadline(now_ms), t.clone())));
            Ok(claimed)
        }

        async fn complete(&self, task: &TaskEnvelope) -> Result<()> {
            self.release(task);
            self.completed.lock().unwrap().push(task.clone());
            Ok(())
        }

        async fn dead_letter(&self, task: &TaskEnvelope) -> Result<()> {
            self.release(task);
            self.dead.lock().unwrap().push(task.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn only_due_tasks_are_claimed_once() {
        let queue = MemoryTaskQueue::default();
        let soon = TaskEnvelope::new("t", "q", &serde_json::json!({}), 3, 30, 100).unwrap();
        let later = TaskEnvelope::new("t", "q", &serde_json::json!({}), 3, 30, 5_000).unwrap();
        queue.enqueue(&later).await.unwrap();
        queue.enqueue(&soon).await.unwrap();

        let first = queue.claim_due("q", 1_000, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, soon.id);
        assert!(queue.claim_due("q", 1_000, 10).await.unwrap().is_empty());
        assert_eq!(queue.claim_due("q", 6_000, 10).await.unwrap()[0].id, later.id);
    }

    #[tokio::test]
    async fn unsettled_claims_are_redelivered_after_the_lease() {
        let queue = MemoryTaskQueue::default();
        let task = TaskEnvelope::new("t", "q", &serde_json::json!({}), 3, 30, 0).unwrap();
        queue.enqueue(&task).await.unwrap();

        let claimed = queue.claim_due("q", 1_000, 10).await.unwrap();
        assert_eq!(claimed[0].id, task.id);
        assert_eq!(queue.leased("q"), 1);

        // The consumer dies without settling. Nothing moves while the lease holds.
        let expiry = lease_deadline(1_000);
        assert!(queue.claim_due("q", expiry - 1, 10).await.unwrap().is_empty());

        let redelivered = queue.claim_due("q", expiry, 10).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].id, task.id);

        queue.complete(&redelivered[0]).await.unwrap();
        assert_eq!(queue.leased("q"), 0);
        assert!(queue.claim_due("q", expiry + CLAIM_LEASE.as_millis() as i64, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rescheduling_a_claimed_task_drops_its_lease() {
        let queue = MemoryTaskQueue::default();
        let mut task = TaskEnvelope::new("t", "q", &serde_json::json!({}), 3, 30, 0).unwrap();
        queue.enqueue(&task).await.unwrap();
        queue.claim_due("q", 1_000, 10).await.unwrap();

        task.retried += 1;
        task.process_at = 50_000;
        queue.enqueue(&task).await.unwrap();
        assert_eq!(queue.leased("q"), 0);
        assert_eq!(queue.pending("q").len(), 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_queue() {
        assert_eq!(scheduled_key("notification"), "netbill:notification:scheduled");
        assert_eq!(tasks_key("default"), "netbill:default:tasks");
        assert_eq!(dead_key("notification"), "netbill:notification:dead");
        assert_eq!(inflight_key("notification"), "netbill:notification:inflight");
    }

    #[test]
    fn lease_outlasts_a_send_timeout() {
        assert_eq!(lease_deadline(1_000), 1_000 + 120_000);
        assert!(CLAIM_LEASE > Duration::from_secs(30));
    }

    #[test]
    fn process_at_is_in_the_future() {
        let now = Utc::now().timestamp_millis();
        assert!(process_at_after(Duration::from_millis(300)) >= now + 300);
    }
}
