//! Consumer side of the notification queue: delivers campaign messages
//! through the WhatsApp gateway and reports each outcome back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use netbill_db::models::campaign::{CampaignStatus, NewWaMessageLog};
use netbill_db::repositories::wa_log_repo::WaLogRepository;
use netbill_shared::jobs::{CampaignSendPayload, QUEUE_NOTIFICATION, TASK_WA_CAMPAIGN_SEND, TaskEnvelope};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::campaign_service::CampaignService;
use super::job_queue::TaskQueue;
use super::wa_gateway::{GatewayError, WaGateway};
use crate::metrics::Metrics;

const POLL_EVERY: Duration = Duration::from_millis(250);
const CLAIM_BATCH: usize = 16;
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_CAP_SECS: u64 = 300;

/// Delay before retry number `retried + 1`.
pub fn retry_backoff(retried: u32) -> Duration {
    let secs = BACKOFF_BASE_SECS.saturating_mul(1u64 << retried.min(16));
    Duration::from_secs(secs.min(BACKOFF_CAP_SECS))
}

/// Where every send attempt's final result is written.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn record(&self, log: &NewWaMessageLog) -> Result<()>;
}

#[async_trait]
impl MessageLog for WaLogRepository {
    async fn record(&self, log: &NewWaMessageLog) -> Result<()> {
        self.insert(log).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Failed,
    Retried,
    Skipped,
}

pub struct CampaignWorker {
    queue: Arc<dyn TaskQueue>,
    campaigns: Arc<CampaignService>,
    gateway: Arc<dyn WaGateway>,
    log: Arc<dyn MessageLog>,
    metrics: Arc<Metrics>,
}

impl CampaignWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        campaigns: Arc<CampaignService>,
        gateway: Arc<dyn WaGateway>,
        log: Arc<dyn MessageLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            campaigns,
            gateway,
            log,
            metrics,
        }
    }

    /// Spawns `concurrency` consumers. Each returns when shutdown fires.
    pub fn start(self: &Arc<Self>, concurrency: usize, shutdown: &broadcast::Sender<()>) -> Vec<tokio::task::JoinHandle<()>> {
        info!("Starting campaign worker pool with {} consumers", concurrency.max(1));
        (0..concurrency.max(1))
            .map(|n| {
                let worker = self.clone();
                let mut rx = shutdown.subscribe();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(POLL_EVERY);
                    loop {
                        tokio::select! {
                            _ = rx.recv() => {
                                debug!("Campaign consumer {} stopped", n);
                                return;
                            }
                            _ = ticker.tick() => {
                                if let Err(e) = worker.run_due(Utc::now().timestamp_millis()).await {
                                    error!("Campaign consumer {} failed to drain queue: {:#}", n, e);
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Claims and processes every task due at `now_ms`. Claims left unsettled
    /// by a crash come back once their `CLAIM_LEASE` runs out.
    pub async fn run_due(&self, now_ms: i64) -> Result<usize> {
        let mut processed = 0;
        loop {
            let batch = self.queue.claim_due(QUEUE_NOTIFICATION, now_ms, CLAIM_BATCH).await?;
            if batch.is_empty() {
                return Ok(processed);
            }
            for task in batch {
                if let Err(e) = self.process(task).await {
                    error!("Campaign task failed to settle: {:#}", e);
                }
                processed += 1;
            }
        }
    }

    pub async fn process(&self, task: TaskEnvelope) -> Result<Outcome> {
        if task.task_type != TASK_WA_CAMPAIGN_SEND {
            warn!("Unknown task type {} on {}; dead-lettered", task.task_type, task.queue);
            self.queue.dead_letter(&task).await?;
            return Ok(Outcome::Skipped);
        }
        let payload: CampaignSendPayload = match task.decode() {
            Ok(p) => p,
            Err(e) => {
                warn!("Undecodable campaign task {}: {}", task.id, e);
                self.queue.dead_letter(&task).await?;
                return Ok(Outcome::Skipped);
            }
        };

        let campaign = self.campaigns.get(payload.tenant_id, payload.campaign_id).await?;
        if campaign.status == CampaignStatus::Cancelled {
            self.campaigns
                .mark_recipient_failed(payload.tenant_id, payload.recipient_id, "campaign_cancelled")
                .await?;
            self.queue.complete(&task).await?;
            return Ok(Outcome::Skipped);
        }

        let attempt = tokio::time::timeout(
            Duration::from_secs(task.timeout_secs.max(1)),
            self.gateway.send_text(&payload.to, &payload.text),
        )
        .await
        .unwrap_or_else(|_| Err(GatewayError::Transport("send timed out".into())));

        match attempt {
            Ok(message_id) => {
                self.campaigns
                    .mark_recipient_sent(payload.tenant_id, payload.recipient_id, message_id.as_deref())
                    .await?;
                self.write_log(&payload, "sent", message_id, None).await;
                Metrics::incr(&self.metrics.campaign_sends_ok);
                self.queue.complete(&task).await?;
                Ok(Outcome::Sent)
            }
            Err(e) if e.is_retryable() && task.can_retry() => {
                let delay = retry_backoff(task.retried);
                let mut next = task;
                next.retried += 1;
                next.last_error = Some(e.to_string());
                next.process_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                debug!(
                    "Retrying send to {} in {:?} (attempt {}/{})",
                    payload.to, delay, next.retried, next.max_retry
                );
                self.queue.enqueue(&next).await?;
                Ok(Outcome::Retried)
            }
            Err(e) => {
                let reason = e.to_string();
                self.campaigns
                    .mark_recipient_failed(payload.tenant_id, payload.recipient_id, &reason)
                    .await?;
                self.write_log(&payload, "failed", None, Some(reason.clone())).await;
                Metrics::incr(&self.metrics.campaign_sends_failed);
                warn!("Send to {} for campaign {} failed: {}", payload.to, payload.campaign_id, reason);

                let mut finished = task;
                finished.last_error = Some(reason);
                if e.is_retryable() {
                    self.queue.dead_letter(&finished).await?;
                } else {
                    self.queue.complete(&finished).await?;
                }
                Ok(Outcome::Failed)
            }
        }
    }

    async fn write_log(&self, payload: &CampaignSendPayload, status: &str, message_id: Option<String>, error: Option<String>) {
        let entry = NewWaMessageLog {
            tenant_id: payload.tenant_id,
            campaign_id: Some(payload.campaign_id),
            recipient_id: Some(payload.recipient_id),
            phone: payload.to.clone(),
            message: payload.text.clone(),
            status: status.to_string(),
            message_id,
            error,
        };
        if let Err(e) = self.log.record(&entry).await {
            warn!("Failed to write WA message log: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use uuid::Uuid;

    use super::*;
    use crate::services::campaign_service::fakes::MemoryCampaignStore;
    use crate::services::job_queue::CLAIM_LEASE;
    use crate::services::job_queue::memory::MemoryTaskQueue;

    #[derive(Default)]
    struct ScriptedGateway {
        replies: HashMap<String, Result<Option<String>, GatewayError>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn reply(mut self, phone: &str, result: Result<Option<String>, GatewayError>) -> Self {
            self.replies.insert(phone.to_string(), result);
            self
        }
    }

    #[async_trait]
    impl WaGateway for ScriptedGateway {
        async fn send_text(&self, to: &str, _text: &str) -> Result<Option<String>, GatewayError> {
            self.calls.lock().unwrap().push(to.to_string());
            self.replies.get(to).cloned().unwrap_or(Ok(None))
        }
    }

    #[derive(Default)]
    struct MemoryLog(Mutex<Vec<NewWaMessageLog>>);

    #[async_trait]
    impl MessageLog for MemoryLog {
        async fn record(&self, log: &NewWaMessageLog) -> Result<()> {
            self.0.lock().unwrap().push(log.clone());
            Ok(())
        }
    }

    struct Harness {
        tenant: Uuid,
        group: Uuid,
        queue: Arc<MemoryTaskQueue>,
        campaigns: Arc<CampaignService>,
        gateway: Arc<ScriptedGateway>,
        log: Arc<MemoryLog>,
        worker: CampaignWorker,
    }

    fn harness(phones: &[&str], gateway: ScriptedGateway) -> Harness {
        let group = Uuid::new_v4();
        let queue = Arc::new(MemoryTaskQueue::default());
        let store = Arc::new(MemoryCampaignStore::with_group(group, phones));
        let campaigns = Arc::new(CampaignService::new(store, queue.clone()));
        let gateway = Arc::new(gateway);
        let log = Arc::new(MemoryLog::default());
        let worker = CampaignWorker::new(
            queue.clone(),
            campaigns.clone(),
            gateway.clone(),
            log.clone(),
            Arc::new(Metrics::new().unwrap()),
        );
        Harness {
            tenant: Uuid::new_v4(),
            group,
            queue,
            campaigns,
            gateway,
            log,
            worker,
        }
    }

    fn later() -> i64 {
        Utc::now().timestamp_millis() + 1_000
    }

    #[tokio::test]
    async fn worker_drives_campaign_to_completion() {
        let gateway = ScriptedGateway::default()
            .reply("62811", Ok(Some("m1".into())))
            .reply("62812", Err(GatewayError::Rejected("invalid_number".into())))
            .reply("62813", Ok(Some("m3".into())));
        let h = harness(&["62811", "62812", "62813"], gateway);

        let campaign = h.campaigns.create_and_enqueue(h.tenant, "promo", "hello", Some(h.group)).await.unwrap();
        assert_eq!(h.worker.run_due(later()).await.unwrap(), 3);

        let done = h.campaigns.get(h.tenant, campaign.id).await.unwrap();
        assert_eq!((done.sent, done.failed), (2, 1));
        assert_eq!(done.status, CampaignStatus::Completed);

        let logs = h.log.0.lock().unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.iter().filter(|l| l.status == "sent").count(), 2);
        assert_eq!(h.queue.completed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn transport_failures_retry_then_dead_letter() {
        let gateway = ScriptedGateway::default().reply("62811", Err(GatewayError::Transport("502".into())));
        let h = harness(&["62811"], gateway);
        let campaign = h.campaigns.create_and_enqueue(h.tenant, "promo", "hi", Some(h.group)).await.unwrap();

        let mut task = h.queue.pending(QUEUE_NOTIFICATION).remove(0);
        h.queue.scheduled.lock().unwrap().clear();
        for attempt in 1..=3 {
            assert_eq!(h.worker.process(task.clone()).await.unwrap(), Outcome::Retried);
            task = h.queue.pending(QUEUE_NOTIFICATION).remove(0);
            h.queue.scheduled.lock().unwrap().clear();
            assert_eq!(task.retried, attempt);
            assert!(task.last_error.is_some());
        }
        assert_eq!(h.worker.process(task).await.unwrap(), Outcome::Failed);

        assert_eq!(h.gateway.calls.lock().unwrap().len(), 4);
        assert_eq!(h.queue.dead.lock().unwrap().len(), 1);
        let done = h.campaigns.get(h.tenant, campaign.id).await.unwrap();
        assert_eq!((done.sent, done.failed), (0, 1));
    }

    #[tokio::test]
    async fn claims_abandoned_by_a_dead_consumer_are_sent_later() {
        let h = harness(&["62811"], ScriptedGateway::default().reply("62811", Ok(Some("m1".into()))));
        let campaign = h.campaigns.create_and_enqueue(h.tenant, "promo", "hi", Some(h.group)).await.unwrap();

        let now = later();
        assert_eq!(h.queue.claim_due(QUEUE_NOTIFICATION, now, CLAIM_BATCH).await.unwrap().len(), 1);
        assert_eq!(h.worker.run_due(now).await.unwrap(), 0);

        let after_lease = now + CLAIM_LEASE.as_millis() as i64;
        assert_eq!(h.worker.run_due(after_lease).await.unwrap(), 1);
        assert_eq!(h.gateway.calls.lock().unwrap().len(), 1);
        let done = h.campaigns.get(h.tenant, campaign.id).await.unwrap();
        assert_eq!(done.sent, 1);
        assert_eq!(h.queue.leased(QUEUE_NOTIFICATION), 0);
    }

    #[tokio::test]
    async fn cancelled_campaign_skips_the_gateway() {
        let h = harness(&["62811", "62812"], ScriptedGateway::default());
        let campaign = h.campaigns.create_and_enqueue(h.tenant, "promo", "hi", Some(h.group)).await.unwrap();
        h.campaigns.cancel(h.tenant, campaign.id).await.unwrap();

        h.worker.run_due(later()).await.unwrap();
        assert!(h.gateway.calls.lock().unwrap().is_empty());
        let after = h.campaigns.get(h.tenant, campaign.id).await.unwrap();
        assert_eq!(after.status, CampaignStatus::Cancelled);
        assert_eq!(after.failed, 2);
    }

    #[tokio::test]
    async fn foreign_task_types_are_dead_lettered() {
        let h = harness(&[], ScriptedGateway::default());
        let task = TaskEnvelope::new("email:send", QUEUE_NOTIFICATION, &serde_json::json!({}), 3, 30, 0).unwrap();
        assert_eq!(h.worker.process(task).await.unwrap(), Outcome::Skipped);
        assert_eq!(h.queue.dead.lock().unwrap().len(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(0), Duration::from_secs(5));
        assert_eq!(retry_backoff(1), Duration::from_secs(10));
        assert_eq!(retry_backoff(2), Duration::from_secs(20));
        assert_eq!(retry_backoff(10), Duration::from_secs(300));
    }
}
