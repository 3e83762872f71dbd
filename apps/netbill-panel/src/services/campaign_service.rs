use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use netbill_db::models::campaign::{Campaign, Recipient, RecipientStatus, RecipientTarget};
use netbill_db::repositories::campaign_repo::CampaignRepository;
use netbill_db::repositories::client_repo::ClientRepository;
use netbill_shared::jobs::{CampaignSendPayload, QUEUE_NOTIFICATION, TASK_WA_CAMPAIGN_SEND, TaskEnvelope};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::job_queue::{TaskQueue, process_at_after};

pub const SEND_MAX_RETRY: u32 = 3;
pub const SEND_TIMEOUT_SECS: u64 = 30;
const JITTER_MIN_MS: u64 = 300;
const JITTER_MAX_MS: u64 = 700;
const ENQUEUE_FAILED: &str = "enqueue_failed";

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("group has no clients with a phone number")]
    NoRecipients,
    #[error("client group not found")]
    GroupNotFound,
    #[error("campaign not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Persistence the dispatcher needs. Implemented over Postgres below and by
/// in-memory fakes in tests.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn group_exists(&self, tenant_id: Uuid, group_id: Uuid) -> Result<bool>;
    async fn group_targets(&self, tenant_id: Uuid, group_id: Uuid) -> Result<Vec<RecipientTarget>>;
    async fn create_with_recipients(
        &self,
        tenant_id: Uuid,
        group_id: Uuid,
        name: &str,
        message: &str,
        targets: &[RecipientTarget],
    ) -> Result<(Campaign, Vec<Recipient>)>;
    async fn get(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>>;
    async fn list(&self, tenant_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Campaign>>;
    async fn recipients(&self, tenant_id: Uuid, campaign_id: Uuid, status: Option<RecipientStatus>) -> Result<Vec<Recipient>>;
    async fn mark_sent(&self, tenant_id: Uuid, recipient_id: Uuid, message_id: Option<&str>) -> Result<Option<Campaign>>;
    async fn mark_failed(&self, tenant_id: Uuid, recipient_id: Uuid, error: &str) -> Result<Option<Campaign>>;
    async fn retry_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<(Campaign, Vec<Recipient>)>>;
    async fn cancel(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>>;
}

pub struct PgCampaignStore {
    clients: ClientRepository,
    campaigns: CampaignRepository,
}

impl PgCampaignStore {
    pub fn new(clients: ClientRepository, campaigns: CampaignRepository) -> Self {
        Self { clients, campaigns }
    }
}

#[async_trait]
impl CampaignStore for PgCampaignStore {
    async fn group_exists(&self, tenant_id: Uuid, group_id: Uuid) -> Result<bool> {
        self.clients.group_exists(tenant_id, group_id).await
    }

    async fn group_targets(&self, tenant_id: Uuid, group_id: Uuid) -> Result<Vec<RecipientTarget>> {
        self.clients.list_group_targets(tenant_id, group_id).await
    }

    async fn create_with_recipients(
        &self,
        tenant_id: Uuid,
        group_id: Uuid,
        name: &str,
        message: &str,
        targets: &[RecipientTarget],
    ) -> Result<(Campaign, Vec<Recipient>)> {
        self.campaigns
            .create_with_recipients(tenant_id, group_id, name, message, targets)
            .await
    }

    async fn get(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>> {
        self.campaigns.get(tenant_id, campaign_id).await
    }

    async fn list(&self, tenant_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Campaign>> {
        self.campaigns.list(tenant_id, limit, offset).await
    }

    async fn recipients(&self, tenant_id: Uuid, campaign_id: Uuid, status: Option<RecipientStatus>) -> Result<Vec<Recipient>> {
        self.campaigns.recipients(tenant_id, campaign_id, status).await
    }

    async fn mark_sent(&self, tenant_id: Uuid, recipient_id: Uuid, message_id: Option<&str>) -> Result<Option<Campaign>> {
        self.campaigns.mark_recipient_sent(tenant_id, recipient_id, message_id).await
    }

    async fn mark_failed(&self, tenant_id: Uuid, recipient_id: Uuid, error: &str) -> Result<Option<Campaign>> {
        self.campaigns.mark_recipient_failed(tenant_id, recipient_id, error).await
    }

    async fn retry_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<(Campaign, Vec<Recipient>)>> {
        self.campaigns.retry_failed(tenant_id, campaign_id).await
    }

    async fn cancel(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>> {
        self.campaigns.cancel(tenant_id, campaign_id).await
    }
}

pub struct CampaignService {
    store: Arc<dyn CampaignStore>,
    queue: Arc<dyn TaskQueue>,
}

impl CampaignService {
    pub fn new(store: Arc<dyn CampaignStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn create_and_enqueue(
        &self,
        tenant_id: Uuid,
        name: &str,
        message: &str,
        group_id: Option<Uuid>,
    ) -> Result<Campaign, CampaignError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CampaignError::InvalidInput("name is required".into()));
        }
        if message.trim().is_empty() {
            return Err(CampaignError::InvalidInput("message is required".into()));
        }
        let group_id = group_id.ok_or_else(|| CampaignError::InvalidInput("group_id is required".into()))?;

        if !self.store.group_exists(tenant_id, group_id).await? {
            return Err(CampaignError::GroupNotFound);
        }

        // One row per client; duplicate phones are kept.
        let targets = self.store.group_targets(tenant_id, group_id).await?;
        if targets.is_empty() {
            return Err(CampaignError::NoRecipients);
        }

        let (campaign, recipients) = self
            .store
            .create_with_recipients(tenant_id, group_id, name, message, &targets)
            .await?;

        self.enqueue_sends(&campaign, &recipients).await?;
        info!(
            "📣 Campaign {} queued for tenant {} with {} recipients",
            campaign.id, tenant_id, campaign.total
        );
        Ok(campaign)
    }

    /// Queues one send per recipient. When the queue gives out partway, the
    /// recipients not yet queued are failed so the campaign can still finish
    /// and `retry_failed` can pick them up later.
    async fn enqueue_sends(&self, campaign: &Campaign, recipients: &[Recipient]) -> Result<()> {
        for (queued, recipient) in recipients.iter().enumerate() {
            if let Err(e) = self.enqueue_send(campaign, recipient).await {
                let unsent = &recipients[queued..];
                warn!(
                    "Queueing campaign {} stopped after {}/{} recipients: {:#}",
                    campaign.id,
                    queued,
                    recipients.len(),
                    e
                );
                self.fail_unsent(campaign.tenant_id, unsent).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn enqueue_send(&self, campaign: &Campaign, recipient: &Recipient) -> Result<()> {
        let payload = CampaignSendPayload {
            tenant_id: campaign.tenant_id,
            campaign_id: campaign.id,
            recipient_id: recipient.id,
            to: recipient.phone.clone(),
            text: campaign.message.clone(),
        };
        let task = TaskEnvelope::new(
            TASK_WA_CAMPAIGN_SEND,
            QUEUE_NOTIFICATION,
            &payload,
            SEND_MAX_RETRY,
            SEND_TIMEOUT_SECS,
            process_at_after(send_jitter()),
        )?;
        self.queue.enqueue(&task).await
    }

    async fn fail_unsent(&self, tenant_id: Uuid, unsent: &[Recipient]) {
        for recipient in unsent {
            if let Err(e) = self.store.mark_failed(tenant_id, recipient.id, ENQUEUE_FAILED).await {
                warn!("Failed to mark recipient {} as not queued: {:#}", recipient.id, e);
            }
        }
    }

    pub async fn get(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Campaign, CampaignError> {
        self.store
            .get(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    pub async fn list(&self, tenant_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.store.list(tenant_id, limit, offset).await?)
    }

    pub async fn recipients(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        status: Option<RecipientStatus>,
    ) -> Result<Vec<Recipient>, CampaignError> {
        self.get(tenant_id, campaign_id).await?;
        Ok(self.store.recipients(tenant_id, campaign_id, status).await?)
    }

    /// No-op (returns `None`) when the recipient was already settled.
    pub async fn mark_recipient_sent(
        &self,
        tenant_id: Uuid,
        recipient_id: Uuid,
        message_id: Option<&str>,
    ) -> Result<Option<Campaign>, CampaignError> {
        Ok(self.store.mark_sent(tenant_id, recipient_id, message_id).await?)
    }

    pub async fn mark_recipient_failed(
        &self,
        tenant_id: Uuid,
        recipient_id: Uuid,
        error: &str,
    ) -> Result<Option<Campaign>, CampaignError> {
        Ok(self.store.mark_failed(tenant_id, recipient_id, error).await?)
    }

    pub async fn retry_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<(Campaign, usize), CampaignError> {
        let (campaign, reset) = self
            .store
            .retry_failed(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;
        if !reset.is_empty() {
            self.enqueue_sends(&campaign, &reset).await?;
            info!("Campaign {} re-queued {} failed recipients", campaign.id, reset.len());
        }
        Ok((campaign, reset.len()))
    }

    /// Already finished campaigns are returned unchanged.
    pub async fn cancel(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Campaign, CampaignError> {
        match self.store.cancel(tenant_id, campaign_id).await? {
            Some(campaign) => {
                warn!("Campaign {} cancelled with {} recipients pending", campaign.id, campaign.pending());
                Ok(campaign)
            }
            None => self.get(tenant_id, campaign_id).await,
        }
    }
}

fn send_jitter() -> Duration {
    Duration::from_millis(rand::random_range(JITTER_MIN_MS..=JITTER_MAX_MS))
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;
    use netbill_db::models::campaign::CampaignStatus;

    use super::*;

    #[derive(Default)]
    pub struct MemoryCampaignStore {
        pub groups: Mutex<HashMap<Uuid, Vec<RecipientTarget>>>,
        pub campaigns: Mutex<HashMap<Uuid, Campaign>>,
        pub recipients: Mutex<Vec<Recipient>>,
    }

    impl MemoryCampaignStore {
        pub fn with_group(group_id: Uuid, phones: &[&str]) -> Self {
            let store = Self::default();
            let targets = phones
                .iter()
                .map(|p| RecipientTarget { client_id: Uuid::new_v4(), phone: p.to_string() })
                .collect();
            store.groups.lock().unwrap().insert(group_id, targets);
            store
        }

        fn settle(&self, tenant_id: Uuid, recipient_id: Uuid, status: RecipientStatus, error: Option<&str>, message_id: Option<&str>) -> Option<Campaign> {
            let mut recipients = self.recipients.lock().unwrap();
            let recipient = recipients
                .iter_mut()
                .find(|r| r.id == recipient_id && r.status == RecipientStatus::Pending)?;
            let mut campaigns = self.campaigns.lock().unwrap();
            let campaign = campaigns.get_mut(&recipient.campaign_id).filter(|c| c.tenant_id == tenant_id)?;

            recipient.status = status;
            recipient.error = error.map(str::to_string);
            recipient.message_id = message_id.map(str::to_string);
            if status == RecipientStatus::Sent {
                recipient.sent_at = Some(Utc::now());
                campaign.sent += 1;
            } else {
                campaign.failed += 1;
            }
            if matches!(campaign.status, CampaignStatus::Queued | CampaignStatus::Running) {
                campaign.status = if campaign.sent + campaign.failed >= campaign.total {
                    CampaignStatus::Completed
                } else {
                    CampaignStatus::Running
                };
            }
            Some(campaign.clone())
        }
    }

    #[async_trait]
    impl CampaignStore for MemoryCampaignStore {
        async fn group_exists(&self, _tenant_id: Uuid, group_id: Uuid) -> Result<bool> {
            Ok(self.groups.lock().unwrap().contains_key(&group_id))
        }

        async fn group_targets(&self, _tenant_id: Uuid, group_id: Uuid) -> Result<Vec<RecipientTarget>> {
            Ok(self.groups.lock().unwrap().get(&group_id).cloned().unwrap_or_default())
        }

        async fn create_with_recipients(
            &self,
            tenant_id: Uuid,
            group_id: Uuid,
            name: &str,
            message: &str,
            targets: &[RecipientTarget],
        ) -> Result<(Campaign, Vec<Recipient>)> {
            let campaign = Campaign {
                id: Uuid::new_v4(),
                tenant_id,
                group_id,
                name: name.to_string(),
                message: message.to_string(),
                status: CampaignStatus::Queued,
                total: targets.len() as i32,
                sent: 0,
                failed: 0,
                created_at: Utc::now(),
            };
            let rows: Vec<Recipient> = targets
                .iter()
                .map(|t| Recipient {
                    id: Uuid::new_v4(),
                    campaign_id: campaign.id,
                    client_id: Some(t.client_id),
                    phone: t.phone.clone(),
                    status: RecipientStatus::Pending,
                    error: None,
                    message_id: None,
                    sent_at: None,
                })
                .collect();
            self.campaigns.lock().unwrap().insert(campaign.id, campaign.clone());
            self.recipients.lock().unwrap().extend(rows.iter().cloned());
            Ok((campaign, rows))
        }

        async fn get(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>> {
            Ok(self
                .campaigns
                .lock()
                .unwrap()
                .get(&campaign_id)
                .filter(|c| c.tenant_id == tenant_id)
                .cloned())
        }

        async fn list(&self, tenant_id: Uuid, _limit: i64, _offset: i64) -> Result<Vec<Campaign>> {
            Ok(self
                .campaigns
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.tenant_id == tenant_id)
                .cloned()
                .collect())
        }

        async fn recipients(&self, _tenant_id: Uuid, campaign_id: Uuid, status: Option<RecipientStatus>) -> Result<Vec<Recipient>> {
            Ok(self
                .recipients
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.campaign_id == campaign_id && status.is_none_or(|s| r.status == s))
                .cloned()
                .collect())
        }

        async fn mark_sent(&self, tenant_id: Uuid, recipient_id: Uuid, message_id: Option<&str>) -> Result<Option<Campaign>> {
            Ok(self.settle(tenant_id, recipient_id, RecipientStatus::Sent, None, message_id))
        }

        async fn mark_failed(&self, tenant_id: Uuid, recipient_id: Uuid, error: &str) -> Result<Option<Campaign>> {
            Ok(self.settle(tenant_id, recipient_id, RecipientStatus::Failed, Some(error), None))
        }

        async fn retry_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<(Campaign, Vec<Recipient>)>> {
            let mut campaigns = self.campaigns.lock().unwrap();
            let Some(campaign) = campaigns.get_mut(&campaign_id).filter(|c| c.tenant_id == tenant_id) else {
                return Ok(None);
            };
            let mut reset = Vec::new();
            for r in self.recipients.lock().unwrap().iter_mut() {
                if r.campaign_id == campaign_id && r.status == RecipientStatus::Failed {
                    r.status = RecipientStatus::Pending;
                    r.error = None;
                    reset.push(r.clone());
                }
            }
            if !reset.is_empty() {
                campaign.failed = (campaign.failed - reset.len() as i32).max(0);
                campaign.status = CampaignStatus::Running;
            }
            Ok(Some((campaign.clone(), reset)))
        }

        async fn cancel(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>> {
            let mut campaigns = self.campaigns.lock().unwrap();
            Ok(campaigns
                .get_mut(&campaign_id)
                .filter(|c| c.tenant_id == tenant_id)
                .filter(|c| matches!(c.status, CampaignStatus::Queued | CampaignStatus::Running))
                .map(|c| {
                    c.status = CampaignStatus::Cancelled;
                    c.clone()
                }))
        }
    }
}
