//! Job-queue contract shared by the enqueue side and the worker side.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_NOTIFICATION: &str = "notification";

pub const TASK_WA_CAMPAIGN_SEND: &str = "wa:campaign_send";

/// Payload of a `wa:campaign_send` task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignSendPayload {
    pub tenant_id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_id: Uuid,
    pub to: String,
    pub text: String,
}

/// A task as stored in the queue. `payload` stays raw JSON so the queue
/// itself never needs to know the task types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub queue: String,
    pub payload: serde_json::Value,
    pub max_retry: u32,
    pub retried: u32,
    pub timeout_secs: u64,
    /// Unix millis at which the task becomes eligible.
    pub process_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TaskEnvelope {
    pub fn new<P: Serialize>(
        task_type: &str,
        queue: &str,
        payload: &P,
        max_retry: u32,
        timeout_secs: u64,
        process_at: i64,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            task_type: task_type.to_string(),
            queue: queue.to_string(),
            payload: serde_json::to_value(payload)?,
            max_retry,
            retried: 0,
            timeout_secs,
            process_at,
            last_error: None,
        })
    }

    pub fn decode<P: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<P> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_keeps_payload_intact() {
        let payload = CampaignSendPayload {
            tenant_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            to: "628123".into(),
            text: "hello".into(),
        };
        let env = TaskEnvelope::new(TASK_WA_CAMPAIGN_SEND, QUEUE_NOTIFICATION, &payload, 3, 30, 0).unwrap();
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""type":"wa:campaign_send""#));
        let back: TaskEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.decode::<CampaignSendPayload>().unwrap(), payload);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut env = TaskEnvelope::new(TASK_WA_CAMPAIGN_SEND, QUEUE_NOTIFICATION, &serde_json::json!({}), 3, 30, 0).unwrap();
        assert!(env.can_retry());
        env.retried = 3;
        assert!(!env.can_retry());
    }
}
