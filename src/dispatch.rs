//! Notification Dispatcher
//!
//! External collaborator that delivers a message for a lifecycle transition.
//! Delivery is at-least-once from the caller's point of view, so every
//! notification carries an idempotency key of `(request_id, transition_id)` —
//! gateway-side retries cannot double-send a closure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::request::ValidationRequest;

/// What the message is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestAutoClosed,
    RequestCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestAutoClosed => "request_auto_closed",
            Self::RequestCancelled => "request_cancelled",
        }
    }
}

/// One outbound message describing a transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub case_id: Uuid,
    pub request_id: Uuid,
    /// `{request_id}:{transition_id}` — REQUIRED for deduplication
    pub idempotency_key: String,
    pub payload: serde_json::Value,
}

impl Notification {
    /// Message for a scheduler-initiated closure
    pub fn auto_closed(request: &ValidationRequest, transition_id: Uuid) -> Self {
        Self {
            kind: NotificationKind::RequestAutoClosed,
            case_id: request.case_id,
            request_id: request.id,
            idempotency_key: format!("{}:{}", request.id, transition_id),
            payload: json!({
                "request_kind": request.kind.as_str(),
                "sequence": request.sequence,
                "approved": request.approved,
                "closed_at": request.closed_at,
            }),
        }
    }

    /// Message for an officer-initiated cancellation
    pub fn cancelled(request: &ValidationRequest, transition_id: Uuid) -> Self {
        Self {
            kind: NotificationKind::RequestCancelled,
            case_id: request.case_id,
            request_id: request.id,
            idempotency_key: format!("{}:{}", request.id, transition_id),
            payload: json!({
                "request_kind": request.kind.as_str(),
                "sequence": request.sequence,
                "cancel_reason": request.cancel_reason,
            }),
        }
    }
}

/// Gateway's answer to a dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    /// Unreachable or timed out; retry with backoff
    TransientError(String),
    /// Payload rejected outright; log and drop
    PermanentError(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: &Notification) -> DispatchOutcome;
}

/// Test double and POC dispatcher: records every call and can be scripted
/// to fail. Outcomes are consumed in order; once the script drains, every
/// call is accepted.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
    script: Mutex<Vec<DispatchOutcome>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next dispatch call
    pub async fn push_outcome(&self, outcome: DispatchOutcome) {
        self.script.lock().await.push(outcome);
    }

    /// Everything dispatched so far, including calls that were scripted to fail
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    /// Count of accepted deliveries by idempotency key
    pub async fn accepted_keys(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|n| n.idempotency_key.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(&self, notification: &Notification) -> DispatchOutcome {
        let outcome = {
            let mut script = self.script.lock().await;
            if script.is_empty() {
                DispatchOutcome::Accepted
            } else {
                script.remove(0)
            }
        };
        if outcome == DispatchOutcome::Accepted {
            self.sent.lock().await.push(notification.clone());
        }
        outcome
    }
}
