//! Lifecycle Engine
//!
//! Facade exposed to the web layer and reporting: read-only status
//! resolution plus the officer/applicant mutations on recommendation cycles
//! and validation requests. Mutations on a request take the same per-request
//! lock as the auto-close scheduler, so a cancellation racing an auto-close
//! resolves to whichever acquires the lock first and the loser no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::context::ActionContext;
use crate::dispatch::{DispatchOutcome, Notification, NotificationDispatcher};
use crate::error::LifecycleError;
use crate::policy::ClosePolicyTable;
use crate::recommendation::CaseRecommendation;
use crate::request::{RequestKind, RequestState, ValidationRequest};
use crate::revision::{AssessmentProgress, Entry, ReviewProgress, ReviewerVerdict, RevisableItem};
use crate::scheduler::{AutoCloseScheduler, SchedulerConfig};
use crate::status::{resolve, CategoryPolicy, ItemStatus};
use crate::store::{CaseStore, RequestLocks, SaveOutcome};

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// The engine facade over the store, calendar, and notification gateway
pub struct LifecycleEngine {
    store: Arc<dyn CaseStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    calendar: BusinessCalendar,
    policies: ClosePolicyTable,
    category_policies: HashMap<String, CategoryPolicy>,
    locks: Arc<RequestLocks>,
    lock_wait: Duration,
}

impl LifecycleEngine {
    /// Build an engine, validating the close policy table up front
    pub fn new(
        store: Arc<dyn CaseStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        calendar: BusinessCalendar,
        policies: ClosePolicyTable,
    ) -> Result<Self, LifecycleError> {
        policies.validate()?;
        Ok(Self {
            store,
            dispatcher,
            calendar,
            policies,
            category_policies: HashMap::new(),
            locks: Arc::new(RequestLocks::new()),
            lock_wait: DEFAULT_LOCK_WAIT,
        })
    }

    /// Register the resolution policy for an item family.
    /// Unregistered categories fall back to the default policy.
    pub fn with_category_policy(
        mut self,
        category: impl Into<String>,
        policy: CategoryPolicy,
    ) -> Self {
        self.category_policies.insert(category.into(), policy);
        self
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// An auto-close scheduler sharing this engine's store, calendar,
    /// policies, and per-request locks
    pub fn scheduler(&self, config: SchedulerConfig) -> Result<AutoCloseScheduler, LifecycleError> {
        AutoCloseScheduler::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.calendar.clone(),
            self.policies.clone(),
            self.locks.clone(),
            config,
        )
    }

    pub fn close_policies(&self) -> &ClosePolicyTable {
        &self.policies
    }

    // ── Read API ──

    /// Canonical status of one revisable item. An absent item resolves the
    /// same as an item with no entries.
    pub async fn resolve_status(
        &self,
        case_id: Uuid,
        category: &str,
    ) -> Result<ItemStatus, LifecycleError> {
        let item = self
            .store
            .load_item(case_id, category)
            .await?
            .unwrap_or_else(|| RevisableItem::new(case_id, category));
        let recommendation = self.load_or_new_recommendation(case_id).await?;
        let policy = self.category_policy(category);
        Ok(resolve(&item, &recommendation, &policy))
    }

    /// Status snapshot for a whole case: every stored item plus every
    /// registered category, for task-list rendering.
    pub async fn resolve_all(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<(String, ItemStatus)>, LifecycleError> {
        let recommendation = self.load_or_new_recommendation(case_id).await?;
        let mut by_category: HashMap<String, RevisableItem> = self
            .store
            .list_items(case_id)
            .await?
            .into_iter()
            .map(|item| (item.category.clone(), item))
            .collect();
        for category in self.category_policies.keys() {
            by_category
                .entry(category.clone())
                .or_insert_with(|| RevisableItem::new(case_id, category.clone()));
        }

        let mut statuses: Vec<(String, ItemStatus)> = by_category
            .into_iter()
            .map(|(category, item)| {
                let policy = self.category_policy(&category);
                let status = resolve(&item, &recommendation, &policy);
                (category, status)
            })
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(statuses)
    }

    /// Diagnostic mirror of the scheduler's selection query
    pub async fn list_overdue(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ValidationRequest>, LifecycleError> {
        let open = self.store.list_open_requests().await?;
        Ok(open
            .into_iter()
            .filter(|r| r.is_overdue(&self.calendar, as_of))
            .collect())
    }

    /// All validation requests for a case, in sequence order
    pub async fn list_requests(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<ValidationRequest>, LifecycleError> {
        self.store.list_requests(case_id).await
    }

    // ── Assessor / reviewer actions ──

    /// Append a new entry to an item's history, creating the item on first use
    pub async fn append_entry(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
        category: &str,
        assessment: AssessmentProgress,
        review: ReviewProgress,
    ) -> Result<Entry, LifecycleError> {
        let mut item = self
            .store
            .load_item(case_id, category)
            .await?
            .unwrap_or_else(|| RevisableItem::new(case_id, category));
        let entry = item.append(ctx, assessment, review);
        self.store.save_item(&item).await?;
        debug!(case_id = %case_id, category, sequence = entry.sequence, "Entry appended");
        Ok(entry)
    }

    /// Record the reviewer's verdict against an item's current entry
    pub async fn record_verdict(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
        category: &str,
        verdict: ReviewerVerdict,
    ) -> Result<(), LifecycleError> {
        let mut item = self
            .store
            .load_item(case_id, category)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("item {case_id}/{category}")))?;
        item.record_verdict(ctx, verdict)?;
        self.store.save_item(&item).await
    }

    pub async fn submit_recommendation(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
    ) -> Result<(), LifecycleError> {
        self.mutate_recommendation(case_id, |rec| rec.submit(ctx)).await
    }

    pub async fn accept_recommendation(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
    ) -> Result<(), LifecycleError> {
        self.mutate_recommendation(case_id, |rec| rec.accept(ctx)).await
    }

    pub async fn challenge_recommendation(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
    ) -> Result<(), LifecycleError> {
        self.mutate_recommendation(case_id, |rec| rec.challenge(ctx)).await
    }

    pub async fn withdraw_recommendation(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
    ) -> Result<(), LifecycleError> {
        self.mutate_recommendation(case_id, |rec| rec.withdraw(ctx)).await
    }

    // ── Validation request actions ──

    /// Draft a request without sending it
    pub async fn draft_request(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
        kind: RequestKind,
    ) -> Result<ValidationRequest, LifecycleError> {
        let window = self.policies.close_window(kind)?;
        self.store
            .create_request(ValidationRequest::draft(ctx, case_id, kind, window))
            .await
    }

    /// Create a request directly in the open state (already notified)
    pub async fn open_request(
        &self,
        ctx: &ActionContext,
        case_id: Uuid,
        kind: RequestKind,
    ) -> Result<ValidationRequest, LifecycleError> {
        let window = self.policies.close_window(kind)?;
        self.store
            .create_request(ValidationRequest::opened(ctx, case_id, kind, window))
            .await
    }

    /// Send a drafted request to the applicant, starting its response window
    pub async fn notify_request(
        &self,
        ctx: &ActionContext,
        request_id: Uuid,
    ) -> Result<ValidationRequest, LifecycleError> {
        self.locked_transition(request_id, |request| request.notify(ctx))
            .await
    }

    /// Applicant response closes the request
    pub async fn respond(
        &self,
        ctx: &ActionContext,
        request_id: Uuid,
        approved: bool,
        rejection_reason: Option<&str>,
    ) -> Result<ValidationRequest, LifecycleError> {
        self.locked_transition(request_id, |request| {
            request.respond(ctx, approved, rejection_reason).map(|_| ())
        })
        .await
    }

    /// Officer cancellation; notifies the applicant best-effort
    pub async fn cancel(
        &self,
        ctx: &ActionContext,
        request_id: Uuid,
        reason: &str,
    ) -> Result<ValidationRequest, LifecycleError> {
        let request = self
            .locked_transition(request_id, |request| {
                request.cancel(ctx, reason).map(|_| ())
            })
            .await?;

        if let Some(transition_id) = request.transition_id {
            // Single best-effort attempt; the cancellation itself is durable
            let notification = Notification::cancelled(&request, transition_id);
            match self.dispatcher.notify(&notification).await {
                DispatchOutcome::Accepted => {
                    debug!(request_id = %request.id, "Cancellation notification dispatched");
                }
                DispatchOutcome::TransientError(msg) => {
                    warn!(request_id = %request.id, error = %msg, "Cancellation notification failed");
                }
                DispatchOutcome::PermanentError(msg) => {
                    error!(request_id = %request.id, error = %msg, "Cancellation notification rejected");
                }
            }
        }
        Ok(request)
    }

    // ── Internals ──

    fn category_policy(&self, category: &str) -> CategoryPolicy {
        self.category_policies.get(category).copied().unwrap_or_default()
    }

    async fn load_or_new_recommendation(
        &self,
        case_id: Uuid,
    ) -> Result<CaseRecommendation, LifecycleError> {
        Ok(self
            .store
            .load_recommendation(case_id)
            .await?
            .unwrap_or_else(|| CaseRecommendation::new(case_id)))
    }

    async fn mutate_recommendation<F>(
        &self,
        case_id: Uuid,
        mutate: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce(&mut CaseRecommendation) -> Result<(), LifecycleError>,
    {
        let mut recommendation = self.load_or_new_recommendation(case_id).await?;
        mutate(&mut recommendation)?;
        self.store.save_recommendation(&recommendation).await
    }

    /// Lock, re-read, transition, compare-and-swap. The mutation sees the
    /// freshest state, so stale-read races surface as conflicts inside it.
    async fn locked_transition<F>(
        &self,
        request_id: Uuid,
        mutate: F,
    ) -> Result<ValidationRequest, LifecycleError>
    where
        F: FnOnce(&mut ValidationRequest) -> Result<(), LifecycleError>,
    {
        let Some(_guard) = self.locks.acquire(request_id, self.lock_wait).await else {
            return Err(LifecycleError::TransientExternal(format!(
                "timed out waiting for the lock on request {request_id}"
            )));
        };

        let Some(mut request) = self.store.load_request(request_id).await? else {
            return Err(LifecycleError::NotFound(format!("request {request_id}")));
        };
        let read_state = request.state;
        mutate(&mut request)?;

        match self.store.save_request(read_state, &request).await? {
            SaveOutcome::Saved => Ok(request),
            SaveOutcome::Conflict => {
                // Someone wrote around the lock; report what is stored now
                let actual = self
                    .store
                    .load_request(request_id)
                    .await?
                    .map(|r| r.state)
                    .unwrap_or(read_state);
                Err(LifecycleError::RequestConflict {
                    request_id,
                    expected: read_state,
                    actual,
                })
            }
        }
    }
}
