//! Auto-Close Scheduler
//!
//! Recurring job that finds overdue open validation requests and closes
//! them. Safe to run concurrently with applicant responses, officer
//! cancellations, and other scheduler workers: each candidate is guarded by
//! a per-request lock plus the store's compare-and-swap write, and a loser
//! of either race quietly no-ops. The state transition is the durable fact;
//! notification is a best-effort side effect dispatched out-of-lock and
//! retried with its own backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::context::ActionContext;
use crate::dispatch::{DispatchOutcome, Notification, NotificationDispatcher};
use crate::error::LifecycleError;
use crate::policy::ClosePolicyTable;
use crate::request::{AutoCloseOutcome, RequestState};
use crate::store::{CaseStore, RequestLocks, SaveOutcome};

/// Scheduler tuning knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between polling runs
    pub poll_interval: Duration,
    /// Bounded wait for a per-request lock; on expiry the candidate is
    /// skipped and retried on the next run
    pub lock_wait: Duration,
    /// Attempt ceiling for notification dispatch
    pub max_notify_attempts: u32,
    /// Base backoff between dispatch attempts, doubled each retry
    pub notify_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600),
            lock_wait: Duration::from_secs(5),
            max_notify_attempts: 3,
            notify_backoff: Duration::from_millis(500),
        }
    }
}

/// Why a candidate was skipped rather than closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Could not acquire the per-request lock within the bounded wait
    LockTimeout,
    /// Another worker or the applicant got there first
    AlreadyTerminal,
    /// No longer overdue under the re-check (e.g. clock moved between runs)
    NotOverdue,
    /// Compare-and-swap write lost a race after the lock was acquired
    LostRace,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockTimeout => "lock_timeout",
            Self::AlreadyTerminal => "already_terminal",
            Self::NotOverdue => "not_overdue",
            Self::LostRace => "lost_race",
        }
    }
}

/// Outcome of closing a single candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed { transition_id: Uuid },
    Skipped(SkipReason),
}

/// What one polling run did
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub closed: Vec<Uuid>,
    pub skipped: Vec<(Uuid, SkipReason)>,
    /// Per-candidate failures; these never abort the batch
    pub errors: Vec<(Uuid, String)>,
}

/// The recurring auto-close job
pub struct AutoCloseScheduler {
    store: Arc<dyn CaseStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    calendar: BusinessCalendar,
    policies: ClosePolicyTable,
    locks: Arc<RequestLocks>,
    config: SchedulerConfig,
}

impl AutoCloseScheduler {
    /// Build a scheduler, validating the policy table up front.
    /// A missing or invalid policy fails here, never per-candidate.
    pub fn new(
        store: Arc<dyn CaseStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        calendar: BusinessCalendar,
        policies: ClosePolicyTable,
        locks: Arc<RequestLocks>,
        config: SchedulerConfig,
    ) -> Result<Self, LifecycleError> {
        policies.validate()?;
        Ok(Self {
            store,
            dispatcher,
            calendar,
            policies,
            locks,
            config,
        })
    }

    /// Run the polling loop until the shutdown signal flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Auto-close scheduler started");

        loop {
            if *shutdown.borrow() {
                info!("Auto-close scheduler shutting down");
                break;
            }

            match self.run_once(Utc::now()).await {
                Ok(report) => {
                    if !report.closed.is_empty() || !report.errors.is_empty() {
                        info!(
                            closed = report.closed.len(),
                            skipped = report.skipped.len(),
                            errors = report.errors.len(),
                            "Auto-close run finished"
                        );
                    }
                }
                Err(e) => {
                    // Selection failure: nothing was mutated, retry next tick
                    error!(error = %e, "Auto-close run failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Auto-close scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One polling run: select overdue open requests as of `now` and close
    /// each in isolation. Per-candidate failures are collected, never
    /// propagated to siblings.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<BatchReport, LifecycleError> {
        let candidates = self.select_overdue(now).await?;
        debug!(candidates = candidates.len(), "Auto-close selection");

        let mut report = BatchReport::default();
        for candidate in candidates {
            let request_id = candidate.id;
            match self.close_one(request_id, now).await {
                Ok(CloseOutcome::Closed { .. }) => report.closed.push(request_id),
                Ok(CloseOutcome::Skipped(reason)) => {
                    debug!(request_id = %request_id, reason = reason.as_str(), "Candidate skipped");
                    report.skipped.push((request_id, reason));
                }
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, "Failed to auto-close request");
                    report.errors.push((request_id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// The scheduler's selection query: open requests whose close window has
    /// elapsed. Also exposed read-only through the engine as `list_overdue`.
    pub async fn select_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<crate::request::ValidationRequest>, LifecycleError> {
        let open = self.store.list_open_requests().await?;
        Ok(open
            .into_iter()
            .filter(|r| r.is_overdue(&self.calendar, now))
            .collect())
    }

    /// Close a single overdue request: lock, re-check, transition, then
    /// notify outside the lock. Idempotent — a second invocation on the same
    /// request observes a terminal state and no-ops.
    pub async fn close_one(
        &self,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CloseOutcome, LifecycleError> {
        let Some(guard) = self.locks.acquire(request_id, self.config.lock_wait).await else {
            return Ok(CloseOutcome::Skipped(SkipReason::LockTimeout));
        };

        // Re-read under the lock: the applicant or another worker may have
        // closed the request since selection.
        let Some(mut request) = self.store.load_request(request_id).await? else {
            return Err(LifecycleError::NotFound(format!("request {request_id}")));
        };
        if request.state != RequestState::Open {
            return Ok(CloseOutcome::Skipped(SkipReason::AlreadyTerminal));
        }
        if !request.is_overdue(&self.calendar, now) {
            return Ok(CloseOutcome::Skipped(SkipReason::NotOverdue));
        }

        let policy = self.policies.policy_for(request.kind)?;
        let ctx = ActionContext::system(now);
        let AutoCloseOutcome::Closed { transition_id } =
            request.auto_close(&ctx, policy.on_timeout)
        else {
            return Ok(CloseOutcome::Skipped(SkipReason::AlreadyTerminal));
        };

        match self.store.save_request(RequestState::Open, &request).await? {
            SaveOutcome::Conflict => return Ok(CloseOutcome::Skipped(SkipReason::LostRace)),
            SaveOutcome::Saved => {}
        }

        info!(
            request_id = %request_id,
            case_id = %request.case_id,
            kind = request.kind.as_str(),
            approved = ?request.approved,
            "Validation request auto-closed"
        );

        // Transition committed; notification happens outside the lock so a
        // slow gateway never blocks other workers on this request.
        drop(guard);

        let notification = Notification::auto_closed(&request, transition_id);
        self.dispatch_with_backoff(&notification).await;

        Ok(CloseOutcome::Closed { transition_id })
    }

    /// Dispatch one notification, retrying transient failures with bounded
    /// exponential backoff. Never rolls back the transition: on a drained
    /// attempt ceiling or a permanent rejection the message is logged and
    /// dropped.
    async fn dispatch_with_backoff(&self, notification: &Notification) {
        let mut backoff = self.config.notify_backoff;
        for attempt in 1..=self.config.max_notify_attempts.max(1) {
            match self.dispatcher.notify(notification).await {
                DispatchOutcome::Accepted => {
                    debug!(
                        idempotency_key = %notification.idempotency_key,
                        attempt,
                        "Notification dispatched"
                    );
                    return;
                }
                DispatchOutcome::PermanentError(msg) => {
                    error!(
                        idempotency_key = %notification.idempotency_key,
                        error = %msg,
                        "Notification rejected permanently, dropping"
                    );
                    return;
                }
                DispatchOutcome::TransientError(msg) => {
                    if attempt >= self.config.max_notify_attempts {
                        error!(
                            idempotency_key = %notification.idempotency_key,
                            error = %msg,
                            attempts = attempt,
                            "Notification still failing, giving up"
                        );
                        return;
                    }
                    warn!(
                        idempotency_key = %notification.idempotency_key,
                        error = %msg,
                        attempt,
                        "Notification failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordingDispatcher;
    use crate::request::{RequestKind, ValidationRequest};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn scheduler_with(
        store: Arc<MemoryStore>,
        dispatcher: Arc<RecordingDispatcher>,
    ) -> AutoCloseScheduler {
        AutoCloseScheduler::new(
            store,
            dispatcher,
            BusinessCalendar::new(),
            ClosePolicyTable::standard(),
            Arc::new(RequestLocks::new()),
            SchedulerConfig {
                notify_backoff: Duration::from_millis(1),
                ..SchedulerConfig::default()
            },
        )
        .unwrap()
    }

    async fn open_overdue_request(store: &MemoryStore) -> ValidationRequest {
        // Notified Monday 9am; the 5-day window ends the following Monday
        let notified = Utc.with_ymd_and_hms(2025, 6, 9, 9, 0, 0).unwrap();
        let ctx = ActionContext::new("officer", notified);
        store
            .create_request(ValidationRequest::opened(
                &ctx,
                Uuid::new_v4(),
                RequestKind::DescriptionChange,
                5,
            ))
            .await
            .unwrap()
    }

    fn after_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 16, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_run_once_closes_overdue_request() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = scheduler_with(store.clone(), dispatcher.clone());

        let request = open_overdue_request(&store).await;
        let report = scheduler.run_once(after_window()).await.unwrap();

        assert_eq!(report.closed, vec![request.id]);
        let stored = store.load_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Closed);
        assert_eq!(stored.approved, Some(true));
        assert!(stored.auto_closed);
        assert_eq!(dispatcher.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = scheduler_with(store.clone(), dispatcher.clone());

        let request = open_overdue_request(&store).await;

        let first = scheduler.run_once(after_window()).await.unwrap();
        let second = scheduler.run_once(after_window()).await.unwrap();

        assert_eq!(first.closed.len(), 1);
        assert!(second.closed.is_empty());
        assert!(second.errors.is_empty());
        // Exactly one state transition and one notification
        assert_eq!(dispatcher.sent().await.len(), 1);

        // Driving the close step directly a second time is a quiet no-op too
        let outcome = scheduler.close_one(request.id, after_window()).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Skipped(SkipReason::AlreadyTerminal));
        assert_eq!(dispatcher.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_not_yet_overdue_request_is_left_open() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = scheduler_with(store.clone(), dispatcher.clone());

        let request = open_overdue_request(&store).await;

        // Friday of the same week: only 4 business days elapsed
        let early = Utc.with_ymd_and_hms(2025, 6, 13, 9, 0, 0).unwrap();
        let report = scheduler.run_once(early).await.unwrap();

        assert!(report.closed.is_empty());
        let stored = store.load_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Open);
        assert!(dispatcher.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_only_disposition_asserts_nothing() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = scheduler_with(store.clone(), dispatcher.clone());

        let notified = Utc.with_ymd_and_hms(2025, 6, 9, 9, 0, 0).unwrap();
        let ctx = ActionContext::new("officer", notified);
        let request = store
            .create_request(ValidationRequest::opened(
                &ctx,
                Uuid::new_v4(),
                RequestKind::RedLineBoundaryChange,
                5,
            ))
            .await
            .unwrap();

        scheduler.run_once(after_window()).await.unwrap();

        let stored = store.load_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Closed);
        assert_eq!(stored.approved, None);
        assert!(stored.auto_closed);
    }

    #[tokio::test]
    async fn test_lock_timeout_skips_candidate() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let locks = Arc::new(RequestLocks::new());
        let scheduler = AutoCloseScheduler::new(
            store.clone(),
            dispatcher.clone(),
            BusinessCalendar::new(),
            ClosePolicyTable::standard(),
            locks.clone(),
            SchedulerConfig {
                lock_wait: Duration::from_millis(20),
                notify_backoff: Duration::from_millis(1),
                ..SchedulerConfig::default()
            },
        )
        .unwrap();

        let request = open_overdue_request(&store).await;

        // Another worker holds the lock for the whole attempt
        let held = locks.acquire(request.id, Duration::from_millis(20)).await;
        assert!(held.is_some());

        let outcome = scheduler.close_one(request.id, after_window()).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Skipped(SkipReason::LockTimeout));

        // Request untouched; next run picks it up
        let stored = store.load_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Open);
        drop(held);

        let report = scheduler.run_once(after_window()).await.unwrap();
        assert_eq!(report.closed.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_dispatch_failures_are_retried() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        dispatcher
            .push_outcome(DispatchOutcome::TransientError("timeout".to_string()))
            .await;
        dispatcher
            .push_outcome(DispatchOutcome::TransientError("timeout".to_string()))
            .await;
        let scheduler = scheduler_with(store.clone(), dispatcher.clone());

        let request = open_overdue_request(&store).await;
        let report = scheduler.run_once(after_window()).await.unwrap();

        // Transition committed and the third attempt delivered
        assert_eq!(report.closed, vec![request.id]);
        assert_eq!(dispatcher.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_dispatch_failure_never_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        dispatcher
            .push_outcome(DispatchOutcome::PermanentError("bad payload".to_string()))
            .await;
        let scheduler = scheduler_with(store.clone(), dispatcher.clone());

        let request = open_overdue_request(&store).await;
        let report = scheduler.run_once(after_window()).await.unwrap();

        assert_eq!(report.closed, vec![request.id]);
        let stored = store.load_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Closed);
        // Dropped, not retried
        assert!(dispatcher.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_candidate_does_not_abort_batch() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = scheduler_with(store.clone(), dispatcher.clone());

        let healthy = open_overdue_request(&store).await;
        // A candidate that vanished between selection and processing
        let vanished = Uuid::new_v4();

        let mut report = BatchReport::default();
        for id in [vanished, healthy.id] {
            match scheduler.close_one(id, after_window()).await {
                Ok(CloseOutcome::Closed { .. }) => report.closed.push(id),
                Ok(CloseOutcome::Skipped(r)) => report.skipped.push((id, r)),
                Err(e) => report.errors.push((id, e.to_string())),
            }
        }

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, vanished);
        assert_eq!(report.closed, vec![healthy.id]);
    }

    #[tokio::test]
    async fn test_run_loop_honours_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = Arc::new(scheduler_with(store, dispatcher));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler loop should stop on shutdown")
            .unwrap();
    }
}
