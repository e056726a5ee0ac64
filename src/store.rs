//! Case Store
//!
//! Persistence collaborator trait for all engine state. The engine and
//! scheduler operate exclusively through this trait, enabling pluggable
//! backends (`MemoryStore` for the POC and tests, a relational store in
//! production). `save_request` is the optimistic-concurrency primitive:
//! the write lands only if the stored state still matches `expected_state`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::recommendation::CaseRecommendation;
use crate::request::{RequestState, ValidationRequest};
use crate::revision::RevisableItem;

/// Result of a compare-and-swap write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Stored state no longer matches what the caller read
    Conflict,
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    // ── Revisable items ──

    async fn load_item(
        &self,
        case_id: Uuid,
        category: &str,
    ) -> Result<Option<RevisableItem>, LifecycleError>;
    async fn save_item(&self, item: &RevisableItem) -> Result<(), LifecycleError>;
    async fn list_items(&self, case_id: Uuid) -> Result<Vec<RevisableItem>, LifecycleError>;

    // ── Recommendation cycles ──

    async fn load_recommendation(
        &self,
        case_id: Uuid,
    ) -> Result<Option<CaseRecommendation>, LifecycleError>;
    async fn save_recommendation(&self, rec: &CaseRecommendation) -> Result<(), LifecycleError>;

    // ── Validation requests ──

    /// Persist a new request, assigning the next per-case sequence number.
    /// Returns the stored request.
    async fn create_request(
        &self,
        request: ValidationRequest,
    ) -> Result<ValidationRequest, LifecycleError>;
    async fn load_request(&self, id: Uuid) -> Result<Option<ValidationRequest>, LifecycleError>;

    /// Compare-and-swap write: persists only if the stored state equals
    /// `expected_state`. A `Conflict` outcome means the caller must re-read.
    async fn save_request(
        &self,
        expected_state: RequestState,
        request: &ValidationRequest,
    ) -> Result<SaveOutcome, LifecycleError>;

    /// All requests for a case, in sequence order
    async fn list_requests(&self, case_id: Uuid) -> Result<Vec<ValidationRequest>, LifecycleError>;

    /// All requests currently open, across cases
    async fn list_open_requests(&self) -> Result<Vec<ValidationRequest>, LifecycleError>;
}

/// Per-request pessimistic locks with bounded wait.
///
/// The lock scope covers "re-check state, transition, record flags" as one
/// unit; notification dispatch happens after release. A timed-out wait means
/// the candidate is skipped and retried on the next run, not an error.
#[derive(Default)]
pub struct RequestLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl RequestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one request, waiting at most `wait`.
    /// Returns `None` on timeout.
    pub async fn acquire(&self, request_id: Uuid, wait: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(request_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }
}

#[derive(Default)]
struct MemoryState {
    items: HashMap<(Uuid, String), RevisableItem>,
    recommendations: HashMap<Uuid, CaseRecommendation>,
    requests: HashMap<Uuid, ValidationRequest>,
}

/// In-memory store backing tests and the POC wiring
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn load_item(
        &self,
        case_id: Uuid,
        category: &str,
    ) -> Result<Option<RevisableItem>, LifecycleError> {
        let state = self.state.read().await;
        Ok(state.items.get(&(case_id, category.to_string())).cloned())
    }

    async fn save_item(&self, item: &RevisableItem) -> Result<(), LifecycleError> {
        let mut state = self.state.write().await;
        state
            .items
            .insert((item.case_id, item.category.clone()), item.clone());
        Ok(())
    }

    async fn list_items(&self, case_id: Uuid) -> Result<Vec<RevisableItem>, LifecycleError> {
        let state = self.state.read().await;
        let mut items: Vec<RevisableItem> = state
            .items
            .values()
            .filter(|i| i.case_id == case_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.category.cmp(&b.category));
        Ok(items)
    }

    async fn load_recommendation(
        &self,
        case_id: Uuid,
    ) -> Result<Option<CaseRecommendation>, LifecycleError> {
        let state = self.state.read().await;
        Ok(state.recommendations.get(&case_id).cloned())
    }

    async fn save_recommendation(&self, rec: &CaseRecommendation) -> Result<(), LifecycleError> {
        let mut state = self.state.write().await;
        state.recommendations.insert(rec.case_id, rec.clone());
        Ok(())
    }

    async fn create_request(
        &self,
        mut request: ValidationRequest,
    ) -> Result<ValidationRequest, LifecycleError> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id) {
            return Err(LifecycleError::Validation(format!(
                "request {} already exists",
                request.id
            )));
        }
        // Sequence assignment happens under the same write lock as the
        // insert, so per-case ordinals are gapless and never reused.
        let next_sequence = state
            .requests
            .values()
            .filter(|r| r.case_id == request.case_id)
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0)
            + 1;
        request.sequence = next_sequence;
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn load_request(&self, id: Uuid) -> Result<Option<ValidationRequest>, LifecycleError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id).cloned())
    }

    async fn save_request(
        &self,
        expected_state: RequestState,
        request: &ValidationRequest,
    ) -> Result<SaveOutcome, LifecycleError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.requests.get(&request.id) else {
            return Err(LifecycleError::NotFound(format!("request {}", request.id)));
        };
        if stored.state != expected_state {
            return Ok(SaveOutcome::Conflict);
        }
        state.requests.insert(request.id, request.clone());
        Ok(SaveOutcome::Saved)
    }

    async fn list_requests(&self, case_id: Uuid) -> Result<Vec<ValidationRequest>, LifecycleError> {
        let state = self.state.read().await;
        let mut requests: Vec<ValidationRequest> = state
            .requests
            .values()
            .filter(|r| r.case_id == case_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.sequence);
        Ok(requests)
    }

    async fn list_open_requests(&self) -> Result<Vec<ValidationRequest>, LifecycleError> {
        let state = self.state.read().await;
        let mut requests: Vec<ValidationRequest> = state
            .requests
            .values()
            .filter(|r| r.state == RequestState::Open)
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.notified_at, r.sequence));
        Ok(requests)
    }
}
