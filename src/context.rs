//! Action Context
//!
//! Every mutating call takes an explicit actor + timestamp instead of reading
//! ambient "current user/time" state. The context is recorded on audit fields
//! (`created_by`, `verdict_by`, transition timestamps).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who is acting, and when
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionContext {
    /// Actor identifier (user ID or "system")
    pub actor: String,
    /// Effective timestamp of the action
    pub at: DateTime<Utc>,
}

impl ActionContext {
    pub fn new(actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            at,
        }
    }

    /// Context for system-initiated actions (e.g. the auto-close scheduler)
    pub fn system(at: DateTime<Utc>) -> Self {
        Self::new("system", at)
    }
}
