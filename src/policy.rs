//! Close Policy Table
//!
//! Per-type close windows and timeout dispositions for validation requests.
//! Declared configuration, not inferred and not hard-coded at call sites:
//! the table is loadable from YAML and validated up front so a missing policy
//! fails at startup, never per-candidate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::request::RequestKind;

/// What a timeout closure asserts about the applicant's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutDisposition {
    /// Silence counts as consent; the request closes approved
    Approve,
    /// Close without asserting approval either way
    CloseOnly,
}

/// Policy for one request kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClosePolicy {
    pub close_window_business_days: u32,
    pub on_timeout: TimeoutDisposition,
}

/// The full per-kind policy table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePolicyTable {
    policies: HashMap<RequestKind, ClosePolicy>,
}

impl ClosePolicyTable {
    /// The observed production table: 5-day windows except pre-commencement
    /// conditions at 10; boundary/condition/heads-of-terms kinds close
    /// without asserting approval.
    pub fn standard() -> Self {
        use RequestKind::*;
        use TimeoutDisposition::*;

        let entry = |days, on_timeout| ClosePolicy {
            close_window_business_days: days,
            on_timeout,
        };

        Self {
            policies: HashMap::from([
                (DescriptionChange, entry(5, Approve)),
                (RedLineBoundaryChange, entry(5, CloseOnly)),
                (AdditionalDocument, entry(5, Approve)),
                (FeeChange, entry(5, Approve)),
                (OwnershipCertificate, entry(5, Approve)),
                (Other, entry(5, Approve)),
                (PreCommencementCondition, entry(10, CloseOnly)),
                (HeadsOfTerms, entry(5, CloseOnly)),
            ]),
        }
    }

    /// Parse a table from YAML configuration, e.g.
    ///
    /// ```yaml
    /// description_change:
    ///   close_window_business_days: 5
    ///   on_timeout: approve
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, LifecycleError> {
        let policies: HashMap<RequestKind, ClosePolicy> = serde_yaml::from_str(yaml)
            .map_err(|e| LifecycleError::Configuration(format!("invalid close policy YAML: {e}")))?;
        let table = Self { policies };
        table.validate()?;
        Ok(table)
    }

    /// Every request kind must carry a policy with a non-zero window
    pub fn validate(&self) -> Result<(), LifecycleError> {
        for kind in RequestKind::ALL {
            let policy = self.policies.get(&kind).ok_or_else(|| {
                LifecycleError::Configuration(format!("no close policy configured for {kind}"))
            })?;
            if policy.close_window_business_days == 0 {
                return Err(LifecycleError::Configuration(format!(
                    "close window for {kind} must be at least one business day"
                )));
            }
        }
        Ok(())
    }

    pub fn policy_for(&self, kind: RequestKind) -> Result<ClosePolicy, LifecycleError> {
        self.policies.get(&kind).copied().ok_or_else(|| {
            LifecycleError::Configuration(format!("no close policy configured for {kind}"))
        })
    }

    pub fn close_window(&self, kind: RequestKind) -> Result<u32, LifecycleError> {
        Ok(self.policy_for(kind)?.close_window_business_days)
    }
}

impl TimeoutDisposition {
    /// The `approved` value an auto-closure records
    pub fn approved_value(&self) -> Option<bool> {
        match self {
            Self::Approve => Some(true),
            Self::CloseOnly => None,
        }
    }
}
