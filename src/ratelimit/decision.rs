//! Admission decision returned by every limiter.

use serde::Serialize;

/// Outcome of evaluating a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The request is admitted and counted against the budget
    Allow,
    /// The request is refused; no budget is consumed
    Reject,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Reject)
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Reject
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => write!(f, "allowed"),
            Decision::Reject => write!(f, "rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_from_bool() {
        assert_eq!(Decision::from(true), Decision::Allow);
        assert_eq!(Decision::from(false), Decision::Reject);
        assert!(Decision::Allow.is_allowed());
        assert!(Decision::Reject.is_rejected());
    }

    #[test]
    fn test_decision_display_and_serialize() {
        assert_eq!(Decision::Allow.to_string(), "allowed");
        assert_eq!(Decision::Reject.to_string(), "rejected");
        assert_eq!(serde_json::to_string(&Decision::Reject).unwrap(), "\"reject\"");
    }
}
