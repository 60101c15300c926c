//! Verification verdicts.

use serde::{Deserialize, Serialize};

use crate::trace::Trace;

/// Outcome of checking one function up to the bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SafetyResult {
    /// No error location is reachable within the bound.
    Success,
    /// A counterexample was found.
    Fail { error_code: u32, trace: Trace },
}

impl SafetyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SafetyResult::Success)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, SafetyResult::Fail { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(SafetyResult::Success.is_success());
        let fail = SafetyResult::Fail {
            error_code: 42,
            trace: Trace::default(),
        };
        assert!(fail.is_fail());
        assert!(!fail.is_success());
    }
}
