//! The auto-fix/approval gate.
//!
//! [`DecisionPolicy::decide`] is the sole safety gate between a diagnosis
//! and an unattended fix. It is a pure function of the risk assessment and
//! diagnosis; identical inputs always produce the identical decision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnosis::Diagnosis;
use crate::risk::{RiskAssessment, RiskTier};

/// Confidence a diagnosis must strictly exceed before an auto-fix is
/// allowed.
pub const DEFAULT_AUTO_FIX_CONFIDENCE: f64 = 0.85;

/// Outcome of the deciding stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Dispatch a generated fix without human review.
    AutoFix,
    /// Park in the approval queue for human sign-off.
    RequiresApproval,
    /// Anomaly-forced escalation; approval required, auto-fix barred.
    ForceEscalate,
}

impl Decision {
    pub fn requires_approval(self) -> bool {
        matches!(self, Self::RequiresApproval | Self::ForceEscalate)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoFix => write!(f, "auto_fix"),
            Self::RequiresApproval => write!(f, "requires_approval"),
            Self::ForceEscalate => write!(f, "force_escalate"),
        }
    }
}

/// The gate itself. Holds only the configured confidence threshold.
#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    auto_fix_confidence: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            auto_fix_confidence: DEFAULT_AUTO_FIX_CONFIDENCE,
        }
    }
}

impl DecisionPolicy {
    pub fn new(auto_fix_confidence: f64) -> Self {
        Self {
            auto_fix_confidence,
        }
    }

    /// Evaluated in order:
    ///
    /// 1. `critical` tier (reachable only via the anomaly rules) →
    ///    [`Decision::ForceEscalate`].
    /// 2. `low` tier AND confidence strictly above the threshold AND no
    ///    checkout/revenue impact → [`Decision::AutoFix`].
    /// 3. Otherwise [`Decision::RequiresApproval`].
    pub fn decide(&self, risk: &RiskAssessment, diagnosis: &Diagnosis) -> Decision {
        if risk.tier == RiskTier::Critical {
            return Decision::ForceEscalate;
        }
        if risk.tier == RiskTier::Low
            && diagnosis.confidence > self.auto_fix_confidence
            && !risk.affects_checkout
            && !risk.affects_revenue
        {
            return Decision::AutoFix;
        }
        Decision::RequiresApproval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risk(tier: RiskTier, affects_checkout: bool, affects_revenue: bool) -> RiskAssessment {
        RiskAssessment {
            tier,
            affects_checkout,
            affects_revenue,
        }
    }

    fn diagnosis(confidence: f64) -> Diagnosis {
        Diagnosis::new("theme_issue", confidence, "stable hypothesis")
    }

    #[test]
    fn test_critical_forces_escalation_even_at_full_confidence() {
        let policy = DecisionPolicy::default();
        let decision = policy.decide(&risk(RiskTier::Critical, false, false), &diagnosis(0.99));
        assert_eq!(decision, Decision::ForceEscalate);
        assert!(decision.requires_approval());
    }

    #[test]
    fn test_auto_fix_needs_low_tier_and_strict_confidence_and_no_flags() {
        let policy = DecisionPolicy::default();
        assert_eq!(
            policy.decide(&risk(RiskTier::Low, false, false), &diagnosis(0.9)),
            Decision::AutoFix
        );
    }

    #[test]
    fn test_no_auto_fix_at_exact_threshold() {
        let policy = DecisionPolicy::default();
        assert_eq!(
            policy.decide(&risk(RiskTier::Low, false, false), &diagnosis(0.85)),
            Decision::RequiresApproval
        );
        assert_eq!(
            policy.decide(&risk(RiskTier::Low, false, false), &diagnosis(0.8500001)),
            Decision::AutoFix
        );
    }

    #[test]
    fn test_impact_flags_bar_auto_fix() {
        let policy = DecisionPolicy::default();
        assert_eq!(
            policy.decide(&risk(RiskTier::Low, true, false), &diagnosis(0.95)),
            Decision::RequiresApproval
        );
        assert_eq!(
            policy.decide(&risk(RiskTier::Low, false, true), &diagnosis(0.95)),
            Decision::RequiresApproval
        );
    }

    #[test]
    fn test_non_low_tiers_require_approval() {
        let policy = DecisionPolicy::default();
        assert_eq!(
            policy.decide(&risk(RiskTier::Medium, false, false), &diagnosis(0.95)),
            Decision::RequiresApproval
        );
        assert_eq!(
            policy.decide(&risk(RiskTier::High, false, false), &diagnosis(0.95)),
            Decision::RequiresApproval
        );
    }

    #[test]
    fn test_decide_is_pure() {
        let policy = DecisionPolicy::default();
        let r = risk(RiskTier::Low, false, false);
        let d = diagnosis(0.9);
        let first = policy.decide(&r, &d);
        for _ in 0..1000 {
            assert_eq!(policy.decide(&r, &d), first);
        }
    }

    #[test]
    fn test_custom_threshold() {
        let policy = DecisionPolicy::new(0.5);
        assert_eq!(
            policy.decide(&risk(RiskTier::Low, false, false), &diagnosis(0.6)),
            Decision::AutoFix
        );
    }
}
