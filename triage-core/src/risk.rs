//! Risk scoring — deterministic rule table over diagnosis and cluster flags.
//!
//! [`RiskAssessor`] maps a diagnosis plus cluster anomaly flags to a risk
//! tier and the checkout/revenue impact flags. Precedence, first match
//! fixing the tier:
//!
//! 1. Volume spike → `critical`, regardless of diagnosis.
//! 2. Abnormal pattern → `high` floor.
//! 3. Payment/checkout root-cause category → impact flags set, `high` floor.
//! 4. Otherwise the confidence band: ≥ 0.85 low, 0.6–0.85 medium, below
//!    that high (low confidence is itself a risk).
//!
//! Impact flags are computed independently of which rule fixed the tier, so
//! a spiking payment cluster reports `critical` and both flags.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::diagnosis::Diagnosis;

/// Root-cause categories whose sessions always touch money paths.
pub const DEFAULT_PAYMENT_CATEGORIES: &[&str] = &["payment", "checkout", "billing"];

/// Cluster-label keywords implying checkout impact.
pub const DEFAULT_CHECKOUT_KEYWORDS: &[&str] = &[
    "checkout",
    "payment",
    "cart",
    "order",
    "transaction",
    "stripe",
    "paypal",
];

/// Cluster-label keywords implying revenue impact.
pub const DEFAULT_REVENUE_KEYWORDS: &[&str] =
    &["revenue", "sales", "money", "billing", "subscription"];

/// Ordinal severity classification. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Derived risk verdict for a session. Set together with the diagnosis and
/// never mutated afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub affects_checkout: bool,
    pub affects_revenue: bool,
}

/// Applies the rule table. Deterministic over its two inputs.
#[derive(Debug, Clone)]
pub struct RiskAssessor {
    payment_categories: Vec<String>,
    checkout_keywords: Vec<String>,
    revenue_keywords: Vec<String>,
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new(
            DEFAULT_PAYMENT_CATEGORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            DEFAULT_CHECKOUT_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            DEFAULT_REVENUE_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl RiskAssessor {
    pub fn new(
        payment_categories: Vec<String>,
        checkout_keywords: Vec<String>,
        revenue_keywords: Vec<String>,
    ) -> Self {
        Self {
            payment_categories: lowercase_all(payment_categories),
            checkout_keywords: lowercase_all(checkout_keywords),
            revenue_keywords: lowercase_all(revenue_keywords),
        }
    }

    pub fn assess(&self, diagnosis: &Diagnosis, cluster: &Cluster) -> RiskAssessment {
        let category = diagnosis.root_cause.to_lowercase();
        let label = cluster.label.to_lowercase();

        let payment_category = self
            .payment_categories
            .iter()
            .any(|entry| category_matches(&category, entry));
        let affects_checkout =
            payment_category || self.checkout_keywords.iter().any(|kw| label.contains(kw));
        let affects_revenue =
            payment_category || self.revenue_keywords.iter().any(|kw| label.contains(kw));

        let mut tier = confidence_band(diagnosis.confidence);
        if payment_category {
            tier = tier.max(RiskTier::High);
        }
        if cluster.abnormal_pattern {
            tier = tier.max(RiskTier::High);
        }
        if cluster.volume_spike {
            tier = RiskTier::Critical;
        }

        RiskAssessment {
            tier,
            affects_checkout,
            affects_revenue,
        }
    }
}

fn lowercase_all(entries: Vec<String>) -> Vec<String> {
    entries.into_iter().map(|e| e.to_lowercase()).collect()
}

/// Tier from confidence alone: ≥ 0.85 low, ≥ 0.6 medium, else high.
fn confidence_band(confidence: f64) -> RiskTier {
    if confidence >= 0.85 {
        RiskTier::Low
    } else if confidence >= 0.6 {
        RiskTier::Medium
    } else {
        RiskTier::High
    }
}

/// A category matches a configured entry on equality or when the entry
/// appears as a `_`/`-`/whitespace-separated token of the category, so
/// `payment_gateway_failure` matches `payment`.
fn category_matches(category: &str, entry: &str) -> bool {
    category == entry
        || category
            .split(['_', '-', ' '])
            .any(|token| token == entry)
}
