//! Merchant-submitted reports and batch validation.
//!
//! A [`Report`] is one ticket or error event captured during the platform
//! migration. Reports are immutable once created; the observe stage
//! normalizes and filters a submitted batch before clustering.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where in the migration timeline the reporting merchant currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    PreMigration,
    MidMigration,
    PostMigration,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreMigration => write!(f, "pre_migration"),
            Self::MidMigration => write!(f, "mid_migration"),
            Self::PostMigration => write!(f, "post_migration"),
        }
    }
}

/// Merchant-assigned priority tag.
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One merchant-submitted ticket or error event. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub merchant_id: String,
    pub subject: String,
    pub description: String,
    pub migration_stage: MigrationStage,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    /// Structured error code when the reporting surface captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Report {
    pub fn new(
        id: impl Into<String>,
        merchant_id: impl Into<String>,
        subject: impl Into<String>,
        description: impl Into<String>,
        migration_stage: MigrationStage,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            merchant_id: merchant_id.into(),
            subject: subject.into(),
            description: description.into(),
            migration_stage,
            priority,
            timestamp: Utc::now(),
            error_code: None,
        }
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Subject and description joined for text matching.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.subject, self.description)
    }
}

/// Normalize and filter a submitted batch.
///
/// Field whitespace is trimmed; reports left with an empty subject or
/// description are dropped, each with a recorded warning. The caller decides
/// whether an empty result is fatal.
pub fn validate_batch(reports: Vec<Report>) -> (Vec<Report>, Vec<String>) {
    let mut valid = Vec::with_capacity(reports.len());
    let mut warnings = Vec::new();

    for mut report in reports {
        report.subject = report.subject.trim().to_string();
        report.description = report.description.trim().to_string();

        if report.subject.is_empty() {
            warnings.push(format!("report {} dropped: empty subject", report.id));
            continue;
        }
        if report.description.is_empty() {
            warnings.push(format!("report {} dropped: empty description", report.id));
            continue;
        }
        valid.push(report);
    }

    (valid, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, subject: &str, description: &str) -> Report {
        Report::new(
            id,
            "merchant-1",
            subject,
            description,
            MigrationStage::PostMigration,
            Priority::Medium,
        )
    }

    #[test]
    fn test_validate_batch_keeps_valid_reports() {
        let (valid, warnings) = validate_batch(vec![
            report("r1", "Checkout broken", "500 on submit"),
            report("r2", "Webhooks delayed", "events arrive late"),
        ]);
        assert_eq!(valid.len(), 2);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_validate_batch_drops_blank_fields_with_warnings() {
        let (valid, warnings) = validate_batch(vec![
            report("r1", "  ", "500 on submit"),
            report("r2", "Webhooks delayed", "\t"),
            report("r3", "Cart errors", "intermittent"),
        ]);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].id, "r3");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("empty subject"));
        assert!(warnings[1].contains("empty description"));
    }

    #[test]
    fn test_validate_batch_trims_fields() {
        let (valid, _) = validate_batch(vec![report("r1", "  Checkout broken  ", " 500 ")]);
        assert_eq!(valid[0].subject, "Checkout broken");
        assert_eq!(valid[0].description, "500");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_report_serde_roundtrip() {
        let r = report("r1", "Checkout broken", "500 on submit").with_error_code("HTTP-500");
        let json = serde_json::to_string(&r).unwrap();
        let restored: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, "r1");
        assert_eq!(restored.error_code.as_deref(), Some("HTTP-500"));
        assert!(json.contains("post_migration"));
    }
}
