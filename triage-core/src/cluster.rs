//! Report clustering — pattern grouping and anomaly flags.
//!
//! [`ClusterEngine`] groups a submitted batch by shared error codes or
//! overlapping subject/description terms and returns the dominant group as
//! the session's [`Cluster`], flagging volume spikes and the dangerous
//! post-migration API-failure combination.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::report::{MigrationStage, Report};

/// Member count above which a cluster is treated as a volume spike.
pub const DEFAULT_VOLUME_SPIKE_THRESHOLD: usize = 50;

/// Text signatures marking an API-path failure. A post-migration report
/// matching any of these flags the cluster as an abnormal pattern.
pub const DEFAULT_FAILURE_SIGNATURES: &[&str] = &[
    "webhook",
    "api",
    "timeout",
    "503",
    "502",
    "gateway",
    "connection refused",
];

/// Matches structured error codes embedded in free text: vendor-prefixed
/// codes like `PAY-1102` and HTTP-style status mentions like `HTTP 503` or
/// `error 500`.
static CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Z]{2,6}-\d{2,5})\b|\b(?:http|error|status|code)\s*:?\s*(\d{3})\b")
        .unwrap()
});

/// Tokens shorter than this carry no grouping signal.
const MIN_TOKEN_LEN: usize = 3;

/// Shared-token count required for a report to join an existing group.
const GROUP_OVERLAP: usize = 2;

/// A grouping of reports sharing a detected pattern.
///
/// Created once per pipeline run; lives only inside its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Member report ids, ordered by arrival.
    pub member_ids: Vec<String>,
    /// Human-readable pattern summary, also used as the knowledge query.
    pub label: String,
    pub count: usize,
    /// Member count exceeded the configured threshold.
    pub volume_spike: bool,
    /// Post-migration report matching an API-failure signature.
    pub abnormal_pattern: bool,
}

impl Cluster {
    /// The cluster produced for an empty batch: no members, no flags.
    pub fn empty() -> Self {
        Self {
            member_ids: Vec::new(),
            label: String::new(),
            count: 0,
            volume_spike: false,
            abnormal_pattern: false,
        }
    }
}

/// Groups reports and derives anomaly flags. Pure over its input batch.
#[derive(Debug, Clone)]
pub struct ClusterEngine {
    volume_spike_threshold: usize,
    failure_signatures: Vec<String>,
}

impl Default for ClusterEngine {
    fn default() -> Self {
        Self {
            volume_spike_threshold: DEFAULT_VOLUME_SPIKE_THRESHOLD,
            failure_signatures: DEFAULT_FAILURE_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ClusterEngine {
    pub fn new(volume_spike_threshold: usize, failure_signatures: Vec<String>) -> Self {
        Self {
            volume_spike_threshold,
            failure_signatures: failure_signatures
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// Group a batch and return the dominant cluster.
    ///
    /// Reports with the same error code (structured, or recovered from
    /// text) group directly; the rest group by token overlap. The largest
    /// group wins; ties go to the group whose earliest-timestamp member is
    /// oldest. An empty batch yields [`Cluster::empty`].
    pub fn cluster(&self, reports: &[Report]) -> Cluster {
        if reports.is_empty() {
            return Cluster::empty();
        }

        let groups = group_reports(reports);
        let dominant = select_dominant(&groups, reports);
        let members: Vec<&Report> = dominant.iter().map(|&i| &reports[i]).collect();

        let count = members.len();
        let volume_spike = count > self.volume_spike_threshold;
        let abnormal_pattern = members.iter().any(|r| {
            r.migration_stage == MigrationStage::PostMigration && self.matches_signature(r)
        });

        Cluster {
            member_ids: members.iter().map(|r| r.id.clone()).collect(),
            label: group_label(&members),
            count,
            volume_spike,
            abnormal_pattern,
        }
    }

    fn matches_signature(&self, report: &Report) -> bool {
        let text = report.combined_text().to_lowercase();
        self.failure_signatures.iter().any(|sig| text.contains(sig))
    }
}

/// Structured error code, or one recovered from the report text.
pub fn effective_error_code(report: &Report) -> Option<String> {
    if let Some(code) = &report.error_code {
        let code = code.trim();
        if !code.is_empty() {
            return Some(code.to_uppercase());
        }
    }
    CODE_PATTERN.captures(&report.combined_text()).map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_uppercase())
            .unwrap_or_default()
    })
}

fn tokens(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
    {
        if !seen.iter().any(|s| s == token) {
            seen.push(token.to_string());
        }
    }
    seen
}

/// Candidate groups as index lists into the input batch, in creation order.
fn group_reports(reports: &[Report]) -> Vec<Vec<usize>> {
    let mut code_groups: HashMap<String, Vec<usize>> = HashMap::new();
    let mut code_order: Vec<String> = Vec::new();
    let mut token_groups: Vec<(Vec<String>, Vec<usize>)> = Vec::new();

    for (idx, report) in reports.iter().enumerate() {
        if let Some(code) = effective_error_code(report) {
            if !code_groups.contains_key(&code) {
                code_order.push(code.clone());
            }
            code_groups.entry(code).or_default().push(idx);
            continue;
        }

        let report_tokens = tokens(&report.combined_text());
        let joined = token_groups.iter_mut().find(|(group_tokens, _)| {
            report_tokens
                .iter()
                .filter(|t| group_tokens.contains(t))
                .count()
                >= GROUP_OVERLAP
        });
        match joined {
            Some((group_tokens, members)) => {
                for t in report_tokens {
                    if !group_tokens.contains(&t) {
                        group_tokens.push(t);
                    }
                }
                members.push(idx);
            }
            None => token_groups.push((report_tokens, vec![idx])),
        }
    }

    let mut groups: Vec<Vec<usize>> = code_order
        .into_iter()
        .filter_map(|code| code_groups.remove(&code))
        .collect();
    groups.extend(token_groups.into_iter().map(|(_, members)| members));
    groups
}

/// Largest group; ties broken by the earliest-timestamp anchor report.
fn select_dominant(groups: &[Vec<usize>], reports: &[Report]) -> Vec<usize> {
    groups
        .iter()
        .max_by(|a, b| {
            a.len().cmp(&b.len()).then_with(|| {
                let anchor_a = a.iter().map(|&i| reports[i].timestamp).min();
                let anchor_b = b.iter().map(|&i| reports[i].timestamp).min();
                // Earlier anchor wins, so compare reversed.
                anchor_b.cmp(&anchor_a)
            })
        })
        .cloned()
        .unwrap_or_default()
}

/// Label from the shared error code or the most frequent member terms.
fn group_label(members: &[&Report]) -> String {
    let code = members.iter().find_map(|r| effective_error_code(r));

    let mut freq: HashMap<String, usize> = HashMap::new();
    for report in members {
        for token in tokens(&report.combined_text()) {
            *freq.entry(token).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let terms: Vec<String> = ranked.into_iter().take(3).map(|(t, _)| t).collect();

    match code {
        Some(code) if terms.is_empty() => format!("error {code}"),
        Some(code) => format!("error {code}: {}", terms.join(" ")),
        None => terms.join(" "),
    }
}
