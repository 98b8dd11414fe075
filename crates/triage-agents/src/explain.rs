//! Internal explanation rendering for triaged sessions.
//!
//! One markdown document per session, assembled from whatever stages the
//! session reached. The text is for support staff and reviewers only and
//! is never shown to the reporting merchant.

use triage_core::Session;

/// Render the full audit explanation for a session.
///
/// Section order is fixed; sections for stages the session never reached
/// fall back to a one-line note rather than disappearing.
pub fn render_explanation(session: &Session) -> String {
    let mut md = format!(
        "## Triage Summary\n\n\
         - **Session:** {}\n\
         - **Status:** {}\n\
         - **Reports:** {}\n",
        session.id,
        session.status,
        session.reports.len(),
    );

    md.push_str("\n### Patterns Observed\n");
    match &session.cluster {
        Some(cluster) => {
            md.push_str(&format!(
                "- **Dominant cluster:** {} ({} of {} reports)\n",
                cluster.label,
                cluster.count,
                session.reports.len(),
            ));
            let mut flags = Vec::new();
            if cluster.volume_spike {
                flags.push("volume spike");
            }
            if cluster.abnormal_pattern {
                flags.push("abnormal post-migration pattern");
            }
            md.push_str(&format!(
                "- **Anomaly flags:** {}\n",
                if flags.is_empty() {
                    "none".to_string()
                } else {
                    flags.join(", ")
                }
            ));
        }
        None => md.push_str("No cluster computed.\n"),
    }

    md.push_str("\n### Knowledge Used\n");
    let evidence = session
        .diagnosis
        .as_ref()
        .map(|d| d.evidence.as_slice())
        .unwrap_or(&[]);
    if evidence.is_empty() {
        md.push_str("No documents retrieved.\n");
    } else {
        for doc in evidence {
            md.push_str(&format!(
                "- [{}] {} (score {:.2}): {}\n",
                doc.collection, doc.id, doc.score, doc.snippet
            ));
        }
    }

    md.push_str("\n### Root Cause Diagnosis\n");
    match &session.diagnosis {
        Some(diagnosis) => md.push_str(&format!(
            "- **Category:** {}\n\
             - **Confidence:** {:.2}\n\
             - **Reasoning:** {}\n",
            diagnosis.root_cause, diagnosis.confidence, diagnosis.reasoning
        )),
        None => md.push_str("No diagnosis recorded.\n"),
    }

    md.push_str("\n### Risk Assessment\n");
    match session.risk {
        Some(risk) => {
            md.push_str(&format!("- **Tier:** {}\n", risk.tier));
            let mut impact = Vec::new();
            if risk.affects_checkout {
                impact.push("checkout");
            }
            if risk.affects_revenue {
                impact.push("revenue");
            }
            md.push_str(&format!(
                "- **Impact flags:** {}\n",
                if impact.is_empty() {
                    "none".to_string()
                } else {
                    impact.join(", ")
                }
            ));
        }
        None => md.push_str("No risk assessment recorded.\n"),
    }

    md.push_str("\n### Chosen Action\n");
    match &session.action {
        Some(action) => md.push_str(&format!("- **Kind:** {}\n\n{}\n", action.kind, action.content)),
        None => md.push_str("No action proposed.\n"),
    }

    if let Some(resolution) = &session.resolution {
        md.push_str("\n### Review Outcome\n");
        let verdict = if resolution.approved {
            "approved"
        } else {
            "rejected"
        };
        md.push_str(&format!(
            "- **Reviewer verdict:** {verdict} at {}\n",
            resolution.resolved_at.format("%Y-%m-%d %H:%M UTC")
        ));
        if let Some(notes) = &resolution.notes {
            md.push_str(&format!("- **Notes:** {notes}\n"));
        }
    }

    if session
        .diagnosis
        .as_ref()
        .map_or(false, |d| d.is_uncertain())
    {
        md.push_str("\n### Uncertainty Notice\n");
        md.push_str(
            "Diagnosis confidence is below 0.60. Treat the root cause as a hypothesis and verify it before acting.\n",
        );
    }

    md
}
