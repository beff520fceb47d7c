//! Prompt builder: short system message + numbered evidence block.

use crate::api_types::EvidencePassage;

/// Default system instructions for free-text answers.
///
/// Keep this short: it consistently improves steering without wasting tokens.
pub const DEFAULT_SYSTEM: &str = r#"
You are a precise document analyst. Answer using only the provided evidence passages.
Cite every supported claim with its tag, e.g. [Evidence #2]. If the evidence is insufficient, say so.
"#;

/// System instructions for the `contract_response` template.
pub const CONTRACT_SYSTEM: &str = r#"
You are an expert contract analyst. Write concise, professional outputs.
Use only the provided evidence passages and attach [Evidence #n] tags where each claim is supported.
Output exactly three sections, in this order, each starting with its heading on its own line:
Executive Summary:
Risk Checklist:
Response Draft:
Risk checklist items: liability cap, termination, jurisdiction, SLA/penalties, IP/data protection.
"#;

/// Prepended to the system message when evidence is weak.
pub const LOW_EVIDENCE_SYSTEM: &str =
    "Evidence may be insufficient; be cautious and state clearly what is not supported.";

/// Formats the marker used in prompts and expected back in answers.
pub fn evidence_marker(n: usize) -> String {
    format!("[Evidence #{n}]")
}

/// System message for the given template and evidence state.
pub fn system_prompt(base: &str, low_evidence: bool) -> String {
    if low_evidence {
        format!("{LOW_EVIDENCE_SYSTEM}\n{}", base.trim())
    } else {
        base.trim().to_string()
    }
}

/// Build final user prompt with a numbered evidence section and char budget.
///
/// Passages are added in rank order until `max_chars` is spent; the last
/// one that does not fit is cut on a char boundary and the rest dropped.
/// Returns the prompt and how many passages were (at least partly) included.
///
/// # Example
/// ```
/// # use contextor::prompt::build_user_prompt;
/// let (prompt, used) = build_user_prompt("How to X?", &[], 2000);
/// assert!(prompt.contains("Question:"));
/// assert_eq!(used, 0);
/// ```
pub fn build_user_prompt(
    question: &str,
    evidence: &[EvidencePassage],
    max_chars: usize,
) -> (String, usize) {
    let mut out = String::new();
    out.push_str("Question:\n");
    out.push_str(question.trim());
    out.push_str("\n\n");

    let mut used = 0;
    if !evidence.is_empty() {
        out.push_str("Evidence passages (ranked):\n");
        let mut budget = max_chars;

        for p in evidence {
            let page = p.page.map(|n| format!(" page={n}")).unwrap_or_default();
            let header = format!(
                "{} (doc={} ord={}{page})\n",
                evidence_marker(p.marker),
                p.doc_id,
                p.ord
            );
            let text = p.text.trim();

            // stop if we exceed budget
            if header.len() >= budget {
                break;
            }
            out.push_str(&header);
            budget -= header.len();
            used += 1;

            let take = budget.saturating_sub(2);
            if text.len() > take {
                out.push_str(safe_truncate(text, take));
                out.push_str("\n…\n");
                break;
            } else {
                out.push_str(text);
                out.push('\n');
                budget -= text.len() + 1;
            }
        }
        out.push('\n');
        out.push_str("Answer using only the evidence above and cite it with its [Evidence #n] tag.\n");
    }

    (out, used)
}

fn safe_truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn passage(marker: usize, text: &str) -> EvidencePassage {
        EvidencePassage {
            marker,
            id: format!("c{marker}"),
            doc_id: "contract-7".into(),
            ord: marker as i64,
            page: Some(2),
            text: text.into(),
            snippet: None,
            category: None,
            distance: Some(0.2),
            fused_score: 0.03,
            rerank_score: None,
        }
    }

    #[test]
    fn evidence_is_numbered_in_order() {
        let ev = vec![passage(1, "Liability is capped."), passage(2, "Term is 12 months.")];
        let (p, used) = build_user_prompt("What is the cap?", &ev, 10_000);
        assert_eq!(used, 2);
        let i1 = p.find("[Evidence #1] (doc=contract-7 ord=1 page=2)").unwrap();
        let i2 = p.find("[Evidence #2]").unwrap();
        assert!(i1 < i2);
        assert!(p.contains("Liability is capped."));
    }

    #[test]
    fn budget_cuts_evidence() {
        let long = "é".repeat(500);
        let ev = vec![passage(1, &long), passage(2, "never shown")];
        let (p, used) = build_user_prompt("q", &ev, 200);
        assert_eq!(used, 1);
        assert!(!p.contains("never shown"));
        assert!(p.contains('…'));
    }

    #[test]
    fn low_evidence_prefixes_system() {
        let s = system_prompt(DEFAULT_SYSTEM, true);
        assert!(s.starts_with(LOW_EVIDENCE_SYSTEM));
        assert_eq!(system_prompt("  base  ", false), "base");
    }
}
