//! Turns untrusted extraction output into `CandidateInsight`s.

use memory_ledger_schemas::{
    clamp_unit, dedup_evidence, CandidateInsight, Category, ProposedRecord, RawCandidate,
    DEFAULT_MAX_EVIDENCE, MAX_LAYER,
};
use tracing::{debug, warn};

use crate::quality::{quality_score, sanitize};

const SUMMARY_CHARS: usize = 120;

/// Build a candidate from raw extractor output.
///
/// Returns `None` when neither `content` nor `title` carries text. Every
/// numeric field is clamped, and an unrecognised category falls back to
/// `context`.
pub fn build_candidate(raw: &RawCandidate, evidence_context: &[String]) -> Option<CandidateInsight> {
    let content = non_blank(raw.content.as_deref()).or_else(|| non_blank(raw.title.as_deref()));
    let Some(content) = content else {
        debug!("Skipping candidate without content or title");
        return None;
    };

    let category = raw.category.as_deref().map(|name| {
        Category::parse(name).unwrap_or_else(|| {
            warn!("Unknown category: {}, defaulting to context", name);
            Category::Context
        })
    });

    let layer = raw
        .layer
        .filter(|l| l.is_finite())
        .map(|l| l.round().clamp(0.0, f64::from(MAX_LAYER)) as u8);

    let proposed_confidence = raw.confidence.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0));

    Some(CandidateInsight {
        summary: summarize(content),
        reasoning: raw.reasoning.clone(),
        proposed_record: ProposedRecord {
            content: content.to_string(),
            category,
            layer,
            confidence: proposed_confidence,
        },
        evidence_context: dedup_evidence(evidence_context.iter().cloned(), DEFAULT_MAX_EVIDENCE),
        confidence: sanitize(raw.confidence),
        quality_score: quality_score(
            raw.confidence,
            raw.evidence_strength,
            raw.quality_indicators.as_ref(),
        ),
        evidence_strength: sanitize(raw.evidence_strength),
        similarity_matches: None,
    })
}

/// Build candidates for a batch sharing one evidence context, dropping the
/// unusable ones.
pub fn build_candidates(raw: &[RawCandidate], evidence_context: &[String]) -> Vec<CandidateInsight> {
    raw.iter()
        .filter_map(|r| build_candidate(r, evidence_context))
        .collect()
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

fn summarize(content: &str) -> String {
    if content.chars().count() <= SUMMARY_CHARS {
        return content.to_string();
    }
    let mut summary: String = content.chars().take(SUMMARY_CHARS - 1).collect();
    summary.push('…');
    summary
}

/// Confidence as the resolver sees it: the candidate's own value, else the
/// neutral default.
pub(crate) fn effective_confidence(candidate: &CandidateInsight) -> f64 {
    clamp_unit(candidate.confidence, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(content: &str) -> RawCandidate {
        RawCandidate {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_candidate_is_dropped() {
        assert!(build_candidate(&raw("   "), &[]).is_none());
        assert!(build_candidate(&RawCandidate::default(), &[]).is_none());
    }

    #[test]
    fn test_title_used_when_content_missing() {
        let candidate = RawCandidate {
            title: Some("Plays chess".to_string()),
            ..Default::default()
        };
        let insight = build_candidate(&candidate, &[]).unwrap();
        assert_eq!(insight.proposed_record.content, "Plays chess");
    }

    #[test]
    fn test_fields_are_clamped() {
        let candidate = RawCandidate {
            content: Some("Lives in Lisbon".to_string()),
            category: Some("Nonsense".to_string()),
            layer: Some(9.7),
            confidence: Some(1.4),
            evidence_strength: Some(f64::NAN),
            ..Default::default()
        };

        let insight = build_candidate(&candidate, &["I moved to Lisbon".to_string()]).unwrap();
        assert_eq!(insight.proposed_record.category, Some(Category::Context));
        assert_eq!(insight.proposed_record.layer, Some(MAX_LAYER));
        assert_eq!(insight.proposed_record.confidence, Some(1.0));
        assert_eq!(insight.confidence, 1.0);
        assert_eq!(insight.evidence_strength, 0.5);
        assert!((0.0..=1.0).contains(&insight.quality_score));
        assert_eq!(insight.evidence_context, vec!["I moved to Lisbon".to_string()]);
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        let candidate = RawCandidate {
            content: Some("Values honesty".to_string()),
            category: Some("BELIEF".to_string()),
            ..Default::default()
        };
        let insight = build_candidate(&candidate, &[]).unwrap();
        assert_eq!(insight.proposed_record.category, Some(Category::Belief));
    }

    #[test]
    fn test_missing_confidence_stays_unset_on_record() {
        let insight = build_candidate(&raw("Drinks green tea"), &[]).unwrap();
        assert_eq!(insight.proposed_record.confidence, None);
        assert_eq!(insight.confidence, 0.5);
    }

    #[test]
    fn test_long_content_summary() {
        let insight = build_candidate(&raw(&"a".repeat(300)), &[]).unwrap();
        assert_eq!(insight.summary.chars().count(), SUMMARY_CHARS);
        assert!(insight.summary.ends_with('…'));
    }

    #[test]
    fn test_build_candidates_skips_invalid() {
        let batch = vec![raw("Runs marathons"), raw(""), raw("Learns Rust")];
        assert_eq!(build_candidates(&batch, &[]).len(), 2);
    }
}
