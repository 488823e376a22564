//! Merge-or-create resolution of candidates against existing memories.
//!
//! The resolver never mutates its inputs: every operation hands back new
//! records and the audit entries describing them, and the caller decides
//! what to persist.

use chrono::Utc;
use memory_ledger_schemas::{
    clamp_unit, dedup_evidence, generate_memory_id, generate_proposal_id, AuditEntry, AuditType,
    CandidateInsight, Category, MatchReason, MemoryId, MemoryRecord, MemoryStatus, Proposal,
    ProposalStatus, SimilarityMatch, MAX_LAYER,
};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::candidate::effective_confidence;
use crate::config::ConsolidationConfig;
use crate::error::{Error, Result};
use crate::similarity::combined;

const EXISTING_WEIGHT: f64 = 0.6;
const PROPOSAL_WEIGHT: f64 = 0.4;
const EVIDENCE_WEIGHT: f64 = 0.1;
/// Evidence count at which the evidence bonus saturates.
const EVIDENCE_SATURATION: f64 = 5.0;
/// Layer for created records whose candidate proposes none.
const DEFAULT_LAYER: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationAction {
    Merged,
    Created,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationOutcome {
    pub action: ConsolidationAction,
    /// The merged or newly created record.
    pub record: MemoryRecord,
    /// Every match above the category threshold, best first.
    pub matches: Vec<SimilarityMatch>,
    pub audit: AuditEntry,
}

/// Result of consolidating several candidates in sequence.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// The full memory collection after every candidate was applied.
    pub records: Vec<MemoryRecord>,
    pub audit: Vec<AuditEntry>,
    pub merged: usize,
    pub created: usize,
}

/// Outcome of routing a candidate through review.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", content = "result", rename_all = "camelCase")]
pub enum Triage {
    AutoMerged(ConsolidationOutcome),
    Queued(Proposal),
}

#[derive(Debug, Clone)]
pub struct Approval {
    pub outcome: ConsolidationOutcome,
    pub proposal: Proposal,
}

/// A declined proposal and the audit entry recording it. No record changes.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub proposal: Proposal,
    pub audit: AuditEntry,
}

/// Active records similar to the candidate, best first.
///
/// Records that are missing, inactive, blank, or (when the candidate has a
/// category) in a different category never match.
pub fn find_similar<'a, I, R>(
    candidate: &CandidateInsight,
    existing: I,
    threshold: f64,
) -> Vec<SimilarityMatch>
where
    I: IntoIterator<Item = R>,
    R: Into<Option<&'a MemoryRecord>>,
{
    let content = candidate.proposed_record.content.trim();
    if content.is_empty() {
        return vec![];
    }
    let category = candidate.proposed_record.category;

    let mut matches: Vec<SimilarityMatch> = existing
        .into_iter()
        .filter_map(|entry| {
            let record = entry.into()?;
            if !record.is_active() || record.content.trim().is_empty() {
                return None;
            }
            if category.is_some_and(|c| c != record.category) {
                return None;
            }

            let similarity = combined(content, &record.content);
            (similarity >= threshold).then(|| SimilarityMatch {
                record_id: record.id.clone(),
                similarity,
                reason: MatchReason::for_similarity(similarity),
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    matches
}

/// Confidence of a record after absorbing a candidate.
///
/// Never exceeds 1 and never decreases as `evidence_count` grows.
pub fn merged_confidence(
    existing: &MemoryRecord,
    candidate: &CandidateInsight,
    evidence_count: usize,
) -> f64 {
    let existing_confidence = clamp_unit(existing.confidence, 0.5);
    let proposal_weight =
        effective_confidence(candidate) * clamp_unit(candidate.evidence_strength, 0.5);
    let evidence_bonus = (evidence_count as f64 / EVIDENCE_SATURATION).min(1.0);

    let merged = existing_confidence * EXISTING_WEIGHT
        + proposal_weight * PROPOSAL_WEIGHT
        + evidence_bonus * EVIDENCE_WEIGHT;
    merged.clamp(0.0, 1.0)
}

pub struct Consolidator {
    config: ConsolidationConfig,
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new(ConsolidationConfig::default())
    }
}

impl Consolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// `find_similar` at the configured threshold for the candidate's category.
    pub fn find_matches<'a, I, R>(&self, candidate: &CandidateInsight, existing: I) -> Vec<SimilarityMatch>
    where
        I: IntoIterator<Item = R>,
        R: Into<Option<&'a MemoryRecord>>,
    {
        let threshold = self.config.threshold_for(candidate.proposed_record.category);
        find_similar(candidate, existing, threshold)
    }

    /// Merge the candidate into its best match when that match clears the
    /// auto-merge threshold, otherwise create a new record.
    pub fn consolidate<'a, I, R>(&self, candidate: &CandidateInsight, existing: I) -> ConsolidationOutcome
    where
        I: IntoIterator<Item = R>,
        R: Into<Option<&'a MemoryRecord>>,
    {
        let records: Vec<&MemoryRecord> = existing.into_iter().filter_map(Into::into).collect();
        let matches = self.find_matches(candidate, records.iter().copied());

        match self.auto_merge_target(&matches, &records) {
            Some((target, similarity)) => {
                self.merge_outcome(target, candidate, similarity, matches, AuditType::Consolidation, false)
            }
            None => self.create_outcome(candidate, matches, AuditType::Consolidation, false),
        }
    }

    /// Consolidate candidates one after another, each seeing the records
    /// produced by the ones before it.
    pub fn consolidate_batch(
        &self,
        candidates: &[CandidateInsight],
        existing: &[MemoryRecord],
    ) -> BatchOutcome {
        let mut batch = BatchOutcome {
            records: existing.to_vec(),
            ..Default::default()
        };

        for candidate in candidates {
            let outcome = self.consolidate(candidate, batch.records.iter());
            match outcome.action {
                ConsolidationAction::Merged => {
                    batch.merged += 1;
                    if let Some(slot) = batch.records.iter_mut().find(|r| r.id == outcome.record.id) {
                        *slot = outcome.record;
                    }
                }
                ConsolidationAction::Created => {
                    batch.created += 1;
                    batch.records.push(outcome.record);
                }
            }
            batch.audit.push(outcome.audit);
        }

        info!(
            "Consolidated {} candidates: {} merged, {} created",
            candidates.len(),
            batch.merged,
            batch.created
        );
        batch
    }

    /// Auto-merge clear duplicates; queue everything else for human review
    /// with its matches attached.
    pub fn triage<'a, I, R>(&self, candidate: &CandidateInsight, existing: I) -> Triage
    where
        I: IntoIterator<Item = R>,
        R: Into<Option<&'a MemoryRecord>>,
    {
        let records: Vec<&MemoryRecord> = existing.into_iter().filter_map(Into::into).collect();
        let matches = self.find_matches(candidate, records.iter().copied());

        if let Some((target, similarity)) = self.auto_merge_target(&matches, &records) {
            return Triage::AutoMerged(self.merge_outcome(
                target,
                candidate,
                similarity,
                matches,
                AuditType::Consolidation,
                false,
            ));
        }

        let mut insight = candidate.clone();
        insight.similarity_matches = Some(matches);
        debug!("Queued candidate for review: {}", insight.summary);

        Triage::Queued(Proposal {
            id: generate_proposal_id(),
            insight,
            status: ProposalStatus::Pending,
            created_at: Utc::now().to_rfc3339(),
            resolved_at: None,
        })
    }

    /// Apply a reviewer's approval: merge into `merge_target` when given,
    /// otherwise create. The resulting record is marked human-confirmed.
    pub fn approve(
        &self,
        proposal: &Proposal,
        existing: &[MemoryRecord],
        merge_target: Option<&MemoryId>,
    ) -> Result<Approval> {
        if proposal.status != ProposalStatus::Pending {
            return Err(Error::ProposalNotPending(proposal.id.clone()));
        }

        let candidate = &proposal.insight;
        let matches = candidate.similarity_matches.clone().unwrap_or_default();

        let outcome = match merge_target {
            Some(target_id) => {
                let target = existing
                    .iter()
                    .find(|r| &r.id == target_id && r.is_active())
                    .ok_or_else(|| Error::UnknownTarget(target_id.clone()))?;
                let similarity = combined(&candidate.proposed_record.content, &target.content);
                self.merge_outcome(target, candidate, similarity, matches, AuditType::ManualOverride, true)
            }
            None => self.create_outcome(candidate, matches, AuditType::ManualOverride, true),
        };

        let mut resolved = proposal.clone();
        resolved.status = ProposalStatus::Approved;
        resolved.resolved_at = Some(Utc::now().to_rfc3339());

        Ok(Approval {
            outcome,
            proposal: resolved,
        })
    }

    pub fn reject(&self, proposal: &Proposal) -> Result<Rejection> {
        if proposal.status != ProposalStatus::Pending {
            return Err(Error::ProposalNotPending(proposal.id.clone()));
        }

        let mut resolved = proposal.clone();
        resolved.status = ProposalStatus::Rejected;
        resolved.resolved_at = Some(Utc::now().to_rfc3339());

        let audit = AuditEntry::new(
            AuditType::ManualOverride,
            format!(
                "Rejected proposal {}: \"{}\"",
                proposal.id, proposal.insight.proposed_record.content
            ),
            vec![proposal.id.0.clone()],
        );
        info!("Rejected proposal {}", proposal.id);

        Ok(Rejection {
            proposal: resolved,
            audit,
        })
    }

    fn auto_merge_target<'a>(
        &self,
        matches: &[SimilarityMatch],
        records: &[&'a MemoryRecord],
    ) -> Option<(&'a MemoryRecord, f64)> {
        let best = matches.first()?;
        if best.similarity < self.config.auto_merge_threshold {
            return None;
        }
        records
            .iter()
            .find(|r| r.id == best.record_id)
            .map(|r| (*r, best.similarity))
    }

    fn merge_outcome(
        &self,
        existing: &MemoryRecord,
        candidate: &CandidateInsight,
        similarity: f64,
        matches: Vec<SimilarityMatch>,
        audit_type: AuditType,
        confirmed: bool,
    ) -> ConsolidationOutcome {
        let mut evidence = dedup_evidence(
            existing
                .evidence
                .iter()
                .chain(candidate.evidence_context.iter())
                .cloned(),
            usize::MAX,
        );
        let evidence_count = evidence.len();
        if evidence.len() > self.config.max_evidence {
            evidence.drain(..evidence.len() - self.config.max_evidence);
        }

        let mut record = existing.clone();
        record.confidence = merged_confidence(existing, candidate, evidence_count);
        record.evidence = evidence;
        record.layer = candidate
            .proposed_record
            .layer
            .map_or(existing.layer, |l| existing.layer.max(l))
            .min(MAX_LAYER);

        let proposed_content = candidate.proposed_record.content.trim();
        if effective_confidence(candidate) > existing.confidence && !proposed_content.is_empty() {
            record.content = proposed_content.to_string();
        }
        record.confirmed_by_human |= confirmed;
        record.updated_at = Utc::now().to_rfc3339();

        debug!(
            "Merged candidate into {} (similarity {:.3}, confidence {:.3} -> {:.3})",
            record.id, similarity, existing.confidence, record.confidence
        );

        let audit = AuditEntry::new(
            audit_type,
            format!(
                "Merged \"{}\" into memory {} (similarity {:.2})",
                candidate.summary, record.id, similarity
            ),
            vec![record.id.0.clone()],
        );

        ConsolidationOutcome {
            action: ConsolidationAction::Merged,
            record,
            matches,
            audit,
        }
    }

    fn create_outcome(
        &self,
        candidate: &CandidateInsight,
        matches: Vec<SimilarityMatch>,
        audit_type: AuditType,
        confirmed: bool,
    ) -> ConsolidationOutcome {
        let now = Utc::now().to_rfc3339();
        let proposed = &candidate.proposed_record;

        let record = MemoryRecord {
            id: generate_memory_id(),
            content: proposed.content.trim().to_string(),
            category: proposed.category.unwrap_or(Category::Context),
            layer: proposed.layer.unwrap_or(DEFAULT_LAYER).min(MAX_LAYER),
            confidence: proposed
                .confidence
                .map_or(self.config.default_confidence, |c| {
                    clamp_unit(c, self.config.default_confidence)
                }),
            evidence: dedup_evidence(candidate.evidence_context.iter().cloned(), self.config.max_evidence),
            status: MemoryStatus::Active,
            created_at: now.clone(),
            updated_at: now,
            confirmed_by_human: confirmed,
        };

        debug!("Created memory {} ({})", record.id, record.category);

        let audit = AuditEntry::new(
            audit_type,
            format!("Created memory {}: \"{}\"", record.id, candidate.summary),
            vec![record.id.0.clone()],
        );

        ConsolidationOutcome {
            action: ConsolidationAction::Created,
            record,
            matches,
            audit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_ledger_schemas::ProposedRecord;

    fn record(content: &str, category: Category, confidence: f64) -> MemoryRecord {
        MemoryRecord {
            id: generate_memory_id(),
            content: content.to_string(),
            category,
            layer: 2,
            confidence,
            evidence: vec!["original snippet".to_string()],
            status: MemoryStatus::Active,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            confirmed_by_human: false,
        }
    }

    fn candidate(content: &str, category: Option<Category>, confidence: f64) -> CandidateInsight {
        CandidateInsight {
            summary: content.to_string(),
            reasoning: None,
            proposed_record: ProposedRecord {
                content: content.to_string(),
                category,
                layer: Some(3),
                confidence: Some(confidence),
            },
            evidence_context: vec!["new snippet".to_string()],
            confidence,
            quality_score: 0.7,
            evidence_strength: 0.8,
            similarity_matches: None,
        }
    }

    #[test]
    fn test_find_similar_skips_missing_and_inactive() {
        let active = record("Loves hiking in the mountains", Category::Preference, 0.7);
        let mut archived = active.clone();
        archived.id = generate_memory_id();
        archived.status = MemoryStatus::Archived;

        let existing = vec![None, Some(archived), Some(active.clone())];
        let cand = candidate("Loves hiking in the mountains", Some(Category::Preference), 0.9);

        let matches = find_similar(&cand, existing.iter().map(Option::as_ref), 0.5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].record_id, active.id);
        assert_eq!(matches[0].reason, MatchReason::NearDuplicate);
    }

    #[test]
    fn test_find_similar_respects_category() {
        let existing = vec![record("Loves hiking in the mountains", Category::Habit, 0.7)];
        let cand = candidate("Loves hiking in the mountains", Some(Category::Preference), 0.9);
        assert!(find_similar(&cand, &existing, 0.1).is_empty());

        let uncategorized = candidate("Loves hiking in the mountains", None, 0.9);
        assert_eq!(find_similar(&uncategorized, &existing, 0.1).len(), 1);
    }

    #[test]
    fn test_find_similar_sorted_descending() {
        let existing = vec![
            record("Loves hiking", Category::Preference, 0.7),
            record("Loves hiking in the mountains", Category::Preference, 0.7),
        ];
        let cand = candidate("Loves hiking in the mountains", Some(Category::Preference), 0.9);
        let matches = find_similar(&cand, &existing, 0.0);
        assert_eq!(matches.len(), 2);
        assert!(matches[0].similarity >= matches[1].similarity);
        assert_eq!(matches[0].record_id, existing[1].id);
    }

    #[test]
    fn test_find_similar_drops_records_below_threshold() {
        let below = record("Loves hiking", Category::Preference, 0.7);
        let above = record("Loves hiking in", Category::Preference, 0.7);
        let cand = candidate("Loves hiking in the mountains", Some(Category::Preference), 0.9);

        // combined scores are roughly 0.50 and 0.65
        let matches = find_similar(&cand, &[below, above.clone()], 0.6);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].record_id, above.id);
        assert!(matches.iter().all(|m| m.similarity >= 0.6));
    }

    #[test]
    fn test_merged_confidence_formula() {
        let existing = record("Speaks French", Category::Skill, 0.5);
        let cand = candidate("Speaks French", Some(Category::Skill), 1.0);
        // 0.5 * 0.6 + (1.0 * 0.8) * 0.4 + (2 / 5) * 0.1
        let expected = 0.3 + 0.32 + 0.04;
        assert!((merged_confidence(&existing, &cand, 2) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_merged_confidence_bounded_and_monotonic() {
        let existing = record("Speaks French", Category::Skill, 1.0);
        let mut cand = candidate("Speaks French", Some(Category::Skill), 1.0);
        cand.evidence_strength = 1.0;

        let mut previous = 0.0;
        for count in 0..20 {
            let value = merged_confidence(&existing, &cand, count);
            assert!(value <= 1.0);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_consolidate_merges_near_duplicate() {
        let existing = vec![record("Works as a nurse in Boston", Category::Identity, 0.6)];
        let cand = candidate("Works as a nurse in Boston", Some(Category::Identity), 0.9);

        let outcome = Consolidator::default().consolidate(&cand, &existing);
        assert_eq!(outcome.action, ConsolidationAction::Merged);
        assert_eq!(outcome.record.id, existing[0].id);
        assert_eq!(outcome.record.layer, 3);
        assert_eq!(
            outcome.record.evidence,
            vec!["original snippet".to_string(), "new snippet".to_string()]
        );
        assert_eq!(outcome.audit.entry_type, AuditType::Consolidation);
        assert_eq!(outcome.audit.affected_record_ids, vec![existing[0].id.0.clone()]);
        // input untouched
        assert_eq!(existing[0].confidence, 0.6);
    }

    #[test]
    fn test_merge_keeps_content_unless_candidate_more_confident() {
        let existing = vec![record("Works as a nurse in Boston", Category::Identity, 0.95)];
        let cand = candidate("works as a nurse in boston", Some(Category::Identity), 0.5);

        let outcome = Consolidator::default().consolidate(&cand, &existing);
        assert_eq!(outcome.action, ConsolidationAction::Merged);
        assert_eq!(outcome.record.content, "Works as a nurse in Boston");
    }

    #[test]
    fn test_merge_caps_evidence() {
        let mut existing = record("Plays the violin", Category::Skill, 0.7);
        existing.evidence = (0..10).map(|i| format!("snippet {}", i)).collect();
        let cand = candidate("Plays the violin", Some(Category::Skill), 0.7);

        let outcome = Consolidator::default().consolidate(&cand, &[existing]);
        assert_eq!(outcome.record.evidence.len(), 8);
        assert_eq!(outcome.record.evidence.last().map(String::as_str), Some("new snippet"));
    }

    #[test]
    fn test_consolidate_creates_when_no_match() {
        let existing = vec![record("Allergic to peanuts", Category::Context, 0.9)];
        let mut cand = candidate("Training for a marathon", Some(Category::Goal), 0.7);
        cand.proposed_record.confidence = None;

        let outcome = Consolidator::default().consolidate(&cand, &existing);
        assert_eq!(outcome.action, ConsolidationAction::Created);
        assert_ne!(outcome.record.id, existing[0].id);
        assert!(outcome.record.id.0.starts_with("mem_"));
        assert_eq!(outcome.record.confidence, 0.8);
        assert_eq!(outcome.record.status, MemoryStatus::Active);
        assert!(!outcome.record.confirmed_by_human);
    }

    #[test]
    fn test_batch_does_not_double_create() {
        let candidates = vec![
            candidate("Learning to play the cello", Some(Category::Goal), 0.7),
            candidate("Learning to play the cello", Some(Category::Goal), 0.8),
        ];

        let batch = Consolidator::default().consolidate_batch(&candidates, &[]);
        assert_eq!(batch.created, 1);
        assert_eq!(batch.merged, 1);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.audit.len(), 2);
    }

    #[test]
    fn test_triage_queues_moderate_match() {
        let existing = vec![record("Enjoys cooking Italian food", Category::Preference, 0.7)];
        let cand = candidate("Enjoys cooking Italian food on weekends", Some(Category::Preference), 0.7);
        let consolidator = Consolidator::default();

        let matches = consolidator.find_matches(&cand, &existing);
        assert!(matches.first().map_or(true, |m| m.similarity < 0.85));

        match consolidator.triage(&cand, &existing) {
            Triage::Queued(proposal) => {
                assert_eq!(proposal.status, ProposalStatus::Pending);
                assert!(proposal.id.0.starts_with("prop_"));
                assert_eq!(proposal.insight.similarity_matches, Some(matches));
            }
            Triage::AutoMerged(_) => panic!("expected a queued proposal"),
        }
    }

    #[test]
    fn test_approve_merges_into_chosen_target() {
        let existing = vec![record("Enjoys cooking Italian food", Category::Preference, 0.7)];
        let cand = candidate("Enjoys cooking Italian food on weekends", Some(Category::Preference), 0.9);
        let consolidator = Consolidator::default();

        let Triage::Queued(proposal) = consolidator.triage(&cand, &existing) else {
            panic!("expected a queued proposal");
        };

        let approval = consolidator
            .approve(&proposal, &existing, Some(&existing[0].id))
            .unwrap();
        assert_eq!(approval.outcome.action, ConsolidationAction::Merged);
        assert!(approval.outcome.record.confirmed_by_human);
        assert_eq!(approval.outcome.audit.entry_type, AuditType::ManualOverride);
        assert_eq!(approval.proposal.status, ProposalStatus::Approved);
        assert!(approval.proposal.resolved_at.is_some());

        let again = consolidator.approve(&approval.proposal, &existing, None);
        assert!(matches!(again, Err(Error::ProposalNotPending(_))));
    }

    #[test]
    fn test_approve_unknown_target() {
        let cand = candidate("Owns a cat named Miso", Some(Category::Relationship), 0.9);
        let consolidator = Consolidator::default();
        let Triage::Queued(proposal) = consolidator.triage(&cand, &[] as &[MemoryRecord]) else {
            panic!("expected a queued proposal");
        };

        let missing = MemoryId("mem_missing".to_string());
        let result = consolidator.approve(&proposal, &[], Some(&missing));
        assert!(matches!(result, Err(Error::UnknownTarget(_))));

        let created = consolidator.approve(&proposal, &[], None).unwrap();
        assert_eq!(created.outcome.action, ConsolidationAction::Created);
        assert!(created.outcome.record.confirmed_by_human);
    }

    #[test]
    fn test_reject() {
        let cand = candidate("Dislikes crowds", Some(Category::Preference), 0.6);
        let consolidator = Consolidator::default();
        let Triage::Queued(proposal) = consolidator.triage(&cand, &[] as &[MemoryRecord]) else {
            panic!("expected a queued proposal");
        };

        let rejection = consolidator.reject(&proposal).unwrap();
        assert_eq!(rejection.proposal.status, ProposalStatus::Rejected);
        assert!(rejection.proposal.resolved_at.is_some());
        assert_eq!(rejection.audit.entry_type, AuditType::ManualOverride);
        assert_eq!(rejection.audit.affected_record_ids, vec![proposal.id.0.clone()]);
        assert!(consolidator.reject(&rejection.proposal).is_err());
    }
}
