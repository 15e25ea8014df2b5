//! Suggestion ranking: knowledge gaps in, follow-up questions out.

use dg_domain::schemas::{GapType, KnowledgeGap, Suggestion};

/// The fixed question template for a gap type.
fn question_for(gap_type: GapType) -> &'static str {
    match gap_type {
        GapType::AmbiguousReference => {
            "Can you clarify exactly which concept your pronoun refers to?"
        }
        GapType::MissingPrerequisite => {
            "What prerequisite concept should we define first before this topic?"
        }
        GapType::WeakEvidence => "What evidence or source best supports this relationship?",
        GapType::UnresolvedBranch => {
            "Which branch should we expand next to make this knowledge path complete?"
        }
    }
}

/// Rank gaps by priority (highest first) into suggested questions, the
/// gap's description riding along as the reason. An empty input yields
/// exactly one default suggestion at priority 1.
pub fn rank(mut gaps: Vec<KnowledgeGap>) -> Vec<Suggestion> {
    gaps.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut suggestions: Vec<Suggestion> = gaps
        .into_iter()
        .map(|gap| Suggestion {
            question: question_for(gap.gap_type).to_owned(),
            reason: gap.description,
            priority: gap.priority,
        })
        .collect();

    if suggestions.is_empty() {
        suggestions.push(Suggestion {
            question: "Would you like to add examples, counterpoints, or prerequisites to this topic?"
                .into(),
            reason: "No high-priority gaps were detected.".into(),
            priority: 1,
        });
    }

    suggestions
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
