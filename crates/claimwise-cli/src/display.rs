//! Vertical card display for adjudication outcomes and retrieval hits.

use claimwise_core::ScoredNode;
use claimwise_pipeline::ClaimOutcome;

const SNIPPET_CHARS: usize = 160;

/// Print one outcome as a card grouped into decision and recommendation sections.
pub fn print_decision_card(outcome: &ClaimOutcome) {
    let decision = &outcome.decision;
    let rec = &outcome.recommendation;

    println!("=== {} ===", decision.claim_number);
    println!();

    println!("Decision");
    print_field("covered", if decision.covered { "yes" } else { "no" });
    print_field("deductible", &money(decision.deductible));
    print_field("recommended_payout", &money(decision.recommended_payout));
    println!();

    println!("Recommendation");
    if let Some(section) = &rec.policy_section {
        print_field("policy_section", section);
    }
    print_field("summary", &rec.recommendation_summary);
    if let Some(d) = rec.deductible {
        print_field("deductible", &money(d));
    }
    if let Some(s) = rec.settlement_amount {
        print_field("settlement_amount", &money(s));
    }
    println!();

    println!("Evidence");
    print_field(
        "policy_text",
        &format!("{} chars", outcome.policy_text.chars().count()),
    );
    println!();
}

/// Print ranked retrieval hits, one block per node.
pub fn print_hits(index: &str, hits: &[ScoredNode]) {
    println!("=== {index} ({} hits) ===", hits.len());
    for (rank, hit) in hits.iter().enumerate() {
        print!("  {:>2}. {:<40} {:.4}", rank + 1, hit.node.id, hit.score);
        if let Some(p) = hit.node.policy_number() {
            print!("  policy: {p}");
        }
        println!();
        println!("      {}", snippet(&hit.node.text, SNIPPET_CHARS));
    }
}

fn print_field(name: &str, value: &str) {
    println!("  {:<26} {}", name, value);
}

fn money(amount: f64) -> String {
    format!("${amount:.2}")
}

/// First `max` chars on one line, with an ellipsis when cut.
fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
