// Terminal output for the modgate CLI, plus small text helpers shared with logging.

use colored::Colorize;

use crate::content::{Decision, ModerationResult};
use crate::policy::Policy;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Unlike byte slicing (`&text[..50]`), this respects UTF-8 character boundaries
/// and will never panic on multi-byte characters like emoji or accented letters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

fn colorize_decision(decision: Decision) -> colored::ColoredString {
    match decision {
        Decision::Allow => decision.as_str().green().bold(),
        Decision::Block => decision.as_str().red().bold(),
    }
}

/// Display the verdict for a text check.
pub fn display_text_verdict(text: &str, permitted: bool) {
    let decision = if permitted {
        Decision::Allow
    } else {
        Decision::Block
    };
    println!("{}  {}", colorize_decision(decision), truncate_chars(text, 60).dimmed());
}

/// Display the result of an image check.
pub fn display_image_result(result: &ModerationResult) {
    let score = result
        .nsfw_score
        .map(|s| format!("{s:.2}"))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{}  nsfw score: {}",
        colorize_decision(result.decision),
        score
    );
    if result.reasons.is_empty() {
        println!("  {}", "no reasons given".dimmed());
    }
    for reason in &result.reasons {
        println!("  {} {}", "-".dimmed(), reason);
    }
}

/// Display the policy the gateway is enforcing.
pub fn display_policy(policy: &Policy, fetched: bool) {
    println!("\n{}", "=== Moderation Policy ===".bold());
    if !fetched {
        println!(
            "{}",
            "(service unreachable, showing built-in defaults)".yellow()
        );
    }
    println!();

    let rows = [
        ("Toxicity", policy.block_toxicity, policy.toxicity_threshold),
        ("Sexual", policy.block_sexual, policy.sexual_threshold),
        ("NSFW images", policy.block_nsfw_images, policy.nsfw_threshold),
    ];

    println!(
        "  {:<14} {:<8} {:>9}",
        "Category".dimmed(),
        "Block".dimmed(),
        "Threshold".dimmed()
    );
    println!("  {}", "-".repeat(33).dimmed());
    for (name, enabled, threshold) in rows {
        let enabled = if enabled { "on".green() } else { "off".dimmed() };
        println!("  {name:<14} {enabled:<8} {threshold:>9.2}");
    }
    println!();
}
