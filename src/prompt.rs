//! Prompt compilation: aggregated context + task instruction + output
//! contract, in one bounded-length string.
//!
//! Pure function territory: no I/O, no clock, no randomness. Identical
//! inputs produce identical prompts.

use crate::models::AggregatedContext;
use crate::validate::OutputSchema;

/// Maximum characters of joined context lines included in the prompt, to
/// control token cost.
pub const CONTEXT_CHARS: usize = 800;

/// Compile the prompt sent to the generative backend.
///
/// Layout: a bounded slice of "source: title — content" lines, the trending
/// terms, the task instruction, and a literal description of the required
/// output shape with an explicit JSON-only directive.
pub fn build(context: &AggregatedContext, instruction: &str, schema: &OutputSchema) -> String {
    let joined = context
        .items
        .iter()
        .map(|item| format!("{}: {} — {}", item.source_tag(), item.title, item.content))
        .collect::<Vec<_>>()
        .join("\n");
    let bounded = bound_chars(&joined, CONTEXT_CHARS);

    let mut prompt = String::new();
    prompt.push_str("Recent coverage:\n");
    prompt.push_str(bounded);
    prompt.push('\n');
    if !context.trending_terms.is_empty() {
        prompt.push_str(&format!(
            "Trending terms: {}\n",
            context.trending_terms.join(", ")
        ));
    }
    prompt.push('\n');
    prompt.push_str(instruction);
    prompt.push_str(
        "\n\nAnswer with a single JSON object and nothing else, exactly this shape:\n",
    );
    prompt.push_str(&schema.describe());
    prompt
}

/// Truncate to at most `max` characters without splitting a char.
fn bound_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
