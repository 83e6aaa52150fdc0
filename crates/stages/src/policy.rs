//! Instruction checks that run before the generative edit service is ever called.

use crate::StageFailure;

/// Longest instruction accepted, in characters.
pub const MAX_INSTRUCTION_CHARS: usize = 4000;

/// Appended to every edit instruction. Not configurable.
pub const GUARDRAIL_SUFFIX: &str = "Preserve the original proportions, seams, stitching, \
texture, and exact colors of the product. Keep fine details sharp and do not add text, \
watermarks, extra objects, or visual artifacts.";

/// Terms that indicate a request to depict minors. Matched as whole words, case-insensitively.
const RESTRICTED_TERMS: &[&str] = &[
    "child",
    "children",
    "childs",
    "kid",
    "kids",
    "toddler",
    "toddlers",
    "infant",
    "infants",
    "newborn",
    "newborns",
    "babies",
    "underage",
    "preteen",
    "preteens",
    "teen",
    "teens",
    "teenager",
    "teenagers",
    "schoolgirl",
    "schoolgirls",
    "schoolboy",
    "schoolboys",
    "minors",
];

/// Returns the first restricted term found in `instruction`, if any.
///
/// Pure function of its input: the same text always yields the same answer.
pub fn find_restricted_term(instruction: &str) -> Option<&'static str> {
    instruction
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            let lowered = word.to_lowercase();
            RESTRICTED_TERMS
                .iter()
                .copied()
                .find(|term| *term == lowered)
        })
}

/// Validate and trim a caller instruction. Failures are non-retryable policy rejections.
pub fn check_instruction(instruction: &str) -> Result<&str, StageFailure> {
    let trimmed = instruction.trim();
    if trimmed.is_empty() {
        return Err(StageFailure::policy("edit instruction is empty"));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_INSTRUCTION_CHARS {
        return Err(StageFailure::policy(format!(
            "edit instruction is {chars} characters; the limit is {MAX_INSTRUCTION_CHARS}"
        )));
    }
    if let Some(term) = find_restricted_term(trimmed) {
        return Err(StageFailure::policy(format!(
            "edit instruction contains restricted term '{term}'"
        )));
    }
    Ok(trimmed)
}

/// The prompt actually sent to the edit service.
pub fn guarded_prompt(instruction: &str) -> String {
    format!("{}\n\n{GUARDRAIL_SUFFIX}", instruction.trim())
}
