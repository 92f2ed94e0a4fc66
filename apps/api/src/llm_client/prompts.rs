// Cross-cutting prompt fragments. Feature prompts live next to their feature.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON value. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Output-shape instruction. Replace `{schema}` before sending.
pub const OUTPUT_SHAPE_INSTRUCTION: &str =
    "Your response MUST be a JSON value that validates against this JSON schema:\n{schema}";

/// Appended to prompts that embed a reference list.
pub const REFERENCE_INSTRUCTION: &str = "\
    CRITICAL: Items above are identified ONLY by their integer `index`. \
    When you refer to an item, use that exact index. \
    Never invent an index that is not listed and never refer to items by name alone.";
