// Prompt fragments for the research and analysis collaborators.
// `{topic}` is substituted with the user's query at call time.

/// System prompt for OpenAI when it stands in as the research provider.
pub const RESEARCH_SYSTEM: &str =
    "You are an expert opportunity researcher. Respond ONLY with a strict JSON array.";

pub const RESEARCH_PROMPT_TEMPLATE: &str = "Research topic: {topic}. \
    Return 5-10 opportunities as a strict JSON array. \
    Each item must have title, url, snippet. No explanations, JSON only.";

/// System prompt for the analysis call. The research text is sent verbatim as the user message.
pub const ANALYSIS_SYSTEM: &str = "You are an analyst. \
    Read the research JSON (array of opportunities) and return ONLY a strict JSON object \
    with key 'opportunities' (array of items with: title, summary, source, score 0-100).";
