//! Prompt templates for summary and theme generation.

pub(crate) const SUMMARY_SYSTEM: &str = "You are an assistant that writes faithful summaries of \
documents. Answer in the language of the document. Return only the summary text.";

pub(crate) const THEMES_SYSTEM: &str = "You extract topic labels from documents and answer \
strictly with JSON matching the provided schema.";

/// Build the free-text summary prompt.
pub(crate) fn build_summary_prompt(text: &str, max_sentences: usize) -> String {
    format!(
        "Summarize the following document in at most {max_sentences} sentences.\n\
         Requirements:\n\
         - Concise: leave out repetition and filler.\n\
         - Informative: keep the central statements, results, and figures.\n\
         - Coherent: write connected prose, not bullet points.\n\
         - Objective: no opinions or additions that are not in the text.\n\
         Write the summary in the same language as the document.\n\n\
         Document:\n{text}"
    )
}

/// Build the structured theme extraction prompt.
pub(crate) fn build_themes_prompt(text: &str, min_words: usize, max_words: usize) -> String {
    format!(
        "List the main themes of the following document. Each theme is a short label of \
         {min_words} to {max_words} words, written in the language of the document. Answer with a \
         JSON object of the form {{\"themes\": [\"...\"]}}.\n\n\
         Document:\n{text}"
    )
}
