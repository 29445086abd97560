//! Prompt templates and rendering.

use maestro_rest::models::Memory;
use tracing::warn;

/// Placeholder injected when no summary exists yet.
pub const NO_SUMMARY_PLACEHOLDER: &str = "No previous conversation history.";
/// Placeholder injected when memory retrieval found nothing.
pub const NO_MEMORIES_PLACEHOLDER: &str = "No stored information about the user.";
/// `{current_summary}` slot value for the first summarization of a pair.
pub const NO_EXISTING_SUMMARY: &str = "No existing summary.";

/// Default template for folding a history chunk into the running summary.
/// `{json}` receives the serialized messages, `{current_summary}` the
/// previous summary text.
pub const DEFAULT_SUMMARIZATION_PROMPT: &str = "\
You maintain a running summary of a conversation between a user and their assistant.

Current summary:
{current_summary}

New messages, oldest first, as JSON:
{json}

Rewrite the summary so it covers both the current summary and the new messages. \
Keep user-stated facts, decisions, open tasks and unanswered questions. \
Stay under 200 words. Reply with the summary text only.";

/// Render an assistant's instruction template.
///
/// Substitutes `{summary_previous}` and `{memories}`; any other `{...}`
/// placeholder is left in place and logged, matching the contract that an
/// unknown key never fails the run.
pub fn render_system_prompt(
    template: &str,
    summary: Option<&str>,
    memories: &[Memory],
) -> String {
    let memories_block = if memories.is_empty() {
        NO_MEMORIES_PLACEHOLDER.to_string()
    } else {
        memories
            .iter()
            .map(|m| format!("- {}", m.text))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let summary_block = summary.unwrap_or(NO_SUMMARY_PLACEHOLDER);

    let rendered = template
        .replace("{summary_previous}", summary_block)
        .replace("{memories}", &memories_block);

    for key in leftover_placeholders(&rendered) {
        warn!(key, "unknown placeholder in system prompt template, passing through");
    }
    rendered
}

pub fn render_summarization_prompt(
    template: &str,
    chunk_json: &str,
    current_summary: Option<&str>,
) -> String {
    template
        .replace("{json}", chunk_json)
        .replace("{current_summary}", current_summary.unwrap_or(NO_EXISTING_SUMMARY))
}

/// Find `{word}`-shaped placeholders remaining after substitution.
fn leftover_placeholders(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = text[i + 1..].find('}') {
                let inner = &text[i + 1..i + 1 + close];
                if !inner.is_empty()
                    && inner
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    found.push(inner.to_string());
                }
                i += close + 2;
                continue;
            }
        }
        i += 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn memory(text: &str) -> Memory {
        Memory {
            id: Uuid::nil(),
            user_id: 1,
            assistant_id: None,
            text: text.to_string(),
            memory_type: Default::default(),
            importance: 5,
            source_message_id: None,
            last_accessed_at: None,
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let rendered = render_system_prompt(
            "Summary: {summary_previous}\nFacts:\n{memories}",
            Some("we talked about cats"),
            &[memory("likes coffee"), memory("lives in Berlin")],
        );
        assert!(rendered.contains("we talked about cats"));
        assert!(rendered.contains("- likes coffee"));
        assert!(rendered.contains("- lives in Berlin"));
    }

    #[test]
    fn empty_inputs_use_placeholders() {
        let rendered = render_system_prompt("{summary_previous} | {memories}", None, &[]);
        assert!(rendered.contains(NO_SUMMARY_PLACEHOLDER));
        assert!(rendered.contains(NO_MEMORIES_PLACEHOLDER));
    }

    #[test]
    fn unknown_placeholders_survive() {
        let rendered = render_system_prompt("{memories} {assistant_mood}", None, &[]);
        assert!(rendered.contains("{assistant_mood}"));
    }

    #[test]
    fn summarization_prompt_defaults_current_summary() {
        let rendered =
            render_summarization_prompt(DEFAULT_SUMMARIZATION_PROMPT, "[]", None);
        assert!(rendered.contains(NO_EXISTING_SUMMARY));
        assert!(rendered.contains("[]"));
    }
}
