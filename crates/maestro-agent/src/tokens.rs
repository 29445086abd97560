//! Deterministic token estimation.
//!
//! No provider-stable tokenizer ships with the model API, so the same
//! approximation is applied on both sides of the summarization check:
//! roughly four characters per token plus a small per-message overhead.

use crate::message::AgentMessage;

/// Fixed per-message framing overhead in tokens.
const MESSAGE_OVERHEAD: u32 = 4;

pub fn estimate_text(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

pub fn estimate_message(message: &AgentMessage) -> u32 {
    let mut tokens = MESSAGE_OVERHEAD + estimate_text(message.content());
    if let AgentMessage::Ai { tool_calls, .. } = message {
        for call in tool_calls {
            tokens += estimate_text(&call.name) + estimate_text(&call.arguments.to_string());
        }
    }
    tokens
}

pub fn estimate_history(messages: &[AgentMessage]) -> u32 {
    messages.iter().map(estimate_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_chars_per_token_rounds_up() {
        assert_eq!(estimate_text(""), 0);
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text("abcde"), 2);
    }

    #[test]
    fn message_overhead_is_constant() {
        let msg = AgentMessage::human("abcd");
        assert_eq!(estimate_message(&msg), MESSAGE_OVERHEAD + 1);
    }

    #[test]
    fn history_is_additive() {
        let msgs = vec![AgentMessage::human("abcd"), AgentMessage::human("abcd")];
        assert_eq!(estimate_history(&msgs), 2 * (MESSAGE_OVERHEAD + 1));
    }
}
