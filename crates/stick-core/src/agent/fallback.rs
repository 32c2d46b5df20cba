//! Deterministic replies used when an agent has no LLM provider

use super::definition::AgentDefinition;

fn has_word(input: &str, words: &[&str]) -> bool {
    input
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| words.contains(&token))
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Reply to `input` from the agent's static configuration.
///
/// `history_len` is the conversation length including the message being
/// answered.
pub fn fallback_reply(definition: &AgentDefinition, input: &str, history_len: usize) -> String {
    let lower = input.to_lowercase();

    if has_word(&lower, &["hello", "hi", "hey"]) {
        return format!(
            "Hello! I'm {}, an AI agent. How can I help you today?",
            definition.name
        );
    }

    if lower.contains("help") || lower.contains("what can you do") {
        return help_text(definition);
    }

    if lower.contains("status") || lower.contains("info") {
        return status_text(definition, history_len);
    }

    if lower.contains("capabilities") {
        return format!(
            "My capabilities include: {}",
            join_or_none(&definition.capabilities)
        );
    }

    if lower.contains("tools") {
        return format!(
            "I have access to the following tools: {}",
            join_or_none(&definition.tools)
        );
    }

    format!(
        "I received your message: \"{}\". {}\n\nNote: no LLM provider is configured for this agent, so replies come from a fixed rule set. Add an llm block (openai, anthropic, or ollama) to the agent definition for real responses.",
        input, definition.instructions
    )
}

fn help_text(definition: &AgentDefinition) -> String {
    format!(
        "I'm {}. {}\n\nAvailable commands:\n\
         - Ask me anything within my capabilities\n\
         - Type \"status\" to see my configuration\n\
         - Type \"capabilities\" to see what I can do\n\
         - Type \"tools\" to see available tools\n\
         - Type \"exit\" or \"quit\" to end the session\n\n{}",
        definition.name, definition.description, definition.instructions
    )
}

fn status_text(definition: &AgentDefinition, history_len: usize) -> String {
    format!(
        "Agent Status:\n\
         Name: {}\n\
         Version: {}\n\
         Description: {}\n\
         Capabilities: {}\n\
         Tools: {}\n\
         Max Tokens: {}\n\
         Temperature: {}\n\
         Conversation History: {} messages",
        definition.name,
        definition.version,
        definition.description,
        join_or_none(&definition.capabilities),
        join_or_none(&definition.tools),
        definition.max_tokens(),
        definition.temperature(),
        history_len
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> AgentDefinition {
        serde_json::from_value(serde_json::json!({
            "name": "demo",
            "version": "0.2.0",
            "description": "Demo agent",
            "capabilities": ["chat"],
            "tools": ["json"],
            "instructions": "Be brief.",
        }))
        .unwrap()
    }

    #[test]
    fn greeting_matches_whole_words_only() {
        assert!(fallback_reply(&demo(), "Hi there", 1).starts_with("Hello! I'm demo"));
        assert!(!fallback_reply(&demo(), "this is a test", 1).starts_with("Hello!"));
    }

    #[test]
    fn keyword_replies() {
        let def = demo();
        assert!(fallback_reply(&def, "help me", 1).contains("Available commands"));
        let status = fallback_reply(&def, "status?", 3);
        assert!(status.contains("Version: 0.2.0"));
        assert!(status.contains("Conversation History: 3 messages"));
        assert_eq!(
            fallback_reply(&def, "list capabilities", 1),
            "My capabilities include: chat"
        );
        assert_eq!(
            fallback_reply(&def, "which tools", 1),
            "I have access to the following tools: json"
        );
    }

    #[test]
    fn default_reply_echoes_and_names_instructions() {
        let reply = fallback_reply(&demo(), "summarize the report", 1);
        assert!(reply.starts_with("I received your message: \"summarize the report\". Be brief."));
    }
}
