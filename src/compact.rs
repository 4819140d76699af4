use std::collections::HashSet;

use tracing::debug;

use crate::context::{estimate_message, estimate_messages};
use crate::types::{Message, Role};

/// Tool results longer than this are not worth keeping as facts.
const FACT_TOOL_RESULT_MAX_CHARS: usize = 200;

/// Words that mark an assistant sentence as a confirmation or action.
const CONFIRMATION_MARKERS: &[&str] = &[
    "done",
    "created",
    "updated",
    "saved",
    "deleted",
    "scheduled",
    "sent",
    "completed",
    "i've",
    "i have",
    "added",
    "set ",
];

/// First-person preference markers in user statements.
const PREFERENCE_MARKERS: &[&str] = &[
    "i like", "i love", "i prefer", "i want", "i need", "i hate", "i am", "i'm", "my ",
    "call me", "i use", "i work",
];

/// Result of compacting a message sequence. `parent_chain` records the
/// lineage of the compacted-away messages as `session_id:timestamp` pairs
/// for external lineage tracking.
#[derive(Debug)]
pub struct Compaction {
    pub messages: Vec<Message>,
    pub compacted: bool,
    pub parent_chain: Vec<String>,
}

/// Lossy, purely local summarization of older history. No model call is
/// made. Walks newest-first, retaining messages while the retained cost
/// stays within `reserve_tokens_floor` (and always at least two), then
/// replaces the older complement with a single synthetic system message
/// holding a deduplicated fact list.
///
/// Idempotent on already-compact input: when the whole sequence fits under
/// the floor it is returned unchanged.
pub fn compact(messages: &[Message], session_id: &str, reserve_tokens_floor: u32) -> Compaction {
    let total = estimate_messages(messages);
    if total <= reserve_tokens_floor {
        return Compaction {
            messages: messages.to_vec(),
            compacted: false,
            parent_chain: Vec::new(),
        };
    }

    // Retain the newest tail. The floor bounds the retained cost, but we
    // always keep at least two messages so the model sees a real exchange.
    let mut retained_cost = 0u32;
    let mut split = messages.len();
    for (idx, message) in messages.iter().enumerate().rev() {
        let cost = estimate_message(message);
        if retained_cost + cost > reserve_tokens_floor && messages.len() - split >= 2 {
            break;
        }
        retained_cost += cost;
        split = idx;
    }

    let (older, retained) = messages.split_at(split);
    if older.is_empty() {
        return Compaction {
            messages: messages.to_vec(),
            compacted: false,
            parent_chain: Vec::new(),
        };
    }

    let facts = extract_facts(older);
    let parent_chain: Vec<String> = older
        .iter()
        .map(|m| format!("{}:{}", m.session_id, m.timestamp.to_rfc3339()))
        .collect();

    let mut content = format!(
        "conversation summary (compacted)\n\n{} earlier message(s) were compacted to fit the \
         context budget.",
        older.len()
    );
    if !facts.is_empty() {
        content.push_str("\n\nExtracted facts:\n");
        for fact in &facts {
            content.push_str("- ");
            content.push_str(fact);
            content.push('\n');
        }
    }

    let mut out = vec![Message::system(content, session_id)];
    out.extend(retained.iter().cloned());

    debug!(
        compacted = older.len(),
        retained = retained.len(),
        facts = facts.len(),
        "session history compacted"
    );

    Compaction {
        messages: out,
        compacted: true,
        parent_chain,
    }
}

/// Pull fact-like sentences out of the older history: user statements with
/// numbers, first-person preferences, or proper nouns; assistant
/// confirmations and actions; short non-error tool results. Deduplicated,
/// input order preserved.
fn extract_facts(messages: &[Message]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut facts = Vec::new();
    let mut push = |fact: String| {
        let key = fact.to_lowercase();
        if seen.insert(key) {
            facts.push(fact);
        }
    };

    for message in messages {
        match message.role {
            Role::User => {
                for sentence in sentences(&message.content) {
                    if is_user_fact(sentence) {
                        push(format!("user: {sentence}"));
                    }
                }
            }
            Role::Assistant => {
                for sentence in sentences(&message.content) {
                    let lower = sentence.to_lowercase();
                    if CONFIRMATION_MARKERS.iter().any(|m| lower.contains(m)) {
                        push(format!("assistant: {sentence}"));
                    }
                }
            }
            Role::Tool => {
                for block in &message.tool_result {
                    if !block.is_error && block.content.len() <= FACT_TOOL_RESULT_MAX_CHARS {
                        push(format!("tool result: {}", block.content.trim()));
                    }
                }
            }
            Role::System => {}
        }
    }

    facts
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn is_user_fact(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    if sentence.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    if PREFERENCE_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    has_proper_noun(sentence)
}

/// A capitalized word anywhere past the first counts as a proper noun.
fn has_proper_noun(sentence: &str) -> bool {
    sentence
        .split_whitespace()
        .skip(1)
        .any(|word| word.chars().next().is_some_and(|c| c.is_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolResultBlock;

    // Filler that matches no fact heuristic: no digits, no preference
    // markers, no proper nouns.
    fn long_user(_i: usize) -> Message {
        Message::user("pad ".repeat(60), "s1")
    }

    #[test]
    fn under_floor_is_unchanged() {
        let messages = vec![
            Message::user("hello", "s1"),
            Message::assistant("hi", "s1"),
        ];
        let result = compact(&messages, "s1", 10_000);
        assert!(!result.compacted);
        assert_eq!(result.messages.len(), 2);
        assert!(result.parent_chain.is_empty());
    }

    #[test]
    fn idempotent_on_compacted_output() {
        let messages: Vec<Message> = (0..20).map(long_user).collect();
        let first = compact(&messages, "s1", 400);
        assert!(first.compacted);
        let second = compact(&first.messages, "s1", 400);
        // The compacted sequence fits under the floor, so nothing changes.
        assert!(!second.compacted);
        assert_eq!(second.messages.len(), first.messages.len());
    }

    #[test]
    fn summary_message_leads_and_is_system() {
        let messages: Vec<Message> = (0..20).map(long_user).collect();
        let result = compact(&messages, "s1", 300);
        assert_eq!(result.messages[0].role, Role::System);
        assert!(result.messages[0]
            .content
            .starts_with("conversation summary (compacted)"));
    }

    #[test]
    fn retains_at_least_two_messages() {
        let messages: Vec<Message> = (0..5).map(long_user).collect();
        // Floor far smaller than any single message.
        let result = compact(&messages, "s1", 10);
        assert!(result.compacted);
        let retained = result.messages.len() - 1;
        assert!(retained >= 2, "retained {retained}");
    }

    #[test]
    fn parent_chain_covers_compacted_messages() {
        let messages: Vec<Message> = (0..10).map(long_user).collect();
        let result = compact(&messages, "s1", 300);
        let retained = result.messages.len() - 1;
        assert_eq!(result.parent_chain.len(), 10 - retained);
        assert!(result.parent_chain[0].starts_with("s1:"));
    }

    #[test]
    fn extracts_numeric_and_preference_facts() {
        let mut messages = vec![
            Message::user("My flight lands at 18:45 on Friday.", "s1"),
            Message::user("I prefer window seats.", "s1"),
            Message::user("ok thanks", "s1"),
            Message::assistant("Done, I've saved your seat preference.", "s1"),
        ];
        messages.extend((0..10).map(long_user));
        let result = compact(&messages, "s1", 250);
        let summary = &result.messages[0].content;
        assert!(summary.contains("user: My flight lands at 18:45 on Friday"));
        assert!(summary.contains("user: I prefer window seats"));
        assert!(summary.contains("assistant: Done, I've saved your seat preference"));
        assert!(!summary.contains("ok thanks"));
    }

    #[test]
    fn keeps_short_tool_results_skips_errors() {
        let mut messages = vec![
            Message::tool("42 degrees", "s1").with_tool_result(ToolResultBlock {
                tool_use_id: "t1".into(),
                content: "42 degrees".into(),
                is_error: false,
            }),
            Message::tool("boom", "s1").with_tool_result(ToolResultBlock {
                tool_use_id: "t2".into(),
                content: "boom".into(),
                is_error: true,
            }),
        ];
        messages.extend((0..10).map(long_user));
        let result = compact(&messages, "s1", 250);
        let summary = &result.messages[0].content;
        assert!(summary.contains("tool result: 42 degrees"));
        assert!(!summary.contains("boom"));
    }

    #[test]
    fn deduplicates_facts() {
        let mut messages = vec![
            Message::user("I prefer tea.", "s1"),
            Message::user("I prefer tea.", "s1"),
        ];
        messages.extend((0..10).map(long_user));
        let result = compact(&messages, "s1", 250);
        let summary = &result.messages[0].content;
        assert_eq!(summary.matches("user: I prefer tea").count(), 1);
    }
}
