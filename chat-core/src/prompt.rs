//! Prompt assembly for role-tagged conversations.
//!
//! Turns render in order as `<|{role}|>\n{content}` with no separator between
//! them, followed by [`ASSISTANT_CUE`] so the model continues as the assistant.
//! Nothing is truncated here; a prompt longer than the context window is an
//! engine failure.

use crate::types::ConversationHistory;

/// Trailing marker appended to every assembled prompt.
pub const ASSISTANT_CUE: &str = "<|end|>\n<|assistant|>";

/// Render a conversation into a single model-ready prompt.
pub fn assemble(history: &ConversationHistory) -> String {
    let capacity = history
        .iter()
        .map(|turn| turn.role.as_str().len() + turn.content.len() + 5)
        .sum::<usize>()
        + ASSISTANT_CUE.len();

    let mut prompt = String::with_capacity(capacity);
    for turn in history {
        prompt.push_str("<|");
        prompt.push_str(turn.role.as_str());
        prompt.push_str("|>\n");
        prompt.push_str(&turn.content);
    }
    prompt.push_str(ASSISTANT_CUE);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthorRole, ConversationTurn};
    use proptest::prelude::*;

    #[test]
    fn test_single_user_turn() {
        let mut history = ConversationHistory::new();
        history.add_user_message("2+2?");

        assert_eq!(assemble(&history), "<|user|>\n2+2?<|end|>\n<|assistant|>");
    }

    #[test]
    fn test_empty_history_is_just_the_cue() {
        assert_eq!(assemble(&ConversationHistory::new()), ASSISTANT_CUE);
    }

    #[test]
    fn test_turns_are_concatenated_without_separator() {
        let mut history = ConversationHistory::new();
        history.add_system_message("Be terse.");
        history.add_user_message("Hi");
        history.add_assistant_message("Hello.");
        history.add_user_message("Bye");

        assert_eq!(
            assemble(&history),
            "<|system|>\nBe terse.<|user|>\nHi<|assistant|>\nHello.<|user|>\nBye<|end|>\n<|assistant|>"
        );
    }

    fn arb_role() -> impl Strategy<Value = AuthorRole> {
        prop_oneof![
            Just(AuthorRole::System),
            Just(AuthorRole::User),
            Just(AuthorRole::Assistant),
        ]
    }

    proptest! {
        #[test]
        fn prop_prompt_has_one_segment_per_turn_in_order(
            turns in proptest::collection::vec((arb_role(), "[a-zA-Z0-9 ?!.]{0,24}"), 0..8)
        ) {
            let history = ConversationHistory::from(
                turns
                    .iter()
                    .map(|(role, content)| ConversationTurn::new(*role, content.clone()))
                    .collect::<Vec<_>>(),
            );
            let prompt = assemble(&history);

            prop_assert!(prompt.ends_with(ASSISTANT_CUE));

            let mut rest = prompt.strip_suffix(ASSISTANT_CUE).unwrap();
            for (role, content) in &turns {
                let segment = format!("<|{}|>\n{}", role.as_str(), content);
                prop_assert!(rest.starts_with(&segment));
                rest = &rest[segment.len()..];
            }
            prop_assert!(rest.is_empty());
        }
    }
}
