//! Conversational agent collaborator
//!
//! The text generator plus the prompt layouts the bot uses for chat
//! replies, comment replies, post summaries and bulletins.

mod llm;

pub use llm::{ChatMessage, CompletionRequest, OpenAiCompatible, Role, TextGenerator};

#[cfg(test)]
pub use llm::MockTextGenerator;

use crate::data::PrivateMessage;

pub const CHAT_TEMPERATURE: f32 = 1.0;
pub const REPLY_TEMPERATURE: f32 = 0.8;
pub const SUMMARY_TEMPERATURE: f32 = 0.7;

/// Keep at most `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Chat reply prompt: persona, then the conversation oldest first.
///
/// `history` is newest first, as returned by the store.
pub fn chat_request(
    persona: &str,
    bot_id: &str,
    history: &[PrivateMessage],
    max_message_chars: usize,
) -> CompletionRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(persona));

    for message in history.iter().rev() {
        let content = truncate_chars(&message.content, max_message_chars);
        if message.sender_id == bot_id {
            messages.push(ChatMessage::assistant(content));
        } else {
            messages.push(ChatMessage::user(content));
        }
    }

    CompletionRequest {
        messages,
        temperature: CHAT_TEMPERATURE,
    }
}

/// Comment reply prompt: the post (and the comment replied to) as context,
/// then the comment to answer.
pub fn comment_reply_request(
    persona: &str,
    post_content: &str,
    parent_content: Option<&str>,
    comment: &str,
) -> CompletionRequest {
    let context = match parent_content {
        Some(parent) => format!("Post content: {post_content}. Replying to: {parent}"),
        None => format!("Post content: {post_content}"),
    };

    CompletionRequest {
        messages: vec![
            ChatMessage::system(persona),
            ChatMessage::user(context),
            ChatMessage::assistant("Got it, I have read the post."),
            ChatMessage::user(comment),
        ],
        temperature: REPLY_TEMPERATURE,
    }
}

pub fn summary_request(persona: &str, post_content: &str) -> CompletionRequest {
    CompletionRequest {
        messages: vec![
            ChatMessage::system(persona),
            ChatMessage::user(post_content),
        ],
        temperature: SUMMARY_TEMPERATURE,
    }
}

/// Bulletin prompt with `{date}` and `{location}` filled in.
pub fn bulletin_request(
    persona: &str,
    template: &str,
    date: &str,
    location: Option<&str>,
) -> CompletionRequest {
    let prompt = template
        .replace("{date}", date)
        .replace("{location}", location.unwrap_or("campus"));

    CompletionRequest {
        messages: vec![ChatMessage::system(persona), ChatMessage::user(prompt)],
        temperature: SUMMARY_TEMPERATURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: i64, sender: &str, receiver: &str, content: &str) -> PrivateMessage {
        PrivateMessage {
            id,
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: content.to_string(),
            is_read: false,
            deleted_by_sender: false,
            deleted_by_receiver: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("食堂今天很挤", 3), "食堂今");
    }

    #[test]
    fn chat_history_is_replayed_oldest_first_with_roles() {
        let long = "x".repeat(600);
        let history = vec![
            message(3, "alice", "bot", &long),
            message(2, "bot", "alice", "hey!"),
            message(1, "alice", "bot", "hi"),
        ];

        let request = chat_request("persona", "bot", &history, 500);

        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[0], ChatMessage::system("persona"));
        assert_eq!(request.messages[1], ChatMessage::user("hi"));
        assert_eq!(request.messages[2], ChatMessage::assistant("hey!"));
        assert_eq!(request.messages[3].content.chars().count(), 500);
        assert_eq!(request.temperature, CHAT_TEMPERATURE);
    }

    #[test]
    fn comment_reply_includes_parent_when_present() {
        let request = comment_reply_request("persona", "exam tips?", Some("read early"), "thanks");

        assert_eq!(
            request.messages[1].content,
            "Post content: exam tips?. Replying to: read early"
        );
        assert_eq!(request.messages[3], ChatMessage::user("thanks"));
    }

    #[test]
    fn bulletin_fills_template() {
        let request = bulletin_request("persona", "Today is {date} in {location}", "2026-10-16", None);
        assert_eq!(request.messages[1].content, "Today is 2026-10-16 in campus");
    }
}
