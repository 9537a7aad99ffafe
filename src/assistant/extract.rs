use crate::models::chat::{ Message, Role };

/// Returned when a thread holds no assistant reply. Not an error.
pub const NO_RESPONSE: &str = "[No response from assistant]";

/// Text of the most recent assistant message in a newest-first list.
pub fn latest_assistant_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .find_map(Message::first_text)
        .map(str::to_string)
        .unwrap_or_else(|| NO_RESPONSE.to_string())
}
