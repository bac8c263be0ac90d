use super::{ChatMessage, ChatRole};

/// Sampling temperature for document chat answers.
pub const CHAT_TEMPERATURE: f32 = 0.5;
/// Sampling temperature for note assists.
pub const NOTE_TEMPERATURE: f32 = 0.3;

/// System prompt for a chat turn.
///
/// `history` is the whole conversation including the latest question; system turns are left out
/// of the transcript.
pub fn build_chat_prompt(context: &str, history: &[ChatMessage], question: &str) -> ChatMessage {
    let transcript: String = history
        .iter()
        .filter_map(|message| match message.role {
            ChatRole::User => Some(format!("User: {}\n", message.content)),
            ChatRole::Assistant => Some(format!("Assistant: {}\n", message.content)),
            ChatRole::System => None,
        })
        .collect();

    ChatMessage::system(format!(
        "Use the following pieces of context and previous conversation (if applicable) to answer the user's question in markdown format.\n\
         If the context does not provide the answer, just say you don't know. Do not make up an answer.\n\
         \n\
         ----------------\n\
         PREVIOUS CONVERSATION:\n\
         {transcript}\n\
         ----------------\n\
         CONTEXT:\n\
         {context}\n\
         \n\
         USER INPUT: {question}"
    ))
}

/// Messages sent for a chat turn: the system prompt, then the user turns of the history.
pub fn chat_messages(context: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let question = last_user_message(history).unwrap_or_default();
    std::iter::once(build_chat_prompt(context, history, question))
        .chain(
            history
                .iter()
                .filter(|message| message.role == ChatRole::User)
                .cloned(),
        )
        .collect()
}

/// System prompt for applying the model to text selected in a note.
pub fn build_note_prompt(context: &str, selected_text: &str) -> ChatMessage {
    ChatMessage::system(format!(
        "You are a helpful assistant. Use the following context to answer the user's query in markdown format. \
         If the context does not contain the answer, respond with \"I don't know.\" Do not make up answers.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         User's Question:\n\
         {selected_text}"
    ))
}

/// Content of the most recent user turn.
pub fn last_user_message(history: &[ChatMessage]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|message| message.role == ChatRole::User)
        .map(|message| message.content.as_str())
}
