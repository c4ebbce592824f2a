use serde::Serialize;
use crate::error::{Error, Result};
use crate::models::{Chat, ChatMessage, ChatSummary, Reaction, ReactionType, SendMessageResponse};
use super::api_client::{segment, ApiClient};

const MAX_TITLE_CHARS: usize = 120;
const MAX_MESSAGE_CHARS: usize = 8_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameChatRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    file_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReactionRequest {
    #[serde(rename = "type")]
    reaction_type: ReactionType,
}

/// Chat CRUD, message send and reactions.
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: ApiClient,
}

impl ChatApi {
    pub fn new(http: ApiClient) -> Self {
        Self { http }
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        let mut chats: Vec<ChatSummary> = self.http.get_json("/chats").await?;
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Chat> {
        self.http.get_json(&format!("/chats/{}", segment(chat_id))).await
    }

    pub async fn create_chat(&self, title: Option<&str>) -> Result<Chat> {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        if let Some(title) = title {
            validate_title(title)?;
        }
        let chat: Chat = self.http.post_json("/chats", &CreateChatRequest { title }).await?;
        tracing::info!(chat_id = %chat.id, "created chat");
        Ok(chat)
    }

    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<Chat> {
        let title = title.trim();
        validate_title(title)?;
        self.http
            .patch_json(&format!("/chats/{}", segment(chat_id)), &RenameChatRequest { title })
            .await
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.http.delete(&format!("/chats/{}", segment(chat_id))).await?;
        tracing::info!(chat_id, "deleted chat");
        Ok(())
    }

    pub async fn get_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        self.http
            .get_json(&format!("/chats/{}/messages", segment(chat_id)))
            .await
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
        file_ids: &[String],
    ) -> Result<SendMessageResponse> {
        validate_message(content, file_ids)?;
        let response: SendMessageResponse = self
            .http
            .post_json(
                &format!("/chats/{}/messages", segment(chat_id)),
                &SendMessageRequest { content, file_ids },
            )
            .await?;
        tracing::debug!(
            chat_id,
            message_id = %response.user_message.id,
            "message accepted"
        );
        Ok(response)
    }

    pub async fn add_reaction(&self, message_id: &str, reaction_type: ReactionType) -> Result<Reaction> {
        self.http
            .post_json(
                &format!("/messages/{}/reactions", segment(message_id)),
                &ReactionRequest { reaction_type },
            )
            .await
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.is_empty() {
        return Err(Error::validation("title", "Title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(Error::validation(
            "title",
            &format!("Title must be at most {} characters", MAX_TITLE_CHARS),
        ));
    }
    Ok(())
}

pub fn validate_message(content: &str, file_ids: &[String]) -> Result<()> {
    if content.trim().is_empty() && file_ids.is_empty() {
        return Err(Error::validation("content", "Message cannot be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(Error::validation(
            "content",
            &format!("Message must be at most {} characters", MAX_MESSAGE_CHARS),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_messages_need_an_attachment() {
        assert!(validate_message("   ", &[]).is_err());
        assert!(validate_message("", &["f1".to_string()]).is_ok());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_CHARS + 1), &[]).is_err());
    }

    #[test]
    fn send_request_omits_empty_file_list() {
        let body = serde_json::to_value(SendMessageRequest {
            content: "hi",
            file_ids: &[],
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "content": "hi" }));

        let ids = vec!["f1".to_string()];
        let body = serde_json::to_value(SendMessageRequest {
            content: "hi",
            file_ids: &ids,
        })
        .unwrap();
        assert_eq!(body["fileIds"], serde_json::json!(["f1"]));
    }
}
