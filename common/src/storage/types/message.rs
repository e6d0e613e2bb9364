#![allow(clippy::module_name_repetitions)]
use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::stored_object;
use uuid::Uuid;

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

stored_object!(Message, "message", {
    session_id: String,
    role: MessageRole,
    content: String
});

impl Message {
    pub fn new(session_id: String, role: MessageRole, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            role,
            content,
        }
    }

    /// Appends one turn to the session, preserving per-session FIFO order.
    pub async fn append(
        session_id: &str,
        role: MessageRole,
        content: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let message = Message::new(session_id.to_string(), role, content.to_string());
        db.store_item(message).await?;
        Ok(())
    }

    /// The most recent `limit` turns of a session in chronological order.
    pub async fn history(
        session_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Message>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE session_id = $session_id ORDER BY created_at DESC LIMIT $limit",
                Self::table_name()
            ))
            .bind(("session_id", session_id.to_string()))
            .bind(("limit", limit as i64))
            .await?;
        let mut messages: Vec<Message> = response.take(0)?;
        messages.reverse();
        Ok(messages)
    }
}
