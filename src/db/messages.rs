//! 消息日志（chat_messages）的 SQLite 实现

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Row};

use super::Database;
use crate::core::StoreError;
use crate::memory::{ChatMessage, MessageLog, Role};

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(3)?;
    Ok(ChatMessage {
        conversation_id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        role: Role::parse(&role),
        content: row.get(4)?,
        context: json_column(row, 5)?,
        action_report: json_column(row, 6)?,
        model_name: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl Database {
    fn query_messages(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl MessageLog for Database {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let context = message
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let action_report = message
            .action_report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO chat_messages (conversation_id, sender, receiver, role, content,
                context, action_report, model_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.conversation_id,
                message.sender,
                message.receiver,
                message.role.as_str(),
                message.content,
                context,
                action_report,
                message.model_name,
                message.created_at,
            ],
        )?;
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.query_messages(
            "SELECT conversation_id, sender, receiver, role, content, context, action_report,
                model_name, created_at
             FROM chat_messages WHERE conversation_id = ?1 ORDER BY id",
            params![conversation_id],
        )
    }

    async fn list_by_pair(
        &self,
        conversation_id: &str,
        a: &str,
        b: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.query_messages(
            "SELECT conversation_id, sender, receiver, role, content, context, action_report,
                model_name, created_at
             FROM chat_messages
             WHERE conversation_id = ?1
               AND ((sender = ?2 AND receiver = ?3) OR (sender = ?3 AND receiver = ?2))
             ORDER BY id",
            params![conversation_id, a, b],
        )
    }
}
