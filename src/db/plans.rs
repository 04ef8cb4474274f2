//! 计划表（plan_subtasks）的 SQLite 实现

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};

use super::Database;
use crate::core::StoreError;
use crate::plan::{sort_by_task_number, PlanStore, Subtask, TaskStatus, TaskUpdate};

const SELECT_COLUMNS: &str = "conversation_id, task_number, title, content, assigned_agent,
    resource_name, depends_on, status, retry_count, max_retries, result, model_used,
    executing_agent";

fn row_to_subtask(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    let depends_on: String = row.get(6)?;
    let depends_on: Vec<String> = serde_json::from_str(&depends_on)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let status: String = row.get(7)?;
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Text,
            format!("unknown status: {status}").into(),
        )
    })?;

    Ok(Subtask {
        conversation_id: row.get(0)?,
        task_number: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        assigned_agent: row.get(4)?,
        resource_name: row.get(5)?,
        depends_on,
        status,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        result: row.get(10)?,
        model_used: row.get(11)?,
        executing_agent: row.get(12)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// 在调用方给定的连接（或事务）上逐行插入
fn insert_all(conn: &Connection, subtasks: &[Subtask]) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "INSERT INTO plan_subtasks (conversation_id, task_number, title, content, assigned_agent,
            resource_name, depends_on, status, retry_count, max_retries, result, model_used,
            executing_agent, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
    )?;
    for task in subtasks {
        let depends_on = serde_json::to_string(&task.depends_on)?;
        stmt.execute(params![
            task.conversation_id,
            task.task_number,
            task.title,
            task.content,
            task.assigned_agent,
            task.resource_name,
            depends_on,
            task.status.as_str(),
            task.retry_count,
            task.max_retries,
            task.result,
            task.model_used,
            task.executing_agent,
            now,
        ])
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::ConstraintViolation {
                    conversation_id: task.conversation_id.clone(),
                    task_number: task.task_number.clone(),
                }
            } else {
                StoreError::Sqlite(e)
            }
        })?;
    }
    Ok(())
}

impl Database {
    fn query_subtasks(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Subtask>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut tasks = stmt
            .query_map(params, row_to_subtask)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        sort_by_task_number(&mut tasks);
        Ok(tasks)
    }

    fn ensure_changed(
        changed: usize,
        conversation_id: &str,
        task_number: &str,
    ) -> Result<(), StoreError> {
        if changed == 0 {
            return Err(StoreError::NotFound {
                conversation_id: conversation_id.to_string(),
                task_number: task_number.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlanStore for Database {
    async fn save(&self, subtasks: &[Subtask]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_all(&tx, subtasks)?;
        tx.commit()?;
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Subtask>, StoreError> {
        self.query_subtasks(
            &format!("SELECT {SELECT_COLUMNS} FROM plan_subtasks WHERE conversation_id = ?1"),
            params![conversation_id],
        )
    }

    async fn list_by_numbers(
        &self,
        conversation_id: &str,
        numbers: &[String],
    ) -> Result<Vec<Subtask>, StoreError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..numbers.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM plan_subtasks
             WHERE conversation_id = ?1 AND task_number IN ({placeholders})"
        );
        let values = std::iter::once(conversation_id).chain(numbers.iter().map(|s| s.as_str()));
        self.query_subtasks(&sql, params_from_iter(values))
    }

    async fn list_todo(&self, conversation_id: &str) -> Result<Vec<Subtask>, StoreError> {
        self.query_subtasks(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM plan_subtasks
                 WHERE conversation_id = ?1 AND status IN (?2, ?3)"
            ),
            params![
                conversation_id,
                TaskStatus::Todo.as_str(),
                TaskStatus::Retrying.as_str()
            ],
        )
    }

    async fn get(
        &self,
        conversation_id: &str,
        task_number: &str,
    ) -> Result<Option<Subtask>, StoreError> {
        Ok(self
            .query_subtasks(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM plan_subtasks
                     WHERE conversation_id = ?1 AND task_number = ?2"
                ),
                params![conversation_id, task_number],
            )?
            .into_iter()
            .next())
    }

    async fn complete(
        &self,
        conversation_id: &str,
        task_number: &str,
        result: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE plan_subtasks SET status = ?1, result = ?2, updated_at = ?3
             WHERE conversation_id = ?4 AND task_number = ?5",
            params![
                TaskStatus::Complete.as_str(),
                result,
                chrono::Utc::now().to_rfc3339(),
                conversation_id,
                task_number
            ],
        )?;
        Self::ensure_changed(changed, conversation_id, task_number)
    }

    async fn update(
        &self,
        conversation_id: &str,
        task_number: &str,
        update: TaskUpdate,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE plan_subtasks
             SET status = ?1, retry_count = ?2, executing_agent = ?3, model_used = ?4,
                 result = ?5, updated_at = ?6
             WHERE conversation_id = ?7 AND task_number = ?8",
            params![
                update.status.as_str(),
                update.retry_count,
                update.agent,
                update.model,
                update.result,
                chrono::Utc::now().to_rfc3339(),
                conversation_id,
                task_number
            ],
        )?;
        Self::ensure_changed(changed, conversation_id, task_number)
    }

    async fn delete_all(&self, conversation_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM plan_subtasks WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(())
    }

    async fn replace(&self, conversation_id: &str, subtasks: &[Subtask]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM plan_subtasks WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        insert_all(&tx, subtasks)?;
        tx.commit()?;
        Ok(())
    }

    async fn revert_running(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE plan_subtasks SET status = ?1, updated_at = ?2
             WHERE conversation_id = ?3 AND status = ?4",
            params![
                TaskStatus::Retrying.as_str(),
                chrono::Utc::now().to_rfc3339(),
                conversation_id,
                TaskStatus::Running.as_str()
            ],
        )?;
        Ok(changed)
    }
}
