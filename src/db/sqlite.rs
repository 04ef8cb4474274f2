//! SQLite 数据库：表结构与连接管理
//!
//! 计划表与消息日志共用一个连接；具体读写分别在 plans.rs / messages.rs 中以 `impl Database` 的形式实现。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::core::StoreError;

/// 数据库包装：单连接，Mutex 串行化访问（SQLite 本身也只有一个写者）
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// 打开（必要时创建）数据库文件并初始化表结构
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// 内存数据库（测试 / 一次性运行）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plan_subtasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                task_number TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                assigned_agent TEXT,
                resource_name TEXT,
                depends_on TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                model_used TEXT,
                executing_agent TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(conversation_id, task_number)
             );
             CREATE INDEX IF NOT EXISTS idx_plan_subtasks_status
                ON plan_subtasks(conversation_id, status);
             CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                context TEXT,
                action_report TEXT,
                model_name TEXT,
                created_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation
                ON chat_messages(conversation_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}
