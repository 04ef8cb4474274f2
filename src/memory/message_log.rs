//! 消息日志：会话内所有往来消息的只追加审计记录
//!
//! 调度器在任何状态迁移之前先写日志；消息写入后不再修改或删除。
//! 支持按会话查询与按参与方（双向）查询，顺序即插入顺序。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::StoreError;
use crate::memory::{Role, Shards};

/// 派发子任务时附带的旁路上下文
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    pub plan_task: String,
    pub plan_task_num: String,
    pub use_cache: bool,
}

/// 执行者返回的结构化执行报告
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub is_exe_success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
}

impl ActionReport {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            is_exe_success: true,
            content: content.into(),
            view: None,
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            is_exe_success: false,
            content: content.into(),
            view: None,
        }
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }
}

/// 日志中的一条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub conversation_id: String,
    pub sender: String,
    pub receiver: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub context: Option<MessageContext>,
    #[serde(default)]
    pub action_report: Option<ActionReport>,
    #[serde(default)]
    pub model_name: Option<String>,
    /// 毫秒时间戳
    pub created_at: i64,
}

impl ChatMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            receiver: receiver.into(),
            role,
            content: content.into(),
            context: None,
            action_report: None,
            model_name: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_action_report(mut self, report: ActionReport) -> Self {
        self.action_report = Some(report);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_name = model;
        self
    }

    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }
}

/// 消息日志接口（内存 / SQLite 两种实现）
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// 追加一条消息
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// 会话内全部消息，按插入顺序
    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// 会话内 a 与 b 之间（双向）的消息，按插入顺序
    async fn list_by_pair(
        &self,
        conversation_id: &str,
        a: &str,
        b: &str,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// 内存消息日志：按会话分片
#[derive(Default)]
pub struct InMemoryMessageLog {
    shards: Shards<Vec<ChatMessage>>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let shard = self.shards.get_or_create(&message.conversation_id).await;
        shard.lock().await.push(message.clone());
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        match self.shards.get(conversation_id).await {
            Some(shard) => Ok(shard.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn list_by_pair(
        &self,
        conversation_id: &str,
        a: &str,
        b: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let all = self.list_by_conversation(conversation_id).await?;
        Ok(all.into_iter().filter(|m| m.is_between(a, b)).collect())
    }
}
