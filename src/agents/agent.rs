//! Agent 抽象
//!
//! 所有智能体（规划器、执行者、校验者、人工代理）实现同一个 Agent trait；
//! 智能体之间从不直接通信，消息都经调度器转发并写入消息日志。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::ConversationContext;
use crate::core::ChatError;
use crate::memory::{ActionReport, Message, MessageContext};

/// 智能体角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Executor,
    Verifier,
    HumanProxy,
}

impl AgentRole {
    /// 可被选为子任务执行者
    pub fn can_execute(&self) -> bool {
        matches!(self, AgentRole::Executor | AgentRole::HumanProxy)
    }
}

/// 能力描述：展示给规划器与发言人选择
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }
}

/// 发给智能体的一轮输入
#[derive(Debug, Clone)]
pub struct Turn {
    pub conversation: Arc<ConversationContext>,
    pub sender: String,
    pub content: String,
    /// 短期上下文（依赖任务的内容与结果、规划修复反馈等）
    pub history: Vec<Message>,
    pub context: Option<MessageContext>,
}

impl Turn {
    pub fn new(
        conversation: Arc<ConversationContext>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation,
            sender: sender.into(),
            content: content.into(),
            history: Vec::new(),
            context: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation.conversation_id
    }

    /// 短期上下文 + 本轮内容，作为 LLM 的对话历史
    pub fn llm_history(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(Message::user(self.content.clone()));
        messages
    }
}

/// 智能体的回复
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub action_report: Option<ActionReport>,
    pub model_name: Option<String>,
}

impl Reply {
    /// 纯文本回复（无执行报告）
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            action_report: None,
            model_name: None,
        }
    }

    /// 以执行报告为准的回复，content 取报告内容
    pub fn from_report(report: ActionReport) -> Self {
        Self {
            content: report.content.clone(),
            action_report: Some(report),
            model_name: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_name = model;
        self
    }

    /// 执行是否成功；没有执行报告视为失败
    pub fn is_success(&self) -> bool {
        self.action_report
            .as_ref()
            .map(|r| r.is_exe_success)
            .unwrap_or(false)
    }
}

/// 智能体能力契约
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn role(&self) -> AgentRole;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// 生成回复；Ok(None) 表示拒绝回答（交给下一个应答者）
    async fn generate_reply(&self, turn: &Turn) -> Result<Option<Reply>, ChatError>;

    /// 对成功的执行结果做自检，返回 (是否通过, 失败原因)
    async fn verify(&self, _turn: &Turn, _report: &ActionReport) -> (bool, Option<String>) {
        (true, None)
    }

    /// 接收一条消息；request_reply 时生成回复，成功的执行结果再经 verify 自检
    async fn receive(&self, turn: &Turn, request_reply: bool) -> Result<Option<Reply>, ChatError> {
        if !request_reply {
            return Ok(None);
        }
        let Some(mut reply) = self.generate_reply(turn).await? else {
            return Ok(None);
        };
        if let Some(report) = reply.action_report.as_ref().filter(|r| r.is_exe_success) {
            let (passed, reason) = self.verify(turn, report).await;
            if !passed {
                let reason = reason.unwrap_or_else(|| "self check failed".to_string());
                tracing::info!(agent = %self.name(), reason = %reason, "self check rejected result");
                reply.content = reason.clone();
                reply.action_report = Some(ActionReport::failure(reason));
            }
        }
        Ok(Some(reply))
    }
}
