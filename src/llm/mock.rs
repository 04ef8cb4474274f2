//! Mock / Scripted LLM 客户端（用于离线运行与测试，无需 API）
//!
//! - MockLlmClient：按 system prompt 的意图给出固定回复（单步计划 / True / 回显），便于本地跑通调度流程。
//! - ScriptedLlmClient：按 system prompt 子串匹配预置回复，记录每次调用，供集成测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

fn system_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

/// Mock 客户端：规划请求返回单步计划，校验请求返回 True，其余回显最后一条 User 消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let system = system_text(messages);
        let input = last_user(messages);

        if system.contains("serial_number") {
            let plan = serde_json::json!([{
                "serial_number": "1",
                "agent": "",
                "content": input,
                "rely": ""
            }]);
            return Ok(plan.to_string());
        }
        if system.contains("True or False") {
            return Ok("True".to_string());
        }
        Ok(format!("Echo from Mock: {}", input))
    }

    fn model_name(&self) -> Option<String> {
        Some("mock".to_string())
    }
}

/// 一条预置规则：system prompt 含 needle 时按顺序返回 replies，最后一条重复使用
#[derive(Debug)]
struct Rule {
    needle: String,
    replies: VecDeque<String>,
}

/// 脚本化客户端：规则按注册顺序匹配，无匹配时返回 Unavailable（模拟模型不可达）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.with_replies(needle, vec![reply.into()])
    }

    pub fn with_replies(self, needle: impl Into<String>, replies: Vec<String>) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                needle: needle.into(),
                replies: replies.into(),
            });
        self
    }

    /// 所有调用的完整消息列表（含 system）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// system prompt 含 needle 的调用次数
    pub fn call_count(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|msgs| system_text(msgs).contains(needle))
            .count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        let system = system_text(messages);
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let rule = rules
            .iter_mut()
            .find(|r| system.contains(&r.needle))
            .ok_or(LlmError::Unavailable)?;

        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        };
        reply.ok_or(LlmError::Unavailable)
    }

    fn model_name(&self) -> Option<String> {
        Some("scripted".to_string())
    }
}
