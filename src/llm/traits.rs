//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient::complete。
//! 调度器只通过 invoke 调用模型：带超时，失败时返回 None，由调用方走确定性兜底。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("No model reachable")]
    Unavailable,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 当前使用的模型名，用于子任务的 model_used 溯源
    fn model_name(&self) -> Option<String> {
        None
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 拼 system + history 调用模型；超时或出错返回 None（等价于「没有可用模型」）
pub async fn invoke(
    llm: &dyn LlmClient,
    system_prompt: &str,
    history: &[Message],
    timeout: Duration,
) -> Option<String> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend_from_slice(history);

    match tokio::time::timeout(timeout, llm.complete(&messages)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
        Ok(Ok(_)) => {
            tracing::warn!("LLM returned empty content");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "LLM call failed");
            None
        }
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs(), "LLM call timed out");
            None
        }
    }
}
