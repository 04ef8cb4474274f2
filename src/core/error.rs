//! 错误类型
//!
//! 子任务级失败（执行失败、校验失败、重试耗尽）不走 Err，而是写回计划表并记入消息日志；
//! 只有存储错误、无人工代理时的中断、取消会终止一次运行。

use thiserror::Error;

use crate::llm::LlmError;

/// 计划表 / 消息日志的存储错误（对运行是致命的）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate subtask {task_number} in conversation {conversation_id}")]
    ConstraintViolation {
        conversation_id: String,
        task_number: String,
    },

    #[error("Subtask {task_number} not found in conversation {conversation_id}")]
    NotFound {
        conversation_id: String,
        task_number: String,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// 计划回复无法解析为恰好一份计划
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanFormatError {
    #[error("There are currently {0} json contents")]
    JsonCount(usize),

    #[error("Return json structure error and cannot be converted to a usable plan, {0}")]
    Conversion(String),

    #[error("The plan contains no subtasks")]
    Empty,

    #[error("Duplicate serial_number {0}")]
    DuplicateTask(String),

    #[error("Subtask {task} relies on unknown serial_number {missing}")]
    UnknownDependency { task: String, missing: String },

    #[error("Cyclic dependency detected among subtasks: {0}")]
    CyclicDependency(String),
}

/// 调度器对外暴露的错误
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Plan format error: {0}")]
    PlanFormat(#[from] PlanFormatError),

    /// 派发过程中被人工打断；未注册人工代理时对本次运行是致命的
    #[error("Interrupted while dispatching to {0}")]
    Interrupted(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("No candidate agents available for speaker selection")]
    NoCandidates,

    #[error("Agent {agent} timed out after {secs}s")]
    Timeout { agent: String, secs: u64 },

    #[error("Config error: {0}")]
    Config(String),
}

impl ChatError {
    /// 对本次运行是否致命（子任务级失败由调度器吸收，不会走到这里）
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChatError::Timeout { .. } | ChatError::Llm(_))
    }
}
