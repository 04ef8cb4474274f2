//! Beehive - Rust 多智能体协作系统
//!
//! 模块划分：
//! - **agents**: Agent 能力契约、应答者链、注册表、人工输入、会话上下文
//! - **chat**: 发言人选择与计划调度循环（PlanChatManager）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类
//! - **db**: SQLite 持久化（计划表 / 消息日志）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 执行者短期上下文、会话消息日志
//! - **observability**: tracing 订阅器
//! - **plan**: 子任务模型、计划存储接口、依赖图
//! - **planning**: 规划器与 prompt 模板
//! - **utils**: JSON 提取、布尔判定

pub mod agents;
pub mod chat;
pub mod config;
pub mod core;
pub mod db;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod planning;
pub mod utils;

pub use agents::{AgentRegistry, ConversableAgent, ConversationContext};
pub use chat::{PlanChatManager, RunOutcome, RunStatus};
