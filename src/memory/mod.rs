//! 记忆层：执行者短期上下文、会话消息日志

pub mod conversation;
pub mod message_log;
pub mod shard;

pub use conversation::{ConversationMemory, Message, Role};
pub use message_log::{
    ActionReport, ChatMessage, InMemoryMessageLog, MessageContext, MessageLog,
};
pub use shard::Shards;
