//! SQLite 持久化：计划表与消息日志

mod messages;
mod plans;
pub mod sqlite;

pub use sqlite::Database;
