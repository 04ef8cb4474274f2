//! 智能体层：能力契约、应答者链、注册表、人工输入、会话上下文

pub mod agent;
pub mod context;
pub mod conversable;
pub mod human;
pub mod registry;

pub use agent::{Agent, AgentDescriptor, AgentRole, Reply, Turn};
pub use context::{ConversationContext, Resource, ResourceKind};
pub use conversable::{ConversableAgent, ReplyHandler, TaskExecutor};
pub use human::{ChannelInput, HumanHandle, HumanInput, StdinInput};
pub use registry::{render_descriptors, AgentRegistry};
