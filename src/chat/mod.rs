//! 调度层：发言人选择与计划调度循环

pub mod manager;
pub mod selector;

pub use manager::{
    ChatSettings, InterruptHandle, PlanChatManager, RunOutcome, RunStatus, MANAGER_NAME, PLAN_CHECK_FAILED,
    TERMINATE, USER_NAME,
};
pub use selector::{mentioned_agents, next_agent, SelectionPolicy, SpeakerSelector};
