//! 计划层：子任务模型、存储接口与依赖图

pub mod graph;
pub mod store;
pub mod types;

pub use graph::{dependencies_met, first_eligible, PlanGraph};
pub use store::{InMemoryPlanStore, PlanStore};
pub use types::{
    compare_task_numbers, parse_depends_on, sort_by_task_number, Subtask, TaskStatus, TaskUpdate,
};
