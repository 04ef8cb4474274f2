//! 规划层：prompt 模板与规划器

pub mod planner;
pub mod prompts;

pub use planner::{parse_plan, summarize, Planner, PLANNER_NAME, PLAN_FAIL_PREFIX};
