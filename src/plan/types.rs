//! 计划数据模型
//!
//! 子任务状态机：TODO → RUNNING → {COMPLETE | RETRYING → RUNNING | FAILED}。
//! RETRYING 与 TODO 同样可被 list_todo 选中；retry_count 超过 max_retries 即 FAILED。

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// 子任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Running,
    Retrying,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "running" => Some(TaskStatus::Running),
            "retrying" => Some(TaskStatus::Retrying),
            "complete" => Some(TaskStatus::Complete),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// 可被 list_todo 选中（TODO / RETRYING）
    pub fn is_selectable(&self) -> bool {
        matches!(self, TaskStatus::Todo | TaskStatus::Retrying)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// 计划中的一个子任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub conversation_id: String,
    /// 会话内唯一，决定默认执行顺序
    pub task_number: String,
    pub title: String,
    /// 派发给执行者的内容
    pub content: String,
    /// 规划时建议的执行者（仅供参考，实际由发言人选择决定）
    pub assigned_agent: Option<String>,
    pub resource_name: Option<String>,
    /// 依赖的 task_number，规划时一次性解析
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<String>,
    pub model_used: Option<String>,
    pub executing_agent: Option<String>,
}

impl Subtask {
    pub fn new(
        conversation_id: impl Into<String>,
        task_number: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            conversation_id: conversation_id.into(),
            task_number: task_number.into(),
            title: content.clone(),
            content,
            assigned_agent: None,
            resource_name: None,
            depends_on: Vec::new(),
            status: TaskStatus::Todo,
            retry_count: 0,
            max_retries: 3,
            result: None,
            model_used: None,
            executing_agent: None,
        }
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }

    /// 再失败一次后的状态：未超出 max_retries 则 RETRYING，否则 FAILED
    pub fn status_after_failure(&self) -> (TaskStatus, u32) {
        let next = self.retry_count + 1;
        if next > self.max_retries {
            (TaskStatus::Failed, next)
        } else {
            (TaskStatus::Retrying, next)
        }
    }
}

/// 一次原子更新要写入的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub retry_count: u32,
    pub agent: Option<String>,
    pub model: Option<String>,
    pub result: Option<String>,
}

/// 逗号分隔的依赖串解析为列表；空串 / 空白项忽略
pub fn parse_depends_on(rely: &str) -> Vec<String> {
    rely.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// task_number 排序：纯数字按数值，其余按字典序且排在数字之后
pub fn compare_task_numbers(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

pub fn sort_by_task_number(tasks: &mut [Subtask]) {
    tasks.sort_by(|a, b| compare_task_numbers(&a.task_number, &b.task_number));
}
