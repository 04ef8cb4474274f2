//! Planner：把用户目标拆成带依赖的子任务并保存
//!
//! 调模型 → 从回复中提取恰好一个 JSON 数组 → 逐项转为 Subtask → 依赖图校验 →
//! 整体替换会话的旧计划。任何一步失败都不会动旧计划，失败原因作为回复内容返回，
//! 供用户查看或作为下一次修复规划的反馈。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::agents::{render_descriptors, AgentDescriptor, Reply, Turn};
use crate::core::{ChatError, PlanFormatError};
use crate::llm::{invoke, LlmClient};
use crate::memory::ActionReport;
use crate::plan::{parse_depends_on, PlanGraph, PlanStore, Subtask};
use crate::planning::prompts::{render_planning_prompt, render_repair_prompt};
use crate::utils::find_json_objects;

pub const PLANNER_NAME: &str = "Planner";

/// 规划失败回复的固定前缀
pub const PLAN_FAIL_PREFIX: &str =
    "Please recheck your answer, no usable plans generated in correct format, ";

/// 规划器
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn PlanStore>,
    /// 可分配的执行者（启动时从注册表取快照）
    agents: Vec<AgentDescriptor>,
    timeout: Duration,
    /// 进行中的规划循环已尝试的次数；第二次起使用修复 prompt，循环结束即移除
    attempts: Mutex<HashMap<String, u32>>,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn PlanStore>,
        agents: Vec<AgentDescriptor>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            store,
            agents,
            timeout,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::new(
            PLANNER_NAME,
            "Decomposes the user's goal into subtasks with dependencies and assigns agents to them.",
        )
        .with_capability("planning")
    }

    /// 本会话已规划的次数
    pub fn attempts(&self, conversation_id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }

    fn next_attempt(&self, conversation_id: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let count = attempts.entry(conversation_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn forget(&self, conversation_id: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(conversation_id);
    }

    /// 规划一次；只有存储错误会返回 Err
    pub async fn plan(&self, turn: &Turn) -> Result<Reply, ChatError> {
        let ctx = &turn.conversation;
        let attempt = self.next_attempt(&ctx.conversation_id);
        let resources = ctx.render_resources();
        let agents = render_descriptors(&self.agents, &ctx.agents);
        let system_prompt = if attempt == 1 {
            render_planning_prompt(&resources, &agents)
        } else {
            render_repair_prompt(&resources, &agents)
        };
        tracing::debug!(conversation = %ctx.conversation_id, attempt, prompt = %system_prompt, "planning");

        let text = invoke(
            self.llm.as_ref(),
            &system_prompt,
            &turn.llm_history(),
            self.timeout,
        )
        .await
        .unwrap_or_default();
        let model = self.llm.model_name();

        match parse_plan(&text, &ctx.conversation_id, ctx.max_retries) {
            Ok(subtasks) => {
                let saved = self.store.replace(&ctx.conversation_id, &subtasks).await;
                self.forget(&ctx.conversation_id);
                saved?;
                tracing::info!(
                    conversation = %ctx.conversation_id,
                    subtasks = subtasks.len(),
                    attempt,
                    "plan saved"
                );
                Ok(Reply::from_report(ActionReport::success(summarize(&subtasks))).with_model(model))
            }
            Err(e) => {
                tracing::warn!(conversation = %ctx.conversation_id, attempt, error = %e, "planning failed");
                let reason = format!("{PLAN_FAIL_PREFIX}{e}");
                // 调度器最多尝试 1 + max_retries 次
                if attempt > ctx.max_retries {
                    self.forget(&ctx.conversation_id);
                }
                Ok(Reply::from_report(ActionReport::failure(reason)).with_model(model))
            }
        }
    }
}

/// 编号摘要：`1,content.\n2,content`
pub fn summarize(subtasks: &[Subtask]) -> String {
    subtasks
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{},{}", i + 1, t.content))
        .collect::<Vec<_>>()
        .join(".\n")
}

/// 字符串或数字 → 字符串
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// rely 字段：逗号分隔串、单个数字、数组或 null
fn parse_rely(index: usize, value: Option<&Value>) -> Result<Vec<String>, PlanFormatError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(parse_depends_on(s)),
        Some(Value::Number(n)) => Ok(vec![n.to_string()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                scalar_string(v).ok_or_else(|| {
                    PlanFormatError::Conversion(format!("item {index}: invalid rely entry {v}"))
                })
            })
            .collect(),
        Some(other) => Err(PlanFormatError::Conversion(format!(
            "item {index}: invalid rely {other}"
        ))),
    }
}

fn optional_text(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(scalar_string)
        .filter(|s| !s.is_empty())
}

fn to_subtask(
    index: usize,
    item: &Value,
    conversation_id: &str,
    max_retries: u32,
) -> Result<Subtask, PlanFormatError> {
    if !item.is_object() {
        return Err(PlanFormatError::Conversion(format!(
            "item {index} is not an object"
        )));
    }
    let serial_number = item
        .get("serial_number")
        .and_then(scalar_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            PlanFormatError::Conversion(format!("item {index}: missing serial_number"))
        })?;
    let content = item
        .get("content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PlanFormatError::Conversion(format!("item {index}: missing content")))?;

    let mut task = Subtask::new(conversation_id, serial_number, content)
        .with_depends_on(parse_rely(index, item.get("rely"))?)
        .with_max_retries(max_retries);
    task.assigned_agent = optional_text(item, "agent");
    task.resource_name = optional_text(item, "resource");
    Ok(task)
}

/// 解析模型回复为计划；要求恰好一个非空 JSON 数组且依赖合法
pub fn parse_plan(
    text: &str,
    conversation_id: &str,
    max_retries: u32,
) -> Result<Vec<Subtask>, PlanFormatError> {
    let objects = find_json_objects(text);
    if objects.len() != 1 {
        return Err(PlanFormatError::JsonCount(objects.len()));
    }
    let items = objects[0]
        .as_array()
        .ok_or_else(|| PlanFormatError::Conversion("the plan is not a json array".to_string()))?;
    if items.is_empty() {
        return Err(PlanFormatError::Empty);
    }

    let subtasks = items
        .iter()
        .enumerate()
        .map(|(i, item)| to_subtask(i, item, conversation_id, max_retries))
        .collect::<Result<Vec<_>, _>>()?;
    PlanGraph::validate(&subtasks)?;
    Ok(subtasks)
}
