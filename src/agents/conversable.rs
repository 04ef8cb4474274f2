//! ConversableAgent：按注册顺序尝试应答者，第一个处理的回复胜出
//!
//! 应答者是带数据的枚举（LLM、任务执行器、人工输入、规划器），不同角色的智能体
//! 只是应答者组合不同；可选的自检在执行成功后再问一次模型「结果是否回答了任务」。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agents::{Agent, AgentDescriptor, AgentRole, HumanInput, Reply, Turn};
use crate::core::ChatError;
use crate::llm::{invoke, LlmClient};
use crate::memory::{ActionReport, Message};
use crate::planning::Planner;
use crate::utils::parse_bool;

pub const SELF_CHECK_SYSTEM_PROMPT: &str = "You are an expert in analyzing artificial intelligence task results.
Your responsibility is to analyze the task goal and the execution result provided by the user, and then make a judgment according to the following rules:
    Rule 1: Only judge whether the execution result is related to the task goal, not whether the content of the result is reasonable.
    Rule 2: If the goal is a calculation, do not verify the numbers themselves. As long as reasonable numbers are given, the answer counts.
If the execution result meets the task goal according to the rules above, return True, otherwise return False. Only True or False is returned.";

pub const SELF_CHECK_FAIL_REASON: &str = "The execution result is judged as not answering the task question. Please re-understand and complete the task.";

/// 执行器：真正干活的部分（运行代码、查库等），返回结构化执行报告
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, turn: &Turn) -> Result<ActionReport, ChatError>;

    fn model_name(&self) -> Option<String> {
        None
    }
}

/// 应答者
pub enum ReplyHandler {
    /// 用 system prompt 调模型，回复即执行结果；模型不可用时不处理
    Llm {
        system_prompt: String,
        llm: Arc<dyn LlmClient>,
        timeout: Duration,
    },
    /// 交给执行器
    Task(Arc<dyn TaskExecutor>),
    /// 问真人；输入关闭时不处理
    Human(Arc<dyn HumanInput>),
    /// 生成并保存计划
    Planning(Arc<Planner>),
}

impl ReplyHandler {
    async fn handle(&self, turn: &Turn) -> Result<Option<Reply>, ChatError> {
        match self {
            ReplyHandler::Llm {
                system_prompt,
                llm,
                timeout,
            } => {
                let text = invoke(llm.as_ref(), system_prompt, &turn.llm_history(), *timeout).await;
                Ok(text.map(|t| {
                    Reply::from_report(ActionReport::success(t)).with_model(llm.model_name())
                }))
            }
            ReplyHandler::Task(executor) => {
                let report = executor.execute(turn).await?;
                Ok(Some(Reply::from_report(report).with_model(executor.model_name())))
            }
            ReplyHandler::Human(input) => Ok(input
                .ask(&turn.content)
                .await
                .map(|answer| Reply::from_report(ActionReport::success(answer)))),
            ReplyHandler::Planning(planner) => planner.plan(turn).await.map(Some),
        }
    }
}

struct SelfCheck {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

/// 通用智能体：描述 + 角色 + 有序应答者列表
pub struct ConversableAgent {
    descriptor: AgentDescriptor,
    role: AgentRole,
    handlers: Vec<ReplyHandler>,
    self_check: Option<SelfCheck>,
}

impl ConversableAgent {
    pub fn new(descriptor: AgentDescriptor, role: AgentRole) -> Self {
        Self {
            descriptor,
            role,
            handlers: Vec::new(),
            self_check: None,
        }
    }

    /// 追加应答者（按追加顺序尝试）
    pub fn with_handler(mut self, handler: ReplyHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// 启用执行结果自检
    pub fn with_self_check(mut self, llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        self.self_check = Some(SelfCheck { llm, timeout });
        self
    }

    /// 由模型直接回答的执行者
    pub fn llm_executor(
        descriptor: AgentDescriptor,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        timeout: Duration,
    ) -> Self {
        Self::new(descriptor, AgentRole::Executor).with_handler(ReplyHandler::Llm {
            system_prompt: system_prompt.into(),
            llm,
            timeout,
        })
    }

    /// 由执行器完成任务的执行者
    pub fn task_executor(descriptor: AgentDescriptor, executor: Arc<dyn TaskExecutor>) -> Self {
        Self::new(descriptor, AgentRole::Executor).with_handler(ReplyHandler::Task(executor))
    }

    /// 人工代理
    pub fn human_proxy(name: impl Into<String>, input: Arc<dyn HumanInput>) -> Self {
        Self::new(
            AgentDescriptor::new(name, "A human who can take over any task when asked.")
                .with_capability("human"),
            AgentRole::HumanProxy,
        )
        .with_handler(ReplyHandler::Human(input))
    }

    /// 规划器智能体
    pub fn planner(planner: Arc<Planner>) -> Self {
        Self::new(planner.descriptor(), AgentRole::Planner)
            .with_handler(ReplyHandler::Planning(planner))
    }

    /// 计划结果校验者：system prompt 固定，具体的计划、任务与结果由调度器放在消息里
    pub fn plan_verifier(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self::new(
            AgentDescriptor::new(
                "PlanVerifier",
                "Judges whether a subtask result meets the action plan.",
            )
            .with_capability("verification"),
            AgentRole::Verifier,
        )
        .with_handler(ReplyHandler::Llm {
            system_prompt: crate::planning::prompts::PLAN_CHECK_SYSTEM_PROMPT.to_string(),
            llm,
            timeout,
        })
    }
}

#[async_trait]
impl Agent for ConversableAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    async fn generate_reply(&self, turn: &Turn) -> Result<Option<Reply>, ChatError> {
        for handler in &self.handlers {
            if let Some(reply) = handler.handle(turn).await? {
                return Ok(Some(reply));
            }
        }
        tracing::warn!(agent = %self.descriptor.name, "no reply handler produced a reply");
        Ok(None)
    }

    async fn verify(&self, turn: &Turn, report: &ActionReport) -> (bool, Option<String>) {
        let Some(check) = &self.self_check else {
            return (true, None);
        };
        let goal = turn
            .context
            .as_ref()
            .map(|c| c.plan_task.as_str())
            .unwrap_or(turn.content.as_str());
        let question = format!(
            "Please understand the following task objective and result and give your judgment:\n\
             Task Goal: {goal}\n\
             Execution Result: {}\n\
             Only True or False is returned.",
            report.content
        );
        let verdict = invoke(
            check.llm.as_ref(),
            SELF_CHECK_SYSTEM_PROMPT,
            &[Message::user(question)],
            check.timeout,
        )
        .await
        .map(|text| parse_bool(&text))
        .unwrap_or(false);

        if verdict {
            (true, None)
        } else {
            (false, Some(SELF_CHECK_FAIL_REASON.to_string()))
        }
    }
}
