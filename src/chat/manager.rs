//! PlanChatManager：计划驱动的调度循环
//!
//! 没有计划时先让规划器生成计划（失败则带着原因重试修复），然后逐轮：
//! 取第一个依赖已满足的 TODO/RETRYING 子任务 → 选执行者 → 注入依赖结果 →
//! 派发（带超时、可取消、可被打断转人工）→ 校验结果 → 更新状态。
//! 所有往来消息先写消息日志，再做状态迁移。
//! 打断（interrupt）只作用于派发中的执行者：当前轮转交人工代理，运行继续；取消（cancel）结束整个运行。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentRegistry, AgentRole, ConversationContext, Reply, Turn};
use crate::chat::SpeakerSelector;
use crate::core::{ChatError, StoreError};
use crate::memory::{
    ActionReport, ChatMessage, ConversationMemory, Message, MessageContext, MessageLog, Role,
};
use crate::plan::{first_eligible, PlanStore, Subtask, TaskStatus, TaskUpdate};
use crate::utils::parse_bool;

pub const MANAGER_NAME: &str = "plan_manager";
pub const USER_NAME: &str = "User";
pub const TERMINATE: &str = "TERMINATE";
pub const PLAN_CHECK_FAILED: &str = "plan result check failed";

/// 调度器设置（来自 [chat] 配置段）
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// 被打断时接手的人工代理名
    pub admin_name: String,
    /// 单次派发的超时
    pub dispatch_timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            admin_name: "Admin".to_string(),
            dispatch_timeout: Duration::from_secs(300),
        }
    }
}

/// 一次运行的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// 没有剩余可执行子任务，已向用户发送 TERMINATE
    Terminated,
    /// 还有子任务，但依赖永远无法满足
    Blocked,
    /// 规划多次失败
    PlanFailed,
    /// 达到轮数上限
    RoundLimit,
}

/// 运行结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub conversation_id: String,
    pub status: RunStatus,
    /// 本次运行派发的轮数
    pub rounds: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// 运行结束时仍未完成的子任务
    pub pending: Vec<String>,
    pub plan_error: Option<String>,
}

impl RunOutcome {
    /// 正常结束且没有失败的子任务
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Terminated && self.failed.is_empty() && self.pending.is_empty()
    }
}

/// 打断句柄：打断正在派发的执行者，让人工代理接手当前子任务
///
/// 没有进行中的派发时，打断作用于下一次派发。
#[derive(Clone, Default)]
pub struct InterruptHandle {
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.notify.notify_one();
    }

    async fn interrupted(&self) {
        self.notify.notified().await;
    }
}

/// 调度器
pub struct PlanChatManager {
    store: Arc<dyn PlanStore>,
    log: Arc<dyn MessageLog>,
    registry: Arc<AgentRegistry>,
    planner: Arc<dyn Agent>,
    verifier: Arc<dyn Agent>,
    selector: SpeakerSelector,
    settings: ChatSettings,
    interrupt: InterruptHandle,
}

impl PlanChatManager {
    /// 从注册表中取规划器与校验者；缺少任一个返回 Config 错误
    pub fn new(
        store: Arc<dyn PlanStore>,
        log: Arc<dyn MessageLog>,
        registry: Arc<AgentRegistry>,
        selector: SpeakerSelector,
        settings: ChatSettings,
    ) -> Result<Self, ChatError> {
        let planner = registry
            .first_with_role(AgentRole::Planner)
            .ok_or_else(|| ChatError::Config("no planner agent registered".to_string()))?;
        let verifier = registry
            .first_with_role(AgentRole::Verifier)
            .ok_or_else(|| ChatError::Config("no verifier agent registered".to_string()))?;
        Ok(Self {
            store,
            log,
            registry,
            planner,
            verifier,
            selector,
            settings,
            interrupt: InterruptHandle::default(),
        })
    }

    /// 本调度器的打断句柄（可跨任务克隆）
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// 运行一个会话直到结束；子任务级失败不会返回 Err，参与者名单里有未注册的智能体时返回 UnknownAgent
    pub async fn run(
        &self,
        ctx: ConversationContext,
        goal: &str,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, ChatError> {
        if let Some(unknown) = ctx.agents.iter().find(|name| self.registry.get(name).is_none()) {
            return Err(ChatError::UnknownAgent(unknown.clone()));
        }
        let conversation = Arc::new(ctx);
        let conv_id = conversation.conversation_id.clone();

        let reverted = self.store.revert_running(&conv_id).await?;
        if reverted > 0 {
            tracing::info!(conversation = %conv_id, reverted, "resumed subtasks left running");
        }
        self.record(&conv_id, USER_NAME, MANAGER_NAME, Role::User, goal)
            .await?;

        if self.store.list_by_conversation(&conv_id).await?.is_empty() {
            if let Some(reason) = self.plan(&conversation, goal, &cancel).await? {
                return self
                    .outcome(&conv_id, RunStatus::PlanFailed, 0, Some(reason))
                    .await;
            }
        }

        let mut rounds = 0;
        let mut last_speaker: Option<String> = None;
        let status = loop {
            if cancel.is_cancelled() {
                tracing::info!(conversation = %conv_id, rounds, "run cancelled");
                return Err(ChatError::Cancelled);
            }

            let todo = self.store.list_todo(&conv_id).await?;
            if todo.is_empty() {
                self.record(&conv_id, MANAGER_NAME, USER_NAME, Role::Assistant, TERMINATE)
                    .await?;
                tracing::info!(conversation = %conv_id, rounds, "plan finished");
                break RunStatus::Terminated;
            }

            let all = self.store.list_by_conversation(&conv_id).await?;
            let Some(task) = first_eligible(&todo, &all).cloned() else {
                let numbers: Vec<&str> = todo.iter().map(|t| t.task_number.as_str()).collect();
                let reason = format!(
                    "Subtasks {} cannot run because their dependencies did not complete",
                    numbers.join(",")
                );
                tracing::warn!(conversation = %conv_id, blocked = %numbers.join(","), "plan blocked");
                self.record(&conv_id, MANAGER_NAME, USER_NAME, Role::Assistant, &reason)
                    .await?;
                self.record(&conv_id, MANAGER_NAME, USER_NAME, Role::Assistant, TERMINATE)
                    .await?;
                break RunStatus::Blocked;
            };

            if rounds >= conversation.max_rounds {
                let reason = format!(
                    "Stopped after {} rounds with unfinished subtasks",
                    conversation.max_rounds
                );
                tracing::warn!(conversation = %conv_id, rounds, "round limit reached");
                self.record(&conv_id, MANAGER_NAME, USER_NAME, Role::Assistant, &reason)
                    .await?;
                break RunStatus::RoundLimit;
            }
            rounds += 1;

            let speaker = self
                .execute_task(&conversation, &task, &all, last_speaker.as_deref(), &cancel)
                .await?;
            last_speaker = Some(speaker);
        };

        self.outcome(&conv_id, status, rounds, None).await
    }

    /// 规划，失败时把原因作为反馈再试，最多 max_retries 次；返回最终失败原因
    async fn plan(
        &self,
        conversation: &Arc<ConversationContext>,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ChatError> {
        let mut feedback: Vec<Message> = Vec::new();
        let mut reason = String::new();

        for attempt in 0..=conversation.max_retries {
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            let turn = Turn::new(Arc::clone(conversation), MANAGER_NAME, goal)
                .with_history(feedback.clone());
            let reply = self.relay(&self.planner, &turn, None).await?;
            if reply.is_success() {
                return Ok(None);
            }
            reason = reply.content;
            tracing::warn!(
                conversation = %conversation.conversation_id,
                attempt,
                reason = %reason,
                "planning attempt failed"
            );
            feedback.push(Message::user(goal));
            feedback.push(Message::assistant(reason.clone()));
        }

        self.record(
            &conversation.conversation_id,
            MANAGER_NAME,
            USER_NAME,
            Role::Assistant,
            &format!("No usable plan could be generated: {reason}"),
        )
        .await?;
        Ok(Some(reason))
    }

    /// 执行一个子任务，返回本轮实际执行者的名字
    async fn execute_task(
        &self,
        conversation: &Arc<ConversationContext>,
        task: &Subtask,
        all: &[Subtask],
        last_speaker: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError> {
        let conv_id = conversation.conversation_id.as_str();
        let candidates: Vec<Arc<dyn Agent>> = self
            .registry
            .agents()
            .iter()
            .filter(|a| a.role().can_execute() && conversation.includes(a.name()))
            .cloned()
            .collect();
        let speaker = self
            .selector
            .select(last_speaker, &candidates, self.registry.agents(), &task.content)
            .await?;
        tracing::info!(
            conversation = %conv_id,
            task = %task.task_number,
            agent = %speaker.name(),
            "speaker selected"
        );

        let history = self.dependency_history(conv_id, task).await?;
        let turn = Turn::new(Arc::clone(conversation), MANAGER_NAME, task.content.clone())
            .with_history(history)
            .with_context(MessageContext {
                plan_task: task.content.clone(),
                plan_task_num: task.task_number.clone(),
                use_cache: task.retry_count <= 1,
            });
        self.log_outbound(&speaker, &turn).await?;
        self.store
            .update(
                conv_id,
                &task.task_number,
                TaskUpdate {
                    status: TaskStatus::Running,
                    retry_count: task.retry_count,
                    agent: Some(speaker.name().to_string()),
                    model: task.model_used.clone(),
                    result: task.result.clone(),
                },
            )
            .await?;

        let started = Instant::now();
        let dispatched = tokio::select! {
            _ = cancel.cancelled() => Err(ChatError::Cancelled),
            result = self.dispatch(&speaker, &candidates, &turn) => result,
        };
        let (executor, reply) = match dispatched {
            Ok(done) => done,
            Err(e) => {
                audit(conv_id, task, speaker.name(), "aborted", started);
                return Err(e);
            }
        };

        let report = reply
            .action_report
            .clone()
            .unwrap_or_else(|| ActionReport::failure(reply.content.clone()));
        let outcome = if report.is_exe_success {
            let passed = self
                .check_plan_expected(conversation, all, task, &executor, &report.content)
                .await?;
            if passed {
                self.store
                    .complete(conv_id, &task.task_number, &report.content)
                    .await?;
                tracing::info!(conversation = %conv_id, task = %task.task_number, "subtask complete");
                "complete"
            } else {
                self.fail(conv_id, task, executor.name(), reply.model_name.clone(), PLAN_CHECK_FAILED)
                    .await?;
                "check_failed"
            }
        } else {
            self.fail(conv_id, task, executor.name(), reply.model_name.clone(), "")
                .await?;
            "failed"
        };
        audit(conv_id, task, executor.name(), outcome, started);

        Ok(executor.name().to_string())
    }

    /// 派发给执行者（出站消息已记录）；被打断时转交人工代理（若在候选中），否则中断对本次运行致命
    async fn dispatch(
        &self,
        speaker: &Arc<dyn Agent>,
        candidates: &[Arc<dyn Agent>],
        turn: &Turn,
    ) -> Result<(Arc<dyn Agent>, Reply), ChatError> {
        let timeout = Some(self.settings.dispatch_timeout);
        let exchanged = tokio::select! {
            result = self.exchange(speaker, turn, timeout) => result,
            _ = self.interrupt.interrupted() => Err(ChatError::Interrupted(speaker.name().to_string())),
        };
        match exchanged {
            Ok(reply) => Ok((Arc::clone(speaker), reply)),
            Err(ChatError::Interrupted(who)) => {
                let Some(admin) = self.human_fallback(candidates, speaker.name()) else {
                    tracing::error!(agent = %who, "interrupted with no human proxy to take over");
                    return Err(ChatError::Interrupted(who));
                };
                tracing::warn!(agent = %who, admin = %admin.name(), "interrupted, handing over");
                let reply = self.relay(&admin, turn, timeout).await?;
                Ok((admin, reply))
            }
            Err(e) => Err(e),
        }
    }

    fn human_fallback(&self, candidates: &[Arc<dyn Agent>], exclude: &str) -> Option<Arc<dyn Agent>> {
        let others = || candidates.iter().filter(|a| a.name() != exclude);
        others()
            .find(|a| a.name() == self.settings.admin_name)
            .or_else(|| others().find(|a| a.role() == AgentRole::HumanProxy))
            .cloned()
    }

    /// 转发一轮并记录往来消息；拒答、超时和非致命错误都折算成失败回复
    async fn relay(
        &self,
        agent: &Arc<dyn Agent>,
        turn: &Turn,
        timeout: Option<Duration>,
    ) -> Result<Reply, ChatError> {
        self.log_outbound(agent, turn).await?;
        self.exchange(agent, turn, timeout).await
    }

    async fn log_outbound(&self, agent: &Arc<dyn Agent>, turn: &Turn) -> Result<(), ChatError> {
        let mut outbound = ChatMessage::new(
            turn.conversation_id(),
            turn.sender.as_str(),
            agent.name(),
            Role::User,
            turn.content.as_str(),
        );
        if let Some(context) = &turn.context {
            outbound = outbound.with_context(context.clone());
        }
        self.log.append(&outbound).await?;
        Ok(())
    }

    /// 交给 agent 应答并记录回复
    async fn exchange(
        &self,
        agent: &Arc<dyn Agent>,
        turn: &Turn,
        timeout: Option<Duration>,
    ) -> Result<Reply, ChatError> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, agent.receive(turn, true)).await {
                Ok(result) => result,
                Err(_) => Err(ChatError::Timeout {
                    agent: agent.name().to_string(),
                    secs: limit.as_secs(),
                }),
            },
            None => agent.receive(turn, true).await,
        };
        let reply = match received {
            Ok(Some(reply)) => reply,
            Ok(None) => Reply::from_report(ActionReport::failure(format!(
                "{} produced no reply",
                agent.name()
            ))),
            Err(e) if !e.is_fatal() => {
                tracing::warn!(agent = %agent.name(), error = %e, "agent turn failed");
                Reply::from_report(ActionReport::failure(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let mut inbound = ChatMessage::new(
            turn.conversation_id(),
            agent.name(),
            turn.sender.as_str(),
            Role::Assistant,
            reply.content.as_str(),
        )
        .with_model(reply.model_name.clone());
        if let Some(report) = &reply.action_report {
            inbound = inbound.with_action_report(report.clone());
        }
        self.log.append(&inbound).await?;
        Ok(reply)
    }

    /// 依赖任务的（内容, 结果）作为执行者的短期上下文
    async fn dependency_history(
        &self,
        conversation_id: &str,
        task: &Subtask,
    ) -> Result<Vec<Message>, ChatError> {
        if task.depends_on.is_empty() {
            return Ok(Vec::new());
        }
        let deps = self
            .store
            .list_by_numbers(conversation_id, &task.depends_on)
            .await?;
        let mut memory = ConversationMemory::for_dependencies(deps.len());
        for dep in deps.iter().filter(|d| d.status == TaskStatus::Complete) {
            memory.push(Message::user(dep.content.clone()));
            memory.push(Message::assistant(dep.result.clone().unwrap_or_default()));
        }
        Ok(memory.into_messages())
    }

    /// 让校验者判断执行结果是否满足计划中的当前任务
    async fn check_plan_expected(
        &self,
        conversation: &Arc<ConversationContext>,
        all: &[Subtask],
        task: &Subtask,
        executor: &Arc<dyn Agent>,
        result: &str,
    ) -> Result<bool, ChatError> {
        let plan = all
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{},{}", i + 1, t.content))
            .collect::<Vec<_>>()
            .join("\n");
        let question = format!(
            "Read and understand the generated result of the task plan and the current task objective, \
             and determine whether they meet expectations.\n\
             Agent: {}: {}\n\
             The complete action plan:\n{plan}\n\
             Task content: {}\n\
             Task Result: {result}\n\
             Only True or False is returned.",
            executor.name(),
            executor.descriptor().description,
            task.content
        );
        let turn = Turn::new(Arc::clone(conversation), MANAGER_NAME, question);
        let reply = self.relay(&self.verifier, &turn, None).await?;
        Ok(reply.is_success() && parse_bool(&reply.content))
    }

    /// 记一次失败：未超出重试上限为 RETRYING，否则 FAILED
    async fn fail(
        &self,
        conversation_id: &str,
        task: &Subtask,
        executor: &str,
        model: Option<String>,
        result: &str,
    ) -> Result<(), ChatError> {
        let (status, retry_count) = task.status_after_failure();
        self.store
            .update(
                conversation_id,
                &task.task_number,
                TaskUpdate {
                    status,
                    retry_count,
                    agent: Some(executor.to_string()),
                    model,
                    result: Some(result.to_string()),
                },
            )
            .await?;

        if status == TaskStatus::Failed {
            tracing::warn!(
                conversation = %conversation_id,
                task = %task.task_number,
                retry_count,
                "subtask failed, retry budget exhausted"
            );
            let reason = if result.is_empty() { "execution failed" } else { result };
            self.record(
                conversation_id,
                MANAGER_NAME,
                USER_NAME,
                Role::Assistant,
                &format!(
                    "Subtask {} failed after {} attempts: {}",
                    task.task_number, retry_count, reason
                ),
            )
            .await?;
        } else {
            tracing::info!(
                conversation = %conversation_id,
                task = %task.task_number,
                retry_count,
                "subtask will be retried"
            );
        }
        Ok(())
    }

    async fn record(
        &self,
        conversation_id: &str,
        sender: &str,
        receiver: &str,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError> {
        self.log
            .append(&ChatMessage::new(
                conversation_id,
                sender,
                receiver,
                role,
                content,
            ))
            .await
    }

    async fn outcome(
        &self,
        conversation_id: &str,
        status: RunStatus,
        rounds: usize,
        plan_error: Option<String>,
    ) -> Result<RunOutcome, ChatError> {
        let tasks = self.store.list_by_conversation(conversation_id).await?;
        let numbers = |wanted: fn(&TaskStatus) -> bool| {
            tasks
                .iter()
                .filter(|t| wanted(&t.status))
                .map(|t| t.task_number.clone())
                .collect::<Vec<_>>()
        };
        Ok(RunOutcome {
            conversation_id: conversation_id.to_string(),
            status,
            rounds,
            completed: numbers(|s| *s == TaskStatus::Complete),
            failed: numbers(|s| *s == TaskStatus::Failed),
            pending: numbers(|s| !s.is_terminal()),
            plan_error,
        })
    }
}

/// 每次派发一行结构化审计日志（JSON）
fn audit(conversation_id: &str, task: &Subtask, agent: &str, outcome: &str, started: Instant) {
    let audit = serde_json::json!({
        "event": "dispatch_audit",
        "conversation": conversation_id,
        "task": task.task_number,
        "agent": agent,
        "outcome": outcome,
        "retry_count": task.retry_count,
        "duration_ms": started.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit.to_string(), "dispatch");
}
