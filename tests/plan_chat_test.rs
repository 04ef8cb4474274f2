//! 计划调度集成测试：脚本化模型 + 脚本化执行者驱动完整的 PlanChatManager

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use beehive::agents::{ChannelInput, ConversableAgent, ConversationContext};
use beehive::chat::{RunStatus, SelectionPolicy, MANAGER_NAME, PLAN_CHECK_FAILED, TERMINATE, USER_NAME};
use beehive::core::{ChatError, StoreError};
use beehive::db::Database;
use beehive::llm::ScriptedLlmClient;
use beehive::memory::{InMemoryMessageLog, MessageLog, Role};
use beehive::plan::{InMemoryPlanStore, PlanStore, Subtask, TaskStatus, TaskUpdate};
use beehive::planning::PLAN_FAIL_PREFIX;
use common::*;
use tokio_util::sync::CancellationToken;

fn ctx(id: &str) -> ConversationContext {
    ConversationContext::new(id)
}

#[tokio::test]
async fn test_single_task_completes_and_terminates() {
    let coder = Arc::new(ScriptedExecutor::succeed("42"));
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "compute the answer", "")])))
        .executor("Coder", coder.clone())
        .build();

    let outcome = h
        .manager
        .run(ctx("c1"), "what is the answer", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Terminated);
    assert!(outcome.is_success());
    assert_eq!(outcome.completed, vec!["1"]);
    assert_eq!(outcome.rounds, 1);

    let task = h.store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.result.as_deref(), Some("42"));
    assert_eq!(coder.seen()[0].task_number.as_deref(), Some("1"));
    assert_eq!(coder.seen()[0].use_cache, Some(true));

    let messages = h.log.list_by_conversation("c1").await.unwrap();
    let first = messages.first().unwrap();
    assert_eq!((first.sender.as_str(), first.receiver.as_str()), (USER_NAME, MANAGER_NAME));
    let last = messages.last().unwrap();
    assert_eq!(last.content, TERMINATE);
    assert_eq!(last.receiver, USER_NAME);

    // 派发与回复都落在 manager ↔ Coder 之间
    let pair = h.log.list_by_pair("c1", MANAGER_NAME, "Coder").await.unwrap();
    assert_eq!(pair.len(), 2);
    assert_eq!(pair[0].context.as_ref().unwrap().plan_task_num, "1");
    assert_eq!(pair[1].role, Role::Assistant);
    assert_eq!(pair[1].model_name.as_deref(), Some("scripted-exec"));
    assert!(pair[1].action_report.as_ref().unwrap().is_exe_success);
}

#[tokio::test]
async fn test_failure_exhausts_retries_then_terminates() {
    let coder = Arc::new(ScriptedExecutor::fail("boom"));
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "flaky work", "")])))
        .executor("Coder", coder.clone())
        .build();

    let outcome = h
        .manager
        .run(ctx("c1").with_max_retries(1), "goal", CancellationToken::new())
        .await
        .unwrap();

    // 第一次失败 → RETRYING(1)，第二次 → FAILED(2)
    assert_eq!(outcome.status, RunStatus::Terminated);
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.failed, vec!["1"]);
    assert!(!outcome.is_success());
    assert_eq!(coder.seen().len(), 2);

    let task = h.store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.executing_agent.as_deref(), Some("Coder"));
    assert_eq!(task.model_used.as_deref(), Some("scripted-exec"));

    let messages = h.log.list_by_conversation("c1").await.unwrap();
    assert!(messages
        .iter()
        .any(|m| m.sender == MANAGER_NAME && m.content.contains("Subtask 1 failed after 2 attempts")));
}

#[tokio::test]
async fn test_retry_then_success_bypasses_cache_after_repeated_failures() {
    let coder = Arc::new(ScriptedExecutor::fail_then_succeed(2, "ok"));
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "eventually works", "")])))
        .executor("Coder", coder.clone())
        .build();

    let outcome = h
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    let use_cache: Vec<Option<bool>> = coder.seen().iter().map(|t| t.use_cache).collect();
    assert_eq!(use_cache, vec![Some(true), Some(true), Some(false)]);

    let task = h.store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.retry_count, 2);
}

#[tokio::test]
async fn test_dependencies_are_never_dispatched_early() {
    let coder = Arc::new(ScriptedExecutor::echo());
    // 1 依赖 2，3 依赖 1 和 2：执行顺序必须是 2 → 1 → 3
    let plan = plan_json(&[
        ("1", "summarize the data", "2"),
        ("2", "fetch the data", ""),
        ("3", "write the report", "1,2"),
    ]);
    let h = HarnessBuilder::new(scripted_llm(&plan))
        .executor("Coder", coder.clone())
        .build();

    let outcome = h
        .manager
        .run(ctx("c1"), "report on the data", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(
        coder.contents(),
        vec!["fetch the data", "summarize the data", "write the report"]
    );

    // 依赖的（内容, 结果）作为短期上下文注入
    let seen = coder.seen();
    assert!(seen[0].history.is_empty());
    let history: Vec<&str> = seen[1].history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(history, vec!["fetch the data", "done: fetch the data"]);
    assert_eq!(seen[2].history.len(), 4);
}

#[tokio::test]
async fn test_verification_failure_retries_the_task() {
    let llm = ScriptedLlmClient::new()
        .with_replies(VERIFIER_NEEDLE, vec!["False".to_string(), "True".to_string()])
        .with_rule(PLANNING_NEEDLE, plan_json(&[("1", "draft", "")]));
    let coder = Arc::new(ScriptedExecutor::succeed("draft v1"));
    let h = HarnessBuilder::new(llm).executor("Coder", coder.clone()).build();

    let outcome = h
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.rounds, 2);
    let task = h.store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.retry_count, 1);
    assert_eq!(h.llm.call_count(VERIFIER_NEEDLE), 2);
}

#[tokio::test]
async fn test_verification_failure_records_check_result() {
    let llm = ScriptedLlmClient::new()
        .with_rule(VERIFIER_NEEDLE, "False")
        .with_rule(PLANNING_NEEDLE, plan_json(&[("1", "draft", "")]));
    let h = HarnessBuilder::new(llm)
        .executor("Coder", Arc::new(ScriptedExecutor::succeed("draft v1")))
        .build();

    let outcome = h
        .manager
        .run(ctx("c1").with_max_retries(0), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.failed, vec!["1"]);
    let task = h.store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.as_deref(), Some(PLAN_CHECK_FAILED));
}

#[tokio::test]
async fn test_failed_dependency_blocks_the_plan() {
    let plan = plan_json(&[("1", "fetch", ""), ("2", "analyze", "1")]);
    let coder = Arc::new(ScriptedExecutor::fail("unreachable source"));
    let h = HarnessBuilder::new(scripted_llm(&plan))
        .executor("Coder", coder.clone())
        .build();

    let outcome = h
        .manager
        .run(ctx("c1").with_max_retries(0), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Blocked);
    assert_eq!(outcome.failed, vec!["1"]);
    assert_eq!(outcome.pending, vec!["2"]);
    assert_eq!(coder.contents(), vec!["fetch"]);

    let messages = h.log.list_by_conversation("c1").await.unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.sender, MANAGER_NAME);
    assert_eq!(last.receiver, USER_NAME);
    assert_eq!(last.content, TERMINATE);
    let reason = &messages[messages.len() - 2];
    assert_eq!(reason.sender, MANAGER_NAME);
    assert!(reason.content.contains("cannot run"));
}

#[tokio::test]
async fn test_round_limit_leaves_remaining_tasks_visible() {
    let plan = plan_json(&[("1", "first", ""), ("2", "second", "")]);
    let h = HarnessBuilder::new(scripted_llm(&plan))
        .executor("Coder", Arc::new(ScriptedExecutor::echo()))
        .build();

    let outcome = h
        .manager
        .run(ctx("c1").with_max_rounds(1), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::RoundLimit);
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.completed, vec!["1"]);
    assert_eq!(outcome.pending, vec!["2"]);
}

#[tokio::test]
async fn test_round_robin_alternates_executors() {
    let plan = plan_json(&[("1", "a", ""), ("2", "b", ""), ("3", "c", "")]);
    let alpha = Arc::new(ScriptedExecutor::echo());
    let beta = Arc::new(ScriptedExecutor::echo());
    let h = HarnessBuilder::new(scripted_llm(&plan))
        .executor("Alpha", alpha.clone())
        .executor("Beta", beta.clone())
        .policy(SelectionPolicy::RoundRobin)
        .build();

    h.manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(alpha.contents(), vec!["a", "c"]);
    assert_eq!(beta.contents(), vec!["b"]);
}

#[tokio::test]
async fn test_auto_selection_follows_the_single_mention() {
    let llm = scripted_llm(&plan_json(&[("1", "write sql", "")]))
        .with_rule("role play game", "I choose Beta for this.");
    let alpha = Arc::new(ScriptedExecutor::echo());
    let beta = Arc::new(ScriptedExecutor::echo());
    let h = HarnessBuilder::new(llm)
        .executor("Alpha", alpha.clone())
        .executor("Beta", beta.clone())
        .policy(SelectionPolicy::Auto)
        .build();

    h.manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(alpha.seen().is_empty());
    assert_eq!(beta.contents(), vec!["write sql"]);
}

#[tokio::test]
async fn test_participants_limit_the_candidates() {
    let alpha = Arc::new(ScriptedExecutor::echo());
    let beta = Arc::new(ScriptedExecutor::echo());
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "a", ""), ("2", "b", "")])))
        .executor("Alpha", alpha.clone())
        .executor("Beta", beta.clone())
        .build();

    let conversation = ctx("c1").with_agents(vec!["Beta".to_string()]);
    h.manager
        .run(conversation, "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(alpha.seen().is_empty());
    assert_eq!(beta.contents(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_interrupt_hands_the_task_to_admin() {
    let (input, mut handle) = ChannelInput::new();
    handle.answers.send("handled by a human".to_string()).unwrap();
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "approve the budget", "")])))
        .executor("Coder", Arc::new(ScriptedExecutor::interrupted("Coder")))
        .human(ConversableAgent::human_proxy("Admin", Arc::new(input)))
        .build();

    let outcome = h
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(handle.prompts.try_recv().unwrap(), "approve the budget");
    let task = h.store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.result.as_deref(), Some("handled by a human"));
}

#[tokio::test]
async fn test_interrupt_signal_hands_running_task_to_admin() {
    let (input, mut handle) = ChannelInput::new();
    handle.answers.send("handled by a human".to_string()).unwrap();
    let coder = Arc::new(ScriptedExecutor::succeed("never").with_delay(Duration::from_secs(60)));
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "approve the budget", "")])))
        .executor("Coder", coder.clone())
        .human(ConversableAgent::human_proxy("Admin", Arc::new(input)))
        .dispatch_timeout(Duration::from_secs(120))
        .build();

    let interrupt = h.manager.interrupt_handle();
    let watched = coder.clone();
    tokio::spawn(async move {
        while watched.seen().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        interrupt.interrupt();
    });
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        h.manager.run(ctx("c1"), "goal", CancellationToken::new()),
    )
    .await
    .expect("interrupt should end the coder's turn")
    .unwrap();

    assert!(outcome.is_success());
    assert_eq!(coder.contents(), vec!["approve the budget"]);
    assert_eq!(handle.prompts.try_recv().unwrap(), "approve the budget");
    let task = h.store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.result.as_deref(), Some("handled by a human"));
}

#[tokio::test]
async fn test_interrupt_without_human_proxy_aborts_the_run() {
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "approve the budget", "")])))
        .executor("Coder", Arc::new(ScriptedExecutor::interrupted("Coder")))
        .build();

    let result = h
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ChatError::Interrupted(name)) if name == "Coder"));
}

#[tokio::test]
async fn test_dispatch_timeout_counts_as_failure() {
    let coder = Arc::new(ScriptedExecutor::succeed("late").with_delay(Duration::from_secs(5)));
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "slow work", "")])))
        .executor("Coder", coder)
        .dispatch_timeout(Duration::from_millis(50))
        .build();

    let outcome = h
        .manager
        .run(ctx("c1").with_max_retries(0), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Terminated);
    assert_eq!(outcome.failed, vec!["1"]);
}

#[tokio::test]
async fn test_cancelled_run_resumes_running_task() {
    let plan = plan_json(&[("1", "long job", "")]);
    let llm = scripted_llm(&plan);
    let store: Arc<dyn PlanStore> = Arc::new(InMemoryPlanStore::new());
    let log: Arc<dyn MessageLog> = Arc::new(InMemoryMessageLog::new());

    let slow = HarnessBuilder::new(llm)
        .with_stores(store.clone(), log.clone())
        .executor(
            "Coder",
            Arc::new(ScriptedExecutor::succeed("never").with_delay(Duration::from_secs(60))),
        )
        .build();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let result = slow.manager.run(ctx("c1"), "goal", cancel).await;
    assert!(matches!(result, Err(ChatError::Cancelled)));
    let task = store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);

    // 新进程：RUNNING 改回 RETRYING 后继续，不重新规划
    let fast = HarnessBuilder::new(scripted_llm(&plan))
        .with_stores(store.clone(), log.clone())
        .executor("Coder", Arc::new(ScriptedExecutor::succeed("finished")))
        .build();
    let outcome = fast
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(fast.llm.call_count(PLANNING_NEEDLE), 0);
    let task = store.get("c1", "1").await.unwrap().unwrap();
    assert_eq!(task.result.as_deref(), Some("finished"));
}

#[tokio::test]
async fn test_planning_failure_uses_repair_prompt_then_gives_up() {
    let llm = ScriptedLlmClient::new()
        .with_rule(VERIFIER_NEEDLE, "True")
        .with_rule(PLANNING_NEEDLE, "I cannot produce a plan.");
    let h = HarnessBuilder::new(llm)
        .executor("Coder", Arc::new(ScriptedExecutor::echo()))
        .build();

    let outcome = h
        .manager
        .run(ctx("c1").with_max_retries(1), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::PlanFailed);
    assert!(outcome.plan_error.unwrap().starts_with(PLAN_FAIL_PREFIX));
    assert_eq!(h.llm.call_count(PLANNING_NEEDLE), 2);
    assert_eq!(h.llm.call_count(REPAIR_NEEDLE), 1);
    assert!(h.store.list_by_conversation("c1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_planning_recovers_on_repair_attempt() {
    let plan = plan_json(&[("1", "do it", "")]);
    let llm = ScriptedLlmClient::new()
        .with_rule(VERIFIER_NEEDLE, "True")
        .with_replies(
            PLANNING_NEEDLE,
            vec![format!("{plan}\n{plan}"), plan.clone()],
        );
    let h = HarnessBuilder::new(llm)
        .executor("Coder", Arc::new(ScriptedExecutor::echo()))
        .build();

    let outcome = h
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    // 第二次规划带着上一次的失败原因
    let repair_call = h
        .llm
        .calls()
        .into_iter()
        .find(|msgs| msgs.iter().any(|m| m.content.contains(REPAIR_NEEDLE)))
        .unwrap();
    assert!(repair_call
        .iter()
        .any(|m| m.role == Role::Assistant && m.content.starts_with(PLAN_FAIL_PREFIX)));
}

#[tokio::test]
async fn test_concurrent_conversations_are_isolated() {
    let plan = plan_json(&[("1", "step one", ""), ("2", "step two", "1")]);
    let h = HarnessBuilder::new(scripted_llm(&plan))
        .executor("Coder", Arc::new(ScriptedExecutor::echo()))
        .build();

    let mut handles = Vec::new();
    for i in 0..4 {
        let manager = h.manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .run(ctx(&format!("conv-{i}")), "goal", CancellationToken::new())
                .await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.completed, vec!["1", "2"]);
    }
    for i in 0..4 {
        let tasks = h
            .store
            .list_by_conversation(&format!("conv-{i}"))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.conversation_id == format!("conv-{i}")));
    }
}

#[tokio::test]
async fn test_sqlite_backend_persists_plan_and_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("beehive.db");
    let db = Arc::new(Database::open(&path).unwrap());
    let store: Arc<dyn PlanStore> = db.clone();
    let log: Arc<dyn MessageLog> = db;

    let plan = plan_json(&[("1", "fetch", ""), ("2", "analyze", "1")]);
    let h = HarnessBuilder::new(scripted_llm(&plan))
        .with_stores(store, log)
        .executor("Coder", Arc::new(ScriptedExecutor::echo()))
        .build();
    let outcome = h
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_success());
    drop(h);

    let reopened = Database::open(&path).unwrap();
    let tasks = PlanStore::list_by_conversation(&reopened, "c1").await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Complete));
    assert_eq!(tasks[1].depends_on, vec!["1"]);
    assert_eq!(tasks[1].result.as_deref(), Some("done: analyze"));

    let messages = MessageLog::list_by_conversation(&reopened, "c1").await.unwrap();
    assert_eq!(messages.last().unwrap().content, TERMINATE);
}

#[tokio::test]
async fn test_unregistered_participant_is_rejected() {
    let h = HarnessBuilder::new(scripted_llm(&plan_json(&[("1", "a", "")])))
        .executor("Coder", Arc::new(ScriptedExecutor::echo()))
        .build();

    let conversation = ctx("c1").with_agents(vec!["Ghost".to_string()]);
    let result = h
        .manager
        .run(conversation, "goal", CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ChatError::UnknownAgent(name)) if name == "Ghost"));
    assert_eq!(h.llm.call_count(PLANNING_NEEDLE), 0);
}

/// 计划存储包装：每次写入 RUNNING 时核对对应的派发消息是否已在日志中
struct RunningOrderStore {
    inner: InMemoryPlanStore,
    log: Arc<dyn MessageLog>,
    running: Mutex<HashMap<String, usize>>,
    violations: Mutex<Vec<String>>,
}

#[async_trait]
impl PlanStore for RunningOrderStore {
    async fn save(&self, subtasks: &[Subtask]) -> Result<(), StoreError> {
        self.inner.save(subtasks).await
    }

    async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<Subtask>, StoreError> {
        self.inner.list_by_conversation(conversation_id).await
    }

    async fn list_by_numbers(
        &self,
        conversation_id: &str,
        numbers: &[String],
    ) -> Result<Vec<Subtask>, StoreError> {
        self.inner.list_by_numbers(conversation_id, numbers).await
    }

    async fn list_todo(&self, conversation_id: &str) -> Result<Vec<Subtask>, StoreError> {
        self.inner.list_todo(conversation_id).await
    }

    async fn get(&self, conversation_id: &str, task_number: &str) -> Result<Option<Subtask>, StoreError> {
        self.inner.get(conversation_id, task_number).await
    }

    async fn complete(&self, conversation_id: &str, task_number: &str, result: &str) -> Result<(), StoreError> {
        self.inner.complete(conversation_id, task_number, result).await
    }

    async fn update(
        &self,
        conversation_id: &str,
        task_number: &str,
        update: TaskUpdate,
    ) -> Result<(), StoreError> {
        if update.status == TaskStatus::Running {
            let dispatched = self
                .log
                .list_by_conversation(conversation_id)
                .await?
                .iter()
                .filter(|m| m.sender == MANAGER_NAME)
                .filter(|m| m.context.as_ref().map(|c| c.plan_task_num.as_str()) == Some(task_number))
                .count();
            let mut running = self.running.lock().unwrap();
            let marked = running.entry(task_number.to_string()).or_insert(0);
            *marked += 1;
            if dispatched < *marked {
                self.violations
                    .lock()
                    .unwrap()
                    .push(format!("task {task_number} marked running before dispatch {marked}"));
            }
        }
        self.inner.update(conversation_id, task_number, update).await
    }

    async fn delete_all(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.inner.delete_all(conversation_id).await
    }

    async fn replace(&self, conversation_id: &str, subtasks: &[Subtask]) -> Result<(), StoreError> {
        self.inner.replace(conversation_id, subtasks).await
    }

    async fn revert_running(&self, conversation_id: &str) -> Result<usize, StoreError> {
        self.inner.revert_running(conversation_id).await
    }
}

#[tokio::test]
async fn test_dispatch_is_logged_before_task_is_marked_running() {
    let log: Arc<dyn MessageLog> = Arc::new(InMemoryMessageLog::new());
    let audited = Arc::new(RunningOrderStore {
        inner: InMemoryPlanStore::new(),
        log: log.clone(),
        running: Mutex::new(HashMap::new()),
        violations: Mutex::new(Vec::new()),
    });
    let store: Arc<dyn PlanStore> = audited.clone();
    let plan = plan_json(&[("1", "fetch", ""), ("2", "analyze", "1")]);
    let h = HarnessBuilder::new(scripted_llm(&plan))
        .with_stores(store, log)
        .executor("Coder", Arc::new(ScriptedExecutor::fail_then_succeed(1, "ok")))
        .build();

    let outcome = h
        .manager
        .run(ctx("c1"), "goal", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(audited.running.lock().unwrap().get("1"), Some(&2));
    assert!(audited.violations.lock().unwrap().is_empty());
}
