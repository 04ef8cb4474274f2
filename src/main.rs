//! Beehive - Rust 多智能体协作系统
//!
//! 入口：初始化日志与配置，注册智能体，对命令行给出的目标运行一次计划调度。
//! 用法：`beehive "<goal>"`；Ctrl-C 打断当前执行者并转交人工，再按一次取消运行。

use std::sync::Arc;

use anyhow::Context;
use beehive::agents::{
    AgentDescriptor, AgentRegistry, ConversableAgent, ConversationContext, StdinInput,
};
use beehive::chat::{PlanChatManager, RunStatus, SpeakerSelector};
use beehive::config::{load_config, AppConfig};
use beehive::db::Database;
use beehive::llm::{LlmClient, MockLlmClient, OpenAiClient};
use beehive::memory::{InMemoryMessageLog, MessageLog};
use beehive::observability;
use beehive::plan::{InMemoryPlanStore, PlanStore};
use beehive::planning::Planner;
use tokio_util::sync::CancellationToken;

const ASSISTANT_PROMPT: &str = "You are a helpful AI assistant. Complete the task you are given \
using the results of the previous steps in the conversation. Reply with the result only.";

fn build_llm(config: &AppConfig) -> Arc<dyn LlmClient> {
    let llm = &config.llm;
    match llm.provider.as_str() {
        "openai" => Arc::new(OpenAiClient::new(
            llm.base_url.as_deref(),
            llm.model.as_deref().unwrap_or("gpt-4o-mini"),
            None,
        )),
        "deepseek" => Arc::new(OpenAiClient::deepseek(llm.model.as_deref())),
        other => {
            if other != "mock" {
                tracing::warn!(provider = %other, "unknown llm provider, using mock");
            }
            Arc::new(MockLlmClient)
        }
    }
}

fn build_stores(config: &AppConfig) -> anyhow::Result<(Arc<dyn PlanStore>, Arc<dyn MessageLog>)> {
    match config.store.backend.as_str() {
        "sqlite" => {
            let path = config.sqlite_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let db = Arc::new(
                Database::open(&path)
                    .with_context(|| format!("Failed to open database {}", path.display()))?,
            );
            tracing::info!(path = %path.display(), "using sqlite store");
            let plans: Arc<dyn PlanStore> = db.clone();
            let log: Arc<dyn MessageLog> = db;
            Ok((plans, log))
        }
        _ => {
            let plans: Arc<dyn PlanStore> = Arc::new(InMemoryPlanStore::new());
            let log: Arc<dyn MessageLog> = Arc::new(InMemoryMessageLog::new());
            Ok((plans, log))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let goal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if goal.trim().is_empty() {
        anyhow::bail!("Usage: beehive \"<goal>\"");
    }

    let config = load_config(None).context("Failed to load config")?;
    let llm = build_llm(&config);
    let usage = llm.clone();
    let (store, log) = build_stores(&config)?;
    let timeout = config.llm.timeout();

    // 执行者先注册，规划器拿到的是它们的描述快照
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(ConversableAgent::llm_executor(
        AgentDescriptor::new(
            "Assistant",
            "A general assistant that answers questions and writes text.",
        )
        .with_capability("general"),
        ASSISTANT_PROMPT,
        llm.clone(),
        timeout,
    )))?;
    let human = Arc::new(StdinInput::new());
    registry.register(Arc::new(ConversableAgent::human_proxy(
        config.chat.admin_name.clone(),
        human.clone(),
    )))?;
    let planner = Planner::new(llm.clone(), store.clone(), registry.all(), timeout);
    registry.register(Arc::new(ConversableAgent::planner(Arc::new(planner))))?;
    registry.register(Arc::new(ConversableAgent::plan_verifier(llm.clone(), timeout)))?;

    let selector = SpeakerSelector::new(llm, timeout)
        .with_policy(config.chat.selection_policy()?)
        .with_allow_repeat_speaker(config.chat.allow_repeat_speaker)
        .with_human_input(human);
    let manager = PlanChatManager::new(
        store,
        log,
        Arc::new(registry),
        selector,
        config.chat.settings(),
    )?;

    // 第一次 Ctrl-C 打断当前执行者并转交人工，第二次取消运行
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let interrupt = manager.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("ctrl-c received, interrupting current executor");
        interrupt.interrupt();
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received again, cancelling");
            on_signal.cancel();
        }
    });

    let ctx = ConversationContext::generate()
        .with_max_retries(config.chat.max_retries)
        .with_max_rounds(config.chat.max_rounds);
    tracing::info!(conversation = %ctx.conversation_id, app = %config.app.name, "run started");

    let outcome = manager
        .run(ctx, &goal, cancel)
        .await
        .context("Run aborted")?;

    println!("conversation: {}", outcome.conversation_id);
    println!("status: {:?}, rounds: {}", outcome.status, outcome.rounds);
    println!("completed: {}", outcome.completed.join(","));
    if !outcome.failed.is_empty() {
        println!("failed: {}", outcome.failed.join(","));
    }
    if !outcome.pending.is_empty() {
        println!("pending: {}", outcome.pending.join(","));
    }
    let (prompt_tokens, completion_tokens, total_tokens) = usage.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "token usage");
    if let Some(reason) = &outcome.plan_error {
        println!("plan error: {reason}");
    }
    if outcome.status == RunStatus::PlanFailed {
        anyhow::bail!("No usable plan was generated");
    }
    Ok(())
}
