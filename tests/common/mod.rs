//! 集成测试公共设施：脚本化执行者与调度器装配

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beehive::agents::{
    AgentDescriptor, AgentRegistry, ConversableAgent, TaskExecutor, Turn,
};
use beehive::chat::{ChatSettings, PlanChatManager, SelectionPolicy, SpeakerSelector};
use beehive::core::ChatError;
use beehive::llm::ScriptedLlmClient;
use beehive::memory::{ActionReport, InMemoryMessageLog, Message, MessageLog};
use beehive::plan::{InMemoryPlanStore, PlanStore};
use beehive::planning::Planner;

/// 校验者 system prompt 中的固定片段
pub const VERIFIER_NEEDLE: &str = "action plan analysis";
/// 规划 / 修复 prompt 共有的片段
pub const PLANNING_NEEDLE: &str = "serial_number";
/// 只在修复 prompt 中出现
pub const REPAIR_NEEDLE: &str = "planning expert";

/// 执行者收到的一轮
#[derive(Debug, Clone)]
pub struct SeenTurn {
    pub content: String,
    pub history: Vec<Message>,
    pub task_number: Option<String>,
    pub use_cache: Option<bool>,
}

type Step = Box<dyn Fn(&Turn) -> Result<ActionReport, ChatError> + Send + Sync>;

fn success_step(result: &str) -> Step {
    let result = result.to_string();
    Box::new(move |_: &Turn| -> Result<ActionReport, ChatError> {
        Ok(ActionReport::success(result.clone()))
    })
}

/// 脚本化执行器：按顺序消费预置结果，最后一条重复使用；记录每次收到的轮次
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<SeenTurn>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 总是成功，结果为 `done: <content>`
    pub fn echo() -> Self {
        let step: Step = Box::new(|turn: &Turn| -> Result<ActionReport, ChatError> {
            Ok(ActionReport::success(format!("done: {}", turn.content)))
        });
        Self::from_steps(vec![step])
    }

    pub fn succeed(result: &str) -> Self {
        Self::from_steps(vec![success_step(result)])
    }

    pub fn fail(reason: &str) -> Self {
        let reason = reason.to_string();
        let step: Step = Box::new(move |_: &Turn| -> Result<ActionReport, ChatError> {
            Ok(ActionReport::failure(reason.clone()))
        });
        Self::from_steps(vec![step])
    }

    /// 先失败 times 次，之后成功
    pub fn fail_then_succeed(times: usize, result: &str) -> Self {
        let mut steps: Vec<Step> = Vec::new();
        for _ in 0..times {
            let step: Step = Box::new(|_: &Turn| -> Result<ActionReport, ChatError> {
                Ok(ActionReport::failure("not yet"))
            });
            steps.push(step);
        }
        steps.push(success_step(result));
        Self::from_steps(steps)
    }

    pub fn interrupted(name: &str) -> Self {
        let name = name.to_string();
        let step: Step = Box::new(move |_: &Turn| -> Result<ActionReport, ChatError> {
            Err(ChatError::Interrupted(name.clone()))
        });
        Self::from_steps(vec![step])
    }

    /// 每次执行前先等待 delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn seen(&self) -> Vec<SeenTurn> {
        self.seen.lock().unwrap().clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.seen().into_iter().map(|t| t.content).collect()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, turn: &Turn) -> Result<ActionReport, ChatError> {
        self.seen.lock().unwrap().push(SeenTurn {
            content: turn.content.clone(),
            history: turn.history.clone(),
            task_number: turn.context.as_ref().map(|c| c.plan_task_num.clone()),
            use_cache: turn.context.as_ref().map(|c| c.use_cache),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut steps = self.steps.lock().unwrap();
        let step = if steps.len() > 1 {
            steps.pop_front()
        } else {
            None
        };
        match step {
            Some(step) => step(turn),
            None => match steps.front() {
                Some(step) => step(turn),
                None => Ok(ActionReport::failure("no script")),
            },
        }
    }

    fn model_name(&self) -> Option<String> {
        Some("scripted-exec".to_string())
    }
}

/// 计划 JSON：(serial_number, content, rely)
pub fn plan_json(items: &[(&str, &str, &str)]) -> String {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(number, content, rely)| {
            serde_json::json!({
                "serial_number": number,
                "agent": "",
                "content": content,
                "rely": rely,
            })
        })
        .collect();
    format!("Here is the plan:\n{}", serde_json::Value::Array(items))
}

/// 规划返回给定计划、校验总是 True 的脚本模型
pub fn scripted_llm(plan: &str) -> ScriptedLlmClient {
    ScriptedLlmClient::new()
        .with_rule(VERIFIER_NEEDLE, "True")
        .with_rule(PLANNING_NEEDLE, plan)
}

/// 一套装配好的调度环境
pub struct Harness {
    pub manager: Arc<PlanChatManager>,
    pub store: Arc<dyn PlanStore>,
    pub log: Arc<dyn MessageLog>,
    pub llm: Arc<ScriptedLlmClient>,
}

pub struct HarnessBuilder {
    llm: Arc<ScriptedLlmClient>,
    store: Arc<dyn PlanStore>,
    log: Arc<dyn MessageLog>,
    executors: Vec<(String, Arc<dyn TaskExecutor>)>,
    humans: Vec<ConversableAgent>,
    policy: SelectionPolicy,
    settings: ChatSettings,
}

impl HarnessBuilder {
    pub fn new(llm: ScriptedLlmClient) -> Self {
        Self {
            llm: Arc::new(llm),
            store: Arc::new(InMemoryPlanStore::new()),
            log: Arc::new(InMemoryMessageLog::new()),
            executors: Vec::new(),
            humans: Vec::new(),
            policy: SelectionPolicy::RoundRobin,
            settings: ChatSettings::default(),
        }
    }

    pub fn with_stores(mut self, store: Arc<dyn PlanStore>, log: Arc<dyn MessageLog>) -> Self {
        self.store = store;
        self.log = log;
        self
    }

    pub fn executor(mut self, name: &str, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.push((name.to_string(), executor));
        self
    }

    pub fn human(mut self, agent: ConversableAgent) -> Self {
        self.humans.push(agent);
        self
    }

    pub fn policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.settings.dispatch_timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        let timeout = Duration::from_secs(5);
        let mut registry = AgentRegistry::new();
        for (name, executor) in self.executors {
            let descriptor = AgentDescriptor::new(name.as_str(), format!("{name} runs scripted work"));
            registry
                .register(Arc::new(ConversableAgent::task_executor(descriptor, executor)))
                .unwrap();
        }
        for human in self.humans {
            registry.register(Arc::new(human)).unwrap();
        }
        let planner = Planner::new(self.llm.clone(), self.store.clone(), registry.all(), timeout);
        registry
            .register(Arc::new(ConversableAgent::planner(Arc::new(planner))))
            .unwrap();
        registry
            .register(Arc::new(ConversableAgent::plan_verifier(self.llm.clone(), timeout)))
            .unwrap();

        let selector = SpeakerSelector::new(self.llm.clone(), timeout).with_policy(self.policy);
        let manager = PlanChatManager::new(
            self.store.clone(),
            self.log.clone(),
            Arc::new(registry),
            selector,
            self.settings,
        )
        .unwrap();
        Harness {
            manager: Arc::new(manager),
            store: self.store,
            log: self.log,
            llm: self.llm,
        }
    }
}
