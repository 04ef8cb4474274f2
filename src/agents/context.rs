//! 会话上下文：一次运行的标识、重试 / 轮数上限、参与的智能体与可用资源
//!
//! 调度器为每次运行创建一份，以 Arc 共享给所有收到消息的智能体。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 资源类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Database,
    Knowledge,
    Internet,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::Knowledge => "knowledge",
            ResourceKind::Internet => "internet",
        }
    }
}

/// 规划时可引用的资源（数据源、知识库、联网）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
    /// 给规划器看的介绍（表结构、知识库摘要等）
    pub introduce: String,
}

impl Resource {
    pub fn new(kind: ResourceKind, name: impl Into<String>, introduce: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            introduce: introduce.into(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}\n{}", self.kind.as_str(), self.name, self.introduce)
    }
}

/// 单次运行的会话设置
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation_id: String,
    /// 每个子任务允许的重试次数
    pub max_retries: u32,
    /// 调度循环最多派发的轮数
    pub max_rounds: usize,
    /// 参与本次运行的智能体；为空表示全部已注册的智能体
    pub agents: Vec<String>,
    pub resources: Vec<Resource>,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            max_retries: 3,
            max_rounds: 50,
            agents: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// 随机生成会话 ID
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// 智能体是否参与本次运行
    pub fn includes(&self, agent_name: &str) -> bool {
        self.agents.is_empty() || self.agents.iter().any(|a| a == agent_name)
    }

    /// 渲染资源列表，每项形如 `- kind:name\nintroduce`
    pub fn render_resources(&self) -> String {
        self.resources
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
