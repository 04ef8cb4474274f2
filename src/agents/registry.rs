//! 智能体注册表
//!
//! 进程级对象，启动时注册、此后只读；以 Arc 传给规划器与调度器。
//! 注册顺序即轮询（round-robin）顺序，所以用 Vec 而不是 HashMap。

use std::sync::Arc;

use crate::agents::{Agent, AgentDescriptor, AgentRole};
use crate::core::ChatError;

/// 智能体注册表：按名称唯一，保持注册顺序
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册智能体；重名返回 Config 错误
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), ChatError> {
        if self.get(agent.name()).is_some() {
            return Err(ChatError::Config(format!(
                "Duplicate agent name: {}",
                agent.name()
            )));
        }
        tracing::debug!(agent = %agent.name(), role = ?agent.role(), "agent registered");
        self.agents.push(agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    /// 能力描述文本
    pub fn describe(&self, name: &str) -> Option<String> {
        self.agents
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.descriptor().description.clone())
    }

    /// 全部描述（注册顺序）
    pub fn all(&self) -> Vec<AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor().clone()).collect()
    }

    /// 全部实例（注册顺序）
    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    /// 指定角色的第一个智能体
    pub fn first_with_role(&self, role: AgentRole) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.role() == role).cloned()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// 清空注册表（进程退出前的显式收尾）
    pub fn clear(&mut self) {
        self.agents.clear();
    }
}

/// 渲染 `- name:description` 列表；names 为空时渲染全部
pub fn render_descriptors(descriptors: &[AgentDescriptor], names: &[String]) -> String {
    descriptors
        .iter()
        .filter(|d| names.is_empty() || names.contains(&d.name))
        .map(|d| format!("- {}:{}", d.name, d.description))
        .collect::<Vec<_>>()
        .join("\n")
}
