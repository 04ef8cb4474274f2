//! 发言人选择：决定由哪个智能体执行当前子任务
//!
//! auto：让模型点名，回复里恰好提到一个候选名（整词匹配）就选它；
//! 没提到、提到多个、或模型无输出时退回轮询。round_robin / random / manual 为可配置的简单策略。

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use regex::Regex;

use crate::agents::{Agent, HumanInput};
use crate::core::ChatError;
use crate::llm::{invoke, LlmClient};
use crate::memory::Message;
use crate::planning::prompts::render_select_speaker_prompt;

/// 选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    #[default]
    Auto,
    RoundRobin,
    Random,
    Manual,
}

impl FromStr for SelectionPolicy {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(SelectionPolicy::Auto),
            "round_robin" => Ok(SelectionPolicy::RoundRobin),
            "random" => Ok(SelectionPolicy::Random),
            "manual" => Ok(SelectionPolicy::Manual),
            other => Err(ChatError::Config(format!(
                "speaker_selection is set to '{other}', it should be one of auto, round_robin, random, manual"
            ))),
        }
    }
}

/// 统计回复中整词出现的候选名及次数
pub fn mentioned_agents(text: &str, names: &[String]) -> BTreeMap<String, usize> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut mentions = BTreeMap::new();
    for name in names {
        let Ok(re) = Regex::new(&regex::escape(name)) else {
            continue;
        };
        let count = re
            .find_iter(text)
            .filter(|m| {
                let before = text[..m.start()].chars().next_back();
                let after = text[m.end()..].chars().next();
                !before.is_some_and(is_word) && !after.is_some_and(is_word)
            })
            .count();
        if count > 0 {
            mentions.insert(name.clone(), count);
        }
    }
    mentions
}

/// 轮询：在注册顺序中取 last 之后第一个属于候选集的智能体（回绕）；没有 last 时取第一个候选
pub fn next_agent(
    last: Option<&str>,
    candidates: &[Arc<dyn Agent>],
    all: &[Arc<dyn Agent>],
) -> Option<Arc<dyn Agent>> {
    let is_candidate = |agent: &Arc<dyn Agent>| candidates.iter().any(|c| c.name() == agent.name());
    let start = last
        .and_then(|name| all.iter().position(|a| a.name() == name))
        .map(|i| i + 1);
    match start {
        Some(offset) => (0..all.len())
            .map(|i| &all[(offset + i) % all.len()])
            .find(|a| is_candidate(*a))
            .cloned()
            .or_else(|| candidates.first().cloned()),
        None => candidates.first().cloned(),
    }
}

fn random_agent(candidates: &[Arc<dyn Agent>]) -> Option<Arc<dyn Agent>> {
    candidates.choose(&mut rand::thread_rng()).cloned()
}

/// 发言人选择器
pub struct SpeakerSelector {
    llm: Arc<dyn LlmClient>,
    policy: SelectionPolicy,
    allow_repeat_speaker: bool,
    timeout: Duration,
    human: Option<Arc<dyn HumanInput>>,
}

impl SpeakerSelector {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            llm,
            policy: SelectionPolicy::Auto,
            allow_repeat_speaker: true,
            timeout,
            human: None,
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_allow_repeat_speaker(mut self, allow: bool) -> Self {
        self.allow_repeat_speaker = allow;
        self
    }

    /// manual 策略的人工输入
    pub fn with_human_input(mut self, human: Arc<dyn HumanInput>) -> Self {
        self.human = Some(human);
        self
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// 为 task_content 选出执行者
    pub async fn select(
        &self,
        last: Option<&str>,
        candidates: &[Arc<dyn Agent>],
        all: &[Arc<dyn Agent>],
        task_content: &str,
    ) -> Result<Arc<dyn Agent>, ChatError> {
        if candidates.is_empty() {
            return Err(ChatError::NoCandidates);
        }
        let filtered: Vec<Arc<dyn Agent>> = match last {
            Some(last) if !self.allow_repeat_speaker => candidates
                .iter()
                .filter(|a| a.name() != last)
                .cloned()
                .collect(),
            _ => candidates.to_vec(),
        };
        // 只剩上一个发言人时仍然用它
        let candidates = if filtered.is_empty() {
            candidates.to_vec()
        } else {
            filtered
        };

        if candidates.len() <= 2
            && self.policy != SelectionPolicy::RoundRobin
            && self.allow_repeat_speaker
        {
            tracing::debug!(
                candidates = candidates.len(),
                "few candidates, consider round_robin or disallowing repeat speakers"
            );
        }

        match self.policy {
            SelectionPolicy::RoundRobin => {
                next_agent(last, &candidates, all).ok_or(ChatError::NoCandidates)
            }
            SelectionPolicy::Random => random_agent(&candidates).ok_or(ChatError::NoCandidates),
            SelectionPolicy::Manual => match self.manual_select(&candidates).await {
                Some(agent) => Ok(agent),
                None => self.auto_select(last, &candidates, all, task_content).await,
            },
            SelectionPolicy::Auto => self.auto_select(last, &candidates, all, task_content).await,
        }
    }

    async fn auto_select(
        &self,
        last: Option<&str>,
        candidates: &[Arc<dyn Agent>],
        all: &[Arc<dyn Agent>],
        task_content: &str,
    ) -> Result<Arc<dyn Agent>, ChatError> {
        let names: Vec<String> = candidates.iter().map(|a| a.name().to_string()).collect();
        let roles = candidates
            .iter()
            .map(|a| format!("{}: {}", a.name(), a.descriptor().description))
            .collect::<Vec<_>>()
            .join("\n");
        let system_prompt = render_select_speaker_prompt(&roles, &names);
        let question = format!(
            "Read and understand the following task content and assign the appropriate role to complete the task.\n\
             Task content: {task_content}\n\
             select the role from: {names:?},\n\
             Please only return the role, such as: {}",
            names[0]
        );

        let Some(reply) = invoke(
            self.llm.as_ref(),
            &system_prompt,
            &[Message::user(question)],
            self.timeout,
        )
        .await
        else {
            tracing::warn!("speaker selection got no model output, falling back to round robin");
            return next_agent(last, candidates, all).ok_or(ChatError::NoCandidates);
        };

        let mentions = mentioned_agents(&reply, &names);
        if mentions.len() == 1 {
            if let Some(agent) = mentions
                .keys()
                .next()
                .and_then(|name| candidates.iter().find(|a| a.name() == name.as_str()))
            {
                return Ok(Arc::clone(agent));
            }
        }
        tracing::warn!(
            reply = %reply,
            mentioned = mentions.len(),
            "failed to resolve the next speaker, falling back to round robin"
        );
        next_agent(last, candidates, all).ok_or(ChatError::NoCandidates)
    }

    /// 人工选择：回答序号（从 1 开始）或名字；无法识别时返回 None
    async fn manual_select(&self, candidates: &[Arc<dyn Agent>]) -> Option<Arc<dyn Agent>> {
        let human = self.human.as_ref()?;
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{}: {}", i + 1, a.name()))
            .collect::<Vec<_>>()
            .join("\n");
        let answer = human
            .ask(&format!("Please select the next speaker:\n{listing}"))
            .await?;
        let answer = answer.trim();
        if let Ok(index) = answer.parse::<usize>() {
            return index
                .checked_sub(1)
                .and_then(|i| candidates.get(i))
                .cloned();
        }
        let picked = candidates.iter().find(|a| a.name() == answer).cloned();
        if picked.is_none() {
            tracing::warn!(answer = %answer, "manual speaker selection not recognized");
        }
        picked
    }
}
