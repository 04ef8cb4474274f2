//! 计划存储抽象层
//!
//! 定义统一的计划表接口，支持内存和 SQLite 两种实现；调度器只依赖 PlanStore trait。
//! 所有操作按 conversation_id 划分，单行更新对并发读者是原子的。

use std::collections::HashSet;

use async_trait::async_trait;

use crate::core::StoreError;
use crate::memory::Shards;
use crate::plan::{sort_by_task_number, Subtask, TaskStatus, TaskUpdate};

/// 计划存储接口
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// 批量插入；任一 (conversation_id, task_number) 已存在则整体失败
    async fn save(&self, subtasks: &[Subtask]) -> Result<(), StoreError>;

    /// 会话内全部子任务，按 task_number 升序
    async fn list_by_conversation(&self, conversation_id: &str)
        -> Result<Vec<Subtask>, StoreError>;

    /// 会话内指定编号的子任务，按 task_number 升序
    async fn list_by_numbers(
        &self,
        conversation_id: &str,
        numbers: &[String],
    ) -> Result<Vec<Subtask>, StoreError>;

    /// 状态为 TODO / RETRYING 的子任务，按 task_number 升序
    async fn list_todo(&self, conversation_id: &str) -> Result<Vec<Subtask>, StoreError>;

    async fn get(
        &self,
        conversation_id: &str,
        task_number: &str,
    ) -> Result<Option<Subtask>, StoreError>;

    /// 原子地置为 COMPLETE 并写入结果
    async fn complete(
        &self,
        conversation_id: &str,
        task_number: &str,
        result: &str,
    ) -> Result<(), StoreError>;

    /// 原子地更新状态、重试次数、执行者、模型与结果
    async fn update(
        &self,
        conversation_id: &str,
        task_number: &str,
        update: TaskUpdate,
    ) -> Result<(), StoreError>;

    /// 删除会话的全部子任务
    async fn delete_all(&self, conversation_id: &str) -> Result<(), StoreError>;

    /// 删除旧计划并插入新计划；实现应保证失败时旧计划保持不变
    async fn replace(&self, conversation_id: &str, subtasks: &[Subtask]) -> Result<(), StoreError>;

    /// 进程重启后把遗留的 RUNNING 改回 RETRYING，返回受影响行数
    async fn revert_running(&self, conversation_id: &str) -> Result<usize, StoreError>;
}

fn check_unique(existing: &[Subtask], incoming: &[Subtask]) -> Result<(), StoreError> {
    let mut seen: HashSet<(&str, &str)> = existing
        .iter()
        .map(|t| (t.conversation_id.as_str(), t.task_number.as_str()))
        .collect();
    for task in incoming {
        if !seen.insert((task.conversation_id.as_str(), task.task_number.as_str())) {
            return Err(StoreError::ConstraintViolation {
                conversation_id: task.conversation_id.clone(),
                task_number: task.task_number.clone(),
            });
        }
    }
    Ok(())
}

fn not_found(conversation_id: &str, task_number: &str) -> StoreError {
    StoreError::NotFound {
        conversation_id: conversation_id.to_string(),
        task_number: task_number.to_string(),
    }
}

/// 内存计划表：按会话分片，每个会话的子任务在一把锁下整体读写
#[derive(Default)]
pub struct InMemoryPlanStore {
    shards: Shards<Vec<Subtask>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self, conversation_id: &str) -> Vec<Subtask> {
        match self.shards.get(conversation_id).await {
            Some(shard) => {
                let mut tasks = shard.lock().await.clone();
                sort_by_task_number(&mut tasks);
                tasks
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn save(&self, subtasks: &[Subtask]) -> Result<(), StoreError> {
        // 同一批次可能跨多个会话：先逐个会话校验，全部通过后再写入
        let mut by_conversation: Vec<(&str, Vec<Subtask>)> = Vec::new();
        for task in subtasks {
            match by_conversation
                .iter_mut()
                .find(|(id, _)| *id == task.conversation_id)
            {
                Some((_, group)) => group.push(task.clone()),
                None => by_conversation.push((task.conversation_id.as_str(), vec![task.clone()])),
            }
        }
        // 固定加锁顺序，避免并发批量写入互相死锁
        by_conversation.sort_by(|a, b| a.0.cmp(b.0));

        let mut guards = Vec::with_capacity(by_conversation.len());
        for (id, group) in &by_conversation {
            let shard = self.shards.get_or_create(id).await;
            guards.push((shard, group));
        }
        let mut locked = Vec::with_capacity(guards.len());
        for (shard, group) in &guards {
            let guard = shard.lock().await;
            check_unique(&guard, group)?;
            locked.push((guard, *group));
        }
        for (mut guard, group) in locked {
            guard.extend(group.iter().cloned());
        }
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Subtask>, StoreError> {
        Ok(self.snapshot(conversation_id).await)
    }

    async fn list_by_numbers(
        &self,
        conversation_id: &str,
        numbers: &[String],
    ) -> Result<Vec<Subtask>, StoreError> {
        Ok(self
            .snapshot(conversation_id)
            .await
            .into_iter()
            .filter(|t| numbers.contains(&t.task_number))
            .collect())
    }

    async fn list_todo(&self, conversation_id: &str) -> Result<Vec<Subtask>, StoreError> {
        Ok(self
            .snapshot(conversation_id)
            .await
            .into_iter()
            .filter(|t| t.status.is_selectable())
            .collect())
    }

    async fn get(
        &self,
        conversation_id: &str,
        task_number: &str,
    ) -> Result<Option<Subtask>, StoreError> {
        Ok(self
            .snapshot(conversation_id)
            .await
            .into_iter()
            .find(|t| t.task_number == task_number))
    }

    async fn complete(
        &self,
        conversation_id: &str,
        task_number: &str,
        result: &str,
    ) -> Result<(), StoreError> {
        let shard = self
            .shards
            .get(conversation_id)
            .await
            .ok_or_else(|| not_found(conversation_id, task_number))?;
        let mut tasks = shard.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.task_number == task_number)
            .ok_or_else(|| not_found(conversation_id, task_number))?;
        task.status = TaskStatus::Complete;
        task.result = Some(result.to_string());
        Ok(())
    }

    async fn update(
        &self,
        conversation_id: &str,
        task_number: &str,
        update: TaskUpdate,
    ) -> Result<(), StoreError> {
        let shard = self
            .shards
            .get(conversation_id)
            .await
            .ok_or_else(|| not_found(conversation_id, task_number))?;
        let mut tasks = shard.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.task_number == task_number)
            .ok_or_else(|| not_found(conversation_id, task_number))?;
        task.status = update.status;
        task.retry_count = update.retry_count;
        task.executing_agent = update.agent;
        task.model_used = update.model;
        task.result = update.result;
        Ok(())
    }

    async fn delete_all(&self, conversation_id: &str) -> Result<(), StoreError> {
        if let Some(shard) = self.shards.get(conversation_id).await {
            shard.lock().await.clear();
        }
        Ok(())
    }

    async fn replace(&self, conversation_id: &str, subtasks: &[Subtask]) -> Result<(), StoreError> {
        if let Some(stray) = subtasks.iter().find(|t| t.conversation_id != conversation_id) {
            return Err(StoreError::ConstraintViolation {
                conversation_id: stray.conversation_id.clone(),
                task_number: stray.task_number.clone(),
            });
        }
        check_unique(&[], subtasks)?;
        let shard = self.shards.get_or_create(conversation_id).await;
        let mut tasks = shard.lock().await;
        *tasks = subtasks.to_vec();
        Ok(())
    }

    async fn revert_running(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let Some(shard) = self.shards.get(conversation_id).await else {
            return Ok(0);
        };
        let mut tasks = shard.lock().await;
        let mut reverted = 0;
        for task in tasks.iter_mut().filter(|t| t.status == TaskStatus::Running) {
            task.status = TaskStatus::Retrying;
            reverted += 1;
        }
        Ok(reverted)
    }
}
