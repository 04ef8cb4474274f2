//! 计划依赖图
//!
//! 使用邻接表和入度表做拓扑排序：规划时校验依赖（未知编号、环），调度时判断子任务是否可执行。

use std::collections::{HashMap, VecDeque};

use crate::core::PlanFormatError;
use crate::plan::{compare_task_numbers, Subtask, TaskStatus};

/// 计划依赖图
pub struct PlanGraph {
    /// 邻接表：task_number -> 依赖它的任务
    pub adjacency: HashMap<String, Vec<String>>,
    /// 入度表：task_number -> 依赖数
    pub in_degree: HashMap<String, usize>,
}

impl PlanGraph {
    /// 建图；同时检查重复编号与未知依赖
    pub fn new(tasks: &[Subtask]) -> Result<Self, PlanFormatError> {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();

        for task in tasks {
            if in_degree.insert(task.task_number.clone(), 0).is_some() {
                return Err(PlanFormatError::DuplicateTask(task.task_number.clone()));
            }
            adjacency.insert(task.task_number.clone(), Vec::new());
        }

        for task in tasks {
            for dep in &task.depends_on {
                let dependents = adjacency.get_mut(dep).ok_or_else(|| {
                    PlanFormatError::UnknownDependency {
                        task: task.task_number.clone(),
                        missing: dep.clone(),
                    }
                })?;
                dependents.push(task.task_number.clone());
                *in_degree.entry(task.task_number.clone()).or_insert(0) += 1;
            }
        }

        Ok(Self {
            adjacency,
            in_degree,
        })
    }

    /// Kahn 拓扑排序；存在环时返回参与环的编号
    pub fn topological_order(&self) -> Result<Vec<String>, PlanFormatError> {
        let mut degree = self.in_degree.clone();
        let mut roots: Vec<&String> = degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id)
            .collect();
        roots.sort_by(|a, b| compare_task_numbers(a, b));
        let mut queue: VecDeque<String> = roots.into_iter().cloned().collect();

        let mut order = Vec::with_capacity(degree.len());
        while let Some(id) = queue.pop_front() {
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(d) = degree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
            order.push(id);
        }

        if order.len() < self.in_degree.len() {
            let mut stuck: Vec<&String> = degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| id)
                .collect();
            stuck.sort_by(|a, b| compare_task_numbers(a, b));
            let names: Vec<&str> = stuck.iter().map(|s| s.as_str()).collect();
            return Err(PlanFormatError::CyclicDependency(names.join(",")));
        }
        Ok(order)
    }

    /// 校验整份计划：编号唯一、依赖存在、无环
    pub fn validate(tasks: &[Subtask]) -> Result<(), PlanFormatError> {
        Self::new(tasks)?.topological_order().map(|_| ())
    }
}

/// 依赖是否全部 COMPLETE；缺失的依赖视为未满足
pub fn dependencies_met(task: &Subtask, statuses: &HashMap<String, TaskStatus>) -> bool {
    task.depends_on
        .iter()
        .all(|dep| statuses.get(dep) == Some(&TaskStatus::Complete))
}

/// 从 todo 列表中选出第一个依赖已满足的子任务（todo 已按编号排序）
pub fn first_eligible<'a>(todo: &'a [Subtask], all: &[Subtask]) -> Option<&'a Subtask> {
    let statuses: HashMap<String, TaskStatus> = all
        .iter()
        .map(|t| (t.task_number.clone(), t.status))
        .collect();
    todo.iter().find(|t| dependencies_met(t, &statuses))
}
