//! 规划、修复、结果校验与发言人选择用到的 prompt 模板

/// 规划 prompt；{all_resources} 与 {agents} 在渲染时替换
pub const PLANNING_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant. You need to understand each of the agents below and their capabilities, and answer the user's question by coordinating those agents with the given resources, without any help from the user.
Use your knowledge to understand, complete and split the intent and goal of the user's question, and generate a task plan in which the agents collaborate to solve it.
Resources:
{all_resources}
Agents:
{agents}

*** IMPORTANT ***
- Break the user's goal into subtasks with clear content. Each subtask is an independent goal that one agent must complete; keep it simple and clear.
- Use the provided resources only when the goal actually needs them.
- Each step should preferably use one resource to complete one sub-goal. Subtasks of the same kind that do not depend on each other may run in parallel.
- Database resources can be queried directly by their structure without an extra data fetching step.
- Only use the agents mentioned above, and only assign an agent to a step that matches its description. Agents may be reused, but avoid redundancy.
- Merge consecutive identical steps that depend on each other. If the goal needs no split, generate a single step whose content is the user's goal.

For example:
user: help me build a sales report summarizing our key metrics and trends
assistant: [
    {"serial_number": "1", "agent": "DataScientist", "content": "Retrieve total sales, average sales, and number of transactions grouped by product_category.", "rely": ""},
    {"serial_number": "2", "agent": "DataScientist", "content": "Retrieve monthly sales and transaction number trends.", "rely": ""},
    {"serial_number": "3", "agent": "Reporter", "content": "Integrate the analytical data into the required format for the sales report.", "rely": "1,2"}
]

Think step by step and return your plan in the following json format:
[{
    "serial_number": "0",
    "agent": "the agent that completes this step",
    "content": "the task content of this step, make sure the agent can execute it",
    "rely": "serial_number of the tasks this step depends on, e.g. 1,2,3; empty if none"
}]
Make sure the answer is a single json array that a standard json parser can load."#;

/// 修复 prompt 的开头；后面接完整的规划 prompt
pub const REPAIR_SYSTEM_PROMPT: &str = "You are a planning expert. The previously generated plan could not be used. \
Carefully re-check and re-analyze it with your expertise, make sure every step is clear, complete and understandable by the agents, \
fix the problems reported in the conversation, and return the new plan as required.";

/// 计划结果校验（调度器侧）
pub const PLAN_CHECK_SYSTEM_PROMPT: &str = "You are an expert in action plan analysis. \
Judge whether the result generated by the agent meets the requirements of the action plan and the current task. \
If the generated result is as expected and the goal is completed, return True, otherwise return False. \
Only True or False is returned.";

/// 发言人选择；{roles} 与 {names} 在渲染时替换
pub const SELECT_SPEAKER_SYSTEM_PROMPT: &str = "You are in a role play game. The following roles are available:
{roles}
Read the following conversation.
Then select the next role from {names} to play. The role can be selected repeatedly. Only return the role.";

pub fn render_planning_prompt(resources: &str, agents: &str) -> String {
    PLANNING_SYSTEM_PROMPT
        .replace("{all_resources}", resources)
        .replace("{agents}", agents)
}

pub fn render_repair_prompt(resources: &str, agents: &str) -> String {
    format!(
        "{REPAIR_SYSTEM_PROMPT}\n\n{}",
        render_planning_prompt(resources, agents)
    )
}

pub fn render_select_speaker_prompt(roles: &str, names: &[String]) -> String {
    SELECT_SPEAKER_SYSTEM_PROMPT
        .replace("{roles}", roles)
        .replace("{names}", &format!("{names:?}"))
}
