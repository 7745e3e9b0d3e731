//! Divide-and-conquer worker: plan subtasks, run them in dependency order.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{ActionNode, AgentResponse};
use crate::brain::Brain;
use crate::errors::MinionError;
use crate::provider::ToolChoice;
use crate::schema::Message;
use crate::workers::prompts::{plan_prompt, route_prompt};
use crate::workers::{Input, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One task of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "id")]
    pub task_id: String,
    pub instruction: String,
    pub output_key: String,
    /// Output keys of tasks this one depends on.
    #[serde(default, alias = "dependent")]
    pub dependencies: Vec<String>,
    /// Preferred route for the sub-worker; empty lets the LLM choose.
    #[serde(default)]
    pub route: String,
    #[serde(skip, default = "pending")]
    pub status: TaskStatus,
    #[serde(skip)]
    pub result: Option<serde_json::Value>,
}

fn pending() -> TaskStatus {
    TaskStatus::Pending
}

/// Validate a plan and return task ids in topological order.
fn topological_order(tasks: &[Task]) -> Result<Vec<usize>, String> {
    let mut by_output: HashMap<&str, usize> = HashMap::new();
    for (i, task) in tasks.iter().enumerate() {
        if by_output.insert(task.output_key.as_str(), i).is_some() {
            return Err(format!("duplicate output_key '{}'", task.output_key));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if !by_output.contains_key(dep.as_str()) {
                return Err(format!(
                    "task '{}': dependent key '{}' not produced by any task",
                    task.task_id, dep
                ));
            }
        }
    }

    // Kahn's algorithm over output-key edges
    let mut in_degree = vec![0usize; tasks.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            let j = by_output[dep.as_str()];
            in_degree[i] += 1;
            downstream[j].push(i);
        }
    }
    let mut queue: Vec<usize> = (0..tasks.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(i) = queue.pop() {
        order.push(i);
        for &j in &downstream[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                queue.push(j);
            }
        }
    }
    if order.len() != tasks.len() {
        return Err("the task graph contains cycles".to_string());
    }
    Ok(order)
}

fn parse_plan(text: &str) -> Result<Vec<Task>, String> {
    // the reply may wrap the JSON in prose or a fence; take the widest array
    let start = text.find('[').ok_or("no JSON array in plan reply")?;
    let end = text.rfind(']').ok_or("unterminated JSON array in plan reply")?;
    if end < start {
        return Err("malformed JSON array in plan reply".to_string());
    }
    serde_json::from_str::<Vec<Task>>(&text[start..=end]).map_err(|e| format!("invalid plan JSON: {}", e))
}

/// Plans a task list with the LLM, validates it, and executes each task with
/// a per-task sub-worker. Completed upstream outputs are available to later
/// tasks through `input.symbols`.
pub struct PlanMinion {
    pub max_plan_attempts: usize,
}

impl Default for PlanMinion {
    fn default() -> Self {
        Self { max_plan_attempts: 5 }
    }
}

impl PlanMinion {
    async fn get_plan(&self, input: &Input, brain: &Brain) -> Result<Vec<Task>, MinionError> {
        // a cached plan skips the LLM round-trip
        if let Some(cache) = &input.cache_plan {
            if let Some(tasks) = load_cached_plan(cache) {
                tracing::info!(path = %cache.display(), "loaded plan from cache");
                return Ok(tasks);
            }
        }

        let node = ActionNode::new(brain.provider());
        let routes = brain.registry().selectable_routes(&["plan"]);
        let mut error = String::new();
        for attempt in 0..self.max_plan_attempts {
            let prompt = plan_prompt(input, &routes, &error);
            let outcome = node
                .execute(&[Message::user(prompt)], &[], ToolChoice::None)
                .await?;
            match parse_plan(&outcome.assistant_text).and_then(|tasks| {
                topological_order(&tasks)?;
                Ok(tasks)
            }) {
                Ok(tasks) => {
                    if let Some(cache) = &input.cache_plan {
                        store_cached_plan(cache, &tasks);
                    }
                    return Ok(tasks);
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt, error = %e, "plan validation failed");
                    error = e;
                }
            }
        }
        Err(MinionError::Plan(format!(
            "failed to produce a valid plan after {} attempts: {}",
            self.max_plan_attempts, error
        )))
    }

    async fn route_for_task(&self, task: &Task, input: &Input, brain: &Brain) -> Result<String, MinionError> {
        if !task.route.is_empty() {
            if let Some(route) = brain.registry().resolve_route(&task.route) {
                return Ok(route);
            }
        }
        // ask the model; planning again inside a task is excluded
        let routes = brain.registry().selectable_routes(&["plan"]);
        let node = ActionNode::new(brain.provider());
        let mut task_input = input.clone();
        task_input.query = crate::schema::Query::Text(task.instruction.clone());
        let outcome = node
            .execute(
                &[Message::user(route_prompt(&task_input, &routes))],
                &[],
                ToolChoice::None,
            )
            .await?;
        brain
            .registry()
            .resolve_route(outcome.assistant_text.trim())
            .ok_or_else(|| MinionError::UnknownRoute(outcome.assistant_text.trim().to_string()))
    }
}

#[async_trait(?Send)]
impl Worker for PlanMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let mut tasks = self.get_plan(input, brain).await?;
        let order = topological_order(&tasks).map_err(MinionError::Plan)?;
        let total = order.len();
        tracing::info!(tasks = total, "plan execution starting");

        let mut last_answer = String::new();
        for (position, index) in order.into_iter().enumerate() {
            let (task_id, instruction, output_key) = {
                let task = &mut tasks[index];
                task.status = TaskStatus::InProgress;
                (task.task_id.clone(), task.instruction.clone(), task.output_key.clone())
            };
            tracing::info!(task = %task_id, position = position + 1, total = total, "executing plan task");

            let route = self.route_for_task(&tasks[index], input, brain).await?;
            let worker = brain
                .registry()
                .create(&route)
                .ok_or_else(|| MinionError::UnknownRoute(route.clone()))?;

            let mut task_input = input.clone();
            task_input.query = crate::schema::Query::Text(instruction);
            task_input.route = Some(route.clone());
            task_input.ensemble = None;

            match worker.execute(&mut task_input, brain).await {
                Ok(response) => {
                    let value = serde_json::Value::String(response.answer.clone());
                    input.symbols.insert(output_key.clone(), value.clone());
                    last_answer = response.answer;
                    let task = &mut tasks[index];
                    task.status = TaskStatus::Completed;
                    task.result = Some(value);
                }
                Err(e) => {
                    // upstream tasks keep their completed status
                    tasks[index].status = TaskStatus::Failed;
                    tracing::error!(task = %task_id, error = %e, "plan task failed");
                    return Ok(AgentResponse::failed(format!(
                        "Plan task '{}' failed via route '{}': {}",
                        task_id, route, e
                    ))
                    .with_info(
                        "completed_tasks",
                        serde_json::json!(tasks
                            .iter()
                            .filter(|t| t.status == TaskStatus::Completed)
                            .map(|t| t.task_id.clone())
                            .collect::<Vec<_>>()),
                    ));
                }
            }
        }

        input.set_candidate(last_answer.clone(), last_answer.clone());
        Ok(AgentResponse {
            answer: last_answer,
            score: 1.0,
            terminated: true,
            cost: brain.provider().cost(),
            ..Default::default()
        }
        .with_info("task_count", serde_json::json!(total)))
    }
}

fn load_cached_plan(path: &Path) -> Option<Vec<Task>> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn store_cached_plan(path: &Path, tasks: &[Task]) {
    match serde_json::to_string_pretty(tasks) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                tracing::warn!(path = %path.display(), error = %e, "failed to cache plan");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize plan"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::Brain;
    use crate::provider::ScriptedProvider;
    use std::sync::Arc;

    fn task(id: &str, output: &str, deps: &[&str]) -> Task {
        Task {
            task_id: id.to_string(),
            instruction: format!("do {}", id),
            output_key: output.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            route: String::new(),
            status: TaskStatus::Pending,
            result: None,
        }
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let tasks = vec![
            task("t2", "b", &["a"]),
            task("t1", "a", &[]),
            task("t3", "c", &["a", "b"]),
        ];
        let order = topological_order(&tasks).unwrap();
        let pos = |i: usize| order.iter().position(|x| *x == i).unwrap();
        assert!(pos(1) < pos(0));
        assert!(pos(0) < pos(2));
    }

    #[test]
    fn test_cycle_detection() {
        let tasks = vec![task("t1", "a", &["b"]), task("t2", "b", &["a"])];
        assert!(topological_order(&tasks).unwrap_err().contains("cycles"));
    }

    #[test]
    fn test_missing_dependency_detected() {
        let tasks = vec![task("t1", "a", &["ghost"])];
        assert!(topological_order(&tasks).unwrap_err().contains("ghost"));
    }

    #[test]
    fn test_parse_plan_from_prose() {
        let reply = r#"Here is the plan:
[
  {"task_id": "t1", "instruction": "compute x", "output_key": "x", "dependent": [], "route": "cot"}
]
Good luck!"#;
        let tasks = parse_plan(reply).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].route, "cot");
    }

    #[tokio::test]
    async fn test_plan_executes_tasks_in_order() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        // plan reply, then one cot reply per task
        provider.push_text(
            r#"[
              {"task_id": "t1", "instruction": "first", "output_key": "x", "dependent": [], "route": "cot"},
              {"task_id": "t2", "instruction": "second", "output_key": "y", "dependent": ["x"], "route": "cot"}
            ]"#,
        );
        provider.push_text("Final answer: out1");
        provider.push_text("Final answer: out2");

        let brain = Brain::with_provider(provider);
        let mut input = Input::new("big task");
        let response = PlanMinion::default().execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "out2");
        assert_eq!(input.symbols["x"], serde_json::json!("out1"));
        assert_eq!(input.symbols["y"], serde_json::json!("out2"));
    }

    #[tokio::test]
    async fn test_failed_task_reports_completed_upstream() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_text(
            r#"[
              {"task_id": "t1", "instruction": "first", "output_key": "x", "dependent": [], "route": "cot"},
              {"task_id": "t2", "instruction": "second", "output_key": "y", "dependent": ["x"], "route": "cot"}
            ]"#,
        );
        provider.push_text("Final answer: ok");
        // no reply queued for t2 -> provider exhausted -> task failure

        let brain = Brain::with_provider(provider);
        let mut input = Input::new("big task");
        let response = PlanMinion::default().execute(&mut input, &brain).await.unwrap();
        assert!(response.terminated);
        assert!(!response.is_final_answer);
        assert_eq!(response.info["completed_tasks"], serde_json::json!(["t1"]));
    }
}
