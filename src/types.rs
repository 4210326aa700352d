//! Values exchanged between the workflow manager and a backend

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::catalog::{RoleDescriptor, RoleId, RoleLevel};

/// Context payload handed to a task
pub type Context = Map<String, Value>;

/// Immutable description of a role, used to instantiate a backend agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub role: RoleId,
    pub title: String,
    pub goal: String,
    pub backstory: String,
    pub group: String,
    pub level: RoleLevel,
    pub can_delegate: bool,
    pub skills: Vec<String>,
}

impl AgentSpec {
    /// Derive the agent description for a catalog role
    pub fn from_role(role: &RoleDescriptor) -> Self {
        let goal = if role.responsibilities.is_empty() {
            format!("Contribute to {} success", role.group)
        } else {
            role.responsibilities
                .iter()
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")
        };

        Self {
            role: role.id.clone(),
            title: role.title.clone(),
            goal,
            backstory: backstory(role),
            group: role.group.clone(),
            level: role.level,
            can_delegate: role.level.can_delegate(),
            skills: role.skills.clone(),
        }
    }
}

fn backstory(role: &RoleDescriptor) -> String {
    let skills = role.skills.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    let responsibilities = if role.responsibilities.is_empty() {
        "supporting the organization".to_string()
    } else {
        role.responsibilities.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
    };
    let supervisor = role.supervisor.as_deref().unwrap_or("the board");

    format!(
        "You are the {} with {} in {}. Your expertise includes: {}. \
         Your key responsibilities: {}. You report to {} and are committed to excellence.",
        role.title,
        role.level.descriptor(),
        role.group,
        skills,
        responsibilities,
        supervisor,
    )
}

/// One unit of work assigned to a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: Option<String>,
    pub description: String,
    pub role: RoleId,
    pub expected_output: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub context: Context,
}

impl TaskSpec {
    pub fn new(role: RoleId, description: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            role,
            expected_output: expected_output.into(),
            depends_on: Vec::new(),
            context: Context::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn is_independent(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// Backend-issued reference to a created agent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentHandle {
    id: Uuid,
    role: RoleId,
}

impl AgentHandle {
    pub fn new(role: RoleId) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> &RoleId {
        &self.role
    }
}

/// Backend-issued reference to a created task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: Uuid,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a batch of tasks should be run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of executing a batch (or a whole run)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub outputs: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
}

impl WorkflowResult {
    /// An empty, successful result
    pub fn new() -> Self {
        Self {
            success: true,
            outputs: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, producer: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(producer.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Record a soft per-task failure under `metadata.errors`
    pub fn record_failure(&mut self, producer: &str, kind: &str, message: impl Into<String>) {
        self.success = false;
        let errors = self
            .metadata
            .entry("errors".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = errors {
            map.insert(
                producer.to_string(),
                json!({ "kind": kind, "message": message.into() }),
            );
        }
    }

    /// Soft failures recorded so far, keyed by producer
    pub fn errors(&self) -> Option<&Map<String, Value>> {
        self.metadata.get("errors").and_then(Value::as_object)
    }

    /// The mode a backend reported it actually used
    pub fn mode(&self) -> Option<&str> {
        self.metadata.get("mode").and_then(Value::as_str)
    }
}

impl Default for WorkflowResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_agent_spec_from_head() {
        let catalog = Catalog::company();
        let role = catalog.get(&RoleId::from("head_of_marketing")).unwrap();
        let spec = AgentSpec::from_role(role);

        assert_eq!(spec.goal, "Develop marketing strategy Lead marketing campaigns");
        assert!(spec.can_delegate);
        assert!(spec.backstory.contains("department leadership in marketing"));
        assert!(spec.backstory.contains("marketing strategy, brand management, campaign planning."));
        assert!(!spec.backstory.contains("analytics"));
        assert!(spec.backstory.contains("You report to CEO"));
    }

    #[test]
    fn test_agent_spec_fallbacks() {
        let role = RoleDescriptor {
            id: RoleId::from("intern"),
            title: "Intern".into(),
            level: RoleLevel::Junior,
            group: "operations".into(),
            supervisor: None,
            responsibilities: vec![],
            skills: vec!["filing".into()],
        };
        let spec = AgentSpec::from_role(&role);

        assert_eq!(spec.goal, "Contribute to operations success");
        assert!(!spec.can_delegate);
        assert!(spec.backstory.contains("professional expertise"));
        assert!(spec.backstory.contains("Your expertise includes: filing."));
        assert!(spec.backstory.contains("supporting the organization"));
        assert!(spec.backstory.contains("You report to the board"));
    }

    #[test]
    fn test_record_failure() {
        let mut result = WorkflowResult::new().with_output("a", json!("done"));
        assert!(result.success);
        assert!(result.errors().is_none());

        result.record_failure("b", "exit_status", "exited with 2");
        assert!(!result.success);
        let errors = result.errors().unwrap();
        assert_eq!(errors["b"]["kind"], "exit_status");
        assert_eq!(result.outputs.len(), 1);
    }

    #[test]
    fn test_task_spec_builder() {
        let spec = TaskSpec::new(RoleId::from("qa_analyst"), "Test it", "Report")
            .with_id("testing")
            .depends_on("build");
        assert_eq!(spec.id.as_deref(), Some("testing"));
        assert!(!spec.is_independent());
    }
}
