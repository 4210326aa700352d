//! Scope-keyed task templates
//!
//! A template is an ordered list of steps. Each step names the role that
//! performs it and carries description and expected-output text with
//! `{key}` placeholders filled from the scenario parameters, falling back
//! to the template's defaults.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::catalog::{RoleDescriptor, RoleId};
use crate::error::{ConclaveError, Result};
use crate::types::TaskSpec;

#[derive(Debug, Clone)]
pub struct TemplateStep {
    pub id: String,
    pub role: RoleId,
    pub description: String,
    pub expected_output: String,
    pub depends_on: Vec<String>,
}

impl TemplateStep {
    pub fn new(id: &str, role: &str, description: &str, expected_output: &str) -> Self {
        Self {
            id: id.to_string(),
            role: RoleId::from(role),
            description: description.to_string(),
            expected_output: expected_output.to_string(),
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, ids: &[&str]) -> Self {
        self.depends_on.extend(ids.iter().map(|s| s.to_string()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskTemplate {
    pub steps: Vec<TemplateStep>,
    pub defaults: HashMap<String, String>,
}

impl TaskTemplate {
    pub fn new(defaults: &[(&str, &str)], steps: Vec<TemplateStep>) -> Self {
        Self {
            steps,
            defaults: defaults
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Instantiate the steps whose role is present, in template order
    ///
    /// Dependencies on skipped steps are dropped. A dependency on a later or
    /// unknown step is rejected.
    pub fn instantiate(
        &self,
        scope: &str,
        present: &HashSet<RoleId>,
        params: &HashMap<String, String>,
    ) -> Result<Vec<TaskSpec>> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut submitted: HashSet<&str> = HashSet::new();
        let mut specs = Vec::new();

        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(ConclaveError::Configuration(format!(
                        "template '{}' step '{}' depends on '{}', which is not an earlier step",
                        scope, step.id, dep
                    )));
                }
            }
            seen.insert(&step.id);

            if !present.contains(&step.role) {
                debug!(scope, step = %step.id, role = %step.role, "Role absent, step skipped");
                continue;
            }

            let mut spec = TaskSpec::new(
                step.role.clone(),
                interpolate(&step.description, params, &self.defaults),
                interpolate(&step.expected_output, params, &self.defaults),
            )
            .with_id(step.id.clone());

            for dep in &step.depends_on {
                if submitted.contains(dep.as_str()) {
                    spec = spec.depends_on(dep.clone());
                }
            }

            submitted.insert(&step.id);
            specs.push(spec);
        }

        Ok(specs)
    }
}

/// The template applied to every representative of a cross-scope run
#[derive(Debug, Clone)]
pub struct CrossScopeTemplate {
    pub description: String,
    pub expected_output: String,
    pub defaults: HashMap<String, String>,
}

impl CrossScopeTemplate {
    /// `{group}` expands to the representative's group
    pub fn instantiate(&self, representatives: &[&RoleDescriptor], params: &HashMap<String, String>) -> Vec<TaskSpec> {
        representatives
            .iter()
            .map(|role| {
                let mut defaults = self.defaults.clone();
                defaults.insert("group".to_string(), role.group.clone());
                let mut params = params.clone();
                params.insert("group".to_string(), role.group.clone());

                TaskSpec::new(
                    role.id.clone(),
                    interpolate(&self.description, &params, &defaults),
                    interpolate(&self.expected_output, &params, &defaults),
                )
                .with_id(format!("{}_perspective", role.group))
            })
            .collect()
    }
}

impl Default for CrossScopeTemplate {
    fn default() -> Self {
        Self {
            description: "Provide {group} perspective and recommendations for {initiative}".into(),
            expected_output: "{group} analysis and recommendations".into(),
            defaults: HashMap::from([("initiative".to_string(), "company initiative".to_string())]),
        }
    }
}

/// All templates a workflow manager can draw on
#[derive(Debug, Clone, Default)]
pub struct TemplateBook {
    scopes: HashMap<String, TaskTemplate>,
    cross: CrossScopeTemplate,
}

impl TemplateBook {
    pub fn new(cross: CrossScopeTemplate) -> Self {
        Self {
            scopes: HashMap::new(),
            cross,
        }
    }

    pub fn with_scope(mut self, scope: &str, template: TaskTemplate) -> Self {
        self.scopes.insert(scope.to_string(), template);
        self
    }

    pub fn scope(&self, scope: &str) -> Option<&TaskTemplate> {
        self.scopes.get(scope)
    }

    pub fn cross(&self) -> &CrossScopeTemplate {
        &self.cross
    }

    /// Templates matching the built-in company catalog
    #[rustfmt::skip]
    pub fn company() -> Self {
        Self::new(CrossScopeTemplate::default())
            .with_scope("marketing", TaskTemplate::new(
                &[("campaign_goal", "brand awareness campaign")],
                vec![
                    TemplateStep::new("market_analysis", "marketing_analyst",
                        "Analyze market trends and target audience for {campaign_goal}",
                        "Market analysis report with target audience insights"),
                    TemplateStep::new("content_strategy", "content_marketing_expert",
                        "Develop content strategy for {campaign_goal}",
                        "Content strategy with key messages and channels"),
                    TemplateStep::new("campaign_plan", "head_of_marketing",
                        "Review team inputs and create final campaign plan for {campaign_goal}",
                        "Complete campaign plan with budget and timeline")
                        .after(&["market_analysis", "content_strategy"]),
                ],
            ))
            .with_scope("software_development", TaskTemplate::new(
                &[("feature", "new feature")],
                vec![
                    TemplateStep::new("architecture", "head_of_software_development",
                        "Design technical architecture for {feature}",
                        "Architecture design and implementation plan"),
                    TemplateStep::new("implementation", "senior_software_developer",
                        "Implement core functionality for {feature}",
                        "Core implementation with tests")
                        .after(&["architecture"]),
                    TemplateStep::new("testing", "qa_analyst",
                        "Create test plan and test {feature}",
                        "Test results and quality report")
                        .after(&["implementation"]),
                ],
            ))
            .with_scope("operations", TaskTemplate::new(
                &[("process", "business process")],
                vec![
                    TemplateStep::new("process_analysis", "operations_analyst",
                        "Analyze current {process} and identify improvement opportunities",
                        "Process analysis with improvement recommendations"),
                    TemplateStep::new("optimization_plan", "head_of_operations",
                        "Review analysis and create optimization plan for {process}",
                        "Process optimization plan with implementation steps")
                        .after(&["process_analysis"]),
                ],
            ))
            .with_scope("human_resources", TaskTemplate::new(
                &[("position", "key position")],
                vec![
                    TemplateStep::new("recruitment_plan", "recruitment_specialist",
                        "Develop recruitment strategy for {position}",
                        "Recruitment plan with sourcing channels and timeline"),
                    TemplateStep::new("hiring_strategy", "head_of_hr",
                        "Review recruitment plan and finalize hiring strategy for {position}",
                        "Complete hiring strategy with budget and success metrics")
                        .after(&["recruitment_plan"]),
                ],
            ))
            .with_scope("commercial", TaskTemplate::new(
                &[("product", "product")],
                vec![
                    TemplateStep::new("sales_forecast", "sales_analyst",
                        "Analyze sales potential and forecast for {product}",
                        "Sales forecast and market potential analysis"),
                    TemplateStep::new("sales_strategy", "head_of_commercial",
                        "Develop sales strategy for {product} based on analysis",
                        "Complete sales strategy with targets and tactics")
                        .after(&["sales_forecast"]),
                ],
            ))
            .with_scope("executive", TaskTemplate::new(
                &[("scenario", "strategic initiative")],
                vec![
                    TemplateStep::new("technical_assessment", "cto",
                        "Assess technical feasibility and requirements for {scenario}",
                        "Technical assessment with recommendations"),
                    TemplateStep::new("strategic_decision", "ceo",
                        "Review inputs and make strategic decision on {scenario}",
                        "Strategic decision with implementation roadmap")
                        .after(&["technical_assessment"]),
                ],
            ))
    }
}

/// Replace `{key}` with the parameter value, else the default. Unknown
/// placeholders are left as written.
pub fn interpolate(text: &str, params: &HashMap<String, String>, defaults: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match params.get(key).or_else(|| defaults.get(key)) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
