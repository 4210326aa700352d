//! Organisation catalog - the read-only role data a run is planned from

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConclaveError, Result};

/// Stable role identity, kept separate from the display title
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Hierarchy levels, most senior first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleLevel {
    Executive,
    Head,
    Senior,
    Expert,
    Developer,
    Analyst,
    Junior,
}

impl RoleLevel {
    /// Tier index, 0 being the most senior
    pub fn tier(&self) -> usize {
        match self {
            RoleLevel::Executive => 0,
            RoleLevel::Head => 1,
            RoleLevel::Senior => 2,
            RoleLevel::Expert => 3,
            RoleLevel::Developer => 4,
            RoleLevel::Analyst => 5,
            RoleLevel::Junior => 6,
        }
    }

    /// Only the top two tiers may delegate
    pub fn can_delegate(&self) -> bool {
        self.tier() < 2
    }

    /// Phrase used when describing someone at this level
    pub fn descriptor(&self) -> &'static str {
        match self {
            RoleLevel::Executive => "senior leadership",
            RoleLevel::Head => "department leadership",
            RoleLevel::Senior => "senior-level expertise",
            RoleLevel::Expert => "specialized expertise",
            RoleLevel::Developer => "software development",
            RoleLevel::Analyst => "analytical expertise",
            RoleLevel::Junior => "professional expertise",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleLevel::Executive => "executive",
            RoleLevel::Head => "head",
            RoleLevel::Senior => "senior",
            RoleLevel::Expert => "expert",
            RoleLevel::Developer => "developer",
            RoleLevel::Analyst => "analyst",
            RoleLevel::Junior => "junior",
        }
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role as supplied by the organisation catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub id: RoleId,
    pub title: String,
    pub level: RoleLevel,
    pub group: String,
    /// Title of the supervising role, `None` for the top of the organisation
    #[serde(default)]
    pub supervisor: Option<String>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Deserialize)]
struct CatalogFile {
    roles: Vec<RoleDescriptor>,
}

/// Ordered, immutable set of roles indexed by identity
#[derive(Debug, Clone)]
pub struct Catalog {
    roles: Vec<RoleDescriptor>,
    by_id: HashMap<RoleId, usize>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate role ids
    pub fn new(roles: Vec<RoleDescriptor>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(roles.len());
        for (idx, role) in roles.iter().enumerate() {
            if by_id.insert(role.id.clone(), idx).is_some() {
                return Err(ConclaveError::Configuration(format!(
                    "duplicate role id '{}' in catalog",
                    role.id
                )));
            }
        }
        Ok(Self { roles, by_id })
    }

    /// Parse a catalog from a YAML document with a top-level `roles` list
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::new(file.roles)
    }

    pub fn roles(&self) -> &[RoleDescriptor] {
        &self.roles
    }

    pub fn get(&self, id: &RoleId) -> Option<&RoleDescriptor> {
        self.by_id.get(id).map(|&idx| &self.roles[idx])
    }

    /// Roles of a group, in catalog order
    pub fn roles_in_group(&self, group: &str) -> Vec<&RoleDescriptor> {
        self.roles.iter().filter(|r| r.group == group).collect()
    }

    /// Group names in order of first appearance
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for role in &self.roles {
            if !groups.contains(&role.group.as_str()) {
                groups.push(&role.group);
            }
        }
        groups
    }

    /// The group's representative for cross-group work: its first head-level role
    pub fn representative(&self, group: &str) -> Option<&RoleDescriptor> {
        self.roles
            .iter()
            .find(|r| r.group == group && r.level == RoleLevel::Head)
    }

    /// Resolve the supervisor of a role
    pub fn supervisor(&self, id: &RoleId) -> Option<&RoleDescriptor> {
        let title = self.get(id)?.supervisor.as_deref()?;
        self.roles.iter().find(|r| r.title == title)
    }

    /// Roles that report directly to the given role
    pub fn reports(&self, id: &RoleId) -> Vec<&RoleDescriptor> {
        match self.get(id) {
            Some(role) => self
                .roles
                .iter()
                .filter(|r| r.supervisor.as_deref() == Some(role.title.as_str()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of supervisors above a role
    pub fn depth(&self, id: &RoleId) -> usize {
        let mut depth = 0;
        let mut current = self.supervisor(id);

        while let Some(role) = current {
            depth += 1;
            if depth > self.roles.len() {
                break;
            }
            current = self.supervisor(&role.id);
        }

        depth
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// The built-in six-group company organisation
    #[rustfmt::skip]
    pub fn company() -> Self {
        let roles = vec![
            role("ceo", "CEO", RoleLevel::Executive, "executive", None,
                &["Define company vision and strategy", "Oversee all departments", "Make final decisions on major initiatives", "Ensure company goals are met"],
                &["strategic planning", "leadership", "decision making", "business development"]),
            role("cto", "CTO", RoleLevel::Executive, "executive", Some("CEO"),
                &["Lead technology strategy", "Oversee Software Development department", "Ensure technical excellence", "Drive innovation"],
                &["technical leadership", "architecture", "innovation", "team management"]),
            role("head_of_marketing", "Head of Marketing", RoleLevel::Head, "marketing", Some("CEO"),
                &["Develop marketing strategy", "Lead marketing campaigns", "Manage brand reputation", "Oversee marketing team"],
                &["marketing strategy", "brand management", "campaign planning", "analytics"]),
            role("head_of_operations", "Head of Operations", RoleLevel::Head, "operations", Some("CEO"),
                &["Optimize business processes", "Manage operational efficiency", "Ensure quality standards", "Coordinate cross-department operations"],
                &["process optimization", "project management", "quality assurance", "logistics"]),
            role("head_of_hr", "Head of HR", RoleLevel::Head, "human_resources", Some("CEO"),
                &["Manage recruitment and hiring", "Develop employee programs", "Handle employee relations", "Foster company culture"],
                &["recruitment", "employee relations", "training", "organizational development"]),
            role("head_of_software_development", "Head of Software Development", RoleLevel::Head, "software_development", Some("CTO"),
                &["Lead development teams", "Ensure code quality", "Plan technical roadmap", "Coordinate with other departments"],
                &["software architecture", "team leadership", "agile methodology", "code review"]),
            role("head_of_commercial", "Head of Commercial", RoleLevel::Head, "commercial", Some("CEO"),
                &["Drive sales strategy", "Manage client relationships", "Negotiate contracts", "Meet revenue targets"],
                &["sales strategy", "negotiation", "client relations", "revenue management"]),
            role("marketing_analyst", "Marketing Analyst", RoleLevel::Analyst, "marketing", Some("Head of Marketing"),
                &["Analyze market trends", "Track campaign performance", "Provide data-driven insights", "Monitor competitor activities"],
                &["data analysis", "market research", "reporting", "analytics tools"]),
            role("content_marketing_expert", "Content Marketing Expert", RoleLevel::Expert, "marketing", Some("Head of Marketing"),
                &["Create marketing content", "Develop content strategy", "Manage content calendar", "Ensure brand consistency"],
                &["content creation", "copywriting", "SEO", "content strategy"]),
            role("operations_analyst", "Operations Analyst", RoleLevel::Analyst, "operations", Some("Head of Operations"),
                &["Analyze operational metrics", "Identify process improvements", "Generate operational reports", "Track KPIs"],
                &["process analysis", "data analytics", "reporting", "efficiency optimization"]),
            role("qa_expert", "Quality Assurance Expert", RoleLevel::Expert, "operations", Some("Head of Operations"),
                &["Ensure quality standards", "Conduct quality audits", "Develop QA processes", "Train teams on quality practices"],
                &["quality assurance", "testing", "process improvement", "documentation"]),
            role("recruitment_specialist", "Recruitment Specialist", RoleLevel::Expert, "human_resources", Some("Head of HR"),
                &["Source and recruit candidates", "Conduct interviews", "Manage hiring process", "Build talent pipeline"],
                &["recruitment", "interviewing", "talent sourcing", "candidate assessment"]),
            role("hr_analyst", "HR Analyst", RoleLevel::Analyst, "human_resources", Some("Head of HR"),
                &["Analyze HR metrics", "Track employee satisfaction", "Prepare HR reports", "Monitor retention rates"],
                &["HR analytics", "reporting", "data analysis", "employee engagement"]),
            role("senior_software_developer", "Senior Software Developer", RoleLevel::Senior, "software_development", Some("Head of Software Development"),
                &["Design and develop software", "Review code from junior developers", "Mentor development team", "Ensure best practices"],
                &["software development", "code review", "mentoring", "architecture design"]),
            role("software_developer", "Software Developer", RoleLevel::Developer, "software_development", Some("Head of Software Development"),
                &["Write clean, efficient code", "Implement features", "Fix bugs", "Collaborate with team"],
                &["programming", "problem solving", "testing", "version control"]),
            role("qa_analyst", "QA Analyst", RoleLevel::Analyst, "software_development", Some("Head of Software Development"),
                &["Test software quality", "Write test cases", "Report bugs", "Ensure product quality"],
                &["testing", "bug tracking", "test automation", "quality metrics"]),
            role("sales_analyst", "Sales Analyst", RoleLevel::Analyst, "commercial", Some("Head of Commercial"),
                &["Analyze sales data", "Track sales performance", "Forecast revenue", "Generate sales reports"],
                &["sales analytics", "forecasting", "reporting", "CRM tools"]),
            role("business_development_expert", "Business Development Expert", RoleLevel::Expert, "commercial", Some("Head of Commercial"),
                &["Identify business opportunities", "Develop partnerships", "Expand market presence", "Drive revenue growth"],
                &["business development", "networking", "negotiation", "market analysis"]),
        ];

        let by_id = roles
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.id.clone(), idx))
            .collect();
        Self { roles, by_id }
    }
}

#[allow(clippy::too_many_arguments)]
fn role(
    id: &str,
    title: &str,
    level: RoleLevel,
    group: &str,
    supervisor: Option<&str>,
    responsibilities: &[&str],
    skills: &[&str],
) -> RoleDescriptor {
    RoleDescriptor {
        id: RoleId::from(id),
        title: title.to_string(),
        level,
        group: group.to_string(),
        supervisor: supervisor.map(String::from),
        responsibilities: responsibilities.iter().map(|s| s.to_string()).collect(),
        skills: skills.iter().map(|s| s.to_string()).collect(),
    }
}
