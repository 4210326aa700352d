//! Conclave error types

use thiserror::Error;
use uuid::Uuid;

use crate::catalog::RoleId;

/// Errors that can occur while orchestrating a workflow
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Unknown backend identifier, malformed configuration or template
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A recognized backend whose runtime dependency is missing
    #[error("Backend '{backend}' is not available: {reason}. {hint}")]
    BackendNotAvailable {
        backend: String,
        reason: String,
        hint: String,
    },

    /// Task references a role that has no agent in this session
    #[error("Agent not found for role '{0}'. Create the agent before its tasks")]
    AgentNotFound(RoleId),

    /// Backend refused to create an agent
    #[error("Agent creation failed: {0}")]
    AgentCreation(String),

    /// Backend refused to create a task
    #[error("Task creation failed: {0}")]
    TaskCreation(String),

    /// Whole-batch backend fault
    #[error("Workflow execution failed: {0}")]
    WorkflowExecution(String),

    /// Scope has no roles in the catalog
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    /// Handle was not issued by this backend session
    #[error("Unknown handle: {0}")]
    UnknownHandle(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<serde_yaml::Error> for ConclaveError {
    fn from(err: serde_yaml::Error) -> Self {
        ConclaveError::Configuration(format!("invalid YAML: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ConclaveError>;
