//! # Conclave
//!
//! Backend-agnostic workflow orchestration for a hierarchical organisation.
//!
//! A scope (one group of the organisation, or a composition of groups) is
//! turned into agents and tasks, which a pluggable backend executes. Results
//! of dependent tasks flow forward through a per-run context store, and whole
//! runs are cached on disk.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          WORKFLOW MANAGER                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │   Catalog    │  │  Templates   │  │   Context    │               │
//! │  └──────────────┘  └──────────────┘  └──────────────┘               │
//! └───────────┬───────────────────────────────────────────┬─────────────┘
//!             │                                           │
//!             ▼                                           ▼
//!   ┌───────────────────┐                       ┌───────────────────┐
//!   │  BackendFactory   │                       │    ResultCache    │
//!   └─────────┬─────────┘                       │ (shared, on disk) │
//!             │                                 └───────────────────┘
//!       ┌─────┴─────┐
//!       ▼           ▼
//!   ┌────────┐  ┌────────┐
//!   │planner │  │command │
//!   └────────┘  └────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Scope**: a group of the organisation, or several groups for a cross-scope run
//! - **Representative**: the head-level role standing in for a group
//! - **Backend**: executes agents and tasks; chosen by identifier
//! - **Batch**: tasks submitted to the backend together

pub mod backend;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod templates;
pub mod types;
pub mod workflow;

pub use backend::{Backend, BackendFactory, BackendKind, CommandBackend, PlannerBackend};
pub use cache::{cache_key, CacheRecord, CacheStats, ResultCache};
pub use catalog::{Catalog, RoleDescriptor, RoleId, RoleLevel};
pub use config::{CacheConfig, Config};
pub use context::ContextManager;
pub use error::{ConclaveError, Result};
pub use templates::{CrossScopeTemplate, TaskTemplate, TemplateBook, TemplateStep};
pub use types::{AgentHandle, AgentSpec, Context, ExecutionMode, TaskHandle, TaskSpec, WorkflowResult};
pub use workflow::WorkflowManager;
