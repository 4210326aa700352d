//! Backend selection and initialization

use tracing::info;

use crate::backend::command::CommandSettings;
use crate::backend::{Backend, BackendKind, CommandBackend, PlannerBackend};
use crate::config::{Config, ENV_BACKEND};
use crate::error::Result;

/// Identifier used when neither caller, config nor environment name one
pub const DEFAULT_BACKEND: BackendKind = BackendKind::Planner;

pub struct BackendFactory;

impl BackendFactory {
    /// Create and initialize the backend named by `explicit`, the config or
    /// `$CONCLAVE_BACKEND`, in that order of precedence.
    pub async fn create(explicit: Option<&str>, config: &Config) -> Result<Box<dyn Backend>> {
        let env_default = std::env::var(ENV_BACKEND).ok();
        let kind = Self::resolve_kind(explicit, config, env_default.as_deref())?;
        Self::create_kind(kind, config).await
    }

    /// Pick the backend identity without touching any backend
    pub fn resolve_kind(
        explicit: Option<&str>,
        config: &Config,
        env_default: Option<&str>,
    ) -> Result<BackendKind> {
        let given = |id: &&str| !id.trim().is_empty();
        let chosen = explicit
            .filter(given)
            .or_else(|| config.backend.as_deref().filter(given))
            .or_else(|| env_default.filter(given));

        match chosen {
            Some(id) => id.parse(),
            None => Ok(DEFAULT_BACKEND),
        }
    }

    /// Build the backend for `kind` and hand it its config section
    pub async fn create_kind(kind: BackendKind, config: &Config) -> Result<Box<dyn Backend>> {
        let section = config.backend_section(kind.as_str());

        let mut backend: Box<dyn Backend> = match kind {
            BackendKind::Planner => Box::new(PlannerBackend::new()),
            BackendKind::Command => {
                CommandSettings::from_section(&section)?.probe()?;
                Box::new(CommandBackend::new())
            }
        };

        backend.initialize(&section).await?;
        info!(backend = %kind, "Backend ready");
        Ok(backend)
    }

    pub fn available_backends() -> Vec<&'static str> {
        BackendKind::identifiers()
    }

    /// Whether `id` names a backend whose runtime dependency is present
    pub fn is_backend_available(id: &str, config: &Config) -> bool {
        match id.parse::<BackendKind>() {
            Ok(BackendKind::Planner) => true,
            Ok(BackendKind::Command) => {
                CommandSettings::from_section(&config.backend_section("command"))
                    .and_then(|s| s.probe())
                    .is_ok()
            }
            Err(_) => false,
        }
    }
}
