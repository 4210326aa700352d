use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use conclave::{
    logging, BackendFactory, Catalog, Config, ResultCache, RoleDescriptor, TemplateBook,
    WorkflowManager,
};

#[derive(Parser)]
#[command(name = "conclave")]
#[command(about = "Run organisational workflows against a pluggable agent backend")]
#[command(version)]
struct Args {
    /// Config file (defaults to $CONCLAVE_CONFIG_PATH, then ./conclave.yaml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Backend identifier, overriding config and $CONCLAVE_BACKEND
    #[arg(long, short)]
    backend: Option<String>,

    /// Bypass the result cache for this invocation
    #[arg(long)]
    no_cache: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every role of one group
    Run {
        scope: String,

        /// Scenario parameter, repeatable
        #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Run one representative per group
    Cross {
        #[arg(required = true)]
        scopes: Vec<String>,

        #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Print the role hierarchy
    OrgChart,
    /// Inspect or prune the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    Stats,
    /// Remove entries; omitted filters match everything
    Invalidate {
        #[arg(long)]
        unit: Option<String>,
        #[arg(long)]
        backend: Option<String>,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn load_catalog(config: &Config) -> Result<Catalog> {
    match &config.catalog_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading catalog {}", path.display()))?;
            Ok(Catalog::from_yaml_str(&content)?)
        }
        None => Ok(Catalog::company()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tree(catalog: &Catalog, role: &RoleDescriptor, depth: usize) {
    println!(
        "{}{} [{}] ({})",
        "  ".repeat(depth),
        role.title,
        role.id,
        role.group
    );
    if depth >= catalog.len() {
        return;
    }
    for report in catalog.reports(&role.id) {
        print_tree(catalog, report, depth + 1);
    }
}

enum Unit<'a> {
    Scope(&'a str),
    Cross(&'a [String]),
}

async fn run_workflow(
    args: &Args,
    config: &Config,
    unit: Unit<'_>,
    params: &[(String, String)],
) -> Result<()> {
    let params: HashMap<String, String> = params.iter().cloned().collect();
    let catalog = Arc::new(load_catalog(config)?);
    let backend = BackendFactory::create(args.backend.as_deref(), config).await?;

    let mut manager = WorkflowManager::new(backend, catalog, TemplateBook::company());
    if !args.no_cache {
        manager = manager.with_cache(Arc::new(ResultCache::new(config.cache.clone())));
    }

    let outcome = match unit {
        Unit::Scope(scope) => manager.run_scope(scope, &params).await,
        Unit::Cross(scopes) => manager.run_cross_scope(scopes, &params).await,
    };
    manager.shutdown().await;

    let result = outcome?;
    print_json(&result)?;
    if !result.success {
        bail!("workflow finished with task failures");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let config = Config::load(args.config.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting conclave");

    match &args.command {
        Command::Run { scope, params } => {
            run_workflow(&args, &config, Unit::Scope(scope), params).await
        }
        Command::Cross { scopes, params } => {
            run_workflow(&args, &config, Unit::Cross(scopes), params).await
        }
        Command::OrgChart => {
            let catalog = load_catalog(&config)?;
            for role in catalog.roles() {
                let is_root = role
                    .supervisor
                    .as_deref()
                    .map_or(true, |title| catalog.roles().iter().all(|r| r.title != title));
                if is_root {
                    print_tree(&catalog, role, 0);
                }
            }
            Ok(())
        }
        Command::Cache { action } => {
            let cache = ResultCache::new(config.cache.clone());
            match action {
                CacheCommand::Stats => print_json(&cache.stats().await),
                CacheCommand::Invalidate { unit, backend } => {
                    let removed = cache.invalidate(unit.as_deref(), backend.as_deref()).await;
                    print_json(&serde_json::json!({ "removed": removed }))
                }
            }
        }
    }
}
