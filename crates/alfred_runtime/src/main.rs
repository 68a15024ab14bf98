//! Alfred function runner
//!
//! Loads one function file, reports which entry points it defines and runs
//! them against payloads read from JSON files.

use alfred_core::{Helper, Mock, Request, Response};
use alfred_script::{script_pool, ModuleRegistry, PoolConfig, ScriptFunction};
use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "alfred-fn", version, about = "Run an Alfred function file")]
struct Cli {
    /// Function file to load
    file: PathBuf,

    /// Pool configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Helper list passed to the entry points (JSON array)
    #[arg(long)]
    helpers: Option<PathBuf>,

    /// Mock descriptor passed to `alfred` (JSON)
    #[arg(long)]
    mock: Option<PathBuf>,

    /// Request passed to `alfred` (JSON)
    #[arg(long)]
    request: Option<PathBuf>,

    /// Response passed to `alfred` (JSON)
    #[arg(long)]
    response: Option<PathBuf>,

    /// Module made available to `require`, as NAME=PATH
    #[arg(long = "module", value_name = "NAME=PATH")]
    modules: Vec<String>,

    #[arg(long)]
    min_size: Option<usize>,

    #[arg(long)]
    max_size: Option<usize>,
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    tracing::info!("Alfred function runner v{}", alfred_core::VERSION);

    let config = pool_config(&cli)?;
    let modules = load_modules(&cli.modules)?;
    let pool = Arc::new(script_pool(&config, modules).context("failed to start runtime pool")?);

    let result = run(&cli, &pool);
    pool.shutdown();
    result
}

fn run(cli: &Cli, pool: &Arc<alfred_script::ScriptPool>) -> Result<()> {
    let source = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("failed to read {}", cli.file.display()))?;
    let file_name = cli
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.file.display().to_string());

    let function = ScriptFunction::new(Arc::clone(pool), file_name, source)?;
    tracing::info!(
        file = function.file_name(),
        update_helpers = function.has_update_helpers(),
        alfred = function.has_alfred(),
        "function file loaded"
    );

    let mut helpers: Vec<Helper> = load_or_default(cli.helpers.as_deref())?;

    if function.has_update_helpers() {
        match function.update_helpers(&helpers) {
            Ok(updated) => helpers = updated,
            Err(err) => tracing::error!("{err}"),
        }
        println!("{}", serde_json::to_string_pretty(&helpers)?);
    }

    if function.has_alfred() {
        let mock: Mock = load_or_default(cli.mock.as_deref())?;
        let request: Request = load_or_default(cli.request.as_deref())?;
        let response: Response = load_or_default(cli.response.as_deref())?;

        let response = match function.alfred(&mock, &helpers, &request, &response) {
            Ok(updated) => updated,
            Err(err) => {
                tracing::error!("{err}");
                response
            }
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    Ok(())
}

fn pool_config(cli: &Cli) -> Result<PoolConfig> {
    let mut config = match &cli.config {
        Some(path) => PoolConfig::load(path)?,
        None => PoolConfig::default(),
    };
    if let Some(min_size) = cli.min_size {
        config.min_size = min_size;
    }
    if let Some(max_size) = cli.max_size {
        config.max_size = max_size;
    }
    config.validate()?;
    Ok(config)
}

fn load_modules(specs: &[String]) -> Result<ModuleRegistry> {
    let mut modules = ModuleRegistry::new();
    for spec in specs {
        let (name, path) = spec
            .split_once('=')
            .with_context(|| format!("module '{spec}' is not NAME=PATH"))?;
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read module {name} from {path}"))?;
        if modules.register(name, source).is_some() {
            tracing::warn!(module = name, "module registered twice, keeping the last one");
        }
    }
    Ok(modules)
}

fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
