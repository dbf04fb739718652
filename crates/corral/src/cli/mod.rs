//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use corral_common::paths::{CONFIG_DIR, CONFIG_PATH};
use serde::Serialize;

use crate::config::{Config, ResolvedConfig, ValidationMode, resolve};
use crate::host::{HostEnv, SystemHost};
use crate::storage::{ContainersStorage, StorageBackend};

/// corral - CRI runtime configuration inspector
#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Primary configuration file
    #[arg(long, global = true, env = "CORRAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Drop-in configuration directory
    #[arg(long, global = true, env = "CORRAL_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Print the merged configuration as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration without touching the host
    Check,

    /// Validate the configuration against this host
    Validate {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(Serialize)]
struct HandlerSummary {
    name: String,
    runtime_type: String,
    runtime_path: PathBuf,
    monitor_path: PathBuf,
    monitor_cgroup: String,
    monitor_version: Option<String>,
    idmap: bool,
    default: bool,
}

impl HandlerSummary {
    fn collect(resolved: &ResolvedConfig) -> Vec<Self> {
        let runtime = &resolved.config().runtime;
        runtime
            .runtimes
            .iter()
            .map(|(name, handler)| Self {
                name: name.clone(),
                runtime_type: handler.kind().map_or_else(String::new, |kind| kind.to_string()),
                runtime_path: handler.runtime_path.clone(),
                monitor_path: handler.monitor_path.clone(),
                monitor_cgroup: handler.monitor_cgroup.clone(),
                monitor_version: resolved
                    .subsystems()
                    .monitor(name)
                    .map(|caps| caps.version.to_string()),
                idmap: handler.supports_idmap(),
                default: *name == runtime.default_runtime,
            })
            .collect()
    }
}

/// Map a configured log level onto a `tracing` level name.
#[must_use]
pub fn tracing_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" | "panic" => "error",
        _ => "info",
    }
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let host: Arc<dyn HostEnv> = Arc::new(SystemHost::new());
        let storage: Arc<dyn StorageBackend> = Arc::new(ContainersStorage::new());

        let config_path = self.config.unwrap_or_else(|| CONFIG_PATH.clone());
        let config_dir = self.config_dir.unwrap_or_else(|| CONFIG_DIR.clone());
        let config = Config::load(&config_path, &config_dir, &*storage, &*host)
            .map_err(|e| color_eyre::eyre::eyre!("Failed to load configuration: {}", e))?;

        match self.command {
            Commands::Config { output } => {
                let resolved = resolve(config, ValidationMode::Static, &*host, &*storage)
                    .await
                    .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;
                let config = resolved.config();
                match output {
                    Some(path) => {
                        config.to_file(&path).map_err(|e| {
                            color_eyre::eyre::eyre!("Failed to write configuration: {}", e)
                        })?;
                        println!("Configuration written to {}", path.display());
                    }
                    None => {
                        let toml = config.to_toml_pretty().map_err(|e| {
                            color_eyre::eyre::eyre!("Failed to encode configuration: {}", e)
                        })?;
                        print!("{toml}");
                    }
                }
                Ok(())
            }

            Commands::Check => {
                resolve(config, ValidationMode::Static, &*host, &*storage)
                    .await
                    .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;
                println!("Configuration is valid");
                Ok(())
            }

            Commands::Validate { format } => {
                let resolved = resolve(config, ValidationMode::Execution, &*host, &*storage)
                    .await
                    .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;
                let handlers = HandlerSummary::collect(&resolved);

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&handlers)?);
                } else {
                    println!("NAME\tTYPE\tPATH\tMONITOR\tCGROUP\tIDMAP");
                    for handler in handlers {
                        println!(
                            "{}{}\t{}\t{}\t{}\t{}\t{}",
                            handler.name,
                            if handler.default { "*" } else { "" },
                            handler.runtime_type,
                            handler.runtime_path.display(),
                            handler.monitor_version.as_deref().unwrap_or("-"),
                            handler.monitor_cgroup,
                            handler.idmap
                        );
                    }
                }
                Ok(())
            }
        }
    }
}
