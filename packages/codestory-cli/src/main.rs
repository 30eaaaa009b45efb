//! codestory command-line entry point

mod args;
mod render;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use codestory_core::{
    CancelToken, CleanOptions, CommitOptions, CoreError, GitGateway, LanguageRegistry, Pipeline,
    ProviderRegistry, Result,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use args::{Cli, Command, ConfigScope};
use render::{DiffDisplay, TerminalInteraction};
use settings::Settings;

fn init_logging(verbose: bool, silent: bool) {
    let default = if silent {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn repo_root() -> Result<PathBuf> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .map_err(|e| CoreError::gateway(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        return Err(CoreError::gateway("not inside a git repository"));
    }
    Ok(PathBuf::from(
        String::from_utf8_lossy(&output.stdout).trim(),
    ))
}

/// The `config` subcommand reads and writes the stored layers directly
fn run_config(
    key: Option<String>,
    value: Option<String>,
    scope: ConfigScope,
    delete: bool,
    deleteall: bool,
    describe: bool,
) -> Result<()> {
    if describe {
        for spec in settings::KEY_SPECS {
            println!("{:<42} {}", spec.name, spec.description);
        }
        return Ok(());
    }

    let path = match scope {
        ConfigScope::Local => settings::local_config_path(&repo_root()?),
        ConfigScope::Global => settings::global_config_path()
            .ok_or_else(|| CoreError::config("cannot locate the user configuration directory"))?,
    };
    let mut stored = settings::load_config_file(&path)?;

    if deleteall {
        stored.clear();
        settings::store_config_file(&path, &stored)?;
        println!("Cleared {}", path.display());
        return Ok(());
    }

    let Some(key) = key else {
        if stored.is_empty() {
            println!("No keys set in {}", path.display());
        } else {
            for (key, value) in &stored {
                println!("{key} = {value}");
            }
        }
        return Ok(());
    };

    let spec = settings::key_spec(&key)
        .ok_or_else(|| CoreError::config(format!("unknown configuration key: {key}")))?;

    if delete {
        stored.remove(&key);
        settings::store_config_file(&path, &stored)?;
        println!("Removed {key}");
        return Ok(());
    }

    match value {
        Some(raw) => {
            let parsed = settings::parse_value(spec, &raw)?;
            stored.insert(key.clone(), parsed);
            settings::store_config_file(&path, &stored)?;
            println!("Set {key}");
        }
        None => match stored.get(&key) {
            Some(value) => println!("{value}"),
            None => println!("(unset)"),
        },
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let Cli { command, options } = cli;
    let command = match command {
        Command::Config {
            key,
            value,
            scope,
            delete,
            deleteall,
            describe,
        } => return run_config(key, value, scope, delete, deleteall, describe),
        other => other,
    };

    let root = repo_root()?;
    let resolved = Settings::resolve(&options, &root)?;
    let config = resolved.pipeline_config()?;
    let silent = resolved.get_bool("silent").unwrap_or(false);

    // Language registry, with custom bundles overlaid when configured
    let registry = match resolved.get_str("custom_language_config") {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| CoreError::config(format!("cannot read {path}: {e}")))?;
            LanguageRegistry::with_custom(&text)?
        }
        None => LanguageRegistry::builtin()?,
    };

    // Provider selection: the part before ':' names the registered provider
    let providers = ProviderRegistry::with_builtins();
    let model = match resolved.get_str("model") {
        None | Some("no-model") => None,
        Some(spec) => {
            let provider_name = spec.split(':').next().unwrap_or(spec);
            Some(providers.model(provider_name)?)
        }
    };
    let embedder = if config.relevance_filtering {
        let name = resolved
            .get_str("custom_embedding_model")
            .unwrap_or("feature-hash");
        Some(providers.embedder(name)?)
    } else {
        None
    };

    let display = match resolved.get_str("display_diff_type") {
        Some("git") => DiffDisplay::Git,
        _ => DiffDisplay::Semantic,
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("cancellation requested");
                cancel.cancel();
            }
        });
    }

    let gateway = Arc::new(GitGateway::open(&root)?);
    let pipeline = Pipeline::new(
        gateway,
        Arc::new(registry),
        model,
        embedder,
        config,
        cancel,
        Arc::new(TerminalInteraction { display }),
    );

    let report = match command {
        Command::Commit { pathspecs, intent } => {
            pipeline
                .run_commit(CommitOptions { intent, pathspecs })
                .await?
        }
        Command::Fix { rev } => pipeline.run_fix(&rev).await?,
        Command::Clean { rev, min_size } => {
            pipeline
                .run_clean(CleanOptions {
                    start_from: rev,
                    min_size,
                })
                .await?
        }
        Command::Config { .. } => unreachable!("handled above"),
    };

    render::print_report(&report, silent);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.options.verbose, cli.options.silent);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code() as u8)
        }
    }
}
