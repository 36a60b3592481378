// src/lib.rs

pub mod backend;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod context;
pub mod errors;
pub mod event_loop;
pub mod fs;
pub mod logging;
pub mod registry;
pub mod types;
pub mod watch;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

pub use crate::context::{ContextStats, NotifyContext, ScopeConfig};
pub use crate::errors::NotifyError;
pub use crate::event_loop::EventLoop;
pub use crate::registry::{BackendKind, BackendRegistry};
pub use crate::types::{Action, ChangeMask, NotifyEvent};
pub use crate::watch::WatchHandle;

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};

/// One directory the binary watches, with the scope it is watched under.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub name: String,
    pub path: PathBuf,
    pub recursive: bool,
    pub filter: ChangeMask,
    pub scope: ScopeConfig,
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - the process-wide backend registry
/// - one notify context per watched directory or configured share
/// - the shared event loop, driven until Ctrl-C
pub async fn run(args: CliArgs) -> Result<()> {
    let registry = BackendRegistry::with_defaults().install_global()?;

    if args.list_backends {
        for backend in registry.backends() {
            println!("{}\t{}", backend.name(), backend.kind().label());
        }
        return Ok(());
    }

    let targets = resolve_targets(&args)?;
    let event_loop = EventLoop::new();
    let mut contexts = Vec::with_capacity(targets.len());

    for target in targets {
        let mut ctx = match NotifyContext::create(registry, &target.scope, &event_loop) {
            Ok(ctx) => ctx,
            Err(err) if err.is_degraded() => {
                warn!(share = %target.name, error = %err, "notifications unavailable; continuing without them");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let name = target.name.clone();
        let watched = ctx.watch(&target.path, target.filter, target.recursive, move |event| {
            println!("{name}\t{event}");
        });
        match watched {
            Ok(handle) => {
                info!(
                    share = %target.name,
                    path = ?target.path,
                    backend = ctx.backend_name(),
                    %handle,
                    "watching"
                );
                contexts.push(ctx);
            }
            Err(err) if err.is_degraded() => {
                warn!(share = %target.name, error = %err, "notifications unavailable; continuing without them");
            }
            Err(err) => return Err(err.into()),
        }
    }

    if contexts.is_empty() {
        warn!("no directory could be watched; exiting");
        return Ok(());
    }

    event_loop
        .run_until(tokio::signal::ctrl_c())
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutting down");
    for mut ctx in contexts {
        ctx.destroy();
    }
    Ok(())
}

/// Turn CLI paths, or the shares of the config file, into watch targets.
///
/// CLI flags (`--backend`, `--poll-interval`, `--recursive`) override the
/// config file.
pub fn resolve_targets(args: &CliArgs) -> Result<Vec<WatchTarget>> {
    if !args.paths.is_empty() {
        let filter = args.filter_mask().map_err(|e| anyhow!(e))?;
        let scope = apply_overrides(ScopeConfig::default(), args);
        return Ok(args
            .paths
            .iter()
            .map(|path| WatchTarget {
                name: path.display().to_string(),
                path: path.clone(),
                recursive: args.recursive,
                filter,
                scope: scope.clone(),
            })
            .collect());
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading share config {:?}", config_path))?;

    Ok(cfg
        .share
        .iter()
        .map(|(name, share)| WatchTarget {
            name: name.clone(),
            path: share.path.clone(),
            recursive: share.recursive || args.recursive,
            filter: share.filter,
            scope: apply_overrides(cfg.scope_for(share), args),
        })
        .collect())
}

fn apply_overrides(mut scope: ScopeConfig, args: &CliArgs) -> ScopeConfig {
    if let Some(backend) = args.backend.as_ref() {
        scope.backend = Some(backend.clone());
    }
    if let Some(interval) = args.poll_interval.as_ref() {
        scope.options.insert("poll_interval".to_string(), interval.clone());
    }
    scope
}
