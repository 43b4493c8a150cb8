//! CLI command handler: build immutable opts (defaults → config file → flags) and run.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::Arc;

use crate::engine::arg_parser::Cli;
use crate::error::FatalError;
use crate::pipeline::orchestrator::Stages;
use crate::sweep::{new_control, sweep};
use crate::utils::config::{AUTH_ENDPOINTS, LEGACY_ENDPOINTS, StageWorkers};
use crate::utils::symsweep_toml::SymsweepToml;
use crate::utils::{load_symsweep_toml, resolve_credential, setup_logging};
use crate::{Credential, Opts, RetryPolicy, RootSource, RunMode};

/// Endpoint list for the protocol in use: flags, then the file, then the built-in list.
fn select_endpoints(cli: &Cli, file: &SymsweepToml, authenticated: bool) -> Vec<String> {
    if !cli.endpoint.is_empty() {
        return cli.endpoint.clone();
    }
    let from_file = match authenticated {
        true => file.settings.auth_endpoints.clone(),
        false => file.settings.endpoints.clone(),
    };
    from_file.unwrap_or_else(|| {
        let builtin = if authenticated {
            AUTH_ENDPOINTS
        } else {
            LEGACY_ENDPOINTS
        };
        builtin.iter().map(|s| s.to_string()).collect()
    })
}

/// Combine flags with the config file into the run options. Flags win.
pub fn build_opts(cli: &Cli, file: Option<&SymsweepToml>, credential: Option<Credential>) -> Result<Opts, FatalError> {
    let default_file = SymsweepToml::default();
    let file = file.unwrap_or(&default_file);
    let settings = &file.settings;

    let dump_to = cli.dump_to.clone().or_else(|| settings.dump_to.clone());
    if let Some(d) = &dump_to
        && d.exists()
        && !d.is_dir()
    {
        return Err(FatalError::DestinationNotDir(d.clone()));
    }

    let dump_only = cli.dump_only.unwrap_or(false);
    let mode = match &cli.upload_from {
        Some(dir) => RunMode::UploadOnly(dir.clone()),
        None => {
            let source = RootSource::from_options(
                cli.root.as_deref(),
                cli.installer.as_deref(),
                cli.ipsw.as_deref(),
            )?;
            if dump_only {
                if dump_to.is_none() {
                    return Err(FatalError::DumpOnlyWithoutDestination);
                }
                RunMode::DumpOnly(source)
            } else {
                RunMode::Full(source)
            }
        }
    };

    let mut workers = StageWorkers::current();
    file.workers.apply(&mut workers);

    let mut exclude = settings.exclude.clone().unwrap_or_default();
    exclude.extend(cli.exclude.iter().cloned());

    let endpoints = select_endpoints(cli, file, credential.is_some());
    Ok(Opts {
        mode,
        dump_to,
        tools_dir: cli.tools.clone().or_else(|| settings.tools_dir.clone()),
        arch: cli.arch.clone().or_else(|| settings.arch.clone()),
        separate_arch: cli.separate_arch.or(settings.separate_arch).unwrap_or(false),
        credential,
        endpoints,
        exclude,
        strict: cli.strict.or(settings.strict).unwrap_or(true),
        verbose: cli.verbose.or(settings.verbose).unwrap_or(false),
        progress: cli.progress.or(settings.progress).unwrap_or(false),
        workers,
        retry: RetryPolicy::default(),
    })
}

/// Parse config, build opts, install the Ctrl+C handler and run.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("read current directory")?;
    let file = load_symsweep_toml(cli.config.as_deref(), &cwd)?;
    let verbose = cli
        .verbose
        .or_else(|| file.as_ref().and_then(|f| f.settings.verbose))
        .unwrap_or(false);
    setup_logging(verbose);

    let credential = resolve_credential(cli.api_key.as_deref(), &cwd);
    let opts = build_opts(cli, file.as_ref(), credential)?;
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );
    if opts.credential.is_none() && opts.delivers() {
        warn!("No API key; uploading with the legacy protocol");
    }

    let control = new_control(&opts);
    let handler_control = Arc::clone(&control);
    ctrlc::set_handler(move || {
        warn!("Interrupted; finishing in-flight items and cleaning up");
        handler_control.cancel();
    })
    .context("set Ctrl+C handler")?;

    let stages = Stages::external(opts.tools_dir.as_deref());
    sweep(&opts, &stages, &control)
}
