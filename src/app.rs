//! Application orchestrator.
//! Loads and merges options, initializes logging, installs the Ctrl-C handler,
//! loads the volume layout, and runs the requested job against it.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tracing::debug;

use defrag_core::config::{CONFIG_ENV, create_template_config, load_config_from_xml_path};
use defrag_core::output as out;
use defrag_core::shutdown::{self, ProcessShutdown};
use defrag_core::{JobKind, MemoryVolume, ProgressInfo, default_config_path, load_config, run_job};

use crate::cli::Args;
use crate::logging::init_tracing;

fn print_config_location(args: &Args) {
    if let Some(p) = &args.config {
        out::print_info(&format!("Using --config (explicit):\n  {}\n", p.display()));
        return;
    }
    if let Ok(cfg_env) = std::env::var(CONFIG_ENV) {
        out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {cfg_env}\n"));
        out::print_info(&format!(
            "To override, unset {CONFIG_ENV} or set it to another file."
        ));
        return;
    }
    match default_config_path() {
        Some(p) => {
            out::print_info(&format!("Default options path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("An options file already exists at that location.");
            } else {
                out::print_info("No options file exists there yet. Run with --init-config to create a template.");
            }
        }
        None => out::print_error("Could not determine a default options path."),
    }
}

/// Run the CLI application. Returns the process exit code.
pub fn run(args: Args) -> Result<i32> {
    // Handle --print-config / --init-config before logging init
    if args.print_config {
        print_config_location(&args);
        return Ok(0);
    }
    if args.init_config {
        let path = args
            .config
            .clone()
            .or_else(default_config_path)
            .context("no options path; pass --config")?;
        create_template_config(&path)?;
        out::print_success(&format!(
            "A template options file was written to: {}",
            path.display()
        ));
        return Ok(0);
    }

    // File values first, CLI overrides win.
    let mut cfg = match &args.config {
        Some(path) => load_config_from_xml_path(path)?,
        None => load_config()?,
    };
    args.apply_overrides(&mut cfg);

    // Initialize logging and capture the guard so we can drop it on signal
    let guard_opt = init_tracing(&cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {}", e));
        e
    })?;

    // Guard needs to be dropped on SIGINT to flush logs
    let guard_slot = Arc::new(Mutex::new(guard_opt));
    {
        let guard_slot = Arc::clone(&guard_slot);
        ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; stopping after the current move...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take();
            }
        })
        .context("install signal handler")?;
    }

    debug!(?args, "starting defrag_core");

    let result = (|| -> Result<i32> {
        let layout = args.layout.as_deref().context("--layout is required")?;
        let mut volume = MemoryVolume::from_layout_file(layout)?;
        let name = volume.name().to_string();
        let kind = JobKind::from(args.job);
        if cfg.options.dry_run && kind != JobKind::Analysis {
            out::print_info("Dry-run: moves are planned and counted, the volume is left untouched.");
        }

        let bpc = volume.bytes_per_cluster();
        let mut on_progress = |p: &ProgressInfo| debug!(progress = %p.summary(bpc), "progress");
        let outcome = run_job(
            &mut volume,
            &name,
            kind,
            cfg.options.clone(),
            &ProcessShutdown,
            Some(&mut on_progress),
        );
        out::print_outcome(&outcome);
        Ok(outcome.exit_code())
    })();

    // Ensure logs are flushed before exit
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }

    result
}
