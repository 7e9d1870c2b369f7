use std::{path::PathBuf, sync::mpsc::sync_channel, thread};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wlx_outputs::{
    DisplayConfig, ManagerOptions, WlOutput, WlOutputEvent, WlOutputHandle,
    WlOutputManager, config,
};

/// Keeps the Wayland output layout in line with the saved display groups
#[derive(Debug, Parser)]
#[command(name = "wlx-outputs", version)]
struct Cli {
    /// Configuration file [default: $XDG_CONFIG_HOME/wlx-outputs/display-config.toml]
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not apply the saved group for the attached outputs at startup
    #[arg(long)]
    no_restore: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn log_output(prefix: &str, output: &WlOutput) {
    let mode = output
        .current_mode
        .as_ref()
        .map(|m| {
            let size = m.resolution;
            format!("{}x{}@{:.3}", size.width, size.height, m.refresh())
        })
        .unwrap_or_else(|| "-".into());
    info!(
        identifier = %output.identifier,
        name = %output.name,
        enabled = output.enabled,
        %mode,
        x = output.position.x,
        y = output.position.y,
        scale = output.scale,
        transform = output.transform.degrees(),
        primary = output.primary,
        "{prefix}"
    );
}

fn log_event(event: WlOutputEvent) {
    match event {
        WlOutputEvent::InitialState(outputs) => {
            info!(count = outputs.len(), "initial output state");
            for output in &outputs {
                log_output("output", output);
            }
        }
        WlOutputEvent::Changed(output) => log_output("output changed", &output),
        WlOutputEvent::Removed { identifier, name } => {
            info!(%identifier, %name, "output removed");
        }
        WlOutputEvent::ConfigurationApplied { success: true } => {
            info!("configuration applied");
        }
        WlOutputEvent::ConfigurationApplied { success: false } => {
            warn!("configuration was not applied");
        }
        WlOutputEvent::ActionFailed { reason } => {
            warn!(%reason, "action failed");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli.config.or_else(config::default_path);
    let config = config_path
        .as_deref()
        .map(DisplayConfig::load_or_default)
        .unwrap_or_default();
    let options = ManagerOptions {
        config,
        config_path,
        restore: !cli.no_restore,
    };

    let (event_tx, event_rx) = sync_channel(16);
    let (command_tx, command_rx) = sync_channel(16);
    let (manager, event_queue) =
        WlOutputManager::new_connection(event_tx, command_rx, options)
            .context("failed to set up output management")?;
    // Keeps the manager running until the process exits
    let _handle = WlOutputHandle::new(command_tx);

    let worker = thread::Builder::new()
        .name("wayland".into())
        .spawn(move || manager.run(event_queue))
        .context("failed to spawn the output manager thread")?;

    for event in event_rx {
        log_event(event);
    }

    worker
        .join()
        .map_err(|_| anyhow!("output manager thread panicked"))?
        .context("output manager stopped")?;
    Ok(())
}
