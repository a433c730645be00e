//! Grydgets Daemon - Headless Dashboard Renderer
//!
//! Loads a dashboard configuration, starts its providers, and drives the
//! node tree at a fixed frame rate. Rendered frames can be written to a PNG
//! snapshot; override payloads arrive on a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # Default config ($XDG_CONFIG_HOME/grydgets/grydgets.toml)
//! grydgets-daemon
//!
//! # Explicit files, 10 fps, snapshot every rendered frame
//! grydgets-daemon --config dash.toml --providers providers.toml --fps 10 --snapshot /tmp/dash.png
//!
//! # Render 100 frames and exit
//! grydgets-daemon --frames 100 --snapshot out.png
//!
//! # Send an override
//! echo '{"widget": "alerts", "payload": {"text": "Door open"}}' | nc -U $XDG_RUNTIME_DIR/grydgets/notify.sock
//!
//! # Verbose logging
//! RUST_LOG=debug grydgets-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//! - `SIGHUP`: Reload configuration

mod render_loop;
mod server;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use grydgets_core::{default_config_path, LogLevel, NotifyRegistry};

use render_loop::{ConfigPaths, Dashboard, RenderLoop};
use server::NotifyServer;

/// Grydgets Daemon - headless dashboard renderer
#[derive(Parser, Debug)]
#[command(name = "grydgets-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Dashboard configuration file
    #[arg(short = 'c', long, env = "GRYDGETS_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Separate providers file (default: providers.toml next to the config)
    #[arg(short = 'p', long, env = "GRYDGETS_PROVIDERS", value_name = "FILE")]
    providers: Option<PathBuf>,

    /// Unix socket for override notifications
    #[arg(short = 's', long, env = "GRYDGETS_SOCKET", value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Do not open the notification socket
    #[arg(long)]
    no_socket: bool,

    /// Write every rendered frame to this PNG file
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Frame rate limit (1-60), overrides the config file
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// Exit after this many frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Log level (debug, info, warning), overrides the config file
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// `$XDG_RUNTIME_DIR/grydgets/notify.sock`, or the temp dir without one
fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join("grydgets").join("notify.sock"),
        None => std::env::temp_dir().join("grydgets").join("notify.sock"),
    }
}

/// Swaps the log filter once the config file has been read
type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Filter for `level`; `RUST_LOG` wins
fn log_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("grydgets_daemon={level},grydgets_core={level}")))
}

fn subscriber(filter: EnvFilter) -> (impl tracing::Subscriber + Send + Sync, FilterHandle) {
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(true));
    (subscriber, handle)
}

/// Initialize logging before the config is loaded
fn init_logging(level: LogLevel) -> FilterHandle {
    let (subscriber, handle) = subscriber(log_filter(level));
    subscriber.init();
    handle
}

/// Level given with `--log-level`, if any
fn cli_log_level(args: &Args) -> Result<Option<LogLevel>> {
    Ok(args.log_level.as_deref().map(str::parse::<LogLevel>).transpose()?)
}

fn config_paths(args: &Args) -> Result<ConfigPaths> {
    let config = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path().context("No config file given and no config directory found")?,
    };
    let providers = args
        .providers
        .clone()
        .or_else(|| config.parent().map(|dir| dir.join("providers.toml")));
    Ok(ConfigPaths {
        config,
        providers,
        fps_override: args.fps,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // the command-line level (or the default) covers the config load itself
    let cli_level = cli_log_level(&args)?;
    let filter = init_logging(cli_level.unwrap_or_default());

    let paths = config_paths(&args)?;
    let config = paths.load()?;

    if cli_level.is_none() {
        if let Err(e) = filter.reload(log_filter(config.logging.level)) {
            warn!(error = %e, "Could not apply the configured log level");
        }
    }

    info!("Grydgets daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        config = %paths.config.display(),
        fps = config.graphics.fps_limit,
        width = config.graphics.resolution[0],
        height = config.graphics.resolution[1],
        "Configuration loaded"
    );
    if config.graphics.fullscreen {
        warn!("fullscreen is ignored by the headless renderer");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));

    let shutdown_clone = Arc::clone(&shutdown);
    let reload_clone = Arc::clone(&reload);
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating shutdown");
                    shutdown_clone.store(true, Ordering::SeqCst);
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown_clone.store(true, Ordering::SeqCst);
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, marking config for reload");
                    reload_clone.store(true, Ordering::SeqCst);
                }
            }
        }
    });

    let registry = NotifyRegistry::new();
    let dashboard = Dashboard::start(config, &registry)?;

    let server = if args.no_socket {
        None
    } else {
        let server = NotifyServer::new(args.socket.clone().unwrap_or_else(default_socket_path), registry.clone());
        let listener = server.bind()?;
        let stop = Arc::clone(&shutdown);
        Some(tokio::spawn(async move { server.run(listener, stop).await }))
    };

    let render = RenderLoop::new(dashboard, registry, Arc::clone(&shutdown), reload)
        .with_reload_from(paths)
        .with_snapshot(args.snapshot.clone())
        .with_max_frames(args.frames);
    let stats = tokio::task::spawn_blocking(move || render.run())
        .await
        .context("Render thread panicked")?;

    shutdown.store(true, Ordering::SeqCst);
    let result = match server {
        Some(task) => task.await.context("Notify server panicked")?,
        None => Ok(()),
    };

    match result {
        Ok(()) => {
            info!(frames = stats.frames, renders = stats.renders, reloads = stats.reloads, "Grydgets daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
