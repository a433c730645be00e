//! Render Loop
//!
//! Runs on its own blocking thread and owns the live [`Dashboard`]:
//!
//! ```text
//!   every 1/fps:
//!     reload requested? ── stop old dashboard, start new one
//!     tree.tick()
//!     tree.is_dirty()? ── tree.render(size) ── snapshot PNG
//!     sleep for the rest of the frame
//! ```
//!
//! The notify server never touches the tree; it only reaches the inboxes
//! through the shared [`NotifyRegistry`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use grydgets_core::{
    load_config, load_providers, BuildContext, DashboardConfig, NotifyRegistry, ProviderManager, Size, TreeManager,
};

/// How often frame timing is logged
const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Loading
// ============================================================================

/// Where the configuration comes from, kept for reloads
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Dashboard file
    pub config: PathBuf,
    /// Optional separate providers file
    pub providers: Option<PathBuf>,
    /// `--fps` from the command line
    pub fps_override: Option<u32>,
}

impl ConfigPaths {
    /// Read, merge and validate the configuration
    pub fn load(&self) -> Result<DashboardConfig> {
        let mut config =
            load_config(&self.config).with_context(|| format!("Failed to load {}", self.config.display()))?;
        if let Some(path) = &self.providers {
            let extra = load_providers(path).with_context(|| format!("Failed to load {}", path.display()))?;
            config.merge_providers(extra);
        }
        if let Some(fps) = self.fps_override {
            config.graphics.fps_limit = fps;
        }
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Dashboard
// ============================================================================

/// One running configuration: its providers and its tree
#[derive(Debug)]
pub struct Dashboard {
    config: DashboardConfig,
    providers: ProviderManager,
    tree: TreeManager,
}

impl Dashboard {
    /// Build the tree into `registry`, then start the providers
    pub fn start(config: DashboardConfig, registry: &NotifyRegistry) -> Result<Self> {
        let providers = ProviderManager::from_specs(&config.providers)?;
        let root = config.root_widget().context("Configuration declares no widgets")?;
        let mut tree = {
            let ctx = BuildContext::new(&providers);
            TreeManager::build_into(root, &ctx, registry.clone())?
        };
        if let Err(e) = providers.start_all() {
            tree.stop_all();
            providers.stop_all();
            return Err(e.into());
        }
        info!(
            nodes = tree.node_names().len(),
            providers = providers.len(),
            notifiable = registry.len(),
            "Dashboard started"
        );
        Ok(Self {
            config,
            providers,
            tree,
        })
    }

    /// Stop every background loop and empty the registry
    pub fn stop(&mut self) {
        self.tree.stop_all();
        self.providers.stop_all();
        info!("Dashboard stopped");
    }

    /// The configuration this dashboard was built from
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// The live tree
    pub fn tree_mut(&mut self) -> &mut TreeManager {
        &mut self.tree
    }
}

// ============================================================================
// RenderLoop
// ============================================================================

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Loop iterations
    pub frames: u64,
    /// Iterations that re-rendered
    pub renders: u64,
    /// Renders that failed
    pub failures: u64,
    /// Successful reloads
    pub reloads: u64,
}

/// Fixed-rate tick/render driver
pub struct RenderLoop {
    dashboard: Dashboard,
    paths: Option<ConfigPaths>,
    registry: NotifyRegistry,
    snapshot: Option<PathBuf>,
    max_frames: Option<u64>,
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    stats: FrameStats,
}

impl RenderLoop {
    /// Drive `dashboard` until `shutdown` is set or `max_frames` elapse
    pub fn new(
        dashboard: Dashboard,
        registry: NotifyRegistry,
        shutdown: Arc<AtomicBool>,
        reload: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dashboard,
            paths: None,
            registry,
            snapshot: None,
            max_frames: None,
            shutdown,
            reload,
            stats: FrameStats::default(),
        }
    }

    /// Reload from `paths` when the reload flag is raised
    #[must_use]
    pub fn with_reload_from(mut self, paths: ConfigPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Write every rendered frame to `path`
    #[must_use]
    pub fn with_snapshot(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot = path;
        self
    }

    /// Stop after `frames` iterations
    #[must_use]
    pub fn with_max_frames(mut self, frames: Option<u64>) -> Self {
        self.max_frames = frames;
        self
    }

    /// Run until shutdown; stops the dashboard before returning
    pub fn run(mut self) -> FrameStats {
        let mut window_start = Instant::now();
        let mut window_frames = 0u32;
        let mut busy = Duration::ZERO;
        let mut first = true;

        while !self.shutdown.load(Ordering::SeqCst) {
            if self.reload.swap(false, Ordering::SeqCst) && self.reload_dashboard() {
                first = true;
            }

            let frame_start = Instant::now();
            let size = self.size();
            let interval = self.dashboard.config.graphics.frame_interval();

            self.frame(size, first);
            first = false;
            self.stats.frames += 1;

            let spent = frame_start.elapsed();
            busy += spent;
            window_frames += 1;
            if window_start.elapsed() >= FPS_LOG_INTERVAL {
                let avg = busy / window_frames.max(1);
                debug!(frames = window_frames, avg_frame_ms = avg.as_secs_f64() * 1000.0, "Frame timing");
                window_start = Instant::now();
                window_frames = 0;
                busy = Duration::ZERO;
            }

            if self.max_frames.is_some_and(|max| self.stats.frames >= max) {
                info!(frames = self.stats.frames, "Frame limit reached");
                self.shutdown.store(true, Ordering::SeqCst);
                break;
            }
            if let Some(rest) = interval.checked_sub(spent) {
                thread::sleep(rest);
            }
        }

        self.dashboard.stop();
        info!(
            frames = self.stats.frames,
            renders = self.stats.renders,
            failures = self.stats.failures,
            "Render loop finished"
        );
        self.stats
    }

    fn size(&self) -> Size {
        self.dashboard.config.graphics.size()
    }

    fn frame(&mut self, size: Size, force: bool) {
        let tree = self.dashboard.tree_mut();
        tree.tick();
        if !force && !tree.is_dirty() {
            return;
        }
        match tree.render(size) {
            Ok(surface) => {
                self.stats.renders += 1;
                if let Some(path) = &self.snapshot {
                    if let Err(e) = surface.save_png(path) {
                        warn!(path = %path.display(), error = %e, "Failed to write snapshot");
                    }
                }
            }
            Err(e) => {
                self.stats.failures += 1;
                warn!(error = %e, "Frame render failed");
            }
        }
    }

    /// Swap in a freshly loaded dashboard; returns whether it changed
    fn reload_dashboard(&mut self) -> bool {
        let Some(paths) = self.paths.clone() else {
            info!("No config file to reload");
            return false;
        };
        info!(path = %paths.config.display(), "Reloading configuration");
        let config = match paths.load() {
            Ok(config) => config,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Reload failed, keeping current dashboard");
                return false;
            }
        };

        let previous = self.dashboard.config.clone();
        self.dashboard.stop();
        match Dashboard::start(config, &self.registry) {
            Ok(next) => {
                self.dashboard = next;
                self.stats.reloads += 1;
                info!("Configuration reloaded");
                true
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "New configuration failed to build, restoring previous one");
                match Dashboard::start(previous, &self.registry) {
                    Ok(restored) => self.dashboard = restored,
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "Previous configuration failed too, shutting down");
                        self.shutdown.store(true, Ordering::SeqCst);
                    }
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grydgets_core::load_config_from_str;
    use std::io::Write;

    const DASHBOARD: &str = r#"
        [graphics]
        fps_limit = 60
        resolution = [64, 32]

        [[widgets]]
        widget = "notifiabletext"
        name = "alerts"
        children = [ { widget = "text", text = "ok" } ]
    "#;

    fn flags() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
        (Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_renders_first_frame_then_only_when_dirty() {
        let registry = NotifyRegistry::new();
        let dashboard = Dashboard::start(load_config_from_str(DASHBOARD).unwrap(), &registry).unwrap();
        let (shutdown, reload) = flags();
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("frame.png");

        let stats = RenderLoop::new(dashboard, registry.clone(), Arc::clone(&shutdown), reload)
            .with_snapshot(Some(snapshot.clone()))
            .with_max_frames(Some(3))
            .run();

        assert_eq!(stats.frames, 3);
        assert_eq!(stats.renders, 1);
        assert_eq!(stats.failures, 0);
        assert!(snapshot.exists());
        assert!(shutdown.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_start_registers_notifiable_widgets() {
        let registry = NotifyRegistry::new();
        let mut dashboard = Dashboard::start(load_config_from_str(DASHBOARD).unwrap(), &registry).unwrap();

        assert_eq!(registry.names(), vec!["alerts".to_string()]);
        assert_eq!(dashboard.config().graphics.size(), Size::new(64, 32));
        dashboard.stop();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reload_swaps_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grydgets.toml");
        std::fs::write(&path, DASHBOARD).unwrap();

        let paths = ConfigPaths {
            config: path.clone(),
            providers: None,
            fps_override: Some(30),
        };
        let registry = NotifyRegistry::new();
        let dashboard = Dashboard::start(paths.load().unwrap(), &registry).unwrap();
        let (shutdown, reload) = flags();
        let mut render = RenderLoop::new(dashboard, registry.clone(), shutdown, Arc::clone(&reload))
            .with_reload_from(paths);

        let mut file = std::fs::OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
        write!(file, "{}", DASHBOARD.replace("\"alerts\"", "\"banner\"")).unwrap();
        drop(file);

        assert!(render.reload_dashboard());
        assert_eq!(registry.names(), vec!["banner".to_string()]);
        assert_eq!(render.dashboard.config().graphics.fps_limit, 30);
        assert_eq!(render.stats.reloads, 1);
    }

    #[test]
    fn test_bad_reload_keeps_current_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grydgets.toml");
        std::fs::write(&path, DASHBOARD).unwrap();
        let paths = ConfigPaths {
            config: path.clone(),
            providers: None,
            fps_override: None,
        };
        let registry = NotifyRegistry::new();
        let dashboard = Dashboard::start(paths.load().unwrap(), &registry).unwrap();
        let (shutdown, reload) = flags();
        let mut render = RenderLoop::new(dashboard, registry.clone(), shutdown, reload).with_reload_from(paths);

        std::fs::write(&path, "[graphics]\nfps_limit = 0\n").unwrap();

        assert!(!render.reload_dashboard());
        assert_eq!(registry.names(), vec!["alerts".to_string()]);
    }
}
