//! Engine configuration and its concurrency-safe handle.
//!
//! All workspace/executable state lives in an explicit [`EngineConfig`]
//! rather than process-wide globals. In-flight queries operate on the
//! snapshot taken at invocation time; swapping the configuration never
//! retroactively affects a running subprocess, but it does tell the
//! orchestrator to invalidate cached results for the outgoing workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Default cap on buffered subprocess output, and the point at which
/// callers should switch to the streaming path.
pub const DEFAULT_STREAM_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Default deadline for a single engine invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time-based expiry layered on top of event-driven cache
/// invalidation.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Executable names probed during auto-discovery, in preference order.
const ENGINE_NAMES: &[&str] = &["bazel", "bazelisk"];

/// Configuration for talking to the external build engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the engine executable. Treated as an opaque string; the
    /// existence/executability check is the caller's job.
    pub executable: PathBuf,
    /// Root directory of the workspace the engine operates within; used as
    /// the subprocess working directory.
    pub workspace_root: PathBuf,
    /// Cap on buffered stdout before `OutputTooLarge` is raised.
    pub max_buffer_bytes: u64,
    /// Deadline for a single buffered invocation.
    pub timeout: Duration,
    /// Output size at which buffered queries retry through the streaming
    /// path. Tunable rather than hard-coded.
    pub stream_threshold_bytes: u64,
    /// Optional time-based cache expiry; `None` disables the TTL layer.
    pub cache_ttl: Option<Duration>,
}

impl EngineConfig {
    /// Configuration with defaults for the given executable and workspace.
    pub fn new(executable: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            workspace_root: workspace_root.into(),
            max_buffer_bytes: DEFAULT_STREAM_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
            stream_threshold_bytes: DEFAULT_STREAM_THRESHOLD,
            cache_ttl: Some(DEFAULT_CACHE_TTL),
        }
    }

    /// Auto-detect the engine executable for a workspace.
    pub fn discover(workspace_root: impl Into<PathBuf>) -> Result<Self> {
        let executable = find_engine_executable()?;
        Ok(Self::new(executable, workspace_root))
    }

    /// Stable identifier of the workspace this configuration points at;
    /// cache keys are scoped by it.
    pub fn workspace_id(&self) -> String {
        self.workspace_root.to_string_lossy().into_owned()
    }
}

/// Result of a configuration swap.
#[derive(Debug)]
pub struct ConfigChange {
    /// Whether the workspace root changed, i.e. whether cached results for
    /// the previous workspace are now stale.
    pub workspace_changed: bool,
    /// Workspace id of the configuration that was replaced.
    pub previous_workspace_id: String,
}

/// Shared, swappable handle to the current [`EngineConfig`].
///
/// `snapshot` hands out the current `Arc`; holders keep using their
/// snapshot even if the configuration is swapped underneath them.
#[derive(Debug)]
pub struct ConfigHandle {
    inner: RwLock<Arc<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// The current configuration. Cheap; clones an `Arc`.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.inner.read().clone()
    }

    /// Replace the configuration and report what changed.
    pub fn update(&self, config: EngineConfig) -> ConfigChange {
        let next = Arc::new(config);
        let previous = {
            let mut guard = self.inner.write();
            std::mem::replace(&mut *guard, next.clone())
        };
        let workspace_changed = previous.workspace_root != next.workspace_root;
        if workspace_changed {
            debug!(
                from = %previous.workspace_root.display(),
                to = %next.workspace_root.display(),
                "workspace changed"
            );
        }
        ConfigChange {
            workspace_changed,
            previous_workspace_id: previous.workspace_id(),
        }
    }
}

/// Locate the engine executable on PATH or in conventional install
/// locations.
fn find_engine_executable() -> Result<PathBuf> {
    let mut searched = Vec::new();

    for name in ENGINE_NAMES {
        searched.push(name.to_string());
        if let Ok(path) = which::which(name) {
            debug!(path = %path.display(), "found build engine");
            return Ok(path);
        }
    }

    let mut locations: Vec<PathBuf> = vec![
        PathBuf::from("/usr/local/bin/bazel"),
        PathBuf::from("/opt/homebrew/bin/bazel"),
    ];
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".local/bin/bazel"));
        locations.push(home.join("bin/bazel"));
    }

    for path in &locations {
        searched.push(path.display().to_string());
        if is_candidate(path) {
            debug!(path = %path.display(), "found build engine");
            return Ok(path.clone());
        }
    }

    Err(Error::EngineNotFound { searched })
}

fn is_candidate(path: &Path) -> bool {
    path.exists() && path.is_file()
}
