//! Shared fixtures: stub engine scripts standing in for a real build
//! engine binary.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use buildscope::EngineConfig;
use tempfile::TempDir;

/// A fake engine executable inside its own workspace directory.
pub struct StubEngine {
    pub dir: TempDir,
    pub config: EngineConfig,
}

/// Write `body` as an executable `/bin/sh` script and point a default
/// configuration at it. The script receives the usual engine argv
/// (`query <expr> --output <format>`, or an action verb plus labels).
///
/// The token `{COUNT}` in `body` is replaced with the path of this stub's
/// invocation-count file, so scripts can record each run with
/// `echo run >> {COUNT}`.
pub fn stub_engine(body: &str) -> StubEngine {
    let dir = TempDir::new().unwrap();
    let count = dir.path().join("invocations");
    let body = body.replace("{COUNT}", &count.display().to_string());
    let path = dir.path().join("engine.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }

    let config = EngineConfig::new(&path, dir.path());
    StubEngine { dir, config }
}

/// Path inside the stub's workspace for counting invocations via `>>`.
pub fn count_path(stub: &StubEngine) -> PathBuf {
    stub.dir.path().join("invocations")
}

/// Number of times the stub script appended to its count file.
pub fn invocations(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
