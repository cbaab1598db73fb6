//! Scratch directories for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared helpers under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/scratch.rs"]
//! mod scratch;
//! ```

use camino::Utf8PathBuf;
use tempfile::TempDir;

/// A temporary directory with a UTF-8 root path.
pub struct Scratch {
    /// Keeps the directory alive for the test's duration.
    pub dir: TempDir,
    /// UTF-8 view of the directory path.
    pub root: Utf8PathBuf,
}

impl Scratch {
    /// Creates a fresh directory.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
        Self { dir, root }
    }

    /// PID file location inside the directory.
    pub fn pid_file(&self) -> Utf8PathBuf {
        self.root.join("run/hostvol.pid")
    }
}
