//! Shared test helpers for ttb integration tests.
//!
//! All tests build their trees in temp directories and run the real `ttb`
//! binary against them.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A bundle project in a temp directory: `bundle.toml`, a `base/` tree,
/// an `include/` overlay and optional rule files.
pub struct Project {
    dir: TempDir,
}

impl Project {
    /// Empty project with `base/` and a minimal `bundle.toml`.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("base")).unwrap();
        let p = Self { dir };
        p.file(
            "bundle.toml",
            "[bundle]\nname = \"test\"\n\n[inputs]\nbase = \"base\"\n",
        );
        p
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn file(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel))
            .unwrap_or_else(|e| panic!("failed to read {rel}: {e}"))
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    /// Default output directory for the `test` bundle.
    pub fn out(&self, rel: &str) -> String {
        format!("build/output/test/{rel}")
    }
}

/// Run ttb in `dir`.
pub fn ttb_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ttb"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute ttb")
}

/// Run ttb and assert it succeeds. Returns stdout as string.
pub fn ttb_ok(dir: &Path, args: &[&str]) -> String {
    let out = ttb_in(dir, args);
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "ttb {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" "),
    );
    stdout.to_string()
}

/// Run ttb and assert it fails. Returns stderr as string.
pub fn ttb_fails(dir: &Path, args: &[&str]) -> String {
    let out = ttb_in(dir, args);
    assert!(
        !out.status.success(),
        "Expected ttb {} to fail, but it succeeded.\nstdout: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
    );
    String::from_utf8_lossy(&out.stderr).to_string()
}

/// Is a working `patch` program on PATH?
pub fn have_patch() -> bool {
    Command::new("patch")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}
