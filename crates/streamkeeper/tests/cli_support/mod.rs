#![allow(dead_code)]

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub fn streamkeeper_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_streamkeeper"))
}

/// An isolated home, database and recordings tree.
pub struct Sandbox {
    pub home: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            home: TempDir::new().expect("create sandbox"),
        }
    }

    pub fn path(&self) -> &Path {
        self.home.path()
    }

    pub fn recordings(&self) -> PathBuf {
        self.path().join("recordings")
    }

    pub fn run(&self, args: &[&str], envs: &[(&str, &str)]) -> Output {
        let mut cmd = Command::new(streamkeeper_bin());
        cmd.args(args)
            .env("STREAMKEEPER_HOME", self.path())
            .env("STREAMKEEPER_DB", self.path().join("state.sqlite3"))
            .env("STREAMKEEPER_RECORDINGS_DIR", self.recordings())
            .env("RUST_LOG", "error");
        for (key, value) in envs {
            cmd.env(key, value);
        }
        cmd.output().expect("failed to execute streamkeeper CLI")
    }

    pub fn run_json<T: DeserializeOwned>(&self, args: &[&str], envs: &[(&str, &str)]) -> T {
        let mut all: Vec<&str> = args.to_vec();
        all.push("--json");
        let output = self.run(&all, envs);
        assert_success(&output, &all);
        serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
            panic!(
                "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
                err,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
        })
    }
}

pub fn assert_success(output: &Output, args: &[&str]) {
    assert!(
        output.status.success(),
        "command failed: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[cfg(unix)]
pub fn write_recorder(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("recorder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
