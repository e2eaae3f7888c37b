//! Helpers for running the `respawn` binary

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Command builder for the `respawn` binary
pub struct RespawnCommand {
    working_dir: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl RespawnCommand {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_respawn"));
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .env("NO_COLOR", "1");
        command
    }

    /// Run to completion
    pub fn execute(&self) -> CommandResult {
        let start = Instant::now();
        let output = self.command().output().expect("failed to run respawn");

        CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        }
    }

    /// Start in the background with output captured
    pub fn spawn(&self) -> Child {
        self.command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn respawn")
    }

    pub fn assert_success(&self) -> CommandResult {
        let result = self.execute();
        assert!(
            result.success(),
            "command failed (exit code: {}):\nargs: {:?}\nstdout: {}\nstderr: {}",
            result.exit_code,
            self.args,
            result.stdout,
            result.stderr
        );
        result
    }

    pub fn assert_failure(&self) -> CommandResult {
        let result = self.execute();
        assert!(
            !result.success(),
            "command should have failed:\nargs: {:?}\nstdout: {}",
            self.args,
            result.stdout
        );
        result
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}

/// Wait for `child` to exit, killing it after `timeout`
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().expect("try_wait failed") {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let _ = child.kill();
    let _ = child.wait();
    None
}

/// Build a `RespawnCommand` in `dir` with the given arguments
macro_rules! respawn {
    ($dir:expr, $($arg:expr),*) => {{
        let mut cmd = $crate::common::cli::RespawnCommand::new($dir);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}
