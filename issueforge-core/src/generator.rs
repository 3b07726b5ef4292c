//! The `Generator` collaborator contract (§4.3): supervises an external
//! code-generation process inside a workspace with heartbeat and timeout.
//!
//! Modeled as three concurrent streams plus a heartbeat/deadline loop —
//! "subprocess control as message passing" (§9) — rather than a single
//! blocking `wait()`.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Outcome of one `Generator::run` call.
#[derive(Debug, Clone)]
pub enum GeneratorOutcome {
    Finished { exit_code: i32, stdout: String, stderr: String, elapsed_seconds: u64 },
    TimedOut { stdout_so_far: String, stderr_so_far: String },
}

pub trait Generator {
    fn run(&self, issue_id: u64, prompt_text: &str, workspace_dir: &Path, timeout_seconds: u64) -> anyhow::Result<GeneratorOutcome>;
}

/// Invokes a configured command (default the `codex` CLI) as a subprocess
/// rooted at the workspace directory.
pub struct CodexGenerator {
    pub cmd: String,
    pub args: Vec<String>,
    pub mode: String,
    pub model: Option<String>,
    pub allowed_tools: Option<String>,
    pub cost_guard: Option<String>,
}

impl CodexGenerator {
    fn build_command(&self, workspace_dir: &Path) -> Command {
        let mut command = Command::new(&self.cmd);
        command.current_dir(workspace_dir);
        command.arg(&self.mode);
        command.args(&self.args);
        if let Some(model) = &self.model {
            command.arg("--model").arg(model);
        }
        if let Some(tools) = &self.allowed_tools {
            command.arg("--allowed-tools").arg(tools);
        }
        if let Some(guard) = &self.cost_guard {
            command.arg("--cost-guard").arg(guard);
        }
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }
}

impl Generator for CodexGenerator {
    fn run(&self, issue_id: u64, prompt_text: &str, workspace_dir: &Path, timeout_seconds: u64) -> anyhow::Result<GeneratorOutcome> {
        let mut child: Child = self.build_command(workspace_dir).spawn()?;

        // Deliver the prompt once, then close stdin — the child must not
        // expect further writes, per the single-write-then-close semantics
        // this contract prescribes (§9, Open Questions).
        if let Some(mut stdin) = child.stdin.take() {
            let prompt_owned = prompt_text.to_string();
            thread::spawn(move || {
                let _ = stdin.write_all(prompt_owned.as_bytes());
                // stdin is dropped (and closed) at the end of this thread.
            });
        }

        let (stdout_tx, stdout_rx) = mpsc::channel();
        if let Some(mut stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stdout.read_to_string(&mut buf);
                let _ = stdout_tx.send(buf);
            });
        } else {
            stdout_tx.send(String::new()).ok();
        }

        let (stderr_tx, stderr_rx) = mpsc::channel();
        if let Some(mut stderr) = child.stderr.take() {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                let _ = stderr_tx.send(buf);
            });
        } else {
            stderr_tx.send(String::new()).ok();
        }

        let deadline = Instant::now() + Duration::from_secs(timeout_seconds);
        let started = Instant::now();

        loop {
            match child.try_wait()? {
                Some(status) => {
                    let stdout = stdout_rx.recv_timeout(Duration::from_secs(5)).unwrap_or_default();
                    let stderr = stderr_rx.recv_timeout(Duration::from_secs(5)).unwrap_or_default();
                    return Ok(GeneratorOutcome::Finished {
                        exit_code: status.code().unwrap_or(-1),
                        stdout,
                        stderr,
                        elapsed_seconds: started.elapsed().as_secs(),
                    });
                }
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        let stdout = stdout_rx.try_recv().unwrap_or_default();
                        let stderr = stderr_rx.try_recv().unwrap_or_default();
                        return Ok(GeneratorOutcome::TimedOut { stdout_so_far: stdout, stderr_so_far: stderr });
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let nap = remaining.min(HEARTBEAT_INTERVAL);
                    thread::sleep(nap);
                    info!(issue_id, elapsed_seconds = started.elapsed().as_secs(), "generator heartbeat");
                }
            }
        }
    }
}
