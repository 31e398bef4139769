use crate::config::SandboxSettings;
use crate::harness::{self, HarnessKind};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Prefix of the module file a submission is written to.
pub const UNIT_PREFIX: &str = "unit_";

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("Command is empty")]
    EmptyCommand,
    #[error("Failed to spawn {command:?}: {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: io::Error,
    },
    #[error("Sandbox I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Why one unit of work did not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("{0}")]
    Raised(String),
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Crashed: {0}")]
    Crashed(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Sandbox failure: {0}")]
    Sandbox(String),
}

impl From<SandboxError> for ExecutionError {
    fn from(err: SandboxError) -> Self {
        ExecutionError::Sandbox(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Cancelled,
    Crash(String),
}

/// Outcome of one child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn status(&self) -> ExecutionStatus {
        if self.timed_out {
            ExecutionStatus::Timeout
        } else if self.cancelled {
            ExecutionStatus::Cancelled
        } else {
            match (self.exit_code, self.signal) {
                (Some(0), _) => ExecutionStatus::Ok,
                (Some(code), _) => ExecutionStatus::Crash(format!("exited with code {code}")),
                (None, Some(signal)) => ExecutionStatus::Crash(format!("terminated by signal {signal}")),
                (None, None) => ExecutionStatus::Crash("exited abnormally".to_string()),
            }
        }
    }

    pub fn success(&self) -> bool {
        self.status() == ExecutionStatus::Ok
    }

    /// Last non-empty stderr line, which for an uncaught Python exception is
    /// `ExceptionType: message`.
    pub fn error_line(&self) -> Option<&str> {
        self.stderr.lines().rev().map(str::trim).find(|line| !line.is_empty())
    }

    /// Keeps successful runs and turns every other status into an error.
    pub fn into_outcome(self) -> Result<Self, ExecutionError> {
        match self.status() {
            ExecutionStatus::Ok => Ok(self),
            ExecutionStatus::Timeout => Err(ExecutionError::TimedOut(self.elapsed)),
            ExecutionStatus::Cancelled => Err(ExecutionError::Cancelled),
            ExecutionStatus::Crash(reason) => {
                if self.stderr.contains("Traceback (most recent call last)") {
                    let line = self.error_line().unwrap_or(reason.as_str());
                    Err(ExecutionError::Raised(line.to_string()))
                } else {
                    match self.error_line() {
                        Some(line) => Err(ExecutionError::Crashed(format!("{reason}: {line}"))),
                        None => Err(ExecutionError::Crashed(reason)),
                    }
                }
            }
        }
    }
}

/// Shared flag checked at case boundaries and while waiting on a child.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scratch directory owned by one sandbox invocation. Removed on drop.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: Option<&Path>) -> Result<Self, SandboxError> {
        let id = Uuid::new_v4();
        let prefix = format!("tribunal-{}-", id.simple());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root).map_err(SandboxError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)?;
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Module name unique to this workspace.
    pub fn module_name(&self) -> String {
        format!("{UNIT_PREFIX}{}", self.id.simple())
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf, SandboxError> {
        let path = self.file(name);
        fs::write(&path, contents).map_err(SandboxError::Workspace)?;
        Ok(path)
    }

    /// Reads a file the child may or may not have produced.
    pub fn read_optional(&self, name: &str) -> Result<Option<String>, SandboxError> {
        match fs::read_to_string(self.file(name)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SandboxError::Io(e)),
        }
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Runs programs as child processes under a wall-clock timeout.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    settings: SandboxSettings,
}

impl SandboxExecutor {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn workspace(&self) -> Result<Workspace, SandboxError> {
        Workspace::create(self.settings.workspace_root.as_deref())
    }

    /// Runs `code` as a script with `stdin` on standard input.
    pub fn run(&self, code: &str, stdin: &str, timeout: Duration) -> Result<ExecutionResult, SandboxError> {
        self.run_cancellable(code, stdin, timeout, None)
    }

    pub fn run_cancellable(
        &self,
        code: &str,
        stdin: &str,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<ExecutionResult, SandboxError> {
        let workspace = self.workspace()?;
        let wrapped = harness::wrap_submission(&workspace, code, HarnessKind::Script)?;
        self.run_python(&workspace, &wrapped.args(&[]), stdin.as_bytes(), timeout, cancel)
    }

    /// Runs the configured interpreter inside `workspace` with `args` appended.
    pub fn run_python(
        &self,
        workspace: &Workspace,
        args: &[String],
        stdin: &[u8],
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<ExecutionResult, SandboxError> {
        let mut command = self.settings.python.clone();
        command.extend(args.iter().cloned());
        self.run_command(&command, Some(workspace.path()), stdin, timeout, cancel)
    }

    pub fn run_command(
        &self,
        command: &[String],
        working_dir: Option<&Path>,
        stdin: &[u8],
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<ExecutionResult, SandboxError> {
        let (program, args) = command.split_first().ok_or(SandboxError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            command: command.to_vec(),
            source,
        })?;
        debug!(pid = child.id(), program = %program, "spawned child process");

        let writer = child.stdin.take().map(|mut pipe| {
            let data = stdin.to_vec();
            thread::spawn(move || {
                // The child may exit without reading its input.
                let _ = pipe.write_all(&data);
            })
        });
        let limit = self.settings.max_output_bytes;
        let stdout_reader = child.stdout.take().map(|pipe| spawn_capture(pipe, limit));
        let stderr_reader = child.stderr.take().map(|pipe| spawn_capture(pipe, limit));

        let outcome = wait_with_timeout(&mut child, timeout, cancel);

        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let stdout = collect_capture(stdout_reader);
        let stderr = collect_capture(stderr_reader);
        let elapsed = start.elapsed();

        let (status, timed_out, cancelled) = match outcome? {
            WaitOutcome::Exited(status) => (Some(status), false, false),
            WaitOutcome::TimedOut => (None, true, false),
            WaitOutcome::Cancelled => (None, false, true),
        };
        let result = ExecutionResult {
            exit_code: status.and_then(|s| s.code()),
            signal: status.and_then(exit_signal),
            stdout,
            stderr,
            elapsed,
            timed_out,
            cancelled,
        };
        debug!(
            exit_code = ?result.exit_code,
            timed_out,
            cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "child process finished"
        );
        Ok(result)
    }
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<WaitOutcome, SandboxError> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // Descendants left behind would keep the output pipes open.
                kill_group(child);
                return Ok(WaitOutcome::Exited(status));
            }
            Ok(None) => {}
            Err(e) => {
                terminate(child);
                return Err(SandboxError::Io(e));
            }
        }

        let cancelled = cancel.is_some_and(CancelToken::is_cancelled);
        if cancelled || started.elapsed() > timeout {
            warn!(pid = child.id(), cancelled, ?timeout, "terminating child process group");
            terminate(child);
            return Ok(if cancelled {
                WaitOutcome::Cancelled
            } else {
                WaitOutcome::TimedOut
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn terminate(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        debug!(pid = child.id(), error = %e, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Reads at most `limit` bytes and discards the rest so the child never blocks
/// on a full pipe. Returns the kept bytes and the number dropped.
fn spawn_capture<R: Read + Send + 'static>(mut pipe: R, limit: usize) -> JoinHandle<(Vec<u8>, u64)> {
    thread::spawn(move || {
        let mut kept = Vec::new();
        let _ = (&mut pipe).take(limit as u64).read_to_end(&mut kept);
        let dropped = io::copy(&mut pipe, &mut io::sink()).unwrap_or(0);
        (kept, dropped)
    })
}

fn collect_capture(reader: Option<JoinHandle<(Vec<u8>, u64)>>) -> String {
    let (kept, dropped) = reader
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        text.push_str(&format!("\n...[output truncated, {dropped} bytes dropped]"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{python_available, target};

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxSettings::default())
    }

    #[test]
    fn workspaces_are_unique_and_removed() {
        let a = Workspace::create(None).unwrap();
        let b = Workspace::create(None).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.module_name(), b.module_name());
        assert!(a.module_name().starts_with(UNIT_PREFIX));

        let path = a.write("probe.txt", "x").unwrap();
        assert!(path.exists());
        assert_eq!(a.read_optional("probe.txt").unwrap().as_deref(), Some("x"));
        assert_eq!(a.read_optional("absent.txt").unwrap(), None);

        let root = a.path().to_path_buf();
        drop(a);
        assert!(!root.exists());
    }

    #[test]
    fn workspace_root_is_honoured() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("boxes");
        let workspace = Workspace::create(Some(&nested)).unwrap();
        assert!(workspace.path().starts_with(&nested));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = executor()
            .run_command(&[], None, b"", Duration::from_secs(1), None)
            .unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCommand));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let command = vec!["/nonexistent/tribunal-python".to_string()];
        let err = executor()
            .run_command(&command, None, b"", Duration::from_secs(1), None)
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }

    #[test]
    fn echo_program_round_trips_stdin() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let result = executor()
            .run(&target("echo.py"), "hello\n", Duration::from_secs(5))
            .unwrap();
        assert!(result.success(), "stderr: {}", result.stderr);
        assert_eq!(result.stdout, "hello\n");
        assert!(!result.timed_out);
    }

    #[test]
    fn infinite_loop_is_killed_at_the_deadline() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let started = Instant::now();
        let result = executor()
            .run(&target("spin.py"), "", Duration::from_millis(300))
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.status(), ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(result.into_outcome(), Err(ExecutionError::TimedOut(_))));
    }

    #[test]
    fn uncaught_exception_is_reported_as_raised() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let result = executor()
            .run(&target("crash.py"), "", Duration::from_secs(5))
            .unwrap();
        assert_eq!(result.exit_code, Some(1));
        match result.into_outcome() {
            Err(ExecutionError::Raised(line)) => assert!(line.starts_with("ZeroDivisionError")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn cancellation_stops_the_child() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let token = CancelToken::new();
        token.cancel();
        let result = executor()
            .run_cancellable(&target("spin.py"), "", Duration::from_secs(30), Some(&token))
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.into_outcome(), Err(ExecutionError::Cancelled));
    }

    #[test]
    fn large_output_is_truncated() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let settings = SandboxSettings {
            max_output_bytes: 100,
            ..SandboxSettings::default()
        };
        let result = SandboxExecutor::new(settings)
            .run("print('x' * 10000)", "", Duration::from_secs(5))
            .unwrap();
        assert!(result.success());
        assert!(result.stdout.starts_with(&"x".repeat(100)));
        assert!(result.stdout.contains("output truncated"));
    }
}
