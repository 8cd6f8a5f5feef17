//! External command execution
//!
//! All cluster and rendering work goes through CLI tools (kubectl, oc, helm,
//! kustomize). [`CommandRunner`] is the seam: [`ProcessRunner`] spawns real
//! processes with `tokio::process`, [`MockRunner`] replays scripted output in
//! tests.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// A command line to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Command as shown in the execution log: binary name instead of its full path
    pub fn printable(&self) -> String {
        let program = Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program);
        std::iter::once(program)
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.printable())
    }
}

/// One line produced by a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }

    pub fn is_stderr(&self) -> bool {
        matches!(self, OutputLine::Stderr(_))
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, trimmed; what explanations quote
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Receives output lines while a command runs (the "logged" execution variant)
pub trait LineSink: Send + Sync {
    fn line(&self, line: &OutputLine);
}

impl<F> LineSink for F
where
    F: Fn(&OutputLine) + Send + Sync,
{
    fn line(&self, line: &OutputLine) {
        self(line)
    }
}

/// A background process whose output is streamed until it is killed
#[async_trait]
pub trait RunningProcess: Send {
    /// Take the line stream; `None` once taken
    fn take_lines(&mut self) -> Option<mpsc::UnboundedReceiver<OutputLine>>;

    /// Forcibly stop the process and wait for it
    async fn kill(&mut self) -> Result<()>;
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. With a sink, lines are streamed as they are produced.
    async fn execute(
        &self,
        command: &CommandLine,
        sink: Option<&dyn LineSink>,
    ) -> Result<ProcessOutput>;

    /// Start a long-running process (e.g. `kubectl get events --watch-only`)
    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn RunningProcess>>;

    /// Run without streaming output anywhere
    async fn execute_silent(&self, command: &CommandLine) -> Result<ProcessOutput> {
        self.execute(command, None).await
    }
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(command: &CommandLine) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

async fn collect_lines<R>(
    reader: Option<R>,
    wrap: fn(String) -> OutputLine,
    sink: Option<&dyn LineSink>,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(reader) = reader else {
        return Ok(captured);
    };

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        captured.push_str(&line);
        captured.push('\n');
        if let Some(sink) = sink {
            sink.line(&wrap(line));
        }
    }
    Ok(captured)
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(
        &self,
        command: &CommandLine,
        sink: Option<&dyn LineSink>,
    ) -> Result<ProcessOutput> {
        debug!(command = %command.printable(), "executing");

        let mut child = Self::build(command)
            .spawn()
            .map_err(|source| CoreError::Spawn {
                command: command.printable(),
                source,
            })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let (out, err) = tokio::join!(
                collect_lines(stdout, OutputLine::Stdout, sink),
                collect_lines(stderr, OutputLine::Stderr, sink),
            );
            let status = child.wait().await?;
            Ok::<_, CoreError>(ProcessOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: out?,
                stderr: err?,
            })
        };

        let finished = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let Some(output) = finished else {
            if let Err(e) = child.kill().await {
                warn!(command = %command.printable(), error = %e, "failed to kill timed out process");
            }
            return Err(CoreError::Timeout {
                command: command.printable(),
                timeout: command.timeout.unwrap_or_default(),
            });
        };
        let output = output?;

        debug!(command = %command.printable(), exit_code = output.exit_code, "finished");
        Ok(output)
    }

    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn RunningProcess>> {
        debug!(command = %command.printable(), "spawning background process");

        let mut child = Self::build(command)
            .spawn()
            .map_err(|source| CoreError::Spawn {
                command: command.printable(),
                source,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, OutputLine::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, OutputLine::Stderr, tx));
        }

        Ok(Box::new(ChildProcess {
            child,
            lines: Some(rx),
            readers,
            description: command.printable(),
        }))
    }
}

fn forward_lines<R>(
    reader: R,
    wrap: fn(String) -> OutputLine,
    tx: mpsc::UnboundedSender<OutputLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    })
}

/// Background process spawned by [`ProcessRunner`]
struct ChildProcess {
    child: tokio::process::Child,
    lines: Option<mpsc::UnboundedReceiver<OutputLine>>,
    readers: Vec<JoinHandle<()>>,
    description: String,
}

#[async_trait]
impl RunningProcess for ChildProcess {
    fn take_lines(&mut self) -> Option<mpsc::UnboundedReceiver<OutputLine>> {
        self.lines.take()
    }

    async fn kill(&mut self) -> Result<()> {
        if let Err(e) = self.child.kill().await {
            // already exited
            debug!(command = %self.description, error = %e, "kill returned an error");
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        Ok(())
    }
}

/// Scripted [`CommandRunner`] for tests
///
/// Responses are matched by substring against the printable command, in
/// registration order. Each pattern owns a queue; the last queued response
/// repeats once the others are consumed. Unmatched commands succeed with
/// empty output.
#[derive(Clone, Default)]
pub struct MockRunner {
    state: Arc<Mutex<MockState>>,
    killed: Arc<AtomicUsize>,
}

#[derive(Default)]
struct MockState {
    responses: Vec<(String, VecDeque<ProcessOutput>)>,
    watch_lines: Vec<OutputLine>,
    invocations: Vec<CommandLine>,
    spawned: Vec<CommandLine>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response for commands containing `pattern`
    pub fn respond(&self, pattern: &str, output: ProcessOutput) -> &Self {
        let mut state = self.state();
        match state.responses.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(output),
            None => state
                .responses
                .push((pattern.to_string(), VecDeque::from([output]))),
        }
        drop(state);
        self
    }

    /// Queue a sequence of successful stdout payloads
    pub fn respond_sequence(&self, pattern: &str, outputs: &[&str]) -> &Self {
        for out in outputs {
            self.respond(pattern, ProcessOutput::success(*out));
        }
        self
    }

    /// Make commands containing `pattern` fail with the given exit code
    pub fn fail_on(&self, pattern: &str, exit_code: i32, stderr: &str) -> &Self {
        self.respond(pattern, ProcessOutput::failure(exit_code, stderr))
    }

    /// Lines every spawned background process emits
    pub fn with_watch_lines(&self, lines: Vec<OutputLine>) -> &Self {
        self.state().watch_lines = lines;
        self
    }

    /// Every executed command, in order
    pub fn invocations(&self) -> Vec<CommandLine> {
        self.state().invocations.clone()
    }

    /// Printable form of every executed command
    pub fn printed_invocations(&self) -> Vec<String> {
        self.state()
            .invocations
            .iter()
            .map(CommandLine::printable)
            .collect()
    }

    /// Number of executed commands containing `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.state()
            .invocations
            .iter()
            .filter(|c| c.printable().contains(pattern))
            .count()
    }

    pub fn spawned(&self) -> Vec<CommandLine> {
        self.state().spawned.clone()
    }

    /// Number of background processes killed so far
    pub fn killed_count(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }

    fn next_response(&self, command: &CommandLine) -> ProcessOutput {
        let printable = command.printable();
        let mut state = self.state();
        state.invocations.push(command.clone());
        state
            .responses
            .iter_mut()
            .find(|(pattern, _)| printable.contains(pattern.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn execute(
        &self,
        command: &CommandLine,
        sink: Option<&dyn LineSink>,
    ) -> Result<ProcessOutput> {
        let output = self.next_response(command);
        if let Some(sink) = sink {
            for line in output.stdout.lines() {
                sink.line(&OutputLine::Stdout(line.to_string()));
            }
            for line in output.stderr.lines() {
                sink.line(&OutputLine::Stderr(line.to_string()));
            }
        }
        Ok(output)
    }

    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn RunningProcess>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let lines = {
            let mut state = self.state();
            state.spawned.push(command.clone());
            state.watch_lines.clone()
        };
        for line in lines {
            let _ = tx.send(line);
        }
        Ok(Box::new(MockProcess {
            lines: Some(rx),
            killed: Arc::clone(&self.killed),
            is_killed: false,
        }))
    }
}

struct MockProcess {
    lines: Option<mpsc::UnboundedReceiver<OutputLine>>,
    killed: Arc<AtomicUsize>,
    is_killed: bool,
}

#[async_trait]
impl RunningProcess for MockProcess {
    fn take_lines(&mut self) -> Option<mpsc::UnboundedReceiver<OutputLine>> {
        self.lines.take()
    }

    async fn kill(&mut self) -> Result<()> {
        if !self.is_killed {
            self.is_killed = true;
            self.killed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_strips_program_path() {
        let cmd = CommandLine::new("/usr/local/bin/kubectl")
            .args(["get", "pods"])
            .arg("--namespace=default");
        insta::assert_snapshot!(cmd.printable(), @"kubectl get pods --namespace=default");
    }

    #[test]
    fn test_process_output_combined() {
        assert_eq!(ProcessOutput::success("ok\n").combined(), "ok");
        assert_eq!(ProcessOutput::failure(1, "bad\n").combined(), "bad");
        let both = ProcessOutput {
            exit_code: 1,
            stdout: "out".into(),
            stderr: "err".into(),
        };
        assert_eq!(both.combined(), "out\nerr");
        assert!(!both.is_success());
    }

    #[tokio::test]
    async fn test_mock_runner_sequences_and_sticky_last() {
        let runner = MockRunner::new();
        runner.respond_sequence("get Foo/bar", &["false", "true"]);

        let cmd = CommandLine::new("kubectl").args(["get", "Foo/bar"]);
        assert_eq!(runner.execute_silent(&cmd).await.unwrap().stdout, "false");
        assert_eq!(runner.execute_silent(&cmd).await.unwrap().stdout, "true");
        assert_eq!(runner.execute_silent(&cmd).await.unwrap().stdout, "true");
        assert_eq!(runner.count_matching("Foo/bar"), 3);
    }

    #[tokio::test]
    async fn test_mock_runner_unmatched_succeeds() {
        let runner = MockRunner::new();
        runner.fail_on("delete", 1, "forbidden");

        let ok = runner
            .execute_silent(&CommandLine::new("kubectl").arg("apply"))
            .await
            .unwrap();
        assert!(ok.is_success());

        let failed = runner
            .execute_silent(&CommandLine::new("kubectl").arg("delete"))
            .await
            .unwrap();
        assert_eq!(failed.exit_code, 1);
        assert_eq!(failed.stderr, "forbidden");
    }

    #[tokio::test]
    async fn test_mock_runner_streams_to_sink() {
        let runner = MockRunner::new();
        runner.respond("rollout", ProcessOutput::success("line one\nline two"));

        let seen = Mutex::new(Vec::new());
        let sink = |line: &OutputLine| seen.lock().unwrap().push(line.text().to_string());
        runner
            .execute(&CommandLine::new("kubectl").arg("rollout"), Some(&sink))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["line one", "line two"]);
    }

    #[tokio::test]
    async fn test_mock_spawn_and_kill() {
        let runner = MockRunner::new();
        runner.with_watch_lines(vec![OutputLine::Stdout("event".into())]);

        let mut process = runner
            .spawn(&CommandLine::new("kubectl").args(["get", "events"]))
            .await
            .unwrap();
        let mut lines = process.take_lines().unwrap();
        assert_eq!(lines.recv().await, Some(OutputLine::Stdout("event".into())));

        process.kill().await.unwrap();
        process.kill().await.unwrap();
        assert_eq!(runner.killed_count(), 1);
        assert_eq!(runner.spawned().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let runner = ProcessRunner::new();
        let output = runner
            .execute_silent(&CommandLine::new("sh").args(["-c", "echo hello; echo oops 1>&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_timeout() {
        let runner = ProcessRunner::new();
        let err = runner
            .execute_silent(
                &CommandLine::new("sleep")
                    .arg("5")
                    .timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_process_runner_missing_binary() {
        let runner = ProcessRunner::new();
        let err = runner
            .execute_silent(&CommandLine::new("kdeploy-definitely-not-installed"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Spawn { .. }));
    }
}
