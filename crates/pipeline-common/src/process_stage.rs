//! Process-backed stage.
//!
//! Wraps an external executable that reads its input on stdin, writes its
//! output on stdout and uses stderr for diagnostics.
//!
//! Life cycle: `Idle -> Spawning -> Running -> {Draining | Erroring} -> Ended`.
//!
//! - The child is spawned lazily, when the first input chunk (or the end of an
//!   empty input) arrives.
//! - Input is fed by a separate task so a child blocked on a full stdout pipe
//!   can never deadlock against a full stdin pipe. Once the child stops
//!   accepting input, remaining chunks are discarded.
//! - Stdout closing before the child exits is only recorded (`Draining`); the
//!   exit status decides the outcome once it arrives. After the exit, stdout
//!   and stderr are drained for at most [`EXIT_GRACE`], so a descendant that
//!   inherited the pipes cannot hold the stage open.
//! - Outcome: exit 0 with output is success; no output at all is
//!   [`PipelineError::EmptyOutput`] even for exit 0; a non-zero exit or a
//!   signal is [`PipelineError::Execution`]. The last stderr line accepted by
//!   the error filter is attached as context.
//! - Cancellation kills the child. With output already forwarded the stage
//!   ends quietly, otherwise it reports `EmptyOutput`.
//!
//! A stage returns exactly one result, so at most one error leaves it.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{KILLED_BY_SIGNAL, OutputRecordReader, PipelineError, Stage, StageIo, forward};

/// Size of a single stdout read.
const READ_CHUNK_SIZE: usize = 8192;

/// How long stdout and stderr may stay open once the child has exited.
pub const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Decides whether a stderr line is a genuine error signal.
pub type ErrorLineFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Life-cycle state of a [`ProcessStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Spawning,
    Running,
    /// Stdout has closed but the exit status is still pending.
    Draining,
    Erroring,
    Ended,
}

pub struct ProcessStage {
    name: String,
    program: String,
    args: Vec<String>,
    error_filter: ErrorLineFilter,
    state: ProcessState,
}

impl ProcessStage {
    /// Create a stage running `program`. The stage is named after the
    /// program's file name.
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let name = std::path::Path::new(&program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());
        Self {
            name,
            program,
            args: Vec::new(),
            error_filter: Arc::new(|line: &str| !line.trim().is_empty()),
            state: ProcessState::Idle,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
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

    /// Replace the stderr error filter. The default accepts any non-empty line.
    pub fn with_error_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.error_filter = Arc::new(filter);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn command_line(&self) -> String {
        process_utils::command_line(&self.program, &self.args)
    }

    fn transition(&mut self, next: ProcessState) {
        debug!(stage = %self.name, from = ?self.state, to = ?next, "Process stage transition");
        self.state = next;
    }

    fn fail(&mut self, err: PipelineError) -> Result<(), PipelineError> {
        self.transition(ProcessState::Erroring);
        Err(err)
    }

    fn execution_error(
        &self,
        exit_code: Option<i32>,
        context: Option<String>,
        source: Option<std::io::Error>,
    ) -> PipelineError {
        PipelineError::Execution {
            command: self.command_line(),
            exit_code,
            context,
            source,
        }
    }

    fn empty_output_error(&self, context: Option<String>) -> PipelineError {
        PipelineError::EmptyOutput {
            command: self.command_line(),
            context,
        }
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut command = process_utils::tokio_command(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.spawn()
    }

    /// Kill the child after cancellation and resolve the stage outcome.
    async fn abandon(
        &mut self,
        child: &mut Child,
        produced_output: bool,
        last_error: &Mutex<Option<String>>,
    ) -> Result<(), PipelineError> {
        if let Err(e) = child.kill().await {
            debug!(stage = %self.name, error = %e, "Child already gone");
        }
        info!(stage = %self.name, produced_output, "Process stage cancelled");

        if produced_output {
            self.transition(ProcessState::Ended);
            Ok(())
        } else {
            let context = last_error.lock().clone();
            let err = self.empty_output_error(context);
            self.fail(err)
        }
    }

    fn classify(
        &mut self,
        status: ExitStatus,
        produced_output: bool,
        context: Option<String>,
    ) -> Result<(), PipelineError> {
        match status.code() {
            Some(0) if produced_output => {
                self.transition(ProcessState::Ended);
                Ok(())
            }
            Some(0) => {
                let err = self.empty_output_error(context);
                self.fail(err)
            }
            Some(code) => {
                let err = self.execution_error(Some(code), context, None);
                self.fail(err)
            }
            None => {
                let err = self.execution_error(Some(KILLED_BY_SIGNAL), context, None);
                self.fail(err)
            }
        }
    }
}

/// Write every input chunk to the child's stdin, in order.
///
/// Once a write fails the child is no longer accepting input: stdin is closed
/// and the remaining chunks are read and dropped.
async fn feed_stdin(
    stage: String,
    stdin: ChildStdin,
    first: Option<Bytes>,
    mut input: mpsc::Receiver<Bytes>,
) {
    let mut stdin = Some(stdin);
    let mut pending = first;
    let mut written: u64 = 0;

    loop {
        let chunk = match pending.take() {
            Some(chunk) => chunk,
            None => match input.recv().await {
                Some(chunk) => chunk,
                None => break,
            },
        };

        if let Some(pipe) = stdin.as_mut() {
            match pipe.write_all(&chunk).await {
                Ok(()) => written += chunk.len() as u64,
                Err(e) => {
                    debug!(stage = %stage, error = %e, "Child stopped accepting input; discarding further writes");
                    stdin = None;
                }
            }
        }
    }

    if let Some(mut pipe) = stdin {
        let _ = pipe.shutdown().await;
    }
    debug!(stage = %stage, written, "Input fully written");
}

/// Read stderr records, remembering the last one the filter accepts.
async fn collect_stderr(
    stage: String,
    stderr: ChildStderr,
    filter: ErrorLineFilter,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let mut reader = OutputRecordReader::new(stderr);
    loop {
        match reader.next_record().await {
            Ok(Some(line)) => {
                if filter(&line) {
                    warn!(stage = %stage, line = %line, "Engine reported an error line");
                    *last_error.lock() = Some(line);
                } else {
                    debug!(stage = %stage, line = %line, "Engine diagnostic");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(stage = %stage, error = %e, "Failed to read stderr");
                break;
            }
        }
    }
}

#[async_trait]
impl Stage for ProcessStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(mut self: Box<Self>, io: StageIo) -> Result<(), PipelineError> {
        let StageIo {
            mut input,
            output,
            token,
        } = io;

        // Idle: wait for the first chunk (or an empty input) before spawning.
        let first = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(stage = %self.name, "Process stage cancelled before spawning");
                let err = self.empty_output_error(None);
                return self.fail(err);
            }
            first = input.recv() => first,
        };

        self.transition(ProcessState::Spawning);
        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                let err = self.execution_error(None, None, Some(e));
                return self.fail(err);
            }
        };
        info!(stage = %self.name, pid = ?child.id(), command = %self.command_line(), "Spawned engine process");

        let (Some(stdin), Some(mut stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill().await;
            let err = self.execution_error(
                None,
                None,
                Some(std::io::Error::other("child stdio was not captured")),
            );
            return self.fail(err);
        };
        self.transition(ProcessState::Running);

        let last_error = Arc::new(Mutex::new(None::<String>));
        let feeder: JoinHandle<()> =
            tokio::spawn(feed_stdin(self.name.clone(), stdin, first, input));
        let stderr_task = tokio::spawn(collect_stderr(
            self.name.clone(),
            stderr,
            self.error_filter.clone(),
            last_error.clone(),
        ));

        let mut produced_output = false;
        let mut stdout_closed = false;
        let mut exit_status: Option<ExitStatus> = None;
        let mut drain_deadline: Option<Instant> = None;
        let mut buffer = [0u8; READ_CHUNK_SIZE];

        let outcome = loop {
            if stdout_closed && let Some(status) = exit_status {
                break Ok(status);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    feeder.abort();
                    return self.abandon(&mut child, produced_output, &last_error).await;
                }
                read = stdout.read(&mut buffer), if !stdout_closed => match read {
                    Ok(0) => {
                        stdout_closed = true;
                        if exit_status.is_none() {
                            self.transition(ProcessState::Draining);
                        }
                    }
                    Ok(n) => {
                        produced_output = true;
                        if !forward(&output, Bytes::copy_from_slice(&buffer[..n]), &token).await {
                            feeder.abort();
                            if token.is_cancelled() {
                                return self.abandon(&mut child, produced_output, &last_error).await;
                            }
                            // Nobody reads our output any more.
                            debug!(stage = %self.name, "Downstream closed; stopping engine process");
                            let _ = child.kill().await;
                            self.transition(ProcessState::Ended);
                            return Ok(());
                        }
                    }
                    Err(e) => break Err(e),
                },
                status = child.wait(), if exit_status.is_none() => match status {
                    Ok(status) => {
                        debug!(stage = %self.name, ?status, stdout_closed, "Engine process exited");
                        exit_status = Some(status);
                        drain_deadline = Some(Instant::now() + EXIT_GRACE);
                    }
                    Err(e) => break Err(e),
                },
                _ = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                    if drain_deadline.is_some() && !stdout_closed =>
                {
                    if let Some(status) = exit_status {
                        debug!(stage = %self.name, "Stdout still open after exit; using what was read");
                        break Ok(status);
                    }
                }
            }
        };

        feeder.abort();
        let stderr_deadline = drain_deadline.unwrap_or_else(|| Instant::now() + EXIT_GRACE);
        let mut stderr_task = stderr_task;
        if tokio::time::timeout_at(stderr_deadline, &mut stderr_task).await.is_err() {
            debug!(stage = %self.name, "Stderr still open after exit; using what was read");
            stderr_task.abort();
        }
        let context = last_error.lock().clone();

        match outcome {
            Ok(status) => self.classify(status, produced_output, context),
            Err(e) => {
                let _ = child.kill().await;
                let err = self.execution_error(None, context, Some(e));
                self.fail(err)
            }
        }
    }
}
