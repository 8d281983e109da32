//! Child process management for ffmpeg, ffplay and mpv.
//!
//! Every media collaborator in this crate (camera capture, clip encoding,
//! live preview) is an external process fed through stdin or read through
//! stdout. This module owns spawning, stderr forwarding and termination.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Number of stderr lines kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// How long `shutdown` waits for a graceful exit before killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur while running a child process
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{program} not found. Please install it and make sure it is on PATH")]
    NotFound { program: String },
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with code {exit_code:?}\n{stderr}")]
    ProcessFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running child process with its stderr forwarded to the log.
pub struct ChildProcess {
    program: String,
    child: Child,
    stderr_thread: Option<JoinHandle<()>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

impl ChildProcess {
    /// Spawn a process whose stdout is read by the caller (stdin is closed).
    pub fn spawn_reader(program: &str, args: &[String]) -> Result<Self, PipelineError> {
        Self::spawn_with(program, args, Stdio::null(), Stdio::piped())
    }

    /// Spawn a process fed through stdin by the caller (stdout is discarded).
    pub fn spawn_writer(program: &str, args: &[String]) -> Result<Self, PipelineError> {
        Self::spawn_with(program, args, Stdio::piped(), Stdio::null())
    }

    fn spawn_with(
        program: &str,
        args: &[String],
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<Self, PipelineError> {
        log::debug!("spawning {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped());

        // Keep the terminal's Ctrl+C away from children; the caller stops
        // them through `finish` or `shutdown` once its own cleanup runs.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::NotFound {
                        program: program.to_string(),
                    }
                } else {
                    PipelineError::SpawnFailed {
                        program: program.to_string(),
                        source: e,
                    }
                }
            })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        // Forward stderr to the log and keep the last lines for error messages
        let stderr_thread = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            let name = program.to_string();
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    log::debug!("[{}] {}", name, line);
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            })
        });

        Ok(ChildProcess {
            program: program.to_string(),
            child,
            stderr_thread,
            stderr_tail,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take ownership of the stdin pipe (only for `spawn_writer` processes).
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout pipe (only for `spawn_reader` processes).
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit.
    pub fn wait(&mut self) -> Result<ExitStatus, PipelineError> {
        let status = self.child.wait()?;
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        Ok(status)
    }

    /// Close stdin (if still held) and wait for a clean exit.
    ///
    /// Returns `ProcessFailed` with the stderr tail when the exit status is
    /// not success.
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        drop(self.child.stdin.take());
        let status = self.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::ProcessFailed {
                program: self.program.clone(),
                exit_code: status.code(),
                stderr: self.stderr_tail(),
            })
        }
    }

    /// Request a graceful shutdown.
    ///
    /// Sends SIGINT and waits for the process to terminate. If it doesn't
    /// exit within the timeout, it is killed.
    pub fn shutdown(&mut self) -> Result<ExitStatus, PipelineError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(status);
        }

        #[cfg(unix)]
        {
            // SAFETY: `kill` is called with the pid of a child this struct owns
            // and has not reaped yet.
            unsafe {
                libc::kill(self.child.id() as i32, libc::SIGINT);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    if let Some(handle) = self.stderr_thread.take() {
                        let _ = handle.join();
                    }
                    return Ok(status);
                }
                Ok(None) => {
                    if start.elapsed() > SHUTDOWN_TIMEOUT {
                        log::warn!("{} did not exit after SIGINT, killing it", self.program);
                        let _ = self.child.kill();
                        return self.wait();
                    }
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(PipelineError::Io(e)),
            }
        }
    }

    /// The last stderr lines, newline separated.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.shutdown();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let err = ChildProcess::spawn_reader("definitely-not-a-real-binary-xyz", &[]).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
        assert!(err.to_string().contains("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn test_reader_stdout() {
        let mut process = ChildProcess::spawn_reader("sh", &sh("printf abc")).unwrap();
        let mut out = String::new();
        process.take_stdout().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
        assert!(process.finish().is_ok());
    }

    #[test]
    fn test_writer_finish_closes_stdin() {
        let mut process = ChildProcess::spawn_writer("sh", &sh("cat > /dev/null")).unwrap();
        process.take_stdin().unwrap().write_all(b"hello").unwrap();
        assert!(process.finish().is_ok());
        assert!(!process.is_running());
    }

    #[test]
    fn test_failed_exit_reports_stderr_tail() {
        let mut process = ChildProcess::spawn_reader("sh", &sh("echo boom >&2; exit 3")).unwrap();
        match process.finish() {
            Err(PipelineError::ProcessFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("Expected ProcessFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_stops_long_running_process() {
        let mut process = ChildProcess::spawn_reader("sleep", &["30".to_string()]).unwrap();
        assert!(process.is_running());
        let status = process.shutdown().unwrap();
        assert!(!status.success());
        assert!(!process.is_running());
    }

    #[test]
    fn test_child_runs_in_its_own_process_group() {
        let mut process = ChildProcess::spawn_writer("sh", &sh("cat > /dev/null")).unwrap();
        let pid = process.pid() as libc::pid_t;
        // SAFETY: plain queries on our own process and a live child.
        let (child_group, own_group) = unsafe { (libc::getpgid(pid), libc::getpgrp()) };
        assert_eq!(child_group, pid);
        // A terminal Ctrl+C signals `own_group` only
        assert_ne!(child_group, own_group);
        assert!(process.finish().is_ok());
    }

    #[test]
    fn test_shutdown_exited_process() {
        let mut process = ChildProcess::spawn_reader("sh", &sh("exit 0")).unwrap();
        let _ = process.wait();
        assert!(process.shutdown().is_ok());
    }
}
