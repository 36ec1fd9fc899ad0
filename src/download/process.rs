//! Supervised child processes
//!
//! Runs a helper program with captured output and a hard deadline. Output
//! lines from both streams are forwarded while the process runs; once the
//! deadline passes the process is killed.

use super::{Deadline, TransportError};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// How often the deadline is checked while a process is silent
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Number of trailing stderr lines kept for error reports
const STDERR_TAIL: usize = 5;

/// Result of a supervised run
#[derive(Debug)]
pub(crate) struct ProcessOutcome {
    pub status: ExitStatus,
    /// Last lines written to stderr
    pub stderr_tail: Vec<String>,
}

impl ProcessOutcome {
    /// Converts a non-zero exit into [`TransportError::ProcessFailed`]
    pub(crate) fn into_result(self, program: &str) -> Result<(), TransportError> {
        if self.status.success() {
            return Ok(());
        }

        Err(TransportError::ProcessFailed {
            program: program.to_string(),
            status: self.status.to_string(),
            detail: if self.stderr_tail.is_empty() {
                "no error output".to_string()
            } else {
                self.stderr_tail.join(" | ")
            },
        })
    }
}

enum Line {
    Stdout(String),
    Stderr(String),
}

/// Runs `command` until it exits or `deadline` expires
///
/// Arguments are passed as a vector, never through a shell. On unix the
/// process leads its own process group, so helpers it starts are killed
/// along with it.
pub(crate) fn run_supervised(
    command: &mut Command,
    program: &str,
    deadline: &Deadline,
    on_line: &mut dyn FnMut(&str),
) -> Result<ProcessOutcome, TransportError> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| TransportError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, tx.clone(), Line::Stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, tx, Line::Stderr);
    }

    let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL);

    loop {
        match rx.recv_timeout(deadline.remaining().min(POLL_INTERVAL)) {
            Ok(Line::Stdout(line)) => on_line(&line),
            Ok(Line::Stderr(line)) => {
                on_line(&line);
                if stderr_tail.len() == STDERR_TAIL {
                    stderr_tail.pop_front();
                }
                stderr_tail.push_back(line);
            }
            Err(RecvTimeoutError::Timeout) => {
                if deadline.is_expired() {
                    return Err(terminate(&mut child, deadline));
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Both pipes are closed, the process is about to exit
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(ProcessOutcome {
                    status,
                    stderr_tail: stderr_tail.into(),
                });
            }
            Ok(None) if deadline.is_expired() => return Err(terminate(&mut child, deadline)),
            Ok(None) => thread::sleep(POLL_INTERVAL.min(deadline.remaining())),
            Err(e) => {
                return Err(TransportError::Spawn {
                    program: program.to_string(),
                    source: e,
                });
            }
        }
    }
}

fn terminate(child: &mut Child, deadline: &Deadline) -> TransportError {
    kill_process_group(child);
    let _ = child.kill();
    let _ = child.wait();
    deadline.timeout_error()
}

/// Kills every process in the child's group, grandchildren included
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let group = format!("-{}", child.id());
    let _ = Command::new("kill")
        .args(["-s", "KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn spawn_reader<R>(stream: R, tx: Sender<Line>, wrap: fn(String) -> Line)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for chunk in reader.split(b'\n') {
            let Ok(chunk) = chunk else {
                break;
            };
            let line = String::from_utf8_lossy(&chunk)
                .trim_end_matches('\r')
                .to_string();
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    });
}
